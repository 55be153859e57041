//! Build engine that turns a plan into cached layers.
//!
//! Steps run strictly in order against a scratch root filesystem. Each
//! layer is either replayed from the store or executed, diffed, packed,
//! and recorded. A failure stops the build; layers recorded before it
//! stay cached for the next attempt.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use stratum_common::constants::MAX_IMAGE_LAYERS;
use stratum_common::error::{Result, StratumError};
use stratum_common::types::{ImageId, Sha256Hash};
use stratum_image::hash::validate_hash;
use stratum_image::layer::{self, LayerDiff};
use stratum_image::manifest::{ImageManifest, ManifestLayer};
use stratum_image::snapshot::Snapshot;
use stratum_image::storage::{CacheEntry, LayerStore};
use stratum_recipe::{BuildStep, Recipe};

use crate::context::BuildContext;
use crate::executor::{RunRequest, StepExecutor};
use crate::planner::{Plan, PlannedStep, Planner};

/// Inputs of one build besides the recipe.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// Directory `COPY` sources are resolved against.
    pub source_dir: PathBuf,
    /// Argument overrides.
    pub overrides: BTreeMap<String, String>,
    /// Directory to receive the final filesystem, if any.
    pub export: Option<PathBuf>,
}

/// One layer produced by a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltLayer {
    /// Position in the image, from zero.
    pub index: usize,
    /// Ordinal of the recipe step.
    pub ordinal: usize,
    /// Cache key.
    pub key: Sha256Hash,
    /// Recipe line that produced the layer.
    pub created_by: String,
    /// Filesystem delta, if the step changed files.
    pub diff: Option<LayerDiff>,
    /// Whether the layer came from the cache.
    pub cached: bool,
}

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Layers bottom to top.
    pub layers: Vec<BuiltLayer>,
    /// Manifest of the image.
    pub manifest: ImageManifest,
    /// Manifest digest.
    pub id: ImageId,
}

impl BuildOutput {
    /// Number of layers served from the cache.
    #[must_use]
    pub fn cache_hits(&self) -> usize {
        self.layers.iter().filter(|l| l.cached).count()
    }
}

/// Cache status of a planned layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerStatus {
    /// Ordinal of the recipe step.
    pub ordinal: usize,
    /// Cache key.
    pub key: Sha256Hash,
    /// Recipe line of the step.
    pub created_by: String,
    /// Whether the store holds an entry for the key.
    pub cached: bool,
}

/// Drives builds against a layer store.
pub struct Engine {
    store: LayerStore,
    executor: Box<dyn StepExecutor>,
    max_layers: usize,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &self.store)
            .field("max_layers", &self.max_layers)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine running `RUN` steps through `executor`.
    #[must_use]
    pub fn new(store: LayerStore, executor: Box<dyn StepExecutor>) -> Self {
        Self {
            store,
            executor,
            max_layers: MAX_IMAGE_LAYERS,
        }
    }

    /// Caps the number of layers per image.
    #[must_use]
    pub const fn with_max_layers(mut self, max_layers: usize) -> Self {
        self.max_layers = max_layers;
        self
    }

    /// The backing layer store.
    #[must_use]
    pub const fn store(&self) -> &LayerStore {
        &self.store
    }

    /// Resolves arguments and plans `recipe`.
    ///
    /// # Errors
    ///
    /// Returns any validation or planning error.
    pub fn plan(&self, recipe: &Recipe, request: &BuildRequest) -> Result<Plan> {
        let ctx = BuildContext::resolve(recipe, &request.overrides);
        Planner::new(&request.source_dir)
            .with_max_layers(self.max_layers)
            .plan(recipe, &ctx)
    }

    /// Reports each planned layer with its cache status, executing nothing.
    ///
    /// # Errors
    ///
    /// Returns any validation or planning error.
    pub fn plan_status(&self, recipe: &Recipe, request: &BuildRequest) -> Result<Vec<LayerStatus>> {
        Ok(self.status_of(&self.plan(recipe, request)?))
    }

    /// Cache status of each layer of an existing plan.
    #[must_use]
    pub fn status_of(&self, plan: &Plan) -> Vec<LayerStatus> {
        plan.steps
            .iter()
            .map(|step| LayerStatus {
                ordinal: step.ordinal,
                key: step.key.clone(),
                created_by: step.created_by(),
                cached: self.store.contains(&step.key),
            })
            .collect()
    }

    /// Builds `recipe`.
    ///
    /// `abort` is checked before each layer; once set, the build stops with
    /// `StratumError::Aborted` naming the first step that did not run.
    ///
    /// # Errors
    ///
    /// Planning errors surface before any step runs. Afterwards a failing
    /// command yields `StratumError::StepExecutionFailed` and a damaged
    /// cache entry yields `StratumError::CacheCorruption`. Any other failure
    /// while producing a layer is wrapped in `StratumError::StepFailed`.
    pub fn build(&self, recipe: &Recipe, request: &BuildRequest, abort: &AtomicBool) -> Result<BuildOutput> {
        let plan = self.plan(recipe, request)?;
        let rootfs = tempfile::Builder::new()
            .prefix("stratum-rootfs-")
            .tempdir()
            .map_err(|e| StratumError::io(std::env::temp_dir(), e))?;

        let mut layers = Vec::with_capacity(plan.steps.len());
        for (index, step) in plan.steps.iter().enumerate() {
            if abort.load(Ordering::SeqCst) {
                tracing::warn!(step = step.ordinal, "build aborted");
                return Err(StratumError::Aborted { step: step.ordinal });
            }
            let layer = self
                .build_layer(index, step, rootfs.path())
                .map_err(|e| e.at_step(step.ordinal))?;
            tracing::info!(
                step = step.ordinal,
                layer = index,
                key = %layer.key.short(),
                cached = layer.cached,
                "{}",
                layer.created_by
            );
            layers.push(layer);
        }

        let manifest = ImageManifest {
            layers: layers
                .iter()
                .map(|l| ManifestLayer {
                    key: l.key.clone(),
                    created_by: l.created_by.clone(),
                    diff: l.diff.clone(),
                })
                .collect(),
            config: plan.config,
        };
        let id = manifest.digest()?;

        if let Some(target) = &request.export {
            self.materialize(&manifest, target)?;
        }

        tracing::info!(id = %id.short(), layers = layers.len(), "build finished");
        Ok(BuildOutput { layers, manifest, id })
    }

    fn build_layer(&self, index: usize, step: &PlannedStep, rootfs: &Path) -> Result<BuiltLayer> {
        let created_by = step.created_by();

        if let Some(entry) = self.store.lookup(&step.key).map_err(|e| corruption(step, e))? {
            if let Some(diff) = &entry.diff {
                let _ = layer::apply_layer(&self.store.blob_path(&diff.digest), rootfs)?;
            }
            return Ok(BuiltLayer {
                index,
                ordinal: step.ordinal,
                key: step.key.clone(),
                created_by,
                diff: entry.diff,
                cached: true,
            });
        }

        let diff = if step.step.touches_filesystem() {
            let before = Snapshot::capture(rootfs)?;
            self.execute(step, rootfs)?;
            let changes = before.diff(&Snapshot::capture(rootfs)?);
            if changes.is_empty() {
                None
            } else {
                let staged = self.store.staging_file()?;
                let diff = layer::pack_layer(rootfs, &changes, staged.path())?;
                let _ = self.store.put_blob(staged, &diff)?;
                Some(diff)
            }
        } else {
            None
        };

        self.store.record(&CacheEntry {
            key: step.key.clone(),
            parent: step.parent.clone(),
            created_by: created_by.clone(),
            diff: diff.clone(),
        })?;

        Ok(BuiltLayer {
            index,
            ordinal: step.ordinal,
            key: step.key.clone(),
            created_by,
            diff,
            cached: false,
        })
    }

    fn execute(&self, step: &PlannedStep, rootfs: &Path) -> Result<()> {
        match &step.step {
            BuildStep::RunCommand { argv } => {
                let output = self.executor.run(&RunRequest {
                    argv: argv.clone(),
                    env: step.env.clone(),
                    workdir: step.workdir.clone(),
                    rootfs: rootfs.to_path_buf(),
                })?;
                if !output.success() {
                    tracing::warn!(
                        step = step.ordinal,
                        exit_code = output.exit_code,
                        stderr = %output.stderr.trim_end(),
                        "command failed"
                    );
                    return Err(StratumError::StepExecutionFailed {
                        step: step.ordinal,
                        exit_code: output.exit_code,
                    });
                }
                Ok(())
            }
            BuildStep::CopyFiles { dst, .. } => {
                let Some(source) = &step.source else {
                    return Err(StratumError::Config {
                        message: format!("step {}: COPY has no resolved source", step.ordinal),
                    });
                };
                copy_into(source, rootfs, dst)
            }
            _ => Ok(()),
        }
    }

    /// Replays the layers of `manifest` into `target`.
    ///
    /// # Errors
    ///
    /// Returns `StratumError::HashMismatch` if a blob no longer matches its
    /// digest, or an I/O error while extracting.
    pub fn materialize(&self, manifest: &ImageManifest, target: &Path) -> Result<()> {
        std::fs::create_dir_all(target).map_err(|e| StratumError::io(target, e))?;
        for diff in manifest.layers.iter().filter_map(|l| l.diff.as_ref()) {
            let blob = self.store.blob_path(&diff.digest);
            validate_hash(&blob, &diff.digest)?;
            let _ = layer::apply_layer(&blob, target)?;
        }
        tracing::info!(target = %target.display(), layers = manifest.layers.len(), "materialized image");
        Ok(())
    }
}

fn corruption(step: &PlannedStep, err: StratumError) -> StratumError {
    match err {
        StratumError::HashMismatch { expected, actual, .. } => StratumError::CacheCorruption {
            step: step.ordinal,
            key: step.key.to_string(),
            expected,
            actual,
        },
        StratumError::Serialization { source } => StratumError::CacheCorruption {
            step: step.ordinal,
            key: step.key.to_string(),
            expected: "a readable index entry".into(),
            actual: source.to_string(),
        },
        other => other,
    }
}

/// Copies `source` into the image at `dst`.
///
/// A file lands at `dst`, or inside it when `dst` ends with `/`. A
/// directory's contents are merged into `dst`.
fn copy_into(source: &Path, rootfs: &Path, dst: &str) -> Result<()> {
    let mut target = rootfs.join(dst.trim_start_matches('/'));
    let meta = std::fs::symlink_metadata(source).map_err(|e| StratumError::io(source, e))?;
    if !meta.is_dir() && dst.ends_with('/') {
        if let Some(name) = source.file_name() {
            target.push(name);
        }
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StratumError::io(parent, e))?;
    }
    copy_entry(source, &target)
}

fn copy_entry(source: &Path, target: &Path) -> Result<()> {
    let meta = std::fs::symlink_metadata(source).map_err(|e| StratumError::io(source, e))?;
    let file_type = meta.file_type();

    if file_type.is_dir() {
        std::fs::create_dir_all(target).map_err(|e| StratumError::io(target, e))?;
        std::fs::set_permissions(target, meta.permissions()).map_err(|e| StratumError::io(target, e))?;
        let mut children: Vec<_> = std::fs::read_dir(source)
            .map_err(|e| StratumError::io(source, e))?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<std::io::Result<_>>()
            .map_err(|e| StratumError::io(source, e))?;
        children.sort();
        for name in children {
            copy_entry(&source.join(&name), &target.join(&name))?;
        }
        return Ok(());
    }

    if std::fs::symlink_metadata(target).is_ok_and(|m| m.is_dir()) {
        std::fs::remove_dir_all(target).map_err(|e| StratumError::io(target, e))?;
    }
    if file_type.is_symlink() {
        copy_symlink(source, target)
    } else {
        let _ = std::fs::copy(source, target).map_err(|e| StratumError::io(target, e))?;
        Ok(())
    }
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> Result<()> {
    let link = std::fs::read_link(source).map_err(|e| StratumError::io(source, e))?;
    if std::fs::symlink_metadata(target).is_ok() {
        std::fs::remove_file(target).map_err(|e| StratumError::io(target, e))?;
    }
    std::os::unix::fs::symlink(link, target).map_err(|e| StratumError::io(target, e))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path) -> Result<()> {
    let _ = std::fs::copy(source, target).map_err(|e| StratumError::io(target, e))?;
    Ok(())
}
