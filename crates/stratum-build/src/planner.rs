//! Layer planning.
//!
//! Turns a recipe and a resolved [`BuildContext`] into the ordered layers a
//! build will produce, each with its cache key. Nothing is executed here:
//! branches are selected, arguments substituted, paths resolved, and keys
//! chained from each layer to the next.

use std::collections::HashSet;
use std::path::PathBuf;

use stratum_common::constants::{CACHE_KEY_VERSION, MAX_IMAGE_LAYERS};
use stratum_common::error::{Result, StratumError};
use stratum_common::types::Sha256Hash;
use stratum_image::hash::{ContentHasher, hash_tree};
use stratum_image::manifest::RuntimeConfig;
use stratum_recipe::interpolate::{self, InterpolationError};
use stratum_recipe::parser::ast::count_steps;
use stratum_recipe::parser::validator;
use stratum_recipe::{BuildStep, Recipe};

use crate::context::BuildContext;

/// One layer of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStep {
    /// Depth-first ordinal of the step in the recipe.
    pub ordinal: usize,
    /// The step with arguments substituted and paths made absolute.
    pub step: BuildStep,
    /// Cache key of the layer.
    pub key: Sha256Hash,
    /// Cache key of the layer below.
    pub parent: Option<Sha256Hash>,
    /// Working directory in effect when the step runs.
    pub workdir: String,
    /// Environment in effect when the step runs.
    pub env: Vec<(String, String)>,
    /// Host path copied by a `COPY` step.
    pub source: Option<PathBuf>,
}

impl PlannedStep {
    /// Recipe line recorded as the layer's history.
    #[must_use]
    pub fn created_by(&self) -> String {
        self.step.to_string()
    }
}

/// Ordered layers and the runtime metadata they leave behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Layers bottom to top.
    pub steps: Vec<PlannedStep>,
    /// Runtime metadata after the last step.
    pub config: RuntimeConfig,
}

impl Plan {
    /// Layer keys bottom to top.
    #[must_use]
    pub fn keys(&self) -> Vec<Sha256Hash> {
        self.steps.iter().map(|s| s.key.clone()).collect()
    }

    /// Key of the top layer.
    #[must_use]
    pub fn final_key(&self) -> Option<&Sha256Hash> {
        self.steps.last().map(|s| &s.key)
    }
}

/// Computes a layer cache key.
///
/// The key covers a version salt, the parent key, the canonical JSON of the
/// resolved step, and the digest of any copied source content.
///
/// # Errors
///
/// Returns an error if the step cannot be serialized.
pub fn cache_key(
    parent: Option<&Sha256Hash>,
    step: &BuildStep,
    source: Option<&Sha256Hash>,
) -> Result<Sha256Hash> {
    let canonical = serde_json::to_vec(step)?;
    let mut hasher = ContentHasher::new();
    let _ = hasher
        .field(CACHE_KEY_VERSION.as_bytes())
        .field(parent.map_or("", Sha256Hash::as_hex).as_bytes())
        .field(&canonical)
        .field(source.map_or("", Sha256Hash::as_hex).as_bytes());
    Ok(hasher.finish())
}

/// Plans recipes against a build source directory.
#[derive(Debug, Clone)]
pub struct Planner {
    source_dir: PathBuf,
    max_layers: usize,
}

impl Planner {
    /// Creates a planner resolving `COPY` sources under `source_dir`.
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            max_layers: MAX_IMAGE_LAYERS,
        }
    }

    /// Caps the number of layers a plan may have.
    #[must_use]
    pub const fn with_max_layers(mut self, max_layers: usize) -> Self {
        self.max_layers = max_layers;
        self
    }

    /// Plans `recipe` with the given argument values.
    ///
    /// # Errors
    ///
    /// Returns `StratumError::UndeclaredArgument` for references to
    /// arguments not in scope, and `StratumError::Config` for malformed
    /// steps, escaping paths, missing `COPY` sources, or too many layers.
    pub fn plan(&self, recipe: &Recipe, ctx: &BuildContext) -> Result<Plan> {
        validator::validate(recipe)?;

        let mut walk = Walk {
            planner: self,
            ctx,
            ordinal: 0,
            parent: None,
            config: RuntimeConfig::default(),
            layers: Vec::new(),
        };
        walk.steps(&recipe.steps, &mut HashSet::new())?;

        if walk.layers.len() > self.max_layers {
            return Err(StratumError::Config {
                message: format!(
                    "recipe produces {} layers, more than the limit of {}",
                    walk.layers.len(),
                    self.max_layers
                ),
            });
        }

        tracing::info!(layers = walk.layers.len(), "planned build");
        Ok(Plan {
            steps: walk.layers,
            config: walk.config,
        })
    }
}

impl Planner {
    /// Resolves `rel` under the source directory without leaving it.
    ///
    /// Every component but the last is resolved through symlinks and must
    /// stay inside the canonical source directory. The last component is
    /// copied as it is, so a symlink there is copied as a link.
    fn resolve_source(&self, rel: &str, ordinal: usize) -> Result<PathBuf> {
        let root = std::fs::canonicalize(&self.source_dir)
            .map_err(|e| StratumError::io(&self.source_dir, e))?;
        let joined = root.join(rel);
        if std::fs::symlink_metadata(&joined).is_err() {
            return Err(invalid(
                ordinal,
                format!("COPY source {} not found", joined.display()),
            ));
        }
        let resolved = match (rel.is_empty(), joined.parent(), joined.file_name()) {
            (false, Some(parent), Some(name)) => std::fs::canonicalize(parent)
                .map_err(|e| StratumError::io(parent, e))?
                .join(name),
            _ => root.clone(),
        };
        if !resolved.starts_with(&root) {
            return Err(invalid(
                ordinal,
                format!("COPY source {rel} resolves outside the build context"),
            ));
        }
        Ok(resolved)
    }
}

struct Walk<'a> {
    planner: &'a Planner,
    ctx: &'a BuildContext,
    ordinal: usize,
    parent: Option<Sha256Hash>,
    config: RuntimeConfig,
    layers: Vec<PlannedStep>,
}

impl Walk<'_> {
    fn steps(&mut self, steps: &[BuildStep], scope: &mut HashSet<String>) -> Result<()> {
        for step in steps {
            let ordinal = self.ordinal;
            self.ordinal += 1;
            match step {
                BuildStep::Branch {
                    condition,
                    then_steps,
                    else_steps,
                } => {
                    if !scope.contains(&condition.arg) {
                        return Err(StratumError::UndeclaredArgument {
                            name: condition.arg.clone(),
                            step: ordinal,
                        });
                    }
                    let actual = self.ctx.get(&condition.arg).unwrap_or_default();
                    let taken = condition.evaluate(actual);
                    tracing::debug!(step = ordinal, condition = %condition, taken, "resolved branch");

                    // Arm declarations stay inside the arm.
                    let mut arm_scope = scope.clone();
                    if taken {
                        self.steps(then_steps, &mut arm_scope)?;
                        self.ordinal += count_steps(else_steps);
                    } else {
                        self.ordinal += count_steps(then_steps);
                        self.steps(else_steps, &mut arm_scope)?;
                    }
                }
                _ => self.layer(ordinal, step, scope)?,
            }
        }
        Ok(())
    }

    fn layer(&mut self, ordinal: usize, step: &BuildStep, scope: &mut HashSet<String>) -> Result<()> {
        let workdir = self.config.workdir.clone();
        let env = self.config.env.clone();
        let mut source = None;
        let mut source_digest = None;

        let resolved = match step {
            BuildStep::DeclareArg { name, .. } => {
                let _ = scope.insert(name.clone());
                step.clone()
            }
            BuildStep::RunCommand { argv } => BuildStep::RunCommand {
                argv: argv
                    .iter()
                    .map(|arg| self.substitute(arg, scope, ordinal))
                    .collect::<Result<_>>()?,
            },
            BuildStep::CopyFiles { src, dst } => {
                let src = self.substitute(src, scope, ordinal)?;
                let dst_raw = self.substitute(dst, scope, ordinal)?;

                let rel = normalize("/", &src)
                    .ok_or_else(|| invalid(ordinal, format!("COPY source {src} escapes the build context")))?
                    .trim_start_matches('/')
                    .to_owned();
                let path = self.planner.resolve_source(&rel, ordinal)?;
                source_digest = Some(hash_tree(&path)?);
                source = Some(path);

                let mut dst = normalize(&workdir, &dst_raw).ok_or_else(|| {
                    invalid(ordinal, format!("COPY destination {dst_raw} escapes the image root"))
                })?;
                if dst_raw.ends_with('/') && dst != "/" {
                    dst.push('/');
                }
                BuildStep::CopyFiles {
                    src: if rel.is_empty() { ".".into() } else { rel },
                    dst,
                }
            }
            BuildStep::SetWorkdir { path } => {
                let path = self.substitute(path, scope, ordinal)?;
                let absolute = normalize(&workdir, &path).ok_or_else(|| {
                    invalid(ordinal, format!("WORKDIR {path} escapes the image root"))
                })?;
                self.config.workdir.clone_from(&absolute);
                BuildStep::SetWorkdir { path: absolute }
            }
            BuildStep::SetEnv { key, value } => {
                self.config.set_env(key, value.clone());
                step.clone()
            }
            BuildStep::ExposePort { port } => {
                self.config.expose(*port);
                step.clone()
            }
            BuildStep::SetEntrypoint { argv } => {
                self.config.entrypoint.clone_from(argv);
                step.clone()
            }
            BuildStep::Branch { .. } => unreachable!("branches are expanded by Walk::steps"),
        };

        let key = cache_key(self.parent.as_ref(), &resolved, source_digest.as_ref())?;
        tracing::debug!(step = ordinal, key = %key.short(), created_by = %resolved, "planned layer");
        let parent = self.parent.replace(key.clone());
        self.layers.push(PlannedStep {
            ordinal,
            step: resolved,
            key,
            parent,
            workdir,
            env,
            source,
        });
        Ok(())
    }

    fn substitute(&self, template: &str, scope: &HashSet<String>, ordinal: usize) -> Result<String> {
        interpolate::substitute(template, |name| {
            scope
                .contains(name)
                .then(|| self.ctx.get(name).unwrap_or_default().to_owned())
        })
        .map_err(|e| match e {
            InterpolationError::Undefined { name } => StratumError::UndeclaredArgument {
                name,
                step: ordinal,
            },
            other => invalid(ordinal, other.to_string()),
        })
    }
}

/// Resolves `path` against the absolute directory `base`.
///
/// Returns `None` if `..` climbs above the root.
fn normalize(base: &str, path: &str) -> Option<String> {
    let mut parts: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        base.split('/').filter(|p| !p.is_empty()).collect()
    };
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                let _ = parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(format!("/{}", parts.join("/")))
}

fn invalid(step: usize, message: String) -> StratumError {
    StratumError::Config {
        message: format!("step {step}: {message}"),
    }
}
