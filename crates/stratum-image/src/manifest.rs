//! Image manifests and runtime metadata.

use serde::{Deserialize, Serialize};
use stratum_common::constants::DEFAULT_WORKDIR;
use stratum_common::error::Result;
use stratum_common::types::{ImageId, Sha256Hash};

use crate::hash::hash_bytes;
use crate::layer::LayerDiff;

/// Runtime metadata accumulated by the metadata steps of a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Absolute working directory inside the image.
    pub workdir: String,
    /// Environment variables in first-declaration order.
    pub env: Vec<(String, String)>,
    /// Exposed ports, sorted and unique.
    pub exposed_ports: Vec<u16>,
    /// Entrypoint argv, empty when unset.
    pub entrypoint: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workdir: DEFAULT_WORKDIR.into(),
            env: Vec::new(),
            exposed_ports: Vec::new(),
            entrypoint: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Sets a variable, replacing an earlier value in place.
    pub fn set_env(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.env.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.env.push((key.to_owned(), value)),
        }
    }

    /// Looks up a variable.
    #[must_use]
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Adds a port, keeping the list sorted and unique.
    pub fn expose(&mut self, port: u16) {
        if let Err(pos) = self.exposed_ports.binary_search(&port) {
            self.exposed_ports.insert(pos, port);
        }
    }
}

/// One layer as recorded in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestLayer {
    /// Cache key of the layer.
    pub key: Sha256Hash,
    /// Recipe line that produced the layer.
    pub created_by: String,
    /// Filesystem delta, if the step changed files.
    pub diff: Option<LayerDiff>,
}

/// Ordered layers plus runtime metadata of a built image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Layers bottom to top.
    pub layers: Vec<ManifestLayer>,
    /// Runtime metadata.
    pub config: RuntimeConfig,
}

impl ImageManifest {
    /// Content identifier of the image.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be serialized.
    pub fn digest(&self) -> Result<ImageId> {
        let json = serde_json::to_vec(self)?;
        Ok(ImageId::new(hash_bytes(&json).as_hex()))
    }

    /// Total size of all layer archives.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.layers
            .iter()
            .filter_map(|l| l.diff.as_ref())
            .map(|d| d.size_bytes)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_env_replaces_in_place() {
        let mut config = RuntimeConfig::default();
        config.set_env("A", "1");
        config.set_env("B", "2");
        config.set_env("A", "3");
        assert_eq!(
            config.env,
            vec![("A".into(), "3".into()), ("B".into(), "2".into())]
        );
        assert_eq!(config.env_var("A"), Some("3"));
        assert_eq!(config.env_var("C"), None);
    }

    #[test]
    fn expose_keeps_ports_sorted_and_unique() {
        let mut config = RuntimeConfig::default();
        for port in [8080, 22, 8080, 443] {
            config.expose(port);
        }
        assert_eq!(config.exposed_ports, vec![22, 443, 8080]);
    }

    #[test]
    fn default_workdir_is_root() {
        assert_eq!(RuntimeConfig::default().workdir, "/");
    }

    #[test]
    fn digest_depends_on_content() {
        let mut manifest = ImageManifest {
            layers: vec![ManifestLayer {
                key: hash_bytes(b"k"),
                created_by: "EXPOSE 80".into(),
                diff: None,
            }],
            config: RuntimeConfig::default(),
        };
        let first = manifest.digest().expect("digest");
        assert_eq!(first, manifest.digest().expect("digest"));
        manifest.config.expose(80);
        assert_ne!(first, manifest.digest().expect("digest"));
    }

    #[test]
    fn size_sums_layer_archives() {
        let manifest = ImageManifest {
            layers: vec![
                ManifestLayer {
                    key: hash_bytes(b"a"),
                    created_by: "RUN".into(),
                    diff: Some(LayerDiff {
                        digest: hash_bytes(b"blob"),
                        size_bytes: 100,
                        entries: 2,
                    }),
                },
                ManifestLayer {
                    key: hash_bytes(b"b"),
                    created_by: "ENV".into(),
                    diff: None,
                },
            ],
            config: RuntimeConfig::default(),
        };
        assert_eq!(manifest.size_bytes(), 100);
    }
}
