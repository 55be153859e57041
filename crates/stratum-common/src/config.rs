//! Global configuration model for Stratum.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StratumError};

/// Root configuration for Stratum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StratumConfig {
    /// Base directory for Stratum state and data.
    pub data_dir: PathBuf,
    /// Directory of the content-addressed layer cache.
    pub cache_dir: PathBuf,
    /// Directory holding the image catalog.
    pub images_dir: PathBuf,
    /// Upper bound on the number of layers one build may produce.
    pub max_layers: usize,
}

impl StratumConfig {
    /// Derives a configuration whose directories live under `data_dir`.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            cache_dir: data_dir.join(crate::constants::CACHE_DIR_NAME),
            images_dir: data_dir.join(crate::constants::IMAGES_DIR_NAME),
            data_dir,
            max_layers: crate::constants::MAX_IMAGE_LAYERS,
        }
    }

    /// Loads a configuration file, returning defaults when it does not exist.
    ///
    /// Fields missing from the file keep their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed,
    /// or if it sets `max_layers` to zero.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| StratumError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        if config.max_layers == 0 {
            return Err(StratumError::Config {
                message: "max_layers must be at least 1".into(),
            });
        }
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }
}

impl Default for StratumConfig {
    fn default() -> Self {
        Self::with_data_dir(crate::constants::data_dir().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_data_dir_nests_cache_and_images() {
        let config = StratumConfig::with_data_dir("/srv/stratum");
        assert_eq!(config.cache_dir, PathBuf::from("/srv/stratum/cache"));
        assert_eq!(config.images_dir, PathBuf::from("/srv/stratum/images"));
        assert_eq!(config.max_layers, crate::constants::MAX_IMAGE_LAYERS);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = StratumConfig::load(&dir.path().join("absent.json")).expect("load");
        assert_eq!(config, StratumConfig::default());
    }

    #[test]
    fn load_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "max_layers": 16 }"#).expect("write");
        let config = StratumConfig::load(&path).expect("load");
        assert_eq!(config.max_layers, 16);
        assert_eq!(config.cache_dir, StratumConfig::default().cache_dir);
    }

    #[test]
    fn load_rejects_zero_layer_budget() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "max_layers": 0 }"#).expect("write");
        assert!(StratumConfig::load(&path).is_err());
    }
}
