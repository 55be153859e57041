//! Local image catalog management.
//!
//! Maintains an index of built images, their layers, and runtime metadata.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stratum_common::error::{Result, StratumError};
use stratum_common::types::{ImageId, Sha256Hash};
use tempfile::NamedTempFile;

use crate::manifest::RuntimeConfig;

const CATALOG_FILE: &str = "catalog.json";

/// Entry in the local image catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    /// Manifest digest of the image.
    pub id: ImageId,
    /// Human-readable tag, unique across the catalog.
    pub tag: Option<String>,
    /// Recipe file the image was built from.
    pub recipe: String,
    /// Ordered layer keys (bottom to top).
    pub layers: Vec<Sha256Hash>,
    /// Total size of the layer archives in bytes.
    pub size_bytes: u64,
    /// Creation timestamp (RFC 3339).
    pub created_at: String,
    /// Runtime metadata.
    pub config: RuntimeConfig,
}

impl ImageEntry {
    /// Whether `reference` names this entry by tag, full id, or id prefix.
    #[must_use]
    pub fn matches(&self, reference: &str) -> bool {
        self.tag.as_deref() == Some(reference)
            || (!reference.is_empty() && self.id.as_str().starts_with(reference))
    }
}

/// Current time in the catalog's timestamp format.
#[must_use]
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Image catalog backed by a JSON file.
#[derive(Debug)]
pub struct ImageCatalog {
    catalog_path: PathBuf,
}

impl ImageCatalog {
    /// Opens or creates an image catalog in the given directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog directory cannot be created.
    pub fn open(images_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(images_dir).map_err(|e| StratumError::io(images_dir, e))?;
        Ok(Self {
            catalog_path: images_dir.join(CATALOG_FILE),
        })
    }

    /// Lists all images in the catalog, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog file cannot be read or parsed.
    pub fn list(&self) -> Result<Vec<ImageEntry>> {
        if !self.catalog_path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.catalog_path)
            .map_err(|e| StratumError::io(&self.catalog_path, e))?;
        let entries: Vec<ImageEntry> = serde_json::from_str(&content)?;
        Ok(entries)
    }

    /// Finds an image by tag, id, or unambiguous id prefix.
    ///
    /// # Errors
    ///
    /// Returns `StratumError::NotFound` if nothing matches, or
    /// `StratumError::Config` if a prefix matches several images.
    pub fn find(&self, reference: &str) -> Result<ImageEntry> {
        let entries = self.list()?;
        let index = Self::resolve(&entries, reference)?;
        Ok(entries[index].clone())
    }

    /// Registers an image.
    ///
    /// An entry with the same id is replaced. A tag already held by another
    /// image moves to the new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read or written.
    pub fn register(&self, entry: ImageEntry) -> Result<()> {
        let mut entries = self.list()?;
        entries.retain(|e| e.id != entry.id);
        if let Some(tag) = &entry.tag {
            for other in entries.iter_mut().filter(|e| e.tag.as_ref() == Some(tag)) {
                tracing::info!(tag = %tag, from = %other.id.short(), "moving tag");
                other.tag = None;
            }
        }
        tracing::info!(id = %entry.id.short(), tag = ?entry.tag, "registered image");
        entries.push(entry);
        self.write_entries(&entries)
    }

    /// Removes an image by tag, id, or id prefix.
    ///
    /// # Errors
    ///
    /// Returns `StratumError::NotFound` if no image matches.
    pub fn remove(&self, reference: &str) -> Result<ImageEntry> {
        let mut entries = self.list()?;
        let index = Self::resolve(&entries, reference)?;
        let removed = entries.remove(index);
        self.write_entries(&entries)?;
        Ok(removed)
    }

    fn resolve(entries: &[ImageEntry], reference: &str) -> Result<usize> {
        if let Some(index) = entries
            .iter()
            .position(|e| e.tag.as_deref() == Some(reference) || e.id.as_str() == reference)
        {
            return Ok(index);
        }
        let mut matches = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.matches(reference))
            .map(|(i, _)| i);
        match (matches.next(), matches.next()) {
            (Some(index), None) => Ok(index),
            (Some(_), Some(_)) => Err(StratumError::Config {
                message: format!("image reference {reference} is ambiguous"),
            }),
            (None, _) => Err(StratumError::NotFound {
                kind: "image",
                id: reference.to_owned(),
            }),
        }
    }

    fn write_entries(&self, entries: &[ImageEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let dir = self.catalog_path.parent().unwrap_or_else(|| Path::new("."));
        let mut staged = NamedTempFile::new_in(dir).map_err(|e| StratumError::io(dir, e))?;
        staged
            .write_all(json.as_bytes())
            .map_err(|e| StratumError::io(staged.path(), e))?;
        let _ = staged
            .persist(&self.catalog_path)
            .map_err(|e| StratumError::io(&self.catalog_path, e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(id: &str, tag: Option<&str>) -> ImageEntry {
        ImageEntry {
            id: ImageId::new(id),
            tag: tag.map(Into::into),
            recipe: "Stratumfile".into(),
            layers: vec![crate::hash::hash_bytes(id.as_bytes())],
            size_bytes: 1024,
            created_at: "2026-01-01T00:00:00Z".into(),
            config: RuntimeConfig::default(),
        }
    }

    #[test]
    fn catalog_empty_on_first_open() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let catalog = ImageCatalog::open(dir.path()).expect("open failed");
        assert!(catalog.list().expect("list failed").is_empty());
    }

    #[test]
    fn catalog_register_and_list_single_image() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let catalog = ImageCatalog::open(dir.path()).expect("open failed");

        catalog
            .register(make_entry("aaa111", Some("web")))
            .expect("register failed");

        let entries = catalog.list().expect("list failed");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tag.as_deref(), Some("web"));
        assert_eq!(entries[0].size_bytes, 1024);
    }

    #[test]
    fn catalog_register_moves_tag() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let catalog = ImageCatalog::open(dir.path()).expect("open failed");

        catalog.register(make_entry("aaa111", Some("web"))).expect("register");
        catalog.register(make_entry("bbb222", Some("web"))).expect("register");

        assert_eq!(catalog.find("web").expect("find").id.as_str(), "bbb222");
        assert_eq!(catalog.find("aaa111").expect("find").tag, None);
    }

    #[test]
    fn catalog_register_same_id_replaces() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let catalog = ImageCatalog::open(dir.path()).expect("open failed");

        catalog.register(make_entry("aaa111", None)).expect("register");
        catalog.register(make_entry("aaa111", Some("v2"))).expect("register");

        let entries = catalog.list().expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].tag.as_deref(), Some("v2"));
    }

    #[test]
    fn catalog_find_by_prefix() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let catalog = ImageCatalog::open(dir.path()).expect("open failed");

        catalog.register(make_entry("abc123", None)).expect("register");
        catalog.register(make_entry("abd456", None)).expect("register");

        assert_eq!(catalog.find("abc").expect("find").id.as_str(), "abc123");
        assert!(matches!(catalog.find("ab"), Err(StratumError::Config { .. })));
        assert!(matches!(catalog.find("zzz"), Err(StratumError::NotFound { .. })));
    }

    #[test]
    fn catalog_remove_existing_image() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let catalog = ImageCatalog::open(dir.path()).expect("open failed");

        catalog
            .register(make_entry("img-1", Some("alpine")))
            .expect("register failed");
        let removed = catalog.remove("alpine").expect("remove failed");

        assert_eq!(removed.id.as_str(), "img-1");
        assert!(catalog.list().expect("list failed").is_empty());
    }

    #[test]
    fn catalog_remove_nonexistent_returns_error() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let catalog = ImageCatalog::open(dir.path()).expect("open failed");
        assert!(catalog.remove("nonexistent").is_err());
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let ts = timestamp_now();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok(), "{ts}");
    }
}
