//! Content-addressed layer store.
//!
//! Layout under the store root:
//!
//! ```text
//! blobs/sha256/<digest>   packed layer archives
//! index/<key>.json        one cache entry per layer key
//! tmp/                    staging area for atomic writes
//! ```
//!
//! Every write lands in `tmp/` under a unique name and is renamed into
//! place, so concurrent builders never observe a partial file and two
//! writers of the same key simply race to install identical content. A
//! staged file that is never installed is deleted when dropped.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stratum_common::error::{Result, StratumError};
use stratum_common::types::Sha256Hash;
use tempfile::NamedTempFile;

use crate::hash;
use crate::layer::LayerDiff;

const BLOBS_DIR: &str = "blobs/sha256";
const INDEX_DIR: &str = "index";
const TMP_DIR: &str = "tmp";

/// Index record for one cached layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key of the layer.
    pub key: Sha256Hash,
    /// Key of the layer below, `None` for the first layer.
    pub parent: Option<Sha256Hash>,
    /// Recipe line that produced the layer.
    pub created_by: String,
    /// Filesystem delta, `None` when the step changed no files.
    pub diff: Option<LayerDiff>,
}

/// Outcome of checking every entry in the store.
#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Number of entries checked.
    pub checked: usize,
    /// Entries that failed, with the reason.
    pub corrupt: Vec<(Sha256Hash, String)>,
}

impl VerifyReport {
    /// Whether every entry verified.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.corrupt.is_empty()
    }
}

/// On-disk store of layer blobs and their index entries.
#[derive(Debug, Clone)]
pub struct LayerStore {
    root: PathBuf,
}

impl LayerStore {
    /// Opens or initializes the store at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory layout cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for dir in [BLOBS_DIR, INDEX_DIR, TMP_DIR] {
            let path = root.join(dir);
            std::fs::create_dir_all(&path).map_err(|e| StratumError::io(&path, e))?;
        }
        tracing::debug!(path = %root.display(), "opened layer store");
        Ok(Self { root })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the blob with the given digest.
    #[must_use]
    pub fn blob_path(&self, digest: &Sha256Hash) -> PathBuf {
        self.root.join(BLOBS_DIR).join(digest.as_hex())
    }

    fn entry_path(&self, key: &Sha256Hash) -> PathBuf {
        self.root.join(INDEX_DIR).join(format!("{}.json", key.as_hex()))
    }

    /// Creates a uniquely named file in the staging area.
    ///
    /// The file is removed when dropped unless it is installed with
    /// [`LayerStore::put_blob`].
    ///
    /// # Errors
    ///
    /// Returns an error if the staging directory is not writable.
    pub fn staging_file(&self) -> Result<NamedTempFile> {
        let dir = self.root.join(TMP_DIR);
        NamedTempFile::new_in(&dir).map_err(|e| StratumError::io(&dir, e))
    }

    /// Whether an index entry exists for `key`. Does not verify the blob.
    #[must_use]
    pub fn contains(&self, key: &Sha256Hash) -> bool {
        self.entry_path(key).is_file()
    }

    /// Looks up a cached layer and verifies its blob.
    ///
    /// # Errors
    ///
    /// Returns `StratumError::HashMismatch` when the blob is missing or its
    /// digest differs from the one recorded in the entry.
    pub fn lookup(&self, key: &Sha256Hash) -> Result<Option<CacheEntry>> {
        let Some(entry) = self.read_entry(key)? else {
            tracing::debug!(key = %key.short(), "cache miss");
            return Ok(None);
        };
        if &entry.key != key {
            return Err(StratumError::HashMismatch {
                resource: self.entry_path(key).display().to_string(),
                expected: key.to_string(),
                actual: entry.key.to_string(),
            });
        }
        if let Some(diff) = &entry.diff {
            let blob = self.blob_path(&diff.digest);
            if !blob.is_file() {
                return Err(StratumError::HashMismatch {
                    resource: blob.display().to_string(),
                    expected: diff.digest.to_string(),
                    actual: "missing".into(),
                });
            }
            hash::validate_hash(&blob, &diff.digest)?;
        }
        tracing::debug!(key = %key.short(), "cache hit");
        Ok(Some(entry))
    }

    fn read_entry(&self, key: &Sha256Hash) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(key);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StratumError::io(&path, e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Moves a staged archive into the blob directory under its digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails.
    pub fn put_blob(&self, staged: NamedTempFile, diff: &LayerDiff) -> Result<PathBuf> {
        let target = self.blob_path(&diff.digest);
        let _ = staged
            .persist(&target)
            .map_err(|e| StratumError::io(&target, e.error))?;
        tracing::debug!(digest = %diff.digest.short(), size = diff.size_bytes, "stored blob");
        Ok(target)
    }

    /// Writes the index entry for a layer. Store the blob first.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be serialized or written.
    pub fn record(&self, entry: &CacheEntry) -> Result<()> {
        let json = serde_json::to_vec_pretty(entry)?;
        let mut staged = self.staging_file()?;
        staged
            .write_all(&json)
            .map_err(|e| StratumError::io(staged.path(), e))?;
        let target = self.entry_path(&entry.key);
        let _ = staged
            .persist(&target)
            .map_err(|e| StratumError::io(&target, e.error))?;
        tracing::debug!(key = %entry.key.short(), "recorded cache entry");
        Ok(())
    }

    /// Lists every index entry, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be read or an entry is malformed.
    pub fn entries(&self) -> Result<Vec<CacheEntry>> {
        let dir = self.root.join(INDEX_DIR);
        let mut entries = Vec::new();
        for item in std::fs::read_dir(&dir).map_err(|e| StratumError::io(&dir, e))? {
            let path = item.map_err(|e| StratumError::io(&dir, e))?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let bytes = std::fs::read(&path).map_err(|e| StratumError::io(&path, e))?;
            entries.push(serde_json::from_slice::<CacheEntry>(&bytes)?);
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Checks every entry's blob against its recorded digest.
    ///
    /// # Errors
    ///
    /// Returns an error only if the index itself cannot be read.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        for entry in self.entries()? {
            report.checked += 1;
            if let Err(e) = self.lookup(&entry.key) {
                tracing::warn!(key = %entry.key.short(), error = %e, "corrupt cache entry");
                report.corrupt.push((entry.key, e.to_string()));
            }
        }
        Ok(report)
    }
}
