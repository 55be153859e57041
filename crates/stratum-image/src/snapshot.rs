//! Filesystem snapshots and change detection.
//!
//! A snapshot records the metadata of every entry under a root directory.
//! Diffing two snapshots taken around a build step yields the delta that
//! becomes the step's layer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use stratum_common::error::{Result, StratumError};

/// Kind of a filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link with its target.
    Symlink(PathBuf),
}

/// Metadata recorded for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta {
    /// Entry kind.
    pub kind: EntryKind,
    /// Size in bytes (zero for directories).
    pub size: u64,
    /// Permission bits.
    pub mode: u32,
    /// Modification time in nanoseconds since the epoch.
    pub mtime_ns: u128,
}

/// Paths added, modified, or removed between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changes {
    /// Added or modified paths, sorted so parents precede children.
    pub upserted: Vec<PathBuf>,
    /// Removed paths whose parent still exists, sorted.
    pub removed: Vec<PathBuf>,
}

impl Changes {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.removed.is_empty()
    }
}

/// Metadata of every entry under a root, keyed by relative path.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: BTreeMap<PathBuf, EntryMeta>,
}

impl Snapshot {
    /// Walks `root` and records every entry below it.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or entry cannot be read.
    pub fn capture(root: &Path) -> Result<Self> {
        let mut entries = BTreeMap::new();
        walk(root, root, &mut entries)?;
        tracing::debug!(root = %root.display(), entries = entries.len(), "captured snapshot");
        Ok(Self { entries })
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Computes what changed from `self` (before) to `after`.
    #[must_use]
    pub fn diff(&self, after: &Self) -> Changes {
        let upserted = after
            .entries
            .iter()
            .filter(|(path, meta)| self.entries.get(*path) != Some(*meta))
            .map(|(path, _)| path.clone())
            .collect();

        let mut removed: Vec<PathBuf> = Vec::new();
        for path in self.entries.keys() {
            if after.entries.contains_key(path) {
                continue;
            }
            // BTreeMap order visits a removed directory before its children.
            if removed.last().is_some_and(|dir| path.starts_with(dir)) {
                continue;
            }
            removed.push(path.clone());
        }

        Changes { upserted, removed }
    }
}

fn walk(root: &Path, dir: &Path, entries: &mut BTreeMap<PathBuf, EntryMeta>) -> Result<()> {
    let read_dir = std::fs::read_dir(dir).map_err(|e| StratumError::io(dir, e))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| StratumError::io(dir, e))?;
        let path = entry.path();
        let meta = std::fs::symlink_metadata(&path).map_err(|e| StratumError::io(&path, e))?;
        let rel = path
            .strip_prefix(root)
            .map_err(|_| StratumError::Config {
                message: format!("{} escapes {}", path.display(), root.display()),
            })?
            .to_path_buf();

        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            let target = std::fs::read_link(&path).map_err(|e| StratumError::io(&path, e))?;
            EntryKind::Symlink(target)
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        let is_dir = kind == EntryKind::Dir;

        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());

        let _ = entries.insert(
            rel,
            EntryMeta {
                kind,
                size: if is_dir { 0 } else { meta.len() },
                mode: mode_of(&meta),
                mtime_ns,
            },
        );

        if is_dir {
            walk(root, &path, entries)?;
        }
    }
    Ok(())
}

/// Permission bits of an entry.
#[cfg(unix)]
#[must_use]
pub fn mode_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

/// Permission bits of an entry.
#[cfg(not(unix))]
#[must_use]
pub fn mode_of(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_records_nested_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("a/b")).expect("mkdir");
        std::fs::write(dir.path().join("a/b/file.txt"), b"x").expect("write");
        let snap = Snapshot::capture(dir.path()).expect("capture");
        assert_eq!(snap.len(), 3);
    }

    #[test]
    fn diff_reports_added_and_modified_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("keep.txt"), b"same").expect("write");
        std::fs::write(dir.path().join("edit.txt"), b"v1").expect("write");
        let before = Snapshot::capture(dir.path()).expect("capture");

        std::fs::write(dir.path().join("edit.txt"), b"version two").expect("write");
        std::fs::write(dir.path().join("new.txt"), b"new").expect("write");
        let after = Snapshot::capture(dir.path()).expect("capture");

        let changes = before.diff(&after);
        assert_eq!(
            changes.upserted,
            vec![PathBuf::from("edit.txt"), PathBuf::from("new.txt")]
        );
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn diff_collapses_removed_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("gone/deep")).expect("mkdir");
        std::fs::write(dir.path().join("gone/deep/f"), b"x").expect("write");
        std::fs::write(dir.path().join("solo.txt"), b"x").expect("write");
        let before = Snapshot::capture(dir.path()).expect("capture");

        std::fs::remove_dir_all(dir.path().join("gone")).expect("rm");
        std::fs::remove_file(dir.path().join("solo.txt")).expect("rm");
        let after = Snapshot::capture(dir.path()).expect("capture");

        let changes = before.diff(&after);
        assert_eq!(
            changes.removed,
            vec![PathBuf::from("gone"), PathBuf::from("solo.txt")]
        );
    }

    #[test]
    fn diff_of_identical_snapshots_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("f"), b"x").expect("write");
        let a = Snapshot::capture(dir.path()).expect("capture");
        let b = Snapshot::capture(dir.path()).expect("capture");
        assert!(a.diff(&b).is_empty());
    }
}
