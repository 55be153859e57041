//! SHA-256 content hashing and verification.
//!
//! Used for layer blob digests, cache keys, and digests of `COPY` sources.

use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use stratum_common::error::{Result, StratumError};
use stratum_common::types::Sha256Hash;

/// Incremental SHA-256 hasher with length-prefixed framing.
///
/// Every field is written with its length so that adjacent fields can
/// never be confused (`"ab" + "c"` hashes differently from `"a" + "bc"`).
#[derive(Debug, Clone, Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    /// Creates an empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one length-prefixed field.
    pub fn field(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update((bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
        self
    }

    /// Finishes hashing.
    #[must_use]
    pub fn finish(self) -> Sha256Hash {
        Sha256Hash::from_digest(&self.inner.finalize())
    }
}

/// Computes the SHA-256 hash of a byte slice.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> Sha256Hash {
    Sha256Hash::from_digest(&Sha256::digest(bytes))
}

/// Computes the SHA-256 hash of a file, streaming its contents.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Sha256Hash> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let mut file = std::fs::File::open(path).map_err(|e| StratumError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| StratumError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Sha256Hash::from_digest(&hasher.finalize()))
}

/// Validates that a file matches the expected SHA-256 hash.
///
/// # Errors
///
/// Returns `StratumError::HashMismatch` if the hashes do not match.
pub fn validate_hash(path: &Path, expected: &Sha256Hash) -> Result<()> {
    tracing::debug!(path = %path.display(), "validating SHA-256 hash");
    let actual = hash_file(path)?;
    if &actual != expected {
        return Err(StratumError::HashMismatch {
            resource: path.display().to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Computes a digest over a file or directory tree.
///
/// Covers relative paths, entry kinds, the executable bit, symlink targets,
/// and file contents, visiting entries in sorted order. Timestamps and
/// ownership are ignored so that a fresh checkout hashes like the original.
///
/// # Errors
///
/// Returns an error if any entry cannot be read.
pub fn hash_tree(root: &Path) -> Result<Sha256Hash> {
    let mut hasher = ContentHasher::new();
    hash_entry(root, Path::new(""), &mut hasher)?;
    Ok(hasher.finish())
}

fn hash_entry(path: &Path, rel: &Path, hasher: &mut ContentHasher) -> Result<()> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| StratumError::io(path, e))?;
    let _ = hasher.field(rel.as_os_str().as_encoded_bytes());

    if meta.file_type().is_symlink() {
        let target = std::fs::read_link(path).map_err(|e| StratumError::io(path, e))?;
        let _ = hasher
            .field(b"symlink")
            .field(target.as_os_str().as_encoded_bytes());
    } else if meta.is_dir() {
        let _ = hasher.field(b"dir");
        let mut children: Vec<_> = std::fs::read_dir(path)
            .map_err(|e| StratumError::io(path, e))?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<std::io::Result<_>>()
            .map_err(|e| StratumError::io(path, e))?;
        children.sort();
        for name in children {
            hash_entry(&path.join(&name), &rel.join(&name), hasher)?;
        }
    } else {
        let exec = if is_executable(&meta) { b"x" } else { b"-" };
        let digest = hash_file(path)?;
        let _ = hasher
            .field(b"file")
            .field(exec)
            .field(digest.as_hex().as_bytes());
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
const fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn hash_bytes_of_empty_input_is_well_known() {
        assert_eq!(hash_bytes(b"").as_hex(), EMPTY_SHA256);
    }

    #[test]
    fn hash_file_matches_hash_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"hello layer").expect("write");
        assert_eq!(hash_file(&path).expect("hash"), hash_bytes(b"hello layer"));
    }

    #[test]
    fn validate_hash_detects_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"original").expect("write");
        let expected = hash_bytes(b"original");
        validate_hash(&path, &expected).expect("should match");

        std::fs::write(&path, b"tampered").expect("write");
        let err = validate_hash(&path, &expected).expect_err("should mismatch");
        assert!(matches!(err, StratumError::HashMismatch { .. }));
    }

    #[test]
    fn content_hasher_frames_fields() {
        let mut a = ContentHasher::new();
        let _ = a.field(b"ab").field(b"c");
        let mut b = ContentHasher::new();
        let _ = b.field(b"a").field(b"bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn hash_tree_ignores_timestamps_but_not_content() {
        let one = tempfile::tempdir().expect("tempdir");
        let two = tempfile::tempdir().expect("tempdir");
        for root in [one.path(), two.path()] {
            std::fs::create_dir_all(root.join("pkg")).expect("mkdir");
            std::fs::write(root.join("pkg/a.txt"), b"a").expect("write");
            std::fs::write(root.join("b.txt"), b"b").expect("write");
        }
        assert_eq!(
            hash_tree(one.path()).expect("hash"),
            hash_tree(two.path()).expect("hash")
        );

        std::fs::write(two.path().join("pkg/a.txt"), b"changed").expect("write");
        assert_ne!(
            hash_tree(one.path()).expect("hash"),
            hash_tree(two.path()).expect("hash")
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn hash_tree_distinguishes_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let one = tempfile::tempdir().expect("tempdir");
        let two = tempfile::tempdir().expect("tempdir");
        std::fs::write(one.path().join(OsStr::from_bytes(b"name\xff")), b"x").expect("write");
        std::fs::write(two.path().join(OsStr::from_bytes(b"name\xfe")), b"x").expect("write");
        assert_ne!(
            hash_tree(one.path()).expect("hash"),
            hash_tree(two.path()).expect("hash")
        );
    }

    #[test]
    fn hash_tree_of_missing_path_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(hash_tree(&dir.path().join("missing")).is_err());
    }
}
