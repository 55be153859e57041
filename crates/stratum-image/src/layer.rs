//! Filesystem layer archives.
//!
//! A layer is a tar archive (gzip-compressed when packed here) holding the
//! entries a build step added or modified, plus `.wh.<name>` whiteout
//! markers for the entries it removed. Packing is deterministic: entries are
//! written in sorted order with zeroed timestamps and ownership, so the same
//! filesystem change always produces the same digest.

use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use stratum_common::constants::WHITEOUT_PREFIX;
use stratum_common::error::{Result, StratumError};
use stratum_common::types::Sha256Hash;

use crate::snapshot::{Changes, mode_of};

/// Descriptor of a packed layer archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDiff {
    /// Content digest of the compressed archive.
    pub digest: Sha256Hash,
    /// Size of the compressed archive in bytes.
    pub size_bytes: u64,
    /// Number of archive entries, whiteouts included.
    pub entries: usize,
}

/// Packs `changes` under `rootfs` into a gzip-compressed tar at `out`.
///
/// # Errors
///
/// Returns `StratumError::Config` if a changed entry is named like a
/// whiteout marker, since replaying it would delete its sibling instead.
/// Returns an I/O error if a changed entry cannot be read or the archive
/// cannot be written.
pub fn pack_layer(rootfs: &Path, changes: &Changes, out: &Path) -> Result<LayerDiff> {
    if let Some(rel) = changes.upserted.iter().find(|rel| is_whiteout_name(rel)) {
        return Err(StratumError::Config {
            message: format!(
                "{} uses the reserved {WHITEOUT_PREFIX} prefix and cannot be stored in a layer",
                rel.display()
            ),
        });
    }

    let file = std::fs::File::create(out).map_err(|e| StratumError::io(out, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    let mut entries = 0;

    for rel in &changes.upserted {
        append_entry(&mut builder, rootfs, rel)?;
        entries += 1;
    }
    for rel in &changes.removed {
        let name = rel.file_name().ok_or_else(|| StratumError::Config {
            message: format!("cannot whiteout {}", rel.display()),
        })?;
        let mut marker_name = OsString::from(WHITEOUT_PREFIX);
        marker_name.push(name);
        let marker = rel.with_file_name(marker_name);
        let mut header = base_header(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(0);
        builder
            .append_data(&mut header, &marker, std::io::empty())
            .map_err(|e| StratumError::io(out, e))?;
        entries += 1;
    }

    let encoder = builder.into_inner().map_err(|e| StratumError::io(out, e))?;
    let _ = encoder.finish().map_err(|e| StratumError::io(out, e))?;

    let size_bytes = std::fs::metadata(out)
        .map_err(|e| StratumError::io(out, e))?
        .len();
    let digest = crate::hash::hash_file(out)?;
    tracing::debug!(digest = %digest, size = size_bytes, entries, "packed layer");
    Ok(LayerDiff {
        digest,
        size_bytes,
        entries,
    })
}

fn is_whiteout_name(rel: &Path) -> bool {
    rel.file_name()
        .is_some_and(|name| name.as_encoded_bytes().starts_with(WHITEOUT_PREFIX.as_bytes()))
}

/// Name of the entry a whiteout marker named `name` removes.
#[cfg(unix)]
fn whiteout_target(name: &OsStr) -> Option<OsString> {
    use std::os::unix::ffi::OsStrExt;
    name.as_bytes()
        .strip_prefix(WHITEOUT_PREFIX.as_bytes())
        .map(|rest| OsStr::from_bytes(rest).to_owned())
}

#[cfg(not(unix))]
fn whiteout_target(name: &OsStr) -> Option<OsString> {
    name.to_str()?.strip_prefix(WHITEOUT_PREFIX).map(OsString::from)
}

fn base_header(mode: u32) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn append_entry<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    rootfs: &Path,
    rel: &Path,
) -> Result<()> {
    let path = rootfs.join(rel);
    let meta = std::fs::symlink_metadata(&path).map_err(|e| StratumError::io(&path, e))?;
    let mut header = base_header(mode_of(&meta));
    let file_type = meta.file_type();

    let written = if file_type.is_symlink() {
        let target = std::fs::read_link(&path).map_err(|e| StratumError::io(&path, e))?;
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, rel, target)
    } else if file_type.is_dir() {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        builder.append_data(&mut header, rel, std::io::empty())
    } else {
        let file = std::fs::File::open(&path).map_err(|e| StratumError::io(&path, e))?;
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(meta.len());
        builder.append_data(&mut header, rel, file)
    };
    written.map_err(|e| StratumError::io(&path, e))
}

/// Applies a layer archive on top of `rootfs`.
///
/// Accepts plain and gzip-compressed tar archives (detected by magic
/// bytes). Whiteout markers delete the named entry instead of being
/// extracted. Returns the number of entries applied.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or an entry cannot be
/// written.
pub fn apply_layer(archive_path: &Path, rootfs: &Path) -> Result<usize> {
    tracing::debug!(
        archive = %archive_path.display(),
        target = %rootfs.display(),
        "applying layer"
    );
    let io_err = |e| StratumError::io(archive_path, e);

    std::fs::create_dir_all(rootfs).map_err(|e| StratumError::io(rootfs, e))?;
    let file = std::fs::File::open(archive_path).map_err(io_err)?;
    let mut reader = BufReader::new(file);
    let is_gzip = reader.fill_buf().map_err(io_err)?.starts_with(&[0x1f, 0x8b]);
    let reader: Box<dyn Read> = if is_gzip {
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut applied = 0;
    for entry in archive.entries().map_err(io_err)? {
        let mut entry = entry.map_err(io_err)?;
        let rel = entry.path().map_err(io_err)?.into_owned();
        if !is_plain_relative(&rel) {
            return Err(StratumError::Config {
                message: format!("layer entry escapes the root: {}", rel.display()),
            });
        }
        let target = rootfs.join(&rel);

        if let Some(name) = rel.file_name().and_then(whiteout_target) {
            if name.is_empty() || name == "." || name == ".." {
                return Err(StratumError::Config {
                    message: format!("invalid whiteout entry: {}", rel.display()),
                });
            }
            remove_path(&target.with_file_name(name))?;
        } else {
            let is_dir = entry.header().entry_type().is_dir();
            if let Ok(existing) = std::fs::symlink_metadata(&target) {
                if existing.is_dir() && !is_dir {
                    remove_path(&target)?;
                } else if !existing.is_dir() {
                    std::fs::remove_file(&target).map_err(|e| StratumError::io(&target, e))?;
                }
            }
            let _ = entry.unpack_in(rootfs).map_err(|e| StratumError::io(&target, e))?;
        }
        applied += 1;
    }

    tracing::debug!(entries = applied, "layer applied");
    Ok(applied)
}

fn is_plain_relative(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn remove_path(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            std::fs::remove_dir_all(path).map_err(|e| StratumError::io(path, e))
        }
        Ok(_) => std::fs::remove_file(path).map_err(|e| StratumError::io(path, e)),
        Err(_) => Ok(()),
    }
}
