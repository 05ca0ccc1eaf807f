//! Staged, ownership-tracked deployment into the game's MODS directory
//!
//! A deployed folder always carries a [`MARKER_FILE`] naming the mod and
//! profile that created it. Folders without a matching marker are never
//! overwritten or removed.
//!
//! The swap relies on `rename` being atomic, so the staged copy and backup
//! are created as hidden siblings inside the target directory itself. The
//! target directory must therefore live on a single filesystem.

use super::sanitize::{safe_join, sanitize_folder_name};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Tool name used in ownership tags
pub const TOOL_NAME: &str = "nmsmods";

/// Marker file written into every deployed folder
pub const MARKER_FILE: &str = ".nmsmods.managed.json";

/// Contents of [`MARKER_FILE`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipMarker {
    pub tag: String,
    pub mod_id: String,
    pub profile: String,
    pub deployed_at: String,
    pub tool: String,
}

impl OwnershipMarker {
    pub fn new(mod_id: &str, profile: &str) -> Self {
        Self {
            tag: ownership_tag(mod_id, profile),
            mod_id: mod_id.to_string(),
            profile: profile.to_string(),
            deployed_at: crate::state::timestamp(),
            tool: TOOL_NAME.to_string(),
        }
    }
}

/// `"<tool>:<mod_id>:<profile>"`
pub fn ownership_tag(mod_id: &str, profile: &str) -> String {
    format!("{}:{}:{}", TOOL_NAME, mod_id, profile)
}

/// Read the marker inside `dir`. Missing or unparsable markers read as
/// `None`, which callers treat as unmanaged.
pub fn read_marker(dir: &Path) -> Option<OwnershipMarker> {
    let raw = fs::read(dir.join(MARKER_FILE)).ok()?;
    match serde_json::from_slice(&raw) {
        Ok(marker) => Some(marker),
        Err(e) => {
            tracing::debug!("Ignoring unreadable marker in {}: {}", dir.display(), e);
            None
        }
    }
}

fn write_marker(dir: &Path, marker: &OwnershipMarker) -> Result<()> {
    let path = dir.join(MARKER_FILE);
    let json = serde_json::to_vec_pretty(marker)
        .map_err(|e| Error::io("serialize marker for", &path, e.into()))?;
    fs::write(&path, json).map_err(|e| Error::io("write marker", &path, e))
}

/// Fail unless `dir` bears the marker for `(mod_id, profile)`.
fn ensure_owned(dir: &Path, mod_id: &str, profile: &str) -> Result<()> {
    let expected = ownership_tag(mod_id, profile);
    let found = read_marker(dir).map(|m| m.tag);
    if found.as_deref() == Some(expected.as_str()) {
        return Ok(());
    }
    Err(Error::ForeignOrUnmanaged {
        path: dir.to_path_buf(),
        expected_tag: expected,
        found_tag: found,
    })
}

/// Recursively copy the contents of `src` into `dst` (created if absent).
/// Symlinks are skipped. Returns the number of files copied.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<usize> {
    fs::create_dir_all(dst).map_err(|e| Error::io("create directory", dst, e))?;
    let mut files = 0;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            Error::io("walk", path, io::Error::from(e))
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let out = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&out).map_err(|e| Error::io("create directory", &out, e))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &out).map_err(|e| Error::io("copy", entry.path(), e))?;
            files += 1;
        } else {
            tracing::debug!("Skipping non-regular entry {}", entry.path().display());
        }
    }

    Ok(files)
}

pub(crate) fn remove_dir_quietly(path: &Path) {
    if let Err(e) = fs::remove_dir_all(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!("Failed to clean up {}: {}", path.display(), e);
        }
    }
}

fn resolve_dest(target_dir: &Path, folder: &str, mod_id: &str) -> Result<(String, PathBuf)> {
    let folder = sanitize_folder_name(folder, mod_id)?;
    let dest = safe_join(target_dir, &folder)?;
    Ok((folder, dest))
}

/// Copy `store` into `target_dir/<folder>` and tag it for `(mod_id, profile)`.
///
/// The copy is staged in a hidden sibling and renamed into place. An
/// existing folder is only replaced when it already belongs to the same
/// `(mod_id, profile)`; it is kept as a backup until the new copy is in
/// place and restored if the final rename fails.
pub fn deploy(
    store: &Path,
    target_dir: &Path,
    folder: &str,
    mod_id: &str,
    profile: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(target_dir)
        .map_err(|e| Error::io("create target directory", target_dir, e))?;
    let target_dir = fs::canonicalize(target_dir)
        .map_err(|e| Error::io("resolve target directory", target_dir, e))?;
    let (folder, dest) = resolve_dest(&target_dir, folder, mod_id)?;

    let existing = match fs::symlink_metadata(&dest) {
        Ok(meta) => Some(meta),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(Error::io("inspect", &dest, e)),
    };
    if let Some(meta) = &existing {
        if !meta.is_dir() {
            return Err(Error::ForeignOrUnmanaged {
                path: dest,
                expected_tag: ownership_tag(mod_id, profile),
                found_tag: None,
            });
        }
        ensure_owned(&dest, mod_id, profile)?;
    }

    if !store.is_dir() {
        return Err(Error::NotADirectory {
            path: store.to_path_buf(),
        });
    }

    let stage = target_dir.join(format!(".{}.{}.tmp-{}", folder, TOOL_NAME, uuid::Uuid::new_v4()));
    let staged = copy_dir(store, &stage)
        .and_then(|files| write_marker(&stage, &OwnershipMarker::new(mod_id, profile)).map(|_| files));
    let files = match staged {
        Ok(files) => files,
        Err(e) => {
            remove_dir_quietly(&stage);
            return Err(e);
        }
    };

    let backup = existing.map(|_| {
        target_dir.join(format!(".{}.{}.bak-{}", folder, TOOL_NAME, uuid::Uuid::new_v4()))
    });
    swap_into_place(&stage, &dest, backup, |from, to| fs::rename(from, to))?;

    tracing::info!(
        "Deployed {} ({} files) as {} for profile '{}'",
        mod_id,
        files,
        dest.display(),
        profile
    );
    Ok(dest)
}

/// Move `stage` to `dest`. When `backup` is set, the current `dest` is moved
/// there first and put back if the final move fails. `stage` never survives
/// a failure.
fn swap_into_place<R>(stage: &Path, dest: &Path, backup: Option<PathBuf>, rename: R) -> Result<()>
where
    R: Fn(&Path, &Path) -> io::Result<()>,
{
    if let Some(backup) = &backup {
        if let Err(e) = rename(dest, backup) {
            remove_dir_quietly(stage);
            return Err(Error::io("move aside", dest, e));
        }
    }

    if let Err(source) = rename(stage, dest) {
        remove_dir_quietly(stage);
        return match backup {
            Some(backup) => match rename(&backup, dest) {
                Ok(()) => Err(Error::io("move staged copy into", dest, source)),
                Err(rollback) => Err(Error::RollbackFailed {
                    dest: dest.to_path_buf(),
                    backup,
                    source,
                    rollback,
                }),
            },
            None => Err(Error::io("move staged copy into", dest, source)),
        };
    }

    if let Some(backup) = backup {
        remove_dir_quietly(&backup);
    }
    Ok(())
}

/// Remove `target_dir/<folder>` if it belongs to `(mod_id, profile)`.
/// A missing folder is not an error.
pub fn undeploy(target_dir: &Path, folder: &str, mod_id: &str, profile: &str) -> Result<()> {
    let (_, dest) = resolve_dest(target_dir, folder, mod_id)?;

    let meta = match fs::symlink_metadata(&dest) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("{} already absent", dest.display());
            return Ok(());
        }
        Err(e) => return Err(Error::io("inspect", &dest, e)),
    };
    if !meta.is_dir() {
        return Err(Error::NotADirectory { path: dest });
    }
    ensure_owned(&dest, mod_id, profile)?;

    fs::remove_dir_all(&dest).map_err(|e| Error::io("remove", &dest, e))?;
    tracing::info!("Undeployed {} from {}", mod_id, dest.display());
    Ok(())
}

/// Undeploy a folder by its recorded absolute location.
pub fn undeploy_path(deployed: &Path, mod_id: &str, profile: &str) -> Result<()> {
    let target_dir = deployed.parent();
    let folder = deployed.file_name().and_then(|n| n.to_str());
    match (target_dir, folder) {
        (Some(target_dir), Some(folder)) => undeploy(target_dir, folder, mod_id, profile),
        _ => Err(Error::invalid_path(
            deployed.display().to_string(),
            "not a deployed folder location",
        )),
    }
}
