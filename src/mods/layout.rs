//! Install layout inference
//!
//! Decides which directory of an extracted archive is the installable unit.
//! Up to two levels of single-directory wrapping are flattened, so both
//! `Mod/<payload>` and `Outer/Mod/<payload>` install as `Mod`. Anything
//! with mixed top-level content installs as-is under the fallback name.

use super::sanitize::clean_entry_path;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Maximum number of single-directory wrappers that get flattened
const MAX_DESCENT: usize = 2;

/// Resolved install unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    /// Folder name the unit should be installed under (not yet sanitized)
    pub folder: String,
    /// Directory whose contents get copied
    pub source: PathBuf,
}

/// Immediate children of a directory, split by kind
#[derive(Debug, Default)]
struct Listing {
    dirs: Vec<String>,
    files: usize,
}

impl Listing {
    fn single_dir(&self) -> Option<&str> {
        match (self.dirs.as_slice(), self.files) {
            ([only], 0) => Some(only.as_str()),
            _ => None,
        }
    }
}

fn list_dir(dir: &Path) -> Result<Listing> {
    let mut listing = Listing::default();
    let entries = fs::read_dir(dir).map_err(|e| Error::io("read directory", dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io("read directory", dir, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| Error::io("inspect", entry.path(), e))?;
        if file_type.is_dir() {
            listing.dirs.push(entry.file_name().to_string_lossy().into_owned());
        } else {
            listing.files += 1;
        }
    }
    Ok(listing)
}

/// Pick the install folder name and copy source for an extracted tree
pub fn resolve_layout(root: &Path, fallback: &str) -> Result<InstallLayout> {
    let mut current = root.to_path_buf();
    let mut descended: Option<String> = None;

    for _ in 0..MAX_DESCENT {
        let listing = list_dir(&current)?;
        let Some(name) = listing.single_dir() else {
            break;
        };
        current.push(name);
        descended = Some(name.to_string());
    }

    let layout = match descended {
        Some(folder) => InstallLayout {
            folder,
            source: current,
        },
        None => InstallLayout {
            folder: fallback.to_string(),
            source: root.to_path_buf(),
        },
    };

    tracing::debug!(
        "Layout for {}: folder '{}' from {}",
        root.display(),
        layout.folder,
        layout.source.display()
    );
    Ok(layout)
}

/// Directory tree reconstructed from archive entry names
#[derive(Debug, Default)]
struct EntryTree {
    children: BTreeMap<String, EntryTree>,
    is_dir: bool,
}

impl EntryTree {
    fn insert(&mut self, segments: &[String], leaf_is_dir: bool) {
        let Some((first, rest)) = segments.split_first() else {
            return;
        };
        let child = self.children.entry(first.clone()).or_default();
        if rest.is_empty() {
            child.is_dir |= leaf_is_dir;
        } else {
            child.is_dir = true;
            child.insert(rest, leaf_is_dir);
        }
    }

    fn single_dir(&self) -> Option<(&String, &EntryTree)> {
        let mut iter = self.children.iter();
        match (iter.next(), iter.next()) {
            (Some((name, child)), None) if child.is_dir => Some((name, child)),
            _ => None,
        }
    }
}

/// Predict the install folder name from archive entry names alone.
///
/// `entries` yields `(name, is_dir)` pairs. Names that would be refused by
/// the extractor are ignored.
pub fn preview_folder<I, S>(entries: I, fallback: &str) -> String
where
    I: IntoIterator<Item = (S, bool)>,
    S: AsRef<str>,
{
    let mut root = EntryTree {
        is_dir: true,
        ..EntryTree::default()
    };

    for (name, is_dir) in entries {
        let name = name.as_ref();
        let Ok(Some(relative)) = clean_entry_path(name) else {
            continue;
        };
        let segments: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        root.insert(&segments, is_dir || name.ends_with('/') || name.ends_with('\\'));
    }

    let mut node = &root;
    let mut descended: Option<&String> = None;
    for _ in 0..MAX_DESCENT {
        let Some((name, child)) = node.single_dir() else {
            break;
        };
        descended = Some(name);
        node = child;
    }

    descended.cloned().unwrap_or_else(|| fallback.to_string())
}

/// Preview the install folder of an archive on disk without extracting it
pub fn preview_archive_folder(archive: &Path, fallback: &str) -> Result<String> {
    let entries = super::archive::list_entries(archive)?;
    Ok(preview_folder(entries, fallback))
}
