//! Path sanitization for folder names and archive entries
//!
//! Every directory write in the deployment engine goes through
//! [`safe_join`]; archive entries go through [`clean_entry_path`].

use crate::error::{Error, Result};
use regex_lite::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Reasons an archive entry name is refused
fn entry_violation(raw: &str) -> Option<&'static str> {
    if raw.starts_with('/') || raw.starts_with('\\') || has_drive_prefix(raw) {
        return Some("absolute path");
    }
    if raw.chars().any(|c| c.is_control()) {
        return Some("control character in name");
    }
    if raw.contains(':') {
        return Some("':' in name");
    }
    if raw.replace('\\', "/").split('/').any(|seg| seg == "..") {
        return Some("parent directory traversal");
    }
    None
}

fn has_drive_prefix(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Normalize an archive entry name into a relative path with no
/// traversal, preserving its original structure.
///
/// Returns `Ok(None)` for names that clean to nothing (e.g. `./`).
pub fn clean_entry_path(raw: &str) -> std::result::Result<Option<PathBuf>, &'static str> {
    if let Some(reason) = entry_violation(raw) {
        return Err(reason);
    }

    let normalized = raw.replace('\\', "/");
    let mut cleaned = PathBuf::new();
    for segment in normalized.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        cleaned.push(segment);
    }

    if cleaned.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(cleaned))
    }
}

fn non_alnum() -> Option<&'static Regex> {
    static NON_ALNUM: OnceLock<Option<Regex>> = OnceLock::new();
    NON_ALNUM
        .get_or_init(|| Regex::new(r"[^a-z0-9]+").ok())
        .as_ref()
}

/// Lowercase alphanumerics, every other run collapsed to `-`, no leading or
/// trailing `-`.
pub fn slugify(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let dashed = match non_alnum() {
        Some(re) => re.replace_all(&lower, "-").into_owned(),
        None => lower
            .chars()
            .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
            .collect(),
    };
    dashed.trim_matches('-').to_string()
}

/// Joins a folder name to the id token that disambiguates it. Slugs never
/// contain `_`, so a joined name cannot equal any plain folder slug.
pub const COLLISION_SEPARATOR: &str = "__";

/// A folder name this tool produced: one or more slugs joined by
/// [`COLLISION_SEPARATOR`].
pub fn is_managed_folder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split(COLLISION_SEPARATOR)
            .all(|part| !part.is_empty() && slugify(part) == part)
}

/// Derive a mod id from a URL or file name: basename without extension,
/// slugified, `mod` when nothing usable is left.
pub fn slug_from_url(raw: &str) -> String {
    let path = match url::Url::parse(raw) {
        Ok(parsed) if parsed.scheme().len() > 1 => parsed.path().to_string(),
        _ => raw.replace('\\', "/"),
    };

    let base = path.rsplit('/').find(|s| !s.is_empty()).unwrap_or_default();
    let stem = match base.rfind('.') {
        Some(idx) if idx > 0 => &base[..idx],
        _ => base,
    };

    let slug = slugify(stem);
    if slug.is_empty() {
        "mod".to_string()
    } else {
        slug
    }
}

fn folder_candidate(raw: &str) -> std::result::Result<String, &'static str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("empty name");
    }
    if trimmed.starts_with('/') || trimmed.starts_with('\\') || has_drive_prefix(trimmed) {
        return Err("absolute path");
    }

    let normalized = trimmed.replace('\\', "/");
    let segments: Vec<&str> = normalized
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    if segments.iter().any(|s| *s == "..") {
        return Err("parent directory traversal");
    }
    let last = match segments.last() {
        Some(last) => *last,
        None => return Err("empty name"),
    };

    if last.chars().any(|c| c.is_control()) {
        return Err("control character in name");
    }
    if last.contains(':') {
        return Err("':' in name");
    }
    if is_managed_folder_name(last) {
        return Ok(last.to_string());
    }

    let slug = slugify(last);
    if slug.is_empty() {
        return Err("no portable characters left");
    }
    Ok(slug)
}

/// Reduce `name` to a single filesystem-portable path segment, falling
/// back to `fallback` when `name` is unusable.
pub fn sanitize_folder_name(name: &str, fallback: &str) -> Result<String> {
    match folder_candidate(name) {
        Ok(slug) => Ok(slug),
        Err(reason) => {
            tracing::debug!("Folder name '{}' rejected ({}), trying '{}'", name, reason, fallback);
            folder_candidate(fallback).map_err(|_| Error::invalid_path(name, reason))
        }
    }
}

/// Join a single segment under `base`, refusing anything that could land
/// outside of it.
pub fn safe_join(base: &Path, segment: &str) -> Result<PathBuf> {
    let seg = segment.trim();
    if seg.is_empty() {
        return Err(Error::invalid_path(segment, "empty path segment"));
    }
    if seg.contains('/') || seg.contains('\\') {
        return Err(Error::invalid_path(segment, "path separator in segment"));
    }
    if seg == "." || seg.contains("..") {
        return Err(Error::invalid_path(segment, "traversal in segment"));
    }
    if has_drive_prefix(seg) || seg.chars().any(|c| c.is_control()) {
        return Err(Error::invalid_path(segment, "not a portable segment"));
    }

    let joined = base.join(seg);
    match joined.strip_prefix(base) {
        Ok(rel) if rel == Path::new(seg) => Ok(joined),
        _ => Err(Error::invalid_path(segment, "resolves outside base directory")),
    }
}

/// Bounded, deterministic token derived from a mod id.
pub fn id_token(mod_id: &str) -> String {
    const MAX_LEN: usize = 32;
    const KEEP: usize = 23;

    let slug = slugify(mod_id);
    let slug = if slug.is_empty() { "mod".to_string() } else { slug };
    if slug.len() <= MAX_LEN {
        return slug;
    }

    let digest = Sha256::digest(mod_id.as_bytes());
    let hex = format!("{:x}", digest);
    let head = slug[..KEEP].trim_end_matches('-');
    format!("{}-{}", head, &hex[..8])
}
