//! Error taxonomy for the deployment engine
//!
//! Every variant names the path it refused, and where it applies the quota
//! or ownership tag that was violated, so a user can tell a malicious
//! archive apart from a foreign folder or a second running instance.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Which extraction quota was exceeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quota {
    EntryCount,
    EntrySize,
    TotalSize,
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Quota::EntryCount => "entry count",
            Quota::EntrySize => "per-entry size",
            Quota::TotalSize => "total size",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid path '{input}': {reason}")]
    InvalidPath { input: String, reason: &'static str },

    #[error("unsafe archive entry '{entry}' in {}: {reason}", .archive.display())]
    UnsafeEntry {
        archive: PathBuf,
        entry: String,
        reason: &'static str,
    },

    #[error(
        "archive {} exceeds the {quota} quota at '{entry}' (limit {limit}, got {actual})",
        .archive.display()
    )]
    QuotaExceeded {
        archive: PathBuf,
        entry: String,
        quota: Quota,
        limit: u64,
        actual: u64,
    },

    #[error(
        "refusing to modify {}: expected ownership tag '{expected_tag}', found {}",
        .path.display(),
        describe_marker(.found_tag)
    )]
    ForeignOrUnmanaged {
        path: PathBuf,
        expected_tag: String,
        found_tag: Option<String>,
    },

    #[error("another nmsmods process is running (lock busy: {})", .path.display())]
    LockBusy { path: PathBuf },

    #[error("state file {} cannot be loaded: {reason}", .path.display())]
    SchemaMigrationFailure { path: PathBuf, reason: String },

    #[error("not a directory: {}", .path.display())]
    NotADirectory { path: PathBuf },

    #[error(
        "failed to move staged copy into {} ({source}); restoring backup {} also failed: {rollback}",
        .dest.display(),
        .backup.display()
    )]
    RollbackFailed {
        dest: PathBuf,
        backup: PathBuf,
        #[source]
        source: io::Error,
        rollback: io::Error,
    },

    #[error("failed to read archive {}: {source}", .path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to {context} {}: {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_path(input: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPath {
            input: input.into(),
            reason,
        }
    }
}

fn describe_marker(tag: &Option<String>) -> String {
    match tag {
        Some(tag) => format!("'{tag}'"),
        None => "no marker".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_message_names_both_tags() {
        let err = Error::ForeignOrUnmanaged {
            path: PathBuf::from("/game/MODS/foo"),
            expected_tag: "nmsmods:a:default".to_string(),
            found_tag: Some("nmsmods:b:default".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("/game/MODS/foo"));
        assert!(msg.contains("nmsmods:a:default"));
        assert!(msg.contains("'nmsmods:b:default'"));
    }

    #[test]
    fn unmanaged_message_says_no_marker() {
        let err = Error::ForeignOrUnmanaged {
            path: PathBuf::from("/game/MODS/foo"),
            expected_tag: "nmsmods:a:default".to_string(),
            found_tag: None,
        };
        assert!(err.to_string().ends_with("found no marker"));
    }

    #[test]
    fn quota_message_includes_limit() {
        let err = Error::QuotaExceeded {
            archive: PathBuf::from("mod.zip"),
            entry: "big.bin".to_string(),
            quota: Quota::EntrySize,
            limit: 10,
            actual: 11,
        };
        let msg = err.to_string();
        assert!(msg.contains("per-entry size"));
        assert!(msg.contains("limit 10"));
        assert!(msg.contains("big.bin"));
    }
}
