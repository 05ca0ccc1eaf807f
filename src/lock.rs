//! Whole-repository process lock
//!
//! An advisory exclusive lock on `<root>/lock`. Acquisition never blocks: a
//! second process gets [`Error::LockBusy`] immediately. The OS drops the
//! lock if the holder dies.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "lock";

/// Held lock; released on drop
#[derive(Debug)]
pub struct RepoLock {
    file: File,
    path: PathBuf,
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl RepoLock {
    pub fn acquire(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| Error::io("create repository root", root, e))?;
        let path = root.join(LOCK_FILE);

        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::io("open lock file", &path, e))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                tracing::debug!("Acquired {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if is_contended(&e) => Err(Error::LockBusy { path }),
            Err(e) => Err(Error::io("lock", path, e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_busy() {
        let tmp = tempfile::tempdir().unwrap();
        let held = RepoLock::acquire(tmp.path()).unwrap();

        let err = RepoLock::acquire(tmp.path()).unwrap_err();
        assert!(matches!(err, Error::LockBusy { .. }));
        assert!(err.to_string().contains(&held.path().display().to_string()));
    }

    #[test]
    fn lock_is_reusable_after_drop() {
        let tmp = tempfile::tempdir().unwrap();
        drop(RepoLock::acquire(tmp.path()).unwrap());
        assert!(RepoLock::acquire(tmp.path()).is_ok());
    }

    #[test]
    fn creates_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nested/root");
        let lock = RepoLock::acquire(&root).unwrap();
        assert!(lock.path().exists());
    }
}
