//! Application orchestration
//!
//! Every command runs as: acquire the repository lock, load (and migrate)
//! state, operate, save. State is saved even when the operation fails so
//! that whatever did land on disk is recorded.

mod actions;
pub mod report;

use crate::config::{Config, Paths};
use crate::lock::RepoLock;
use crate::mods::{ModManager, ProgressCallback};
use crate::profiles::ProfileManager;
use crate::state::{self, RepoState};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

const PROGRESS_TEMPLATE: &str = "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} {msg}";

/// Main application struct that orchestrates all components
pub struct App {
    pub paths: Paths,
    pub config: Config,
}

impl App {
    /// Create the repository layout if needed and load configuration
    pub fn new(paths: Paths) -> Result<Self> {
        paths.ensure_dirs().context("Failed to create directories")?;
        let config = Config::load(&paths)?;
        Ok(Self { paths, config })
    }

    pub fn active_profile(&self) -> String {
        self.config.active_profile().to_string()
    }

    pub fn mod_manager(&self) -> ModManager {
        ModManager::new(self.paths.clone(), self.config.clone())
    }

    pub fn profile_manager(&self) -> ProfileManager {
        ProfileManager::new(self.paths.clone(), self.config.clone())
    }

    /// Run `op` with the repository lock held and the current state loaded,
    /// then persist the state. The operation's error wins over a save error.
    pub fn with_state_lock<T>(
        &mut self,
        op: impl FnOnce(&mut App, &mut RepoState) -> Result<T>,
    ) -> Result<T> {
        let _lock = RepoLock::acquire(self.paths.root())?;
        let state_file = self.paths.state_file();
        let mut state = state::load(&state_file)?;

        let result = op(self, &mut state);
        let saved = state::save(&state_file, &state).context("Failed to save state");

        match (result, saved) {
            (Err(e), Err(save_err)) => {
                tracing::warn!("{:#}", save_err);
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(save_err)) => Err(save_err),
            (Ok(value), Ok(())) => Ok(value),
        }
    }

    /// Load state under the lock without writing anything beyond the
    /// one-time migration rewrite.
    pub fn read_state(&self) -> Result<RepoState> {
        let _lock = RepoLock::acquire(self.paths.root())?;
        Ok(state::load(&self.paths.state_file())?)
    }
}

/// Progress bar wired to the extractor's callback
pub(crate) fn extraction_progress() -> (ProgressBar, ProgressCallback) {
    let pb = ProgressBar::new(0);
    match ProgressStyle::with_template(PROGRESS_TEMPLATE) {
        Ok(style) => pb.set_style(style),
        Err(e) => tracing::debug!("Progress template rejected: {}", e),
    }

    let bar = pb.clone();
    let callback: ProgressCallback = Arc::new(move |entry: String, done: usize, total: usize| {
        bar.set_length(total as u64);
        bar.set_position(done as u64);
        bar.set_message(entry);
    });
    (pb, callback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::state::{ModRecord, Origin};

    #[test]
    fn state_is_saved_even_when_operation_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let mut app = App::new(Paths::at(tmp.path())).unwrap();

        let result: Result<()> = app.with_state_lock(|_, state| {
            state
                .mods
                .insert("a".into(), ModRecord::new(Origin::Local("a.zip".into()), "a"));
            anyhow::bail!("boom")
        });
        assert!(result.is_err());
        assert!(app.read_state().unwrap().mods.contains_key("a"));
    }

    #[test]
    fn concurrent_lock_holder_makes_commands_busy() {
        let tmp = tempfile::tempdir().unwrap();
        let mut app = App::new(Paths::at(tmp.path())).unwrap();
        let _held = RepoLock::acquire(tmp.path()).unwrap();

        let err = app.with_state_lock(|_, _| Ok(())).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::LockBusy { .. })));
    }
}
