//! Configuration management for nmsmods
//!
//! Settings live in `<root>/config.toml`; see [`Paths`] for the rest of the
//! repository layout.

mod paths;

pub use paths::{Paths, HOME_ENV};

use crate::mods::ExtractLimits;
use crate::state::DEFAULT_PROFILE;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// No Man's Sky install directory (the one containing `GAMEDATA`)
    pub game_path: Option<PathBuf>,

    /// Active profile name; `default` when unset
    pub active_profile: Option<String>,

    /// Archive extraction quotas
    pub extract: ExtractLimits,
}

impl Config {
    /// Load configuration, falling back to defaults when the file is absent
    pub fn load(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))
    }

    /// Save configuration to disk
    pub fn save(&self, paths: &Paths) -> Result<()> {
        let config_path = paths.config_file();
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&config_path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn active_profile(&self) -> &str {
        self.active_profile
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROFILE)
    }

    /// Where mods would be deployed, without touching the filesystem
    pub fn target_dir(&self) -> Option<PathBuf> {
        self.game_path
            .as_ref()
            .map(|game| game.join("GAMEDATA").join("MODS"))
    }

    /// The deployment target: `<game_path>/GAMEDATA/MODS`, created if
    /// missing. Only the game directory's existence is checked.
    pub fn mods_dir(&self) -> Result<PathBuf> {
        let Some(game) = &self.game_path else {
            bail!("Game path is not set. Run `nmsmods set-path <dir>` first");
        };
        if !game.is_dir() {
            bail!("Game path {} is not a directory", game.display());
        }

        let mods = game.join("GAMEDATA").join("MODS");
        fs::create_dir_all(&mods)
            .with_context(|| format!("Failed to create {}", mods.display()))?;
        Ok(mods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load(&Paths::at(tmp.path())).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.active_profile(), "default");
        assert_eq!(config.extract, ExtractLimits::default());
    }

    #[test]
    fn save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::at(tmp.path());
        let mut config = Config {
            game_path: Some(tmp.path().join("game")),
            active_profile: Some("alt".into()),
            ..Config::default()
        };
        config.extract.max_entries = 10;

        config.save(&paths).unwrap();
        assert_eq!(Config::load(&paths).unwrap(), config);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::at(tmp.path());
        fs::write(paths.config_file(), "[extract]\nmax_entries = 5\n").unwrap();

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.extract.max_entries, 5);
        assert_eq!(
            config.extract.max_total_bytes,
            ExtractLimits::default().max_total_bytes
        );
        assert!(config.game_path.is_none());
    }

    #[test]
    fn mods_dir_requires_existing_game_path() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(Config::default().mods_dir().is_err());

        let missing = Config {
            game_path: Some(tmp.path().join("nope")),
            ..Config::default()
        };
        assert!(missing.mods_dir().is_err());

        let ok = Config {
            game_path: Some(tmp.path().to_path_buf()),
            ..Config::default()
        };
        let mods = ok.mods_dir().unwrap();
        assert!(mods.ends_with("GAMEDATA/MODS"));
        assert!(mods.is_dir());
    }
}
