//! Persistent repository state
//!
//! `state.json` holds one record per tracked mod, keyed by mod id. The file
//! carries a schema version; older files are migrated forward on load and
//! written back immediately so each migration runs at most once.

mod migrate;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

pub use migrate::CURRENT_VERSION;

/// Profile that always exists, and the one legacy installs migrate into
pub const DEFAULT_PROFILE: &str = "default";

/// RFC 3339 timestamp used for every `*_at` field
pub fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Where a mod's archive came from, decided when the record is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "locator", rename_all = "lowercase")]
pub enum Origin {
    /// Local file import; locator is the original file path
    Local(String),
    /// Plain URL download
    Remote(String),
    /// Remote catalog reference (e.g. an `nxm://` link)
    Catalog(String),
}

impl Origin {
    pub fn kind(&self) -> &'static str {
        match self {
            Origin::Local(_) => "local",
            Origin::Remote(_) => "remote",
            Origin::Catalog(_) => "catalog",
        }
    }

    pub fn locator(&self) -> &str {
        match self {
            Origin::Local(s) | Origin::Remote(s) | Origin::Catalog(s) => s,
        }
    }
}

/// Result of the post-install content check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Ok,
    Warning,
}

impl Health {
    pub fn as_str(self) -> &'static str {
        match self {
            Health::Ok => "ok",
            Health::Warning => "warning",
        }
    }
}

/// Installation of one mod into one profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileInstallation {
    /// Files are materialized in the profile store
    pub installed: bool,
    /// Should be deployed while this profile is active
    pub enabled: bool,
    /// Store subdirectory name and deployed directory name
    pub folder: String,
    /// Store location relative to the repository root
    pub store: String,
    /// Absolute deployed location, empty when not deployed
    #[serde(skip_serializing_if = "String::is_empty")]
    pub deployed_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<String>,
}

impl ProfileInstallation {
    pub fn is_deployed(&self) -> bool {
        !self.deployed_path.is_empty()
    }
}

/// One tracked mod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModRecord {
    pub origin: Origin,
    pub display_name: String,
    /// Archive location relative to the repository root
    pub archive: Option<String>,
    /// Hex SHA-256 of the archive
    pub checksum: Option<String>,
    pub downloaded_at: Option<String>,
    pub health: Option<Health>,
    pub installations: BTreeMap<String, ProfileInstallation>,
}

impl ModRecord {
    pub fn new(origin: Origin, display_name: impl Into<String>) -> Self {
        Self {
            origin,
            display_name: display_name.into(),
            archive: None,
            checksum: None,
            downloaded_at: None,
            health: None,
            installations: BTreeMap::new(),
        }
    }

    pub fn installation(&self, profile: &str) -> Option<&ProfileInstallation> {
        self.installations.get(profile)
    }

    pub fn is_installed_in(&self, profile: &str) -> bool {
        self.installation(profile).is_some_and(|pi| pi.installed)
    }

    pub fn is_installed_anywhere(&self) -> bool {
        self.installations.values().any(|pi| pi.installed)
    }

    /// Flat single-profile view of this record, as older tooling expects:
    /// the `default` installation when installed, else the first installed
    /// profile.
    pub fn legacy_view(&self) -> Option<(&str, &ProfileInstallation)> {
        if let Some(pi) = self.installations.get(DEFAULT_PROFILE).filter(|pi| pi.installed) {
            return Some((DEFAULT_PROFILE, pi));
        }
        self.installations
            .iter()
            .find(|(_, pi)| pi.installed)
            .map(|(name, pi)| (name.as_str(), pi))
    }
}

/// Everything persisted in `state.json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoState {
    pub version: u32,
    pub mods: BTreeMap<String, ModRecord>,
}

impl Default for RepoState {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            mods: BTreeMap::new(),
        }
    }
}

impl RepoState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mod ids in display order; list indices shown to users are 1-based
    /// positions in this order.
    pub fn sorted_ids(&self) -> Vec<&str> {
        self.mods.keys().map(String::as_str).collect()
    }

    /// Every (mod id, profile, installation) triple
    pub fn installations(&self) -> impl Iterator<Item = (&str, &str, &ProfileInstallation)> {
        self.mods.iter().flat_map(|(id, record)| {
            record
                .installations
                .iter()
                .map(move |(profile, pi)| (id.as_str(), profile.as_str(), pi))
        })
    }
}

/// Load state from `path`, migrating and rewriting it when it is older
/// than [`CURRENT_VERSION`]. A missing or empty file yields a fresh state.
pub fn load(path: &Path) -> Result<RepoState> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RepoState::new()),
        Err(e) => return Err(Error::io("read state file", path, e)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(RepoState::new());
    }

    let stored: migrate::StoredState =
        serde_json::from_slice(&bytes).map_err(|e| Error::SchemaMigrationFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let found = stored.state_version;
    if found > CURRENT_VERSION {
        return Err(Error::SchemaMigrationFailure {
            path: path.to_path_buf(),
            reason: format!(
                "state_version {} is newer than supported version {}",
                found, CURRENT_VERSION
            ),
        });
    }

    let state = migrate::migrate(stored).into_state();
    if found < CURRENT_VERSION {
        tracing::info!(
            "Migrated {} from state_version {} to {}",
            path.display(),
            found,
            CURRENT_VERSION
        );
        save(path, &state)?;
    }
    Ok(state)
}

/// Atomically replace `path` with the serialized state: write a temp file
/// in the same directory, fsync, restrict to owner-only, then rename over.
pub fn save(path: &Path, state: &RepoState) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| Error::io("create state directory", dir, e))?;

    let stored = migrate::StoredState::from_state(state);
    let mut json = serde_json::to_vec_pretty(&stored)
        .map_err(|e| Error::io("serialize state for", path, e.into()))?;
    json.push(b'\n');

    let mut tmp = tempfile::Builder::new()
        .prefix(".state.")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| Error::io("create temp state file in", dir, e))?;
    tmp.write_all(&json)
        .map_err(|e| Error::io("write temp state file", tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::io("sync temp state file", tmp.path(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::io("restrict permissions of", tmp.path(), e))?;
    }

    tmp.persist(path)
        .map_err(|e| Error::io("replace state file", path, e.error))?;
    tracing::debug!("Saved state to {}", path.display());
    Ok(())
}
