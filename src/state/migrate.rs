//! On-disk schema and forward migrations
//!
//! Schema history:
//! - v0: flat `url`/`zip`/`folder`/`installed` per mod, no version field
//! - v1: provenance (`origin`), `display_name`, `health`
//! - v2: stored relative paths use `/` separators
//! - v3: per-profile `installations`
//!
//! The flat fields are still written on save as a projection of the
//! per-profile data so older tooling can read the file, but they are never
//! read back once a record has reached v3.

use super::{Health, ModRecord, Origin, ProfileInstallation, RepoState, DEFAULT_PROFILE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

type Migration = fn(StoredState) -> StoredState;

/// Ordered migration steps; step `n` upgrades version `n` to `n + 1`.
const MIGRATIONS: [Migration; 3] = [v0_to_v1, v1_to_v2, v2_to_v3];

pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(super) struct StoredState {
    pub state_version: u32,
    pub mods: BTreeMap<String, StoredMod>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(super) struct StoredMod {
    #[serde(skip_serializing_if = "String::is_empty")]
    url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    zip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    folder: String,
    installed: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    installed_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    installed_at: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    downloaded_at: String,

    /// Older provenance hint (`local` | `url` | `nexus`), read only
    #[serde(skip_serializing)]
    source: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<Origin>,
    #[serde(skip_serializing_if = "String::is_empty")]
    display_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    sha256: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    health: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    installations: BTreeMap<String, ProfileInstallation>,
}

/// Run every pending step in order. Versions are never skipped.
pub(super) fn migrate(mut state: StoredState) -> StoredState {
    while let Some(step) = MIGRATIONS.get(state.state_version as usize) {
        let from = state.state_version;
        state = step(state);
        debug_assert_eq!(state.state_version, from + 1);
        tracing::debug!("Applied state migration v{} -> v{}", from, state.state_version);
    }
    state
}

fn infer_origin(stored: &StoredMod) -> Origin {
    let url = stored.url.trim();
    if let Some(path) = url.strip_prefix("file://").or_else(|| url.strip_prefix("dir://")) {
        return Origin::Local(path.to_string());
    }
    if url.starts_with("nxm://") || url.starts_with("nexus:") || stored.source == "nexus" {
        return Origin::Catalog(url.to_string());
    }
    if url.is_empty() || stored.source == "local" {
        let locator = if url.is_empty() { &stored.zip } else { url };
        return Origin::Local(locator.to_string());
    }
    Origin::Remote(url.to_string())
}

fn v0_to_v1(mut state: StoredState) -> StoredState {
    for (id, m) in state.mods.iter_mut() {
        if m.origin.is_none() {
            m.origin = Some(infer_origin(m));
        }
        if m.display_name.trim().is_empty() {
            m.display_name = id.clone();
        }
        if m.health.is_empty() && m.installed {
            m.health = Health::Ok.as_str().to_string();
        }
    }
    state.state_version = 1;
    state
}

fn normalize_separators(path: &str) -> String {
    path.trim().replace('\\', "/")
}

fn v1_to_v2(mut state: StoredState) -> StoredState {
    for m in state.mods.values_mut() {
        m.zip = normalize_separators(&m.zip);
        m.folder = m.folder.trim().to_string();
        for pi in m.installations.values_mut() {
            pi.store = normalize_separators(&pi.store);
        }
    }
    state.state_version = 2;
    state
}

/// Lift flat installs into the `default` profile. Legacy folders carry no
/// ownership marker, so nothing is recorded as deployed.
fn v2_to_v3(mut state: StoredState) -> StoredState {
    for m in state.mods.values_mut() {
        if !m.installed || m.installations.contains_key(DEFAULT_PROFILE) {
            continue;
        }
        let installed_at = Some(m.installed_at.clone()).filter(|s| !s.is_empty());
        m.installations.insert(
            DEFAULT_PROFILE.to_string(),
            ProfileInstallation {
                installed: true,
                enabled: true,
                folder: m.folder.clone(),
                store: String::new(),
                deployed_path: String::new(),
                installed_at,
            },
        );
    }
    state.state_version = 3;
    state
}

fn non_empty(s: String) -> Option<String> {
    Some(s).filter(|s| !s.is_empty())
}

impl StoredState {
    pub(super) fn into_state(self) -> RepoState {
        let mods = self
            .mods
            .into_iter()
            .map(|(id, m)| {
                let origin = m.origin.clone().unwrap_or_else(|| infer_origin(&m));
                let health = match m.health.as_str() {
                    "ok" => Some(Health::Ok),
                    "warning" => Some(Health::Warning),
                    _ => None,
                };
                let display_name = if m.display_name.is_empty() {
                    id.clone()
                } else {
                    m.display_name
                };
                let record = ModRecord {
                    origin,
                    display_name,
                    archive: non_empty(m.zip),
                    checksum: non_empty(m.sha256),
                    downloaded_at: non_empty(m.downloaded_at),
                    health,
                    installations: m.installations,
                };
                (id, record)
            })
            .collect();

        RepoState {
            version: CURRENT_VERSION,
            mods,
        }
    }

    pub(super) fn from_state(state: &RepoState) -> Self {
        let mods = state
            .mods
            .iter()
            .map(|(id, record)| {
                let legacy = record.legacy_view().map(|(_, pi)| pi);
                let url = match &record.origin {
                    Origin::Local(_) => String::new(),
                    Origin::Remote(url) | Origin::Catalog(url) => url.clone(),
                };
                let stored = StoredMod {
                    url,
                    zip: record.archive.clone().unwrap_or_default(),
                    folder: legacy.map(|pi| pi.folder.clone()).unwrap_or_default(),
                    installed: legacy.is_some(),
                    installed_path: legacy.map(|pi| pi.deployed_path.clone()).unwrap_or_default(),
                    installed_at: legacy
                        .and_then(|pi| pi.installed_at.clone())
                        .unwrap_or_default(),
                    downloaded_at: record.downloaded_at.clone().unwrap_or_default(),
                    source: String::new(),
                    origin: Some(record.origin.clone()),
                    display_name: record.display_name.clone(),
                    sha256: record.checksum.clone().unwrap_or_default(),
                    health: record.health.map(|h| h.as_str().to_string()).unwrap_or_default(),
                    installations: record.installations.clone(),
                };
                (id.clone(), stored)
            })
            .collect();

        StoredState {
            state_version: CURRENT_VERSION,
            mods,
        }
    }
}
