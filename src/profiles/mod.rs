//! Profiles: isolated sets of installed mods, one of which is deployed

mod manager;

pub use manager::*;

use crate::config::Paths;
use crate::state::{RepoState, DEFAULT_PROFILE};
use anyhow::{bail, Context, Result};
use regex_lite::Regex;
use std::collections::BTreeSet;

const PROFILE_NAME_PATTERN: &str = r"^[a-zA-Z0-9][a-zA-Z0-9._-]{0,63}$";

/// Profile names double as directory names under `profiles/`.
pub fn validate_profile_name(name: &str) -> Result<()> {
    let re = Regex::new(PROFILE_NAME_PATTERN).context("Invalid profile name pattern")?;
    if !re.is_match(name) {
        bail!(
            "Invalid profile name '{}' (allowed: letters, digits, '.', '_', '-'; max 64 chars)",
            name
        );
    }
    Ok(())
}

/// Per-profile counts for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSummary {
    pub name: String,
    pub active: bool,
    pub installed: usize,
    pub enabled: usize,
    pub deployed: usize,
}

/// Every known profile: `default`, each directory under `profiles/`, and
/// any profile named in state.
pub fn known_profiles(paths: &Paths, state: &RepoState) -> Vec<String> {
    let mut names: BTreeSet<String> = BTreeSet::new();
    names.insert(DEFAULT_PROFILE.to_string());

    if let Ok(entries) = std::fs::read_dir(paths.profiles_dir()) {
        for entry in entries.filter_map(|e| e.ok()) {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_dir && validate_profile_name(&name).is_ok() {
                names.insert(name);
            }
        }
    }

    for (_, profile, _) in state.installations() {
        names.insert(profile.to_string());
    }
    names.into_iter().collect()
}

pub fn summarize(state: &RepoState, profile: &str, active: &str) -> ProfileSummary {
    let mut summary = ProfileSummary {
        name: profile.to_string(),
        active: profile == active,
        installed: 0,
        enabled: 0,
        deployed: 0,
    };
    for (_, name, pi) in state.installations() {
        if name != profile || !pi.installed {
            continue;
        }
        summary.installed += 1;
        if pi.enabled {
            summary.enabled += 1;
        }
        if pi.is_deployed() {
            summary.deployed += 1;
        }
    }
    summary
}
