//! Read-only reports: listing rows for `downloads`/`info` and the `doctor`
//! diagnosis. Everything here serializes for `--json`.

use crate::config::{Config, Paths};
use crate::mods::{read_marker, safe_join, TOOL_NAME};
use crate::state::{Health, ProfileInstallation, RepoState};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

/// One line of `downloads`
#[derive(Debug, Clone, Serialize)]
pub struct DownloadRow {
    pub index: usize,
    pub id: String,
    pub display_name: String,
    pub origin: String,
    pub locator: String,
    pub archive: Option<String>,
    pub archive_present: bool,
    pub sha256: Option<String>,
    pub downloaded_at: Option<String>,
    pub health: Option<Health>,
    /// Profiles the mod is installed in
    pub installed_in: Vec<String>,
}

/// Everything recorded about one mod
#[derive(Debug, Clone, Serialize)]
pub struct ModInfo {
    #[serde(flatten)]
    pub row: DownloadRow,
    pub installations: Vec<InstallationInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallationInfo {
    pub profile: String,
    #[serde(flatten)]
    pub installation: ProfileInstallation,
}

fn archive_present(paths: &Paths, archive: Option<&str>) -> bool {
    archive
        .and_then(|rel| paths.repo_path(rel).ok())
        .is_some_and(|p| p.is_file())
}

fn row(paths: &Paths, state: &RepoState, index: usize, id: &str) -> Option<DownloadRow> {
    let rec = state.mods.get(id)?;
    Some(DownloadRow {
        index,
        id: id.to_string(),
        display_name: rec.display_name.clone(),
        origin: rec.origin.kind().to_string(),
        locator: rec.origin.locator().to_string(),
        archive: rec.archive.clone(),
        archive_present: archive_present(paths, rec.archive.as_deref()),
        sha256: rec.checksum.clone(),
        downloaded_at: rec.downloaded_at.clone(),
        health: rec.health,
        installed_in: rec
            .installations
            .iter()
            .filter(|(_, pi)| pi.installed)
            .map(|(p, _)| p.clone())
            .collect(),
    })
}

/// Rows in listing order; `index` is what mod arguments accept
pub fn download_rows(paths: &Paths, state: &RepoState) -> Vec<DownloadRow> {
    state
        .sorted_ids()
        .into_iter()
        .enumerate()
        .filter_map(|(i, id)| row(paths, state, i + 1, id))
        .collect()
}

pub fn mod_info(paths: &Paths, state: &RepoState, id: &str) -> Option<ModInfo> {
    let index = state.sorted_ids().iter().position(|i| *i == id)? + 1;
    let row = row(paths, state, index, id)?;
    let installations = state.mods[id]
        .installations
        .iter()
        .map(|(profile, pi)| InstallationInfo {
            profile: profile.clone(),
            installation: pi.clone(),
        })
        .collect();
    Some(ModInfo { row, installations })
}

/// A folder found in the game's MODS directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetFolder {
    pub name: String,
    /// Ownership tag, `None` for folders nmsmods did not deploy
    pub owner: Option<String>,
}

/// One installation's on-disk check
#[derive(Debug, Clone, Serialize)]
pub struct InstallationCheck {
    pub mod_id: String,
    pub profile: String,
    pub folder: String,
    pub store_present: bool,
    /// `None` when the installation is not deployed
    pub deployed_present: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub root: PathBuf,
    pub downloads: PathBuf,
    pub staging: PathBuf,
    pub active_profile: String,
    pub game_path: Option<PathBuf>,
    pub game_path_valid: bool,
    pub target_dir: Option<PathBuf>,
    pub target_folders: Vec<TargetFolder>,
    /// Hidden stage/backup directories left by an interrupted deploy
    pub leftovers: Vec<String>,
    pub downloads_rows: Vec<DownloadRow>,
    pub installations: Vec<InstallationCheck>,
    pub problems: Vec<String>,
}

impl DoctorReport {
    pub fn is_healthy(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Inspect the repository and the game directory without changing either.
pub fn diagnose(paths: &Paths, config: &Config, state: &RepoState) -> DoctorReport {
    let mut problems = Vec::new();

    let game_path_valid = config.game_path.as_ref().is_some_and(|p| p.is_dir());
    match &config.game_path {
        None => problems.push("game path is not set; run `nmsmods set-path <dir>`".to_string()),
        Some(p) if !game_path_valid => {
            problems.push(format!("game path {} is not a directory", p.display()))
        }
        Some(_) => {}
    }

    let target_dir = config.target_dir();
    let mut target_folders = Vec::new();
    let mut leftovers = Vec::new();
    if let Some(entries) = target_dir.as_ref().and_then(|d| fs::read_dir(d).ok()) {
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') && name.contains(&format!(".{}.", TOOL_NAME)) {
                leftovers.push(name);
                continue;
            }
            target_folders.push(TargetFolder {
                name,
                owner: read_marker(&path).map(|m| m.tag),
            });
        }
    }
    target_folders.sort_by(|a, b| a.name.cmp(&b.name));
    leftovers.sort();
    for name in &leftovers {
        problems.push(format!("interrupted deploy left {} behind", name));
    }

    let downloads_rows = download_rows(paths, state);
    for row in &downloads_rows {
        if row.archive.is_some() && !row.archive_present {
            problems.push(format!("archive of '{}' is missing", row.id));
        }
    }

    let mut installations = Vec::new();
    for (id, profile, pi) in state.installations().filter(|(_, _, pi)| pi.installed) {
        let store_present = !pi.folder.is_empty()
            && safe_join(&paths.profile_store_dir(profile), &pi.folder).is_ok_and(|s| s.is_dir());
        let deployed_present = pi
            .is_deployed()
            .then(|| PathBuf::from(&pi.deployed_path).is_dir());
        if !store_present {
            problems.push(format!("store copy of '{}' ({}) is missing", id, profile));
        }
        if deployed_present == Some(false) {
            problems.push(format!("deployed folder of '{}' ({}) is gone", id, profile));
        }
        installations.push(InstallationCheck {
            mod_id: id.to_string(),
            profile: profile.to_string(),
            folder: pi.folder.clone(),
            store_present,
            deployed_present,
        });
    }

    DoctorReport {
        root: paths.root().to_path_buf(),
        downloads: paths.downloads_dir(),
        staging: paths.staging_dir(),
        active_profile: config.active_profile().to_string(),
        game_path: config.game_path.clone(),
        game_path_valid,
        target_dir,
        target_folders,
        leftovers,
        downloads_rows,
        installations,
        problems,
    }
}
