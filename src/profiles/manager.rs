//! Profile manager and deployment reconciler

use super::{known_profiles, summarize, validate_profile_name, ProfileSummary};
use crate::config::{Config, Paths};
use crate::mods::{deploy, safe_join, undeploy_path};
use crate::state::RepoState;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// What a reconcile pass changed
#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
    /// `(mod id, profile)` pairs removed from the target directory
    pub undeployed: Vec<(String, String)>,
    /// `(mod id, deployed path)` pairs written for the active profile
    pub deployed: Vec<(String, PathBuf)>,
    /// Mod ids whose store copy was missing or unusable
    pub skipped: Vec<String>,
}

/// Profile manager handles listing, switching and redeploying profiles
pub struct ProfileManager {
    paths: Paths,
    config: Config,
}

impl ProfileManager {
    pub fn new(paths: Paths, config: Config) -> Self {
        Self { paths, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn active(&self) -> &str {
        self.config.active_profile()
    }

    pub fn list_profiles(&self, state: &RepoState) -> Vec<ProfileSummary> {
        known_profiles(&self.paths, state)
            .iter()
            .map(|name| summarize(state, name, self.active()))
            .collect()
    }

    pub fn status(&self, state: &RepoState) -> ProfileSummary {
        summarize(state, self.active(), self.active())
    }

    /// Make the target directory hold exactly the enabled installations of
    /// `active`.
    ///
    /// Everything currently deployed is undeployed first, from every
    /// profile, then the active profile's enabled installations are
    /// deployed. `state` is updated as each step lands, so on error it still
    /// matches what is on disk; callers persist it either way.
    pub fn reconcile(&self, state: &mut RepoState, active: &str) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for (id, record) in state.mods.iter_mut() {
            for (profile, pi) in record.installations.iter_mut() {
                if !pi.is_deployed() {
                    continue;
                }
                undeploy_path(Path::new(&pi.deployed_path), id, profile)
                    .with_context(|| format!("Failed to undeploy '{}' ({})", id, profile))?;
                pi.deployed_path.clear();
                report.undeployed.push((id.clone(), profile.clone()));
            }
        }

        let mut target: Option<PathBuf> = None;
        for (id, record) in state.mods.iter_mut() {
            let Some(pi) = record.installations.get_mut(active) else {
                continue;
            };
            if !pi.installed || !pi.enabled || pi.folder.is_empty() || pi.store.is_empty() {
                continue;
            }

            let store = match safe_join(&self.paths.profile_store_dir(active), &pi.folder) {
                Ok(store) => store,
                Err(e) => {
                    tracing::warn!("Bad folder recorded for '{}': {}, skipping", id, e);
                    report.skipped.push(id.clone());
                    continue;
                }
            };
            if !store.is_dir() {
                tracing::warn!("Store copy of '{}' is missing ({}), skipping", id, store.display());
                report.skipped.push(id.clone());
                continue;
            }

            let target_dir = match &target {
                Some(dir) => dir.clone(),
                None => {
                    let dir = self.config.mods_dir()?;
                    target = Some(dir.clone());
                    dir
                }
            };
            let deployed = deploy(&store, &target_dir, &pi.folder, id, active)
                .with_context(|| format!("Failed to deploy '{}' ({})", id, active))?;
            pi.deployed_path = deployed.to_string_lossy().into_owned();
            report.deployed.push((id.clone(), deployed));
        }

        tracing::info!(
            "Reconciled profile '{}': {} undeployed, {} deployed, {} skipped",
            active,
            report.undeployed.len(),
            report.deployed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Redeploy the active profile
    pub fn deploy_active(&self, state: &mut RepoState) -> Result<ReconcileReport> {
        let active = self.active().to_string();
        self.reconcile(state, &active)
    }

    /// Persist `name` as the active profile and reconcile to it.
    pub fn switch_profile(&mut self, state: &mut RepoState, name: &str) -> Result<ReconcileReport> {
        validate_profile_name(name)?;
        let store = self.paths.profile_store_dir(name);
        fs::create_dir_all(&store)
            .with_context(|| format!("Failed to create {}", store.display()))?;

        self.config.active_profile = Some(name.to_string());
        self.config.save(&self.paths)?;
        tracing::info!("Active profile is now '{}'", name);

        self.reconcile(state, name)
    }
}
