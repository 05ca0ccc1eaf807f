//! CLI command action handlers

use super::report::{diagnose, download_rows, mod_info};
use super::{extraction_progress, App};
use crate::config::Paths;
use crate::lock::LOCK_FILE;
use crate::mods::{
    is_archive_file, resolve_installed_arg, resolve_mod_arg, InstallMode, InstallOutcome,
    InstallPlan,
};
use crate::state::RepoState;
use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Zip files in `downloads/` that no record points at
pub fn orphan_archives(paths: &Paths, state: &RepoState) -> Result<Vec<PathBuf>> {
    let downloads = paths.downloads_dir();
    let referenced: HashSet<PathBuf> = state
        .mods
        .values()
        .filter_map(|r| r.archive.as_deref())
        .map(|rel| paths.resolve_rel(rel))
        .collect();

    let entries = match fs::read_dir(&downloads) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", downloads.display()))
        }
    };

    let mut orphans: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_archive_file(p))
        .filter(|p| !referenced.contains(p))
        .collect();
    orphans.sort();
    Ok(orphans)
}

/// Remove and recreate the staging directory
pub fn reset_staging(paths: &Paths) -> Result<()> {
    let staging = paths.staging_dir();
    if staging.exists() {
        fs::remove_dir_all(&staging)
            .with_context(|| format!("Failed to remove {}", staging.display()))?;
    }
    fs::create_dir_all(&staging)
        .with_context(|| format!("Failed to create {}", staging.display()))?;
    Ok(())
}

/// Everything under the root except the lock file, which stays held
fn reset_targets(paths: &Paths, all: bool, keep_downloads: bool) -> Vec<PathBuf> {
    if all {
        let mut targets: Vec<PathBuf> = fs::read_dir(paths.root())
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != LOCK_FILE)
            .map(|e| e.path())
            .collect();
        targets.sort();
        return targets;
    }

    let mut targets = vec![paths.state_file(), paths.staging_dir()];
    if !keep_downloads {
        targets.push(paths.downloads_dir());
    }
    targets.retain(|p| p.exists());
    targets
}

fn remove_path(path: &Path) -> Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.with_context(|| format!("Failed to remove {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to encode JSON")?;
    println!("{}", text);
    Ok(())
}

fn print_install_plan(plan: &InstallPlan, verb: &str) {
    println!("Dry run: {} '{}' into profile '{}'", verb, plan.mod_id, plan.profile);
    println!("{:-<60}", "");
    println!("Source:   {}", plan.source.display());
    println!(
        "Folder:   {}{}",
        plan.folder,
        if plan.collided { " (renamed to avoid a collision)" } else { "" }
    );
    println!(
        "Store:    {}{}",
        plan.store.display(),
        if plan.replaces_store { " (replaced)" } else { "" }
    );
    match &plan.deploy_to {
        Some(dest) => println!("Deploy:   {}", dest.display()),
        None => println!("Deploy:   no (profile inactive, mod disabled, or game path unset)"),
    }
}

fn print_install_outcome(outcome: &InstallOutcome, verb: &str, profile: &str) {
    println!(
        "{} '{}' as '{}' in profile '{}'",
        verb, outcome.mod_id, outcome.folder, profile
    );
    if outcome.collided {
        println!("  Folder renamed to avoid a collision");
    }
    println!("  Store:  {}", outcome.store.display());
    match &outcome.deployed_path {
        Some(path) => println!("  Deployed: {}", path.display()),
        None => println!("  Not deployed (profile is not active or mod is disabled)"),
    }
    println!("  Health: {}", outcome.health.as_str());
}

fn display_or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("-")
}

impl App {
    fn profile_or_active(&self, profile: Option<&str>) -> String {
        profile.map(str::to_string).unwrap_or_else(|| self.active_profile())
    }

    // ========== Archive Commands ==========

    pub fn cmd_import(&mut self, path: &Path, id: Option<&str>) -> Result<()> {
        let outcome = self.with_state_lock(|app, state| {
            app.mod_manager().import_archive(state, path, id)
        })?;

        let verb = if outcome.refreshed { "Refreshed" } else { "Imported" };
        println!("{} '{}'", verb, outcome.mod_id);
        println!("  Archive: {}", outcome.archive.display());
        println!("  SHA-256: {}", outcome.checksum);
        Ok(())
    }

    pub fn cmd_downloads(&self, json: bool) -> Result<()> {
        let state = self.read_state()?;
        if json {
            return print_json(&download_rows(&self.paths, &state));
        }
        if state.mods.is_empty() {
            println!("No mods tracked. Use 'nmsmods import <archive>' to add one.");
            return Ok(());
        }

        println!("{:<4} {:<30} {:<8} {:<10} Archive", "#", "ID", "Origin", "Installed");
        println!("{:-<80}", "");
        for (index, id) in state.sorted_ids().into_iter().enumerate() {
            let rec = &state.mods[id];
            let installed: Vec<&str> = rec
                .installations
                .iter()
                .filter(|(_, pi)| pi.installed)
                .map(|(p, _)| p.as_str())
                .collect();
            println!(
                "{:<4} {:<30} {:<8} {:<10} {}",
                index + 1,
                id,
                rec.origin.kind(),
                if installed.is_empty() { "-".to_string() } else { installed.join(",") },
                display_or_dash(rec.archive.as_deref())
            );
        }
        Ok(())
    }

    pub fn cmd_rm_download(&mut self, arg: &str, keep_archive: bool) -> Result<()> {
        let (id, deleted) = self.with_state_lock(|app, state| {
            let id = resolve_mod_arg(state, arg)?;
            let deleted = app.mod_manager().remove(state, &id, !keep_archive)?;
            Ok((id, deleted))
        })?;

        println!("Removed '{}'", id);
        if let Some(path) = deleted {
            println!("  Deleted {}", path.display());
        }
        Ok(())
    }

    // ========== Install Commands ==========

    pub fn cmd_install(&mut self, arg: &str, profile: Option<&str>, dry_run: bool) -> Result<()> {
        self.run_install(arg, profile, InstallMode::Fresh, dry_run)
    }

    pub fn cmd_reinstall(
        &mut self,
        arg: &str,
        profile: Option<&str>,
        no_overwrite: bool,
        dry_run: bool,
    ) -> Result<()> {
        let mode = InstallMode::Reinstall {
            overwrite: !no_overwrite,
        };
        self.run_install(arg, profile, mode, dry_run)
    }

    fn run_install(
        &mut self,
        arg: &str,
        profile: Option<&str>,
        mode: InstallMode,
        dry_run: bool,
    ) -> Result<()> {
        let profile = self.profile_or_active(profile);
        let (verb, done) = match mode {
            InstallMode::Fresh => ("install", "Installed"),
            InstallMode::Reinstall { .. } => ("reinstall", "Reinstalled"),
        };

        if dry_run {
            let state = self.read_state()?;
            let id = resolve_mod_arg(&state, arg)?;
            let plan = self.mod_manager().plan_install(&state, &id, &profile, mode)?;
            print_install_plan(&plan, verb);
            return Ok(());
        }

        let (pb, progress) = extraction_progress();
        let result = self.with_state_lock(|app, state| {
            let id = resolve_mod_arg(state, arg)?;
            app.mod_manager().install(state, &id, &profile, mode, Some(progress))
        });
        pb.finish_and_clear();
        let outcome = result?;

        print_install_outcome(&outcome, done, &profile);
        Ok(())
    }

    pub fn cmd_install_dir(
        &mut self,
        path: &Path,
        id: Option<&str>,
        profile: Option<&str>,
        no_overwrite: bool,
        dry_run: bool,
    ) -> Result<()> {
        let profile = self.profile_or_active(profile);

        if dry_run {
            let state = self.read_state()?;
            let plan = self
                .mod_manager()
                .plan_install_dir(&state, path, id, &profile, !no_overwrite)?;
            print_install_plan(&plan, "install");
            return Ok(());
        }

        let outcome = self.with_state_lock(|app, state| {
            app.mod_manager()
                .install_dir(state, path, id, &profile, !no_overwrite)
        })?;
        print_install_outcome(&outcome, "Installed", &profile);
        Ok(())
    }

    pub fn cmd_enable(&mut self, arg: &str, profile: Option<&str>) -> Result<()> {
        let profile = self.profile_or_active(profile);
        let (id, deployed) = self.with_state_lock(|app, state| {
            let id = resolve_mod_arg(state, arg)?;
            let deployed = app.mod_manager().enable(state, &id, &profile)?;
            Ok((id, deployed))
        })?;

        println!("Enabled '{}' in profile '{}'", id, profile);
        if let Some(path) = deployed {
            println!("  Deployed: {}", path.display());
        }
        Ok(())
    }

    pub fn cmd_disable(&mut self, arg: &str, profile: Option<&str>) -> Result<()> {
        let profile = self.profile_or_active(profile);
        let (id, undeployed) = self.with_state_lock(|app, state| {
            let id = resolve_mod_arg(state, arg)?;
            let undeployed = app.mod_manager().disable(state, &id, &profile)?;
            Ok((id, undeployed))
        })?;

        println!("Disabled '{}' in profile '{}'", id, profile);
        if undeployed {
            println!("  Removed from the game directory");
        }
        Ok(())
    }

    pub fn cmd_uninstall(&mut self, arg: &str, profile: Option<&str>, dry_run: bool) -> Result<()> {
        let profile = self.profile_or_active(profile);

        if dry_run {
            let state = self.read_state()?;
            let id = resolve_installed_arg(&state, arg, &profile)?;
            let plan = self.mod_manager().plan_uninstall(&state, &id, &profile)?;
            println!("Dry run: uninstall '{}' from profile '{}'", plan.mod_id, plan.profile);
            println!("{:-<60}", "");
            println!("Folder:   {}", plan.folder);
            match &plan.undeploy {
                Some(path) => println!("Undeploy: {}", path.display()),
                None => println!("Undeploy: no (not deployed)"),
            }
            match &plan.store {
                Some(path) => println!("Delete:   {}", path.display()),
                None => println!("Delete:   no store copy"),
            }
            return Ok(());
        }

        let (id, outcome) = self.with_state_lock(|app, state| {
            let id = resolve_installed_arg(state, arg, &profile)?;
            let outcome = app.mod_manager().uninstall(state, &id, &profile)?;
            Ok((id, outcome))
        })?;

        println!("Uninstalled '{}' from profile '{}'", id, profile);
        if outcome.undeployed {
            println!("  Removed from the game directory");
        }
        if outcome.store_removed {
            println!("  Deleted the store copy");
        }
        Ok(())
    }

    // ========== Inspection Commands ==========

    pub fn cmd_verify(&self, arg: &str, profile: Option<&str>, json: bool) -> Result<()> {
        let profile = self.profile_or_active(profile);
        let state = self.read_state()?;
        let id = resolve_mod_arg(&state, arg)?;
        let report = self.mod_manager().verify(&state, &id, &profile)?;

        if json {
            return print_json(&report);
        }

        println!("Verify '{}' ({})", report.mod_id, report.profile);
        println!("{:-<60}", "");
        println!("Folder:   {}", report.folder);
        println!("Store:    {}", report.store.display());
        println!("Deployed: {}", display_or_dash(report.deployed_path.as_deref()));
        println!(
            "Files:    {} .EXML, {} .MBIN, {} .pak",
            report.counts.exml, report.counts.mbin, report.counts.pak
        );
        println!("Health:   {}", report.health.as_str());
        for warning in &report.warnings {
            println!("Warning:  {}", warning);
        }
        Ok(())
    }

    pub fn cmd_installed(&self) -> Result<()> {
        let active = self.active_profile();
        let state = self.read_state()?;

        let rows: Vec<_> = state
            .installations()
            .filter(|(_, profile, pi)| *profile == active && pi.installed)
            .collect();
        if rows.is_empty() {
            println!("No mods installed in profile '{}'.", active);
            return Ok(());
        }

        println!("Installed in profile '{}':", active);
        println!("{:<30} {:<30} {:<8} Deployed", "ID", "Folder", "Enabled");
        println!("{:-<80}", "");
        for (id, _, pi) in rows {
            println!(
                "{:<30} {:<30} {:<8} {}",
                id,
                pi.folder,
                if pi.enabled { "yes" } else { "no" },
                if pi.is_deployed() { "yes" } else { "no" }
            );
        }
        Ok(())
    }

    pub fn cmd_info(&self, arg: &str, json: bool) -> Result<()> {
        let state = self.read_state()?;
        let id = resolve_mod_arg(&state, arg)?;
        if json {
            let info = mod_info(&self.paths, &state, &id)
                .with_context(|| format!("Unknown mod '{}'", id))?;
            return print_json(&info);
        }
        let rec = &state.mods[&id];

        println!("Mod Information");
        println!("{:-<40}", "");
        println!("ID:         {}", id);
        println!("Name:       {}", rec.display_name);
        println!("Origin:     {} {}", rec.origin.kind(), rec.origin.locator());
        println!("Archive:    {}", display_or_dash(rec.archive.as_deref()));
        println!("SHA-256:    {}", display_or_dash(rec.checksum.as_deref()));
        println!("Downloaded: {}", display_or_dash(rec.downloaded_at.as_deref()));
        println!("Health:     {}", rec.health.map(|h| h.as_str()).unwrap_or("-"));

        if rec.installations.is_empty() {
            println!("Profiles:   none");
        }
        for (profile, pi) in &rec.installations {
            println!("\nProfile '{}':", profile);
            println!("  Installed: {}", pi.installed);
            println!("  Enabled:   {}", pi.enabled);
            println!("  Folder:    {}", display_or_dash(Some(pi.folder.as_str())));
            println!("  Store:     {}", display_or_dash(Some(pi.store.as_str())));
            println!("  Deployed:  {}", display_or_dash(Some(pi.deployed_path.as_str())));
            println!("  Since:     {}", display_or_dash(pi.installed_at.as_deref()));
        }
        Ok(())
    }

    // ========== Profile Commands ==========

    pub fn cmd_profile_list(&self) -> Result<()> {
        let state = self.read_state()?;
        println!("Profiles:");
        println!("{:-<60}", "");
        for summary in self.profile_manager().list_profiles(&state) {
            println!(
                "  {}{}  ({} installed, {} enabled, {} deployed)",
                summary.name,
                if summary.active { " [active]" } else { "" },
                summary.installed,
                summary.enabled,
                summary.deployed
            );
        }
        Ok(())
    }

    pub fn cmd_profile_status(&self) -> Result<()> {
        let state = self.read_state()?;
        let summary = self.profile_manager().status(&state);
        println!("Active profile: {}", summary.name);
        println!("  Installed: {}", summary.installed);
        println!("  Enabled:   {}", summary.enabled);
        println!("  Deployed:  {}", summary.deployed);
        Ok(())
    }

    pub fn cmd_profile_use(&mut self, name: &str) -> Result<()> {
        let report = self.with_state_lock(|app, state| {
            let mut profiles = app.profile_manager();
            let result = profiles.switch_profile(state, name);
            app.config = profiles.config().clone();
            result
        })?;

        println!("Switched to profile '{}'", name);
        println!(
            "  {} undeployed, {} deployed, {} skipped",
            report.undeployed.len(),
            report.deployed.len(),
            report.skipped.len()
        );
        for id in &report.skipped {
            println!("  Skipped '{}' (store copy missing; reinstall it)", id);
        }
        Ok(())
    }

    pub fn cmd_profile_deploy(&mut self) -> Result<()> {
        let report = self.with_state_lock(|app, state| app.profile_manager().deploy_active(state))?;

        println!("Deployed profile '{}'", self.active_profile());
        for (id, path) in &report.deployed {
            println!("  {} -> {}", id, path.display());
        }
        for id in &report.skipped {
            println!("  Skipped '{}' (store copy missing; reinstall it)", id);
        }
        Ok(())
    }

    // ========== Settings Commands ==========

    pub fn cmd_set_path(&mut self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            bail!("Game path is not a directory: {}", path.display());
        }
        let path = fs::canonicalize(path)
            .with_context(|| format!("Failed to resolve {}", path.display()))?;

        let _lock = crate::lock::RepoLock::acquire(self.paths.root())?;
        self.config.game_path = Some(path.clone());
        self.config.save(&self.paths)?;
        println!("Game path set to {}", path.display());
        Ok(())
    }

    pub fn cmd_where(&self) -> Result<()> {
        println!("Repository: {}", self.paths.root().display());
        println!("Config:     {}", self.paths.config_file().display());
        println!("State:      {}", self.paths.state_file().display());
        println!("Log:        {}", self.paths.log_file().display());
        println!("Downloads:  {}", self.paths.downloads_dir().display());
        println!("Staging:    {}", self.paths.staging_dir().display());
        println!("Profiles:   {}", self.paths.profiles_dir().display());
        match self.config.target_dir() {
            Some(dir) => println!("Target:     {}", dir.display()),
            None => println!("Target:     (game path not set; use 'nmsmods set-path')"),
        }
        println!("Profile:    {}", self.active_profile());
        Ok(())
    }

    pub fn cmd_doctor(&self, json: bool) -> Result<()> {
        let state = self.read_state()?;
        let report = diagnose(&self.paths, &self.config, &state);
        if json {
            return print_json(&report);
        }

        println!("Repository: {}", report.root.display());
        println!("Downloads:  {}", report.downloads.display());
        println!("Staging:    {}", report.staging.display());
        println!("Profile:    {}", report.active_profile);
        match &report.game_path {
            Some(path) => println!(
                "Game path:  {} ({})",
                path.display(),
                if report.game_path_valid { "ok" } else { "missing" }
            ),
            None => println!("Game path:  not set (tip: nmsmods set-path <dir>)"),
        }
        if let Some(dir) = &report.target_dir {
            println!("MODS dir:   {}", dir.display());
        }

        println!("\nFolders in MODS:");
        if report.target_folders.is_empty() {
            println!("  (none)");
        }
        for folder in &report.target_folders {
            println!(
                "  {:<30} {}",
                folder.name,
                folder.owner.as_deref().unwrap_or("unmanaged")
            );
        }

        println!("\nTracked mods:");
        if report.downloads_rows.is_empty() {
            println!("  (none)");
        }
        for row in &report.downloads_rows {
            let archive = match (&row.archive, row.archive_present) {
                (None, _) => "(none)",
                (Some(_), true) => "present",
                (Some(_), false) => "MISSING",
            };
            let installed = if row.installed_in.is_empty() {
                "-".to_string()
            } else {
                row.installed_in.join(",")
            };
            println!("  {:<30} installed: {:<16} archive: {}", row.id, installed, archive);
        }

        println!("{:-<60}", "");
        if report.is_healthy() {
            println!("No problems found.");
        }
        for problem in &report.problems {
            println!("Problem: {}", problem);
        }
        Ok(())
    }

    // ========== Maintenance Commands ==========

    /// Forget state and scratch data. Deployed folders are left in place;
    /// `profile deploy` or a manual cleanup handles them.
    pub fn cmd_reset(&mut self, all: bool, keep_downloads: bool, dry_run: bool) -> Result<()> {
        let _lock = crate::lock::RepoLock::acquire(self.paths.root())?;
        let targets = reset_targets(&self.paths, all, keep_downloads);

        if dry_run {
            for path in &targets {
                println!("Dry run: would remove {}", path.display());
            }
            return Ok(());
        }

        for path in &targets {
            remove_path(path)?;
            tracing::info!("Removed {}", path.display());
        }
        self.paths.ensure_dirs()?;
        if all {
            self.config = crate::Config::default();
        }

        println!("Reset completed.");
        println!("  Folders already deployed to the game were left in place.");
        Ok(())
    }

    pub fn cmd_clean(&mut self, orphan_archives_too: bool, dry_run: bool) -> Result<()> {
        let removed = self.with_state_lock(|app, state| {
            let staging = app.paths.staging_dir();
            let orphans = if orphan_archives_too {
                orphan_archives(&app.paths, state)?
            } else {
                Vec::new()
            };

            if dry_run {
                println!("Dry run: would wipe {}", staging.display());
                for path in &orphans {
                    println!("Dry run: would delete {}", path.display());
                }
                return Ok(Vec::new());
            }

            reset_staging(&app.paths)?;
            for path in &orphans {
                fs::remove_file(path)
                    .with_context(|| format!("Failed to delete {}", path.display()))?;
                tracing::info!("Deleted orphan archive {}", path.display());
            }
            Ok(orphans)
        })?;

        if !dry_run {
            println!("Cleaned {}", self.paths.staging_dir().display());
            for path in &removed {
                println!("  Deleted {}", path.display());
            }
        }
        Ok(())
    }
}
