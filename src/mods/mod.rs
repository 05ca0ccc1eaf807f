//! Mod management - import, installation, and per-profile deployment

mod archive;
mod collision;
mod deploy;
mod health;
mod layout;
mod sanitize;

pub use archive::*;
pub use collision::*;
pub use deploy::*;
pub use health::*;
pub use layout::*;
pub use sanitize::*;

use crate::config::{Config, Paths};
use crate::profiles::validate_profile_name;
use crate::state::{timestamp, Health, ModRecord, Origin, ProfileInstallation, RepoState};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// How an install run treats an existing installation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// First install into the profile; refused if already installed
    Fresh,
    /// Replace the store copy of an existing installation
    Reinstall { overwrite: bool },
}

/// Result of importing an archive
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub mod_id: String,
    pub archive: PathBuf,
    pub checksum: String,
    /// An existing record was refreshed rather than created
    pub refreshed: bool,
}

/// Result of an install or reinstall
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub mod_id: String,
    pub folder: String,
    /// The archive's folder name clashed and was suffixed
    pub collided: bool,
    pub store: PathBuf,
    pub deployed_path: Option<PathBuf>,
    pub health: Health,
}

/// What an install would do, computed without extracting or writing
#[derive(Debug, Clone, Serialize)]
pub struct InstallPlan {
    pub mod_id: String,
    pub profile: String,
    /// Archive or directory the mod is installed from
    pub source: PathBuf,
    pub folder: String,
    pub collided: bool,
    pub store: PathBuf,
    pub replaces_store: bool,
    pub deploy_to: Option<PathBuf>,
}

/// What an uninstall would remove
#[derive(Debug, Clone, Serialize)]
pub struct UninstallPlan {
    pub mod_id: String,
    pub profile: String,
    pub folder: String,
    pub store: Option<PathBuf>,
    pub undeploy: Option<PathBuf>,
}

/// Result of an uninstall
#[derive(Debug, Clone, Default)]
pub struct UninstallOutcome {
    pub undeployed: bool,
    pub store_removed: bool,
}

/// Content check of an installed folder
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub mod_id: String,
    pub profile: String,
    pub folder: String,
    pub store: PathBuf,
    pub deployed_path: Option<String>,
    pub counts: ContentCounts,
    pub health: Health,
    pub warnings: Vec<String>,
}

/// Resolve a user argument to a mod id: either an exact id or a 1-based
/// index into the id-sorted listing.
pub fn resolve_mod_arg(state: &RepoState, arg: &str) -> Result<String> {
    let arg = arg.trim();
    if state.mods.contains_key(arg) {
        return Ok(arg.to_string());
    }
    if let Ok(index) = arg.parse::<usize>() {
        let ids = state.sorted_ids();
        return match index.checked_sub(1).and_then(|i| ids.get(i)) {
            Some(id) => Ok(id.to_string()),
            None => bail!("Index {} is out of range (1-{})", index, ids.len()),
        };
    }
    bail!("Unknown mod '{}'. Run `nmsmods downloads` to list tracked mods", arg)
}

/// Resolve an argument naming an installation in `profile`: a mod id, an
/// index, or the folder it was installed under. Folders nmsmods did not
/// install are refused.
pub fn resolve_installed_arg(state: &RepoState, arg: &str, profile: &str) -> Result<String> {
    if let Ok(id) = resolve_mod_arg(state, arg) {
        return Ok(id);
    }
    let folder = arg.trim().trim_end_matches(|c| c == '/' || c == '\\');
    let owner = state.mods.iter().find(|(_, rec)| {
        rec.installation(profile)
            .is_some_and(|pi| pi.installed && pi.folder.eq_ignore_ascii_case(folder))
    });
    match owner {
        Some((id, _)) => Ok(id.clone()),
        None => bail!(
            "'{}' is neither a tracked mod nor a folder installed in profile '{}'; only folders deployed by nmsmods can be uninstalled",
            arg,
            profile
        ),
    }
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to hash {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn record<'s>(state: &'s RepoState, id: &str) -> Result<&'s ModRecord> {
    state
        .mods
        .get(id)
        .with_context(|| format!("Unknown mod '{}'", id))
}

fn installed<'s>(state: &'s RepoState, id: &str, profile: &str) -> Result<&'s ProfileInstallation> {
    record(state, id)?
        .installation(profile)
        .filter(|pi| pi.installed)
        .with_context(|| format!("'{}' is not installed in profile '{}'", id, profile))
}

fn installed_mut<'s>(
    state: &'s mut RepoState,
    id: &str,
    profile: &str,
) -> Result<&'s mut ProfileInstallation> {
    state
        .mods
        .get_mut(id)
        .and_then(|r| r.installations.get_mut(profile))
        .filter(|pi| pi.installed)
        .with_context(|| format!("'{}' is not installed in profile '{}'", id, profile))
}

/// Replace `store` with a copy of `source`, swapping via hidden siblings so
/// an interrupted copy never leaves a half-written store behind.
fn replace_store(source: &Path, store: &Path) -> Result<()> {
    let parent = store
        .parent()
        .with_context(|| format!("Store {} has no parent", store.display()))?;
    let name = store
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let fresh = parent.join(format!(".{}.tmp-{}", name, uuid::Uuid::new_v4()));
    if let Err(e) = copy_dir(source, &fresh) {
        remove_dir_quietly(&fresh);
        return Err(e.into());
    }

    let old = if store.exists() {
        let old = parent.join(format!(".{}.old-{}", name, uuid::Uuid::new_v4()));
        if let Err(e) = fs::rename(store, &old) {
            remove_dir_quietly(&fresh);
            return Err(e).with_context(|| format!("Failed to move aside {}", store.display()));
        }
        Some(old)
    } else {
        None
    };

    if let Err(e) = fs::rename(&fresh, store) {
        remove_dir_quietly(&fresh);
        if let Some(old) = &old {
            if let Err(restore) = fs::rename(old, store) {
                tracing::warn!("Failed to restore {}: {}", store.display(), restore);
            }
        }
        return Err(e).with_context(|| format!("Failed to move new store into {}", store.display()));
    }

    if let Some(old) = old {
        remove_dir_quietly(&old);
    }
    Ok(())
}

/// Everything an install run needs, resolved before touching disk
struct InstallJob<'a> {
    id: &'a str,
    profile: &'a str,
    mode: InstallMode,
    /// Archive to extract, or directory to install from
    source: PathBuf,
    existing: Option<ProfileInstallation>,
}

impl<'a> InstallJob<'a> {
    fn new(
        state: &RepoState,
        id: &'a str,
        profile: &'a str,
        mode: InstallMode,
        source: PathBuf,
    ) -> Result<Self> {
        let existing = state
            .mods
            .get(id)
            .and_then(|r| r.installation(profile))
            .filter(|pi| pi.installed)
            .cloned();

        match (mode, &existing) {
            (InstallMode::Fresh, Some(_)) => bail!(
                "'{}' is already installed in profile '{}'; use reinstall",
                id,
                profile
            ),
            (InstallMode::Reinstall { .. }, None) => bail!(
                "'{}' is not installed in profile '{}'; use install",
                id,
                profile
            ),
            _ => {}
        }

        Ok(Self {
            id,
            profile,
            mode,
            source,
            existing,
        })
    }

    /// Fresh installs are enabled; reinstalls keep the current flag
    fn enabled(&self) -> bool {
        self.existing.as_ref().map_or(true, |pi| pi.enabled)
    }
}

/// Directory installs replace an existing installation of the same id
fn dir_install_mode(state: &RepoState, id: &str, profile: &str, overwrite: bool) -> InstallMode {
    if state.mods.get(id).is_some_and(|r| r.is_installed_in(profile)) {
        InstallMode::Reinstall { overwrite }
    } else {
        InstallMode::Fresh
    }
}

/// Mod id from an explicit `--id`, else derived from a file or directory name
fn mod_id_for(explicit: Option<&str>, name: &str) -> Result<String> {
    match explicit {
        Some(raw) => {
            let slug = slugify(raw);
            if slug.is_empty() {
                bail!("Invalid mod id '{}'", raw);
            }
            Ok(slug)
        }
        None => Ok(slug_from_url(name)),
    }
}

/// Mod manager handles import, installation and per-profile deployment
pub struct ModManager {
    paths: Paths,
    config: Config,
}

impl ModManager {
    pub fn new(paths: Paths, config: Config) -> Self {
        Self { paths, config }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn is_active(&self, profile: &str) -> bool {
        profile == self.config.active_profile()
    }

    fn archive_path(&self, record: &ModRecord, id: &str) -> Result<PathBuf> {
        let rel = record
            .archive
            .as_deref()
            .filter(|s| !s.is_empty())
            .with_context(|| format!("'{}' has no downloaded archive", id))?;
        let path = self.paths.resolve_rel(rel);
        if !path.is_file() {
            bail!("Archive for '{}' is missing: {}", id, path.display());
        }
        Ok(path)
    }

    /// Store location of an installation, recomputed from profile and folder
    fn store_path(&self, profile: &str, folder: &str) -> Result<PathBuf> {
        Ok(safe_join(&self.paths.profile_store_dir(profile), folder)?)
    }

    /// Copy an archive into `downloads/` and create or refresh its record.
    pub fn import_archive(
        &self,
        state: &mut RepoState,
        source: &Path,
        id: Option<&str>,
    ) -> Result<ImportOutcome> {
        if !source.is_file() {
            bail!("Archive not found: {}", source.display());
        }
        if ArchiveFormat::sniff(source)? != ArchiveFormat::Zip {
            bail!("{} is not a zip archive", source.display());
        }

        let mod_id = mod_id_for(id, &source.to_string_lossy())?;

        let downloads = self.paths.downloads_dir();
        fs::create_dir_all(&downloads)
            .with_context(|| format!("Failed to create {}", downloads.display()))?;
        let file_name = format!("{}.zip", mod_id);
        let dest = safe_join(&downloads, &file_name)?;

        let source_abs = fs::canonicalize(source)
            .with_context(|| format!("Failed to resolve {}", source.display()))?;
        if fs::canonicalize(&dest).ok().as_deref() != Some(source_abs.as_path()) {
            fs::copy(&source_abs, &dest).with_context(|| {
                format!("Failed to copy {} to {}", source.display(), dest.display())
            })?;
        }
        let checksum = sha256_file(&dest)?;

        let display_name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| mod_id.clone());
        let origin = Origin::Local(source_abs.to_string_lossy().into_owned());
        let refreshed = state.mods.contains_key(&mod_id);
        let record = state
            .mods
            .entry(mod_id.clone())
            .or_insert_with(|| ModRecord::new(origin.clone(), display_name));
        record.origin = origin;
        record.archive = Some(format!("downloads/{}", file_name));
        record.checksum = Some(checksum.clone());
        record.downloaded_at = Some(timestamp());

        tracing::info!("Imported {} as '{}' ({})", source.display(), mod_id, checksum);
        Ok(ImportOutcome {
            mod_id,
            archive: dest,
            checksum,
            refreshed,
        })
    }

    fn prepare_install<'a>(
        &self,
        state: &RepoState,
        id: &'a str,
        profile: &'a str,
        mode: InstallMode,
    ) -> Result<InstallJob<'a>> {
        validate_profile_name(profile)?;
        let archive = self.archive_path(record(state, id)?, id)?;
        InstallJob::new(state, id, profile, mode, archive)
    }

    /// Final folder for a job: the existing folder on reinstall, otherwise
    /// the sanitized candidate with collisions resolved. A folder that
    /// another mod already installs under in the profile is refused, since
    /// its store copy would be replaced.
    fn choose_folder(
        &self,
        state: &RepoState,
        job: &InstallJob<'_>,
        candidate: &str,
    ) -> Result<(String, bool)> {
        let (folder, collided) =
            match job.existing.as_ref().filter(|pi| !pi.folder.trim().is_empty()) {
                Some(pi) => (sanitize_folder_name(&pi.folder, job.id)?, false),
                None => {
                    let desired = sanitize_folder_name(candidate, job.id)?;
                    resolve_folder_collision(job.id, &desired, job.profile, state)
                }
            };

        if let Some(owner) = folder_owner(state, job.id, &folder, job.profile) {
            bail!(
                "Folder '{}' in profile '{}' belongs to '{}'; refusing to replace its store",
                folder,
                job.profile,
                owner
            );
        }
        Ok((folder, collided))
    }

    fn check_overwrite(job: &InstallJob<'_>, store: &Path) -> Result<()> {
        if job.mode == (InstallMode::Reinstall { overwrite: false }) && store.exists() {
            bail!(
                "Store {} already exists; rerun without --no-overwrite to replace it",
                store.display()
            );
        }
        Ok(())
    }

    /// Where the job deploys to, if anywhere
    fn deploy_target(&self, job: &InstallJob<'_>) -> Result<Option<PathBuf>> {
        if job.enabled() && self.is_active(job.profile) {
            Ok(Some(self.config.mods_dir()?))
        } else {
            Ok(None)
        }
    }

    fn plan_job(&self, state: &RepoState, job: &InstallJob<'_>, candidate: &str) -> Result<InstallPlan> {
        let (folder, collided) = self.choose_folder(state, job, candidate)?;
        let store = self.store_path(job.profile, &folder)?;
        Self::check_overwrite(job, &store)?;

        let deploy_to = if job.enabled() && self.is_active(job.profile) {
            self.config.target_dir().map(|t| t.join(&folder))
        } else {
            None
        };

        Ok(InstallPlan {
            mod_id: job.id.to_string(),
            profile: job.profile.to_string(),
            source: job.source.clone(),
            replaces_store: store.exists(),
            folder,
            collided,
            store,
            deploy_to,
        })
    }

    /// Preview an install or reinstall from archive entry names alone.
    pub fn plan_install(
        &self,
        state: &RepoState,
        id: &str,
        profile: &str,
        mode: InstallMode,
    ) -> Result<InstallPlan> {
        let job = self.prepare_install(state, id, profile, mode)?;
        let candidate = preview_archive_folder(&job.source, id)?;
        self.plan_job(state, &job, &candidate)
    }

    /// Extract, lay out, store and (when the profile is active) deploy a mod.
    ///
    /// Fresh installs are enabled. Reinstalls keep the existing folder name
    /// and enabled flag. Nothing is recorded unless every step succeeds.
    pub fn install(
        &self,
        state: &mut RepoState,
        id: &str,
        profile: &str,
        mode: InstallMode,
        progress: Option<ProgressCallback>,
    ) -> Result<InstallOutcome> {
        let job = self.prepare_install(state, id, profile, mode)?;
        let target = self.deploy_target(&job)?;

        let staging = safe_join(&self.paths.staging_dir(), id)?;
        remove_dir_quietly(&staging);
        fs::create_dir_all(&staging)
            .with_context(|| format!("Failed to create {}", staging.display()))?;

        let result = self.extract_and_install(state, &job, &staging, target.as_deref(), progress);
        remove_dir_quietly(&staging);
        result
    }

    fn extract_and_install(
        &self,
        state: &mut RepoState,
        job: &InstallJob<'_>,
        staging: &Path,
        target: Option<&Path>,
        progress: Option<ProgressCallback>,
    ) -> Result<InstallOutcome> {
        tracing::info!("Extracting {} to {}", job.source.display(), staging.display());
        let report = extract_archive(&job.source, staging, &self.config.extract, progress)?;
        tracing::debug!(
            "Extracted {} entries ({} files, {} bytes)",
            report.entries,
            report.files,
            report.bytes
        );

        let layout = resolve_layout(staging, job.id)?;
        self.finish_install(state, job, &layout, target)
    }

    /// Store the laid-out tree, deploy it when `target` is set, and record
    /// the installation.
    fn finish_install(
        &self,
        state: &mut RepoState,
        job: &InstallJob<'_>,
        layout: &InstallLayout,
        target: Option<&Path>,
    ) -> Result<InstallOutcome> {
        let (folder, collided) = self.choose_folder(state, job, &layout.folder)?;
        let store = self.store_path(job.profile, &folder)?;
        Self::check_overwrite(job, &store)?;
        let had_store = store.exists();

        replace_store(&layout.source, &store)?;
        let health = check_health(&store);

        let deployed_path = match target {
            Some(target) => match deploy(&store, target, &folder, job.id, job.profile) {
                Ok(path) => Some(path),
                Err(e) => {
                    if !had_store {
                        remove_dir_quietly(&store);
                    }
                    return Err(e.into());
                }
            },
            None => None,
        };

        let record = state
            .mods
            .get_mut(job.id)
            .with_context(|| format!("Unknown mod '{}'", job.id))?;
        record.health = Some(health);
        let previous_deploy = job
            .existing
            .as_ref()
            .map(|pi| pi.deployed_path.clone())
            .unwrap_or_default();
        record.installations.insert(
            job.profile.to_string(),
            ProfileInstallation {
                installed: true,
                enabled: job.enabled(),
                folder: folder.clone(),
                store: self.paths.store_rel(job.profile, &folder),
                deployed_path: deployed_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or(previous_deploy),
                installed_at: Some(timestamp()),
            },
        );

        tracing::info!(
            "Installed '{}' as '{}' in profile '{}' ({})",
            job.id,
            folder,
            job.profile,
            health.as_str()
        );
        Ok(InstallOutcome {
            mod_id: job.id.to_string(),
            folder,
            collided,
            store,
            deployed_path,
            health,
        })
    }

    /// Resolve an already extracted mod directory to `(mod id, directory)`.
    fn dir_source(source: &Path, id: Option<&str>) -> Result<(String, PathBuf)> {
        if !source.is_dir() {
            bail!("Not a directory: {}", source.display());
        }
        let source = fs::canonicalize(source)
            .with_context(|| format!("Failed to resolve {}", source.display()))?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok((mod_id_for(id, &name)?, source))
    }

    /// Preview [`ModManager::install_dir`] without writing anything.
    pub fn plan_install_dir(
        &self,
        state: &RepoState,
        source: &Path,
        id: Option<&str>,
        profile: &str,
        overwrite: bool,
    ) -> Result<InstallPlan> {
        validate_profile_name(profile)?;
        let (mod_id, source) = Self::dir_source(source, id)?;
        let mode = dir_install_mode(state, &mod_id, profile, overwrite);
        let job = InstallJob::new(state, &mod_id, profile, mode, source)?;
        let layout = resolve_layout(&job.source, &mod_id)?;
        self.plan_job(state, &job, &layout.folder)
    }

    /// Install a mod from an already extracted directory.
    ///
    /// The directory is laid out the same way an extracted archive is. A mod
    /// already installed under the same id in `profile` is replaced in place
    /// unless `overwrite` is false. New records get a local origin pointing
    /// at the directory and no archive.
    pub fn install_dir(
        &self,
        state: &mut RepoState,
        source: &Path,
        id: Option<&str>,
        profile: &str,
        overwrite: bool,
    ) -> Result<InstallOutcome> {
        validate_profile_name(profile)?;
        let (mod_id, source) = Self::dir_source(source, id)?;

        let created = !state.mods.contains_key(&mod_id);
        if created {
            let display_name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| mod_id.clone());
            let origin = Origin::Local(source.to_string_lossy().into_owned());
            state
                .mods
                .insert(mod_id.clone(), ModRecord::new(origin, display_name));
        }

        let result = self.install_dir_as(state, &mod_id, &source, profile, overwrite);
        if created && result.is_err() {
            state.mods.remove(&mod_id);
        }
        result
    }

    fn install_dir_as(
        &self,
        state: &mut RepoState,
        id: &str,
        source: &Path,
        profile: &str,
        overwrite: bool,
    ) -> Result<InstallOutcome> {
        let mode = dir_install_mode(state, id, profile, overwrite);
        let job = InstallJob::new(state, id, profile, mode, source.to_path_buf())?;
        let target = self.deploy_target(&job)?;
        let layout = resolve_layout(source, id)?;
        self.finish_install(state, &job, &layout, target.as_deref())
    }

    /// Mark an installation enabled, deploying it when `profile` is active.
    pub fn enable(&self, state: &mut RepoState, id: &str, profile: &str) -> Result<Option<PathBuf>> {
        let pi = installed(state, id, profile)?.clone();

        let deployed = if self.is_active(profile) {
            if pi.store.is_empty() {
                bail!(
                    "'{}' has no store copy in profile '{}'; reinstall it first",
                    id,
                    profile
                );
            }
            let target = self.config.mods_dir()?;
            let store = self.store_path(profile, &pi.folder)?;
            Some(deploy(&store, &target, &pi.folder, id, profile)?)
        } else {
            None
        };

        let pi = installed_mut(state, id, profile)?;
        pi.enabled = true;
        if let Some(path) = &deployed {
            pi.deployed_path = path.to_string_lossy().into_owned();
        }
        Ok(deployed)
    }

    /// Mark an installation disabled, undeploying it if deployed.
    /// Returns whether anything was undeployed.
    pub fn disable(&self, state: &mut RepoState, id: &str, profile: &str) -> Result<bool> {
        let pi = installed(state, id, profile)?.clone();
        if pi.is_deployed() {
            undeploy_path(Path::new(&pi.deployed_path), id, profile)?;
        }

        let entry = installed_mut(state, id, profile)?;
        entry.enabled = false;
        entry.deployed_path.clear();
        Ok(pi.is_deployed())
    }

    pub fn plan_uninstall(&self, state: &RepoState, id: &str, profile: &str) -> Result<UninstallPlan> {
        let pi = installed(state, id, profile)?;
        let store = if pi.folder.is_empty() {
            None
        } else {
            Some(self.store_path(profile, &pi.folder)?).filter(|p| p.exists())
        };
        Ok(UninstallPlan {
            mod_id: id.to_string(),
            profile: profile.to_string(),
            folder: pi.folder.clone(),
            store,
            undeploy: Some(PathBuf::from(&pi.deployed_path)).filter(|_| pi.is_deployed()),
        })
    }

    /// Undeploy, delete the store copy, and mark the installation removed.
    pub fn uninstall(&self, state: &mut RepoState, id: &str, profile: &str) -> Result<UninstallOutcome> {
        let plan = self.plan_uninstall(state, id, profile)?;
        let mut outcome = UninstallOutcome::default();

        if let Some(deployed) = &plan.undeploy {
            undeploy_path(deployed, id, profile)?;
            installed_mut(state, id, profile)?.deployed_path.clear();
            outcome.undeployed = true;
        }
        if let Some(store) = &plan.store {
            fs::remove_dir_all(store)
                .with_context(|| format!("Failed to remove {}", store.display()))?;
            outcome.store_removed = true;
        }

        let pi = installed_mut(state, id, profile)?;
        pi.installed = false;
        pi.enabled = false;
        pi.deployed_path.clear();

        tracing::info!("Uninstalled '{}' from profile '{}'", id, profile);
        Ok(outcome)
    }

    /// Forget a mod that is not installed anywhere, optionally deleting its
    /// archive. Returns the deleted archive path.
    pub fn remove(&self, state: &mut RepoState, id: &str, delete_archive: bool) -> Result<Option<PathBuf>> {
        let rec = record(state, id)?;
        let profiles: Vec<&str> = rec
            .installations
            .iter()
            .filter(|(_, pi)| pi.installed)
            .map(|(name, _)| name.as_str())
            .collect();
        if !profiles.is_empty() {
            bail!(
                "'{}' is installed in profile(s) {}; uninstall it first",
                id,
                profiles.join(", ")
            );
        }

        let archive = rec.archive.clone();
        state.mods.remove(id);

        let Some(rel) = archive.filter(|_| delete_archive) else {
            return Ok(None);
        };
        let shared = state
            .mods
            .values()
            .any(|r| r.archive.as_deref() == Some(rel.as_str()));
        let path = match self.paths.repo_path(&rel) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("Not deleting archive of '{}': {:#}", id, e);
                return Ok(None);
            }
        };
        if shared || !path.starts_with(self.paths.downloads_dir()) || !path.is_file() {
            return Ok(None);
        }

        fs::remove_file(&path).with_context(|| format!("Failed to delete {}", path.display()))?;
        tracing::info!("Removed '{}' and deleted {}", id, path.display());
        Ok(Some(path))
    }

    /// Count game files in an installation's store copy.
    pub fn verify(&self, state: &RepoState, id: &str, profile: &str) -> Result<VerifyReport> {
        let pi = installed(state, id, profile)?;
        let store = self.store_path(profile, &pi.folder)?;
        if !store.is_dir() {
            bail!("Store copy of '{}' is missing: {}", id, store.display());
        }

        let counts = ContentCounts::scan(&store);
        let mut warnings = Vec::new();
        if counts.pak > 0 {
            warnings.push(format!(
                "{} .pak file(s) found; packed mods are ignored by current game versions",
                counts.pak
            ));
        }
        if counts.exml + counts.mbin == 0 {
            warnings.push("no .EXML or .MBIN files found".to_string());
        }

        Ok(VerifyReport {
            mod_id: id.to_string(),
            profile: profile.to_string(),
            folder: pi.folder.clone(),
            store,
            deployed_path: Some(pi.deployed_path.clone()).filter(|p| !p.is_empty()),
            health: counts.health(),
            counts,
            warnings,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use crate::state::DEFAULT_PROFILE;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    pub(crate) fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    pub(crate) struct Sandbox {
        pub _tmp: tempfile::TempDir,
        pub manager: ModManager,
        pub state: RepoState,
        pub mods_dir: PathBuf,
        pub inbox: PathBuf,
    }

    pub(crate) fn sandbox(active: &str) -> Sandbox {
        let tmp = tempfile::tempdir().unwrap();
        let game = tmp.path().join("game");
        fs::create_dir_all(&game).unwrap();
        let inbox = tmp.path().join("inbox");
        fs::create_dir_all(&inbox).unwrap();

        let paths = Paths::at(tmp.path().join("repo"));
        paths.ensure_dirs().unwrap();
        let config = Config {
            game_path: Some(game.clone()),
            active_profile: Some(active.to_string()),
            ..Config::default()
        };
        let mods_dir = fs::canonicalize(&game).unwrap().join("GAMEDATA/MODS");
        Sandbox {
            manager: ModManager::new(paths, config),
            state: RepoState::new(),
            mods_dir,
            inbox,
            _tmp: tmp,
        }
    }

    impl Sandbox {
        pub(crate) fn import(&mut self, file: &str, entries: &[(&str, &[u8])]) -> String {
            let path = self.inbox.join(file);
            build_zip(&path, entries);
            self.manager
                .import_archive(&mut self.state, &path, None)
                .unwrap()
                .mod_id
        }

        pub(crate) fn install(&mut self, id: &str, profile: &str) -> InstallOutcome {
            self.manager
                .install(&mut self.state, id, profile, InstallMode::Fresh, None)
                .unwrap()
        }
    }

    #[test]
    fn import_records_local_origin_and_checksum() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let id = sb.import("Better Stars.zip", &[("Stars/a.EXML", b"x")]);
        assert_eq!(id, "better-stars");

        let rec = &sb.state.mods[&id];
        assert!(matches!(rec.origin, Origin::Local(_)));
        assert_eq!(rec.archive.as_deref(), Some("downloads/better-stars.zip"));
        assert_eq!(rec.checksum.as_ref().map(String::len), Some(64));
        assert!(sb.manager.paths().downloads_dir().join("better-stars.zip").is_file());
    }

    #[test]
    fn install_deploys_and_records() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let id = sb.import("moda.zip", &[("Outer/ModA/GCDATA/a.EXML", b"<x/>")]);

        let outcome = sb.install(&id, DEFAULT_PROFILE);
        assert_eq!(outcome.folder, "moda");
        assert_eq!(outcome.health, Health::Ok);
        let deployed = outcome.deployed_path.unwrap();
        assert_eq!(deployed, sb.mods_dir.join("moda"));
        assert!(deployed.join("GCDATA/a.EXML").is_file());
        assert_eq!(read_marker(&deployed).unwrap().tag, "nmsmods:moda:default");

        let pi = sb.state.mods[&id].installation(DEFAULT_PROFILE).unwrap();
        assert!(pi.installed && pi.enabled);
        assert_eq!(pi.store, "profiles/default/mods/moda");
        assert_eq!(pi.deployed_path, deployed.to_string_lossy());
        assert!(sb.manager.paths().resolve_rel(&pi.store).join("GCDATA/a.EXML").is_file());
        assert!(!sb.manager.paths().staging_dir().join(&id).exists());
    }

    #[test]
    fn second_install_is_refused() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let id = sb.import("moda.zip", &[("ModA/a.EXML", b"x")]);
        sb.install(&id, DEFAULT_PROFILE);

        let err = sb
            .manager
            .install(&mut sb.state, &id, DEFAULT_PROFILE, InstallMode::Fresh, None)
            .unwrap_err();
        assert!(err.to_string().contains("reinstall"));
    }

    #[test]
    fn same_folder_in_one_profile_is_disambiguated() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let a = sb.import("first.zip", &[("Foo/a.EXML", b"a")]);
        let b = sb.import("second.zip", &[("Foo/b.EXML", b"b")]);

        let first = sb.install(&a, DEFAULT_PROFILE);
        let second = sb.install(&b, DEFAULT_PROFILE);
        assert_eq!(first.folder, "foo");
        assert!(second.collided);
        assert_eq!(second.folder, "foo__second");
        assert!(sb.mods_dir.join("foo/a.EXML").is_file());
        assert!(sb.mods_dir.join("foo__second/b.EXML").is_file());
    }

    #[test]
    fn suffixed_folder_never_replaces_another_mods_store() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let x = sb.import("x.zip", &[("Foo-B/x.EXML", b"x")]);
        let c = sb.import("c.zip", &[("Foo/c.EXML", b"c")]);
        let b = sb.import("b.zip", &[("Foo/b.EXML", b"b")]);

        assert_eq!(sb.install(&x, DEFAULT_PROFILE).folder, "foo-b");
        assert_eq!(sb.install(&c, DEFAULT_PROFILE).folder, "foo");
        let third = sb.install(&b, DEFAULT_PROFILE);
        assert!(third.collided);
        assert_eq!(third.folder, "foo__b");

        let store_x = sb.manager.paths().profile_store_dir(DEFAULT_PROFILE).join("foo-b");
        assert!(store_x.join("x.EXML").is_file());
        assert!(!store_x.join("b.EXML").exists());
        assert_eq!(
            read_marker(&sb.mods_dir.join("foo-b")).unwrap().tag,
            "nmsmods:x:default"
        );
        assert!(sb.mods_dir.join("foo__b/b.EXML").is_file());

        let mut folders: Vec<String> = sb
            .state
            .mods
            .values()
            .filter_map(|r| r.installation(DEFAULT_PROFILE))
            .map(|pi| pi.folder.to_ascii_lowercase())
            .collect();
        folders.sort();
        folders.dedup();
        assert_eq!(folders.len(), 3);
    }

    #[test]
    fn install_refuses_a_folder_owned_by_another_mod() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let a = sb.import("a.zip", &[("Foo/a.EXML", b"a")]);
        let b = sb.import("b.zip", &[("Bar/b.EXML", b"b")]);
        sb.install(&a, DEFAULT_PROFILE);
        sb.install(&b, DEFAULT_PROFILE);
        sb.state
            .mods
            .get_mut(&b)
            .and_then(|r| r.installations.get_mut(DEFAULT_PROFILE))
            .unwrap()
            .folder = "FOO".into();

        let err = sb
            .manager
            .install(
                &mut sb.state,
                &b,
                DEFAULT_PROFILE,
                InstallMode::Reinstall { overwrite: true },
                None,
            )
            .unwrap_err();
        assert!(err.to_string().contains("belongs to 'a'"));
        let store = sb.manager.paths().profile_store_dir(DEFAULT_PROFILE).join("foo");
        assert!(store.join("a.EXML").is_file());
        assert!(!store.join("b.EXML").exists());
    }

    #[test]
    fn dry_run_plan_matches_install_without_side_effects() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let id = sb.import("wrapped.zip", &[("A/B/payload.MBIN", b"m")]);
        let before = sb.state.clone();

        let plan = sb
            .manager
            .plan_install(&sb.state, &id, DEFAULT_PROFILE, InstallMode::Fresh)
            .unwrap();
        assert_eq!(plan.folder, "b");
        assert_eq!(plan.deploy_to, Some(sb.manager.config().target_dir().unwrap().join("b")));
        assert_eq!(sb.state, before);
        assert!(!plan.store.exists());
        assert!(!sb.mods_dir.exists());

        let outcome = sb.install(&id, DEFAULT_PROFILE);
        assert_eq!(outcome.folder, plan.folder);
        assert_eq!(outcome.store, plan.store);
    }

    #[test]
    fn foreign_folder_aborts_install_cleanly() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let id = sb.import("moda.zip", &[("ModA/a.EXML", b"x")]);
        fs::create_dir_all(sb.mods_dir.join("moda")).unwrap();
        fs::write(sb.mods_dir.join("moda/user.EXML"), b"mine").unwrap();
        let before = sb.state.clone();

        let err = sb
            .manager
            .install(&mut sb.state, &id, DEFAULT_PROFILE, InstallMode::Fresh, None)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::ForeignOrUnmanaged { .. })
        ));
        assert_eq!(sb.state, before);
        assert!(sb.mods_dir.join("moda/user.EXML").is_file());
        assert!(!sb.manager.paths().profile_store_dir(DEFAULT_PROFILE).join("moda").exists());
    }

    #[test]
    fn reinstall_keeps_folder_and_enabled_flag() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let id = sb.import("moda.zip", &[("ModA/a.EXML", b"v1")]);
        sb.install(&id, DEFAULT_PROFILE);
        sb.manager.disable(&mut sb.state, &id, DEFAULT_PROFILE).unwrap();

        let path = sb.inbox.join("moda.zip");
        build_zip(&path, &[("Renamed/a.EXML", b"v2")]);
        sb.manager.import_archive(&mut sb.state, &path, None).unwrap();

        let err = sb
            .manager
            .install(
                &mut sb.state,
                &id,
                DEFAULT_PROFILE,
                InstallMode::Reinstall { overwrite: false },
                None,
            )
            .unwrap_err();
        assert!(err.to_string().contains("--no-overwrite"));

        let outcome = sb
            .manager
            .install(
                &mut sb.state,
                &id,
                DEFAULT_PROFILE,
                InstallMode::Reinstall { overwrite: true },
                None,
            )
            .unwrap();
        assert_eq!(outcome.folder, "moda");
        assert!(outcome.deployed_path.is_none());
        assert_eq!(fs::read(outcome.store.join("a.EXML")).unwrap(), b"v2");
        let pi = sb.state.mods[&id].installation(DEFAULT_PROFILE).unwrap();
        assert!(!pi.enabled);
        assert!(!sb.mods_dir.join("moda").exists());
    }

    #[test]
    fn disable_enable_uninstall_cycle() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let id = sb.import("moda.zip", &[("ModA/a.EXML", b"x")]);
        sb.install(&id, DEFAULT_PROFILE);
        let dest = sb.mods_dir.join("moda");

        assert!(sb.manager.disable(&mut sb.state, &id, DEFAULT_PROFILE).unwrap());
        assert!(!dest.exists());
        assert_eq!(
            sb.manager.enable(&mut sb.state, &id, DEFAULT_PROFILE).unwrap(),
            Some(dest.clone())
        );
        assert!(dest.is_dir());

        let outcome = sb.manager.uninstall(&mut sb.state, &id, DEFAULT_PROFILE).unwrap();
        assert!(outcome.undeployed && outcome.store_removed);
        assert!(!dest.exists());
        let pi = sb.state.mods[&id].installation(DEFAULT_PROFILE).unwrap();
        assert!(!pi.installed && !pi.enabled && pi.deployed_path.is_empty());
    }

    #[test]
    fn remove_requires_uninstall_first() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let id = sb.import("moda.zip", &[("ModA/a.EXML", b"x")]);
        sb.install(&id, DEFAULT_PROFILE);

        assert!(sb.manager.remove(&mut sb.state, &id, true).is_err());
        sb.manager.uninstall(&mut sb.state, &id, DEFAULT_PROFILE).unwrap();

        let deleted = sb.manager.remove(&mut sb.state, &id, true).unwrap().unwrap();
        assert!(!deleted.exists());
        assert!(!sb.state.mods.contains_key(&id));
    }

    #[test]
    fn remove_never_deletes_outside_downloads() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let id = sb.import("moda.zip", &[("ModA/a.EXML", b"x")]);
        let victim = sb.manager.paths().root().join("victim.txt");
        fs::write(&victim, b"keep").unwrap();
        sb.state.mods.get_mut(&id).unwrap().archive = Some("downloads/../victim.txt".into());

        assert_eq!(sb.manager.remove(&mut sb.state, &id, true).unwrap(), None);
        assert!(!sb.state.mods.contains_key(&id));
        assert!(victim.is_file());

        let id = sb.import("modb.zip", &[("ModB/b.EXML", b"x")]);
        sb.state.mods.get_mut(&id).unwrap().archive =
            Some(victim.to_string_lossy().into_owned());
        assert_eq!(sb.manager.remove(&mut sb.state, &id, true).unwrap(), None);
        assert!(victim.is_file());
    }

    #[test]
    fn install_dir_stores_deploys_and_records_local_origin() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let src = sb.inbox.join("Better Skies");
        fs::create_dir_all(src.join("Skies/GCDATA")).unwrap();
        fs::write(src.join("Skies/GCDATA/sky.EXML"), b"<x/>").unwrap();
        fs::write(src.join("Skies/readme.txt"), b"hi").unwrap();

        let plan = sb
            .manager
            .plan_install_dir(&sb.state, &src, None, DEFAULT_PROFILE, true)
            .unwrap();
        assert_eq!(plan.mod_id, "better-skies");
        assert_eq!(plan.folder, "skies");
        assert!(sb.state.mods.is_empty());

        let outcome = sb
            .manager
            .install_dir(&mut sb.state, &src, None, DEFAULT_PROFILE, true)
            .unwrap();
        assert_eq!(outcome.mod_id, "better-skies");
        assert_eq!(outcome.folder, "skies");
        assert_eq!(outcome.store, plan.store);
        assert!(sb.mods_dir.join("skies/GCDATA/sky.EXML").is_file());
        assert!(src.join("Skies/GCDATA/sky.EXML").is_file());

        let rec = &sb.state.mods["better-skies"];
        assert!(matches!(rec.origin, Origin::Local(_)));
        assert!(rec.archive.is_none());
        assert!(rec.is_installed_in(DEFAULT_PROFILE));
    }

    #[test]
    fn install_dir_overwrites_unless_told_not_to() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let src = sb.inbox.join("moda");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.EXML"), b"v1").unwrap();
        sb.manager
            .install_dir(&mut sb.state, &src, Some("Mod A"), DEFAULT_PROFILE, true)
            .unwrap();

        fs::write(src.join("a.EXML"), b"v2").unwrap();
        let err = sb
            .manager
            .install_dir(&mut sb.state, &src, Some("Mod A"), DEFAULT_PROFILE, false)
            .unwrap_err();
        assert!(err.to_string().contains("--no-overwrite"));
        assert_eq!(fs::read(sb.mods_dir.join("mod-a/a.EXML")).unwrap(), b"v1");

        let outcome = sb
            .manager
            .install_dir(&mut sb.state, &src, Some("Mod A"), DEFAULT_PROFILE, true)
            .unwrap();
        assert_eq!(outcome.mod_id, "mod-a");
        assert_eq!(fs::read(sb.mods_dir.join("mod-a/a.EXML")).unwrap(), b"v2");
    }

    #[test]
    fn failed_install_dir_leaves_no_record() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let src = sb.inbox.join("moda");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.EXML"), b"x").unwrap();
        fs::create_dir_all(sb.mods_dir.join("moda")).unwrap();

        assert!(sb
            .manager
            .install_dir(&mut sb.state, &src, None, DEFAULT_PROFILE, true)
            .is_err());
        assert!(sb.state.mods.is_empty());
        assert!(sb
            .manager
            .install_dir(&mut sb.state, &sb.inbox.join("missing"), None, DEFAULT_PROFILE, true)
            .is_err());
    }

    #[test]
    fn installed_args_resolve_by_folder_name() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let a = sb.import("first.zip", &[("Foo/a.EXML", b"a")]);
        let b = sb.import("second.zip", &[("Foo/b.EXML", b"b")]);
        sb.install(&a, DEFAULT_PROFILE);
        sb.install(&b, DEFAULT_PROFILE);

        assert_eq!(resolve_installed_arg(&sb.state, "first", DEFAULT_PROFILE).unwrap(), a);
        assert_eq!(resolve_installed_arg(&sb.state, "FOO", DEFAULT_PROFILE).unwrap(), a);
        assert_eq!(
            resolve_installed_arg(&sb.state, "foo__second/", DEFAULT_PROFILE).unwrap(),
            b
        );
        assert!(resolve_installed_arg(&sb.state, "foo", "alt").is_err());
        assert!(resolve_installed_arg(&sb.state, "SomeUserMod", DEFAULT_PROFILE).is_err());
    }

    #[test]
    fn verify_counts_store_content() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let id = sb.import("moda.zip", &[("ModA/a.EXML", b"x"), ("ModA/old.pak", b"p")]);
        sb.install(&id, DEFAULT_PROFILE);

        let report = sb.manager.verify(&sb.state, &id, DEFAULT_PROFILE).unwrap();
        assert_eq!(report.counts, ContentCounts { exml: 1, mbin: 0, pak: 1 });
        assert_eq!(report.health, Health::Ok);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn mod_args_resolve_by_id_or_index() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        sb.import("beta.zip", &[("B/b.EXML", b"x")]);
        sb.import("alpha.zip", &[("A/a.EXML", b"x")]);

        assert_eq!(resolve_mod_arg(&sb.state, "beta").unwrap(), "beta");
        assert_eq!(resolve_mod_arg(&sb.state, "1").unwrap(), "alpha");
        assert_eq!(resolve_mod_arg(&sb.state, "2").unwrap(), "beta");
        assert!(resolve_mod_arg(&sb.state, "0").is_err());
        assert!(resolve_mod_arg(&sb.state, "3").is_err());
        assert!(resolve_mod_arg(&sb.state, "gamma").is_err());
    }

    #[test]
    fn installing_into_inactive_profile_does_not_deploy() {
        let mut sb = sandbox(DEFAULT_PROFILE);
        let id = sb.import("moda.zip", &[("ModA/a.EXML", b"x")]);

        let outcome = sb.install(&id, "alt");
        assert!(outcome.deployed_path.is_none());
        assert!(!sb.mods_dir.join("moda").exists());
        let pi = sb.state.mods[&id].installation("alt").unwrap();
        assert!(pi.installed && pi.enabled && pi.deployed_path.is_empty());
    }
}
