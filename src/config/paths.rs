//! Repository path layout
//!
//! Everything nmsmods owns lives under a single root (default `~/.nmsmods`):
//!
//! ```text
//! <root>/config.toml
//! <root>/state.json
//! <root>/lock
//! <root>/nmsmods.log
//! <root>/downloads/
//! <root>/staging/
//! <root>/profiles/<name>/mods/<folder>
//! ```

use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the repository root
pub const HOME_ENV: &str = "NMSMODS_HOME";

/// Paths of the mod repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    root: PathBuf,
}

/// Pick the root: explicit override, then the environment, then the user's
/// home directory.
fn choose_root(
    override_root: Option<PathBuf>,
    env_root: Option<PathBuf>,
    home: Option<PathBuf>,
) -> Option<PathBuf> {
    override_root
        .filter(|p| !p.as_os_str().is_empty())
        .or_else(|| env_root.filter(|p| !p.as_os_str().is_empty()))
        .or_else(|| home.map(|h| h.join(".nmsmods")))
}

impl Paths {
    /// Paths rooted at an explicit directory
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the root from `--home`, `NMSMODS_HOME`, or `~/.nmsmods`.
    pub fn resolve(home_override: Option<PathBuf>) -> Result<Self> {
        let env_root = std::env::var_os(HOME_ENV).map(PathBuf::from);
        let home = BaseDirs::new().map(|d| d.home_dir().to_path_buf());
        let root = choose_root(home_override, env_root, home)
            .context("Cannot determine home directory; pass --home or set NMSMODS_HOME")?;
        Ok(Self::at(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join("state.json")
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join("nmsmods.log")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    /// Disposable extraction area; safe to wipe while the lock is held
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    /// Store of a profile: `<root>/profiles/<name>/mods`
    pub fn profile_store_dir(&self, profile: &str) -> PathBuf {
        self.profiles_dir().join(profile).join("mods")
    }

    /// Store location of one folder, relative to the root as recorded in
    /// state (always `/`-separated)
    pub fn store_rel(&self, profile: &str, folder: &str) -> String {
        format!("profiles/{}/mods/{}", profile, folder)
    }

    /// Absolute path of a recorded location; absolute entries from older
    /// state files are returned unchanged.
    pub fn resolve_rel(&self, rel: &str) -> PathBuf {
        if Path::new(rel).is_absolute() {
            return PathBuf::from(rel);
        }
        rel.split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |acc, seg| acc.join(seg))
    }

    /// Path of a recorded location that must stay inside the root. Absolute
    /// entries, drive prefixes and `..` segments are refused.
    pub fn repo_path(&self, rel: &str) -> Result<PathBuf> {
        if rel.starts_with('/') || rel.starts_with('\\') || Path::new(rel).is_absolute() {
            bail!("Recorded path '{}' is absolute", rel);
        }
        let mut path = self.root.clone();
        for seg in rel.split(|c| c == '/' || c == '\\').filter(|s| !s.is_empty() && *s != ".") {
            if seg == ".." || seg.contains(':') {
                bail!("Recorded path '{}' escapes the repository", rel);
            }
            path.push(seg);
        }
        Ok(path)
    }

    /// Ensure the root, downloads, staging and profiles directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.downloads_dir(),
            self.staging_dir(),
            self.profiles_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_precedence() {
        let flag = Some(PathBuf::from("/flag"));
        let env = Some(PathBuf::from("/env"));
        let home = Some(PathBuf::from("/home/me"));

        assert_eq!(
            choose_root(flag, env.clone(), home.clone()),
            Some(PathBuf::from("/flag"))
        );
        assert_eq!(choose_root(None, env, home.clone()), Some(PathBuf::from("/env")));
        assert_eq!(
            choose_root(Some(PathBuf::new()), None, home),
            Some(PathBuf::from("/home/me/.nmsmods"))
        );
        assert_eq!(choose_root(None, None, None), None);
    }

    #[test]
    fn store_paths_round_trip() {
        let paths = Paths::at("/r");
        let rel = paths.store_rel("alt", "moda");
        assert_eq!(rel, "profiles/alt/mods/moda");
        assert_eq!(paths.resolve_rel(&rel), PathBuf::from("/r/profiles/alt/mods/moda"));
        assert_eq!(paths.resolve_rel(&rel), paths.profile_store_dir("alt").join("moda"));
    }

    #[test]
    fn repo_paths_stay_inside_the_root() {
        let paths = Paths::at("/r");
        assert_eq!(
            paths.repo_path("downloads/./a.zip").unwrap(),
            PathBuf::from("/r/downloads/a.zip")
        );
        assert_eq!(
            paths.repo_path("downloads\\a.zip").unwrap(),
            PathBuf::from("/r/downloads/a.zip")
        );
        for bad in ["downloads/../victim.txt", "/etc/passwd", "\\share\\x", "C:/x.zip", ".."] {
            assert!(paths.repo_path(bad).is_err(), "{bad}");
        }
    }
}
