//! Post-install content check

use crate::state::Health;
use serde::Serialize;
use std::path::Path;
use walkdir::WalkDir;

/// Game file counts found in an installed folder
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContentCounts {
    pub exml: usize,
    pub mbin: usize,
    pub pak: usize,
}

impl ContentCounts {
    /// Walk `dir` and count files by extension (case-insensitive).
    pub fn scan(dir: &Path) -> Self {
        let mut counts = Self::default();
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = entry
                .path()
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase());
            match ext.as_deref() {
                Some("exml") => counts.exml += 1,
                Some("mbin") => counts.mbin += 1,
                Some("pak") => counts.pak += 1,
                _ => {}
            }
        }
        counts
    }

    /// The game loads loose EXML/MBIN files from MODS; anything else is
    /// suspicious.
    pub fn health(&self) -> Health {
        if self.exml + self.mbin > 0 {
            Health::Ok
        } else {
            Health::Warning
        }
    }
}

pub fn check_health(dir: &Path) -> Health {
    let counts = ContentCounts::scan(dir);
    let health = counts.health();
    if health == Health::Warning {
        tracing::warn!(
            "{} contains no .EXML or .MBIN files ({} .pak)",
            dir.display(),
            counts.pak
        );
    }
    health
}
