//! Archive extraction sandbox
//!
//! Extraction always targets a disposable staging directory. A failure
//! part-way through leaves whatever was already written in place; callers
//! wipe the staging directory before reusing it.

use super::sanitize::clean_entry_path;
use crate::error::{Error, Quota, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Progress callback for extraction
/// Parameters: (current_entry, processed_count, total_count)
pub type ProgressCallback = Arc<dyn Fn(String, usize, usize) + Send + Sync>;

const GIB: u64 = 1024 * 1024 * 1024;

/// Resource quotas applied while extracting untrusted archives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractLimits {
    /// Maximum number of entries in one archive
    pub max_entries: u64,

    /// Maximum uncompressed size of a single entry
    pub max_entry_bytes: u64,

    /// Maximum uncompressed size of the whole archive
    pub max_total_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entries: 20_000,
            max_entry_bytes: 8 * GIB,
            max_total_bytes: 50 * GIB,
        }
    }
}

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Unknown,
}

impl ArchiveFormat {
    /// Detect format from file extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "zip" => Self::Zip,
            _ => Self::Unknown,
        }
    }

    /// Detect format from the leading magic bytes
    pub fn sniff(path: &Path) -> Result<Self> {
        let mut magic = [0u8; 4];
        let mut file = File::open(path).map_err(|e| Error::io("open archive", path, e))?;
        let read = file
            .read(&mut magic)
            .map_err(|e| Error::io("read archive", path, e))?;
        if read >= 2 && magic.starts_with(&[0x50, 0x4B]) {
            Ok(Self::Zip)
        } else {
            Ok(Self::Unknown)
        }
    }
}

/// Whether `path` looks like a supported archive by name
pub fn is_archive_file(path: &Path) -> bool {
    ArchiveFormat::from_path(path) != ArchiveFormat::Unknown
}

/// Summary of a completed extraction
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtractReport {
    pub entries: usize,
    pub files: usize,
    pub dirs: usize,
    pub bytes: u64,
}

/// Extract an archive into `dest`, enforcing `limits`
pub fn extract_archive(
    archive: &Path,
    dest: &Path,
    limits: &ExtractLimits,
    progress_callback: Option<ProgressCallback>,
) -> Result<ExtractReport> {
    let format = match ArchiveFormat::from_path(archive) {
        ArchiveFormat::Unknown => ArchiveFormat::sniff(archive)?,
        known => known,
    };

    fs::create_dir_all(dest).map_err(|e| Error::io("create directory", dest, e))?;

    match format {
        ArchiveFormat::Zip => extract_zip(archive, dest, limits, progress_callback),
        ArchiveFormat::Unknown => Err(Error::Archive {
            path: archive.to_path_buf(),
            source: zip::result::ZipError::InvalidArchive("unrecognized archive format".into()),
        }),
    }
}

/// Names and directory flags of every entry, without extracting
pub fn list_entries(archive: &Path) -> Result<Vec<(String, bool)>> {
    let mut zip = open_zip(archive)?;
    let mut entries = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip.by_index(i).map_err(|e| Error::Archive {
            path: archive.to_path_buf(),
            source: e,
        })?;
        entries.push((entry.name().to_string(), entry.is_dir()));
    }
    Ok(entries)
}

fn open_zip(archive: &Path) -> Result<zip::ZipArchive<File>> {
    let file = File::open(archive).map_err(|e| Error::io("open archive", archive, e))?;
    zip::ZipArchive::new(file).map_err(|e| Error::Archive {
        path: archive.to_path_buf(),
        source: e,
    })
}

fn is_symlink_mode(mode: u32) -> bool {
    mode & 0o170000 == 0o120000
}

/// Extract a ZIP archive
fn extract_zip(
    archive: &Path,
    dest: &Path,
    limits: &ExtractLimits,
    progress_callback: Option<ProgressCallback>,
) -> Result<ExtractReport> {
    let mut zip = open_zip(archive)?;
    let total = zip.len();

    if total as u64 > limits.max_entries {
        return Err(Error::QuotaExceeded {
            archive: archive.to_path_buf(),
            entry: String::new(),
            quota: Quota::EntryCount,
            limit: limits.max_entries,
            actual: total as u64,
        });
    }

    let mut report = ExtractReport::default();
    let mut declared_total: u64 = 0;

    for i in 0..total {
        let mut entry = zip.by_index(i).map_err(|e| Error::Archive {
            path: archive.to_path_buf(),
            source: e,
        })?;
        let entry_name = entry.name().to_string();
        let unsafe_entry = |reason: &'static str| Error::UnsafeEntry {
            archive: archive.to_path_buf(),
            entry: entry_name.clone(),
            reason,
        };

        if entry.unix_mode().is_some_and(is_symlink_mode) {
            return Err(unsafe_entry("symbolic link"));
        }

        let relative = clean_entry_path(&entry_name).map_err(unsafe_entry)?;

        if let Some(ref cb) = progress_callback {
            cb(entry_name.clone(), i + 1, total);
        }
        report.entries += 1;

        let Some(relative) = relative else {
            if entry.is_dir() {
                continue;
            }
            return Err(unsafe_entry("empty file name"));
        };
        let outpath = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&outpath).map_err(|e| Error::io("create directory", &outpath, e))?;
            report.dirs += 1;
            continue;
        }

        let declared = entry.size();
        if declared > limits.max_entry_bytes {
            return Err(quota(archive, &entry_name, Quota::EntrySize, limits.max_entry_bytes, declared));
        }
        declared_total = declared_total.saturating_add(declared);
        if declared_total > limits.max_total_bytes {
            return Err(quota(archive, &entry_name, Quota::TotalSize, limits.max_total_bytes, declared_total));
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io("create directory", parent, e))?;
        }

        let written = copy_capped(&mut entry, &outpath, limits, report.bytes)
            .map_err(|err| err.into_error(archive, &entry_name, limits, report.bytes))?;
        report.bytes += written;
        report.files += 1;
    }

    tracing::debug!(
        "Extracted {} entries ({} files, {} bytes) from {}",
        report.entries,
        report.files,
        report.bytes,
        archive.display()
    );

    Ok(report)
}

fn quota(archive: &Path, entry: &str, quota: Quota, limit: u64, actual: u64) -> Error {
    Error::QuotaExceeded {
        archive: archive.to_path_buf(),
        entry: entry.to_string(),
        quota,
        limit,
        actual,
    }
}

enum CopyError {
    Io(PathBuf, io::Error),
    Overflow(u64),
}

impl CopyError {
    fn into_error(self, archive: &Path, entry: &str, limits: &ExtractLimits, written_before: u64) -> Error {
        match self {
            CopyError::Io(path, e) => Error::io("write extracted file", path, e),
            CopyError::Overflow(copied) if copied > limits.max_entry_bytes => {
                quota(archive, entry, Quota::EntrySize, limits.max_entry_bytes, copied)
            }
            CopyError::Overflow(copied) => quota(
                archive,
                entry,
                Quota::TotalSize,
                limits.max_total_bytes,
                written_before.saturating_add(copied),
            ),
        }
    }
}

/// Stream `reader` into `outpath`, reading at most one byte past whichever
/// quota binds first so a lying header cannot slip past the limits.
fn copy_capped(
    reader: &mut impl Read,
    outpath: &Path,
    limits: &ExtractLimits,
    written_before: u64,
) -> std::result::Result<u64, CopyError> {
    let total_room = limits.max_total_bytes.saturating_sub(written_before);
    let cap = limits.max_entry_bytes.min(total_room);

    let mut outfile = File::create(outpath).map_err(|e| CopyError::Io(outpath.to_path_buf(), e))?;
    let mut limited = reader.take(cap.saturating_add(1));
    let copied = io::copy(&mut limited, &mut outfile).map_err(|e| CopyError::Io(outpath.to_path_buf(), e))?;

    if copied > cap {
        return Err(CopyError::Overflow(copied));
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        for (name, data) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, options).unwrap();
            } else {
                zip.start_file(*name, options).unwrap();
                zip.write_all(data).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(ArchiveFormat::from_path(Path::new("mod.zip")), ArchiveFormat::Zip);
        assert_eq!(ArchiveFormat::from_path(Path::new("mod.ZIP")), ArchiveFormat::Zip);
        assert_eq!(ArchiveFormat::from_path(Path::new("mod.pak")), ArchiveFormat::Unknown);
    }

    #[test]
    fn extracts_nested_structure() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("mod.zip");
        build_zip(
            &archive,
            &[
                ("Outer/", b""),
                ("Outer/Inner/file.EXML", b"<data/>"),
                ("Outer/Inner/sub/other.MBIN", b"mbin"),
            ],
        );

        let dest = tmp.path().join("staging");
        let report = extract_archive(&archive, &dest, &ExtractLimits::default(), None).unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(
            fs::read(dest.join("Outer/Inner/file.EXML")).unwrap(),
            b"<data/>"
        );
        assert!(dest.join("Outer/Inner/sub/other.MBIN").is_file());
    }

    #[test]
    fn sniffs_zip_without_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("download.bin");
        build_zip(&archive, &[("a.txt", b"a")]);

        let dest = tmp.path().join("out");
        extract_archive(&archive, &dest, &ExtractLimits::default(), None).unwrap();
        assert!(dest.join("a.txt").is_file());
    }

    #[test]
    fn traversal_entries_are_unsafe_and_write_nothing_outside() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["../escape.txt", "a/../../escape.txt", "/abs.txt", "C:/drive.txt"] {
            let archive = tmp.path().join("evil.zip");
            build_zip(&archive, &[(name, b"pwned")]);

            let dest = tmp.path().join("dest");
            let err = extract_archive(&archive, &dest, &ExtractLimits::default(), None).unwrap_err();
            assert!(matches!(err, Error::UnsafeEntry { .. }), "{name}: {err}");
            assert!(!tmp.path().join("escape.txt").exists());
            assert!(!dest.join("escape.txt").exists());
            fs::remove_dir_all(&dest).ok();
        }
    }

    #[test]
    fn symlink_entries_are_unsafe() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("link.zip");
        {
            let file = File::create(&archive).unwrap();
            let mut zip = zip::ZipWriter::new(file);
            zip.add_symlink("link", "/etc/passwd", SimpleFileOptions::default())
                .unwrap();
            zip.finish().unwrap();
        }

        let err = extract_archive(&archive, &tmp.path().join("d"), &ExtractLimits::default(), None)
            .unwrap_err();
        assert!(matches!(err, Error::UnsafeEntry { reason: "symbolic link", .. }));
    }

    #[test]
    fn total_quota_is_enforced() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("big.zip");
        build_zip(&archive, &[("a.bin", &[1u8; 600]), ("b.bin", &[2u8; 600])]);

        let limits = ExtractLimits {
            max_total_bytes: 1000,
            ..ExtractLimits::default()
        };
        let err = extract_archive(&archive, &tmp.path().join("d"), &limits, None).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { quota: Quota::TotalSize, .. }));
    }

    #[test]
    fn entry_quota_is_enforced() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("big.zip");
        build_zip(&archive, &[("a.bin", &[1u8; 64])]);

        let limits = ExtractLimits {
            max_entry_bytes: 63,
            ..ExtractLimits::default()
        };
        let err = extract_archive(&archive, &tmp.path().join("d"), &limits, None).unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded { quota: Quota::EntrySize, limit: 63, .. }
        ));
    }

    #[test]
    fn entry_count_quota_is_enforced() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("many.zip");
        build_zip(&archive, &[("a", b"1"), ("b", b"2"), ("c", b"3")]);

        let limits = ExtractLimits {
            max_entries: 2,
            ..ExtractLimits::default()
        };
        let err = extract_archive(&archive, &tmp.path().join("d"), &limits, None).unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded { quota: Quota::EntryCount, actual: 3, .. }
        ));
    }

    #[test]
    fn capped_copy_stops_one_byte_past_the_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out.bin");
        let limits = ExtractLimits {
            max_entry_bytes: 10,
            ..ExtractLimits::default()
        };

        let mut lying = io::repeat(7u8);
        match copy_capped(&mut lying, &out, &limits, 0) {
            Err(CopyError::Overflow(copied)) => assert_eq!(copied, 11),
            _ => panic!("expected overflow"),
        }
        assert_eq!(fs::metadata(&out).unwrap().len(), 11);
    }

    #[test]
    fn progress_reports_every_entry() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("mod.zip");
        build_zip(&archive, &[("a.txt", b"a"), ("b.txt", b"b")]);

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let cb: ProgressCallback = Arc::new(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        extract_archive(&archive, &tmp.path().join("d"), &ExtractLimits::default(), Some(cb))
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
