//! Best-effort file cleanup.
//!
//! A file that cannot be removed (typically one held open by another
//! process) is recorded as a [`ContourError::PartialCleanup`] and logged;
//! the remaining files are still processed.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use contourkit_shared::ContourError;

/// Outcome of a cleanup pass.
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Files removed.
    pub files_deleted: usize,
    /// Directories removed after being emptied.
    pub dirs_removed: usize,
    /// Per-item failures. Never fatal.
    pub failures: Vec<ContourError>,
}

impl CleanupReport {
    fn fail(&mut self, path: &Path, err: impl ToString) {
        let err = ContourError::partial_cleanup(path, err.to_string());
        warn!(error = %err, "cleanup item failed");
        self.failures.push(err);
    }

    /// Whether every item was removed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Remove every file and subdirectory below `path`, keeping `path` itself.
///
/// A missing folder is not an error; the report is simply empty.
pub fn clear_folder_contents(path: &Path) -> CleanupReport {
    let mut report = CleanupReport::default();

    if !path.exists() {
        debug!(?path, "folder not found, nothing to clear");
        return report;
    }

    clear_dir(path, &mut report);
    info!(
        ?path,
        files = report.files_deleted,
        failures = report.failures.len(),
        "folder cleared"
    );
    report
}

fn clear_dir(dir: &Path, report: &mut CleanupReport) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            report.fail(dir, e);
            return;
        }
    };

    let mut subdirs: Vec<PathBuf> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        // `file_type` does not follow symlinks: a link is removed, never entered.
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => {
                report.fail(&path, e);
                continue;
            }
        };
        if file_type.is_dir() {
            subdirs.push(path);
        } else {
            match remove_entry(&path, file_type.is_symlink()) {
                Ok(()) => report.files_deleted += 1,
                Err(e) => report.fail(&path, e),
            }
        }
    }

    // Bottom-up: empty each child before removing it.
    for sub in subdirs {
        clear_dir(&sub, report);
        match std::fs::remove_dir(&sub) {
            Ok(()) => report.dirs_removed += 1,
            Err(e) => report.fail(&sub, e),
        }
    }
}

/// Remove a file or a link. Directory links on Windows need `remove_dir`.
fn remove_entry(path: &Path, is_symlink: bool) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if is_symlink => std::fs::remove_dir(path).map_err(|_| e),
        other => other,
    }
}

/// Remove files directly inside `dir` whose name ends with any of `suffixes`
/// (compared case-insensitively, e.g. `.shp.xml`, `.sbn`).
pub fn remove_files_with_suffixes(dir: &Path, suffixes: &[&str]) -> CleanupReport {
    let mut report = CleanupReport::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
        Err(e) => {
            report.fail(dir, e);
            return report;
        }
    };

    let suffixes: Vec<String> = suffixes.iter().map(|s| s.to_ascii_lowercase()).collect();
    let mut targets: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_ascii_lowercase())
                .is_some_and(|name| suffixes.iter().any(|s| name.ends_with(s.as_str())))
        })
        .collect();
    targets.sort();

    for path in targets {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(?path, "removed sidecar");
                report.files_deleted += 1;
            }
            Err(e) => report.fail(&path, e),
        }
    }

    info!(?dir, files = report.files_deleted, "sidecar files removed");
    report
}
