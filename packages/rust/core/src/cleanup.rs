//! Cleanup before creation, so re-running a step never merges with the
//! leftovers of an earlier attempt.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};

use contourkit_engine::GeometryEngine;
use contourkit_shared::{ContourError, DatasetHandle, Result};
use contourkit_storage::clear_folder_contents;

use crate::layout::{ArtifactLayout, LEGACY_CONTAINERS, LEGACY_CONTAINER_PATTERN};

/// Something a step creates and therefore owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// A container or a named dataset.
    Dataset(DatasetHandle),
    /// Every feature class inside a feature dataset (the dataset stays).
    FeatureClassesIn(DatasetHandle),
    /// Contents of a folder (the folder stays).
    Folder(PathBuf),
    /// A single file.
    File(PathBuf),
    /// Working containers left by earlier pipeline versions.
    LegacyContainers,
}

/// Result of [`ensure_absent`] when nothing went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absence {
    AlreadyAbsent,
    Deleted,
}

/// Delete `dataset` if it exists and confirm it is gone.
///
/// A dataset that does not exist is not an error. A delete that fails or
/// does not take effect is a non-fatal [`ContourError::PartialCleanup`];
/// only a failing existence check is fatal.
pub fn ensure_absent(engine: &mut dyn GeometryEngine, dataset: &DatasetHandle) -> Result<Absence> {
    if !engine.exists(dataset)? {
        debug!(%dataset, "does not exist");
        return Ok(Absence::AlreadyAbsent);
    }

    debug!(%dataset, "exists, deleting");
    if let Err(e) = engine.delete(dataset) {
        return Err(ContourError::partial_cleanup(dataset.path(), e.to_string()));
    }

    if engine.exists(dataset)? {
        return Err(ContourError::partial_cleanup(
            dataset.path(),
            "dataset still exists after delete",
        ));
    }

    info!(%dataset, "deleted");
    Ok(Absence::Deleted)
}

/// Remove one owned artifact. Non-fatal failures are logged and swallowed.
pub fn purge(
    engine: &mut dyn GeometryEngine,
    layout: &ArtifactLayout,
    artifact: &Artifact,
) -> Result<()> {
    match artifact {
        Artifact::Dataset(dataset) => tolerate(ensure_absent(engine, dataset).map(|_| ())),
        Artifact::FeatureClassesIn(dataset) => {
            if !engine.exists(dataset)? {
                debug!(%dataset, "feature dataset not found");
                return Ok(());
            }
            let names = engine.list_feature_classes(dataset)?;
            let total = names.len();
            for name in names {
                tolerate(ensure_absent(engine, &dataset.child(&name)).map(|_| ()))?;
            }
            info!(%dataset, feature_classes = total, "feature dataset emptied");
            Ok(())
        }
        Artifact::Folder(path) => {
            let report = clear_folder_contents(path);
            for failure in report.failures {
                tolerate(Err(failure))?;
            }
            Ok(())
        }
        Artifact::File(path) => match std::fs::remove_file(path) {
            Ok(()) => {
                info!(?path, "deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => tolerate(Err(ContourError::partial_cleanup(path, e.to_string()))),
        },
        Artifact::LegacyContainers => {
            for name in legacy_container_names(layout.base_dir())? {
                tolerate(ensure_absent(engine, &layout.legacy_container(&name)).map(|_| ()))?;
            }
            Ok(())
        }
    }
}

/// Swallow non-fatal cleanup errors after logging them.
fn tolerate(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if !e.is_fatal() => {
            warn!(error = %e, "cleanup continued after failure");
            Ok(())
        }
        other => other,
    }
}

/// Legacy containers to look for: the fixed names, plus anything on disk
/// matching the per-step naming of the oldest versions.
fn legacy_container_names(base_dir: &Path) -> Result<Vec<String>> {
    let pattern = Regex::new(LEGACY_CONTAINER_PATTERN)
        .map_err(|e| ContourError::configuration(format!("invalid legacy pattern: {e}")))?;

    let mut names: Vec<String> = LEGACY_CONTAINERS.iter().map(|s| s.to_string()).collect();
    if let Ok(entries) = std::fs::read_dir(base_dir) {
        let mut found: Vec<String> = entries
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| pattern.is_match(name))
            .collect();
        found.sort();
        names.extend(found);
    }
    Ok(names)
}
