//! Run manifest: identity, derived parameters, counters and a digest of
//! every deliverable file.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use contourkit_shared::{ContourError, Result};

/// Suffix of `<Locality>_<suffix>.json`.
pub const MANIFEST_SUFFIX: &str = "Contours_Manifest";

/// SHA-256 of one deliverable file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigest {
    /// Path relative to the locality base directory, `/`-separated.
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Coordinate parameters the run derived from the mosaic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestParameters {
    pub linear_unit: String,
    pub metric: bool,
    pub z_factor: f64,
    pub min_length: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: Uuid,
    pub state: String,
    pub locality: String,
    pub target_srs: u32,
    pub start_step: String,
    pub parameters: ManifestParameters,
    pub counters: BTreeMap<String, u64>,
    pub files: Vec<FileDigest>,
    pub created_at: String,
}

impl Manifest {
    pub fn new(
        state: &str,
        locality: &str,
        target_srs: u32,
        start_step: &str,
        parameters: ManifestParameters,
    ) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            state: state.to_string(),
            locality: locality.to_string(),
            target_srs,
            start_step: start_step.to_string(),
            parameters,
            counters: BTreeMap::new(),
            files: Vec::new(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Digest every file named by `entries` (relative to `base`), sorted by path.
///
/// An entry is a folder (digested recursively) or a single file. Missing
/// entries contribute nothing.
#[instrument(skip_all, fields(base = %base.display()))]
pub fn digest_files(base: &Path, entries: &[&str]) -> Result<Vec<FileDigest>> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let path = base.join(entry);
        if path.is_file() {
            files.push(path);
        } else {
            collect_files(&path, &mut files)?;
        }
    }
    files.sort();

    let mut digests = Vec::with_capacity(files.len());
    for path in files {
        let (sha256, size_bytes) = hash_file(&path)?;
        let relative = path
            .strip_prefix(base)
            .unwrap_or(&path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        debug!(file = %relative, size = size_bytes, "digested deliverable");
        digests.push(FileDigest {
            path: relative,
            sha256,
            size_bytes,
        });
    }
    Ok(digests)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(ContourError::io(dir, e)),
    };
    for entry in entries {
        let path = entry.map_err(|e| ContourError::io(dir, e))?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn hash_file(path: &Path) -> Result<(String, u64)> {
    let mut file = std::fs::File::open(path).map_err(|e| ContourError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(|e| ContourError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), total))
}

/// Write the manifest atomically (temp file, then rename).
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)
        .map_err(|e| ContourError::validation(format!("failed to serialize manifest: {e}")))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "manifest.json".into());
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, json).map_err(|e| ContourError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| ContourError::io(path, e))?;

    info!(path = %path.display(), files = manifest.files.len(), "manifest written");
    Ok(())
}
