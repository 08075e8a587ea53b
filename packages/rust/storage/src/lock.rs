use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use contourkit_shared::{ContourError, Result};

/// Lock file name inside a locality's base directory.
pub const LOCK_FILE_NAME: &str = ".contourkit.lock";

/// Exclusive claim on a locality's base directory.
///
/// The lock file is created with `create_new` so a second instance fails
/// instead of sharing the working geodatabases. It is removed on drop. A
/// lock left behind by a process that no longer exists is replaced.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock for `base_dir`, creating the directory if needed.
    pub fn acquire(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir).map_err(|e| ContourError::io(base_dir, e))?;
        let path = base_dir.join(LOCK_FILE_NAME);

        match Self::create(&path) {
            Err(ContourError::Lock { .. }) if owner_is_gone(&path) => {
                warn!(?path, "replacing run lock left by a process that has exited");
                remove_lock_file(&path)?;
                Self::create(&path)
            }
            other => other,
        }
    }

    /// Remove the lock for `base_dir` whoever holds it. Returns whether a
    /// lock file was there.
    pub fn break_lock(base_dir: &Path) -> Result<bool> {
        let path = base_dir.join(LOCK_FILE_NAME);
        if !path.exists() {
            return Ok(false);
        }
        remove_lock_file(&path)?;
        info!(?path, "run lock removed");
        Ok(true)
    }

    fn create(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    ContourError::Lock {
                        path: path.to_path_buf(),
                    }
                } else {
                    ContourError::io(path, e)
                }
            })?;

        // Owner info, read back when deciding whether a lock is stale.
        if let Err(e) = writeln!(
            file,
            "pid={} acquired={}",
            std::process::id(),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ) {
            warn!(?path, error = %e, "failed to record run lock owner");
        }

        debug!(?path, "run lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = ?self.path, error = %e, "failed to remove run lock");
        }
    }
}

fn remove_lock_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ContourError::io(path, e)),
    }
}

/// Pid recorded in a lock file.
fn owner_pid(path: &Path) -> Option<u32> {
    let content = std::fs::read_to_string(path).ok()?;
    content
        .split_whitespace()
        .find_map(|part| part.strip_prefix("pid="))
        .and_then(|pid| pid.parse().ok())
}

/// True only when the recorded owner is known to have exited. A lock held
/// by this process, or one whose owner cannot be checked, stays in place.
fn owner_is_gone(path: &Path) -> bool {
    match owner_pid(path) {
        Some(pid) if pid != std::process::id() => process_alive(pid) == Some(false),
        _ => false,
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> Option<bool> {
    Some(Path::new("/proc").join(pid.to_string()).exists())
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> Option<bool> {
    None
}
