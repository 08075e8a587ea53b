use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use contourkit_shared::{ContourError, Result};

/// Append-only, timestamped log of one run.
///
/// Audit only: resume never reads it back.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl RunLog {
    /// Start a fresh log at `path`, truncating any previous run's log.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ContourError::io(parent, e))?;
        }
        File::create(path).map_err(|e| ContourError::io(path, e))?;
        let file = OpenOptions::new()
            .append(true)
            .open(path)
            .map_err(|e| ContourError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one `[YYYY-MM-DD HH:MM:SS] message` line.
    pub fn append(&self, message: &str) -> Result<()> {
        let line = format!(
            "[{}] {message}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        let mut file = self
            .file
            .lock()
            .map_err(|_| ContourError::io(&self.path, std::io::Error::other("log lock poisoned")))?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| ContourError::io(&self.path, e))
    }
}

/// Render an elapsed time as `Xh Ym Zs`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{}h {}m {}s", total / 3600, (total % 3600) / 60, total % 60)
}
