//! Filesystem side of a contour run.
//!
//! Everything here touches plain files in the locality's base directory,
//! never geodatabase content:
//! - [`cleanup`]: best-effort folder clearing and sidecar removal
//! - [`RunLock`]: exclusive ownership of a locality for one pipeline instance
//! - [`RunLog`]: the append-only, timestamped run log

pub mod cleanup;
mod lock;
mod run_log;

pub use cleanup::{CleanupReport, clear_folder_contents, remove_files_with_suffixes};
pub use lock::{LOCK_FILE_NAME, RunLock};
pub use run_log::{RunLog, format_elapsed};
