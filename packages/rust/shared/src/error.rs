//! Error types for contourkit.
//!
//! Library crates use [`ContourError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all contourkit operations.
#[derive(Debug, thiserror::Error)]
pub enum ContourError {
    /// Unknown step name, missing inputs, or an unreadable config file.
    /// Always raised before any processing starts.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A geometry-engine operation failed.
    #[error("engine operation `{operation}` failed: {message}")]
    Engine { operation: String, message: String },

    /// The engine worker process misbehaved (spawn, protocol, closed pipe).
    #[error("engine bridge error: {0}")]
    Bridge(String),

    /// A single file or dataset could not be deleted during cleanup.
    #[error("cleanup of {path:?} failed: {message}")]
    PartialCleanup { path: PathBuf, message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Deliverable verification failed (missing tiles, malformed index, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Another pipeline instance owns this locality.
    #[error(
        "locality is locked by another run: {path:?}; if no run is active, rerun with --break-lock"
    )]
    Lock { path: PathBuf },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ContourError>;

impl ContourError {
    /// Create a configuration error from any displayable message.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an engine error for the named operation.
    pub fn engine(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Engine {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a partial-cleanup error for a path that could not be removed.
    pub fn partial_cleanup(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::PartialCleanup {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the run.
    ///
    /// Partial cleanup failures are logged and the cleanup continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::PartialCleanup { .. })
    }
}
