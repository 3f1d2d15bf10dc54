//! Error types for `droidpane-core`.
//!
//! All fallible operations in the core library return [`CoreResult<T>`],
//! which is an alias for `Result<T, CoreError>`.

use std::path::{Path, PathBuf};

/// Unified error type for all core operations.
///
/// Each variant captures just enough context for the caller to display
/// a meaningful message or take corrective action. [`CoreError::Cancelled`]
/// is not a failure: the engine records it as a distinct job status.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The target path does not exist.
    #[error("path not found: {0}")]
    NotFound(PathBuf),

    /// The process lacks permission to access the path.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// A directory was expected but the path points to something else.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A file or directory name is invalid (empty, contains path separators, etc.).
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Failed to parse a TOML configuration file.
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// The remote device is not connected or not online.
    #[error("remote device unavailable ({0})")]
    BackendUnavailable(String),

    /// A rename target already exists on the destination backend.
    #[error("destination exists: {0}")]
    DestinationExists(PathBuf),

    /// One or more entries failed during a skip-and-continue copy.
    #[error("{failed} entries failed to copy; first error: {first}")]
    PartialWalkFailure {
        /// Number of entries that could not be copied.
        failed: usize,
        /// Message of the first failure encountered.
        first: String,
    },

    /// Command output could not be interpreted.
    #[error("parse error: {0}")]
    Parse(String),

    /// A remote shell command failed or printed output where none was expected.
    #[error("shell: {0}")]
    Shell(String),

    /// The pane is busy with another state-mutating action.
    #[error("pane is busy")]
    Busy,

    /// The backend does not offer the requested capability.
    #[error("not supported: {0}")]
    Unsupported(String),

    /// The operation observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// An I/O error that doesn't fit a more specific variant.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Maps an I/O error to the most specific variant for `path`.
    pub fn from_io(err: std::io::Error, path: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => CoreError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => CoreError::PermissionDenied(path.to_path_buf()),
            _ => CoreError::Io(err),
        }
    }

    /// Returns `true` for [`CoreError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }
}

/// Convenience alias used throughout `droidpane-core`.
pub type CoreResult<T> = Result<T, CoreError>;
