//! The remote device side of the bridge.
//!
//! [`Bridge`] is the narrow transport seam: one implementation drives the
//! `adb` command-line tool ([`AdbBridge`]), another keeps a whole device
//! tree in memory for tests and demos ([`MemoryBridge`]). [`RemoteBackend`]
//! turns any bridge into a [`crate::fs::Backend`], adding the connection
//! check, activity logging, and the silent-command convention.

pub mod adb;
pub mod backend;
pub mod memory;
pub mod shell;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::CoreResult;
use crate::fs::backend::{ByteReader, ByteWriter, DirEntries, ProgressFn};
use crate::fs::entry::DirEntry;

pub use adb::AdbBridge;
pub use backend::RemoteBackend;
pub use memory::MemoryBridge;

/// Remote device state as reported by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No device attached.
    Absent,
    /// Attached but the host key was not accepted.
    Unauthorized,
    Online,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Absent => write!(f, "absent"),
            ConnectionState::Unauthorized => write!(f, "unauthorized"),
            ConnectionState::Online => write!(f, "online"),
        }
    }
}

/// Transport to a remote device.
///
/// Shell commands return standard output on success. A command that exits
/// non-zero fails with [`crate::CoreError::Shell`] carrying its diagnostics,
/// and a command killed through `cancel` fails with
/// [`crate::CoreError::Cancelled`].
#[async_trait]
pub trait Bridge: Send + Sync + 'static {
    async fn connection_state(&self) -> ConnectionState;

    /// Describes `path` without following a trailing symlink.
    async fn stat(&self, path: &Path) -> CoreResult<DirEntry>;

    async fn list(&self, path: &Path) -> CoreResult<DirEntries>;

    async fn open_read(&self, path: &Path) -> CoreResult<ByteReader>;

    async fn open_write(&self, path: &Path, mode: u32) -> CoreResult<ByteWriter>;

    async fn shell(&self, cmd: &str, cancel: &CancellationToken) -> CoreResult<String>;

    async fn push(
        &self,
        local: &Path,
        remote: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CoreResult<()>;

    async fn pull(
        &self,
        remote: &Path,
        local: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CoreResult<()>;
}
