//! The capability interface implemented once per filesystem backend.
//!
//! The walker and the engine are written against [`Backend`] only, so they
//! never branch on which side of the bridge a path lives on. Capabilities
//! that only one backend offers ([`Backend::copy_native`],
//! [`Backend::make_fifo`], [`Backend::bulk`]) default to "unsupported".

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::fs::entry::DirEntry;

/// Boxed byte source returned by [`Backend::open_read`].
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed byte sink returned by [`Backend::create_file`].
pub type ByteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Progress callback receiving the cumulative byte count of the current file.
pub type ProgressFn<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// Number of entries a listing producer may run ahead of its consumer.
pub const LISTING_BUFFER: usize = 64;

/// Which filesystem a pane or a job operates against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
}

impl BackendKind {
    /// Returns the other backend.
    pub fn other(self) -> Self {
        match self {
            BackendKind::Local => BackendKind::Remote,
            BackendKind::Remote => BackendKind::Local,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Local => write!(f, "Local"),
            BackendKind::Remote => write!(f, "Remote"),
        }
    }
}

/// A path qualified by the backend it lives on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Location {
    pub backend: BackendKind,
    pub path: PathBuf,
}

impl Location {
    pub fn new(backend: BackendKind, path: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            path: path.into(),
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::new(BackendKind::Local, path)
    }

    pub fn remote(path: impl Into<PathBuf>) -> Self {
        Self::new(BackendKind::Remote, path)
    }

    /// Returns the containing directory, or `self` for a root.
    pub fn parent(&self) -> Self {
        let parent = self.path.parent().unwrap_or(&self.path);
        Self::new(self.backend, parent)
    }

    /// Returns the location of `name` inside this directory.
    pub fn join(&self, name: impl AsRef<Path>) -> Self {
        Self::new(self.backend, self.path.join(name))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.path.display())
    }
}

/// A lazily produced directory listing.
///
/// Entries arrive through a bounded channel fed by the backend, so a large
/// directory is never materialised before the consumer starts reading.
#[derive(Debug)]
pub struct DirEntries {
    rx: mpsc::Receiver<CoreResult<DirEntry>>,
}

impl DirEntries {
    /// Creates a connected producer/listing pair.
    pub fn channel() -> (mpsc::Sender<CoreResult<DirEntry>>, Self) {
        let (tx, rx) = mpsc::channel(LISTING_BUFFER);
        (tx, Self { rx })
    }

    /// Wraps an already collected listing.
    pub fn from_vec(entries: Vec<DirEntry>) -> Self {
        let (tx, rx) = mpsc::channel(entries.len().max(1));
        for entry in entries {
            // Capacity covers every entry, so this cannot fail.
            let _ = tx.try_send(Ok(entry));
        }
        Self { rx }
    }

    /// Returns the next entry, or `None` once the listing is exhausted.
    pub async fn next(&mut self) -> Option<CoreResult<DirEntry>> {
        self.rx.recv().await
    }

    /// Drains the listing, stopping at the first error.
    pub async fn collect(mut self) -> CoreResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await {
            entries.push(entry?);
        }
        Ok(entries)
    }
}

/// Filesystem operations offered by one backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Identifies the backend.
    fn kind(&self) -> BackendKind;

    /// Fails with [`CoreError::BackendUnavailable`] when the backend cannot be reached.
    async fn ensure_available(&self) -> CoreResult<()>;

    /// Describes `path` without following a trailing symlink.
    async fn stat(&self, path: &Path) -> CoreResult<DirEntry>;

    /// Returns whether `path` exists, treating only `NotFound` as absence.
    async fn exists(&self, path: &Path) -> CoreResult<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(CoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Lists the immediate children of `path`, excluding `.` and `..`.
    async fn list_dir(&self, path: &Path) -> CoreResult<DirEntries>;

    /// Returns `true` if `dir/name` is a symlink whose target is a directory.
    async fn is_symlink_to_dir(&self, dir: &Path, name: &str, cancel: &CancellationToken)
        -> bool;

    /// Resolves every symlink in `path` to a canonical target path.
    async fn resolve_link(&self, path: &Path, cancel: &CancellationToken) -> CoreResult<PathBuf>;

    /// Opens `path` for streaming reads.
    async fn open_read(&self, path: &Path) -> CoreResult<ByteReader>;

    /// Creates (or truncates) `path` for streaming writes.
    async fn create_file(&self, path: &Path, mode: u32) -> CoreResult<ByteWriter>;

    /// Runs a shell command and returns its standard output.
    async fn run_shell(&self, cmd: &str, cancel: &CancellationToken) -> CoreResult<String>;

    /// Makes sure `path` exists as a directory. Applying `mode` is best-effort.
    async fn ensure_dir(&self, path: &Path, mode: u32, cancel: &CancellationToken)
        -> CoreResult<()>;

    /// Creates a single new directory.
    async fn mkdir(&self, path: &Path, cancel: &CancellationToken) -> CoreResult<()>;

    /// Renames or moves `src` to `dst` within this backend.
    async fn rename(&self, src: &Path, dst: &Path, cancel: &CancellationToken) -> CoreResult<()>;

    /// Removes `path`, recursing into directories.
    async fn remove_all(&self, path: &Path, cancel: &CancellationToken) -> CoreResult<()>;

    /// Copies `src` to `dst` within this backend using a single native directive.
    async fn copy_native(
        &self,
        _src: &Path,
        _dst: &Path,
        _cancel: &CancellationToken,
    ) -> CoreResult<()> {
        Err(CoreError::Unsupported(format!("{} native copy", self.kind())))
    }

    /// Creates a named pipe at `path`.
    async fn make_fifo(&self, _path: &Path, _mode: u32) -> CoreResult<()> {
        Err(CoreError::Unsupported(format!("{} named pipes", self.kind())))
    }

    /// Returns the bulk-transfer capability, if this backend has one.
    fn bulk(&self) -> Option<&dyn BulkTransfer> {
        None
    }
}

/// Whole-file transfer between the local machine and a remote backend.
///
/// Implementations report cumulative progress at a bounded rate and return
/// [`CoreError::Cancelled`] when `cancel` fires mid-transfer.
#[async_trait]
pub trait BulkTransfer: Send + Sync {
    /// Uploads the local file `local` to `remote`.
    async fn push(
        &self,
        local: &Path,
        remote: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CoreResult<()>;

    /// Downloads `remote` to the local file `local`.
    async fn pull(
        &self,
        remote: &Path,
        local: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CoreResult<()>;
}

/// The pair of adapters every pane and job is parameterised by.
#[derive(Clone)]
pub struct Backends {
    local: Arc<dyn Backend>,
    remote: Arc<dyn Backend>,
}

impl Backends {
    pub fn new(local: Arc<dyn Backend>, remote: Arc<dyn Backend>) -> Self {
        Self { local, remote }
    }

    /// Returns the adapter for `kind`.
    pub fn get(&self, kind: BackendKind) -> &Arc<dyn Backend> {
        match kind {
            BackendKind::Local => &self.local,
            BackendKind::Remote => &self.remote,
        }
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}
