//! [`Backend`] implementation on top of a [`Bridge`].
//!
//! Every call first checks the connection state; a change is recorded in
//! the activity log under `devices`. Mutating commands follow the silent
//! convention: any output at all is treated as an error message.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::fs::backend::{
    Backend, BackendKind, BulkTransfer, ByteReader, ByteWriter, DirEntries, ProgressFn,
};
use crate::fs::entry::DirEntry;
use crate::fs::stream::Throttle;
use crate::log::LogSink;
use crate::remote::shell::{quote, quote_path};
use crate::remote::{Bridge, ConnectionState};

/// Default minimum delay between two progress reports of a transfer.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// The remote filesystem, reached through a [`Bridge`].
pub struct RemoteBackend<B> {
    bridge: Arc<B>,
    log: Arc<dyn LogSink>,
    last_state: Mutex<Option<ConnectionState>>,
    progress_interval: Duration,
}

impl<B: Bridge> RemoteBackend<B> {
    pub fn new(bridge: Arc<B>, log: Arc<dyn LogSink>) -> Self {
        Self {
            bridge,
            log,
            last_state: Mutex::new(None),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn bridge(&self) -> &Arc<B> {
        &self.bridge
    }

    /// Queries the device and fails unless it is online.
    async fn ensure_online(&self) -> CoreResult<()> {
        let state = self.bridge.connection_state().await;
        let changed = {
            let mut last = self.last_state.lock();
            let changed = *last != Some(state);
            *last = Some(state);
            changed
        };
        if changed {
            tracing::info!(%state, "remote device state changed");
            self.log
                .add("devices", &state.to_string(), state != ConnectionState::Online);
        }

        match state {
            ConnectionState::Online => Ok(()),
            other => Err(CoreError::BackendUnavailable(other.to_string())),
        }
    }

    async fn logged<T, F>(&self, label: String, call: F) -> CoreResult<T>
    where
        F: Future<Output = CoreResult<T>> + Send,
        T: Send,
    {
        let token = self.log.start(&label);
        let result = call.await;
        match &result {
            Ok(_) => self.log.update(token, "ok", false),
            Err(e) => self.log.update(token, &e.to_string(), !e.is_cancelled()),
        }
        result
    }

    async fn shell_logged(&self, cmd: &str, cancel: &CancellationToken) -> CoreResult<String> {
        let token = self.log.start(&format!("shell {cmd}"));
        let result = self.bridge.shell(cmd, cancel).await;
        match &result {
            Ok(out) => self.log.update(token, out.trim(), false),
            Err(e) => self.log.update(token, &e.to_string(), !e.is_cancelled()),
        }
        result
    }

    /// Runs a command that must not print anything on success.
    async fn silent(&self, cmd: &str, cancel: &CancellationToken) -> CoreResult<()> {
        let out = self.shell_logged(cmd, cancel).await?;
        let out = out.trim();
        if out.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Shell(out.to_string()))
        }
    }
}

fn throttled<'a>(
    throttle: &'a Throttle,
    progress: ProgressFn<'a>,
) -> impl Fn(u64) + Send + Sync + 'a {
    move |bytes| {
        if throttle.ready() {
            progress(bytes);
        }
    }
}

#[async_trait]
impl<B: Bridge> Backend for RemoteBackend<B> {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn ensure_available(&self) -> CoreResult<()> {
        self.ensure_online().await
    }

    async fn stat(&self, path: &Path) -> CoreResult<DirEntry> {
        self.ensure_online().await?;
        self.logged(format!("stat {}", path.display()), self.bridge.stat(path))
            .await
    }

    async fn list_dir(&self, path: &Path) -> CoreResult<DirEntries> {
        // Listings run on every navigation and are kept out of the activity log.
        self.ensure_online().await?;
        tracing::debug!(path = %path.display(), "listing remote directory");
        self.bridge.list(path).await
    }

    async fn is_symlink_to_dir(
        &self,
        dir: &Path,
        name: &str,
        cancel: &CancellationToken,
    ) -> bool {
        if self.ensure_online().await.is_err() {
            return false;
        }
        let with_slash = format!("{}/", dir.join(name).to_string_lossy());
        let cmd = format!("ls -pd {}", quote(&with_slash));
        match self.shell_logged(&cmd, cancel).await {
            Ok(out) => out.trim_end().ends_with("//"),
            Err(_) => false,
        }
    }

    async fn resolve_link(&self, path: &Path, cancel: &CancellationToken) -> CoreResult<PathBuf> {
        self.ensure_online().await?;
        let cmd = format!("readlink -f {}", quote_path(path));
        let out = match self.shell_logged(&cmd, cancel).await {
            Ok(out) => out,
            Err(CoreError::Shell(_)) => return Err(CoreError::NotFound(path.to_path_buf())),
            Err(e) => return Err(e),
        };
        let target = out.trim();
        if target.is_empty() {
            return Err(CoreError::NotFound(path.to_path_buf()));
        }
        Ok(PathBuf::from(target))
    }

    async fn open_read(&self, path: &Path) -> CoreResult<ByteReader> {
        self.ensure_online().await?;
        self.logged(format!("read {}", path.display()), self.bridge.open_read(path))
            .await
    }

    async fn create_file(&self, path: &Path, mode: u32) -> CoreResult<ByteWriter> {
        self.ensure_online().await?;
        self.logged(
            format!("write {}", path.display()),
            self.bridge.open_write(path, mode),
        )
        .await
    }

    async fn run_shell(&self, cmd: &str, cancel: &CancellationToken) -> CoreResult<String> {
        self.ensure_online().await?;
        self.shell_logged(cmd, cancel).await
    }

    async fn ensure_dir(
        &self,
        path: &Path,
        mode: u32,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        self.ensure_online().await?;
        self.silent(&format!("mkdir -p {}", quote_path(path)), cancel)
            .await?;

        let chmod = format!("chmod {:04o} {}", mode & 0o7777, quote_path(path));
        match self.silent(&chmod, cancel).await {
            Err(CoreError::Cancelled) => return Err(CoreError::Cancelled),
            Err(e) => tracing::debug!(path = %path.display(), "chmod failed: {e}"),
            Ok(()) => {}
        }
        Ok(())
    }

    async fn mkdir(&self, path: &Path, cancel: &CancellationToken) -> CoreResult<()> {
        self.ensure_online().await?;
        self.silent(&format!("mkdir {}", quote_path(path)), cancel)
            .await
    }

    async fn rename(&self, src: &Path, dst: &Path, cancel: &CancellationToken) -> CoreResult<()> {
        self.ensure_online().await?;
        self.silent(
            &format!("mv {} {}", quote_path(src), quote_path(dst)),
            cancel,
        )
        .await
    }

    async fn remove_all(&self, path: &Path, cancel: &CancellationToken) -> CoreResult<()> {
        let entry = self.stat(path).await?;
        let flags = if entry.is_dir() { "-rf" } else { "-f" };
        self.silent(&format!("rm {flags} {}", quote_path(path)), cancel)
            .await
    }

    async fn copy_native(
        &self,
        src: &Path,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        let entry = self.stat(src).await?;
        let cmd = if entry.is_dir() {
            format!("cp -r {} {}", quote_path(src), quote_path(dst))
        } else {
            format!("cp {} {}", quote_path(src), quote_path(dst))
        };
        self.silent(&cmd, cancel).await
    }

    fn bulk(&self) -> Option<&dyn BulkTransfer> {
        Some(self)
    }
}

#[async_trait]
impl<B: Bridge> BulkTransfer for RemoteBackend<B> {
    async fn push(
        &self,
        local: &Path,
        remote: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        self.ensure_online().await?;
        let throttle = Throttle::new(self.progress_interval);
        let report = throttled(&throttle, progress);
        self.logged(
            format!("push {} {}", local.display(), remote.display()),
            self.bridge.push(local, remote, &report, cancel),
        )
        .await
    }

    async fn pull(
        &self,
        remote: &Path,
        local: &Path,
        progress: ProgressFn<'_>,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        self.ensure_online().await?;
        let throttle = Throttle::new(self.progress_interval);
        let report = throttled(&throttle, progress);
        self.logged(
            format!("pull {} {}", remote.display(), local.display()),
            self.bridge.pull(remote, local, &report, cancel),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    use crate::log::ActivityLog;
    use crate::remote::MemoryBridge;

    fn setup() -> (Arc<MemoryBridge>, Arc<ActivityLog>, RemoteBackend<MemoryBridge>) {
        let bridge = Arc::new(MemoryBridge::new());
        bridge.add_dir("/sdcard");
        let log = Arc::new(ActivityLog::default());
        let backend = RemoteBackend::new(bridge.clone(), log.clone())
            .with_progress_interval(Duration::ZERO);
        (bridge, log, backend)
    }

    #[tokio::test]
    async fn absent_device_is_unavailable() {
        let (bridge, _log, backend) = setup();
        bridge.set_state(ConnectionState::Absent);

        let err = backend.stat(Path::new("/sdcard")).await.unwrap_err();
        assert!(matches!(err, CoreError::BackendUnavailable(ref s) if s == "absent"));

        bridge.set_state(ConnectionState::Unauthorized);
        let err = backend.ensure_available().await.unwrap_err();
        assert!(matches!(err, CoreError::BackendUnavailable(ref s) if s == "unauthorized"));
    }

    #[tokio::test]
    async fn state_changes_are_logged_once() {
        let (bridge, log, backend) = setup();
        backend.ensure_available().await.unwrap();
        backend.ensure_available().await.unwrap();
        bridge.set_state(ConnectionState::Absent);
        let _ = backend.ensure_available().await;

        let devices: Vec<_> = log
            .entries()
            .into_iter()
            .filter(|e| e.command == "devices")
            .collect();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].output, "online");
        assert!(!devices[0].is_error);
        assert_eq!(devices[1].output, "absent");
        assert!(devices[1].is_error);
    }

    #[tokio::test]
    async fn listing_is_not_logged() {
        let (bridge, log, backend) = setup();
        bridge.add_file("/sdcard/a.txt", b"a");
        backend.ensure_available().await.unwrap();
        let before = log.len();

        let entries = backend
            .list_dir(Path::new("/sdcard"))
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(log.len(), before);
    }

    #[tokio::test]
    async fn mkdir_existing_reports_shell_output() {
        let (_bridge, log, backend) = setup();
        let err = backend
            .mkdir(Path::new("/sdcard"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Shell(ref msg) if msg.contains("File exists")));
        assert!(log.entries().iter().any(|e| e.command.starts_with("shell mkdir")));
    }

    #[tokio::test]
    async fn ensure_dir_creates_parents_and_mode() {
        let (bridge, _log, backend) = setup();
        let cancel = CancellationToken::new();
        backend
            .ensure_dir(Path::new("/sdcard/a/b"), 0o700, &cancel)
            .await
            .unwrap();
        assert!(bridge.is_dir("/sdcard/a/b"));
        assert_eq!(bridge.mode_of("/sdcard/a/b"), Some(0o700));
        // Idempotent.
        backend
            .ensure_dir(Path::new("/sdcard/a/b"), 0o700, &cancel)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn directory_calls_honour_the_job_token() {
        let (bridge, _log, backend) = setup();
        bridge.add_symlink("/sdcard/to_dir", "/sdcard");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let before = bridge.mutation_count();

        let err = backend
            .ensure_dir(Path::new("/sdcard/a"), 0o755, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        let err = backend
            .mkdir(Path::new("/sdcard/b"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        let err = backend
            .resolve_link(Path::new("/sdcard/to_dir"), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!backend
            .is_symlink_to_dir(Path::new("/sdcard"), "to_dir", &cancel)
            .await);

        assert_eq!(bridge.mutation_count(), before);
        assert!(!bridge.exists("/sdcard/a"));
    }

    #[tokio::test]
    async fn rename_and_remove() {
        let (bridge, _log, backend) = setup();
        bridge.add_file("/sdcard/it's.txt", b"x");
        let cancel = CancellationToken::new();

        backend
            .rename(
                Path::new("/sdcard/it's.txt"),
                Path::new("/sdcard/b.txt"),
                &cancel,
            )
            .await
            .unwrap();
        assert!(bridge.exists("/sdcard/b.txt"));
        assert!(!bridge.exists("/sdcard/it's.txt"));

        bridge.add_file("/sdcard/dir/inner.txt", b"y");
        backend
            .remove_all(Path::new("/sdcard/dir"), &cancel)
            .await
            .unwrap();
        assert!(!bridge.exists("/sdcard/dir"));
        backend
            .remove_all(Path::new("/sdcard/b.txt"), &cancel)
            .await
            .unwrap();
        assert!(!bridge.exists("/sdcard/b.txt"));
    }

    #[tokio::test]
    async fn symlink_to_dir_detection() {
        let (bridge, _log, backend) = setup();
        bridge.add_dir("/sdcard/real");
        bridge.add_file("/sdcard/file.txt", b"z");
        bridge.add_symlink("/sdcard/to_dir", "/sdcard/real");
        bridge.add_symlink("/sdcard/to_file", "file.txt");

        let dir = Path::new("/sdcard");
        let cancel = CancellationToken::new();
        assert!(backend.is_symlink_to_dir(dir, "to_dir", &cancel).await);
        assert!(!backend.is_symlink_to_dir(dir, "to_file", &cancel).await);
        assert!(!backend.is_symlink_to_dir(dir, "missing", &cancel).await);

        let target = backend
            .resolve_link(Path::new("/sdcard/to_file"), &cancel)
            .await
            .unwrap();
        assert_eq!(target, PathBuf::from("/sdcard/file.txt"));
    }

    #[tokio::test]
    async fn copy_native_copies_trees() {
        let (bridge, _log, backend) = setup();
        bridge.add_file("/sdcard/src/a.txt", b"abc");
        backend
            .copy_native(
                Path::new("/sdcard/src"),
                Path::new("/sdcard/dst"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(bridge.read_file("/sdcard/dst/a.txt").unwrap(), b"abc");
    }

    #[tokio::test]
    async fn push_and_pull_report_progress() {
        let (bridge, _log, backend) = setup();
        let dir = tempfile::TempDir::new().unwrap();
        let local = dir.path().join("up.bin");
        std::fs::write(&local, vec![9u8; 5000]).unwrap();
        let seen = AtomicU64::new(0);
        let cancel = CancellationToken::new();

        let bulk = backend.bulk().unwrap();
        bulk.push(&local, Path::new("/sdcard/up.bin"), &|n| {
            seen.store(n, Ordering::SeqCst)
        }, &cancel)
        .await
        .unwrap();
        assert_eq!(bridge.read_file("/sdcard/up.bin").unwrap().len(), 5000);
        assert_eq!(seen.load(Ordering::SeqCst), 5000);

        let back = dir.path().join("down.bin");
        bulk.pull(Path::new("/sdcard/up.bin"), &back, &|_| {}, &cancel)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&back).unwrap().len(), 5000);
    }

    #[tokio::test]
    async fn cancelled_push_leaves_no_file() {
        let (bridge, _log, backend) = setup();
        let dir = tempfile::TempDir::new().unwrap();
        let local = dir.path().join("up.bin");
        std::fs::write(&local, b"data").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = backend
            .push(&local, Path::new("/sdcard/up.bin"), &|_| {}, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!bridge.exists("/sdcard/up.bin"));
    }
}
