//! Recursive tree copy across any pair of backends.
//!
//! The walker visits `src` depth-first in the order produced by the
//! [`DirectoryEnumerator`], so identical trees always produce identical
//! progress sequences. For each leaf it picks the cheapest mechanism
//! available for the backend pair: a streamed read/write when both sides
//! are the same kind, or the remote bulk transfer when crossing over.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::fs::backend::{Backend, BackendKind};
use crate::fs::entry::{DirEntry, EntryKind};
use crate::fs::stream::{copy_stream, DEFAULT_CHUNK_SIZE};
use crate::nav::filter::{SortKey, SortOrder};
use crate::nav::listing::DirectoryEnumerator;

/// What the walker does when a single entry fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Stop the walk and propagate the error.
    #[default]
    Abort,
    /// Record the failure and continue with the next sibling.
    Skip,
}

impl OnError {
    /// Whether `err` ends the whole job under this policy. Cancellation and
    /// a vanished device always do.
    pub fn stops_on(self, err: &CoreError) -> bool {
        self == OnError::Abort
            || matches!(err, CoreError::Cancelled | CoreError::BackendUnavailable(_))
    }
}

/// Tunables shared by every copy job.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub sort: SortKey,
    pub order: SortOrder,
    pub chunk_size: usize,
    pub on_error: OnError,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            sort: SortKey::default(),
            order: SortOrder::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            on_error: OnError::default(),
        }
    }
}

/// Receives progress from a running walk.
pub trait WalkObserver: Send + Sync {
    /// Cumulative bytes of the whole walk, including the file in flight.
    fn on_bytes(&self, done_bytes: u64);

    /// A leaf file was copied.
    fn on_file(&self, path: &Path, done_files: u64, done_bytes: u64);

    /// An entry failed and was skipped.
    fn on_skip(&self, _path: &Path, _err: &CoreError) {}
}

/// Counters returned by a finished walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    pub files: u64,
    pub bytes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    files: u64,
    bytes: u64,
    failed: usize,
    first_failure: Option<String>,
}

type WalkFuture<'a> = Pin<Box<dyn Future<Output = CoreResult<()>> + Send + 'a>>;

/// Copies one tree from `src` to `dst`.
pub struct Walker<'a> {
    src: &'a dyn Backend,
    dst: &'a dyn Backend,
    enumerator: DirectoryEnumerator,
    options: &'a WalkOptions,
    cancel: &'a CancellationToken,
    observer: &'a dyn WalkObserver,
    counters: Mutex<Counters>,
}

impl<'a> Walker<'a> {
    pub fn new(
        src: &'a dyn Backend,
        dst: &'a dyn Backend,
        options: &'a WalkOptions,
        cancel: &'a CancellationToken,
        observer: &'a dyn WalkObserver,
    ) -> Self {
        Self {
            src,
            dst,
            enumerator: DirectoryEnumerator::for_walk(options.sort, options.order),
            options,
            cancel,
            observer,
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Copies `src` to `dst`.
    ///
    /// With [`OnError::Skip`], failed entries are counted and the walk ends
    /// in [`CoreError::PartialWalkFailure`]. Cancellation and a vanished
    /// device always stop the walk.
    pub async fn run(&self, src: &Path, dst: &Path) -> CoreResult<WalkSummary> {
        self.walk(src.to_path_buf(), dst.to_path_buf()).await?;

        let counters = self.counters.lock();
        if counters.failed > 0 {
            return Err(CoreError::PartialWalkFailure {
                failed: counters.failed,
                first: counters.first_failure.clone().unwrap_or_default(),
            });
        }
        Ok(WalkSummary {
            files: counters.files,
            bytes: counters.bytes,
        })
    }

    fn walk(&self, src: PathBuf, dst: PathBuf) -> WalkFuture<'_> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let entry = self.src.stat(&src).await?;
            match entry.kind() {
                EntryKind::Dir => self.walk_dir(entry.mode(), &src, &dst).await,
                EntryKind::Symlink => self.walk_link(&src, &dst).await,
                EntryKind::File => self.copy_file(&entry, &dst).await,
                EntryKind::Pipe => self.copy_pipe(&entry, &dst).await,
                EntryKind::Special => {
                    tracing::debug!(path = %src.display(), "skipping special file");
                    Ok(())
                }
            }
        })
    }

    async fn walk_dir(&self, mode: u32, src: &Path, dst: &Path) -> CoreResult<()> {
        self.dst.ensure_dir(dst, mode, self.cancel).await?;
        let children = self.enumerator.list(self.src, src).await?;
        for child in children {
            let target = dst.join(child.name());
            match self.walk(child.path().to_path_buf(), target).await {
                Ok(()) => {}
                Err(e) if self.options.on_error.stops_on(&e) => return Err(e),
                Err(e) => self.skip(child.path(), e),
            }
        }
        Ok(())
    }

    async fn walk_link(&self, src: &Path, dst: &Path) -> CoreResult<()> {
        let (Some(parent), Some(name)) = (src.parent(), src.file_name()) else {
            return Err(CoreError::NotFound(src.to_path_buf()));
        };
        let name = name.to_string_lossy();
        let real = self.src.resolve_link(src, self.cancel).await?;
        let target = self.src.stat(&real).await?;

        if self.src.is_symlink_to_dir(parent, &name, self.cancel).await {
            // List through the link so children keep paths under `src`.
            return self.walk_dir(target.mode(), src, dst).await;
        }
        match target.kind() {
            EntryKind::File => self.copy_file(&target, dst).await,
            EntryKind::Pipe => self.copy_pipe(&target, dst).await,
            _ => {
                tracing::debug!(path = %src.display(), "skipping link to special file");
                Ok(())
            }
        }
    }

    async fn copy_file(&self, entry: &DirEntry, dst: &Path) -> CoreResult<()> {
        let src = entry.path();
        let base = self.counters.lock().bytes;
        let report = |n: u64| self.observer.on_bytes(base + n);

        let copied = match (self.src.kind(), self.dst.kind()) {
            (BackendKind::Local, BackendKind::Remote) => {
                let bulk = self.dst.bulk().ok_or_else(|| unsupported(self.dst))?;
                bulk.push(src, dst, &report, self.cancel).await?;
                entry.size()
            }
            (BackendKind::Remote, BackendKind::Local) => {
                let bulk = self.src.bulk().ok_or_else(|| unsupported(self.src))?;
                bulk.pull(src, dst, &report, self.cancel).await?;
                entry.size()
            }
            _ => {
                let mut reader = self.src.open_read(src).await?;
                let mut writer = self.dst.create_file(dst, entry.mode()).await?;
                copy_stream(
                    &mut reader,
                    &mut writer,
                    self.options.chunk_size,
                    self.cancel,
                    &report,
                )
                .await?
            }
        };

        let (files, bytes) = {
            let mut counters = self.counters.lock();
            counters.files += 1;
            counters.bytes += copied;
            (counters.files, counters.bytes)
        };
        tracing::debug!(src = %src.display(), dst = %dst.display(), bytes = copied, "copied file");
        self.observer.on_file(dst, files, bytes);
        Ok(())
    }

    async fn copy_pipe(&self, entry: &DirEntry, dst: &Path) -> CoreResult<()> {
        if self.src.kind() == BackendKind::Local && self.dst.kind() == BackendKind::Local {
            return self.dst.make_fifo(dst, entry.mode()).await;
        }
        tracing::debug!(path = %entry.path().display(), "skipping named pipe");
        Ok(())
    }

    fn skip(&self, path: &Path, err: CoreError) {
        tracing::warn!(path = %path.display(), error = %err, "skipping entry");
        self.observer.on_skip(path, &err);
        let mut counters = self.counters.lock();
        counters.failed += 1;
        if counters.first_failure.is_none() {
            counters.first_failure = Some(err.to_string());
        }
    }
}

fn unsupported(backend: &dyn Backend) -> CoreError {
    CoreError::Unsupported(format!("{} bulk transfer", backend.kind()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::fs::LocalBackend;
    use crate::log::ActivityLog;
    use crate::remote::{Bridge, ConnectionState, MemoryBridge, RemoteBackend};

    #[derive(Default)]
    struct Recorder {
        files: Mutex<Vec<(PathBuf, u64, u64)>>,
        bytes: Mutex<Vec<u64>>,
        skipped: Mutex<Vec<PathBuf>>,
    }

    impl WalkObserver for Recorder {
        fn on_bytes(&self, done_bytes: u64) {
            self.bytes.lock().push(done_bytes);
        }

        fn on_file(&self, path: &Path, done_files: u64, done_bytes: u64) {
            self.files
                .lock()
                .push((path.to_path_buf(), done_files, done_bytes));
        }

        fn on_skip(&self, path: &Path, _err: &CoreError) {
            self.skipped.lock().push(path.to_path_buf());
        }
    }

    fn source_tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("b")).unwrap();
        fs::write(src.join("a.txt"), vec![b'a'; 10]).unwrap();
        fs::write(src.join("b/c.txt"), vec![b'c'; 20]).unwrap();
        tmp
    }

    fn remote(bridge: &Arc<MemoryBridge>) -> RemoteBackend<MemoryBridge> {
        RemoteBackend::new(bridge.clone(), Arc::new(ActivityLog::default()))
    }

    #[tokio::test]
    async fn local_to_local_copies_tree_depth_first() {
        let tmp = source_tree();
        let local = LocalBackend::new();
        let options = WalkOptions::default();
        let cancel = CancellationToken::new();
        let recorder = Recorder::default();
        let dst = tmp.path().join("dst");

        let summary = Walker::new(&local, &local, &options, &cancel, &recorder)
            .run(&tmp.path().join("src"), &dst)
            .await
            .unwrap();

        assert_eq!(summary, WalkSummary { files: 2, bytes: 30 });
        assert_eq!(fs::read(dst.join("b/c.txt")).unwrap(), vec![b'c'; 20]);
        // Directories sort first, so b/c.txt is copied before a.txt.
        let files = recorder.files.lock().clone();
        assert_eq!(
            files,
            vec![(dst.join("b/c.txt"), 1, 20), (dst.join("a.txt"), 2, 30)]
        );
        let bytes = recorder.bytes.lock().clone();
        assert!(bytes.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn local_to_remote_uses_bulk_push() {
        let tmp = source_tree();
        let bridge = Arc::new(MemoryBridge::new());
        bridge.add_dir("/sdcard");
        let remote = remote(&bridge);
        let local = LocalBackend::new();
        let options = WalkOptions::default();
        let cancel = CancellationToken::new();
        let recorder = Recorder::default();

        Walker::new(&local, &remote, &options, &cancel, &recorder)
            .run(&tmp.path().join("src"), Path::new("/sdcard/dst"))
            .await
            .unwrap();

        assert_eq!(bridge.read_file("/sdcard/dst/b/c.txt").unwrap(), vec![b'c'; 20]);
        assert_eq!(bridge.read_file("/sdcard/dst/a.txt").unwrap().len(), 10);
        assert!(bridge.commands().iter().any(|c| c.starts_with("mkdir -p '/sdcard/dst'")));
    }

    #[tokio::test]
    async fn remote_to_local_uses_bulk_pull() {
        let tmp = TempDir::new().unwrap();
        let bridge = Arc::new(MemoryBridge::new());
        bridge.add_file("/sdcard/music/x.mp3", vec![1u8; 12]);
        bridge.add_file("/sdcard/music/sub/y.mp3", vec![2u8; 3]);
        let remote = remote(&bridge);
        let local = LocalBackend::new();
        let options = WalkOptions::default();
        let cancel = CancellationToken::new();
        let recorder = Recorder::default();
        let dst = tmp.path().join("music");

        let summary = Walker::new(&remote, &local, &options, &cancel, &recorder)
            .run(Path::new("/sdcard/music"), &dst)
            .await
            .unwrap();

        assert_eq!(summary, WalkSummary { files: 2, bytes: 15 });
        assert_eq!(fs::read(dst.join("sub/y.mp3")).unwrap(), vec![2u8; 3]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_dereferenced() {
        let tmp = source_tree();
        let src = tmp.path().join("src");
        std::os::unix::fs::symlink(src.join("a.txt"), src.join("link.txt")).unwrap();
        std::os::unix::fs::symlink(src.join("b"), src.join("linkdir")).unwrap();
        let local = LocalBackend::new();
        let options = WalkOptions::default();
        let cancel = CancellationToken::new();
        let recorder = Recorder::default();
        let dst = tmp.path().join("dst");

        Walker::new(&local, &local, &options, &cancel, &recorder)
            .run(&src, &dst)
            .await
            .unwrap();

        let link = fs::symlink_metadata(dst.join("link.txt")).unwrap();
        assert!(link.file_type().is_file());
        assert_eq!(fs::read(dst.join("linkdir/c.txt")).unwrap().len(), 20);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pipes_recreated_locally_skipped_remotely() {
        use std::os::unix::fs::FileTypeExt;

        let tmp = source_tree();
        let src = tmp.path().join("src");
        LocalBackend::new()
            .make_fifo(&src.join("fifo"), 0o644)
            .await
            .unwrap();
        let local = LocalBackend::new();
        let options = WalkOptions::default();
        let cancel = CancellationToken::new();
        let recorder = Recorder::default();

        let dst = tmp.path().join("dst");
        Walker::new(&local, &local, &options, &cancel, &recorder)
            .run(&src, &dst)
            .await
            .unwrap();
        let meta = fs::symlink_metadata(dst.join("fifo")).unwrap();
        assert!(meta.file_type().is_fifo());

        let bridge = Arc::new(MemoryBridge::new());
        let remote = remote(&bridge);
        Walker::new(&local, &remote, &options, &cancel, &recorder)
            .run(&src, Path::new("/sdcard/dst"))
            .await
            .unwrap();
        assert!(!bridge.exists("/sdcard/dst/fifo"));
        assert!(bridge.exists("/sdcard/dst/a.txt"));
    }

    #[tokio::test]
    async fn cancelled_walk_copies_nothing() {
        let tmp = source_tree();
        let local = LocalBackend::new();
        let options = WalkOptions::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let recorder = Recorder::default();
        let dst = tmp.path().join("dst");

        let err = Walker::new(&local, &local, &options, &cancel, &recorder)
            .run(&tmp.path().join("src"), &dst)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!dst.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn abort_stops_at_first_failure() {
        let tmp = source_tree();
        let src = tmp.path().join("src");
        // A dangling link fails to resolve.
        std::os::unix::fs::symlink(src.join("gone"), src.join("0dangling")).unwrap();
        let local = LocalBackend::new();
        let options = WalkOptions::default();
        let cancel = CancellationToken::new();
        let recorder = Recorder::default();
        let dst = tmp.path().join("dst");

        let err = Walker::new(&local, &local, &options, &cancel, &recorder)
            .run(&src, &dst)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
        // b/ came first and stays in place; a.txt after the failure was never copied.
        assert!(dst.join("b/c.txt").exists());
        assert!(!dst.join("a.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn skip_continues_and_reports_partial_failure() {
        let tmp = source_tree();
        let src = tmp.path().join("src");
        std::os::unix::fs::symlink(src.join("gone"), src.join("0dangling")).unwrap();
        let local = LocalBackend::new();
        let options = WalkOptions {
            on_error: OnError::Skip,
            ..WalkOptions::default()
        };
        let cancel = CancellationToken::new();
        let recorder = Recorder::default();
        let dst = tmp.path().join("dst");

        let err = Walker::new(&local, &local, &options, &cancel, &recorder)
            .run(&src, &dst)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PartialWalkFailure { failed: 1, .. }));
        assert!(dst.join("a.txt").exists());
        assert_eq!(recorder.skipped.lock().clone(), vec![src.join("0dangling")]);
    }

    #[tokio::test]
    async fn device_loss_is_fatal_even_when_skipping() {
        let tmp = source_tree();
        let bridge = Arc::new(MemoryBridge::new());
        bridge.disconnect_after_transfers(1);
        let remote = remote(&bridge);
        let local = LocalBackend::new();
        let options = WalkOptions {
            on_error: OnError::Skip,
            ..WalkOptions::default()
        };
        let cancel = CancellationToken::new();
        let recorder = Recorder::default();

        let err = Walker::new(&local, &remote, &options, &cancel, &recorder)
            .run(&tmp.path().join("src"), Path::new("/sdcard/dst"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::BackendUnavailable(_)));
        assert_eq!(bridge.connection_state().await, ConnectionState::Absent);
    }
}
