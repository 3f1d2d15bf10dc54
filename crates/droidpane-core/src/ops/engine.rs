//! The job scheduler.
//!
//! [`OperationEngine::submit`] assigns an ascending [`JobId`], records the
//! job as `queued` and spawns one task per job. Tasks share nothing but the
//! job table, which sits behind a single mutex that is never held across an
//! await. Each job owns a [`CancellationToken`] threaded through every
//! backend call it makes. When a job completes, the panes showing a
//! directory it touched are refreshed through their try-lock before the
//! terminal status is published.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, CoreResult};
use crate::event::Event;
use crate::fs::backend::{BackendKind, Backends, Location};
use crate::fs::local::is_cross_device;
use crate::fs::stream::Throttle;
use crate::log::{LogSink, LogToken};
use crate::nav::pane::Pane;
use crate::ops::job::{JobId, JobKind, JobSnapshot, JobStatus, OperationRequest};
use crate::ops::totals::compute_totals;
use crate::ops::walker::{WalkObserver, WalkOptions, Walker};

/// Default minimum spacing of intra-file progress events.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Engine tunables, usually derived from the configuration file.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub walk: WalkOptions,
    pub progress_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            walk: WalkOptions::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

struct JobEntry {
    snapshot: JobSnapshot,
    cancel: CancellationToken,
    token: LogToken,
    status: watch::Sender<JobStatus>,
}

struct Inner {
    backends: Backends,
    options: EngineOptions,
    log: Arc<dyn LogSink>,
    next_id: AtomicU64,
    jobs: Mutex<BTreeMap<JobId, JobEntry>>,
    panes: Mutex<Vec<Arc<Pane>>>,
    events: mpsc::UnboundedSender<Event>,
}

/// Runs file operations as independent, cancellable background jobs.
///
/// Cloning is cheap; clones share the same job table.
#[derive(Clone)]
pub struct OperationEngine {
    inner: Arc<Inner>,
}

impl OperationEngine {
    /// Creates an engine and the receiving end of its event channel.
    pub fn new(
        backends: Backends,
        log: Arc<dyn LogSink>,
        options: EngineOptions,
    ) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            backends,
            options,
            log,
            next_id: AtomicU64::new(1),
            jobs: Mutex::new(BTreeMap::new()),
            panes: Mutex::new(Vec::new()),
            events,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            rx,
        )
    }

    /// Registers a pane to be refreshed when a job changes its directory.
    pub fn attach_pane(&self, pane: Arc<Pane>) {
        self.inner.panes.lock().push(pane);
    }

    /// Queues `request` and starts it. Must be called within a Tokio runtime.
    pub fn submit(&self, request: OperationRequest) -> JobId {
        let id = JobId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        let token = self.inner.log.start(&request.label());
        let snapshot = JobSnapshot::new(id, &request);
        let (status, _) = watch::channel(JobStatus::Queued);

        self.inner.jobs.lock().insert(
            id,
            JobEntry {
                snapshot: snapshot.clone(),
                cancel: cancel.clone(),
                token,
                status,
            },
        );
        tracing::info!(job_id = %id, kind = %request.kind, direction = %request.direction(), "job queued");
        self.inner.emit(Event::JobQueued(snapshot));

        let inner = self.inner.clone();
        tokio::spawn(inner.run(id, request, cancel));
        id
    }

    /// Signals one job's cancellation token. Returns `false` if the job is
    /// unknown or already finished.
    pub fn cancel(&self, id: JobId) -> bool {
        let jobs = self.inner.jobs.lock();
        match jobs.get(&id) {
            Some(entry) if !entry.snapshot.status.is_terminal() => {
                tracing::info!(job_id = %id, "cancel requested");
                entry.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Signals every unfinished job. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let jobs = self.inner.jobs.lock();
        let mut count = 0;
        for entry in jobs.values() {
            if !entry.snapshot.status.is_terminal() {
                entry.cancel.cancel();
                count += 1;
            }
        }
        tracing::info!(count, "cancel all requested");
        count
    }

    /// Removes a finished job from the table. Unfinished jobs stay.
    pub fn dismiss(&self, id: JobId) -> bool {
        let mut jobs = self.inner.jobs.lock();
        match jobs.get(&id) {
            Some(entry) if entry.snapshot.status.is_terminal() => {
                jobs.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn job(&self, id: JobId) -> Option<JobSnapshot> {
        self.inner.snapshot(id)
    }

    /// All jobs in the table, in id order.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        self.inner
            .jobs
            .lock()
            .values()
            .map(|entry| entry.snapshot.clone())
            .collect()
    }

    /// Number of jobs that are queued or running.
    pub fn active_count(&self) -> usize {
        self.inner
            .jobs
            .lock()
            .values()
            .filter(|entry| !entry.snapshot.status.is_terminal())
            .count()
    }

    /// Waits until job `id` reaches a terminal status and returns it.
    pub async fn wait(&self, id: JobId) -> Option<JobSnapshot> {
        let mut rx = self.inner.jobs.lock().get(&id)?.status.subscribe();
        let finished = rx.wait_for(|status| status.is_terminal()).await.is_ok();
        if !finished {
            tracing::debug!(job_id = %id, "job dropped before finishing");
        }
        self.job(id)
    }

    /// Waits for every job currently in the table.
    pub async fn wait_all(&self) {
        let ids: Vec<JobId> = self.inner.jobs.lock().keys().copied().collect();
        for id in ids {
            self.wait(id).await;
        }
    }
}

impl Inner {
    fn emit(&self, event: Event) {
        // The UI may already be gone during shutdown.
        let _ = self.events.send(event);
    }

    fn snapshot(&self, id: JobId) -> Option<JobSnapshot> {
        self.jobs.lock().get(&id).map(|entry| entry.snapshot.clone())
    }

    /// Applies `change` to the job and returns the new snapshot if it
    /// reported a change.
    fn update(&self, id: JobId, change: impl FnOnce(&mut JobSnapshot) -> bool) -> Option<JobSnapshot> {
        let mut jobs = self.jobs.lock();
        let entry = jobs.get_mut(&id)?;
        change(&mut entry.snapshot).then(|| entry.snapshot.clone())
    }

    fn note(&self, id: JobId, message: impl Into<String>) {
        let message = message.into();
        let changed = self.update(id, |job| {
            job.set_message(message);
            true
        });
        if let Some(snapshot) = changed {
            self.emit(Event::JobProgress(snapshot));
        }
    }

    async fn run(self: Arc<Self>, id: JobId, request: OperationRequest, cancel: CancellationToken) {
        if cancel.is_cancelled() {
            self.finish(id, Err(CoreError::Cancelled));
            return;
        }
        if let Some(snapshot) = self.update(id, |job| job.advance(JobStatus::Running, "running")) {
            self.emit(Event::JobProgress(snapshot));
        }
        tracing::info!(job_id = %id, label = %request.label(), "job started");

        let result = self.execute(id, &request, &cancel).await;
        self.refresh_panes(&request).await;
        self.finish(id, result);
    }

    fn finish(&self, id: JobId, result: CoreResult<()>) {
        let (status, message) = match &result {
            Ok(()) => (JobStatus::Success, "done".to_string()),
            Err(CoreError::Cancelled) => (JobStatus::Cancelled, "cancelled".to_string()),
            Err(e) => (JobStatus::Failed, e.to_string()),
        };
        let is_error = status == JobStatus::Failed;

        let finished = {
            let mut jobs = self.jobs.lock();
            let Some(entry) = jobs.get_mut(&id) else {
                return;
            };
            if !entry.snapshot.advance(status, message.clone()) {
                return;
            }
            entry.status.send_replace(status);
            (entry.token, entry.snapshot.clone())
        };
        let (token, snapshot) = finished;

        if is_error {
            tracing::warn!(job_id = %id, error = %message, "job failed");
        } else {
            tracing::info!(job_id = %id, %status, "job finished");
        }
        self.log.update(token, &message, is_error);
        self.emit(Event::JobFinished(snapshot));
    }

    async fn execute(
        &self,
        id: JobId,
        request: &OperationRequest,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        if request.touches_remote() {
            self.backends
                .get(BackendKind::Remote)
                .ensure_available()
                .await?;
        }

        let source = &request.source;
        match request.kind {
            JobKind::Copy => self.copy(id, source, destination(request)?, cancel).await,
            JobKind::Move => self.move_entry(id, source, destination(request)?, cancel).await,
            JobKind::Rename => self.rename(source, destination(request)?, cancel).await,
            JobKind::Delete => {
                self.note(id, format!("deleting {}", source.path.display()));
                self.backends
                    .get(source.backend)
                    .remove_all(&source.path, cancel)
                    .await
            }
            JobKind::Mkdir => {
                self.backends
                    .get(source.backend)
                    .mkdir(&source.path, cancel)
                    .await
            }
        }
    }

    async fn copy(
        &self,
        id: JobId,
        src: &Location,
        dst: &Location,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        if src.backend == dst.backend && dst.path.starts_with(&src.path) {
            return Err(CoreError::InvalidName(format!(
                "cannot copy {src} into itself"
            )));
        }
        let from = self.backends.get(src.backend);
        let to = self.backends.get(dst.backend);

        if src.backend == BackendKind::Remote && dst.backend == BackendKind::Remote {
            self.note(id, "copying on device");
            return from.copy_native(&src.path, &dst.path, cancel).await;
        }

        self.note(id, "counting");
        let on_error = self.options.walk.on_error;
        match compute_totals(from.as_ref(), &src.path, on_error, cancel).await {
            Ok(totals) => {
                if let Some(snapshot) =
                    self.update(id, |job| job.set_totals(totals.files, totals.bytes))
                {
                    self.emit(Event::JobProgress(snapshot));
                }
                tracing::debug!(job_id = %id, files = totals.files, bytes = totals.bytes, "totals computed");
            }
            // The walker reports the failing entries itself; totals stay unknown.
            Err(e) if !on_error.stops_on(&e) => {
                tracing::warn!(job_id = %id, error = %e, "counting failed, totals unknown");
            }
            Err(e) => return Err(e),
        }

        let observer = JobObserver::new(self, id);
        let summary = Walker::new(
            from.as_ref(),
            to.as_ref(),
            &self.options.walk,
            cancel,
            &observer,
        )
        .run(&src.path, &dst.path)
        .await?;
        tracing::info!(job_id = %id, files = summary.files, bytes = summary.bytes, "copy complete");
        Ok(())
    }

    async fn move_entry(
        &self,
        id: JobId,
        src: &Location,
        dst: &Location,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        let from = self.backends.get(src.backend);
        if src.backend == dst.backend {
            match from.rename(&src.path, &dst.path, cancel).await {
                Err(e) if is_cross_device(&e) => {
                    tracing::debug!(job_id = %id, "rename crossed filesystems, copying instead");
                }
                other => return other,
            }
        }

        self.copy(id, src, dst, cancel).await?;
        if cancel.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        self.note(id, format!("removing {}", src.path.display()));
        from.remove_all(&src.path, cancel).await
    }

    async fn rename(
        &self,
        src: &Location,
        dst: &Location,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        if src.backend != dst.backend {
            return Err(CoreError::Unsupported(
                "rename across backends".to_string(),
            ));
        }
        let backend = self.backends.get(dst.backend);
        if backend.exists(&dst.path).await? {
            return Err(CoreError::DestinationExists(dst.path.clone()));
        }
        backend.rename(&src.path, &dst.path, cancel).await
    }

    async fn refresh_panes(&self, request: &OperationRequest) {
        let panes: Vec<Arc<Pane>> = self.panes.lock().clone();
        for dir in request.affected_dirs() {
            for pane in &panes {
                match pane.refresh_if_showing(&dir).await {
                    Ok(true) => self.emit(Event::PaneRefreshed(pane.id())),
                    Ok(false) => {}
                    Err(CoreError::Busy) => {
                        tracing::debug!(pane = %pane.id(), %dir, "pane busy, refresh skipped");
                        self.emit(Event::RefreshSkipped {
                            pane: pane.id(),
                            dir: dir.clone(),
                        });
                    }
                    Err(e) => {
                        tracing::warn!(pane = %pane.id(), %dir, error = %e, "refresh after job failed");
                    }
                }
            }
        }
    }
}

fn destination(request: &OperationRequest) -> CoreResult<&Location> {
    request
        .destination
        .as_ref()
        .ok_or_else(|| CoreError::InvalidName(format!("{} needs a destination", request.kind)))
}

/// Feeds walker progress into the job table.
struct JobObserver<'a> {
    inner: &'a Inner,
    id: JobId,
    files: AtomicU64,
    throttle: Throttle,
}

impl<'a> JobObserver<'a> {
    fn new(inner: &'a Inner, id: JobId) -> Self {
        Self {
            inner,
            id,
            files: AtomicU64::new(0),
            throttle: Throttle::new(inner.options.progress_interval),
        }
    }
}

impl WalkObserver for JobObserver<'_> {
    fn on_bytes(&self, done_bytes: u64) {
        let files = self.files.load(Ordering::Relaxed);
        let changed = self
            .inner
            .update(self.id, |job| job.record(files, done_bytes));
        if let Some(snapshot) = changed {
            if self.throttle.ready() {
                self.inner.emit(Event::JobProgress(snapshot));
            }
        }
    }

    fn on_file(&self, path: &Path, done_files: u64, done_bytes: u64) {
        self.files.store(done_files, Ordering::Relaxed);
        let message = format!("copied {}", path.display());
        let changed = self.inner.update(self.id, |job| {
            let recorded = job.record(done_files, done_bytes);
            job.set_message(message);
            recorded
        });
        if let Some(snapshot) = changed {
            self.inner.emit(Event::JobProgress(snapshot));
        }
    }

    fn on_skip(&self, path: &Path, err: &CoreError) {
        self.inner
            .log
            .add(&format!("skip {}", path.display()), &err.to_string(), true);
    }
}
