//! The two panes and the engine behind one dispatcher.
//!
//! [`Session::execute`] is the single entry point a frontend needs: it
//! routes a [`Command`] to the focused pane or turns it into jobs. Pane
//! commands answer synchronously (or with [`CoreError::Busy`] when the pane
//! is mid-action); job commands return as soon as the jobs are queued.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::event::{Command, Event};
use crate::fs::backend::{BackendKind, Backends, Location};
use crate::log::LogSink;
use crate::nav::filter::EntryFilter;
use crate::nav::pane::{Pane, PaneHomes, PaneId, PaneView};
use crate::ops::engine::OperationEngine;
use crate::ops::job::{JobId, JobKind, OperationRequest};

/// What executing a command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The command completed in place.
    Done,
    /// Jobs were queued, in submission order. May be empty when nothing was
    /// selected.
    Submitted(Vec<JobId>),
    /// Number of jobs a cancel or dismiss affected.
    Signalled(usize),
    /// Standard output of a foreground shell command.
    Output(String),
    /// A background shell command was started.
    Started,
}

/// Owns both panes, the operation engine and the focus.
pub struct Session {
    left: Arc<Pane>,
    right: Arc<Pane>,
    engine: OperationEngine,
    focus: PaneId,
    backends: Backends,
    log: Arc<dyn LogSink>,
    shells: TaskTracker,
    shell_cancel: CancellationToken,
}

impl Session {
    /// Builds a session with the left pane at `left` and the right pane at
    /// `right`. Both panes start empty; call [`Session::load`] to list them.
    pub fn new(
        backends: Backends,
        homes: PaneHomes,
        left: Location,
        right: Location,
        config: &Config,
        log: Arc<dyn LogSink>,
    ) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (engine, events) =
            OperationEngine::new(backends.clone(), log.clone(), config.engine_options());
        let make = |id, start| {
            Arc::new(Pane::new(
                id,
                backends.clone(),
                homes.clone(),
                start,
                config.enumerator(),
            ))
        };
        let left = make(PaneId::Left, left);
        let right = make(PaneId::Right, right);
        engine.attach_pane(left.clone());
        engine.attach_pane(right.clone());

        let session = Self {
            left,
            right,
            engine,
            focus: PaneId::Left,
            backends,
            log,
            shells: TaskTracker::new(),
            shell_cancel: CancellationToken::new(),
        };
        (session, events)
    }

    /// Lists both panes.
    pub async fn load(&self) -> CoreResult<()> {
        self.left.refresh().await?;
        self.right.refresh().await
    }

    pub fn focus(&self) -> PaneId {
        self.focus
    }

    pub fn pane(&self, id: PaneId) -> &Arc<Pane> {
        match id {
            PaneId::Left => &self.left,
            PaneId::Right => &self.right,
        }
    }

    pub fn focused(&self) -> &Arc<Pane> {
        self.pane(self.focus)
    }

    pub fn engine(&self) -> &OperationEngine {
        &self.engine
    }

    /// Snapshots of both panes, left first.
    pub fn views(&self) -> (PaneView, PaneView) {
        (self.left.view(), self.right.view())
    }

    /// Runs `command` against the focused pane or the engine.
    pub async fn execute(&mut self, command: Command) -> CoreResult<Outcome> {
        tracing::debug!(pane = %self.focus, ?command, "execute");
        let pane = self.focused().clone();
        match command {
            Command::ChangeDir(path) => pane.change_dir(&path).await?,
            Command::Enter => pane.enter().await?,
            Command::GoUp => pane.go_up().await?,
            Command::GoBack => pane.go_back().await?,
            Command::GoForward => pane.go_forward().await?,
            Command::Refresh => pane.refresh().await?,
            Command::ToggleHidden => pane.toggle_hidden()?,
            Command::SetSort(sort, order) => pane.set_sort(sort, order)?,
            Command::Filter(query) => pane.set_filter(EntryFilter::parse(&query)?)?,
            Command::MoveCursor(delta) => pane.move_cursor(delta)?,
            Command::CursorTop => pane.go_to_first()?,
            Command::CursorBottom => pane.go_to_last()?,
            Command::SwitchBackend => pane.switch_backend().await?,
            Command::FocusOther => self.focus = self.focus.other(),
            Command::ToggleMark => pane.toggle_mark()?,
            Command::MarkAll => pane.mark_all()?,
            Command::InvertMarks => pane.invert_marks()?,
            Command::ClearMarks => pane.clear_marks()?,
            Command::Copy => return self.transfer(JobKind::Copy).map(Outcome::Submitted),
            Command::Move => return self.transfer(JobKind::Move).map(Outcome::Submitted),
            Command::Delete => return Ok(Outcome::Submitted(self.delete())),
            Command::Rename(name) => return self.rename(&name).map(Outcome::Submitted),
            Command::Mkdir(name) => return self.mkdir(&name).map(Outcome::Submitted),
            Command::Cancel(id) => return Ok(Outcome::Signalled(self.engine.cancel(id).into())),
            Command::CancelAll => return Ok(Outcome::Signalled(self.engine.cancel_all())),
            Command::Dismiss(id) => return Ok(Outcome::Signalled(self.engine.dismiss(id).into())),
            Command::Exec {
                backend,
                cmd,
                background,
            } => return self.exec(backend, cmd, background).await,
            Command::ClearLog => self.log.clear(),
        }
        Ok(Outcome::Done)
    }

    /// Cancels every unfinished job and background shell command, then waits
    /// for all of them to settle. Returns how many jobs were signalled.
    pub async fn shutdown(&self) -> usize {
        let cancelled = self.engine.cancel_all();
        if cancelled > 0 {
            tracing::info!(cancelled, "cancelling jobs before exit");
        }
        self.shell_cancel.cancel();
        self.shells.close();
        self.engine.wait_all().await;
        self.shells.wait().await;
        cancelled
    }

    /// Runs `cmd` on `backend`, logging it as one activity-log entry.
    async fn exec(
        &self,
        backend: BackendKind,
        cmd: String,
        background: bool,
    ) -> CoreResult<Outcome> {
        let cmd = cmd.trim().to_string();
        if cmd.is_empty() {
            return Err(CoreError::Parse("empty command".to_string()));
        }
        let shell = self.backends.get(backend).clone();
        let log = self.log.clone();
        let cancel = self.shell_cancel.child_token();
        let token = log.start(&format!("exec {backend}: {cmd}"));
        tracing::info!(%backend, cmd = %cmd, background, "exec");

        let run = async move {
            let result = shell.run_shell(&cmd, &cancel).await;
            match &result {
                Ok(out) => log.update(token, out.trim_end(), false),
                Err(e) => log.update(token, &e.to_string(), !e.is_cancelled()),
            }
            result
        };
        if background {
            self.shells.spawn(async move {
                let _ = run.await;
            });
            return Ok(Outcome::Started);
        }
        run.await.map(Outcome::Output)
    }

    /// The marked entries of the focused pane, or its highlighted entry when
    /// nothing is marked.
    fn selection(&self) -> Vec<Location> {
        let view = self.focused().view();
        if !view.marked.is_empty() {
            return view.marked;
        }
        view.highlighted()
            .map(|entry| Location::new(view.location.backend, entry.path()))
            .into_iter()
            .collect()
    }

    /// Submits `requests` and then clears the focused pane's marks. A
    /// request that could not be built leaves the marks in place.
    fn submit_selection(&self, requests: Vec<OperationRequest>) -> Vec<JobId> {
        let ids = self.submit_all(requests);
        if let Err(e) = self.focused().clear_marks() {
            tracing::debug!(pane = %self.focus, error = %e, "marks kept");
        }
        ids
    }

    fn transfer(&self, kind: JobKind) -> CoreResult<Vec<JobId>> {
        let target = self.pane(self.focus.other()).view().location;
        let requests = self
            .selection()
            .into_iter()
            .map(|source| {
                let name = source
                    .path
                    .file_name()
                    .ok_or_else(|| CoreError::InvalidName(source.to_string()))?;
                let destination = target.join(name);
                Ok(match kind {
                    JobKind::Move => OperationRequest::move_to(source, destination),
                    _ => OperationRequest::copy(source, destination),
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(self.submit_selection(requests))
    }

    fn delete(&self) -> Vec<JobId> {
        let requests = self
            .selection()
            .into_iter()
            .map(OperationRequest::delete)
            .collect();
        self.submit_selection(requests)
    }

    fn rename(&self, name: &str) -> CoreResult<Vec<JobId>> {
        validate_name(name)?;
        let view = self.focused().view();
        let Some(entry) = view.highlighted() else {
            return Ok(Vec::new());
        };
        let source = Location::new(view.location.backend, entry.path());
        let destination = source.parent().join(name);
        Ok(self.submit_all(vec![OperationRequest::rename(source, destination)]))
    }

    fn mkdir(&self, name: &str) -> CoreResult<Vec<JobId>> {
        validate_name(name)?;
        let target = self.focused().view().location.join(name);
        Ok(self.submit_all(vec![OperationRequest::mkdir(target)]))
    }

    fn submit_all(&self, requests: Vec<OperationRequest>) -> Vec<JobId> {
        requests
            .into_iter()
            .map(|request| self.engine.submit(request))
            .collect()
    }
}

/// Rejects names that would escape the current directory.
fn validate_name(name: &str) -> CoreResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0')
    {
        return Err(CoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::fs::LocalBackend;
    use crate::log::ActivityLog;
    use crate::ops::job::JobStatus;
    use crate::remote::{MemoryBridge, RemoteBackend};

    struct Rig {
        tmp: TempDir,
        bridge: Arc<MemoryBridge>,
        log: Arc<ActivityLog>,
        session: Session,
        _events: mpsc::UnboundedReceiver<Event>,
    }

    async fn rig() -> Rig {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("docs")).unwrap();
        fs::write(tmp.path().join("docs/readme.md"), "hi").unwrap();
        fs::write(tmp.path().join("a.txt"), "alpha").unwrap();

        let bridge = Arc::new(MemoryBridge::new());
        bridge.add_dir("/sdcard/Music");
        let log = Arc::new(ActivityLog::default());
        let remote =
            RemoteBackend::new(bridge.clone(), log.clone()).with_progress_interval(Duration::ZERO);
        let backends = Backends::new(Arc::new(LocalBackend::new()), Arc::new(remote));
        let homes = PaneHomes {
            local: tmp.path().to_path_buf(),
            remote: "/sdcard".into(),
        };
        let mut config = Config::default();
        config.transfer.progress_interval_ms = 0;

        let (session, events) = Session::new(
            backends,
            homes,
            Location::local(tmp.path()),
            Location::remote("/sdcard"),
            &config,
            log.clone(),
        );
        session.load().await.unwrap();
        Rig {
            tmp,
            bridge,
            log,
            session,
            _events: events,
        }
    }

    fn names(view: &PaneView) -> Vec<String> {
        view.entries.iter().map(|e| e.name().to_string()).collect()
    }

    fn submitted(outcome: Outcome) -> Vec<JobId> {
        match outcome {
            Outcome::Submitted(ids) => ids,
            other => panic!("expected jobs, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn navigation_applies_to_focused_pane() {
        let mut rig = rig().await;
        let left_before = rig.session.pane(PaneId::Left).view();

        rig.session.execute(Command::FocusOther).await.unwrap();
        assert_eq!(rig.session.focus(), PaneId::Right);
        rig.session
            .execute(Command::ChangeDir("Music".into()))
            .await
            .unwrap();

        let (left, right) = rig.session.views();
        assert_eq!(right.location, Location::remote("/sdcard/Music"));
        assert_eq!(left, left_before);
    }

    #[tokio::test]
    async fn copy_highlighted_entry_into_other_pane() {
        let mut rig = rig().await;
        rig.session.execute(Command::MoveCursor(1)).await.unwrap();
        assert_eq!(
            rig.session.focused().view().highlighted().unwrap().name(),
            "a.txt"
        );

        let ids = submitted(rig.session.execute(Command::Copy).await.unwrap());
        assert_eq!(ids.len(), 1);
        let job = rig.session.engine().wait(ids[0]).await.unwrap();

        assert_eq!(job.status, JobStatus::Success, "{}", job.message);
        assert_eq!(
            rig.bridge.read_file("/sdcard/a.txt").as_deref(),
            Some(&b"alpha"[..])
        );
        assert!(names(&rig.session.pane(PaneId::Right).view()).contains(&"a.txt".to_string()));
    }

    #[tokio::test]
    async fn marked_entries_become_one_job_each() {
        let mut rig = rig().await;
        rig.session.execute(Command::MarkAll).await.unwrap();

        let ids = submitted(rig.session.execute(Command::Copy).await.unwrap());
        assert_eq!(ids.len(), 2);
        assert!(rig.session.focused().view().marked.is_empty());

        rig.session.engine().wait_all().await;
        assert!(rig.bridge.is_dir("/sdcard/docs"));
        assert!(rig.bridge.exists("/sdcard/docs/readme.md"));
        assert!(rig.bridge.exists("/sdcard/a.txt"));
    }

    #[tokio::test]
    async fn unusable_selection_keeps_marks() {
        let mut rig = rig().await;
        rig.session.execute(Command::MarkAll).await.unwrap();
        rig.session
            .focused()
            .mark_location(Location::local("/"))
            .unwrap();

        let err = rig.session.execute(Command::Copy).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidName(_)));
        assert_eq!(rig.session.focused().view().marked.len(), 3);
        assert!(rig.session.engine().jobs().is_empty());
    }

    #[tokio::test]
    async fn move_removes_source() {
        let mut rig = rig().await;
        rig.session.execute(Command::CursorBottom).await.unwrap();

        let ids = submitted(rig.session.execute(Command::Move).await.unwrap());
        rig.session.engine().wait(ids[0]).await.unwrap();

        assert!(rig.bridge.exists("/sdcard/a.txt"));
        assert!(!rig.tmp.path().join("a.txt").exists());
        assert_eq!(names(&rig.session.pane(PaneId::Left).view()), vec!["docs"]);
    }

    #[tokio::test]
    async fn delete_highlighted_entry() {
        let mut rig = rig().await;

        let ids = submitted(rig.session.execute(Command::Delete).await.unwrap());
        let job = rig.session.engine().wait(ids[0]).await.unwrap();

        assert_eq!(job.status, JobStatus::Success, "{}", job.message);
        assert!(!rig.tmp.path().join("docs").exists());
        assert_eq!(names(&rig.session.focused().view()), vec!["a.txt"]);
    }

    #[tokio::test]
    async fn rename_rejects_bad_names() {
        let mut rig = rig().await;
        for bad in ["", ".", "..", "a/b"] {
            let err = rig
                .session
                .execute(Command::Rename(bad.into()))
                .await
                .unwrap_err();
            assert!(matches!(err, CoreError::InvalidName(_)), "{bad:?}");
        }
        assert!(rig.session.engine().jobs().is_empty());
    }

    #[tokio::test]
    async fn rename_highlighted_entry() {
        let mut rig = rig().await;
        rig.session.execute(Command::CursorBottom).await.unwrap();

        let ids = submitted(
            rig.session
                .execute(Command::Rename("b.txt".into()))
                .await
                .unwrap(),
        );
        rig.session.engine().wait(ids[0]).await.unwrap();

        assert!(rig.tmp.path().join("b.txt").exists());
        assert_eq!(names(&rig.session.focused().view()), vec!["docs", "b.txt"]);
    }

    #[tokio::test]
    async fn mkdir_in_focused_remote_pane() {
        let mut rig = rig().await;
        rig.session.execute(Command::FocusOther).await.unwrap();

        let ids = submitted(
            rig.session
                .execute(Command::Mkdir("Photos".into()))
                .await
                .unwrap(),
        );
        rig.session.engine().wait(ids[0]).await.unwrap();

        assert!(rig.bridge.is_dir("/sdcard/Photos"));
        assert!(names(&rig.session.focused().view()).contains(&"Photos".to_string()));
    }

    #[tokio::test]
    async fn filter_commands_parse_queries() {
        let mut rig = rig().await;
        rig.session
            .execute(Command::Filter("/^a/".into()))
            .await
            .unwrap();
        assert_eq!(names(&rig.session.focused().view()), vec!["a.txt"]);

        let err = rig
            .session
            .execute(Command::Filter("/[/".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Parse(_)));

        rig.session.execute(Command::Filter(String::new())).await.unwrap();
        assert_eq!(names(&rig.session.focused().view()), vec!["docs", "a.txt"]);
    }

    #[tokio::test]
    async fn empty_pane_submits_nothing() {
        let mut rig = rig().await;
        rig.session.execute(Command::FocusOther).await.unwrap();
        rig.session
            .execute(Command::ChangeDir("Music".into()))
            .await
            .unwrap();

        let outcome = rig.session.execute(Command::Delete).await.unwrap();
        assert_eq!(outcome, Outcome::Submitted(Vec::new()));
    }

    #[tokio::test]
    async fn cancel_and_dismiss_report_counts() {
        let mut rig = rig().await;
        let outcome = rig.session.execute(Command::Cancel(JobId(99))).await.unwrap();
        assert_eq!(outcome, Outcome::Signalled(0));

        let ids = submitted(rig.session.execute(Command::Delete).await.unwrap());
        rig.session.engine().wait(ids[0]).await.unwrap();
        let outcome = rig.session.execute(Command::Dismiss(ids[0])).await.unwrap();
        assert_eq!(outcome, Outcome::Signalled(1));
        assert!(rig.session.engine().jobs().is_empty());
    }

    #[tokio::test]
    async fn shutdown_cancels_running_jobs() {
        let mut rig = rig().await;
        rig.bridge.set_transfer_delay(Duration::from_secs(30));
        rig.session.execute(Command::CursorBottom).await.unwrap();

        let ids = submitted(rig.session.execute(Command::Copy).await.unwrap());
        assert_eq!(rig.session.shutdown().await, 1);

        let job = rig.session.engine().job(ids[0]).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(!rig.bridge.exists("/sdcard/a.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn foreground_exec_returns_output_and_logs() {
        let mut rig = rig().await;
        let outcome = rig
            .session
            .execute(Command::Exec {
                backend: BackendKind::Local,
                cmd: "echo hello".into(),
                background: false,
            })
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Output("hello\n".into()));

        let entries = rig.log.entries();
        let entry = entries
            .iter()
            .find(|e| e.command == "exec Local: echo hello")
            .unwrap();
        assert_eq!(entry.output, "hello");
        assert!(!entry.is_error);
    }

    #[tokio::test]
    async fn failed_exec_is_an_error_entry() {
        let mut rig = rig().await;
        let err = rig
            .session
            .execute(Command::Exec {
                backend: BackendKind::Remote,
                cmd: "frobnicate".into(),
                background: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Shell(_)));
        assert!(rig
            .log
            .entries()
            .iter()
            .any(|e| e.command == "exec Remote: frobnicate" && e.is_error));

        let err = rig
            .session
            .execute(Command::Exec {
                backend: BackendKind::Local,
                cmd: "  ".into(),
                background: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Parse(_)));
    }

    #[tokio::test]
    async fn background_exec_reports_through_log() {
        let mut rig = rig().await;
        let outcome = rig
            .session
            .execute(Command::Exec {
                backend: BackendKind::Remote,
                cmd: "mkdir '/sdcard/Made'".into(),
                background: true,
            })
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Started);

        let finished = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let done = rig
                    .log
                    .entries()
                    .iter()
                    .any(|e| e.command.starts_with("exec Remote: mkdir") && !e.is_running());
                if done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(finished.is_ok());
        assert!(rig.bridge.is_dir("/sdcard/Made"));
        rig.session.shutdown().await;
    }

    #[tokio::test]
    async fn clear_log_command_empties_log() {
        let mut rig = rig().await;
        rig.session.execute(Command::Mkdir("x".into())).await.unwrap();
        rig.session.engine().wait_all().await;
        assert!(!rig.log.is_empty());

        let outcome = rig.session.execute(Command::ClearLog).await.unwrap();
        assert_eq!(outcome, Outcome::Done);
        assert!(rig.log.is_empty());
    }
}
