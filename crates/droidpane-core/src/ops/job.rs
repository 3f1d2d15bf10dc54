//! Job records: identity, request, lifecycle and progress counters.

use std::fmt;

use crate::fs::backend::{BackendKind, Location};

/// Ascending job identifier assigned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl JobId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Copy,
    Move,
    Rename,
    Delete,
    Mkdir,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::Copy => "copy",
            JobKind::Move => "move",
            JobKind::Rename => "rename",
            JobKind::Delete => "delete",
            JobKind::Mkdir => "mkdir",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of a job.
///
/// Transitions only move forward: `Queued → Running → {Success, Failed,
/// Cancelled}`, with `Queued` allowed to jump straight to a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Success | JobStatus::Failed | JobStatus::Cancelled => 2,
        }
    }

    /// Returns `true` if moving from `self` to `next` is allowed.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Source and destination backend of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Direction {
    pub from: BackendKind,
    pub to: BackendKind,
}

impl Direction {
    pub fn is_cross_backend(self) -> bool {
        self.from != self.to
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to)
    }
}

/// A file operation as requested by the UI.
///
/// For copy, move and rename `destination` is the full target path, not the
/// directory it lands in. Mkdir and delete act on `source` alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    pub kind: JobKind,
    pub source: Location,
    pub destination: Option<Location>,
}

impl OperationRequest {
    pub fn copy(source: Location, destination: Location) -> Self {
        Self {
            kind: JobKind::Copy,
            source,
            destination: Some(destination),
        }
    }

    pub fn move_to(source: Location, destination: Location) -> Self {
        Self {
            kind: JobKind::Move,
            source,
            destination: Some(destination),
        }
    }

    pub fn rename(source: Location, destination: Location) -> Self {
        Self {
            kind: JobKind::Rename,
            source,
            destination: Some(destination),
        }
    }

    pub fn delete(target: Location) -> Self {
        Self {
            kind: JobKind::Delete,
            source: target,
            destination: None,
        }
    }

    pub fn mkdir(target: Location) -> Self {
        Self {
            kind: JobKind::Mkdir,
            source: target,
            destination: None,
        }
    }

    pub fn direction(&self) -> Direction {
        let to = self
            .destination
            .as_ref()
            .map_or(self.source.backend, |d| d.backend);
        Direction {
            from: self.source.backend,
            to,
        }
    }

    /// Returns `true` if any part of the request lives on the remote backend.
    pub fn touches_remote(&self) -> bool {
        let direction = self.direction();
        direction.from == BackendKind::Remote || direction.to == BackendKind::Remote
    }

    /// Directories whose listings change when this request succeeds.
    pub fn affected_dirs(&self) -> Vec<Location> {
        let mut dirs = Vec::with_capacity(2);
        if self.kind != JobKind::Copy {
            dirs.push(self.source.parent());
        }
        if let Some(dst) = &self.destination {
            let parent = dst.parent();
            if !dirs.contains(&parent) {
                dirs.push(parent);
            }
        }
        dirs
    }

    /// Short description used as the activity-log label.
    pub fn label(&self) -> String {
        match &self.destination {
            Some(dst) => format!("{} {} {}", self.kind, self.source, dst),
            None => format!("{} {}", self.kind, self.source),
        }
    }
}

/// Byte and file counters of a job.
///
/// Totals can be set once; done counters never decrease and are clamped to
/// the totals once those are known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub total_files: u64,
    pub total_bytes: u64,
    pub done_files: u64,
    pub done_bytes: u64,
    totals_known: bool,
}

impl Progress {
    pub fn totals_known(&self) -> bool {
        self.totals_known
    }

    /// Fixes the totals. Returns `false` if they were already set.
    pub fn set_totals(&mut self, files: u64, bytes: u64) -> bool {
        if self.totals_known {
            return false;
        }
        self.total_files = files;
        self.total_bytes = bytes;
        self.totals_known = true;
        self.done_files = self.done_files.min(files);
        self.done_bytes = self.done_bytes.min(bytes);
        true
    }

    /// Raises the done counters to the given values.
    pub fn advance(&mut self, done_files: u64, done_bytes: u64) {
        let (files, bytes) = if self.totals_known {
            (
                done_files.min(self.total_files),
                done_bytes.min(self.total_bytes),
            )
        } else {
            (done_files, done_bytes)
        };
        self.done_files = self.done_files.max(files);
        self.done_bytes = self.done_bytes.max(bytes);
    }

    /// Percentage of bytes done, when totals are known and non-zero.
    pub fn percent(&self) -> Option<u8> {
        if !self.totals_known || self.total_bytes == 0 {
            return None;
        }
        Some((self.done_bytes.saturating_mul(100) / self.total_bytes).min(100) as u8)
    }
}

/// Point-in-time copy of a job table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: JobKind,
    pub direction: Direction,
    pub source: Location,
    pub destination: Option<Location>,
    pub status: JobStatus,
    pub progress: Progress,
    pub message: String,
}

impl JobSnapshot {
    pub(crate) fn new(id: JobId, request: &OperationRequest) -> Self {
        Self {
            id,
            kind: request.kind,
            direction: request.direction(),
            source: request.source.clone(),
            destination: request.destination.clone(),
            status: JobStatus::Queued,
            progress: Progress::default(),
            message: "queued".to_string(),
        }
    }

    /// Moves to `next` if the transition is allowed.
    pub(crate) fn advance(&mut self, next: JobStatus, message: impl Into<String>) -> bool {
        if !self.status.can_advance_to(next) {
            return false;
        }
        self.status = next;
        self.message = message.into();
        true
    }

    /// Records progress unless the job already finished.
    pub(crate) fn record(&mut self, done_files: u64, done_bytes: u64) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.progress.advance(done_files, done_bytes);
        true
    }

    pub(crate) fn set_totals(&mut self, files: u64, bytes: u64) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.progress.set_totals(files, bytes)
    }

    pub(crate) fn set_message(&mut self, message: impl Into<String>) {
        if !self.status.is_terminal() {
            self.message = message.into();
        }
    }
}
