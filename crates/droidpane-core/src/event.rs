//! Event system for communication between UI and Core.
//!
//! The UI translates user input into [`Command`]s, which the
//! [`Session`](crate::session::Session) executes. The engine answers with
//! [`Event`]s on an unbounded channel, so a slow UI never stalls a job; the
//! UI is free to coalesce progress events before redrawing.

use crate::fs::backend::{BackendKind, Location};
use crate::nav::filter::{SortKey, SortOrder};
use crate::nav::pane::PaneId;
use crate::ops::job::{JobId, JobSnapshot};

/// An action the UI requests the core to perform.
///
/// Commands flow **UI → Core** and apply to the focused pane unless stated
/// otherwise. The core never creates commands itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Change to a path, absolute or relative to the current directory.
    ChangeDir(String),
    /// Enter the highlighted directory.
    Enter,
    /// Move to the parent directory.
    GoUp,
    /// Navigate backward in history.
    GoBack,
    /// Navigate forward in history.
    GoForward,
    /// Re-read the current directory.
    Refresh,
    /// Toggle visibility of hidden (dot-prefixed) files.
    ToggleHidden,
    /// Change the sort key and order.
    SetSort(SortKey, SortOrder),
    /// Set the name filter; see [`EntryFilter::parse`](crate::nav::filter::EntryFilter::parse).
    Filter(String),
    /// Move the cursor by the given number of rows.
    MoveCursor(isize),
    CursorTop,
    CursorBottom,
    /// Flip the focused pane between Local and Remote.
    SwitchBackend,
    /// Give focus to the other pane.
    FocusOther,
    /// Mark or unmark the highlighted entry.
    ToggleMark,
    MarkAll,
    InvertMarks,
    ClearMarks,
    /// Copy the marked entries (or the highlighted one) into the other pane.
    Copy,
    /// Move the marked entries (or the highlighted one) into the other pane.
    Move,
    /// Delete the marked entries (or the highlighted one).
    Delete,
    /// Rename the highlighted entry.
    Rename(String),
    /// Create a directory in the current directory.
    Mkdir(String),
    /// Cancel one job.
    Cancel(JobId),
    /// Cancel every unfinished job.
    CancelAll,
    /// Remove a finished job from the table.
    Dismiss(JobId),
    /// Run a shell command on a backend: `sh -c` locally, `adb shell` on the
    /// device. A background command returns at once and reports through
    /// the activity log.
    Exec {
        backend: BackendKind,
        cmd: String,
        background: bool,
    },
    /// Empty the activity log.
    ClearLog,
}

/// A notification the core sends back to the UI.
///
/// Events flow **Core → UI**.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A job entered the table.
    JobQueued(JobSnapshot),
    /// A running job changed status or progress.
    JobProgress(JobSnapshot),
    /// A job reached a terminal status.
    JobFinished(JobSnapshot),
    /// A pane's listing was reloaded after a job changed its directory.
    PaneRefreshed(PaneId),
    /// A pane was busy when a job tried to refresh it; the UI may retry.
    RefreshSkipped {
        pane: PaneId,
        dir: Location,
    },
}

impl Event {
    /// The job this event is about, if any.
    pub fn job(&self) -> Option<&JobSnapshot> {
        match self {
            Event::JobQueued(job) | Event::JobProgress(job) | Event::JobFinished(job) => Some(job),
            Event::PaneRefreshed(_) | Event::RefreshSkipped { .. } => None,
        }
    }
}
