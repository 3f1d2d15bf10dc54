//! droidpane core library: UI-agnostic dual-pane file operations.
//!
//! `droidpane-core` drives two browser panes, each showing a directory on
//! either the local filesystem or an attached Android device, and runs
//! copy, move, rename, delete and mkdir between them as cancellable
//! background jobs. It knows nothing about terminals; the `droidpane`
//! binary is one frontend over it.
//!
//! # Modules
//!
//! - [`fs`]: entry snapshots, the [`Backend`] capability trait, the local adapter and byte streaming.
//! - [`remote`]: the device [`Bridge`](remote::Bridge), the `adb` and in-memory bridges, and the remote adapter.
//! - [`nav`]: sorting, filtering, history, directory enumeration and pane state.
//! - [`ops`]: jobs, the recursive transfer walker and the [`OperationEngine`].
//! - [`session`]: the dispatcher that turns [`Command`]s into pane actions and jobs.
//! - [`config`]: TOML settings.
//! - [`log`]: the activity log sink.
//! - [`event`]: command and event types for UI ↔ core communication.
//! - [`error`]: unified error type ([`CoreError`]) and result alias ([`CoreResult`]).

pub mod config;
pub mod error;
pub mod event;
pub mod fs;
pub mod log;
pub mod nav;
pub mod ops;
pub mod remote;
pub mod session;

pub use config::settings::Config;
pub use error::{CoreError, CoreResult};
pub use event::{Command, Event};
pub use fs::{Backend, BackendKind, Backends, DirEntry, EntryKind, LocalBackend, Location};
pub use log::{ActivityLog, LogEntry, LogSink};
pub use nav::filter::{EntryFilter, SortKey, SortOrder};
pub use nav::history::History;
pub use nav::pane::{Pane, PaneHomes, PaneId, PaneView};
pub use ops::{
    Direction, EngineOptions, JobId, JobKind, JobSnapshot, JobStatus, OnError, OperationEngine,
    OperationRequest, Progress,
};
pub use remote::{AdbBridge, ConnectionState, MemoryBridge, RemoteBackend};
pub use session::{Outcome, Session};

/// Normalises a string to NFC (composed) form.
///
/// macOS stores filenames in NFD (decomposed), so names pulled from the
/// local disk and names listed on the device can differ byte-wise while
/// looking identical. Entry names are normalised with this on the way in.
pub fn nfc_string(s: &str) -> String {
    use unicode_normalization::UnicodeNormalization;
    s.nfc().collect()
}
