//! Activity log for backend commands and job lifecycle.
//!
//! The engine and the remote adapter report through the [`LogSink`] trait:
//! `start` opens an entry in the "running" state and returns a token,
//! `update` later records the outcome. [`ActivityLog`] is the in-memory
//! implementation the frontends display; every call is mirrored to
//! `tracing` so the same history ends up in the diagnostic log file.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use parking_lot::Mutex;

/// Default number of entries kept by [`ActivityLog`].
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

const RUNNING: &str = "[running...]";

/// Handle to an entry opened with [`LogSink::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogToken(u64);

/// One line of the activity log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub token: LogToken,
    pub timestamp: SystemTime,
    pub command: String,
    pub output: String,
    pub is_error: bool,
}

impl LogEntry {
    /// Returns `true` while the entry has not been updated since `start`.
    pub fn is_running(&self) -> bool {
        self.output == RUNNING
    }
}

/// Receiver of structured log and status messages.
pub trait LogSink: Send + Sync {
    /// Opens an entry for `label` and returns its token.
    fn start(&self, label: &str) -> LogToken;

    /// Records `message` as the current output of the entry behind `token`.
    fn update(&self, token: LogToken, message: &str, is_error: bool);

    /// Adds a finished entry in one step.
    fn add(&self, label: &str, message: &str, is_error: bool) {
        let token = self.start(label);
        self.update(token, message, is_error);
    }

    /// Drops every retained entry. Sinks that keep nothing ignore this.
    fn clear(&self) {}
}

/// Bounded in-memory [`LogSink`].
#[derive(Debug)]
pub struct ActivityLog {
    entries: Mutex<VecDeque<LogEntry>>,
    next_token: AtomicU64,
    max_entries: usize,
}

impl ActivityLog {
    /// Creates a log that keeps at most `max_entries` entries (minimum 1).
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            next_token: AtomicU64::new(0),
            max_entries: max_entries.max(1),
        }
    }

    /// Returns a copy of every retained entry, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl LogSink for ActivityLog {
    fn start(&self, label: &str) -> LogToken {
        let token = LogToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(command = label, "started");

        let mut entries = self.entries.lock();
        entries.push_back(LogEntry {
            token,
            timestamp: SystemTime::now(),
            command: label.to_string(),
            output: RUNNING.to_string(),
            is_error: false,
        });
        while entries.len() > self.max_entries {
            entries.pop_front();
        }
        token
    }

    fn update(&self, token: LogToken, message: &str, is_error: bool) {
        let mut entries = self.entries.lock();
        // Evicted entries are silently ignored.
        let Some(entry) = entries.iter_mut().rev().find(|e| e.token == token) else {
            return;
        };
        if is_error {
            tracing::warn!(command = %entry.command, "{message}");
        } else {
            tracing::debug!(command = %entry.command, "{message}");
        }
        entry.output = message.to_string();
        entry.is_error = is_error;
    }

    fn clear(&self) {
        self.entries.lock().clear();
        tracing::debug!("activity log cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_opens_running_entry() {
        let log = ActivityLog::default();
        let token = log.start("shell ls");

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].token, token);
        assert_eq!(entries[0].command, "shell ls");
        assert!(entries[0].is_running());
        assert!(!entries[0].is_error);
    }

    #[test]
    fn update_records_outcome() {
        let log = ActivityLog::default();
        let token = log.start("push a b");
        log.update(token, "no space left", true);

        let entry = &log.entries()[0];
        assert_eq!(entry.output, "no space left");
        assert!(entry.is_error);
        assert!(!entry.is_running());
    }

    #[test]
    fn add_is_start_plus_update() {
        let log = ActivityLog::default();
        log.add("devices", "online", false);

        let entry = &log.entries()[0];
        assert_eq!(entry.command, "devices");
        assert_eq!(entry.output, "online");
    }

    #[test]
    fn oldest_entries_are_evicted() {
        let log = ActivityLog::new(2);
        let first = log.start("one");
        log.start("two");
        log.start("three");

        let commands: Vec<String> = log.entries().into_iter().map(|e| e.command).collect();
        assert_eq!(commands, vec!["two", "three"]);

        // Updating an evicted entry is a no-op.
        log.update(first, "late", false);
        assert!(log.entries().iter().all(|e| e.output != "late"));
    }

    #[test]
    fn clear_empties_log() {
        let log = ActivityLog::default();
        log.add("a", "", false);
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);

        // Tokens keep ascending after a clear.
        let token = log.start("b");
        assert_eq!(log.entries()[0].token, token);
        assert!(log.entries()[0].is_running());
    }
}
