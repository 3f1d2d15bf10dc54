//! Filesystem abstractions for droidpane.
//!
//! This module provides the entry snapshot type ([`entry::DirEntry`]), the
//! per-backend capability interface ([`backend::Backend`]), the local
//! adapter ([`local::LocalBackend`]) and cancellable byte streaming
//! ([`stream::copy_stream`]).

pub mod backend;
pub mod entry;
pub mod local;
pub mod stream;

pub use backend::{Backend, BackendKind, Backends, BulkTransfer, DirEntries, Location};
pub use entry::{DirEntry, EntryKind};
pub use local::LocalBackend;
