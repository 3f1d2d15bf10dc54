//! File operations executed as background jobs.
//!
//! [`engine::OperationEngine`] schedules [`job`]s; copies walk the source
//! tree with [`walker::Walker`] after measuring it with
//! [`totals::compute_totals`].

pub mod engine;
pub mod job;
pub mod totals;
pub mod walker;

pub use engine::{EngineOptions, OperationEngine};
pub use job::{Direction, JobId, JobKind, JobSnapshot, JobStatus, OperationRequest, Progress};
pub use walker::{OnError, WalkOptions};
