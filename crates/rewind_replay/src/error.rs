//! Replay error types

use std::time::Duration;

use rewind_core::{ModelError, Timestamp};
use thiserror::Error;

/// Faults that prevent establishing a valid base tree.
///
/// Single-mutation faults are not errors; they surface as
/// [`ReconstructionWarning`](crate::ReconstructionWarning)s.
#[derive(Debug, Error)]
pub enum ReconstructError {
    /// There is no full snapshot at all.
    #[error("no full snapshot available to reconstruct {at}")]
    NoBaseSnapshot { at: Timestamp },

    /// The base snapshot cannot be turned into a live tree.
    #[error("base snapshot at {timestamp} cannot be materialized: {source}")]
    MalformedBase {
        timestamp: Timestamp,
        #[source]
        source: ModelError,
    },
}

/// Background offload failures.
#[derive(Debug, Error)]
pub enum OffloadError {
    /// The task exceeded its time budget.
    #[error("{task} did not finish within {after:?}")]
    Timeout { task: &'static str, after: Duration },

    /// The isolated worker could not be started.
    #[error("offload worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The worker went away before replying.
    #[error("offload worker stopped before finishing {task}")]
    WorkerLost { task: &'static str },

    /// The caller gave up on the task.
    #[error("{task} was cancelled")]
    Cancelled { task: &'static str },

    #[error("{task} failed: {reason}")]
    Failed { task: &'static str, reason: String },

    /// Both the worker and the inline retry failed.
    #[error("{task} degraded: {source}")]
    Degraded {
        task: &'static str,
        #[source]
        source: Box<OffloadError>,
    },

    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),
}

/// Errors surfaced by a replay session.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Reconstruct(#[from] ReconstructError),

    #[error(transparent)]
    Offload(#[from] OffloadError),
}

/// Result type for replay operations
pub type Result<T> = std::result::Result<T, ReplayError>;
