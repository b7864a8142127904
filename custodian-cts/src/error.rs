//! Error types for the core token store.

use std::fmt;

use thiserror::Error;

use crate::task::Task;

/// Error delivered to a task's result handler.
#[derive(Debug, Error)]
pub enum Error {
    /// The backend failed while executing the task.
    #[error("{operation} failed for {key}: {source}")]
    TaskExecution {
        operation: &'static str,
        key: String,
        #[source]
        source: BackendError,
    },

    /// A continuous query could not be registered with the change feed.
    #[error("continuous query subscription failed: {0}")]
    Subscription(String),

    /// The task was torn down before it produced an outcome.
    #[error("{operation} was abandoned before completion")]
    Abandoned { operation: &'static str },

    /// The queue shut down before the task could run.
    #[error("token task queue is shut down")]
    Shutdown,
}

/// Errors raised by a persistence backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("token not found: {0}")]
    NotFound(String),

    #[error("token already exists: {0}")]
    AlreadyExists(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Why a submission was refused.
///
/// Both reasons are retryable; the task was never queued and its handler has
/// not been invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Every queue slot is taken.
    Saturated,
    /// The queue no longer accepts work.
    ShuttingDown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Saturated => f.write_str("queue saturated"),
            RejectReason::ShuttingDown => f.write_str("queue shutting down"),
        }
    }
}

/// A submission the queue refused, handing the task back for a retry.
#[derive(Debug, Error)]
#[error("task rejected: {reason}")]
pub struct Rejected {
    pub reason: RejectReason,
    pub task: Task,
}

impl Rejected {
    /// Recover the task so it can be submitted again.
    pub fn into_task(self) -> Task {
        self.task
    }
}

/// Result type alias for token store operations.
pub type Result<T> = std::result::Result<T, Error>;
