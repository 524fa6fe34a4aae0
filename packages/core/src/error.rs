//! Dispatch-layer failures returned synchronously to callers.

use thiserror::Error;

use crate::JobHandle;

/// Failure of `submit`, `wait`, wait-queue or pool operations.
///
/// Worker-reported errors are never carried here; they resolve the handle
/// with [`crate::JobResponse::Error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// No worker or shared memory became available within the submission timeout.
    #[error("no capacity available within the submission timeout")]
    CapacityExceeded,

    #[error("payload of {size} bytes exceeds the {limit} byte transfer limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("worker pool is shutting down")]
    PoolShuttingDown,

    #[error("broadcast variants reference different shared regions")]
    SharedRegionMismatch,

    #[error("invalid job handle {0}")]
    InvalidHandle(JobHandle),

    #[error("timed out")]
    TimedOut,

    #[error("payload serialization failed: {0}")]
    Serialization(String),

    #[error("pool actor unavailable: {0}")]
    Actor(String),
}

impl DispatchError {
    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::CapacityExceeded | DispatchError::TimedOut)
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(e: serde_json::Error) -> Self {
        DispatchError::Serialization(e.to_string())
    }
}
