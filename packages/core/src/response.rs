//! Job response types returned through a job handle.

use serde::{Deserialize, Serialize};

use crate::WorkerId;

/// Outcome of one job message. Exactly one is produced per handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobResponse {
    Success(JobSuccess),
    Error(JobError),
}

impl JobResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResponse::Success(_))
    }

    /// The error code, if the worker reported an error.
    pub fn error_code(&self) -> Option<JobErrorCode> {
        match self {
            JobResponse::Success(_) => None,
            JobResponse::Error(err) => Some(err.code),
        }
    }
}

/// Result payload of a job that completed normally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSuccess {
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<JobStats>,
}

impl JobSuccess {
    /// Decode the result into a typed value.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}

/// Timing collected by the worker that ran a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub worker_id: WorkerId,
    /// Time between submission and the worker picking the job up.
    pub queued_ms: u64,
    /// Time the handler ran.
    pub run_ms: u64,
}

/// Error reported by a worker. Delivered through the handle like a success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct JobError {
    pub code: JobErrorCode,
    pub message: String,
}

impl JobError {
    pub fn new(code: JobErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Closed taxonomy of worker-reported errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorCode {
    /// The handler raised a domain error.
    Exception,
    /// The job exceeded its memory allowance.
    MemoryLimitExceeded,
    /// The handler ran past its execution timeout.
    ExecutionTimeout,
    /// The result did not fit the shared payload budget.
    ResponseTooLarge,
    /// The worker panicked or died while running the job.
    WorkerCrashed,
    /// No handler is registered for the job type.
    NoHandler,
}

impl JobErrorCode {
    /// Stable numeric code for logs and foreign callers.
    pub fn code(&self) -> i32 {
        match self {
            JobErrorCode::Exception => -3001,
            JobErrorCode::MemoryLimitExceeded => -3002,
            JobErrorCode::ExecutionTimeout => -3003,
            JobErrorCode::ResponseTooLarge => -3004,
            JobErrorCode::WorkerCrashed => -3005,
            JobErrorCode::NoHandler => -3006,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorCode::Exception => "exception",
            JobErrorCode::MemoryLimitExceeded => "memory_limit_exceeded",
            JobErrorCode::ExecutionTimeout => "execution_timeout",
            JobErrorCode::ResponseTooLarge => "response_too_large",
            JobErrorCode::WorkerCrashed => "worker_crashed",
            JobErrorCode::NoHandler => "no_handler",
        }
    }
}

impl std::fmt::Display for JobErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.code())
    }
}
