//! Diagnostic events published by the dispatcher and the worker pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobErrorCode, JobHandle, RegionId, WorkerId};

/// Events emitted to the diagnostics sink.
///
/// Failures that callers never observe directly (dropped fire-and-forget
/// jobs, rejected broadcasts) surface only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    // Job events
    /// A job was handed to a worker.
    JobDispatched {
        handle: Option<JobHandle>,
        worker_id: WorkerId,
        tag: String,
        timestamp: DateTime<Utc>,
    },
    /// A job finished with a success response.
    JobCompleted {
        handle: Option<JobHandle>,
        worker_id: WorkerId,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A worker reported an error for a job.
    JobFailed {
        handle: Option<JobHandle>,
        worker_id: WorkerId,
        code: JobErrorCode,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// A fire-and-forget job could not be placed.
    NoReplyJobDropped {
        tag: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    /// A broadcast mixed payload variants from different regions.
    SharedRegionMismatch {
        expected: Option<RegionId>,
        found: Option<RegionId>,
        variants: usize,
        timestamp: DateTime<Utc>,
    },

    // Pool events
    /// Workers were taken out of dispatch.
    WorkersSuspended {
        workers: Vec<WorkerId>,
        timestamp: DateTime<Utc>,
    },
    /// Suspended workers were released.
    WorkersResumed {
        workers: Vec<WorkerId>,
        timestamp: DateTime<Utc>,
    },
    /// A worker died outside of shutdown.
    WorkerLost {
        worker_id: WorkerId,
        in_flight: Option<JobHandle>,
        timestamp: DateTime<Utc>,
    },
    /// Graceful shutdown began.
    ShutdownStarted {
        in_flight: usize,
        timestamp: DateTime<Utc>,
    },
    /// All in-flight jobs drained and the workers stopped.
    PoolTerminated { timestamp: DateTime<Utc> },
    /// Resolved responses nobody took were freed.
    UnconsumedReaped {
        count: usize,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobDispatched { timestamp, .. } => *timestamp,
            JobEvent::JobCompleted { timestamp, .. } => *timestamp,
            JobEvent::JobFailed { timestamp, .. } => *timestamp,
            JobEvent::NoReplyJobDropped { timestamp, .. } => *timestamp,
            JobEvent::SharedRegionMismatch { timestamp, .. } => *timestamp,
            JobEvent::WorkersSuspended { timestamp, .. } => *timestamp,
            JobEvent::WorkersResumed { timestamp, .. } => *timestamp,
            JobEvent::WorkerLost { timestamp, .. } => *timestamp,
            JobEvent::ShutdownStarted { timestamp, .. } => *timestamp,
            JobEvent::PoolTerminated { timestamp } => *timestamp,
            JobEvent::UnconsumedReaped { timestamp, .. } => *timestamp,
        }
    }

    /// Get the job handle associated with this event, if any.
    pub fn handle(&self) -> Option<JobHandle> {
        match self {
            JobEvent::JobDispatched { handle, .. } => *handle,
            JobEvent::JobCompleted { handle, .. } => *handle,
            JobEvent::JobFailed { handle, .. } => *handle,
            JobEvent::WorkerLost { in_flight, .. } => *in_flight,
            _ => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobDispatched {
                handle,
                worker_id,
                tag,
                ..
            } => match handle {
                Some(handle) => format!("Job {} ({}) dispatched to {}", handle, tag, worker_id),
                None => format!("No-reply job ({}) dispatched to {}", tag, worker_id),
            },
            JobEvent::JobCompleted {
                worker_id,
                duration_ms,
                ..
            } => format!("Job completed on {} in {}ms", worker_id, duration_ms),
            JobEvent::JobFailed {
                worker_id,
                code,
                message,
                ..
            } => format!("Job failed on {}: {}: {}", worker_id, code, message),
            JobEvent::NoReplyJobDropped { tag, reason, .. } => {
                format!("No-reply job ({}) dropped: {}", tag, reason)
            }
            JobEvent::SharedRegionMismatch {
                expected, found, ..
            } => format!(
                "Broadcast rejected: expected {}, found {}",
                region_label(*expected),
                region_label(*found)
            ),
            JobEvent::WorkersSuspended { workers, .. } => {
                format!("{} workers suspended", workers.len())
            }
            JobEvent::WorkersResumed { workers, .. } => {
                format!("{} workers resumed", workers.len())
            }
            JobEvent::WorkerLost { worker_id, .. } => format!("Worker {} lost", worker_id),
            JobEvent::ShutdownStarted { in_flight, .. } => {
                format!("Shutdown started with {} jobs in flight", in_flight)
            }
            JobEvent::PoolTerminated { .. } => "Pool terminated".to_string(),
            JobEvent::UnconsumedReaped { count, .. } => {
                format!("Reaped {} unconsumed responses", count)
            }
        }
    }
}

fn region_label(region: Option<RegionId>) -> String {
    region.map_or_else(|| "no region".to_string(), |r| r.to_string())
}
