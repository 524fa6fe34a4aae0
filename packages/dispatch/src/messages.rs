//! Message types for actor communication.

use std::sync::Arc;

use job_core::{DispatchError, JobHandle, PoolStats, WorkerId};
use ractor::RpcReplyPort;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::job::JobMessage;

/// A job on its way to a worker.
#[derive(Debug, Clone)]
pub struct Dispatched {
    /// `None` for fire-and-forget jobs.
    pub handle: Option<JobHandle>,
    pub message: Arc<JobMessage>,
}

/// Messages for the PoolActor.
#[derive(Debug)]
pub enum PoolMessage {
    /// Place jobs on distinct idle workers, all or none.
    Place {
        jobs: Vec<Dispatched>,
        /// Latest time to wait for capacity; `None` fails fast.
        deadline: Option<Instant>,
        reply: RpcReplyPort<Result<(), DispatchError>>,
    },

    /// Fail capacity waiters whose deadline passed.
    ExpireWaiters,

    /// A worker finished its job or hold and is free again.
    WorkerFree { worker_id: WorkerId },

    /// Hold idle workers until the gate opens. Replies with the worker
    /// each hold handle was placed on.
    Suspend {
        holds: Vec<JobHandle>,
        gate: Arc<Semaphore>,
        reply: RpcReplyPort<Result<Vec<(WorkerId, JobHandle)>, DispatchError>>,
    },

    /// Abort a worker, failing whatever it is running. Replies `false` if
    /// the worker is not in the pool.
    KillWorker {
        worker_id: WorkerId,
        reply: RpcReplyPort<bool>,
    },

    /// Stop accepting submissions and drain in-flight jobs.
    BeginShutdown,

    /// Reply once the pool has terminated.
    AwaitTerminated { reply: RpcReplyPort<()> },

    /// Get pool stats.
    GetStats { reply: RpcReplyPort<PoolStats> },
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Run a job to completion.
    Run { job: Box<Dispatched> },

    /// Block until the gate grants a permit, then resolve the hold handle.
    Hold {
        handle: JobHandle,
        gate: Arc<Semaphore>,
    },

    /// Shutdown the worker.
    Shutdown,
}
