//! Caller-facing API: job submission, waiting and pool control.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use job_core::{
    ConfigError, DispatchError, JobEvent, JobHandle, JobResponse, PoolConfig, PoolStats, WorkerId,
};
use ractor::{Actor, ActorRef, RpcReplyPort};
use tokio::sync::{Semaphore, broadcast};
use tokio::time::Instant;

use crate::handle_table::HandleTable;
use crate::handler::JobHandlerRegistry;
use crate::job::{JobMessage, JobRequest};
use crate::messages::{Dispatched, PoolMessage};
use crate::payload_store::{PayloadStore, SharedPayload};
use crate::pool_actor::{PoolActor, PoolArgs};
use crate::wait_queue::WaitQueue;

/// Whether the caller expects a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    Reply,
    FireAndForget,
}

/// Successful result of [`Dispatcher::submit_with_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Handle(JobHandle),
    /// A fire-and-forget job was accepted.
    Accepted,
}

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn worker pool: {0}")]
    Spawn(#[from] ractor::SpawnErr),
}

/// Start a worker pool and return the dispatcher that feeds it.
pub async fn start_pool(
    config: PoolConfig,
    handlers: JobHandlerRegistry,
) -> Result<(Dispatcher, tokio::task::JoinHandle<()>), StartError> {
    config.validate()?;

    let (event_tx, _) = broadcast::channel(config.event_capacity);
    let table = Arc::new(HandleTable::new());
    let store = Arc::new(PayloadStore::new(
        config.max_payload_bytes,
        config.shared_memory_bytes,
    ));

    let args = PoolArgs {
        config,
        handlers: Arc::new(handlers),
        table: table.clone(),
        store: store.clone(),
        event_tx: event_tx.clone(),
    };
    let (pool, handle) = Actor::spawn(None, PoolActor, args).await?;

    Ok((
        Dispatcher {
            pool,
            table,
            store,
            event_tx,
        },
        handle,
    ))
}

async fn call_pool<T, F>(pool: &ActorRef<PoolMessage>, build: F) -> Result<T, DispatchError>
where
    T: Send + 'static,
    F: FnOnce(RpcReplyPort<T>) -> PoolMessage,
{
    let (tx, rx) = ractor::concurrency::oneshot();
    pool.send_message(build(tx.into()))
        .map_err(|e| DispatchError::Actor(e.to_string()))?;
    rx.await
        .map_err(|_| DispatchError::Actor("pool dropped the reply".into()))
}

/// Stand-in deadline for capacity timeouts too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// How long a submission may wait for capacity. Zero fails fast.
fn capacity_deadline(timeout: Duration) -> Option<Instant> {
    if timeout.is_zero() {
        return None;
    }
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(FAR_FUTURE))
}

/// Submits jobs to the pool and retrieves their responses.
///
/// Cheap to clone; every clone talks to the same pool, handle table and
/// payload store.
#[derive(Clone)]
pub struct Dispatcher {
    pool: ActorRef<PoolMessage>,
    table: Arc<HandleTable>,
    store: Arc<PayloadStore>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl Dispatcher {
    /// Copy a request's payload into the store and freeze it.
    fn freeze(&self, mut request: JobRequest) -> Result<Arc<JobMessage>, DispatchError> {
        let payload = self.store.allocate(std::mem::take(&mut request.payload))?;
        Ok(Arc::new(JobMessage::freeze(request, payload)))
    }

    async fn place(&self, jobs: Vec<Dispatched>, timeout: Duration) -> Result<(), DispatchError> {
        let deadline = capacity_deadline(timeout);
        call_pool(&self.pool, |reply| PoolMessage::Place {
            jobs,
            deadline,
            reply,
        })
        .await?
    }

    /// Allocate a region to share read-only across a broadcast.
    pub fn share(&self, value: serde_json::Value) -> Result<SharedPayload, DispatchError> {
        Ok(SharedPayload::new(self.store.allocate(value)?))
    }

    /// Submit a job and get a handle for its response.
    ///
    /// `timeout` bounds the wait for a free worker; zero fails fast when no
    /// worker is idle. It has no effect on how long the job may run.
    pub async fn submit(
        &self,
        request: JobRequest,
        timeout: Duration,
    ) -> Result<JobHandle, DispatchError> {
        let message = self.freeze(request)?;
        let handle = self.table.register(Some(message.clone()));
        let job = Dispatched {
            handle: Some(handle),
            message,
        };
        match self.place(vec![job], timeout).await {
            Ok(()) => Ok(handle),
            Err(e) => {
                self.table.discard(handle);
                Err(e)
            }
        }
    }

    /// Submit a job nobody waits for. Returns whether it was accepted.
    ///
    /// A rejected job is reported once on the diagnostics channel.
    pub async fn submit_no_reply(&self, request: JobRequest, timeout: Duration) -> bool {
        self.fire_and_forget(request, timeout).await.is_ok()
    }

    /// Submit in either mode.
    pub async fn submit_with_mode(
        &self,
        request: JobRequest,
        timeout: Duration,
        mode: SubmitMode,
    ) -> Result<Submission, DispatchError> {
        match mode {
            SubmitMode::Reply => self.submit(request, timeout).await.map(Submission::Handle),
            SubmitMode::FireAndForget => self
                .fire_and_forget(request, timeout)
                .await
                .map(|()| Submission::Accepted),
        }
    }

    async fn fire_and_forget(
        &self,
        request: JobRequest,
        timeout: Duration,
    ) -> Result<(), DispatchError> {
        let tag = request.tag.clone();
        let placed = match self.freeze(request) {
            Ok(message) => {
                let job = Dispatched {
                    handle: None,
                    message,
                };
                self.place(vec![job], timeout).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &placed {
            tracing::warn!(tag = %tag, "No-reply job dropped: {}", e);
            let _ = self.event_tx.send(JobEvent::NoReplyJobDropped {
                tag,
                reason: e.to_string(),
                timestamp: Utc::now(),
            });
        }
        placed
    }

    /// Submit one job per variant, each on its own worker, all or none.
    ///
    /// Variants may reference one shared region (or none at all); mixing
    /// regions is rejected before any handle is issued.
    pub async fn submit_broadcast(
        &self,
        variants: Vec<JobRequest>,
        timeout: Duration,
    ) -> Result<Vec<JobHandle>, DispatchError> {
        if variants.is_empty() {
            return Ok(Vec::new());
        }
        self.check_shared_regions(&variants)?;

        let messages = variants
            .into_iter()
            .map(|request| self.freeze(request))
            .collect::<Result<Vec<_>, _>>()?;
        let jobs: Vec<Dispatched> = messages
            .into_iter()
            .map(|message| Dispatched {
                handle: Some(self.table.register(Some(message.clone()))),
                message,
            })
            .collect();
        let handles: Vec<JobHandle> = jobs.iter().filter_map(|job| job.handle).collect();

        match self.place(jobs, timeout).await {
            Ok(()) => Ok(handles),
            Err(e) => {
                for handle in &handles {
                    self.table.discard(*handle);
                }
                Err(e)
            }
        }
    }

    fn check_shared_regions(&self, variants: &[JobRequest]) -> Result<(), DispatchError> {
        let mut regions = variants
            .iter()
            .map(|request| request.shared.as_ref().map(SharedPayload::region_id));
        let Some(expected) = regions.next() else {
            return Ok(());
        };
        let Some(found) = regions.find(|region| *region != expected) else {
            return Ok(());
        };

        tracing::warn!(
            "Broadcast of {} variants mixes shared regions {:?} and {:?}",
            variants.len(),
            expected,
            found
        );
        let _ = self.event_tx.send(JobEvent::SharedRegionMismatch {
            expected,
            found,
            variants: variants.len(),
            timestamp: Utc::now(),
        });
        Err(DispatchError::SharedRegionMismatch)
    }

    /// Wait for a handle to resolve and consume its response.
    ///
    /// `None` waits indefinitely. A timed-out handle stays valid.
    pub async fn wait(
        &self,
        handle: JobHandle,
        timeout: Option<Duration>,
    ) -> Result<JobResponse, DispatchError> {
        self.table.wait(handle, timeout).await
    }

    /// Consume a response without waiting; `Ok(None)` if not resolved yet.
    pub fn take(&self, handle: JobHandle) -> Result<Option<JobResponse>, DispatchError> {
        self.table.take(handle)
    }

    /// Build a wait queue over `handles`.
    pub fn wait_queue(
        &self,
        handles: impl IntoIterator<Item = JobHandle>,
    ) -> Result<WaitQueue, DispatchError> {
        WaitQueue::new(self.table.clone(), handles)
    }

    /// Subscribe to the diagnostics channel.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    pub fn store(&self) -> &PayloadStore {
        &self.store
    }

    /// Handles issued and not yet consumed.
    pub fn outstanding(&self) -> usize {
        self.table.len()
    }

    pub fn controller(&self) -> PoolController {
        PoolController {
            pool: self.pool.clone(),
            table: self.table.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

/// Workers held out of dispatch by [`PoolController::suspend`].
#[derive(Debug)]
pub struct Suspension {
    workers: Vec<WorkerId>,
    holds: Vec<JobHandle>,
    gate: Arc<Semaphore>,
}

impl Suspension {
    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    /// Handles of the hold jobs occupying the suspended workers.
    pub fn holds(&self) -> &[JobHandle] {
        &self.holds
    }
}

/// Controls worker availability and the pool lifecycle.
#[derive(Clone)]
pub struct PoolController {
    pool: ActorRef<PoolMessage>,
    table: Arc<HandleTable>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl PoolController {
    /// Take `count` idle workers out of dispatch.
    ///
    /// All or nothing: fails with `CapacityExceeded` if fewer are idle.
    pub async fn suspend(&self, count: usize) -> Result<Suspension, DispatchError> {
        let holds: Vec<JobHandle> = (0..count).map(|_| self.table.register(None)).collect();
        let gate = Arc::new(Semaphore::new(0));

        let placed = call_pool(&self.pool, |reply| PoolMessage::Suspend {
            holds: holds.clone(),
            gate: gate.clone(),
            reply,
        })
        .await
        .and_then(|placed| placed);

        let placed = match placed {
            Ok(placed) => placed,
            Err(e) => {
                for handle in &holds {
                    self.table.discard(*handle);
                }
                return Err(e);
            }
        };

        for handle in holds.iter().filter(|h| !placed.iter().any(|(_, p)| p == *h)) {
            self.table.discard(*handle);
        }
        let (workers, holds) = placed.into_iter().unzip();
        Ok(Suspension {
            workers,
            holds,
            gate,
        })
    }

    /// Release suspended workers and wait until each has let go.
    pub async fn resume(&self, suspension: Suspension) -> Result<(), DispatchError> {
        suspension.gate.add_permits(suspension.workers.len());
        for hold in &suspension.holds {
            self.table.wait(*hold, None).await?;
        }

        tracing::info!("Resumed {} workers", suspension.workers.len());
        let _ = self.event_tx.send(JobEvent::WorkersResumed {
            workers: suspension.workers,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Live workers in the pool.
    pub async fn worker_count(&self) -> Result<usize, DispatchError> {
        Ok(self.stats().await?.workers)
    }

    pub async fn stats(&self) -> Result<PoolStats, DispatchError> {
        call_pool(&self.pool, |reply| PoolMessage::GetStats { reply }).await
    }

    /// Abort a worker without waiting for its job. The job resolves with
    /// `WorkerCrashed` and the pool shrinks by one.
    pub async fn kill_worker(&self, worker_id: WorkerId) -> Result<bool, DispatchError> {
        call_pool(&self.pool, |reply| PoolMessage::KillWorker { worker_id, reply }).await
    }

    /// Refuse new submissions and let in-flight jobs drain.
    pub fn begin_shutdown(&self) -> Result<(), DispatchError> {
        self.pool
            .send_message(PoolMessage::BeginShutdown)
            .map_err(|e| DispatchError::Actor(e.to_string()))
    }

    /// Wait until a graceful shutdown has drained the pool.
    pub async fn wait_terminated(&self, timeout: Option<Duration>) -> Result<(), DispatchError> {
        let terminated = call_pool(&self.pool, |reply| PoolMessage::AwaitTerminated { reply });
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, terminated)
                .await
                .map_err(|_| DispatchError::TimedOut)?,
            None => terminated.await,
        }
    }

    /// Begin a graceful shutdown and wait for it to finish.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Result<(), DispatchError> {
        self.begin_shutdown()?;
        self.wait_terminated(timeout).await
    }

    /// Free responses that resolved but were never taken.
    ///
    /// Only runs once the pool has terminated; before that it reaps nothing.
    pub async fn reap_unconsumed(&self) -> Result<usize, DispatchError> {
        if !self.stats().await?.terminated {
            tracing::warn!("Refusing to reap responses before the pool has terminated");
            return Ok(0);
        }

        let count = self.table.reap_resolved();
        if count > 0 {
            tracing::info!("Reaped {} unconsumed responses", count);
        }
        let _ = self.event_tx.send(JobEvent::UnconsumedReaped {
            count,
            timestamp: Utc::now(),
        });
        Ok(count)
    }

    /// Stop the pool actor and its workers.
    pub fn stop(&self) {
        self.pool.stop(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_timeout_fails_fast() {
        assert_eq!(capacity_deadline(Duration::ZERO), None);
    }

    #[test]
    fn huge_capacity_timeout_still_waits() {
        let now = Instant::now();
        let deadline = capacity_deadline(Duration::MAX);
        assert!(deadline.is_some_and(|deadline| deadline > now + Duration::from_secs(86_400)));
    }
}
