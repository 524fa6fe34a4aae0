//! Pool actor: owns worker pool state and places jobs on workers.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use job_core::{
    DispatchError, JobError, JobErrorCode, JobEvent, JobHandle, PoolConfig, PoolStats, WorkerId,
    WorkerStatus,
};
use ractor::{Actor, ActorId, ActorProcessingErr, ActorRef, RpcReplyPort, SupervisionEvent};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::handle_table::{HandleTable, Outcome};
use crate::handler::JobHandlerRegistry;
use crate::messages::{Dispatched, PoolMessage, WorkerMessage};
use crate::payload_store::PayloadStore;
use crate::worker_actor::{WorkerActor, WorkerArgs};

struct WorkerSlot {
    actor: ActorRef<WorkerMessage>,
    status: WorkerStatus,
    /// Handle of the job or hold the worker is running.
    current: Option<JobHandle>,
}

/// A submission blocked until enough workers are idle.
struct Waiter {
    jobs: Vec<Dispatched>,
    deadline: Instant,
    reply: RpcReplyPort<Result<(), DispatchError>>,
}

impl Waiter {
    /// Fail the submission, releasing its payloads before the caller resumes.
    fn reject(self, error: DispatchError) {
        let Waiter { jobs, reply, .. } = self;
        drop(jobs);
        let _ = reply.send(Err(error));
    }
}

/// State for the pool actor.
pub struct PoolState {
    workers: BTreeMap<WorkerId, WorkerSlot>,
    by_actor: HashMap<ActorId, WorkerId>,
    /// Idle workers, longest idle first.
    idle: VecDeque<WorkerId>,
    /// Capacity waiters in submission order.
    waiters: VecDeque<Waiter>,
    shutting_down: bool,
    terminated: bool,
    termination_watchers: Vec<RpcReplyPort<()>>,
    table: Arc<HandleTable>,
    /// Event broadcaster.
    event_tx: broadcast::Sender<JobEvent>,
}

impl PoolState {
    /// Broadcast an event.
    fn broadcast(&self, event: JobEvent) {
        let _ = self.event_tx.send(event);
    }

    fn stats(&self) -> PoolStats {
        let count = |status: WorkerStatus| {
            self.workers
                .values()
                .filter(|slot| slot.status == status)
                .count()
        };
        PoolStats {
            workers: self.workers.len(),
            idle: count(WorkerStatus::Idle),
            busy: count(WorkerStatus::Busy),
            suspended: count(WorkerStatus::Suspended),
            waiting_submissions: self.waiters.len(),
            shutting_down: self.shutting_down,
            terminated: self.terminated,
        }
    }

    fn take_idle(&mut self) -> Option<WorkerId> {
        while let Some(worker_id) = self.idle.pop_front() {
            if self
                .workers
                .get(&worker_id)
                .is_some_and(|slot| slot.status == WorkerStatus::Idle)
            {
                return Some(worker_id);
            }
        }
        None
    }

    /// Hand each job to its own idle worker. Callers check capacity first.
    fn assign(&mut self, jobs: Vec<Dispatched>) {
        for job in jobs {
            let Some(worker_id) = self.take_idle() else {
                tracing::error!("No idle worker left for an admitted job");
                self.fail_job(&job, "no idle worker left for admitted job");
                continue;
            };
            let Some(slot) = self.workers.get_mut(&worker_id) else {
                continue;
            };
            slot.status = WorkerStatus::Busy;
            slot.current = job.handle;

            let event = JobEvent::JobDispatched {
                handle: job.handle,
                worker_id,
                tag: job.message.tag().to_string(),
                timestamp: Utc::now(),
            };
            if let Err(e) = slot.actor.send_message(WorkerMessage::Run {
                job: Box::new(job.clone()),
            }) {
                tracing::warn!("Failed to hand job to {}: {}", worker_id, e);
                slot.current = None;
                self.fail_job(&job, "worker stopped before the job started");
                continue;
            }
            self.broadcast(event);
        }
    }

    fn fail_job(&self, job: &Dispatched, reason: &str) {
        if let Some(handle) = job.handle {
            self.table.resolve(
                handle,
                Outcome::Error(JobError::new(JobErrorCode::WorkerCrashed, reason)),
            );
        }
    }

    /// Admit queued submissions in order while capacity allows.
    fn pump(&mut self) {
        let now = Instant::now();
        while let Some(front) = self.waiters.front() {
            let needed = front.jobs.len();
            let admit = if front.deadline <= now || needed > self.workers.len() {
                false
            } else if self.idle.len() >= needed {
                true
            } else {
                break;
            };

            let Some(waiter) = self.waiters.pop_front() else {
                break;
            };
            if admit {
                self.assign(waiter.jobs);
                let _ = waiter.reply.send(Ok(()));
            } else {
                waiter.reject(DispatchError::CapacityExceeded);
            }
        }
    }

    fn expire_waiters(&mut self) {
        let now = Instant::now();
        let (expired, waiting): (VecDeque<Waiter>, VecDeque<Waiter>) =
            self.waiters.drain(..).partition(|w| w.deadline <= now);
        self.waiters = waiting;
        for waiter in expired {
            waiter.reject(DispatchError::CapacityExceeded);
        }
    }

    fn check_terminated(&mut self) {
        if !self.shutting_down || self.terminated {
            return;
        }
        if self
            .workers
            .values()
            .any(|slot| slot.status != WorkerStatus::Idle)
        {
            return;
        }

        self.terminated = true;
        tracing::info!("Worker pool drained, stopping {} workers", self.workers.len());
        for slot in self.workers.values() {
            let _ = slot.actor.send_message(WorkerMessage::Shutdown);
        }
        for reply in self.termination_watchers.drain(..) {
            let _ = reply.send(());
        }
        self.broadcast(JobEvent::PoolTerminated {
            timestamp: Utc::now(),
        });
    }
}

/// Pool actor arguments.
pub struct PoolArgs {
    pub config: PoolConfig,
    pub handlers: Arc<JobHandlerRegistry>,
    pub table: Arc<HandleTable>,
    pub store: Arc<PayloadStore>,
    pub event_tx: broadcast::Sender<JobEvent>,
}

/// Pool actor that supervises the workers and places jobs on them.
pub struct PoolActor;

impl Actor for PoolActor {
    type Msg = PoolMessage;
    type State = PoolState;
    type Arguments = PoolArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker pool with {} workers", args.config.workers);

        let mut workers = BTreeMap::new();
        let mut by_actor = HashMap::new();
        let mut idle = VecDeque::new();
        for n in 1..=args.config.workers {
            let worker_id = WorkerId(n);
            let worker_args = WorkerArgs {
                worker_id,
                pool: myself.clone(),
                handlers: args.handlers.clone(),
                table: args.table.clone(),
                store: args.store.clone(),
                event_tx: args.event_tx.clone(),
                execution_timeout: args.config.execution_timeout(),
            };
            let (actor, _handle) =
                Actor::spawn_linked(None, WorkerActor, worker_args, myself.get_cell())
                    .await
                    .map_err(|e| {
                        ActorProcessingErr::from(format!("Failed to spawn {}: {}", worker_id, e))
                    })?;

            by_actor.insert(actor.get_id(), worker_id);
            workers.insert(
                worker_id,
                WorkerSlot {
                    actor,
                    status: WorkerStatus::Idle,
                    current: None,
                },
            );
            idle.push_back(worker_id);
        }

        Ok(PoolState {
            workers,
            by_actor,
            idle,
            waiters: VecDeque::new(),
            shutting_down: false,
            terminated: false,
            termination_watchers: Vec::new(),
            table: args.table,
            event_tx: args.event_tx,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PoolMessage::Place {
                jobs,
                deadline,
                reply,
            } => {
                if state.shutting_down {
                    drop(jobs);
                    let _ = reply.send(Err(DispatchError::PoolShuttingDown));
                    return Ok(());
                }

                let needed = jobs.len();
                if needed > state.workers.len() {
                    tracing::warn!(
                        "Rejecting {} jobs for a pool of {} workers",
                        needed,
                        state.workers.len()
                    );
                    drop(jobs);
                    let _ = reply.send(Err(DispatchError::CapacityExceeded));
                    return Ok(());
                }

                if state.waiters.is_empty() && state.idle.len() >= needed {
                    state.assign(jobs);
                    let _ = reply.send(Ok(()));
                    return Ok(());
                }

                match deadline {
                    Some(deadline) if deadline > Instant::now() => {
                        state.waiters.push_back(Waiter {
                            jobs,
                            deadline,
                            reply,
                        });
                        let pool = myself.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep_until(deadline).await;
                            let _ = pool.send_message(PoolMessage::ExpireWaiters);
                        });
                    }
                    _ => {
                        drop(jobs);
                        let _ = reply.send(Err(DispatchError::CapacityExceeded));
                    }
                }
            }

            PoolMessage::ExpireWaiters => {
                state.expire_waiters();
                state.pump();
            }

            PoolMessage::WorkerFree { worker_id } => {
                if let Some(slot) = state.workers.get_mut(&worker_id) {
                    slot.status = WorkerStatus::Idle;
                    slot.current = None;
                    state.idle.push_back(worker_id);
                }
                state.pump();
                state.check_terminated();
            }

            PoolMessage::Suspend { holds, gate, reply } => {
                if state.shutting_down {
                    let _ = reply.send(Err(DispatchError::PoolShuttingDown));
                    return Ok(());
                }
                if state.idle.len() < holds.len() {
                    let _ = reply.send(Err(DispatchError::CapacityExceeded));
                    return Ok(());
                }

                let mut suspended = Vec::with_capacity(holds.len());
                for handle in holds {
                    let Some(worker_id) = state.take_idle() else {
                        break;
                    };
                    let Some(slot) = state.workers.get_mut(&worker_id) else {
                        continue;
                    };
                    if let Err(e) = slot.actor.send_message(WorkerMessage::Hold {
                        handle,
                        gate: gate.clone(),
                    }) {
                        tracing::warn!("Failed to suspend {}: {}", worker_id, e);
                        continue;
                    }
                    slot.status = WorkerStatus::Suspended;
                    slot.current = Some(handle);
                    suspended.push((worker_id, handle));
                }

                tracing::info!("Suspended {} workers", suspended.len());
                state.broadcast(JobEvent::WorkersSuspended {
                    workers: suspended.iter().map(|(worker_id, _)| *worker_id).collect(),
                    timestamp: Utc::now(),
                });
                let _ = reply.send(Ok(suspended));
            }

            PoolMessage::KillWorker { worker_id, reply } => {
                let found = match state.workers.get(&worker_id) {
                    Some(slot) => {
                        tracing::warn!("Killing {} ({:?})", worker_id, slot.status);
                        slot.actor.kill();
                        state.idle.retain(|id| *id != worker_id);
                        true
                    }
                    None => false,
                };
                // The slot is released when the supervision event arrives.
                let _ = reply.send(found);
            }

            PoolMessage::BeginShutdown => {
                if state.shutting_down {
                    return Ok(());
                }
                state.shutting_down = true;
                for waiter in state.waiters.drain(..) {
                    waiter.reject(DispatchError::PoolShuttingDown);
                }

                let in_flight = state.stats().in_flight();
                tracing::info!("Shutting down worker pool with {} jobs in flight", in_flight);
                state.broadcast(JobEvent::ShutdownStarted {
                    in_flight,
                    timestamp: Utc::now(),
                });
                state.check_terminated();
            }

            PoolMessage::AwaitTerminated { reply } => {
                if state.terminated {
                    let _ = reply.send(());
                } else {
                    state.termination_watchers.push(reply);
                }
            }

            PoolMessage::GetStats { reply } => {
                let _ = reply.send(state.stats());
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (cell, reason) = match message {
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                (cell, reason.unwrap_or_else(|| "stopped".to_string()))
            }
            SupervisionEvent::ActorFailed(cell, err) => (cell, err.to_string()),
            _ => return Ok(()),
        };

        let Some(worker_id) = state.by_actor.remove(&cell.get_id()) else {
            return Ok(());
        };
        let Some(slot) = state.workers.remove(&worker_id) else {
            return Ok(());
        };
        state.idle.retain(|id| *id != worker_id);

        if state.terminated {
            tracing::debug!("{} stopped", worker_id);
            return Ok(());
        }

        // No restart: the pool shrinks and the in-flight job is failed.
        tracing::warn!("Worker {} terminated: {}", worker_id, reason);
        if let Some(handle) = slot.current {
            state.table.resolve(
                handle,
                Outcome::Error(JobError::new(
                    JobErrorCode::WorkerCrashed,
                    format!("{} exited: {}", worker_id, reason),
                )),
            );
        }
        state.broadcast(JobEvent::WorkerLost {
            worker_id,
            in_flight: slot.current,
            timestamp: Utc::now(),
        });
        state.pump();
        state.check_terminated();
        Ok(())
    }
}
