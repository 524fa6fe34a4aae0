//! Worker actor for executing jobs.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use job_core::{JobError, JobErrorCode, JobEvent, JobHandle, JobStats, WorkerId};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::handle_table::{HandleTable, Outcome};
use crate::handler::{HandlerResult, JobHandlerRegistry};
use crate::job::JobMessage;
use crate::messages::{Dispatched, PoolMessage, WorkerMessage};
use crate::payload_store::PayloadStore;

/// State for the worker actor.
pub struct WorkerActorState {
    /// Unique worker ID.
    pub worker_id: WorkerId,
    /// Pool actor reference.
    pool: ActorRef<PoolMessage>,
    /// Handler registry.
    handlers: Arc<JobHandlerRegistry>,
    table: Arc<HandleTable>,
    store: Arc<PayloadStore>,
    /// Event broadcaster.
    event_tx: broadcast::Sender<JobEvent>,
    /// Used when a message does not carry its own execution timeout.
    execution_timeout: Option<Duration>,
}

impl WorkerActorState {
    async fn execute(&self, job: Arc<JobMessage>) -> HandlerResult {
        let Some(handler) = self.handlers.get(job.job_type()) else {
            return Err(JobError::new(
                JobErrorCode::NoHandler,
                format!("No handler for job type: {}", job.job_type()),
            ));
        };

        let limit = job.execution_timeout().or(self.execution_timeout);
        let run = AssertUnwindSafe(async move { handler.handle(job).await }).catch_unwind();
        let caught = match limit {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(caught) => caught,
                Err(_) => {
                    return Err(JobError::new(
                        JobErrorCode::ExecutionTimeout,
                        format!("Job exceeded its {}ms execution timeout", limit.as_millis()),
                    ));
                }
            },
            None => run.await,
        };

        caught.unwrap_or_else(|panic| {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(JobError::new(
                JobErrorCode::WorkerCrashed,
                format!("Worker panicked: {}", reason),
            ))
        })
    }

    /// Copy a result into the payload store.
    fn publish_result(&self, value: serde_json::Value, stats: Option<JobStats>) -> Outcome {
        match self.store.allocate(value) {
            Ok(result) => Outcome::Success { result, stats },
            Err(e) => Outcome::Error(JobError::new(JobErrorCode::ResponseTooLarge, e.to_string())),
        }
    }

    fn completion_event(
        &self,
        handle: Option<JobHandle>,
        outcome: &Outcome,
        duration_ms: u64,
    ) -> JobEvent {
        match outcome {
            Outcome::Success { .. } => JobEvent::JobCompleted {
                handle,
                worker_id: self.worker_id,
                duration_ms,
                timestamp: Utc::now(),
            },
            Outcome::Error(err) => {
                tracing::debug!(worker = %self.worker_id, code = %err.code, "job failed: {}", err.message);
                JobEvent::JobFailed {
                    handle,
                    worker_id: self.worker_id,
                    code: err.code,
                    message: err.message.clone(),
                    timestamp: Utc::now(),
                }
            }
        }
    }
}

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: WorkerId,
    pub pool: ActorRef<PoolMessage>,
    pub handlers: Arc<JobHandlerRegistry>,
    pub table: Arc<HandleTable>,
    pub store: Arc<PayloadStore>,
    pub event_tx: broadcast::Sender<JobEvent>,
    pub execution_timeout: Option<Duration>,
}

/// Worker actor that executes jobs.
///
/// Runs one job at a time to completion; the next message waits in the
/// mailbox until the current job has resolved.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!("Starting worker: {}", args.worker_id);
        Ok(WorkerActorState {
            worker_id: args.worker_id,
            pool: args.pool,
            handlers: args.handlers,
            table: args.table,
            store: args.store,
            event_tx: args.event_tx,
            execution_timeout: args.execution_timeout,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Run { job } => {
                let Dispatched { handle, message } = *job;
                let started = Instant::now();
                let queued_ms = started
                    .saturating_duration_since(message.submitted_at())
                    .as_millis() as u64;

                let result = state.execute(message.clone()).await;
                let run_ms = started.elapsed().as_millis() as u64;

                let outcome = match result {
                    Ok(value) => state.publish_result(
                        value,
                        Some(JobStats {
                            worker_id: state.worker_id,
                            queued_ms,
                            run_ms,
                        }),
                    ),
                    Err(err) => Outcome::Error(err),
                };
                // Resolve before publishing so subscribers see the response.
                let event = state.completion_event(handle, &outcome, run_ms);
                match handle {
                    Some(handle) => {
                        // The handle entry keeps its own copy of the message.
                        drop(message);
                        state.table.resolve(handle, outcome);
                    }
                    None => {
                        tracing::trace!(tag = message.tag(), "no-reply job finished");
                    }
                }
                let _ = state.event_tx.send(event);

                state.pool.send_message(PoolMessage::WorkerFree {
                    worker_id: state.worker_id,
                })?;
            }

            WorkerMessage::Hold { handle, gate } => {
                match gate.acquire().await {
                    Ok(permit) => permit.forget(),
                    Err(_) => tracing::warn!("Suspension gate closed for {}", state.worker_id),
                }
                // Free before resolving so a resumed caller sees the worker idle.
                state.pool.send_message(PoolMessage::WorkerFree {
                    worker_id: state.worker_id,
                })?;
                let outcome = state.publish_result(serde_json::Value::Null, None);
                state.table.resolve(handle, outcome);
            }

            WorkerMessage::Shutdown => {
                tracing::debug!("Shutting down worker: {}", state.worker_id);
                myself.stop(None);
            }
        }

        Ok(())
    }
}
