//! Job dispatch and wait-queue runtime.
//!
//! This crate offloads jobs to a pool of worker actors and tracks each
//! outstanding job with an opaque handle.
//!
//! # Architecture
//!
//! - `PoolActor` - Owns worker pool state and places jobs on idle workers
//! - `WorkerActor` - Runs one job at a time through a registered handler
//! - `HandleTable` - Maps handles to pending or resolved responses
//! - `PayloadStore` - Reference-counted payload regions under a byte budget
//! - `WaitQueue` - Yields handles in the order their jobs resolve
//!
//! # Usage
//!
//! ```ignore
//! use dispatch::{JobHandlerRegistry, JobRequest, start_pool};
//!
//! let (dispatcher, _handle) =
//!     start_pool(PoolConfig::with_workers(4), JobHandlerRegistry::with_synthetic()).await?;
//! let handle = dispatcher.submit(JobRequest::synthetic(json!([1, 2])), Duration::ZERO).await?;
//! let response = dispatcher.wait(handle, Some(Duration::from_secs(1))).await?;
//! ```

mod dispatcher;
mod handle_table;
mod handler;
mod job;
mod messages;
mod payload_store;
mod pool_actor;
mod wait_queue;
mod worker_actor;

pub use dispatcher::{
    Dispatcher, PoolController, StartError, Submission, SubmitMode, Suspension, start_pool,
};
pub use handle_table::{HandleTable, Outcome};
pub use handler::{
    FnHandler, HandlerFuture, HandlerResult, JobHandler, JobHandlerRegistry, SyntheticHandler,
};
pub use job::{JobMessage, JobRequest, SYNTHETIC_JOB};
pub use messages::{Dispatched, PoolMessage, WorkerMessage};
pub use payload_store::{PayloadRegion, PayloadStore, SharedPayload};
pub use pool_actor::PoolActor;
pub use wait_queue::WaitQueue;
pub use worker_actor::WorkerActor;

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
