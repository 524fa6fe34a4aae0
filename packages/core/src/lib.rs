//! Core domain types for the job dispatch system.
//!
//! This crate contains shared types used across all packages:
//! - JobHandle and message metadata for submitted work
//! - JobResponse and the worker error taxonomy
//! - PoolConfig and PoolStats for the worker pool
//! - DispatchError for dispatch-layer failures
//! - Events for the diagnostics sink

mod error;
mod events;
mod job;
mod pool;
mod response;

pub use error::DispatchError;
pub use events::JobEvent;
pub use job::{ErrorInjection, JobHandle, RegionId, timeout_from_secs};
pub use pool::{ConfigError, PoolConfig, PoolStats, WorkerId, WorkerStatus};
pub use response::{JobError, JobErrorCode, JobResponse, JobStats, JobSuccess};
