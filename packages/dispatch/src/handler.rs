//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use job_core::{ErrorInjection, JobError, JobErrorCode};
use serde_json::json;

use crate::job::{JobMessage, SYNTHETIC_JOB};

/// Result type for job handlers.
pub type HandlerResult = Result<serde_json::Value, JobError>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for job handlers.
///
/// Implement this trait to define how jobs of a specific type are processed.
/// A handler reports exactly one outcome per message; panics are caught by
/// the worker and reported as `WorkerCrashed`.
pub trait JobHandler: Send + Sync + 'static {
    /// The job type this handler processes.
    fn job_type(&self) -> &str;

    /// Process a job and return the result.
    fn handle(&self, job: Arc<JobMessage>) -> HandlerFuture;
}

/// Registry for job handlers.
///
/// Maps job types to their handlers for dynamic dispatch.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Create a registry with the synthetic handler installed.
    pub fn with_synthetic() -> Self {
        let mut registry = Self::new();
        registry.register(SyntheticHandler);
        registry
    }

    /// Register a handler for a job type.
    pub fn register<H: JobHandler>(&mut self, handler: H) {
        let job_type = handler.job_type().to_string();
        self.handlers.insert(job_type, Arc::new(handler));
    }

    /// Get a handler for a job type.
    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Check if a handler exists for a job type.
    pub fn has_handler(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// List all registered job types.
    pub fn job_types(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(Arc<JobMessage>) -> HandlerFuture + Send + Sync + 'static,
{
    job_type: String,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Arc<JobMessage>) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(job_type: impl Into<String>, handler: F) -> Self {
        Self {
            job_type: job_type.into(),
            handler,
        }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(Arc<JobMessage>) -> HandlerFuture + Send + Sync + 'static,
{
    fn job_type(&self) -> &str {
        &self.job_type
    }

    fn handle(&self, job: Arc<JobMessage>) -> HandlerFuture {
        (self.handler)(job)
    }
}

/// Test worker: sleeps for the work-duration hint, then echoes its input.
///
/// The reply is `{"tag", "route", "data", "shared"}`. The error-injection
/// mode replaces the reply with the matching failure.
pub struct SyntheticHandler;

impl JobHandler for SyntheticHandler {
    fn job_type(&self) -> &str {
        SYNTHETIC_JOB
    }

    fn handle(&self, job: Arc<JobMessage>) -> HandlerFuture {
        Box::pin(async move {
            if !job.work_duration().is_zero() {
                tokio::time::sleep(job.work_duration()).await;
            }

            match job.error_injection() {
                ErrorInjection::None => {}
                ErrorInjection::Exception => {
                    return Err(JobError::new(
                        JobErrorCode::Exception,
                        format!("injected exception in job '{}'", job.tag()),
                    ));
                }
                ErrorInjection::MemoryLimit => {
                    return Err(JobError::new(
                        JobErrorCode::MemoryLimitExceeded,
                        format!("injected memory limit in job '{}'", job.tag()),
                    ));
                }
                ErrorInjection::Timeout => {
                    std::future::pending::<()>().await;
                }
                ErrorInjection::Crash => {
                    panic!("injected crash in job '{}'", job.tag());
                }
            }

            Ok(json!({
                "tag": job.tag(),
                "route": job.route(),
                "data": job.payload().value(),
                "shared": job.shared().map(|region| region.value()),
            }))
        })
    }
}
