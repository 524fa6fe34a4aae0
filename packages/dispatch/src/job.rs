//! Job requests built by callers and the immutable messages workers see.

use std::sync::Arc;
use std::time::Duration;

use job_core::{ErrorInjection, RegionId};
use tokio::time::Instant;

use crate::payload_store::{PayloadRegion, SharedPayload};

/// Job type routed to the built-in synthetic handler.
pub const SYNTHETIC_JOB: &str = "synthetic";

/// A unit of work as the caller describes it.
///
/// Submission copies the payload into the payload store and freezes the
/// request into a [`JobMessage`].
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_type: String,
    pub payload: serde_json::Value,
    /// Caller-assigned correlation tag, echoed in diagnostics.
    pub tag: String,
    /// Numeric routing hint, e.g. the port of the master to forward to.
    pub route: Option<u16>,
    /// How long synthetic workers should spend on the job.
    pub work_duration: Duration,
    pub error_injection: ErrorInjection,
    /// Overrides the pool's default execution timeout.
    pub execution_timeout: Option<Duration>,
    pub shared: Option<SharedPayload>,
}

impl JobRequest {
    /// Create a new request for the given job type.
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            tag: String::new(),
            route: None,
            work_duration: Duration::ZERO,
            error_injection: ErrorInjection::None,
            execution_timeout: None,
            shared: None,
        }
    }

    /// Create a request for the synthetic handler.
    pub fn synthetic(payload: serde_json::Value) -> Self {
        Self::new(SYNTHETIC_JOB, payload)
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_route(mut self, route: u16) -> Self {
        self.route = Some(route);
        self
    }

    pub fn with_work_duration(mut self, duration: Duration) -> Self {
        self.work_duration = duration;
        self
    }

    pub fn with_error_injection(mut self, mode: ErrorInjection) -> Self {
        self.error_injection = mode;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Reference a shared region from a broadcast.
    pub fn with_shared(mut self, shared: &SharedPayload) -> Self {
        self.shared = Some(shared.clone());
        self
    }
}

/// Immutable job as handed to a worker.
#[derive(Debug)]
pub struct JobMessage {
    job_type: String,
    tag: String,
    route: Option<u16>,
    work_duration: Duration,
    error_injection: ErrorInjection,
    execution_timeout: Option<Duration>,
    payload: Arc<PayloadRegion>,
    shared: Option<Arc<PayloadRegion>>,
    submitted_at: Instant,
}

impl JobMessage {
    pub(crate) fn freeze(request: JobRequest, payload: Arc<PayloadRegion>) -> Self {
        Self {
            job_type: request.job_type,
            tag: request.tag,
            route: request.route,
            work_duration: request.work_duration,
            error_injection: request.error_injection,
            execution_timeout: request.execution_timeout,
            payload,
            shared: request.shared.map(|s| s.region().clone()),
            submitted_at: Instant::now(),
        }
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn route(&self) -> Option<u16> {
        self.route
    }

    pub fn work_duration(&self) -> Duration {
        self.work_duration
    }

    pub fn error_injection(&self) -> ErrorInjection {
        self.error_injection
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout
    }

    pub fn payload(&self) -> &PayloadRegion {
        &self.payload
    }

    pub fn shared(&self) -> Option<&PayloadRegion> {
        self.shared.as_deref()
    }

    pub fn shared_region_id(&self) -> Option<RegionId> {
        self.shared.as_ref().map(|r| r.id())
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }
}
