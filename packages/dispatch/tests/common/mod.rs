#![allow(dead_code)]

use std::error::Error;
use std::time::Duration;

use dispatch::{Dispatcher, JobHandlerRegistry, JobRequest, StartError, start_pool};
use job_core::{JobError, JobEvent, JobResponse, JobSuccess, PoolConfig};
use serde_json::json;
use tokio::sync::broadcast;

pub const LONG: Option<Duration> = Some(Duration::from_secs(5));

pub async fn start(workers: u32) -> Result<Dispatcher, StartError> {
    start_with(PoolConfig::with_workers(workers)).await
}

pub async fn start_with(config: PoolConfig) -> Result<Dispatcher, StartError> {
    let config = config.with_execution_timeout(Some(Duration::from_secs(5)));
    let (dispatcher, _handle) = start_pool(config, JobHandlerRegistry::with_synthetic()).await?;
    Ok(dispatcher)
}

/// A synthetic job that sleeps `work_ms` and echoes its tag.
pub fn job(tag: &str, work_ms: u64) -> JobRequest {
    JobRequest::synthetic(json!({ "input": tag }))
        .with_tag(tag)
        .with_work_duration(Duration::from_millis(work_ms))
}

pub fn success(response: JobResponse) -> Result<JobSuccess, Box<dyn Error>> {
    match response {
        JobResponse::Success(success) => Ok(success),
        JobResponse::Error(err) => Err(format!("expected success, got {err}").into()),
    }
}

pub fn failure(response: JobResponse) -> Result<JobError, Box<dyn Error>> {
    match response {
        JobResponse::Error(err) => Ok(err),
        JobResponse::Success(success) => {
            Err(format!("expected error, got {}", success.data).into())
        }
    }
}

/// Receive events until one matches or the timeout passes.
pub async fn expect_event<F>(
    events: &mut broadcast::Receiver<JobEvent>,
    matches: F,
) -> Result<JobEvent, Box<dyn Error>>
where
    F: Fn(&JobEvent) -> bool,
{
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    })
    .await??;
    Ok(found)
}
