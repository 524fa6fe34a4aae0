//! Runs a batch of synthetic jobs through a worker pool and prints each
//! response as a JSON line in the order the jobs finished.
//!
//! Pool settings come from `JOB_*` variables. The batch is shaped with
//! `JOBCTL_JOBS` (default 8) and `JOBCTL_WORK_MS` (default 100).

use std::error::Error;
use std::time::Duration;

use dispatch::{JobHandlerRegistry, JobRequest, start_pool};
use job_core::PoolConfig;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, Box<dyn Error>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{key} is not a valid number: {raw}").into()),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = PoolConfig::from_env()?;
    let jobs: usize = env_or("JOBCTL_JOBS", 8)?;
    let work_ms: u64 = env_or("JOBCTL_WORK_MS", 100)?;
    tracing::info!(workers = config.workers, jobs, work_ms, "Starting jobctl");

    let (dispatcher, pool) = start_pool(config, JobHandlerRegistry::with_synthetic()).await?;
    let controller = dispatcher.controller();

    // Jobs beyond the pool size wait for a free worker.
    let capacity_wait = Duration::from_millis(work_ms.saturating_mul(jobs as u64) + 1000);
    let mut handles = Vec::with_capacity(jobs);
    for n in 0..jobs {
        let request = JobRequest::synthetic(json!({ "n": n }))
            .with_tag(format!("job-{n}"))
            .with_work_duration(Duration::from_millis(work_ms));
        handles.push(dispatcher.submit(request, capacity_wait).await?);
    }

    let mut queue = dispatcher.wait_queue(handles)?;
    while !queue.is_empty() {
        let (handle, response) = queue.next_response(None).await?;
        println!(
            "{}",
            json!({ "handle": handle.to_string(), "response": response })
        );
    }

    controller.shutdown(Some(Duration::from_secs(30))).await?;
    let stats = controller.stats().await?;
    tracing::info!("Pool terminated: {}", serde_json::to_string(&stats)?);

    controller.stop();
    pool.await?;
    Ok(())
}
