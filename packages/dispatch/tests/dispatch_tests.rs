#![allow(clippy::disallowed_methods)]

mod common;

use std::error::Error;
use std::time::Duration;

use dispatch::JobRequest;
use job_core::{DispatchError, ErrorInjection, JobErrorCode, PoolConfig, WorkerId};
use serde_json::json;

use common::{LONG, failure, job, start, start_with, success};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submit_and_wait() -> Result<(), Box<dyn Error>> {
    let dispatcher = start(2).await?;

    let handle = dispatcher
        .submit(job("simple", 10).with_route(7), Duration::ZERO)
        .await?;
    let result = success(dispatcher.wait(handle, LONG).await?)?;

    assert_eq!(result.data["tag"], "simple");
    assert_eq!(result.data["route"], 7);
    assert_eq!(result.data["data"], json!({ "input": "simple" }));
    assert!(result.data["shared"].is_null());

    let stats = result.stats.ok_or("missing job stats")?;
    assert!(stats.worker_id == WorkerId(1) || stats.worker_id == WorkerId(2));
    assert!(stats.run_ms >= 10);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wait_timeout_keeps_handle_valid() -> Result<(), Box<dyn Error>> {
    let dispatcher = start(1).await?;
    let handle = dispatcher.submit(job("slow", 1000), Duration::ZERO).await?;

    let early = dispatcher
        .wait(handle, Some(Duration::from_millis(200)))
        .await;
    assert_eq!(early, Err(DispatchError::TimedOut));

    let response = dispatcher
        .wait(handle, Some(Duration::from_millis(1500)))
        .await?;
    assert_eq!(success(response)?.data["tag"], "slow");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_response_is_consumed_once() -> Result<(), Box<dyn Error>> {
    let dispatcher = start(1).await?;
    let handle = dispatcher.submit(job("once", 200), Duration::ZERO).await?;

    assert_eq!(dispatcher.take(handle)?, None);
    assert_eq!(dispatcher.outstanding(), 1);

    assert!(dispatcher.wait(handle, LONG).await?.is_success());
    assert_eq!(dispatcher.outstanding(), 0);

    assert_eq!(
        dispatcher.take(handle),
        Err(DispatchError::InvalidHandle(handle))
    );
    assert_eq!(
        dispatcher.wait(handle, Some(Duration::ZERO)).await,
        Err(DispatchError::InvalidHandle(handle))
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_error_injection() -> Result<(), Box<dyn Error>> {
    let dispatcher = start(2).await?;

    let exception = dispatcher
        .submit(
            job("exception", 0).with_error_injection(ErrorInjection::Exception),
            Duration::from_secs(1),
        )
        .await?;
    let err = failure(dispatcher.wait(exception, LONG).await?)?;
    assert_eq!(err.code, JobErrorCode::Exception);
    assert_eq!(err.code.code(), -3001);

    let memory = dispatcher
        .submit(
            job("memory", 0).with_error_injection(ErrorInjection::MemoryLimit),
            Duration::from_secs(1),
        )
        .await?;
    let err = failure(dispatcher.wait(memory, LONG).await?)?;
    assert_eq!(err.code, JobErrorCode::MemoryLimitExceeded);

    let timeout = dispatcher
        .submit(
            job("timeout", 0)
                .with_error_injection(ErrorInjection::Timeout)
                .with_execution_timeout(Duration::from_millis(200)),
            Duration::from_secs(1),
        )
        .await?;
    let err = failure(dispatcher.wait(timeout, LONG).await?)?;
    assert_eq!(err.code, JobErrorCode::ExecutionTimeout);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_crashing_job_resolves_with_error() -> Result<(), Box<dyn Error>> {
    let dispatcher = start(1).await?;

    let crash = dispatcher
        .submit(
            job("crash", 0).with_error_injection(ErrorInjection::Crash),
            Duration::ZERO,
        )
        .await?;
    let err = failure(dispatcher.wait(crash, LONG).await?)?;
    assert_eq!(err.code, JobErrorCode::WorkerCrashed);
    assert!(err.message.contains("injected crash"));

    // The worker survives and takes the next job.
    let next = dispatcher
        .submit(job("after-crash", 0), Duration::from_secs(1))
        .await?;
    assert!(dispatcher.wait(next, LONG).await?.is_success());
    assert_eq!(dispatcher.controller().worker_count().await?, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_job_type() -> Result<(), Box<dyn Error>> {
    let dispatcher = start(1).await?;

    let handle = dispatcher
        .submit(JobRequest::new("resize_image", json!(null)), Duration::ZERO)
        .await?;
    let err = failure(dispatcher.wait(handle, LONG).await?)?;
    assert_eq!(err.code, JobErrorCode::NoHandler);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_payload_limits() -> Result<(), Box<dyn Error>> {
    let dispatcher = start_with(PoolConfig::with_workers(1).with_max_payload_bytes(64)).await?;

    let oversized = JobRequest::synthetic(json!("x".repeat(200)));
    let rejected = dispatcher.submit(oversized, Duration::ZERO).await;
    assert!(matches!(
        rejected,
        Err(DispatchError::PayloadTooLarge { limit: 64, .. })
    ));
    assert_eq!(dispatcher.outstanding(), 0);
    assert_eq!(dispatcher.store().live_regions(), 0);

    // The request fits but the echoed reply does not.
    let handle = dispatcher
        .submit(JobRequest::synthetic(json!("y".repeat(40))), Duration::ZERO)
        .await?;
    let err = failure(dispatcher.wait(handle, LONG).await?)?;
    assert_eq!(err.code, JobErrorCode::ResponseTooLarge);
    Ok(())
}

#[tokio::test]
async fn test_invalid_config_is_rejected() -> Result<(), Box<dyn Error>> {
    let result = start(0).await;
    assert!(matches!(result, Err(dispatch::StartError::Config(_))));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_custom_handler() -> Result<(), Box<dyn Error>> {
    use std::sync::Arc;

    use dispatch::{FnHandler, HandlerResult, JobHandlerRegistry, JobMessage, start_pool};
    use job_core::JobError;

    #[derive(serde::Deserialize)]
    struct Sum {
        values: Vec<i64>,
    }

    let mut handlers = JobHandlerRegistry::new();
    handlers.register(FnHandler::new("sum", |job: Arc<JobMessage>| {
        Box::pin(async move {
            let input: Sum = job
                .payload()
                .decode()
                .map_err(|e| JobError::new(JobErrorCode::Exception, e.to_string()))?;
            let total: i64 = input.values.iter().sum();
            HandlerResult::Ok(json!(total))
        })
    }));
    assert!(handlers.has_handler("sum"));
    assert_eq!(handlers.job_types(), vec!["sum"]);
    assert!(!handlers.has_handler("synthetic"));

    let (dispatcher, _pool) = start_pool(PoolConfig::with_workers(1), handlers).await?;

    let handle = dispatcher
        .submit(
            JobRequest::new("sum", json!({ "values": [1, 2, 3, 4] })),
            Duration::ZERO,
        )
        .await?;
    let result = success(dispatcher.wait(handle, LONG).await?)?;
    assert_eq!(result.decode::<i64>()?, 10);

    let handle = dispatcher
        .submit(JobRequest::new("sum", json!("not a list")), Duration::from_secs(1))
        .await?;
    let err = failure(dispatcher.wait(handle, LONG).await?)?;
    assert_eq!(err.code, JobErrorCode::Exception);
    Ok(())
}
