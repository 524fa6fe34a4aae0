#![allow(clippy::disallowed_methods)]

mod common;

use std::collections::HashSet;
use std::error::Error;
use std::time::Duration;

use job_core::{DispatchError, JobEvent, JobHandle};
use ulid::Ulid;

use common::{LONG, job, start, success};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wait_queue_yields_every_handle_once() -> Result<(), Box<dyn Error>> {
    let dispatcher = start(5).await?;

    let mut handles = Vec::new();
    for n in 0..5 {
        let handle = dispatcher
            .submit(job(&format!("job-{n}"), 500), Duration::ZERO)
            .await?;
        handles.push(handle);
    }
    let mut queue = dispatcher.wait_queue(handles.clone())?;
    assert_eq!(queue.len(), 5);

    let early = queue.next(Some(Duration::from_millis(200))).await;
    assert_eq!(early, Err(DispatchError::TimedOut));

    let mut seen = HashSet::new();
    for _ in 0..5 {
        let (handle, response) = queue.next_response(LONG).await?;
        assert!(success(response).is_ok());
        assert!(seen.insert(handle));
    }
    assert_eq!(seen, handles.into_iter().collect::<HashSet<_>>());
    assert!(queue.is_empty());

    let drained = queue.next(LONG).await;
    assert_eq!(drained, Err(DispatchError::TimedOut));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_wait_queue_follows_resolution_order() -> Result<(), Box<dyn Error>> {
    let dispatcher = start(3).await?;

    let slow = dispatcher.submit(job("slow", 900), Duration::ZERO).await?;
    let fast = dispatcher.submit(job("fast", 100), Duration::ZERO).await?;
    let medium = dispatcher.submit(job("medium", 400), Duration::ZERO).await?;

    let mut queue = dispatcher.wait_queue([slow, fast, medium])?;
    assert_eq!(queue.next(LONG).await?, fast);
    assert_eq!(queue.next(LONG).await?, medium);
    assert_eq!(queue.next(LONG).await?, slow);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_already_resolved_handles_are_ready() -> Result<(), Box<dyn Error>> {
    let dispatcher = start(1).await?;
    let mut events = dispatcher.subscribe();

    let handle = dispatcher.submit(job("done", 0), Duration::ZERO).await?;
    common::expect_event(&mut events, |event| {
        matches!(event, JobEvent::JobCompleted { .. }) && event.handle() == Some(handle)
    })
    .await?;

    let mut queue = dispatcher.wait_queue([handle])?;
    assert_eq!(queue.next(Some(Duration::ZERO)).await?, handle);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handle_belongs_to_one_queue() -> Result<(), Box<dyn Error>> {
    let dispatcher = start(2).await?;
    let first = dispatcher.submit(job("a", 300), Duration::ZERO).await?;
    let second = dispatcher.submit(job("b", 300), Duration::ZERO).await?;

    let queue = dispatcher.wait_queue([first])?;
    let rejected = dispatcher.wait_queue([second, first]);
    assert!(matches!(rejected, Err(DispatchError::InvalidHandle(h)) if h == first));

    // The failed construction left `second` free.
    let mut other = dispatcher.wait_queue([second])?;
    drop(queue);
    other.insert(first)?;
    assert_eq!(other.len(), 2);

    let mut seen = HashSet::new();
    while !other.is_empty() {
        seen.insert(other.next(LONG).await?);
    }
    assert_eq!(seen.len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unknown_handle_is_rejected() -> Result<(), Box<dyn Error>> {
    let dispatcher = start(1).await?;
    let bogus = JobHandle(Ulid::new());

    let rejected = dispatcher.wait_queue([bogus]);
    assert!(matches!(rejected, Err(DispatchError::InvalidHandle(h)) if h == bogus));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queued_handle_is_consumed_through_the_queue() -> Result<(), Box<dyn Error>> {
    let dispatcher = start(1).await?;
    let handle = dispatcher.submit(job("queued", 50), Duration::ZERO).await?;
    let mut queue = dispatcher.wait_queue([handle])?;

    assert_eq!(
        dispatcher.wait(handle, LONG).await,
        Err(DispatchError::InvalidHandle(handle))
    );
    assert_eq!(
        dispatcher.take(handle),
        Err(DispatchError::InvalidHandle(handle))
    );

    let (returned, response) = queue.next_response(LONG).await?;
    assert_eq!(returned, handle);
    assert_eq!(success(response)?.data["tag"], "queued");
    assert_eq!(
        dispatcher.take(handle),
        Err(DispatchError::InvalidHandle(handle))
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_returned_handle_can_be_waited_on() -> Result<(), Box<dyn Error>> {
    let dispatcher = start(1).await?;
    let handle = dispatcher.submit(job("returned", 50), Duration::ZERO).await?;
    let mut queue = dispatcher.wait_queue([handle])?;

    assert_eq!(queue.next(LONG).await?, handle);
    assert!(dispatcher.wait(handle, Some(Duration::ZERO)).await?.is_success());
    Ok(())
}
