//! Process-wide registry of outstanding job handles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use job_core::{DispatchError, JobError, JobHandle, JobResponse, JobStats, JobSuccess};
use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use ulid::{Generator, Ulid};

use crate::job::JobMessage;
use crate::payload_store::PayloadRegion;

/// Resolution published by a worker.
#[derive(Debug)]
pub enum Outcome {
    /// Result payload, held in the store until the caller takes it.
    Success {
        result: Arc<PayloadRegion>,
        stats: Option<JobStats>,
    },
    Error(JobError),
}

impl Outcome {
    fn into_response(self) -> JobResponse {
        match self {
            Outcome::Success { result, stats } => JobResponse::Success(JobSuccess {
                data: result.to_value(),
                stats,
            }),
            Outcome::Error(err) => JobResponse::Error(err),
        }
    }
}

#[derive(Debug)]
struct Entry {
    outcome: Option<Outcome>,
    notify: Arc<Notify>,
    /// Ready channel of the wait queue this handle belongs to.
    watcher: Option<mpsc::UnboundedSender<JobHandle>>,
    /// Keeps the message payload regions alive until the handle is consumed.
    message: Option<Arc<JobMessage>>,
}

impl Entry {
    /// Whether a live wait queue owns this handle.
    fn is_watched(&self) -> bool {
        self.watcher.as_ref().is_some_and(|w| !w.is_closed())
    }
}

struct Inner {
    generator: Generator,
    entries: HashMap<JobHandle, Entry>,
}

/// Maps job handles to their pending or resolved state.
///
/// Each handle resolves at most once and is consumed by exactly one `take`,
/// after which the entry is removed.
pub struct HandleTable {
    inner: Mutex<Inner>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                generator: Generator::new(),
                entries: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a new pending handle.
    pub fn register(&self, message: Option<Arc<JobMessage>>) -> JobHandle {
        let mut inner = self.lock();
        let id = inner.generator.generate().unwrap_or_else(|_| Ulid::new());
        let handle = JobHandle(id);
        inner.entries.insert(
            handle,
            Entry {
                outcome: None,
                notify: Arc::new(Notify::new()),
                watcher: None,
                message,
            },
        );
        handle
    }

    /// Forget a handle whose submission failed before reaching a worker.
    pub fn discard(&self, handle: JobHandle) {
        self.lock().entries.remove(&handle);
    }

    /// Publish the outcome of a job. Returns `false` if the handle is unknown
    /// or was already resolved.
    pub fn resolve(&self, handle: JobHandle, outcome: Outcome) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(&handle) else {
            tracing::debug!(%handle, "resolution for unknown handle dropped");
            return false;
        };
        if entry.outcome.is_some() {
            tracing::warn!(%handle, "duplicate resolution ignored");
            return false;
        }
        entry.outcome = Some(outcome);
        entry.notify.notify_waiters();
        if let Some(watcher) = &entry.watcher {
            let _ = watcher.send(handle);
        }
        true
    }

    /// Consume the response of a resolved handle.
    ///
    /// `Ok(None)` means the job has not resolved yet; the handle stays valid.
    /// A handle held by a wait queue is only consumable once the queue has
    /// returned it.
    pub fn take(&self, handle: JobHandle) -> Result<Option<JobResponse>, DispatchError> {
        let mut inner = self.lock();
        let resolved = match inner.entries.get(&handle) {
            Some(entry) if !entry.is_watched() => entry.outcome.is_some(),
            _ => return Err(DispatchError::InvalidHandle(handle)),
        };
        if !resolved {
            return Ok(None);
        }
        let entry = inner
            .entries
            .remove(&handle)
            .ok_or(DispatchError::InvalidHandle(handle))?;
        drop(inner);
        Ok(entry.outcome.map(Outcome::into_response))
    }

    /// Block until the handle resolves or `timeout` elapses.
    ///
    /// `None` waits indefinitely. On timeout the handle stays valid.
    pub async fn wait(
        &self,
        handle: JobHandle,
        timeout: Option<Duration>,
    ) -> Result<JobResponse, DispatchError> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let notify = self.notifier(handle)?;
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(response) = self.take(handle)? {
                return Ok(response);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(DispatchError::TimedOut);
                    }
                }
                None => notified.await,
            }
        }
    }

    fn notifier(&self, handle: JobHandle) -> Result<Arc<Notify>, DispatchError> {
        self.lock()
            .entries
            .get(&handle)
            .filter(|entry| !entry.is_watched())
            .map(|entry| entry.notify.clone())
            .ok_or(DispatchError::InvalidHandle(handle))
    }

    /// Attach a handle to a wait queue's ready channel.
    ///
    /// A handle already resolved is announced immediately.
    pub(crate) fn watch(
        &self,
        handle: JobHandle,
        ready: mpsc::UnboundedSender<JobHandle>,
    ) -> Result<(), DispatchError> {
        let mut inner = self.lock();
        let entry = inner
            .entries
            .get_mut(&handle)
            .ok_or(DispatchError::InvalidHandle(handle))?;
        if entry.is_watched() {
            return Err(DispatchError::InvalidHandle(handle));
        }
        if entry.outcome.is_some() {
            let _ = ready.send(handle);
        }
        entry.watcher = Some(ready);
        Ok(())
    }

    /// Detach a handle from its wait queue.
    pub(crate) fn unwatch(&self, handle: JobHandle) {
        if let Some(entry) = self.lock().entries.get_mut(&handle) {
            entry.watcher = None;
        }
    }

    /// Whether the handle has a response waiting.
    pub fn is_resolved(&self, handle: JobHandle) -> Result<bool, DispatchError> {
        self.lock()
            .entries
            .get(&handle)
            .map(|entry| entry.outcome.is_some())
            .ok_or(DispatchError::InvalidHandle(handle))
    }

    /// Handles issued and not yet consumed.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles still waiting for a worker to resolve them.
    pub fn unresolved(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|entry| entry.outcome.is_none())
            .count()
    }

    /// Drop every resolved entry nobody took, releasing its regions.
    pub fn reap_resolved(&self) -> usize {
        let reaped: Vec<Entry> = {
            let mut inner = self.lock();
            let handles: Vec<JobHandle> = inner
                .entries
                .iter()
                .filter(|(_, entry)| entry.outcome.is_some())
                .map(|(handle, _)| *handle)
                .collect();
            handles
                .iter()
                .filter_map(|handle| inner.entries.remove(handle))
                .collect()
        };
        reaped.len()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
