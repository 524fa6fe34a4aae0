//! Multiplexed waiting over many job handles.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use job_core::{DispatchError, JobHandle, JobResponse};
use tokio::sync::mpsc;

use crate::handle_table::HandleTable;

/// Caller-owned multiplexer yielding handles in resolution order.
///
/// The queue stays open while it holds handles that `next` has not
/// returned yet, whether or not they have resolved. Handles it still holds
/// when dropped are detached and remain claimable through `wait`.
pub struct WaitQueue {
    table: Arc<HandleTable>,
    pending: HashSet<JobHandle>,
    ready_tx: mpsc::UnboundedSender<JobHandle>,
    ready_rx: mpsc::UnboundedReceiver<JobHandle>,
}

impl WaitQueue {
    /// Build a queue over `handles`. Fails without side effects if any handle
    /// is invalid or already belongs to another queue.
    pub(crate) fn new(
        table: Arc<HandleTable>,
        handles: impl IntoIterator<Item = JobHandle>,
    ) -> Result<Self, DispatchError> {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let mut queue = Self {
            table,
            pending: HashSet::new(),
            ready_tx,
            ready_rx,
        };
        // On error the partially built queue drops and detaches what it took.
        for handle in handles {
            queue.insert(handle)?;
        }
        Ok(queue)
    }

    /// Add a handle, reopening a drained queue.
    pub fn insert(&mut self, handle: JobHandle) -> Result<(), DispatchError> {
        if self.pending.contains(&handle) {
            return Ok(());
        }
        self.table.watch(handle, self.ready_tx.clone())?;
        self.pending.insert(handle);
        Ok(())
    }

    /// Return the next handle whose response became available.
    ///
    /// `None` waits indefinitely. An empty queue returns `TimedOut` at once.
    pub async fn next(&mut self, timeout: Option<Duration>) -> Result<JobHandle, DispatchError> {
        if self.pending.is_empty() {
            return Err(DispatchError::TimedOut);
        }
        let deadline = timeout.and_then(|t| tokio::time::Instant::now().checked_add(t));
        loop {
            let received = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, self.ready_rx.recv())
                    .await
                    .map_err(|_| DispatchError::TimedOut)?,
                None => self.ready_rx.recv().await,
            };
            // The queue owns a sender, so the channel never closes.
            let Some(handle) = received else {
                return Err(DispatchError::TimedOut);
            };
            if self.pending.remove(&handle) {
                self.table.unwatch(handle);
                return Ok(handle);
            }
        }
    }

    /// Return the next ready handle together with its response.
    pub async fn next_response(
        &mut self,
        timeout: Option<Duration>,
    ) -> Result<(JobHandle, JobResponse), DispatchError> {
        let handle = self.next(timeout).await?;
        let response = self
            .table
            .take(handle)?
            .ok_or(DispatchError::InvalidHandle(handle))?;
        Ok((handle, response))
    }

    /// True when every handle has been returned by `next`.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Handles not yet returned.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, handle: JobHandle) -> bool {
        self.pending.contains(&handle)
    }
}

impl Drop for WaitQueue {
    fn drop(&mut self) {
        for handle in self.pending.drain() {
            self.table.unwatch(handle);
        }
    }
}

impl std::fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitQueue")
            .field("pending", &self.pending.len())
            .finish()
    }
}
