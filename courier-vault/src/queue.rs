//! Job queue over a durable store.

use crate::error::VaultResult;
use crate::job::{Job, JobId, Timestamp, now_millis};
use crate::store::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

/// Job queue backed by a [`JobStore`].
///
/// Adds the blocking take on top of the store: [`JobQueue::next_job`]
/// waits until the earliest job is due, waking early whenever a job is
/// posted.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    posted: Arc<Notify>,
}

impl JobQueue {
    /// Create a queue over a store.
    pub fn new(store: impl JobStore + 'static) -> Self {
        Self::from_shared(Arc::new(store))
    }

    /// Create a queue over a store that is also held elsewhere.
    pub fn from_shared(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            posted: Arc::new(Notify::new()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Not-before time of the earliest job, or `None` when empty.
    pub async fn peek_next_not_before(&self) -> VaultResult<Option<Timestamp>> {
        self.store.peek_next_not_before().await
    }

    /// Store a job description.
    pub async fn post(&self, description: String, not_before: Timestamp) -> VaultResult<JobId> {
        let id = self.store.post(description, not_before).await?;
        trace!(job_id = %id, not_before, "Posted job");
        self.posted.notify_waiters();
        Ok(id)
    }

    /// Take the earliest job, waiting until it is due.
    pub async fn next_job(&self) -> VaultResult<Job> {
        loop {
            let posted = self.posted.notified();
            tokio::pin!(posted);
            posted.as_mut().enable();

            let now = now_millis();
            if let Some(job) = self.store.pop_due(now).await? {
                return Ok(job);
            }

            match self.store.peek_next_not_before().await? {
                None => posted.await,
                Some(not_before) => {
                    let wait = Duration::from_millis(not_before.saturating_sub(now).max(1) as u64);
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = &mut posted => {}
                    }
                }
            }
        }
    }

    /// Number of stored jobs.
    pub async fn len(&self) -> VaultResult<usize> {
        self.store.len().await
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> VaultResult<bool> {
        self.store.is_empty().await
    }

    /// Remove every job.
    pub async fn clear(&self) -> VaultResult<()> {
        self.store.clear().await
    }
}
