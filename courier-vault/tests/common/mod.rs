//! Shared fixtures for vault integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use courier_vault::job::now_millis;
use courier_vault::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub const NORMAL_WAIT_MS: u64 = 20;
pub const MAXIMUM_WAIT_MS: u64 = 200;

pub fn fast_config() -> VaultConfig {
    VaultConfig::new("test")
        .with_normal_wait(Duration::from_millis(NORMAL_WAIT_MS))
        .with_maximum_wait(Duration::from_millis(MAXIMUM_WAIT_MS))
        .with_error_pause(Duration::from_millis(5))
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn transport_failure() -> Outcome {
    Err(RequestFailure::new(RequestError::Transport("connection reset".into())))
}

pub fn success() -> Outcome {
    Ok(Response::new(200, serde_json::json!({"success": true})))
}

/// Executor that plays back scripted outcomes, then succeeds.
#[derive(Default)]
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Outcome>>,
    calls: Mutex<Vec<Request>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Default::default()
        }
    }

    pub fn then(self, outcome: Outcome) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    pub fn calls(&self) -> Vec<Request> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|r| r.path).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestExecutor for ScriptedExecutor {
    async fn execute(&self, request: &Request) -> Outcome {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let outcome = self.script.lock().unwrap().pop_front().unwrap_or_else(success);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(request.clone());
        outcome
    }
}

/// Memory store that records the delay of every timed post.
#[derive(Default)]
pub struct RecordingStore {
    inner: MemoryJobStore,
    delays: Mutex<Vec<i64>>,
    posts: AtomicUsize,
}

impl RecordingStore {
    /// Delays of posts that carried a real timestamp, in post order.
    pub fn delays(&self) -> Vec<i64> {
        self.delays.lock().unwrap().clone()
    }

    pub fn post_count(&self) -> usize {
        self.posts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn peek_next_not_before(&self) -> VaultResult<Option<Timestamp>> {
        self.inner.peek_next_not_before().await
    }

    async fn post(&self, description: String, not_before: Timestamp) -> VaultResult<JobId> {
        if not_before > 0 {
            self.delays.lock().unwrap().push(not_before - now_millis());
        }
        self.posts.fetch_add(1, Ordering::SeqCst);
        self.inner.post(description, not_before).await
    }

    async fn pop_due(&self, now: Timestamp) -> VaultResult<Option<Job>> {
        self.inner.pop_due(now).await
    }

    async fn len(&self) -> VaultResult<usize> {
        self.inner.len().await
    }

    async fn clear(&self) -> VaultResult<()> {
        self.inner.clear().await
    }
}

/// Memory store whose operations can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryJobStore,
    pop_failures: AtomicUsize,
    reject_posts: AtomicBool,
    pops: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_pops(count: usize) -> Self {
        Self {
            pop_failures: AtomicUsize::new(count),
            ..Default::default()
        }
    }

    pub fn reject_posts(&self, reject: bool) {
        self.reject_posts.store(reject, Ordering::SeqCst);
    }

    pub fn pop_attempts(&self) -> usize {
        self.pops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn peek_next_not_before(&self) -> VaultResult<Option<Timestamp>> {
        self.inner.peek_next_not_before().await
    }

    async fn post(&self, description: String, not_before: Timestamp) -> VaultResult<JobId> {
        if self.reject_posts.load(Ordering::SeqCst) {
            return Err(VaultError::Store("disk full".into()));
        }
        self.inner.post(description, not_before).await
    }

    async fn pop_due(&self, now: Timestamp) -> VaultResult<Option<Job>> {
        self.pops.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .pop_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(VaultError::Store("storage unavailable".into()));
        }
        self.inner.pop_due(now).await
    }

    async fn len(&self) -> VaultResult<usize> {
        self.inner.len().await
    }

    async fn clear(&self) -> VaultResult<()> {
        self.inner.clear().await
    }
}

/// Memory store whose first `pop_due` panics.
#[derive(Default)]
pub struct PanickingStore {
    inner: MemoryJobStore,
    panicked: AtomicBool,
}

impl PanickingStore {
    pub fn has_panicked(&self) -> bool {
        self.panicked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for PanickingStore {
    async fn peek_next_not_before(&self) -> VaultResult<Option<Timestamp>> {
        self.inner.peek_next_not_before().await
    }

    async fn post(&self, description: String, not_before: Timestamp) -> VaultResult<JobId> {
        self.inner.post(description, not_before).await
    }

    async fn pop_due(&self, now: Timestamp) -> VaultResult<Option<Job>> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("store bug");
        }
        self.inner.pop_due(now).await
    }

    async fn len(&self) -> VaultResult<usize> {
        self.inner.len().await
    }

    async fn clear(&self) -> VaultResult<()> {
        self.inner.clear().await
    }
}

/// Memory store that withdraws consent as a job is taken out of it.
pub struct ConsentRevokingStore {
    inner: MemoryJobStore,
    consent: Arc<ConsentGate>,
    taken: AtomicUsize,
}

impl ConsentRevokingStore {
    pub fn new(consent: Arc<ConsentGate>) -> Self {
        Self {
            inner: MemoryJobStore::new(),
            consent,
            taken: AtomicUsize::new(0),
        }
    }

    pub fn taken(&self) -> usize {
        self.taken.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobStore for ConsentRevokingStore {
    async fn peek_next_not_before(&self) -> VaultResult<Option<Timestamp>> {
        self.inner.peek_next_not_before().await
    }

    async fn post(&self, description: String, not_before: Timestamp) -> VaultResult<JobId> {
        self.inner.post(description, not_before).await
    }

    async fn pop_due(&self, now: Timestamp) -> VaultResult<Option<Job>> {
        let job = self.inner.pop_due(now).await?;
        if job.is_some() {
            self.consent.set_consent(false);
            self.taken.fetch_add(1, Ordering::SeqCst);
        }
        Ok(job)
    }

    async fn len(&self) -> VaultResult<usize> {
        self.inner.len().await
    }

    async fn clear(&self) -> VaultResult<()> {
        self.inner.clear().await
    }
}
