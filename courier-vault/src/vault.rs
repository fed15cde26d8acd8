//! The request vault.
//!
//! A [`RequestVault`] owns one worker task. The worker sleeps until the
//! earliest stored job is due, takes a parallelism slot, removes the job
//! from the store and hands it to the [`RequestExecutor`] on a separate
//! task. The outcome decides whether the request is dropped or posted back
//! with the shared backoff as its delay.
//!
//! Nothing is dispatched while the [`ConsentGate`] is closed: the worker
//! treats the next due time as infinitely far away and sleeps until a
//! `put` or a consent change wakes it.

use crate::backoff::BackoffController;
use crate::config::VaultConfig;
use crate::consent::{ConsentGate, SubscriptionId};
use crate::error::{RequestError, VaultError, VaultResult};
use crate::executor::{DefaultFailureClassifier, FailureClassifier, RequestExecutor, RetryDecision};
use crate::job::{JobId, Timestamp, not_before_after, now_millis};
use crate::queue::JobQueue;
use crate::request::{Outcome, Request, RequestFailure, Response};
use crate::store::{FileJobStore, MemoryJobStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Builder for [`RequestVault`].
pub struct RequestVaultBuilder {
    queue: JobQueue,
    executor: Arc<dyn RequestExecutor>,
    consent: Arc<ConsentGate>,
    config: VaultConfig,
    backoff: Option<Arc<BackoffController>>,
    classifier: Arc<dyn FailureClassifier>,
}

impl RequestVaultBuilder {
    /// Use a custom configuration.
    pub fn config(mut self, config: VaultConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a backoff controller instead of building one from the config.
    pub fn backoff(mut self, backoff: Arc<BackoffController>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Replace the failure classification.
    pub fn classifier(mut self, classifier: impl FailureClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Validate the configuration and start the worker.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> VaultResult<RequestVault> {
        self.config.validate()?;

        let backoff = self.backoff.unwrap_or_else(|| {
            Arc::new(BackoffController::new(
                self.config.normal_wait,
                self.config.maximum_wait,
                self.config.backoff_exponent,
            ))
        });

        let inner = Arc::new(VaultInner {
            slots: Arc::new(Semaphore::new(self.config.max_parallel_calls)),
            config: self.config,
            queue: self.queue,
            executor: self.executor,
            consent: self.consent,
            backoff,
            classifier: self.classifier,
            wake: Arc::new(Notify::new()),
        });

        let subscription = {
            let wake = inner.wake.clone();
            inner.consent.subscribe(move |has_consent| {
                if has_consent {
                    debug!("Consent given, interrupting sleep");
                    wake.notify_one();
                }
            })
        };

        let span = info_span!("request_vault", vault = %inner.config.name);
        let worker = tokio::spawn(inner.clone().run().instrument(span));

        Ok(RequestVault {
            inner,
            worker: Mutex::new(Some(worker)),
            subscription,
        })
    }
}

/// Makes sure important requests are delivered eventually, even across
/// offline periods and restarts.
pub struct RequestVault {
    inner: Arc<VaultInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    subscription: SubscriptionId,
}

impl RequestVault {
    /// Start a vault with the default configuration.
    pub fn new(
        queue: JobQueue,
        executor: Arc<dyn RequestExecutor>,
        consent: Arc<ConsentGate>,
    ) -> VaultResult<Self> {
        Self::builder(queue, executor, consent).build()
    }

    /// Start configuring a vault.
    pub fn builder(
        queue: JobQueue,
        executor: Arc<dyn RequestExecutor>,
        consent: Arc<ConsentGate>,
    ) -> RequestVaultBuilder {
        RequestVaultBuilder {
            queue,
            executor,
            consent,
            config: VaultConfig::default(),
            backoff: None,
            classifier: Arc::new(DefaultFailureClassifier),
        }
    }

    /// Start a vault over the store named by `config.store_path`, or over
    /// an in-memory store when no path is configured.
    pub async fn open(
        config: VaultConfig,
        executor: Arc<dyn RequestExecutor>,
        consent: Arc<ConsentGate>,
    ) -> VaultResult<Self> {
        let queue = match &config.store_path {
            Some(path) => JobQueue::new(FileJobStore::open(path).await?),
            None => {
                warn!(vault = %config.name, "No store path configured, jobs will not survive restarts");
                JobQueue::new(MemoryJobStore::new())
            }
        };
        Self::builder(queue, executor, consent).config(config).build()
    }

    /// Save a request for delivery after `delay_ms` milliseconds.
    ///
    /// A delay of zero or less means "as soon as possible". Storage
    /// failures are logged, not returned; use [`RequestVault::try_put`] to
    /// observe them.
    pub async fn put(&self, request: &Request, delay_ms: i64) {
        self.inner.put(request, delay_ms).await;
    }

    /// Like [`RequestVault::put`], but reports storage failures.
    pub async fn try_put(&self, request: &Request, delay_ms: i64) -> VaultResult<JobId> {
        self.inner.try_put(request, delay_ms).await
    }

    /// The shared backoff controller.
    pub fn backoff(&self) -> &Arc<BackoffController> {
        &self.inner.backoff
    }

    pub fn config(&self) -> &VaultConfig {
        &self.inner.config
    }

    pub fn queue(&self) -> &JobQueue {
        &self.inner.queue
    }

    /// Number of jobs waiting in the store.
    pub async fn pending(&self) -> VaultResult<usize> {
        self.inner.queue.len().await
    }

    /// Number of requests currently dispatched and awaiting their outcome.
    pub fn in_flight(&self) -> usize {
        self.inner.config.max_parallel_calls - self.inner.slots.available_permits()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the worker.
    ///
    /// Requests already handed to the executor still run to completion and
    /// may post their retry. Jobs in the store are kept.
    pub fn shutdown(&self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
            info!(vault = %self.inner.config.name, "Request vault stopped");
        }
    }
}

impl Drop for RequestVault {
    fn drop(&mut self) {
        self.shutdown();
        self.inner.consent.unsubscribe(self.subscription);
    }
}

struct VaultInner {
    config: VaultConfig,
    queue: JobQueue,
    executor: Arc<dyn RequestExecutor>,
    consent: Arc<ConsentGate>,
    backoff: Arc<BackoffController>,
    classifier: Arc<dyn FailureClassifier>,
    slots: Arc<Semaphore>,
    wake: Arc<Notify>,
}

/// What the worker should do before its next dispatch.
enum Wait {
    Consent,
    NextJob,
    Until(Timestamp),
    Due,
}

impl VaultInner {
    async fn put(&self, request: &Request, delay_ms: i64) {
        if let Err(e) = self.try_put(request, delay_ms).await {
            error!(request_id = %request.id, error = %e, "Failed to store request");
        }
    }

    async fn try_put(&self, request: &Request, delay_ms: i64) -> VaultResult<JobId> {
        let not_before = not_before_after(delay_ms, now_millis());
        let previous = self.queue.peek_next_not_before().await?;
        let description = request.to_json()?;
        let job_id = self.queue.post(description, not_before).await?;

        debug!(request_id = %request.id, job_id = %job_id, delay_ms, "Stored request");

        if previous.is_none_or(|previous| not_before < previous) {
            debug!("Interrupting sleep");
            self.wake.notify_one();
        }
        Ok(job_id)
    }

    async fn run(self: Arc<Self>) {
        info!(
            max_parallel_calls = self.config.max_parallel_calls,
            "Request vault worker started"
        );

        loop {
            // A panic inside a pass surfaces as a `JoinError` instead of
            // unwinding out of the worker.
            let vault = self.clone();
            let mut pass = AbortOnDrop(tokio::spawn(
                async move { vault.tick().await }.in_current_span(),
            ));
            let result = match (&mut pass.0).await {
                Ok(result) => result,
                Err(e) => Err(VaultError::Other(format!("Worker pass failed: {}", e))),
            };

            if let Err(e) = result {
                error!(error = %e, "Failed to execute job");
                tokio::time::sleep(self.config.error_pause).await;
            }
        }
    }

    async fn next_wait(&self) -> VaultResult<Wait> {
        let next = self.queue.peek_next_not_before().await?;
        if !self.consent.has_consent() {
            return Ok(Wait::Consent);
        }
        Ok(match next {
            None => Wait::NextJob,
            Some(not_before) if not_before > now_millis() => Wait::Until(not_before),
            Some(_) => Wait::Due,
        })
    }

    /// One pass of the worker: wait, or dispatch exactly one job.
    async fn tick(self: &Arc<Self>) -> VaultResult<()> {
        match self.next_wait().await? {
            Wait::Consent => {
                debug!("Waiting for user consent");
                self.wake.notified().await;
                return Ok(());
            }
            Wait::NextJob => {
                debug!("Waiting for next job");
                self.wake.notified().await;
                return Ok(());
            }
            Wait::Until(not_before) => {
                let sleep_ms = not_before.saturating_sub(now_millis()).max(0) as u64;
                debug!(sleep_ms, "Sleeping until next job");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(sleep_ms)) => {}
                    _ = self.wake.notified() => {}
                }
                return Ok(());
            }
            Wait::Due => {}
        }

        let permit = tokio::select! {
            permit = self.slots.clone().acquire_owned() => permit.map_err(|_| VaultError::Closed)?,
            _ = self.wake.notified() => return Ok(()),
        };

        let job = self.queue.next_job().await?;
        let request = match Request::from_json(&job.description) {
            Ok(request) => request,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Dropping job that cannot be decoded");
                return Ok(());
            }
        };

        let dispatch = Dispatch {
            vault: self.clone(),
            request,
            _permit: permit,
        };

        if !self.consent.has_consent() {
            let failure = RequestFailure::new(RequestError::ConsentWithheld)
                .with_response(Response::message("Missing user consent"));
            dispatch.complete(Err(failure)).await;
            return Ok(());
        }

        debug!(
            request_id = %dispatch.request.id,
            method = %dispatch.request.method,
            path = %dispatch.request.path,
            "Dispatching request"
        );
        tokio::spawn(dispatch.execute().in_current_span());
        Ok(())
    }
}

/// Aborts the wrapped task when dropped, so stopping the worker also stops
/// the pass it is waiting on.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A request taken out of the store, holding its parallelism slot.
///
/// The slot is released when the dispatch is dropped, which happens
/// exactly once per request whatever the outcome.
struct Dispatch {
    vault: Arc<VaultInner>,
    request: Request,
    _permit: OwnedSemaphorePermit,
}

impl Dispatch {
    async fn execute(self) {
        let executor = self.vault.executor.clone();
        let request = self.request.clone();
        let outcome = match tokio::spawn(async move { executor.execute(&request).await }).await {
            Ok(outcome) => outcome,
            Err(e) => Err(RequestFailure::new(RequestError::Other(format!(
                "Executor task failed: {}",
                e
            )))),
        };
        self.complete(outcome).await;
    }

    async fn complete(self, outcome: Outcome) {
        let vault = &self.vault;
        let request = &self.request;

        let failure = match outcome {
            Ok(_) => {
                debug!(request_id = %request.id, "Job done");
                vault.backoff.reset();
                return;
            }
            Err(failure) => failure,
        };

        debug!(request_id = %request.id, error = %failure, "Request failed");
        let delay = match vault.classifier.classify(&failure.error) {
            RetryDecision::RetryWithBackoff => vault.backoff.backoff(),
            RetryDecision::Retry => vault.backoff.current(),
            RetryDecision::Discard => {
                debug!(request_id = %request.id, error = %failure, "Discarding job");
                return;
            }
        };

        debug!(request_id = %request.id, delay_ms = delay, "Reposting job");
        vault.put(request, delay as i64).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FnExecutor;

    fn fast_config() -> VaultConfig {
        VaultConfig::new("test")
            .with_normal_wait(Duration::from_millis(20))
            .with_maximum_wait(Duration::from_millis(200))
    }

    fn ok_executor() -> Arc<dyn RequestExecutor> {
        Arc::new(FnExecutor::new(|_| async { Ok(Response::default()) }))
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let result = RequestVault::builder(
            JobQueue::new(MemoryJobStore::new()),
            ok_executor(),
            Arc::new(ConsentGate::granted()),
        )
        .config(fast_config().with_max_parallel_calls(0))
        .build();

        assert!(matches!(result, Err(VaultError::Config(_))));
    }

    #[tokio::test]
    async fn test_drop_unsubscribes_from_consent() {
        let consent = Arc::new(ConsentGate::withheld());
        let vault = RequestVault::new(
            JobQueue::new(MemoryJobStore::new()),
            ok_executor(),
            consent.clone(),
        )
        .unwrap();
        assert_eq!(consent.listener_count(), 1);
        assert!(vault.is_running());

        drop(vault);
        assert_eq!(consent.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_keeps_jobs() {
        let consent = Arc::new(ConsentGate::withheld());
        let vault = RequestVault::builder(
            JobQueue::new(MemoryJobStore::new()),
            ok_executor(),
            consent.clone(),
        )
        .config(fast_config())
        .build()
        .unwrap();

        vault.put(&Request::post("/events"), 0).await;
        vault.shutdown();
        tokio::task::yield_now().await;
        assert!(!vault.is_running());

        consent.set_consent(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(vault.pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_try_put_returns_job_id() {
        let vault = RequestVault::builder(
            JobQueue::new(MemoryJobStore::new()),
            ok_executor(),
            Arc::new(ConsentGate::withheld()),
        )
        .config(fast_config())
        .build()
        .unwrap();

        let id = vault.try_put(&Request::get("/user"), 1_000).await.unwrap();
        assert!(!id.is_nil());
        assert_eq!(vault.pending().await.unwrap(), 1);
        assert_eq!(vault.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_open_uses_configured_store_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("jobs.json");

        {
            let vault = RequestVault::open(
                fast_config().with_store_path(&path),
                ok_executor(),
                Arc::new(ConsentGate::withheld()),
            )
            .await
            .unwrap();
            vault.put(&Request::put("/installation"), 0).await;
        }

        let store = FileJobStore::open(&path).await.unwrap();
        assert_eq!(crate::store::JobStore::len(&store).await.unwrap(), 1);
    }
}
