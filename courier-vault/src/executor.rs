//! Request execution and failure classification.

use crate::error::RequestError;
use crate::request::{Outcome, Request};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Performs backend calls on behalf of the vault.
///
/// Each call runs on its own task, so implementations may take as long
/// as the network needs without holding up the worker.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Execute the request and report how it went.
    async fn execute(&self, request: &Request) -> Outcome;
}

/// Boxed future returned by closure executors.
pub type ExecuteFuture = Pin<Box<dyn Future<Output = Outcome> + Send>>;

/// Executor built from a closure.
///
/// # Examples
///
/// ```
/// use courier_vault::{FnExecutor, Response};
///
/// let executor = FnExecutor::new(|request| {
///     let path = request.path.clone();
///     async move { Ok(Response::new(200, serde_json::json!({ "path": path }))) }
/// });
/// # let _ = executor;
/// ```
pub struct FnExecutor {
    handler: Arc<dyn Fn(Request) -> ExecuteFuture + Send + Sync>,
}

impl FnExecutor {
    pub fn new<F, Fut>(handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        Self {
            handler: Arc::new(move |request: Request| -> ExecuteFuture {
                Box::pin(handler(request))
            }),
        }
    }
}

#[async_trait]
impl RequestExecutor for FnExecutor {
    async fn execute(&self, request: &Request) -> Outcome {
        (self.handler)(request.clone()).await
    }
}

/// What to do with a request after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Grow the shared backoff, then repost at the new wait.
    RetryWithBackoff,
    /// Repost at the current wait without growing it.
    Retry,
    /// Drop the request.
    Discard,
}

/// Decides whether a failed request is retried.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, error: &RequestError) -> RetryDecision;
}

/// Retries transport failures with growing backoff, retries "client
/// disabled" at the current backoff, and discards everything else.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFailureClassifier;

impl FailureClassifier for DefaultFailureClassifier {
    fn classify(&self, error: &RequestError) -> RetryDecision {
        match error {
            RequestError::Transport(_) => RetryDecision::RetryWithBackoff,
            RequestError::ClientDisabled(_) => RetryDecision::Retry,
            RequestError::ConsentWithheld
            | RequestError::Rejected { .. }
            | RequestError::Other(_) => RetryDecision::Discard,
        }
    }
}

impl<F> FailureClassifier for F
where
    F: Fn(&RequestError) -> RetryDecision + Send + Sync,
{
    fn classify(&self, error: &RequestError) -> RetryDecision {
        self(error)
    }
}
