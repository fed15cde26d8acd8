//! Durable request delivery for push and analytics clients.
//!
//! Provides a request vault with:
//! - 💾 Durable job storage (in-memory or JSON file)
//! - ⏰ Not-before scheduling with immediate wakeup for urgent requests
//! - 🔄 Retries with a shared exponential backoff
//! - 🛑 A user consent gate that pauses delivery without losing work
//! - 🚦 A bound on concurrent in-flight requests
//!
//! ## Quick Start - Describing a Request
//!
//! ```
//! use courier_vault::{HttpMethod, Request};
//! use serde_json::json;
//!
//! let request = Request::post("/events")
//!     .with_body(json!({"type": "@APP_OPEN"}))
//!     .for_user("user-42");
//!
//! assert_eq!(request.method, HttpMethod::Post);
//! assert_eq!(request.user_id.as_deref(), Some("user-42"));
//! ```
//!
//! ## Backoff
//!
//! ```
//! use courier_vault::BackoffController;
//!
//! let backoff = BackoffController::default();
//! assert_eq!(backoff.current(), 10_000);
//! assert_eq!(backoff.backoff(), 15_000);
//! backoff.reset();
//! assert_eq!(backoff.current(), 10_000);
//! ```
//!
//! ## Configuration
//!
//! ```
//! use courier_vault::VaultConfig;
//! use std::time::Duration;
//!
//! let config = VaultConfig::new("tracking")
//!     .with_normal_wait(Duration::from_secs(5))
//!     .with_max_parallel_calls(2);
//!
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Complete Example
//!
//! ```no_run
//! use courier_vault::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), VaultError> {
//!     let queue = JobQueue::new(FileJobStore::open("data/jobs.json").await?);
//!     let consent = Arc::new(ConsentGate::granted());
//!     let executor = Arc::new(FnExecutor::new(|request| async move {
//!         // Perform the HTTP call here
//!         println!("{} {}", request.method, request.path);
//!         Ok(Response::new(200, serde_json::json!({"success": true})))
//!     }));
//!
//!     let vault = RequestVault::new(queue, executor, consent)?;
//!     vault.put(&Request::put("/installation"), 0).await;
//!
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod consent;
pub mod error;
pub mod executor;
pub mod job;
pub mod queue;
pub mod request;
pub mod store;
pub mod vault;

pub use backoff::BackoffController;
pub use config::VaultConfig;
pub use consent::{ConsentGate, ConsentListener, SubscriptionId};
pub use error::{RequestError, VaultError, VaultResult};
pub use executor::{DefaultFailureClassifier, FailureClassifier, FnExecutor, RequestExecutor, RetryDecision};
pub use job::{Job, JobId, Timestamp};
pub use queue::JobQueue;
pub use request::{HttpMethod, Outcome, Request, RequestFailure, RequestId, Response};
pub use store::{FileJobStore, JobStore, MemoryJobStore};
pub use vault::{RequestVault, RequestVaultBuilder};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backoff::BackoffController;
    pub use crate::config::VaultConfig;
    pub use crate::consent::ConsentGate;
    pub use crate::error::{RequestError, VaultError, VaultResult};
    pub use crate::executor::{FailureClassifier, FnExecutor, RequestExecutor, RetryDecision};
    pub use crate::queue::JobQueue;
    pub use crate::request::{HttpMethod, Outcome, Request, RequestFailure, Response};
    pub use crate::store::{FileJobStore, JobStore, MemoryJobStore};
    pub use crate::vault::RequestVault;
}
