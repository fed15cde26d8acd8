//! Job definition and scheduling timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job unique identifier.
pub type JobId = Uuid;

/// Milliseconds since the Unix epoch.
///
/// Values `<= 0` are "as soon as possible" sentinels and are always due.
pub type Timestamp = i64;

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> Timestamp {
    Utc::now().timestamp_millis()
}

/// Compute the not-before timestamp for a delay.
///
/// A non-positive delay is kept as-is so that immediate jobs sort ahead of
/// every real timestamp.
pub fn not_before_after(delay_ms: i64, now: Timestamp) -> Timestamp {
    if delay_ms <= 0 {
        delay_ms
    } else {
        now.saturating_add(delay_ms)
    }
}

/// A durable, timestamped, serialized request awaiting execution.
///
/// Jobs are never edited. A retry posts a new job with a later
/// `not_before`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier
    pub id: JobId,

    /// Serialized request description
    pub description: String,

    /// Earliest time the job may be dispatched
    pub not_before: Timestamp,

    /// When the job was stored
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job.
    pub fn new(description: impl Into<String>, not_before: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            not_before,
            created_at: Utc::now(),
        }
    }

    /// Check if the job may be dispatched at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.not_before <= now
    }

    /// Milliseconds left before the job becomes due.
    pub fn remaining(&self, now: Timestamp) -> i64 {
        self.not_before.saturating_sub(now).max(0)
    }
}
