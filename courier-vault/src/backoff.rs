//! Shared retry delay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Default wait between retries, in milliseconds.
pub const NORMAL_WAIT_MS: u64 = 10 * 1000;

/// Upper bound of the wait, in milliseconds.
pub const MAXIMUM_WAIT_MS: u64 = 5 * 60 * 1000;

/// Growth factor applied on each transport failure.
pub const BACKOFF_EXPONENT: f64 = 1.5;

/// A single wait duration shared by every request of a vault.
///
/// Grows multiplicatively on transport failures and snaps back to the
/// normal wait on success. Because it is shared, a failure burst on one
/// endpoint delays retries of all others too.
#[derive(Debug)]
pub struct BackoffController {
    normal: u64,
    maximum: u64,
    exponent: f64,
    current: AtomicU64,
}

impl BackoffController {
    /// Create a controller. `current` starts at `normal`.
    pub fn new(normal: Duration, maximum: Duration, exponent: f64) -> Self {
        let normal = normal.as_millis() as u64;
        let maximum = (maximum.as_millis() as u64).max(normal);
        Self {
            normal,
            maximum,
            exponent: exponent.max(1.0),
            current: AtomicU64::new(normal),
        }
    }

    /// Grow the wait and return the new value in milliseconds.
    pub fn backoff(&self) -> u64 {
        let grown = |wait: u64| -> u64 {
            let next = (wait as f64 * self.exponent).round();
            if next >= self.maximum as f64 {
                self.maximum
            } else {
                next as u64
            }
        };

        let previous = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |wait| Some(grown(wait)))
            .unwrap_or_else(|wait| wait);
        let wait = grown(previous);
        debug!(wait_ms = wait, "Increasing backoff");
        wait
    }

    /// Return to the normal wait.
    pub fn reset(&self) {
        self.current.store(self.normal, Ordering::Release);
    }

    /// Current wait in milliseconds.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    pub fn current_delay(&self) -> Duration {
        Duration::from_millis(self.current())
    }

    pub fn normal(&self) -> u64 {
        self.normal
    }

    pub fn maximum(&self) -> u64 {
        self.maximum
    }
}

impl Default for BackoffController {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(NORMAL_WAIT_MS),
            Duration::from_millis(MAXIMUM_WAIT_MS),
            BACKOFF_EXPONENT,
        )
    }
}
