//! Bounded exponential backoff for remote writes.
//!
//! Only transient failures ([`SyncError::is_transient`]) are retried;
//! permanent ones return on the first attempt.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Delay before the first retry (default 1s)
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay (default 30s)
    pub max_delay_ms: u64,
    /// Multiplier applied per retry (default 2.0)
    pub backoff_factor: f64,
    /// Total attempts including the first (default 5)
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Cap the exponent; 2^31 of any sane base is already past the cap
        let exp = attempt.min(31) as i32;
        let base_ms = self.initial_delay_ms as f64 * self.backoff_factor.max(1.0).powi(exp);
        let delay_ms = base_ms.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(delay_ms as u64)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, SyncError>,
    /// Number of attempts made
    pub attempts: u32,
}

/// Run `operation` until it succeeds, fails permanently, or the attempt
/// budget runs out. No delay follows the final attempt.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let max = policy.max_attempts();
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("[Retry] {} succeeded after {} retries", label, attempt);
                }
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                };
            }
            Err(e) => {
                attempt += 1;

                if !e.is_transient() {
                    warn!("[Retry] {} failed permanently: {}", label, e);
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                    };
                }

                if attempt >= max {
                    warn!("[Retry] {} failed after {} attempts: {}", label, attempt, e);
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                    };
                }

                let delay = policy.delay_for_attempt(attempt - 1);
                debug!(
                    "[Retry] {} attempt {} failed ({}), retrying in {:?}",
                    label, attempt, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
