//! Bounded Retry with Exponential Backoff
//!
//! Shared retry helper for transient upstream failures: exponential backoff
//! from a configurable base with factor 2 and random jitter. Only
//! UpstreamUnavailable and HTTP transport errors are retried; everything
//! else surfaces immediately.

use edplan_types::{EdPlanError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for one external call site
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base_seconds: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base: Duration::from_secs_f64(backoff_base_seconds.max(0.0)),
        }
    }

    /// Backoff before the given retry (1-based), with up to 50% jitter
    fn delay_before_retry(&self, retry: u32) -> Duration {
        let base = self.backoff_base.as_secs_f64() * 2_f64.powi(retry.saturating_sub(1) as i32);
        let jitter = rand::thread_rng().gen_range(0.0..=0.5) * base;
        Duration::from_secs_f64(base + jitter)
    }
}

fn is_transient(error: &EdPlanError) -> bool {
    matches!(
        error,
        EdPlanError::UpstreamUnavailable { .. } | EdPlanError::HttpError(_)
    )
}

/// Run an async operation under the policy. Returns the first success, the
/// first non-transient error, or the final transient error after exhaustion.
/// The returned flag reports whether any retry happened, for trace outcomes.
pub async fn with_retries<T, F, Fut>(
    policy: RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> (Result<T>, bool)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retried = false;
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return (Ok(value), retried),
            Err(error) if is_transient(&error) && attempt < policy.max_attempts => {
                let delay = policy.delay_before_retry(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                retried = true;
                attempt += 1;
            }
            Err(error) => return (Err(error), retried),
        }
    }
}
