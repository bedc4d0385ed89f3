//! Retry envelope applying the pipeline's exponential-backoff-with-jitter
//! formula, plus a failure tracker for suppressing repeated log spam in
//! long-running loops (the claim-pending sweep, heartbeats).

use rand::Rng;
use std::future::Future;
use tracing::{debug, warn};

use crate::config::RetryConfig;

/// Outcome of a retried operation.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success { value: T, attempts: u32 },
    Failed { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success { .. })
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success { value, .. } => Ok(value),
            RetryResult::Failed { error, .. } => Err(error),
        }
    }
}

/// Runs `operation` up to `config.max_retries + 1` times, sleeping
/// `config.delay_for_attempt(attempt, jitter)` between attempts. `should_retry`
/// lets the caller stop early on non-retryable errors.
pub async fn retry_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    should_retry: impl Fn(&E) -> bool,
    operation: F,
) -> RetryResult<T, E>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation(attempt).await {
            Ok(value) => return RetryResult::Success { value, attempts: attempt },
            Err(e) => {
                if attempt > config.max_retries || !should_retry(&e) {
                    return RetryResult::Failed { error: e, attempts: attempt };
                }
                let jitter = rand::thread_rng().gen_range(0.0..1.0);
                let delay = config.delay_for_attempt(attempt, jitter);
                warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// State tracker for repeated operations that may fail intermittently.
///
/// Useful for background tasks (like the claim-pending sweep) that run
/// continuously and should suppress log spam after repeated failures.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!("operation recovered after {} consecutive failures", self.consecutive_failures);
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Returns `true` if this failure should be logged (not suppressed).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_immediately_without_sleeping() {
        let config = RetryConfig::default();
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            "test",
            &config,
            |_: &String| true,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, String>(42) }
            },
        )
        .await;
        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_retrying_when_should_retry_returns_false() {
        let config = RetryConfig::default();
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            "test",
            &config,
            |_: &String| false,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<i32, _>("permanent".to_string()) }
            },
        )
        .await;
        assert!(!result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_tracker_suppresses_after_threshold() {
        let mut tracker = FailureTracker::new(2);
        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());
        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
    }
}
