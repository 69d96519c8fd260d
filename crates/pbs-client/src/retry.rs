//! Fixed-delay retry for coordinator calls.
//!
//! Only [`StatusCode::Unavailable`] outcomes (5xx, connection failures,
//! timeouts) are retried. Anything else is a request-level problem that a
//! resend would not fix.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::BudgetServiceError;

/// Retry settings for one coordinator.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts, including the first (default: 5).
    pub max_attempts: u32,
    /// Pause between attempts (default: 2 seconds).
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: pbs_core::config::DEFAULT_RETRY_ATTEMPTS,
            delay: Duration::from_millis(pbs_core::config::DEFAULT_RETRY_DELAY_MS),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable code, or the
    /// attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, coordinator: &str, mut op: F) -> Result<T, BudgetServiceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BudgetServiceError>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(coordinator, attempt, "coordinator call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.code.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        coordinator,
                        attempt,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %err,
                        "retrying coordinator call"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryConfig {
        RetryConfig::new(5, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_unavailable_retried_to_ceiling() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fast()
            .run("a", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BudgetServiceError::new(StatusCode::Unavailable, "503"))
            })
            .await;
        assert_eq!(result.unwrap_err().code, StatusCode::Unavailable);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_internal_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = fast()
            .run("a", move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BudgetServiceError::new(StatusCode::Internal, "400"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let result = fast()
            .run("a", |attempt| async move {
                if attempt < 3 {
                    Err(BudgetServiceError::new(StatusCode::Unavailable, "502"))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryConfig::new(0, Duration::ZERO).max_attempts, 1);
    }
}
