//! Retry wrapper for storage calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::StorageError;

/// Counter incremented once per storage call that exhausts its retries.
pub const METRIC_EXECUTE_FAIL: &str = "armada_storage_execute_fail";

/// Bounded exponential retry for transient storage failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: u32,
    /// Deadline applied to each individual attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            factor: 2,
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_delay * self.factor.saturating_pow(attempt)
    }
}

/// Runs `op` under the policy, retrying transient failures.
///
/// Non-retryable errors (`NotFound`, schema violations, lost CAS races)
/// surface immediately; exhaustion surfaces the last error and bumps the
/// `ExecuteFail` counter.
pub async fn with_retries<T, F, Fut>(
    policy: RetryPolicy,
    op_name: &'static str,
    mut op: F,
) -> Result<T, StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(policy.attempt_timeout)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying storage operation"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    metrics::counter!(METRIC_EXECUTE_FAIL, 1, "op" => op_name);
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            factor: 2,
            attempt_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries(quick_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StorageError::Unavailable("flaky".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_not_found() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(quick_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StorageError::RowNotFound {
                    table: "job_runtime",
                    key: "job_x".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retries(quick_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StorageError::Unavailable("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }
}
