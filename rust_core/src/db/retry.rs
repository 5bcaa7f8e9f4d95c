//! Retry logic for transient backend failures
//!
//! Provides automatic retry with exponential backoff for backend writes.

use super::BackendError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: std::env::var("DB_RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts),
            base_backoff_ms: std::env::var("DB_RETRY_BASE_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.base_backoff_ms),
            max_backoff_ms: std::env::var("DB_RETRY_MAX_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_backoff_ms),
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)));
        Duration::from_millis(exponential.min(self.max_backoff_ms))
    }
}

/// Execute a backend operation, retrying transient failures
///
/// # Example
/// ```ignore
/// let inserted = execute_with_retry(
///     || backend.insert_token(&token),
///     RetryPolicy::default(),
/// ).await?;
/// ```
pub async fn execute_with_retry<F, Fut, T>(mut f: F, policy: RetryPolicy) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < policy.max_attempts && e.is_transient() => {
                let backoff = policy.backoff(attempt);
                warn!(
                    "Backend operation failed (attempt {}/{}): {}. Retrying in {:?}",
                    attempt, policy.max_attempts, e, backoff
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff_ms: 1,
            max_backoff_ms: 5,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(8), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result = execute_with_retry(
            || {
                let count = attempt_count_clone.clone();
                async move {
                    let current = count.fetch_add(1, Ordering::SeqCst) + 1;
                    if current < 3 {
                        Err(BackendError::Unavailable("connection refused".into()))
                    } else {
                        Ok(42)
                    }
                }
            },
            fast(),
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_fails_after_max_attempts() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result: Result<i32, BackendError> = execute_with_retry(
            || {
                let count = attempt_count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::Unavailable("connection timeout".into()))
                }
            },
            fast(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_on_non_transient_error() {
        let attempt_count = Arc::new(AtomicU32::new(0));
        let attempt_count_clone = attempt_count.clone();

        let result: Result<i32, BackendError> = execute_with_retry(
            || {
                let count = attempt_count_clone.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err(BackendError::Query("invalid input syntax".into()))
                }
            },
            fast(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1); // Should not retry
    }
}
