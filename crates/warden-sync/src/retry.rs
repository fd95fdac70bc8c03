//! Exponential backoff retry for transient remote failures.

use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Base delay in seconds for exponential backoff.
    pub base_delay_secs: u64,
    /// Maximum delay cap in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 1,
            max_delay_secs: 60,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given max retries and base delay; the delay cap
    /// defaults to 60 seconds.
    #[must_use]
    pub fn new(max_retries: u32, base_delay_secs: u64) -> Self {
        Self {
            max_retries,
            base_delay_secs,
            max_delay_secs: 60,
        }
    }

    /// Whether the error should be retried at the given attempt.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, error: &SyncError) -> bool {
        attempt < self.max_retries && error.is_transient()
    }

    /// Delay before the next attempt.  A `Retry-After` hint from the
    /// remote wins over the exponential schedule, capped at
    /// `max_delay_secs`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &SyncError) -> Duration {
        let secs = if let SyncError::Transient {
            retry_after_secs: Some(retry_after),
            ..
        } = error
        {
            (*retry_after).min(self.max_delay_secs)
        } else {
            self.base_delay_secs
                .saturating_mul(2u64.saturating_pow(attempt))
                .min(self.max_delay_secs)
        };
        Duration::from_secs(secs)
    }

    /// Execute `f` until it succeeds, a non-transient error occurs, or
    /// retries are exhausted.
    pub async fn execute<F, Fut, T>(&self, operation_name: &str, mut f: F) -> SyncResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = SyncResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = operation_name,
                            attempt = attempt + 1,
                            "Operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.should_retry(attempt, &error) {
                        if error.is_transient() && attempt >= self.max_retries {
                            warn!(
                                operation = operation_name,
                                attempts = attempt + 1,
                                error = %error,
                                "Max retries exceeded"
                            );
                        }
                        return Err(error);
                    }

                    let delay = self.delay_for(attempt, &error);
                    debug!(
                        operation = operation_name,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs(),
                        error = %error,
                        "Retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_should_retry_only_transient() {
        let policy = RetryPolicy::new(3, 1);
        assert!(policy.should_retry(0, &SyncError::transient("503")));
        assert!(!policy.should_retry(3, &SyncError::transient("503")));
        assert!(!policy.should_retry(
            0,
            &SyncError::NotFound {
                message: "gone".into()
            }
        ));
        assert!(!policy.should_retry(0, &SyncError::stop("bad config")));
    }

    #[test]
    fn test_exponential_delay() {
        let policy = RetryPolicy::new(5, 1);
        let error = SyncError::transient("boom");
        assert_eq!(policy.delay_for(0, &error), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1, &error), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2, &error), Duration::from_secs(4));
    }

    #[test]
    fn test_retry_after_hint_wins() {
        let policy = RetryPolicy::new(5, 1);
        let error = SyncError::Transient {
            message: "rate limited".into(),
            retry_after_secs: Some(30),
        };
        assert_eq!(policy.delay_for(0, &error), Duration::from_secs(30));

        let capped = RetryPolicy {
            max_retries: 5,
            base_delay_secs: 1,
            max_delay_secs: 10,
        };
        assert_eq!(capped.delay_for(0, &error), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_execute_succeeds_after_retries() {
        let policy = RetryPolicy::new(3, 0);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = policy
            .execute("test_op", move || {
                let counter = counter_clone.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(SyncError::transient("unreachable"))
                    } else {
                        Ok(99)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_non_transient_fails_immediately() {
        let policy = RetryPolicy::new(3, 0);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: SyncResult<()> = policy
            .execute("test_op", move || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(SyncError::ObjectExists {
                        message: "409".into(),
                    })
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
