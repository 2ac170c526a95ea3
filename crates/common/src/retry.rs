//! Bounded retry with exponential backoff
//!
//! Only errors that report themselves as transient are retried. Permanent
//! errors and exhausted attempts are returned unchanged to the caller.

use crate::config::RetryConfig;
use backoff::ExponentialBackoff;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Classification of an error for retry purposes
pub trait Retryable {
    /// Whether the failed operation may succeed if attempted again
    fn is_transient(&self) -> bool;
}

/// Retry policy derived from configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// First delay
    pub initial_interval: Duration,
    /// Upper bound of a single delay
    pub max_interval: Duration,
    /// Delay growth factor
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_interval: Duration::from_millis(config.initial_backoff_ms),
            max_interval: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Policy with near-zero delays, for tests and local tooling
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 1.5,
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_interval,
            current_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            // Attempts are bounded by count, not elapsed time
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

/// Run `operation`, retrying transient failures up to `policy.max_retries` times
pub async fn retry_transient<T, E, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_retries = policy.max_retries;
    let mut attempt: u32 = 0;

    backoff::future::retry(policy.backoff(), || {
        attempt += 1;
        let current = attempt;
        let fut = operation();
        async move {
            match fut.await {
                Ok(value) => Ok(value),
                Err(e) if e.is_transient() && current <= max_retries => {
                    warn!(
                        attempt = current,
                        max_retries = max_retries,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    metrics::counter!(format!("{}_retries_total", crate::metrics::METRICS_PREFIX))
                        .increment(1);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (transient: {})", self.transient)
        }
    }

    impl Retryable for TestError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestError> = retry_transient(&RetryPolicy::immediate(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(TestError { transient: true })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_transient(&RetryPolicy::immediate(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError { transient: true }) }
        })
        .await;

        assert!(result.is_err());
        // One attempt plus two retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = retry_transient(&RetryPolicy::immediate(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError { transient: false }) }
        })
        .await;

        assert!(!result.unwrap_err().transient);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
