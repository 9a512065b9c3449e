//! Retry utilities for fault tolerance
//!
//! Provides retry logic with exponential backoff for transient failures such as
//! a lost compare-and-swap race on an assignment row.

use std::time::Duration;
use tokio::time::sleep;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Initial delay between retries (exponential backoff)
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(25),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            backoff_multiplier: 2.0,
        }
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        std::cmp::min(
            Duration::from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier),
            self.max_delay,
        )
    }
}

/// Check if an error is retryable (transient failure)
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

/// Retry only if error is retryable
///
/// Non-retryable errors are returned immediately. The last retryable error is
/// returned once `max_attempts` is exhausted.
pub async fn retry_if_retryable<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() || attempt >= config.max_attempts => return Err(e),
            Err(e) => {
                tracing::debug!(
                    "Retryable error (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt,
                    config.max_attempts,
                    e,
                    delay
                );
                sleep(delay).await;
                delay = config.next_delay(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl std::fmt::Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(retryable={})", self.0)
        }
    }

    impl IsRetryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, Flaky> = retry_if_retryable(&fast(3), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(Flaky(true))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), Flaky> = retry_if_retryable(&fast(5), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(false))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), Flaky> = retry_if_retryable(&fast(4), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(true))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        assert_eq!(RetryConfig::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }
}
