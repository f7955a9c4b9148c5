use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Factor to multiply delay by after each attempt
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

/// Decides whether an error is retryable and how long the server asked us to wait.
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;

    /// Server-provided lower bound for the next sleep (e.g. `Retry-After`).
    fn retry_after(&self, _error: &E) -> Option<Duration> {
        None
    }
}

/// Execute an async function with retries.
///
/// Every sleep is at least the policy's `retry_after` hint and at least the
/// current exponential backoff. The last error is returned once
/// `max_attempts` is reached or the error is not retryable.
pub async fn with_retry<F, Fut, T, E, P>(
    config: &RetryConfig,
    policy: &P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: RetryPolicy<E> + ?Sized,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!("Operation succeeded after {} attempts", attempts);
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !policy.is_retryable(&error) {
                    if attempts > 1 {
                        warn!("Operation failed after {} attempts: {}", attempts, error);
                    }
                    return Err(error);
                }

                let wait = policy
                    .retry_after(&error)
                    .map_or(delay, |hint| hint.max(delay));

                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempts, error, wait
                );
                metrics::counter!("inventory_sync.retry.attempts", 1);

                sleep(wait).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[derive(Debug)]
    enum TestError {
        Busy(Duration),
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    struct BusyPolicy;

    impl RetryPolicy<TestError> for BusyPolicy {
        fn is_retryable(&self, error: &TestError) -> bool {
            matches!(error, TestError::Busy(_))
        }

        fn retry_after(&self, error: &TestError) -> Option<Duration> {
            match error {
                TestError::Busy(d) => Some(*d),
                TestError::Fatal => None,
            }
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = with_retry(&fast_config(5), &BusyPolicy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::Busy(Duration::from_millis(1)))
        })
        .await;

        assert!(matches!(result, Err(TestError::Busy(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<(), TestError> = with_retry(&fast_config(5), &BusyPolicy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TestError::Fatal)
        })
        .await;

        assert!(matches!(result, Err(TestError::Fatal)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_at_least_the_retry_after_hint() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let result = with_retry(&fast_config(5), &BusyPolicy, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TestError::Busy(Duration::from_secs(3)))
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
