// Retry logic with exponential backoff
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            max_delay_ms: 8000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all, handy for tests against a mock server
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn next_delay(&self, delay_ms: u64) -> u64 {
        let next = ((delay_ms as f64) * self.backoff_multiplier) as u64;
        next.min(self.max_delay_ms)
    }
}

/// Execute an operation, retrying errors that `should_retry` accepts
///
/// Errors the predicate rejects (a 404, bad credentials) come straight back
/// without burning the backoff budget.
pub async fn with_retry<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("Request succeeded after {} retries", attempt);
                }
                return Ok(result);
            }
            Err(err) => {
                if !should_retry(&err) {
                    debug!("Not retrying: {}", err);
                    return Err(err);
                }

                attempt += 1;
                if attempt > config.max_retries {
                    warn!("Request failed after {} attempts: {}", attempt, err);
                    return Err(err);
                }

                warn!(
                    "Request failed (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt, config.max_retries, err, delay_ms
                );

                sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = config.next_delay(delay_ms);
            }
        }
    }
}

/// Check if an HTTP status code is worth another attempt
pub fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.is_server_error()
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay_ms: 5,
            max_delay_ms: 20,
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let call_count = AtomicU32::new(0);

        let result = with_retry(
            &fast_config(3),
            || async {
                let count = call_count.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 3 {
                    Err("temporary failure")
                } else {
                    Ok(42)
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let call_count = AtomicU32::new(0);

        let result = with_retry(
            &fast_config(2),
            || async {
                call_count.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>("permanent failure")
            },
            |_| true,
        )
        .await;

        assert_eq!(result, Err("permanent failure"));
        assert_eq!(call_count.load(Ordering::SeqCst), 3); // first try + 2 retries
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let call_count = AtomicU32::new(0);

        let result = with_retry(
            &fast_config(5),
            || async {
                call_count.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>("not found")
            },
            |err| *err != "not found",
        )
        .await;

        assert_eq!(result, Err("not found"));
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = fast_config(3);
        assert_eq!(config.next_delay(5), 10);
        assert_eq!(config.next_delay(15), 20);
    }

    #[test]
    fn test_retryable_status_codes() {
        assert!(is_retryable_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(reqwest::StatusCode::REQUEST_TIMEOUT));

        assert!(!is_retryable_status(reqwest::StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(reqwest::StatusCode::UNAUTHORIZED));
    }
}
