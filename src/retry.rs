//! Retry and backoff utilities for hosted generator APIs.
//!
//! This module provides functions for handling transient errors, rate limiting,
//! and exponential backoff with jitter, plus [`with_retry`] which drives any
//! async request through those rules.

use std::future::Future;
use std::time::Duration;

/// Default number of retry attempts for rate-limited requests.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default number of retry attempts for transient network errors.
pub const DEFAULT_NETWORK_RETRIES: u32 = 3;

/// Base delay for exponential backoff (1 second).
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Maximum delay cap for exponential backoff (60 seconds).
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Determine if a reqwest error is a transient network error that should be retried.
///
/// Returns true for connection errors, timeouts, and other temporary failures.
/// Returns false for errors that are unlikely to resolve on retry.
pub fn is_transient_network_error(error: &reqwest::Error) -> bool {
    if error.is_connect() || error.is_timeout() || error.is_body() {
        return true;
    }

    // 502 Bad Gateway, 503 Service Unavailable, 504 Gateway Timeout
    if let Some(status) = error.status() {
        if matches!(status.as_u16(), 502..=504) {
            return true;
        }
    }

    false
}

/// Parse the Retry-After header value to get retry delay in seconds.
///
/// Only the integer seconds form is understood; HTTP-date values yield None.
pub fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Calculate exponential backoff delay with jitter.
///
/// Uses the formula: min(base * 2^attempt + jitter, max_delay)
/// where jitter is half the base (capped at 500ms).
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter_ms = (base.as_millis() as u64).min(1000);
    let jitter = Duration::from_millis(jitter_ms / 2);
    exponential.saturating_add(jitter).min(max)
}

/// How a failed request should be treated by [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Not worth retrying (bad request, auth, parse failure, ...).
    Fatal,
    /// The server asked us to slow down, optionally with a Retry-After value.
    RateLimited(Option<u64>),
    /// Connection-level failure that may resolve on its own.
    Network,
}

/// Errors that know whether they are worth retrying.
pub trait Retryable {
    fn retry_class(&self) -> RetryClass;
}

/// Retry budget for [`with_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub network_retries: u32,
    pub rate_limit_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            network_retries: DEFAULT_NETWORK_RETRIES,
            rate_limit_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries; used by tests and one-shot calls.
    pub fn none() -> Self {
        Self {
            network_retries: 0,
            rate_limit_retries: 0,
            ..Self::default()
        }
    }
}

/// Run `op` until it succeeds, fails fatally, or exhausts the retry budget.
///
/// Network failures and rate limits are counted separately. The last error is
/// returned when a budget runs out.
pub async fn with_retry<T, E, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut network_attempt = 0u32;
    let mut rate_limit_attempt = 0u32;

    loop {
        let error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let delay = match error.retry_class() {
            RetryClass::Fatal => return Err(error),
            RetryClass::Network => {
                network_attempt += 1;
                if network_attempt > policy.network_retries {
                    log::error!(
                        "{}: network error after {} attempts. Giving up. Error: {}",
                        label,
                        network_attempt,
                        error
                    );
                    return Err(error);
                }
                let delay = calculate_backoff(network_attempt - 1, policy.backoff_base, policy.backoff_max);
                log::warn!(
                    "{}: network error (attempt {}/{}): {}. Retrying in {:?}...",
                    label,
                    network_attempt,
                    policy.network_retries + 1,
                    error,
                    delay
                );
                delay
            }
            RetryClass::RateLimited(retry_after_secs) => {
                rate_limit_attempt += 1;
                if rate_limit_attempt > policy.rate_limit_retries {
                    log::error!(
                        "{}: rate limit exceeded after {} attempts. Giving up.",
                        label,
                        rate_limit_attempt
                    );
                    return Err(error);
                }
                let delay = match retry_after_secs {
                    Some(secs) => Duration::from_secs(secs).min(policy.backoff_max),
                    None => calculate_backoff(rate_limit_attempt - 1, policy.backoff_base, policy.backoff_max),
                };
                log::info!(
                    "{}: rate limited (attempt {}/{}). Retrying in {:?}...",
                    label,
                    rate_limit_attempt,
                    policy.rate_limit_retries + 1,
                    delay
                );
                delay
            }
        };

        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct FakeError(RetryClass);

    impl std::fmt::Display for FakeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "fake {:?}", self.0)
        }
    }

    impl Retryable for FakeError {
        fn retry_class(&self) -> RetryClass {
            self.0
        }
    }

    fn fast_policy(network: u32, rate: u32) -> RetryPolicy {
        RetryPolicy {
            network_retries: network,
            rate_limit_retries: rate,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_calculate_backoff_first_attempt() {
        let delay = calculate_backoff(0, Duration::from_secs(1), Duration::from_secs(60));
        assert!(delay >= Duration::from_secs(1));
        assert!(delay <= Duration::from_millis(1500));
    }

    #[test]
    fn test_calculate_backoff_grows() {
        let first = calculate_backoff(0, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX);
        let second = calculate_backoff(1, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX);
        let third = calculate_backoff(2, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX);
        assert!(second > first);
        assert!(third > second);
        assert!(third >= Duration::from_secs(4));
    }

    #[test]
    fn test_calculate_backoff_respects_max() {
        let delay = calculate_backoff(10, Duration::from_secs(1), Duration::from_secs(60));
        assert!(delay <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_with_retry_fatal_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), FakeError> = with_retry(fast_policy(3, 3), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FakeError(RetryClass::Fatal)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_network_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), FakeError> = with_retry(fast_policy(2, 0), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FakeError(RetryClass::Network)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_recovers_after_rate_limit() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, FakeError> = with_retry(fast_policy(0, 3), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FakeError(RetryClass::RateLimited(None)))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn test_policy_none_has_no_budget() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.network_retries, 0);
        assert_eq!(policy.rate_limit_retries, 0);
    }
}
