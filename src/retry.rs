//! Generic exponential-backoff retry with pluggable retryability
//! classification.
//!
//! Used at two granularities: a single action attempt inside the
//! orchestrator's step loop, and the whole-run restart loop. The delay for
//! 0-indexed attempt `i` is `min(base * 2^i, max)` with no jitter, so a
//! schedule is fully determined by the attempt index.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Ceiling applied to every backoff delay (milliseconds)
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Error-message fragments that classify an error as transient.
///
/// Matched case-insensitively as substrings of the error's display text.
const RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "econnrefused",
    "socket",
    "cdp",
    "transport closed",
];

/// Default retryability classification: substring match against the error's
/// display text
pub fn is_retryable_error<E: std::fmt::Display>(error: &E) -> bool {
    let message = error.to_string().to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| message.contains(p))
}

/// Retry schedule parameters
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Total attempts including the first; 1 degenerates to a plain call
    pub max_attempts: u32,
    /// Delay before the first re-attempt (milliseconds)
    pub base_delay_ms: u64,
    /// Ceiling for any single delay (milliseconds)
    pub max_delay_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryOptions {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            ..Default::default()
        }
    }

    pub fn max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Backoff delay after the failure of 0-indexed `attempt`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.min(20);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Run `operation` until it succeeds, retries are exhausted, or
/// `should_retry` rejects the current error.
///
/// The operation receives the 0-indexed attempt number. The last encountered
/// error is rethrown on exhaustion; a non-retryable error propagates
/// immediately regardless of remaining budget.
pub async fn retry_with_backoff<T, E, Op, Fut, P>(
    mut operation: Op,
    options: &RetryOptions,
    should_retry: P,
) -> Result<T, E>
where
    E: std::fmt::Display,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = options.max_attempts.max(1);

    for attempt in 0..attempts {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let last = attempt + 1 == attempts;
                if last || !should_retry(&error) {
                    return Err(error);
                }
                let delay = options.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    unreachable!("retry loop returns from its final attempt")
}

/// [`retry_with_backoff`] with the default transient-error classification
pub async fn retry_transient<T, E, Op, Fut>(operation: Op, options: &RetryOptions) -> Result<T, E>
where
    E: std::fmt::Display,
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_with_backoff(operation, options, is_retryable_error).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[test]
    fn test_default_classification() {
        assert!(is_retryable_error(&TestError("Connection refused".into())));
        assert!(is_retryable_error(&TestError("request TIMED OUT".into())));
        assert!(is_retryable_error(&TestError("CDP session dropped".into())));
        assert!(!is_retryable_error(&TestError("element not found".into())));
        assert!(!is_retryable_error(&TestError("assertion failed".into())));
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let options = RetryOptions::new(10, 100).max_delay_ms(500);
        assert_eq!(options.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(options.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(options.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(options.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(options.delay_for_attempt(20), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result = retry_transient(
            |_attempt| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(TestError("socket reset".into()))
                    } else {
                        Ok(42u32)
                    }
                }
            },
            &RetryOptions::new(3, 100),
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms of backoff before the succeeding attempt
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_non_retryable_aborts_immediately() {
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> = retry_transient(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError("element not found".into())) }
            },
            &RetryOptions::new(5, 10),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_rethrows_last_error() {
        let result: Result<(), TestError> = retry_transient(
            |attempt| async move { Err(TestError(format!("timeout on attempt {}", attempt))) },
            &RetryOptions::new(3, 1),
        )
        .await;

        assert_eq!(result.unwrap_err().0, "timeout on attempt 2");
    }

    #[tokio::test]
    async fn test_single_attempt_is_plain_call() {
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> = retry_transient(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError("timeout".into())) }
            },
            &RetryOptions::new(1, 1000),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_predicate_overrides_default() {
        let calls = AtomicU32::new(0);

        let result: Result<(), TestError> = retry_with_backoff(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError("timeout".into())) }
            },
            &RetryOptions::new(5, 1),
            |_| false,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
