//! Retry logic with bounded attempts and (optionally exponential) backoff
//!
//! One mechanism is shared by the metadata fetcher and the texture downloader.
//! Errors opt in through [`IsRetryable`]; anything not retryable is returned on
//! first occurrence.
//!
//! # Example
//!
//! ```no_run
//! use skin_dl::retry::{IsRetryable, with_retry};
//! use skin_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() {
//! let config = RetryConfig::default();
//! let result = with_retry(&config, || async {
//!     Ok::<_, MyError>(())
//! }).await;
//! assert!(result.is_ok());
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, TaskError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, refused connections, 5xx) should return `true`.
/// Permanent failures (not found, malformed data, disk full) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TaskError {
    fn is_retryable(&self) -> bool {
        match self {
            TaskError::Transient { .. } => true,
            // Already spent its budget
            TaskError::RetriesExhausted { .. } => false,
            TaskError::NotFound { .. }
            | TaskError::AssetNotFound { .. }
            | TaskError::MalformedResponse { .. }
            | TaskError::UnexpectedStatus { .. }
            | TaskError::Write { .. } => false,
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Task(e) => e.is_retryable(),
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            Error::InvalidRange { .. }
            | Error::Config { .. }
            | Error::Serialization(_)
            | Error::AlreadyRunning => false,
        }
    }
}

/// Why [`with_retry`] gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation failed with a non-retryable error (no retry was attempted for it)
    Permanent(E),
    /// Every attempt failed with a retryable error
    Exhausted {
        /// Total attempts made (initial + retries)
        attempts: u32,
        /// The last observed failure
        last: E,
    },
}

impl<E> RetryError<E> {
    /// The underlying failure
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }

    /// Whether the retry budget ran out
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}

impl From<RetryError<TaskError>> for TaskError {
    fn from(err: RetryError<TaskError>) -> Self {
        match err {
            RetryError::Permanent(e) => e,
            RetryError::Exhausted { attempts, last } => TaskError::RetriesExhausted {
                attempts,
                last: Box::new(last),
            },
        }
    }
}

/// Execute an async operation, retrying transient failures
///
/// The operation is invoked at most `config.max_attempts + 1` times. Between
/// attempts the task sleeps for the current delay, which starts at
/// `initial_delay`, grows by `backoff_multiplier` and is capped at `max_delay`.
///
/// # Returns
///
/// The successful result, [`RetryError::Permanent`] for the first non-retryable
/// failure, or [`RetryError::Exhausted`] carrying the last failure once the
/// budget is spent.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::debug!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;

                delay = next_delay(delay, config);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last: e,
                    });
                }
                tracing::debug!(error = %e, "Operation failed with non-retryable error");
                return Err(RetryError::Permanent(e));
            }
        }
    }
}

/// Grow `delay` by the backoff multiplier, capped at `max_delay`
///
/// A product too large for [`Duration`] saturates to the cap.
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .map_or(config.max_delay, |grown| grown.min(config.max_delay))
}

/// Add random jitter to a delay
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor)).unwrap_or(delay)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn first_success_is_returned_without_retrying() {
        let config = fast_config(3);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_success() {
        let config = fast_config(3);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(
            counter.load(Ordering::SeqCst),
            3,
            "should retry twice before success"
        );
    }

    #[tokio::test]
    async fn test_retry_exhausted_invokes_r_plus_one_times() {
        for retries in [0, 1, 4] {
            let config = fast_config(retries);
            let counter = Arc::new(AtomicU32::new(0));
            let counter_clone = counter.clone();

            let result = with_retry(&config, || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(TestError::Transient)
                }
            })
            .await;

            match result {
                Err(RetryError::Exhausted { attempts, last }) => {
                    assert_eq!(attempts, retries + 1);
                    assert!(matches!(last, TestError::Transient));
                }
                other => panic!("expected exhaustion, got {other:?}"),
            }
            assert_eq!(
                counter.load(Ordering::SeqCst),
                retries + 1,
                "should try initial + {retries} retries"
            );
        }
    }

    #[tokio::test]
    async fn permanent_failure_returns_on_first_attempt() {
        let config = fast_config(5);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Permanent)
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::Permanent(TestError::Permanent))
        ));
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "should not retry permanent error"
        );
    }

    #[tokio::test]
    async fn test_permanent_after_transient_stops_immediately() {
        let config = fast_config(5);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&config, || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count == 0 {
                    Err::<i32, _>(TestError::Transient)
                } else {
                    Err(TestError::Permanent)
                }
            }
        })
        .await;

        assert!(!result.unwrap_err().is_exhausted());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fixed_delay_between_attempts() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 1.0,
            jitter: false,
        };

        let start = std::time::Instant::now();

        let _result = with_retry(&config, || async { Err::<i32, _>(TestError::Transient) }).await;

        let elapsed = start.elapsed();

        // 3 retries x 20ms
        assert!(
            elapsed >= Duration::from_millis(60),
            "should wait at least 60ms, waited {:?}",
            elapsed
        );
        assert!(
            elapsed < Duration::from_secs(2),
            "should not wait too long, waited {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_exponential_backoff_capped_at_max_delay() {
        // Without capping: 50ms, 500ms, 5000ms. With max_delay=100ms: 50, 100, 100.
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(100),
            backoff_multiplier: 10.0,
            jitter: false,
        };

        let start = std::time::Instant::now();
        let _result = with_retry(&config, || async { Err::<i32, _>(TestError::Transient) }).await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(250), "waited {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "waited {:?}", elapsed);
    }

    #[tokio::test]
    async fn oversized_multiplier_saturates_at_max_delay() {
        let config = RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 1e308,
            jitter: false,
        };
        let calls = AtomicU32::new(0);

        let result = with_retry(&config, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(TestError::Transient)
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            next_delay(Duration::from_secs(1), &config),
            Duration::from_millis(5)
        );
    }

    #[test]
    fn jitter_on_huge_delay_does_not_overflow() {
        assert_eq!(add_jitter(Duration::MAX), Duration::MAX);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let delay = Duration::from_millis(100);

        for _ in 0..20 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered <= delay * 2);
        }
    }

    #[test]
    fn task_error_classification() {
        assert!(TaskError::transient("timed out").is_retryable());
        assert!(!TaskError::NotFound { id: 1 }.is_retryable());
        assert!(
            !TaskError::AssetNotFound {
                hash: "abc".into()
            }
            .is_retryable()
        );
        assert!(
            !TaskError::MalformedResponse {
                id: 1,
                reason: "eof".into()
            }
            .is_retryable()
        );
        assert!(
            !TaskError::Write {
                path: "x".into(),
                source: std::io::Error::other("disk full"),
            }
            .is_retryable()
        );
        assert!(
            !TaskError::RetriesExhausted {
                attempts: 3,
                last: Box::new(TaskError::transient("x")),
            }
            .is_retryable()
        );
    }

    #[test]
    fn exhausted_converts_into_tagged_task_error() {
        let err: TaskError = RetryError::Exhausted {
            attempts: 4,
            last: TaskError::transient("503"),
        }
        .into();
        match err {
            TaskError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(matches!(*last, TaskError::Transient { .. }));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }

        let err: TaskError = RetryError::Permanent(TaskError::NotFound { id: 3 }).into();
        assert!(matches!(err, TaskError::NotFound { id: 3 }));
    }

    #[test]
    fn run_error_classification() {
        assert!(Error::Task(TaskError::transient("reset")).is_retryable());
        assert!(!Error::InvalidRange { start: 2, end: 1 }.is_retryable());
        assert!(
            Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "slow")).is_retryable()
        );
        assert!(!Error::AlreadyRunning.is_retryable());
    }
}
