// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded retry with exponential backoff for tier calls.
//!
//! Every statement the tracker issues is idempotent (greatest-of upserts,
//! do-nothing version inserts, plain cache sets), so a retried call cannot
//! double-apply. Retries are always bounded: once they run out the error
//! surfaces and the flush cycle drops its batch. Backends pass a predicate
//! to [`retry_if`] so errors that would repeat (bad SQL, wrong types) come
//! back on the first attempt.
//!
//! # Example
//!
//! ```
//! use presence_tracker::RetryConfig;
//!
//! // Startup: a handful of attempts so bad config fails fast
//! assert_eq!(RetryConfig::startup().max_attempts, 5);
//!
//! // Query: quick retry, then give the error back
//! assert_eq!(RetryConfig::query().max_attempts, 3);
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts including the first. Zero behaves like one.
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Initial connection to a backend. Five attempts, roughly three seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// A single statement or cache round trip inside a flush or read.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            factor: 2.0,
        }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay before the attempt following `delay`.
    fn next_delay(&self, delay: Duration) -> Duration {
        delay.mul_f64(self.factor).min(self.max_delay)
    }
}

/// Retry every error until attempts run out.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_if(operation_name, config, |_| true, operation).await
}

/// Retry only errors `is_transient` accepts; anything else is returned
/// on the spot.
pub async fn retry_if<F, Fut, T, E, P>(
    operation_name: &str,
    config: &RetryConfig,
    is_transient: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(val) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(val);
            }
            Err(err) => err,
        };

        if !is_transient(&err) {
            debug!(operation = operation_name, error = %err, "Permanent failure, not retrying");
            return Err(err);
        }
        if attempt >= max_attempts {
            return Err(err);
        }

        warn!(
            operation = operation_name,
            attempt,
            max_attempts,
            error = %err,
            retry_in = ?delay,
            "Operation failed, retrying"
        );
        sleep(delay).await;
        delay = config.next_delay(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::traits::StorageError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fail(msg: &str) -> StorageError {
        StorageError::Backend(msg.to_string())
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_try() {
        let result: Result<i32, StorageError> =
            retry("test_op", &RetryConfig::test(), || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));

        let result: Result<i32, StorageError> = retry("test_op", &RetryConfig::test(), || {
            let a = attempts.clone();
            async move {
                let count = a.fetch_add(1, Ordering::SeqCst) + 1;
                if count < 3 {
                    Err(fail(&format!("fail {}", count)))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));

        let result: Result<i32, StorageError> = retry("test_op", &RetryConfig::test(), || {
            let a = attempts.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(fail("always fail"))
            }
        })
        .await;

        assert!(matches!(result, Err(StorageError::Backend(ref m)) if m == "always fail"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let config = RetryConfig { max_attempts: 0, ..RetryConfig::test() };

        let result: Result<(), StorageError> = retry("test_op", &config, || {
            let a = attempts.clone();
            async move {
                a.fetch_add(1, Ordering::SeqCst);
                Err(fail("nope"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));

        let result: Result<(), StorageError> = retry_if(
            "test_op",
            &RetryConfig::test(),
            |e: &StorageError| matches!(e, StorageError::Backend(_)),
            || {
                let a = attempts.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                    Err(StorageError::Decode { key: "k".into(), reason: "bad bytes".into() })
                }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            factor: 2.0,
            max_attempts: 5,
        };

        let second = config.next_delay(config.initial_delay);
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(config.next_delay(second), Duration::from_millis(300));
    }

    #[test]
    fn test_presets() {
        assert_eq!(RetryConfig::startup().max_attempts, 5);
        assert_eq!(RetryConfig::query().max_attempts, 3);
        assert_eq!(RetryConfig::default().max_attempts, 3);
    }
}
