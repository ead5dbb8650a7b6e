//! Retry logic for external store calls
//!
//! Bounded exponential backoff for transient failures (network errors,
//! throttling, timeouts). Every attempt runs under its own timeout; an
//! elapsed timeout is itself a transient failure.

use hhl_common::config::RetryConfig;
use hhl_common::time::millis_to_duration;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// Errors that know whether another attempt might succeed
pub trait Retryable: Display {
    fn is_transient(&self) -> bool;

    /// Error reported when one attempt exceeds its timeout
    fn timed_out(operation: &str, after: Duration) -> Self;
}

impl Retryable for hhl_common::Error {
    fn is_transient(&self) -> bool {
        hhl_common::Error::is_transient(self)
    }

    fn timed_out(operation: &str, after: Duration) -> Self {
        hhl_common::Error::TransientStore(format!(
            "{} timed out after {} ms",
            operation,
            after.as_millis()
        ))
    }
}

/// Retry budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: millis_to_duration(config.initial_backoff_ms),
            max_backoff: millis_to_duration(config.max_backoff_ms),
            attempt_timeout: millis_to_duration(config.timeout_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempt
/// budget runs out.
///
/// **Algorithm:**
/// 1. Run the operation under `policy.attempt_timeout`
/// 2. On success, return the result
/// 3. On a non-transient error, return it immediately
/// 4. On a transient error (or timeout):
///    a. attempts left: log WARN, sleep, double the backoff (capped), retry
///    b. budget spent: log ERROR, return the last error
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "read progress")
/// * `policy` - Attempt budget, backoff bounds and per-attempt timeout
/// * `operation` - Async closure performing one attempt
pub async fn retry_transient<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable,
{
    let start_time = Instant::now();
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying store operation");
        }

        let result = match tokio::time::timeout(policy.attempt_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(operation_name, policy.attempt_timeout)),
        };

        let err = match result {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis(),
                        "Store operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_transient() {
            return Err(err);
        }

        if attempt >= max_attempts {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = start_time.elapsed().as_millis(),
                error = %err,
                "Store operation failed: retry budget exhausted"
            );
            return Err(err);
        }

        let delay = backoff.min(policy.max_backoff);
        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms = delay.as_millis(),
            error = %err,
            "Transient store failure, will retry after backoff"
        );

        tokio::time::sleep(delay).await;
        backoff = (backoff * 2).min(policy.max_backoff);
    }
}
