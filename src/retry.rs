//! Retry utilities with multiplicative backoff.
//!
//! A general-purpose retry combinator for operations that fail transiently
//! when driving external tools (docker daemon races, kind networking hiccups).
//! Only failures whose [`ErrorKind`] appears in the policy's retry set are
//! re-attempted; everything else propagates on first occurrence.
//!
//! # Example
//!
//! ```ignore
//! use kindling::retry::{retry_with_backoff, RetryPolicy};
//!
//! let result = retry_with_backoff(&policy, "create cluster", || async {
//!     manager.create_once().await
//! }).await?;
//! ```

use std::time::Duration;

use tracing::{error, warn};

use crate::{ErrorKind, Result};

/// Configuration for operations that may fail transiently.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub backoff_multiplier: f64,
    /// Failure kinds worth another attempt
    pub retry_on: &'static [ErrorKind],
}

/// Execute an operation, retrying the declared failure kinds with
/// multiplicative backoff.
///
/// Attempt 1 runs immediately. A retryable failure sleeps
/// `initial_delay * backoff_multiplier^(n-1)` before attempt `n+1`. After
/// `max_attempts` failures the final error is returned unmodified. A failure
/// whose kind is not in `retry_on` propagates without consuming further
/// attempts.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut delay = policy.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if policy.retry_on.contains(&err.kind()) && attempt < policy.max_attempts => {
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %err,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(delay.as_secs_f64() * policy.backoff_multiplier);
            }
            Err(err) => {
                error!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %err,
                    "operation failed"
                );
                return Err(err);
            }
        }
    }
}
