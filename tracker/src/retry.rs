//! Bounded retry with exponential backoff for optimistic-concurrency
//! conflicts.
//!
//! Progress writes are revision-checked: two updates racing on the same
//! `(user, target)` key make the loser's upsert fail with a retryable store
//! error. The loser re-reads and re-applies; a short exponential backoff
//! keeps hot keys from thrashing.

use std::time::Duration;
use tokio::time::sleep;

/// Retry policy for read-modify-write loops.
///
/// # Defaults
///
/// - `max_retries`: 3 (so 4 attempts total)
/// - `initial_delay`: 25ms
/// - `max_delay`: 2 seconds
/// - `multiplier`: 2.0
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the backoff delay.
    pub max_delay: Duration,
    /// Backoff multiplier per attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Set the maximum number of retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the cap on the backoff delay.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay for a given attempt number (0-indexed).
    ///
    /// `delay = min(initial_delay * multiplier^attempt, max_delay)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        // Intentional casts: delays are small and the result is capped, so
        // precision loss cannot materially change the wait.
        #[allow(clippy::cast_precision_loss)]
        #[allow(clippy::cast_possible_truncation)]
        #[allow(clippy::cast_sign_loss)]
        #[allow(clippy::cast_possible_wrap)]
        let delay = {
            let millis =
                self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
            Duration::from_millis(millis as u64)
        };

        delay.min(self.max_delay)
    }
}

/// Retry an async operation while its error satisfies `is_retryable`.
///
/// Non-retryable errors fail immediately. Retryable ones are retried up to
/// `policy.max_retries` times with backoff, then the last error is returned.
///
/// # Errors
///
/// The operation's first non-retryable error, or its last error once the
/// retry budget is spent.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::debug!(attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }
                if attempt >= policy.max_retries {
                    tracing::error!(attempt, error = %err, "operation failed after max retries");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt,
                    delay = ?delay,
                    error = %err,
                    "retryable conflict, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
