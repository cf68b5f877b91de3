//! Retry logic with exponential backoff
//!
//! Provides bounded retry behavior for transient tool failures.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempt ceiling, first call included
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add up to 25% jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum attempts
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the retry that follows attempt `attempt` (1-based)
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let delay_ms = base_delay.min(self.max_delay.as_millis() as f64) as u64;

        let final_delay = if self.jitter {
            delay_ms + rand_jitter(delay_ms / 4)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }
}

/// Time-seeded jitter
fn rand_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    nanos % max
}

/// Successful value plus the number of attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    /// The value
    pub value: T,
    /// Attempts made, first call included
    pub attempts: u32,
}

/// Error type for retry operations
#[derive(Debug)]
pub struct RetryError<E> {
    /// The last error encountered
    pub last_error: E,
    /// Total number of attempts made
    pub attempts: u32,
    /// Whether the last error was still retryable (the ceiling was hit)
    pub exhausted: bool,
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "operation failed after {} attempt(s): {}",
            self.attempts, self.last_error
        )
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for RetryError<E> {}

/// Execute an async operation with retry logic
///
/// Non-retryable errors return immediately. Retryable errors are retried
/// until `max_attempts` calls have been made.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    config: &RetryConfig,
    mut operation: F,
    is_retryable: R,
) -> Result<Attempted<T>, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Debug,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(Attempted {
                    value,
                    attempts: attempt,
                });
            }
            Err(e) => {
                let retryable = is_retryable(&e);
                if !retryable || attempt >= max_attempts {
                    debug!(attempt, retryable, error = ?e, "Operation failed, no more retries");
                    return Err(RetryError {
                        last_error: e,
                        attempts: attempt,
                        exhausted: retryable,
                    });
                }

                let delay = config.delay_after(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = ?e,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
