//! Bounded waits and retries
//!
//! Every request that leaves the core (native UI, signaling) is bounded by
//! [`with_timeout`]. The initial signaling handshake additionally retries
//! transient failures with [`retry_with_backoff`].

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::{ActionError, SignalingError};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add ±10% jitter to delays
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// A single attempt
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            use_jitter: false,
            ..Self::default()
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Errors that may go away when the operation is repeated
pub trait Recoverable {
    fn is_recoverable(&self) -> bool;
}

impl Recoverable for SignalingError {
    fn is_recoverable(&self) -> bool {
        matches!(self, SignalingError::Connection(_))
    }
}

/// Retry an operation with exponential backoff.
///
/// Only errors reporting [`Recoverable::is_recoverable`] are retried; the
/// last error is returned once attempts run out.
pub async fn retry_with_backoff<T, E, F, Fut>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    E: Recoverable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    let mut delay = config.initial_delay();

    loop {
        attempt += 1;
        debug!(
            operation = operation_name,
            attempt, max_attempts, "Attempting operation"
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt, "Operation succeeded after retries"
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_recoverable() && attempt < max_attempts => {
                warn!(
                    operation = operation_name,
                    attempt,
                    error = %e,
                    next_delay_ms = delay.as_millis() as u64,
                    "Recoverable error, will retry"
                );

                let actual_delay = if config.use_jitter {
                    let jitter = (rand::random::<f64>() - 0.5) * 0.2;
                    let millis = delay.as_millis() as f64;
                    Duration::from_millis((millis * (1.0 + jitter)) as u64)
                } else {
                    delay
                };
                sleep(actual_delay).await;

                let next_delay_ms = (delay.as_millis() as f64 * config.backoff_multiplier) as u64;
                delay = Duration::from_millis(next_delay_ms).min(config.max_delay());
            }
            Err(e) => {
                if attempt >= max_attempts {
                    error!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %e,
                        "Operation failed after all retry attempts"
                    );
                } else {
                    error!(
                        operation = operation_name,
                        error = %e,
                        "Non-recoverable error, not retrying"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Bound a future by `timeout`.
///
/// The future's own output is passed through untouched; only the elapsed
/// case is turned into [`ActionError::Timeout`].
pub async fn with_timeout<T, F>(
    operation_name: &str,
    timeout: Duration,
    future: F,
) -> Result<T, ActionError>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => Ok(result),
        Err(_) => {
            error!(
                operation = operation_name,
                timeout_ms = timeout.as_millis() as u64,
                "Operation timed out"
            );
            Err(ActionError::timeout(operation_name, timeout))
        }
    }
}
