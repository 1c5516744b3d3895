//! Retry with exponential backoff for external requests
//!
//! Membership proof requests are retried a bounded number of times before the
//! session gives up and ends with
//! [`GroupCallEndReason::ProofRejected`](crate::types::GroupCallEndReason::ProofRejected).

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::{GroupCallError, GroupCallResult};

/// Configuration for retry behavior
///
/// # Examples
///
/// ```rust
/// use rvoip_group_call_core::recovery::RetryConfig;
/// use std::time::Duration;
///
/// let config = RetryConfig::default();
/// assert_eq!(config.max_attempts, 3);
/// assert_eq!(config.initial_delay, Duration::from_millis(100));
///
/// let quick = RetryConfig::quick();
/// assert!(quick.max_attempts > config.max_attempts);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub backoff_multiplier: f64,
    /// Whether to add +/-10% jitter to delays
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Short delays, more attempts. Suited to proof refreshes on a live call.
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 1.5,
            use_jitter: true,
        }
    }

    /// Delay to wait after `delay`, before jitter. Saturates at `max_delay`.
    pub fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier)
            .map_or(self.max_delay, |next| next.min(self.max_delay))
    }

    /// `delay` with up to 10% added or removed when jitter is enabled.
    fn jittered(&self, delay: Duration) -> Duration {
        if !self.use_jitter {
            return delay;
        }
        let factor = 0.9 + rand::random::<f64>() * 0.2;
        Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(delay)
    }
}

/// Retry an operation with exponential backoff
///
/// Recoverable errors (see [`GroupCallError::is_recoverable`](crate::error::GroupCallError::is_recoverable))
/// are retried until `config.max_attempts` is reached. Non-recoverable errors
/// return immediately.
///
/// # Examples
///
/// ```rust
/// use rvoip_group_call_core::recovery::{retry_with_backoff, RetryConfig};
/// use rvoip_group_call_core::GroupCallError;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let attempts = AtomicU32::new(0);
/// let config = RetryConfig {
///     initial_delay: Duration::from_millis(1),
///     use_jitter: false,
///     ..RetryConfig::default()
/// };
///
/// let result = retry_with_backoff("fetch_proof", config, || async {
///     if attempts.fetch_add(1, Ordering::SeqCst) < 1 {
///         Err(GroupCallError::proof_unavailable("not yet"))
///     } else {
///         Ok(7)
///     }
/// })
/// .await;
///
/// assert_eq!(result, Ok(7));
/// assert_eq!(attempts.load(Ordering::SeqCst), 2);
/// # }
/// ```
pub async fn retry_with_backoff<T, F, Fut>(
    operation_name: &str,
    config: RetryConfig,
    mut operation: F,
) -> GroupCallResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GroupCallResult<T>>,
{
    let mut delay = config.initial_delay;

    for attempt in 1..=config.max_attempts.max(1) {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !error.is_recoverable() || attempt >= config.max_attempts {
            error!(
                operation = operation_name,
                attempt,
                error = %error,
                category = error.category(),
                "Giving up"
            );
            return Err(error);
        }

        let wait = config.jittered(delay);
        warn!(
            operation = operation_name,
            attempt,
            max_attempts = config.max_attempts,
            error = %error,
            category = error.category(),
            retry_in_ms = wait.as_millis() as u64,
            "Attempt failed, retrying"
        );
        sleep(wait).await;
        delay = config.next_delay(delay);
    }

    // The loop always returns on its last attempt.
    Err(GroupCallError::internal(format!("{} made no attempts", operation_name)))
}
