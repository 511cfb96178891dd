//! Bounded retry with exponential backoff for outbound API calls.
//!
//! Every network operation in this crate is wrapped in [`with_retry`], which
//! retries transient failures (timeouts, 5xx, connection resets) with
//! jittered exponential backoff and gives up immediately on permanent ones.
//! API-side throttling (429) gets an additional cooldown on top of the
//! backoff so retries do not hammer the shared request budget.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Classification of errors into transient (worth retrying) and permanent
pub trait RetryableError {
    /// Whether the operation that produced this error may succeed on retry
    fn is_retryable(&self) -> bool;

    /// Whether this error indicates API-side throttling (HTTP 429)
    fn is_rate_limited(&self) -> bool;

    /// Short human-readable reason used in retry log lines
    fn retry_reason(&self) -> &str;
}

/// Retry policy for API requests
///
/// The retry counts and backoff constants are policy rather than
/// architecture, so they are all configurable with defaults of
/// 3 attempts, 1 second base delay, exponential growth capped at
/// 30 seconds, and jitter enabled.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single backoff delay
    pub max_delay: Duration,
    /// Randomize delays to avoid thundering-herd against the shared ceiling
    pub jitter: bool,
    /// Additional cooldown applied when the API reported throttling (429)
    pub rate_limit_cooldown: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
            rate_limit_cooldown: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// Backoff delay before retrying after the given failed attempt (1-based)
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base_delay.as_secs_f64() * 2f64.powi(exp as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());

        let factor = if self.jitter {
            // 50%..150% of the nominal delay
            rand::thread_rng().gen_range(0.5..1.5)
        } else {
            1.0
        };

        Duration::from_secs_f64(capped * factor)
    }
}

/// Run an async operation with bounded retries
///
/// Permanent errors are returned immediately; transient errors are retried
/// up to `config.max_attempts` times with exponential backoff. The last
/// error is returned once the attempts are exhausted.
pub async fn with_retry<T, E, F, Fut>(
    mut operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> std::result::Result<T, E>
where
    E: RetryableError + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let max_attempts = config.max_attempts.max(1);

    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                debug!(
                    operation = operation_name,
                    reason = err.retry_reason(),
                    "Permanent error, not retrying"
                );
                return Err(err);
            }
            Err(err) if attempt >= max_attempts => {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %err,
                    "Retries exhausted"
                );
                return Err(err);
            }
            Err(err) => {
                let mut delay = config.delay_for_attempt(attempt);
                if err.is_rate_limited() {
                    delay += config.rate_limit_cooldown;
                }
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    reason = err.retry_reason(),
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure, backing off before retry"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
