use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, instrument};

use crate::error::{CrawlerError, Result};

/// Rate limiter enforcing a rolling-window ceiling, shared by every
/// outbound request
///
/// NCBI E-utilities rate limits:
/// - 3 requests per second without an API key
/// - 10 requests per second with an API key
/// - Violations can result in IP blocking
///
/// The limiter keeps the grant instants of the most recent requests and
/// admits a new one only when fewer than the ceiling fall inside the
/// rolling window, so no window ever sees more requests than the
/// configured rate, including at cold start. All network-issuing
/// components hold a clone of the same limiter, so the window is the
/// single throughput gate for search, resolution, and download traffic.
/// The tokio mutex hands the window to waiters in FIFO order, so grants
/// go out in arrival order under contention.
#[derive(Clone)]
pub struct RateLimiter {
    window: Arc<Mutex<GrantWindow>>,
    rate: f64,
}

/// Grant instants still inside the rolling window
struct GrantWindow {
    grants: VecDeque<Instant>,
    /// Maximum grants per window span
    limit: usize,
    span: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter with the specified rate
    ///
    /// # Arguments
    ///
    /// * `rate` - Maximum requests per second (e.g., 3.0 for NCBI without API key)
    ///
    /// # Errors
    ///
    /// Returns `CrawlerError::InvalidConfig` if `rate` is zero or negative,
    /// since a zero ceiling would make every `acquire()` block forever.
    pub fn new(rate: f64) -> Result<Self> {
        if !(rate > 0.0) {
            return Err(CrawlerError::InvalidConfig(format!(
                "rate ceiling must be positive, got {rate}"
            )));
        }

        // Sub-1 rates stretch the window instead: one request per 1/rate
        // seconds. Fractional parts above 1 round down, which stays under
        // the ceiling.
        let (limit, span) = if rate >= 1.0 {
            (rate.floor() as usize, Duration::from_secs(1))
        } else {
            (1, Duration::from_secs_f64(1.0 / rate))
        };

        Ok(Self {
            window: Arc::new(Mutex::new(GrantWindow {
                grants: VecDeque::with_capacity(limit),
                limit,
                span,
            })),
            rate,
        })
    }

    /// Rate limiter for the NCBI tier without an API key (3 requests/second)
    pub fn without_api_key() -> Self {
        Self::new(3.0).expect("default rate is valid")
    }

    /// Rate limiter for the NCBI tier with an API key (10 requests/second)
    pub fn with_api_key() -> Self {
        Self::new(10.0).expect("default rate is valid")
    }

    /// Acquire a request slot, waiting as long as necessary
    ///
    /// Blocks the calling task until issuing a request would not put the
    /// rolling window over the configured ceiling, then returns. There is
    /// no error path.
    #[instrument(skip(self))]
    pub async fn acquire(&self) {
        loop {
            let wait_time = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                window.prune(now);

                if window.grants.len() < window.limit {
                    window.grants.push_back(now);
                    debug!(in_window = window.grants.len(), "Request slot granted");
                    return;
                }

                // The window is full; a slot frees when the oldest grant
                // rolls out of it.
                match window.grants.front() {
                    Some(&oldest) => (oldest + window.span).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!(
                wait_duration_ms = wait_time.as_millis() as u64,
                "Ceiling reached, waiting for the window to roll"
            );
            sleep(wait_time.max(Duration::from_millis(1))).await;
        }
    }

    /// Check if a request slot is available without blocking
    ///
    /// Returns `true` if a slot could be acquired immediately.
    /// This method does not consume a slot.
    pub async fn check_available(&self) -> bool {
        let mut window = self.window.lock().await;
        window.prune(Instant::now());
        window.grants.len() < window.limit
    }

    /// Number of slots currently free in the window (for testing and
    /// monitoring)
    pub async fn available_slots(&self) -> usize {
        let mut window = self.window.lock().await;
        window.prune(Instant::now());
        window.limit - window.grants.len()
    }

    /// Get the configured rate limit (requests per second)
    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl GrantWindow {
    /// Drop grants that have rolled out of the window
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.grants.front() {
            if now.duration_since(oldest) >= self.span {
                self.grants.pop_front();
            } else {
                break;
            }
        }
    }
}
