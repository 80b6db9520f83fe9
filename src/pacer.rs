//! Per-worker request spacing
//!
//! Each worker owns one [`RequestPacer`]. Every outbound request (metadata or
//! texture, first attempt or retry) first calls [`RequestPacer::acquire`], which
//! guarantees at least `interval` between the starts of two consecutive
//! requests from that worker.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum-interval gate for one worker's outbound requests
///
/// # Examples
///
/// ```
/// use skin_dl::pacer::RequestPacer;
/// use std::time::Duration;
///
/// # async fn example() {
/// let pacer = RequestPacer::new(Duration::from_millis(500));
/// pacer.acquire().await; // returns immediately
/// pacer.acquire().await; // waits ~500ms
/// # }
/// ```
#[derive(Debug)]
pub struct RequestPacer {
    interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RequestPacer {
    /// Create a pacer; a zero interval disables spacing
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: Mutex::new(None),
        }
    }

    /// The configured spacing
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until a request may be issued, then mark it as issued
    ///
    /// The lock is held across the sleep so concurrent callers on the same
    /// pacer are serialized and each gets its own slot.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
