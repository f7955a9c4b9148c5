/*!
 * # Outbound Request Pacing
 *
 * The marketplace API allows roughly two requests per second per account.
 * Reserved-amount workers issue one request per row. A [`Throttle`] spaces
 * consecutive request *starts* by at least `min_interval`, and every lane of
 * every worker acquires the same [`SharedThrottle`], so the account-wide rate
 * stays at one request per `min_interval` whatever the pool width.
 *
 * ## Usage
 *
 * ```ignore
 * let pacing = Throttle::shared(Duration::from_millis(600));
 * for id in ids {
 *     pacing.lock().await.acquire().await;
 *     api.get_reserved_amount(id).await?;
 * }
 * ```
 */
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Minimum spacing the marketplace tolerates between two requests of one account.
pub const MIN_SAFE_INTERVAL: Duration = Duration::from_millis(500);

/// Pacing gate shared by concurrent lanes. The lock is held while sleeping,
/// so waiting lanes start one at a time.
pub type SharedThrottle = Arc<Mutex<Throttle>>;

/// Pacing state.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last_start: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_start: None,
        }
    }

    pub fn shared(min_interval: Duration) -> SharedThrottle {
        Arc::new(Mutex::new(Self::new(min_interval)))
    }

    /// Waits until the lane may start its next request and records the start.
    /// The first call never sleeps.
    pub async fn acquire(&mut self) {
        if let Some(last) = self.last_start {
            let ready_at = last + self.min_interval;
            if Instant::now() < ready_at {
                sleep_until(ready_at).await;
            }
        }
        self.last_start = Some(Instant::now());
    }
}
