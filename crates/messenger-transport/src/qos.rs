//! QoS: fixed-interval send pacing for image packets.
//!
//! One permit per interval, shared by every packet task of a transfer.
//! A caller that arrives while the limiter is idle goes immediately;
//! callers that arrive together are spaced `interval` apart in arrival
//! order. Zero interval = unlimited (never throttled).

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    /// Earliest instant the next permit may be handed out.
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait for the next send permit.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }

        // Reserve a slot under the lock, sleep outside it.
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}
