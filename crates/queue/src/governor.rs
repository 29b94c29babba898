//! Dispatch-level throughput governor.
//!
//! Caps the rate at which the whole worker pool issues external-API calls,
//! independent of per-user admission limits, to stay under the platform's
//! global ceiling. Callers reserve the next free slot and sleep until it
//! arrives; nothing is ever rejected here, excess work simply waits its
//! turn in the priority queue.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Global pacing for outbound API calls.
pub struct DispatchGovernor {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl DispatchGovernor {
    /// Create a governor allowing `rate_per_sec` calls per second.
    #[must_use]
    pub fn new(rate_per_sec: u32) -> Self {
        let rate = rate_per_sec.max(1);
        Self {
            interval: Duration::from_secs(1) / rate,
            next_slot: Mutex::new(None),
        }
    }

    /// Reserve the next dispatch slot and wait until it arrives.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }

    /// Minimum gap between consecutive dispatches.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}
