use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Randomized minimum spacing between successive calls.
///
/// Each `pace()` reserves the next slot under the lock and sleeps after
/// releasing it, so concurrent callers queue up instead of firing together.
#[derive(Debug)]
pub struct Pacer {
    min: Duration,
    max: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            next_slot: Mutex::new(None),
        }
    }

    pub fn from_millis(min_ms: u64, max_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_ms), Duration::from_millis(max_ms))
    }

    /// No spacing at all.
    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    fn gap(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min_ms = self.min.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
    }

    /// Wait until this caller's slot. The first call returns immediately.
    pub async fn pace(&self) {
        let wait_until = {
            let gap = self.gap();
            let now = Instant::now();
            let mut next = self
                .next_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let slot = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(slot + gap);
            slot
        };
        tokio::time::sleep_until(wait_until).await;
    }
}
