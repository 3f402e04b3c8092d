//! Reconnect backoff policy

use std::time::Duration;

/// Default initial retry delay.
pub const DEFAULT_BASE: Duration = Duration::from_millis(500);
/// Default retry delay ceiling.
pub const DEFAULT_CAP: Duration = Duration::from_secs(5);

/// Exponential backoff: starts at `base`, doubles on each consecutive
/// failure, capped at `cap`. A successful open resets the next delay to
/// `base` via [`Backoff::reset`].
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            next: base,
        }
    }

    /// Delay to wait before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.cap);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.base;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE, DEFAULT_CAP)
    }
}
