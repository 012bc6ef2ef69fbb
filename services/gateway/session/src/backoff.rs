//! Reconnect backoff.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;

/// Exponential backoff with full jitter on the upper half of each step
#[derive(Debug, Clone)]
pub struct Backoff {
    floor: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at the floor
    pub fn new(config: BackoffConfig) -> Self {
        let floor = config.floor.min(config.cap);
        Self {
            floor,
            cap: config.cap,
            current: floor,
        }
    }

    /// Current (un-jittered) delay
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Delay to wait now; doubles the next one up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.cap);

        // [base/2, base]
        let half = base / 2;
        let jitter = if half.is_zero() {
            Duration::ZERO
        } else {
            rand::thread_rng().gen_range(Duration::ZERO..=half)
        };
        half + jitter
    }

    /// Back to the floor after a successful handshake
    pub fn reset(&mut self) {
        self.current = self.floor;
    }
}
