//! Heartbeat scheduling and acknowledgment tracking.
//!
//! One scheduler lives inside each transport loop and is dropped with it, so
//! a closed transport never fires another heartbeat. The first heartbeat goes
//! out after `interval * r` with `r` uniform in `[0, 1)` so that sessions
//! reconnecting together do not heartbeat together.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

/// What the connection must do when the timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a heartbeat with the current sequence
    Send,
    /// The previous heartbeat was never acknowledged; the connection is dead
    Zombie,
}

/// Per-transport heartbeat timer
#[derive(Debug)]
pub struct HeartbeatScheduler {
    interval: Duration,
    next_fire: Instant,
    ack_pending: bool,
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
    latency: Option<Duration>,
}

impl HeartbeatScheduler {
    /// Start a scheduler with a random first-fire offset
    pub fn new(interval: Duration) -> Self {
        let jitter: f64 = rand::thread_rng().gen();
        Self::with_jitter(interval, jitter)
    }

    /// Start a scheduler whose first fire is `interval * jitter` from now
    pub fn with_jitter(interval: Duration, jitter: f64) -> Self {
        let first = interval.mul_f64(jitter.clamp(0.0, 1.0));
        Self {
            interval,
            next_fire: Instant::now() + first,
            ack_pending: false,
            last_sent: None,
            last_ack: None,
            latency: None,
        }
    }

    /// Interval dictated by Hello
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// When the timer fires next
    pub fn deadline(&self) -> Instant {
        self.next_fire
    }

    /// Whether a heartbeat is waiting for its acknowledgment
    pub fn ack_pending(&self) -> bool {
        self.ack_pending
    }

    /// Time of the last acknowledgment
    pub fn last_ack(&self) -> Option<Instant> {
        self.last_ack
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Sleep until the next fire
    pub async fn wait(&self) {
        tokio::time::sleep_until(self.next_fire).await;
    }

    /// Timer fired: decide what to do and arm the next fire
    pub fn fire(&mut self) -> HeartbeatAction {
        let now = Instant::now();
        self.next_fire = now + self.interval;

        if self.ack_pending {
            return HeartbeatAction::Zombie;
        }
        self.ack_pending = true;
        self.last_sent = Some(now);
        HeartbeatAction::Send
    }

    /// HeartbeatAck received
    pub fn acknowledge(&mut self) {
        let now = Instant::now();
        if self.ack_pending {
            self.latency = self.last_sent.map(|sent| now.duration_since(sent));
        }
        self.ack_pending = false;
        self.last_ack = Some(now);
    }
}
