//! Outbound send throttling.
//!
//! The service allows a fixed number of sends per rolling window and
//! disconnects clients that exceed it, so every outbound payload (handshake,
//! heartbeat or application) takes a slot here first. The limiter keeps the
//! timestamps of the last `max_sends` sends; a new send waits until the oldest
//! one leaves the window. Waiters queue on a fair mutex, so they are served in
//! arrival order.

use crate::config::RateLimitConfig;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Rolling window send limiter for one session
#[derive(Debug)]
pub struct RateLimiter {
    max_sends: usize,
    window: Duration,
    sent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter for the given quota
    pub fn new(config: RateLimitConfig) -> Self {
        let max_sends = config.max_sends.max(1) as usize;
        Self {
            max_sends,
            window: config.window,
            sent: Mutex::new(VecDeque::with_capacity(max_sends)),
        }
    }

    /// Wait until a send is allowed and claim it, returning the claimed
    /// instant. Never fails; dropping the future gives up the place in line.
    pub async fn acquire(&self) -> Instant {
        let mut sent = self.sent.lock().await;
        loop {
            let now = Instant::now();
            while let Some(&oldest) = sent.front() {
                if now.duration_since(oldest) >= self.window {
                    sent.pop_front();
                } else {
                    break;
                }
            }

            if sent.len() < self.max_sends {
                sent.push_back(now);
                return now;
            }

            if let Some(&oldest) = sent.front() {
                let ready_at = oldest + self.window;
                debug!(
                    "Send quota of {} per {:?} exhausted, waiting {:?}",
                    self.max_sends,
                    self.window,
                    ready_at.saturating_duration_since(now)
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
    }

    /// Hand back a slot claimed by [`acquire`](Self::acquire) whose payload
    /// was never written.
    pub async fn release(&self, claimed: Instant) {
        let mut sent = self.sent.lock().await;
        if let Some(index) = sent.iter().position(|&at| at == claimed) {
            sent.remove(index);
        }
    }

    /// Sends that could go out right now without waiting
    pub async fn available(&self) -> usize {
        let sent = self.sent.lock().await;
        let now = Instant::now();
        let in_window = sent
            .iter()
            .filter(|&&at| now.duration_since(at) < self.window)
            .count();
        self.max_sends - in_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(max_sends: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig { max_sends, window })
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_within_quota_is_immediate() {
        let limiter = limiter(5, Duration::from_secs(60));
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.available().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_past_quota_waits_for_window() {
        let window = Duration::from_secs(60);
        let limiter = limiter(3, window);

        let mut stamps = Vec::new();
        for _ in 0..4 {
            limiter.acquire().await;
            stamps.push(Instant::now());
        }

        assert!(stamps[2].duration_since(stamps[0]) < window);
        assert!(stamps[3].duration_since(stamps[0]) >= window);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_window_exceeds_quota() {
        let window = Duration::from_secs(10);
        let limiter = limiter(4, window);

        let mut stamps = Vec::new();
        for i in 0..13 {
            limiter.acquire().await;
            stamps.push(Instant::now());
            if i % 3 == 0 {
                tokio::time::advance(Duration::from_millis(1700)).await;
            }
        }

        for (i, start) in stamps.iter().enumerate() {
            let in_window = stamps[i..]
                .iter()
                .filter(|&&at| at.duration_since(*start) < window)
                .count();
            assert!(in_window <= 4, "window starting at send {} holds {}", i, in_window);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waiters_share_quota() {
        let window = Duration::from_secs(1);
        let limiter = Arc::new(limiter(2, window));
        let start = Instant::now();

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            tasks.push(tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            }));
        }

        let mut stamps = Vec::new();
        for task in tasks {
            stamps.push(task.await.unwrap());
        }
        stamps.sort();

        assert!(stamps[1].duration_since(start) < window);
        assert!(stamps[2].duration_since(start) >= window);
        assert!(stamps[4].duration_since(start) >= window * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_recovers_after_window() {
        let window = Duration::from_secs(5);
        let limiter = limiter(2, window);
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(limiter.available().await, 0);

        tokio::time::advance(window).await;
        assert_eq!(limiter.available().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_released_slot_is_reusable() {
        let limiter = limiter(2, Duration::from_secs(60));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        let claimed = limiter.acquire().await;
        assert_eq!(limiter.available().await, 0);

        limiter.release(claimed).await;
        assert_eq!(limiter.available().await, 1);

        let start = Instant::now();
        limiter.acquire().await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        // One matching entry goes, the older send still counts
        limiter.release(claimed).await;
        assert_eq!(limiter.available().await, 1);
    }
}
