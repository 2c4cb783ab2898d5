//! Global rate limiting for extraction fetches.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep_until};

/// Interval-based limiter shared by all extraction tasks of one job.
///
/// Each `acquire` reserves the next free slot and sleeps until it arrives, so
/// message fetches against the data store never exceed the configured
/// throughput no matter how many chunks run in parallel.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    /// A limiter allowing `rate` acquisitions per minute. Zero disables
    /// limiting entirely.
    pub fn per_minute(rate: u32) -> Self {
        let interval = if rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(60.0 / f64::from(rate))
        };
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        let at = {
            let mut slot = self.next_slot.lock().await;
            let now = Instant::now();
            let at = if *slot > now { *slot } else { now };
            *slot = at + self.interval;
            at
        };
        sleep_until(at).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_rate_never_waits() {
        let limiter = RateLimiter::per_minute(0);
        let start = std::time::Instant::now();
        for _ in 0..1_000 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquisitions_are_spaced_by_interval() {
        let limiter = RateLimiter::per_minute(60); // one per second
        let start = Instant::now();

        limiter.acquire().await; // immediate
        limiter.acquire().await;
        limiter.acquire().await;

        assert_eq!(start.elapsed().as_secs(), 2);
    }
}
