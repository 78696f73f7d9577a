//! Minimum-interval gate for outbound calls
//!
//! One instance is injected into each client that needs it. Share an
//! `Arc<RateLimiter>` between clients to make them pace each other.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait if necessary so that two calls are at least `min_interval` apart
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_rate_limiter_timing() {
        let limiter = RateLimiter::new(Duration::from_millis(200));

        let start = Instant::now();
        limiter.wait().await;
        let first_elapsed = start.elapsed();
        limiter.wait().await;
        let second_elapsed = start.elapsed();
        limiter.wait().await;
        let third_elapsed = start.elapsed();

        assert!(first_elapsed < Duration::from_millis(100));
        assert!(second_elapsed >= Duration::from_millis(180));
        assert!(third_elapsed >= Duration::from_millis(380));
    }

    #[tokio::test]
    async fn test_shared_gate_paces_both_holders() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(150)));
        let other = Arc::clone(&limiter);

        let start = Instant::now();
        limiter.wait().await;
        other.wait().await;

        assert!(start.elapsed() >= Duration::from_millis(130));
    }

    #[tokio::test]
    async fn test_zero_interval_never_sleeps() {
        let limiter = RateLimiter::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
