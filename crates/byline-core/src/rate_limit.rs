//! Per-domain request pacing.
//!
//! The limiter is acquired at dispatch time — before a worker is chosen —
//! so N workers arriving simultaneously for one publisher cannot race past
//! the minimum inter-request delay. Each `acquire` reserves the domain's
//! next free slot under the lock (O(1) critical section) and then sleeps
//! outside it, which makes acquisitions per domain FIFO in reservation
//! order while leaving other domains unblocked.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::AcquireConfig;

pub struct DomainRateLimiter {
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    /// Earliest instant at which the next request for a domain may go out.
    next_free: Mutex<HashMap<String, Instant>>,
}

impl DomainRateLimiter {
    pub fn new(delays: HashMap<String, Duration>, default_delay: Duration) -> Self {
        Self {
            delays,
            default_delay,
            next_free: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &AcquireConfig) -> Self {
        Self::new(
            config.per_domain_delays.clone(),
            config.default_domain_delay,
        )
    }

    /// Minimum inter-request delay for a domain.
    pub fn delay_for(&self, domain: &str) -> Duration {
        self.delays
            .get(domain)
            .copied()
            .unwrap_or(self.default_delay)
    }

    /// Block the calling task until the domain's next free slot, then
    /// advance the slot by the domain's delay.
    pub async fn acquire(&self, domain: &str) {
        let slot = {
            let mut map = self.next_free.lock().await;
            let now = Instant::now();
            let slot = match map.get(domain) {
                Some(&at) if at > now => at,
                _ => now,
            };
            map.insert(domain.to_string(), slot + self.delay_for(domain));
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter_ms(domain: &str, ms: u64) -> DomainRateLimiter {
        let mut delays = HashMap::new();
        delays.insert(domain.to_string(), Duration::from_millis(ms));
        DomainRateLimiter::new(delays, Duration::from_millis(ms))
    }

    #[test]
    fn delay_table_with_default() {
        let limiter = limiter_ms("apnews.com", 100);
        assert_eq!(limiter.delay_for("apnews.com"), Duration::from_millis(100));
        assert_eq!(limiter.delay_for("unknown.com"), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn spaces_requests_on_same_domain() {
        let limiter = limiter_ms("example.com", 100);
        let start = Instant::now();
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;
        limiter.acquire("example.com").await;
        assert!(
            start.elapsed() >= Duration::from_millis(200),
            "three acquisitions must span at least two delays, elapsed {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn domains_do_not_block_each_other() {
        let limiter = limiter_ms("slow.com", 300);
        let start = Instant::now();
        limiter.acquire("slow.com").await;
        limiter.acquire("other.com").await;
        assert!(
            start.elapsed() < Duration::from_millis(200),
            "different domains must not serialize, elapsed {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn concurrent_acquirers_are_spaced() {
        let limiter = Arc::new(limiter_ms("example.com", 100));
        let start = Instant::now();
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire("example.com").await })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        // Five acquisitions, four gaps — wall clock regardless of task count.
        assert!(
            start.elapsed() >= Duration::from_millis(400),
            "elapsed {:?}",
            start.elapsed()
        );
    }
}
