//! Retry backoff for transient fetch failures.
//!
//! Delay schedule: `base * 2^attempt + uniform(0, base)`, where `attempt`
//! is 1-indexed and `base` is one second in production. The jitter avoids
//! synchronized retry bursts across workers.

use std::time::Duration;

/// Delay before retry number `attempt` (1-indexed).
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    let exp = 2u32.saturating_pow(attempt);
    base * exp + Duration::from_millis(jitter_ms(base.as_millis().max(1) as u64))
}

// Deterministic jitter based on std — avoids pulling in the `rand` crate.
// Uses a simple xorshift seeded from the current time.
pub(crate) fn jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_exponential_with_bounded_jitter() {
        let base = Duration::from_secs(1);
        for attempt in 1..=3 {
            let floor = base * 2u32.pow(attempt);
            for _ in 0..50 {
                let d = retry_delay(attempt, base);
                assert!(d >= floor, "attempt {attempt}: {d:?} below base");
                assert!(
                    d < floor + base,
                    "attempt {attempt}: {d:?} exceeds jitter bound"
                );
            }
        }
    }

    #[test]
    fn jitter_is_bounded() {
        for _ in 0..100 {
            assert!(jitter_ms(250) < 250);
        }
        assert_eq!(jitter_ms(0), 0);
    }
}
