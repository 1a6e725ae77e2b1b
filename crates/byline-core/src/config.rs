use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Built-in pool of real browser user-agent strings, rotated per request.
const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.2478.97",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
    "Mozilla/5.0 (Windows NT 10.0; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:126.0) Gecko/20100101 Firefox/126.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64; rv:127.0) Gecko/20100101 Firefox/127.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (iPad; CPU OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Mobile Safari/537.36",
];

/// Default per-domain minimum inter-request delays, in milliseconds.
const DEFAULT_DOMAIN_DELAYS: &[(&str, u64)] = &[
    ("apnews.com", 1_500),
    ("reuters.com", 2_000),
    ("nytimes.com", 4_000),
    ("washingtonpost.com", 4_000),
    ("wsj.com", 6_000),
];

/// Tunables for a whole acquisition run.
///
/// Defaults match production operation; tests override the timing knobs
/// with `with_*` builders.
#[derive(Debug, Clone)]
pub struct AcquireConfig {
    /// Parallelism of the primary worker pool.
    pub worker_count: usize,
    /// Rows claimed from the store per scheduling round.
    pub claim_batch: usize,
    /// Acceptance floor for validated article text, in characters.
    pub min_text_length: usize,
    /// Lower floor at which an extractor's output is considered a
    /// candidate for validation at all.
    pub extractor_floor: usize,
    /// Domains eligible for the headless-browser fallback.
    pub paywall_domains: HashSet<String>,
    /// Per-domain minimum inter-request delay overrides.
    pub per_domain_delays: HashMap<String, Duration>,
    /// Delay applied to domains without an override.
    pub default_domain_delay: Duration,
    /// Rotating user-agent pool.
    pub user_agents: Vec<String>,
    /// Fetch attempts per URL, including the first.
    pub max_attempts: u32,
    /// Unit of the retry backoff schedule (`base * 2^attempt + jitter`).
    pub retry_base: Duration,
    /// Per-request HTTP timeout.
    pub fetch_timeout: Duration,
    /// Per-request browser-rendering timeout.
    pub browser_timeout: Duration,
    /// How long in-flight workers may keep running after a shutdown signal.
    pub grace_shutdown: Duration,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            worker_count: 20,
            claim_batch: 32,
            min_text_length: 300,
            extractor_floor: 150,
            paywall_domains: ["nytimes.com", "washingtonpost.com", "wsj.com"]
                .into_iter()
                .map(String::from)
                .collect(),
            per_domain_delays: DEFAULT_DOMAIN_DELAYS
                .iter()
                .map(|(d, ms)| (d.to_string(), Duration::from_millis(*ms)))
                .collect(),
            default_domain_delay: Duration::from_secs(3),
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            max_attempts: 3,
            retry_base: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(15),
            browser_timeout: Duration::from_secs(30),
            grace_shutdown: Duration::from_secs(30),
        }
    }
}

impl AcquireConfig {
    pub fn with_worker_count(mut self, n: usize) -> Self {
        self.worker_count = n.max(1);
        self
    }

    pub fn with_claim_batch(mut self, n: usize) -> Self {
        self.claim_batch = n.max(1);
        self
    }

    pub fn with_min_text_length(mut self, n: usize) -> Self {
        self.min_text_length = n;
        self
    }

    pub fn with_paywall_domains<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paywall_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_domain_delay(mut self, domain: impl Into<String>, delay: Duration) -> Self {
        self.per_domain_delays.insert(domain.into(), delay);
        self
    }

    pub fn with_per_domain_delays(mut self, delays: HashMap<String, Duration>) -> Self {
        self.per_domain_delays = delays;
        self
    }

    pub fn with_default_domain_delay(mut self, delay: Duration) -> Self {
        self.default_domain_delay = delay;
        self
    }

    pub fn with_user_agents(mut self, agents: Vec<String>) -> Self {
        self.user_agents = agents;
        self
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn with_fetch_timeout(mut self, t: Duration) -> Self {
        self.fetch_timeout = t;
        self
    }

    pub fn with_grace_shutdown(mut self, t: Duration) -> Self {
        self.grace_shutdown = t;
        self
    }

    /// Upper bound on dispatch tasks queued ahead of the worker pool.
    pub fn max_in_flight(&self) -> usize {
        self.worker_count * 2
    }

    /// True when `domain` is eligible for the browser fallback.
    pub fn is_paywall_domain(&self, domain: &str) -> bool {
        self.paywall_domains.contains(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_operating_values() {
        let config = AcquireConfig::default();
        assert_eq!(config.worker_count, 20);
        assert_eq!(config.min_text_length, 300);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.fetch_timeout, Duration::from_secs(15));
        assert_eq!(config.grace_shutdown, Duration::from_secs(30));
        assert!(config.user_agents.len() >= 15);
        assert!(config.is_paywall_domain("wsj.com"));
        assert!(!config.is_paywall_domain("apnews.com"));
        assert_eq!(
            config.per_domain_delays.get("wsj.com"),
            Some(&Duration::from_secs(6))
        );
    }

    #[test]
    fn builders_override() {
        let config = AcquireConfig::default()
            .with_worker_count(2)
            .with_paywall_domains(["example.com"])
            .with_domain_delay("example.com", Duration::from_millis(50));
        assert_eq!(config.worker_count, 2);
        assert!(config.is_paywall_domain("example.com"));
        assert!(!config.is_paywall_domain("wsj.com"));
    }
}
