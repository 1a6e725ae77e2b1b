use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use reqwest::header::USER_AGENT;
use reqwest::Client;

use byline_core::traits::{FetchResponse, Fetcher};
use byline_core::{AcquireConfig, AcquireError};

/// HTTP fetcher using reqwest.
///
/// One GET per call with a user-agent drawn round-robin from the
/// configured pool — rotated per request, not per session. Any HTTP status
/// is returned as a [`FetchResponse`] for the cascade to classify;
/// connection-level failures surface as errors. Body decoding honours the
/// response charset (reqwest's `text()` does the character-set inference).
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    user_agents: Arc<Vec<String>>,
    next_agent: Arc<AtomicUsize>,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(config: &AcquireConfig) -> Result<Self, AcquireError> {
        if config.user_agents.is_empty() {
            return Err(AcquireError::Config("user_agents must not be empty".into()));
        }
        let client = Client::builder()
            .timeout(config.fetch_timeout)
            .gzip(true)
            .build()
            .map_err(|e| AcquireError::Network(e.to_string()))?;

        Ok(Self {
            client,
            user_agents: Arc::new(config.user_agents.clone()),
            next_agent: Arc::new(AtomicUsize::new(0)),
            timeout_secs: config.fetch_timeout.as_secs(),
        })
    }

    fn next_user_agent(&self) -> &str {
        let index = self.next_agent.fetch_add(1, Ordering::Relaxed) % self.user_agents.len();
        &self.user_agents[index]
    }
}

impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, AcquireError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, self.next_user_agent())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AcquireError::Timeout(self.timeout_secs)
                } else if e.is_connect() {
                    AcquireError::Network(format!("Connection failed: {e}"))
                } else {
                    AcquireError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let bot_header = response.headers().contains_key("cf-ray")
            || response.headers().contains_key("cf-mitigated");

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AcquireError::Timeout(self.timeout_secs)
            } else {
                AcquireError::Network(format!("Failed to read response body: {e}"))
            }
        })?;

        Ok(FetchResponse {
            status,
            body,
            bot_header,
        })
    }
}
