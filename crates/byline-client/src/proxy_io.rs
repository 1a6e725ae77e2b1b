//! Proxy source and validator adapters.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;

use byline_core::models::{ProxyEndpoint, ProxyProtocol};
use byline_core::traits::{ProxySource, ProxyValidator};
use byline_core::AcquireError;

/// Loads proxy endpoints from a flat file, one per line, either
/// `protocol://host:port` or bare `host:port` (assumed http). Blank lines
/// and `#` comments are ignored.
#[derive(Clone)]
pub struct FileProxySource {
    path: PathBuf,
}

impl FileProxySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProxySource for FileProxySource {
    async fn load(&self) -> Result<Vec<ProxyEndpoint>, AcquireError> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AcquireError::Config(format!("cannot read proxy list {}: {e}", self.path.display()))
        })?;

        let mut endpoints = Vec::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_proxy_line(line) {
                Some(endpoint) => endpoints.push(endpoint),
                None => tracing::warn!(line, "Skipping unparseable proxy line"),
            }
        }
        Ok(endpoints)
    }
}

fn parse_proxy_line(line: &str) -> Option<ProxyEndpoint> {
    let (protocol, rest) = match line.split_once("://") {
        Some((scheme, rest)) => (scheme.parse::<ProxyProtocol>().ok()?, rest),
        None => (ProxyProtocol::Http, line),
    };
    let (host, port) = rest.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    if host.is_empty() {
        return None;
    }
    Some(ProxyEndpoint::new(host, port, protocol))
}

/// Validates a proxy by issuing a HEAD request to an echo endpoint through
/// it. Non-200 responses and timeouts discard the proxy.
#[derive(Clone)]
pub struct ReqwestProxyValidator {
    echo_url: String,
    timeout: Duration,
}

impl ReqwestProxyValidator {
    pub fn new() -> Self {
        Self {
            echo_url: "https://api.ipify.org".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_echo_url(mut self, url: impl Into<String>) -> Self {
        self.echo_url = url.into();
        self
    }
}

impl Default for ReqwestProxyValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyValidator for ReqwestProxyValidator {
    async fn validate(&self, endpoint: &ProxyEndpoint) -> bool {
        let Ok(proxy) = reqwest::Proxy::all(endpoint.url()) else {
            return false;
        };
        let Ok(client) = Client::builder().proxy(proxy).timeout(self.timeout).build() else {
            return false;
        };
        match client.head(&self.echo_url).send().await {
            Ok(response) => response.status().as_u16() == 200,
            Err(e) => {
                tracing::debug!(proxy = %endpoint, error = %e, "Proxy validation failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_schemed_lines() {
        let bare = parse_proxy_line("10.0.0.1:8080").unwrap();
        assert_eq!(bare.protocol, ProxyProtocol::Http);
        assert_eq!(bare.port, 8080);

        let socks = parse_proxy_line("socks5://10.0.0.2:1080").unwrap();
        assert_eq!(socks.protocol, ProxyProtocol::Socks5);
        assert_eq!(socks.host, "10.0.0.2");
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(parse_proxy_line("not-a-proxy").is_none());
        assert!(parse_proxy_line("10.0.0.1:notaport").is_none());
        assert!(parse_proxy_line(":8080").is_none());
        assert!(parse_proxy_line("ftp://10.0.0.1:21").is_none());
    }
}
