use thiserror::Error;

/// Application-wide error types for byline.
///
/// Workers never surface these to the orchestrator — the cascade translates
/// every error into a terminal [`crate::models::UrlOutcome`]. The variants
/// exist for the seams between components (fetchers, extractors, store,
/// browser pool), where `?` propagation is still the right tool.
#[derive(Error, Debug)]
pub enum AcquireError {
    /// Non-success HTTP status observed while fetching a page.
    #[error("HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// Network/connection error (DNS failure, reset, refused).
    #[error("Network error: {0}")]
    Network(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Body extraction failed.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Invalid configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// The browser pool could not serve the request.
    #[error("Browser unavailable: {0}")]
    BrowserUnavailable(String),

    /// No active proxy available for a context that requires one.
    #[error("Proxy pool exhausted")]
    ProxyExhausted,

    /// A channel to a background task was closed.
    #[error("Channel error: {0}")]
    Channel(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AcquireError {
    /// Returns true if this error is transient and worth retrying.
    ///
    /// Matches the taxonomy: connection-level failures, timeouts, HTTP 5xx
    /// and 429 retry; everything else is permanent for the current attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AcquireError::Network(_) | AcquireError::Timeout(_) => true,
            AcquireError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(AcquireError::Network("reset".into()).is_retryable());
        assert!(AcquireError::Timeout(15).is_retryable());
        assert!(AcquireError::Http {
            status: 429,
            url: "u".into()
        }
        .is_retryable());
        assert!(AcquireError::Http {
            status: 503,
            url: "u".into()
        }
        .is_retryable());
    }

    #[test]
    fn non_retryable_errors() {
        assert!(!AcquireError::Http {
            status: 404,
            url: "u".into()
        }
        .is_retryable());
        assert!(!AcquireError::Http {
            status: 403,
            url: "u".into()
        }
        .is_retryable());
        assert!(!AcquireError::Extraction("empty".into()).is_retryable());
        assert!(!AcquireError::ProxyExhausted.is_retryable());
    }
}
