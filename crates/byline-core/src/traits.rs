use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::AcquireError;
use crate::models::{
    ProxyEndpoint, ProxyRecord, SeedUrl, StoreMetrics, UrlOutcome, UrlRecord,
};

/// Result of a single HTTP fetch attempt that produced a response at all.
///
/// Network-level failures (timeout, DNS, reset) surface as `Err` from
/// [`Fetcher::fetch`]; any HTTP status, success or not, surfaces as `Ok` so
/// the cascade can classify it.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
    /// True when the response carried an anti-bot fingerprint header
    /// (e.g. `cf-ray`).
    pub bot_header: bool,
}

impl FetchResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            bot_header: false,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Fetches a URL over plain HTTP. One attempt per call — the retry loop
/// lives in the cascade.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<FetchResponse, AcquireError>> + Send;
}

/// Output of a body extractor: the prose candidate plus whatever metadata
/// the extractor could see in the document.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub text: String,
    pub headline: Option<String>,
    pub authors: Vec<String>,
    /// `datePublished` from an embedded JSON-LD block.
    pub json_ld_date: Option<DateTime<Utc>>,
    /// `article:published_time` from OpenGraph metadata.
    pub og_date: Option<DateTime<Utc>>,
    /// The extractor's own best guess (e.g. a `<time datetime>` element).
    pub date_guess: Option<DateTime<Utc>>,
}

/// Extracts the article body (and visible metadata) from fetched HTML.
///
/// Contract: a best-effort, total-ish function — unextractable documents
/// return an empty `text`, not an error; `Err` is reserved for malformed
/// input the extractor cannot process at all. Output text is UTF-8 with
/// HTML entities decoded.
pub trait ArticleExtractor: Send + Sync {
    fn extract(&self, html: &str, url: &str) -> Result<Extracted, AcquireError>;
}

/// Fetches fully rendered HTML through a headless-browser context.
pub trait BrowserFetcher: Send + Sync + Clone {
    fn fetch_rendered(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<String, AcquireError>> + Send;
}

/// Durable URL state store. Implementations must serialize all writes (the
/// standard realization is a single writer task behind a bounded channel)
/// and make `claim_next` an atomic read-modify-write.
pub trait UrlStore: Send + Sync + Clone {
    /// Bulk-insert pending URL records, ignoring already-seeded keys.
    /// Returns the number actually inserted.
    fn seed(
        &self,
        records: Vec<SeedUrl>,
    ) -> impl Future<Output = Result<usize, AcquireError>> + Send;

    /// Reset all `processing` rows to `pending`. Called exactly once at
    /// startup before claiming begins.
    fn reset_in_flight(&self) -> impl Future<Output = Result<u64, AcquireError>> + Send;

    /// Atomically claim up to `limit` pending rows, flipping them to
    /// `processing`.
    fn claim_next(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<UrlRecord>, AcquireError>> + Send;

    /// Persist a terminal outcome. The caller observes success only after
    /// the write is committed.
    fn record_outcome(
        &self,
        outcome: UrlOutcome,
    ) -> impl Future<Output = Result<(), AcquireError>> + Send;

    /// Grouped (source, status) counts and the successful publish-date range.
    fn metrics(&self) -> impl Future<Output = Result<StoreMetrics, AcquireError>> + Send;
}

/// Persistence for proxy endpoints and their observed health.
pub trait ProxyStore: Send + Sync + Clone {
    fn proxy_upsert(
        &self,
        endpoint: ProxyEndpoint,
        validated_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AcquireError>> + Send;

    fn proxy_record_outcome(
        &self,
        endpoint: ProxyEndpoint,
        success: bool,
    ) -> impl Future<Output = Result<(), AcquireError>> + Send;

    fn list_active_proxies(
        &self,
    ) -> impl Future<Output = Result<Vec<ProxyRecord>, AcquireError>> + Send;

    fn retire_proxy(
        &self,
        endpoint: ProxyEndpoint,
    ) -> impl Future<Output = Result<(), AcquireError>> + Send;
}

/// Yields candidate proxy endpoints from wherever the operator sources
/// them (a file, a subscription URL).
pub trait ProxySource: Send + Sync + Clone {
    fn load(&self) -> impl Future<Output = Result<Vec<ProxyEndpoint>, AcquireError>> + Send;
}

/// Checks that a proxy actually relays traffic before it enters rotation.
pub trait ProxyValidator: Send + Sync + Clone {
    fn validate(&self, endpoint: &ProxyEndpoint) -> impl Future<Output = bool> + Send;
}

/// The browser pool's view of the proxy pool: lease an endpoint, report how
/// it behaved.
pub trait ProxyProvider: Send + Sync + Clone {
    /// Least-recently-used active proxy, or `None` when the pool is empty.
    fn acquire(&self) -> impl Future<Output = Option<ProxyEndpoint>> + Send;

    fn report_success(&self, endpoint: &ProxyEndpoint) -> impl Future<Output = ()> + Send;

    fn report_failure(&self, endpoint: &ProxyEndpoint) -> impl Future<Output = ()> + Send;
}
