//! Test utilities: mock implementations of the core trait seams.
//!
//! Handwritten mocks for dependency injection in unit tests. All mocks use
//! `Arc<Mutex<_>>` for interior mutability, allowing test assertions on
//! recorded calls. Built for this crate's tests and, behind the `testutil`
//! feature, for downstream crates' integration tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::error::AcquireError;
use crate::models::{
    ProxyEndpoint, ProxyRecord, SeedUrl, StoreMetrics, UrlOutcome, UrlRecord, UrlStatus,
};
use crate::normalize;
use crate::traits::{
    BrowserFetcher, Extracted, FetchResponse, Fetcher, ProxySource, ProxyStore, ProxyValidator,
    UrlStore,
};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher with a scripted response queue and a fixed fallback.
#[derive(Clone)]
pub struct MockFetcher {
    responses: Arc<Mutex<Vec<Result<FetchResponse, AcquireError>>>>,
    fixed: Arc<Mutex<Option<FetchResponse>>>,
    calls: Arc<AtomicUsize>,
}

impl MockFetcher {
    /// Always responds HTTP 200 with the given body.
    pub fn with_html(html: &str) -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            fixed: Arc::new(Mutex::new(Some(FetchResponse::ok(html)))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pops one scripted result per call; falls back to a default 200 when
    /// the queue runs out.
    pub fn with_responses(responses: Vec<Result<FetchResponse, AcquireError>>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            fixed: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, _url: &str) -> Result<FetchResponse, AcquireError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if !responses.is_empty() {
            return responses.remove(0);
        }
        if let Some(fixed) = self.fixed.lock().unwrap().clone() {
            return Ok(fixed);
        }
        Ok(FetchResponse::ok("<html><body>default</body></html>"))
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock body extractor returning fixed text or a scripted sequence.
pub struct MockExtractor {
    sequence: Mutex<Vec<Extracted>>,
    fixed: Option<Extracted>,
}

impl MockExtractor {
    /// Always returns the given text with no metadata.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            sequence: Mutex::new(Vec::new()),
            fixed: Some(Extracted {
                text: text.into(),
                ..Extracted::default()
            }),
        }
    }

    /// Pops one scripted extraction per call; empty output once exhausted.
    pub fn with_sequence(sequence: Vec<Extracted>) -> Self {
        Self {
            sequence: Mutex::new(sequence),
            fixed: None,
        }
    }

    /// Always returns empty output.
    pub fn empty() -> Self {
        Self {
            sequence: Mutex::new(Vec::new()),
            fixed: Some(Extracted::default()),
        }
    }
}

impl crate::traits::ArticleExtractor for MockExtractor {
    fn extract(&self, _html: &str, _url: &str) -> Result<Extracted, AcquireError> {
        let mut sequence = self.sequence.lock().unwrap();
        if !sequence.is_empty() {
            return Ok(sequence.remove(0));
        }
        Ok(self.fixed.clone().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MockBrowser
// ---------------------------------------------------------------------------

/// Mock browser fetcher: fixed rendered HTML or a scripted error.
#[derive(Clone)]
pub struct MockBrowser {
    scripted: Arc<Mutex<Vec<Result<String, AcquireError>>>>,
    fixed: Arc<Mutex<Option<String>>>,
    calls: Arc<AtomicUsize>,
}

impl MockBrowser {
    pub fn with_html(html: &str) -> Self {
        Self {
            scripted: Arc::new(Mutex::new(Vec::new())),
            fixed: Arc::new(Mutex::new(Some(html.to_string()))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_error(error: AcquireError) -> Self {
        Self {
            scripted: Arc::new(Mutex::new(vec![Err(error)])),
            fixed: Arc::new(Mutex::new(None)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl BrowserFetcher for MockBrowser {
    async fn fetch_rendered(&self, _url: &str) -> Result<String, AcquireError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut scripted = self.scripted.lock().unwrap();
        if !scripted.is_empty() {
            return scripted.remove(0);
        }
        match self.fixed.lock().unwrap().clone() {
            Some(html) => Ok(html),
            None => Err(AcquireError::BrowserUnavailable("mock exhausted".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// MockUrlStore
// ---------------------------------------------------------------------------

/// In-memory URL store mirroring the state machine, without the dedup
/// logic of the real store (that belongs to the persistence layer).
#[derive(Clone, Default)]
pub struct MockUrlStore {
    rows: Arc<Mutex<Vec<UrlRecord>>>,
    outcomes: Arc<Mutex<Vec<UrlOutcome>>>,
}

impl MockUrlStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pending<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        let mut rows = store.rows.lock().unwrap();
        for url in urls {
            rows.push(make_url_record_with_status(url.into(), UrlStatus::Pending));
        }
        drop(rows);
        store
    }

    pub fn mark_processing(&self, url: &str) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|r| r.normalized_url == url) {
            row.status = UrlStatus::Processing;
        }
    }

    pub fn outcomes(&self) -> Vec<UrlOutcome> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn rows(&self) -> Vec<UrlRecord> {
        self.rows.lock().unwrap().clone()
    }
}

impl UrlStore for MockUrlStore {
    async fn seed(&self, records: Vec<SeedUrl>) -> Result<usize, AcquireError> {
        let mut rows = self.rows.lock().unwrap();
        let existing: HashSet<String> =
            rows.iter().map(|r| r.normalized_url.clone()).collect();
        let mut inserted = 0;
        for seed in records {
            if existing.contains(&seed.normalized_url) {
                continue;
            }
            rows.push(UrlRecord {
                normalized_url: seed.normalized_url,
                source: seed.source,
                status: UrlStatus::Pending,
                attempt_count: 0,
                last_attempt_at: None,
                error_message: None,
                extractor_used: None,
                block_reason: None,
                gdelt_publish_date: seed.gdelt_publish_date,
                gdelt_themes: seed.gdelt_themes,
                gdelt_tone: seed.gdelt_tone,
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn reset_in_flight(&self) -> Result<u64, AcquireError> {
        let mut rows = self.rows.lock().unwrap();
        let mut count = 0;
        for row in rows.iter_mut() {
            if row.status == UrlStatus::Processing {
                row.status = UrlStatus::Pending;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn claim_next(&self, limit: usize) -> Result<Vec<UrlRecord>, AcquireError> {
        let mut rows = self.rows.lock().unwrap();
        let mut claimed = Vec::new();
        for row in rows.iter_mut() {
            if claimed.len() >= limit {
                break;
            }
            if row.status == UrlStatus::Pending {
                row.status = UrlStatus::Processing;
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn record_outcome(&self, outcome: UrlOutcome) -> Result<(), AcquireError> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.normalized_url == outcome.normalized_url)
        {
            row.status = outcome.status;
            row.attempt_count += 1;
            row.last_attempt_at = Some(Utc::now());
            row.error_message = outcome.error_message.clone();
            row.block_reason = outcome.block_reason;
            row.extractor_used = outcome.extractor_used.clone();
        }
        drop(rows);
        self.outcomes.lock().unwrap().push(outcome);
        Ok(())
    }

    async fn metrics(&self) -> Result<StoreMetrics, AcquireError> {
        let rows = self.rows.lock().unwrap();
        let mut counts: Vec<(String, UrlStatus, i64)> = Vec::new();
        for row in rows.iter() {
            match counts
                .iter_mut()
                .find(|(s, st, _)| *s == row.source && *st == row.status)
            {
                Some((_, _, n)) => *n += 1,
                None => counts.push((row.source.clone(), row.status, 1)),
            }
        }
        Ok(StoreMetrics {
            counts,
            publish_date_min: None,
            publish_date_max: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Proxy mocks
// ---------------------------------------------------------------------------

/// Records proxy persistence calls.
#[derive(Clone, Default)]
pub struct MockProxyStore {
    upserts: Arc<AtomicUsize>,
    outcomes: Arc<Mutex<Vec<(ProxyEndpoint, bool)>>>,
    retired_list: Arc<Mutex<Vec<ProxyEndpoint>>>,
}

impl MockProxyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn retired(&self) -> Vec<ProxyEndpoint> {
        self.retired_list.lock().unwrap().clone()
    }
}

impl ProxyStore for MockProxyStore {
    async fn proxy_upsert(
        &self,
        _endpoint: ProxyEndpoint,
        _validated_at: DateTime<Utc>,
    ) -> Result<(), AcquireError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn proxy_record_outcome(
        &self,
        endpoint: ProxyEndpoint,
        success: bool,
    ) -> Result<(), AcquireError> {
        self.outcomes.lock().unwrap().push((endpoint, success));
        Ok(())
    }

    async fn list_active_proxies(&self) -> Result<Vec<ProxyRecord>, AcquireError> {
        Ok(Vec::new())
    }

    async fn retire_proxy(&self, endpoint: ProxyEndpoint) -> Result<(), AcquireError> {
        self.retired_list.lock().unwrap().push(endpoint);
        Ok(())
    }
}

/// Fixed endpoint list, counting loads.
#[derive(Clone)]
pub struct MockProxySource {
    endpoints: Arc<Vec<ProxyEndpoint>>,
    load_count: Arc<AtomicUsize>,
}

impl MockProxySource {
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Self {
        Self {
            endpoints: Arc::new(endpoints),
            load_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn loads(&self) -> usize {
        self.load_count.load(Ordering::SeqCst)
    }
}

impl ProxySource for MockProxySource {
    async fn load(&self) -> Result<Vec<ProxyEndpoint>, AcquireError> {
        self.load_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.endpoints.as_ref().clone())
    }
}

/// Accepts only a configured set of endpoints.
#[derive(Clone)]
pub struct MockProxyValidator {
    good: Arc<HashSet<ProxyEndpoint>>,
}

impl MockProxyValidator {
    pub fn accepting(good: Vec<ProxyEndpoint>) -> Self {
        Self {
            good: Arc::new(good.into_iter().collect()),
        }
    }

    pub fn accept_all() -> Self {
        Self {
            good: Arc::new(HashSet::new()),
        }
    }
}

impl ProxyValidator for MockProxyValidator {
    async fn validate(&self, endpoint: &ProxyEndpoint) -> bool {
        self.good.is_empty() || self.good.contains(endpoint)
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// A claimed (processing) record for cascade tests.
pub fn make_url_record(url: impl Into<String>) -> UrlRecord {
    make_url_record_with_status(url.into(), UrlStatus::Processing)
}

fn make_url_record_with_status(url: String, status: UrlStatus) -> UrlRecord {
    let source = normalize::source_for_url(&url)
        .map(str::to_string)
        .unwrap_or_else(|| "example".to_string());
    UrlRecord {
        normalized_url: url,
        source,
        status,
        attempt_count: 0,
        last_attempt_at: None,
        error_message: None,
        extractor_used: None,
        block_reason: None,
        gdelt_publish_date: None,
        gdelt_themes: None,
        gdelt_tone: None,
    }
}
