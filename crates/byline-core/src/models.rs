use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Status of a candidate URL in the acquisition state machine.
///
/// ```text
/// pending ──claim──▶ processing ──┬──▶ success
///                                 ├──▶ duplicate
///                                 ├──▶ paywall_suspected
///                                 ├──▶ error_parse
///                                 ├──▶ error_network
///                                 ├──▶ dead
///                                 └──▶ skipped
/// (on crash: processing ──▶ pending, at startup)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Pending,
    Processing,
    Success,
    Duplicate,
    PaywallSuspected,
    ErrorParse,
    ErrorNetwork,
    Skipped,
    Dead,
}

impl UrlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlStatus::Pending => "pending",
            UrlStatus::Processing => "processing",
            UrlStatus::Success => "success",
            UrlStatus::Duplicate => "duplicate",
            UrlStatus::PaywallSuspected => "paywall_suspected",
            UrlStatus::ErrorParse => "error_parse",
            UrlStatus::ErrorNetwork => "error_network",
            UrlStatus::Skipped => "skipped",
            UrlStatus::Dead => "dead",
        }
    }

    /// Terminal statuses are never self-transitioned away from within a run.
    /// The failure statuses are terminal for a single run but may be reset
    /// to `pending` by a future re-seed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UrlStatus::Pending | UrlStatus::Processing)
    }
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for UrlStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UrlStatus::Pending),
            "processing" => Ok(UrlStatus::Processing),
            "success" => Ok(UrlStatus::Success),
            "duplicate" => Ok(UrlStatus::Duplicate),
            "paywall_suspected" => Ok(UrlStatus::PaywallSuspected),
            "error_parse" => Ok(UrlStatus::ErrorParse),
            "error_network" => Ok(UrlStatus::ErrorNetwork),
            "skipped" => Ok(UrlStatus::Skipped),
            "dead" => Ok(UrlStatus::Dead),
            _ => Err(format!("Unknown url status: {s}")),
        }
    }
}

/// Secondary classifier attached to failure statuses, capturing the
/// observable cause of the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    Paywall,
    BotDetection,
    RateLimited,
    Deleted,
    Transport,
    SoftPaywall,
    JsRequiredOrUnknown,
    NonProsePath,
    NoProxy,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::Paywall => "paywall",
            BlockReason::BotDetection => "bot_detection",
            BlockReason::RateLimited => "rate_limited",
            BlockReason::Deleted => "deleted",
            BlockReason::Transport => "transport",
            BlockReason::SoftPaywall => "soft_paywall",
            BlockReason::JsRequiredOrUnknown => "js_required_or_unknown",
            BlockReason::NonProsePath => "non_prose_path",
            BlockReason::NoProxy => "no_proxy",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BlockReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paywall" => Ok(BlockReason::Paywall),
            "bot_detection" => Ok(BlockReason::BotDetection),
            "rate_limited" => Ok(BlockReason::RateLimited),
            "deleted" => Ok(BlockReason::Deleted),
            "transport" => Ok(BlockReason::Transport),
            "soft_paywall" => Ok(BlockReason::SoftPaywall),
            "js_required_or_unknown" => Ok(BlockReason::JsRequiredOrUnknown),
            "non_prose_path" => Ok(BlockReason::NonProsePath),
            "no_proxy" => Ok(BlockReason::NoProxy),
            _ => Err(format!("Unknown block reason: {s}")),
        }
    }
}

/// Where the resolved publish date of an article came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishDateSource {
    JsonLd,
    OpenGraph,
    SecondaryExtractor,
    Upstream,
}

impl PublishDateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishDateSource::JsonLd => "json-ld",
            PublishDateSource::OpenGraph => "opengraph",
            PublishDateSource::SecondaryExtractor => "secondary-extractor",
            PublishDateSource::Upstream => "upstream",
        }
    }
}

impl fmt::Display for PublishDateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of acquisition state, keyed by normalized URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlRecord {
    pub normalized_url: String,
    /// Canonical publisher label (`reuters`, `nytimes`, ...).
    pub source: String,
    pub status: UrlStatus,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub extractor_used: Option<String>,
    pub block_reason: Option<BlockReason>,
    /// Pass-through metadata from the upstream discovery stage.
    pub gdelt_publish_date: Option<DateTime<Utc>>,
    pub gdelt_themes: Option<String>,
    pub gdelt_tone: Option<String>,
}

/// Seed row for corpus creation: a pre-normalized, allowlisted URL plus the
/// upstream pass-through fields.
#[derive(Debug, Clone)]
pub struct SeedUrl {
    pub normalized_url: String,
    pub source: String,
    pub gdelt_publish_date: Option<DateTime<Utc>>,
    pub gdelt_themes: Option<String>,
    pub gdelt_tone: Option<String>,
}

/// DTO for inserting a successfully extracted article.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub normalized_url: String,
    pub source: String,
    pub headline: Option<String>,
    /// Author names, later stored semicolon-joined.
    pub authors: Vec<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub publish_date_source: Option<PublishDateSource>,
    pub full_text: String,
    pub word_count: u32,
    /// SHA-256 of the whitespace-normalized, lowercased full text.
    pub content_hash: String,
}

/// One row of the extracted corpus, as read back from the store. The
/// `articles` table is the stable contract consumed by the downstream
/// analysis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub article_id: i64,
    pub normalized_url: String,
    pub source: String,
    pub headline: Option<String>,
    /// Semicolon-joined author names.
    pub authors: Option<String>,
    pub publish_date: Option<DateTime<Utc>>,
    pub publish_date_source: Option<String>,
    pub full_text: String,
    pub word_count: u32,
    pub content_hash: String,
    pub extraction_timestamp: DateTime<Utc>,
}

/// Terminal result of processing one URL. Total — every worker run produces
/// exactly one of these, success or not.
#[derive(Debug, Clone)]
pub struct UrlOutcome {
    pub normalized_url: String,
    pub status: UrlStatus,
    pub error_message: Option<String>,
    pub block_reason: Option<BlockReason>,
    pub extractor_used: Option<String>,
    /// Present exactly when `status == Success`.
    pub article: Option<NewArticle>,
}

impl UrlOutcome {
    pub fn failure(
        normalized_url: impl Into<String>,
        status: UrlStatus,
        block_reason: BlockReason,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            normalized_url: normalized_url.into(),
            status,
            error_message: Some(error_message.into()),
            block_reason: Some(block_reason),
            extractor_used: None,
            article: None,
        }
    }

    pub fn success(article: NewArticle, extractor_used: impl Into<String>) -> Self {
        Self {
            normalized_url: article.normalized_url.clone(),
            status: UrlStatus::Success,
            error_message: None,
            block_reason: None,
            extractor_used: Some(extractor_used.into()),
            article: Some(article),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.error_message = Some(note.into());
        self
    }
}

/// A proxy endpoint as loaded from the configured source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16, protocol: ProxyProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
        }
    }

    /// Proxy URL suitable for an HTTP client or a browser `--proxy-server` flag.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        }
    }
}

impl fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProxyProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(ProxyProtocol::Http),
            "https" => Ok(ProxyProtocol::Https),
            "socks5" => Ok(ProxyProtocol::Socks5),
            _ => Err(format!("Unknown proxy protocol: {s}")),
        }
    }
}

/// One row of observed proxy health.
#[derive(Debug, Clone)]
pub struct ProxyRecord {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub success_count: u32,
    pub consecutive_failure_count: u32,
    pub is_active: bool,
}

impl ProxyRecord {
    pub fn endpoint(&self) -> ProxyEndpoint {
        ProxyEndpoint::new(self.host.clone(), self.port, self.protocol)
    }
}

/// Grouped counts emitted at the end of a run.
#[derive(Debug, Clone, Default)]
pub struct StoreMetrics {
    /// COUNT per (source, status).
    pub counts: Vec<(String, UrlStatus, i64)>,
    /// Publish-date range of the successful set.
    pub publish_date_min: Option<DateTime<Utc>>,
    pub publish_date_max: Option<DateTime<Utc>>,
}

impl StoreMetrics {
    pub fn total(&self) -> i64 {
        self.counts.iter().map(|(_, _, n)| n).sum()
    }

    pub fn count_for(&self, status: UrlStatus) -> i64 {
        self.counts
            .iter()
            .filter(|(_, s, _)| *s == status)
            .map(|(_, _, n)| n)
            .sum()
    }

    /// Fraction of URLs that produced an article, over all terminal rows.
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.count_for(UrlStatus::Success) as f64 / total as f64
    }
}

/// Collapse runs of whitespace to single spaces and lowercase — the
/// canonical form hashed for cross-URL deduplication.
pub fn normalize_for_hash(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 of the whitespace-normalized, lowercased text, as 64-char hex.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_for_hash(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Words as whitespace-separated tokens.
pub fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}
