pub mod backoff;
pub mod cascade;
pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod proxy;
pub mod rate_limit;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use cascade::Cascade;
pub use config::AcquireConfig;
pub use error::AcquireError;
pub use models::{
    content_hash, ArticleRecord, BlockReason, NewArticle, ProxyEndpoint, ProxyProtocol,
    PublishDateSource, SeedUrl, StoreMetrics, UrlOutcome, UrlRecord, UrlStatus,
};
pub use orchestrator::Orchestrator;
pub use rate_limit::DomainRateLimiter;
pub use traits::{
    ArticleExtractor, BrowserFetcher, Extracted, FetchResponse, Fetcher, ProxyProvider,
    ProxySource, ProxyStore, ProxyValidator, UrlStore,
};
