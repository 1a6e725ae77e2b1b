//! Network-facing adapters — HTTP fetcher, article-body extractors, proxy
//! source/validator, and the headless-browser pool.

pub mod extract;
pub mod fetcher;
pub mod proxy_io;

#[cfg(feature = "browser")]
pub mod browser;

pub use extract::{PrimaryExtractor, SecondaryExtractor};
pub use fetcher::HttpFetcher;
pub use proxy_io::{FileProxySource, ReqwestProxyValidator};

#[cfg(feature = "browser")]
pub use browser::{BrowserPool, BrowserPoolConfig, BrowserPoolHandle};
