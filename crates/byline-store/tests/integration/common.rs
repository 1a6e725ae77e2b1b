use tempfile::TempDir;

use byline_core::models::SeedUrl;
use byline_core::normalize;
use byline_store::{StateStore, StoreConfig};

/// Open a store on a fresh on-disk database.
///
/// The `TempDir` must be kept in scope for the test duration — dropping it
/// deletes the database file.
pub async fn open_test_store() -> (StateStore, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let store = StateStore::open(StoreConfig::new(dir.path().join("byline.db")))
        .await
        .expect("open store");
    (store, dir)
}

/// Reopen a store on the same directory, as a restart would.
pub async fn reopen_store(dir: &TempDir) -> StateStore {
    StateStore::open(StoreConfig::new(dir.path().join("byline.db")))
        .await
        .expect("reopen store")
}

/// Seed row from a raw URL, normalized the way the seeding path does it.
pub fn seed_row(raw_url: &str) -> SeedUrl {
    let normalized_url = normalize::normalize_url(raw_url).expect("normalizable url");
    let source = normalize::source_for_url(&normalized_url)
        .map(str::to_string)
        .unwrap_or_else(|| "example".to_string());
    SeedUrl {
        normalized_url,
        source,
        gdelt_publish_date: None,
        gdelt_themes: None,
        gdelt_tone: None,
    }
}
