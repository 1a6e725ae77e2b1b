//! End-to-end scenarios: the real store under the orchestrator and
//! cascade, with scripted fetchers and extractors standing in for the
//! network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use byline_core::cascade::Cascade;
use byline_core::orchestrator::Orchestrator;
use byline_core::testutil::{MockBrowser, MockExtractor, MockFetcher};
use byline_core::traits::{Extracted, UrlStore};
use byline_core::{AcquireConfig, UrlStatus};
use byline_store::StateStore;

use crate::common::{open_test_store, reopen_store, seed_row};

fn fast_config() -> AcquireConfig {
    AcquireConfig::default()
        .with_per_domain_delays(HashMap::new())
        .with_default_domain_delay(Duration::ZERO)
        .with_retry_base(Duration::from_millis(1))
        .with_grace_shutdown(Duration::from_millis(200))
}

fn orchestrator(
    store: StateStore,
    fetcher: MockFetcher,
    primary: MockExtractor,
    secondary: MockExtractor,
    browser: Option<MockBrowser>,
    config: AcquireConfig,
) -> Orchestrator<StateStore, MockFetcher, MockBrowser> {
    let config = Arc::new(config);
    let cascade = Cascade::new(
        fetcher,
        Arc::new(primary),
        Arc::new(secondary),
        browser,
        Arc::clone(&config),
    );
    Orchestrator::new(store, cascade, config)
}

fn prose(words: usize) -> String {
    (0..words)
        .map(|i| format!("word{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn open_source_happy_path() {
    let (store, _dir) = open_test_store().await;
    store
        .seed(vec![seed_row(
            "https://www.reuters.com/world/example?utm_source=x",
        )])
        .await
        .unwrap();

    let orchestrator = orchestrator(
        store.clone(),
        MockFetcher::with_html("<html>article markup</html>"),
        MockExtractor::with_text(prose(350)),
        MockExtractor::empty(),
        None,
        fast_config(),
    );
    orchestrator.run(CancellationToken::new()).await.unwrap();

    let url = "https://www.reuters.com/world/example";
    let record = store.get_url(url).await.unwrap().unwrap();
    assert_eq!(record.status, UrlStatus::Success);
    assert_eq!(record.extractor_used.as_deref(), Some("primary"));

    let article = store.get_article(url).await.unwrap().unwrap();
    assert_eq!(article.source, "reuters");
    assert!((300..=400).contains(&article.word_count));
}

#[tokio::test]
async fn soft_paywall_without_browser() {
    let (store, _dir) = open_test_store().await;
    store
        .seed(vec![seed_row("https://www.nytimes.com/article")])
        .await
        .unwrap();

    let stub = "Subscribe to continue reading. Already a subscriber? Sign in.";
    let orchestrator = orchestrator(
        store.clone(),
        MockFetcher::with_html("<html><p>Subscribe to continue</p></html>"),
        MockExtractor::with_text(stub),
        MockExtractor::with_text(stub),
        None,
        fast_config(),
    );
    orchestrator.run(CancellationToken::new()).await.unwrap();

    let record = store
        .get_url("https://www.nytimes.com/article")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, UrlStatus::PaywallSuspected);
    assert_eq!(
        record.block_reason.map(|r| r.as_str()),
        Some("soft_paywall")
    );
    assert_eq!(store.article_count().await.unwrap(), 0);
}

#[tokio::test]
async fn browser_fallback_recovers_paywalled_article() {
    let (store, _dir) = open_test_store().await;
    store
        .seed(vec![seed_row("https://www.nytimes.com/article")])
        .await
        .unwrap();

    // Primary sees the thin shell first, then the rendered DOM.
    let primary = MockExtractor::with_sequence(vec![
        Extracted {
            text: "thin shell".into(),
            ..Extracted::default()
        },
        Extracted {
            text: prose(250),
            ..Extracted::default()
        },
    ]);

    let orchestrator = orchestrator(
        store.clone(),
        MockFetcher::with_html("<html>shell</html>"),
        primary,
        MockExtractor::with_text("thin shell"),
        Some(MockBrowser::with_html("<html>rendered article</html>")),
        fast_config().with_paywall_domains(["nytimes.com"]),
    );
    orchestrator.run(CancellationToken::new()).await.unwrap();

    let record = store
        .get_url("https://www.nytimes.com/article")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, UrlStatus::Success);
    assert_eq!(record.extractor_used.as_deref(), Some("browser+primary"));
}

#[tokio::test]
async fn identical_bodies_dedupe_across_publishers() {
    let (store, _dir) = open_test_store().await;
    store
        .seed(vec![
            seed_row("https://apnews.com/a"),
            seed_row("https://www.washingtonpost.com/b"),
        ])
        .await
        .unwrap();

    let orchestrator = orchestrator(
        store.clone(),
        MockFetcher::with_html("<html>wire copy</html>"),
        MockExtractor::with_text(prose(350)),
        MockExtractor::empty(),
        None,
        fast_config(),
    );
    orchestrator.run(CancellationToken::new()).await.unwrap();

    assert_eq!(store.article_count().await.unwrap(), 1);
    let metrics = store.metrics().await.unwrap();
    assert_eq!(metrics.count_for(UrlStatus::Success), 1);
    assert_eq!(metrics.count_for(UrlStatus::Duplicate), 1);
}

#[tokio::test]
async fn crash_and_resume_reaches_the_same_end_state() {
    let (store, dir) = open_test_store().await;
    let rows: Vec<_> = (0..10)
        .map(|i| seed_row(&format!("https://apnews.com/article/{i}")))
        .collect();
    store.seed(rows.clone()).await.unwrap();

    // Simulate a crash mid-run: some rows processed, some claimed but
    // never reported, the process gone.
    let claimed = store.claim_next(6).await.unwrap();
    for record in claimed.iter().take(3) {
        let text = format!("{} {}", record.normalized_url, prose(320));
        store
            .record_outcome(byline_core::UrlOutcome::success(
                byline_core::NewArticle {
                    normalized_url: record.normalized_url.clone(),
                    source: record.source.clone(),
                    headline: None,
                    authors: Vec::new(),
                    publish_date: None,
                    publish_date_source: None,
                    word_count: byline_core::models::word_count(&text),
                    content_hash: byline_core::content_hash(&text),
                    full_text: text,
                },
                "primary",
            ))
            .await
            .unwrap();
    }
    store.close().await.unwrap();

    // Restart: reopen, re-seed (idempotent), run to completion. Distinct
    // body per URL so dedup does not collapse the corpus.
    let store = reopen_store(&dir).await;
    assert_eq!(store.seed(rows).await.unwrap(), 0);

    let bodies: Vec<Extracted> = (0..7)
        .map(|i| Extracted {
            text: format!("resumed article {i} {}", prose(320)),
            ..Extracted::default()
        })
        .collect();
    let orchestrator = orchestrator(
        store.clone(),
        MockFetcher::with_html("<html>body</html>"),
        MockExtractor::with_sequence(bodies),
        MockExtractor::empty(),
        None,
        fast_config(),
    );
    orchestrator.run(CancellationToken::new()).await.unwrap();

    let metrics = store.metrics().await.unwrap();
    assert_eq!(metrics.count_for(UrlStatus::Success), 10);
    assert_eq!(metrics.count_for(UrlStatus::Processing), 0);
    assert_eq!(metrics.count_for(UrlStatus::Pending), 0);
    assert_eq!(store.article_count().await.unwrap(), 10);
}

#[tokio::test]
async fn per_domain_delay_bounds_run_duration() {
    let (store, _dir) = open_test_store().await;
    let rows: Vec<_> = (0..5)
        .map(|i| seed_row(&format!("https://www.nytimes.com/story/{i}")))
        .collect();
    store.seed(rows).await.unwrap();

    let bodies: Vec<Extracted> = (0..5)
        .map(|i| Extracted {
            text: format!("story {i} {}", prose(320)),
            ..Extracted::default()
        })
        .collect();
    let config = fast_config().with_domain_delay("nytimes.com", Duration::from_millis(100));
    let orchestrator = orchestrator(
        store.clone(),
        MockFetcher::with_html("<html>body</html>"),
        MockExtractor::with_sequence(bodies),
        MockExtractor::empty(),
        None,
        config,
    );

    let start = tokio::time::Instant::now();
    orchestrator.run(CancellationToken::new()).await.unwrap();
    assert!(
        start.elapsed() >= Duration::from_millis(400),
        "five dispatches on one domain must span four delays, elapsed {:?}",
        start.elapsed()
    );
    assert_eq!(
        store.metrics().await.unwrap().count_for(UrlStatus::Success),
        5
    );
}
