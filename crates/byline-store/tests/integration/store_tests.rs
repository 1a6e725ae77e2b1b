use chrono::Utc;

use byline_core::models::{
    content_hash, word_count, NewArticle, ProxyEndpoint, ProxyProtocol, UrlOutcome, UrlStatus,
};
use byline_core::traits::{ProxyStore, UrlStore};
use byline_core::{BlockReason, PublishDateSource};

use crate::common::{open_test_store, seed_row};

fn article(url: &str, source: &str, text: &str) -> NewArticle {
    NewArticle {
        normalized_url: url.to_string(),
        source: source.to_string(),
        headline: Some("Example Headline".into()),
        authors: vec!["Jane Doe".into(), "John Smith".into()],
        publish_date: Some(Utc::now()),
        publish_date_source: Some(PublishDateSource::JsonLd),
        full_text: text.to_string(),
        word_count: word_count(text),
        content_hash: content_hash(text),
    }
}

fn success_outcome(url: &str, source: &str, text: &str) -> UrlOutcome {
    UrlOutcome::success(article(url, source, text), "primary")
}

#[tokio::test]
async fn seed_is_idempotent() {
    let (store, _dir) = open_test_store().await;

    let rows = vec![
        seed_row("https://www.reuters.com/world/a"),
        seed_row("https://www.reuters.com/world/b"),
        seed_row("https://apnews.com/article/c"),
    ];

    assert_eq!(store.seed(rows.clone()).await.unwrap(), 3);
    assert_eq!(store.seed(rows).await.unwrap(), 0, "re-seed inserts nothing");
    assert_eq!(store.count_by_status(UrlStatus::Pending).await.unwrap(), 3);
}

#[tokio::test]
async fn seed_does_not_touch_terminal_rows() {
    let (store, _dir) = open_test_store().await;
    let row = seed_row("https://www.reuters.com/world/done");
    let url = row.normalized_url.clone();

    store.seed(vec![row.clone()]).await.unwrap();
    store.claim_next(1).await.unwrap();
    store
        .record_outcome(success_outcome(&url, "reuters", &"body ".repeat(100)))
        .await
        .unwrap();

    assert_eq!(store.seed(vec![row]).await.unwrap(), 0);
    let record = store.get_url(&url).await.unwrap().unwrap();
    assert_eq!(record.status, UrlStatus::Success);
}

#[tokio::test]
async fn claim_flips_status_and_respects_limit() {
    let (store, _dir) = open_test_store().await;
    let rows: Vec<_> = (0..5)
        .map(|i| seed_row(&format!("https://apnews.com/article/{i}")))
        .collect();
    store.seed(rows).await.unwrap();

    let first = store.claim_next(3).await.unwrap();
    assert_eq!(first.len(), 3);
    assert!(first.iter().all(|r| r.status == UrlStatus::Processing));

    let second = store.claim_next(3).await.unwrap();
    assert_eq!(second.len(), 2);

    assert!(store.claim_next(3).await.unwrap().is_empty());
    assert_eq!(
        store.count_by_status(UrlStatus::Processing).await.unwrap(),
        5
    );
}

#[tokio::test]
async fn concurrent_claims_never_overlap() {
    let (store, _dir) = open_test_store().await;
    let rows: Vec<_> = (0..20)
        .map(|i| seed_row(&format!("https://apnews.com/article/{i}")))
        .collect();
    store.seed(rows).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.claim_next(8).await.unwrap()
        }));
    }

    let mut seen = std::collections::HashSet::new();
    let mut total = 0;
    for handle in handles {
        for record in handle.await.unwrap() {
            total += 1;
            assert!(
                seen.insert(record.normalized_url.clone()),
                "row claimed twice: {}",
                record.normalized_url
            );
        }
    }
    assert_eq!(total, 20);
}

#[tokio::test]
async fn reset_in_flight_requeues_processing_rows() {
    let (store, _dir) = open_test_store().await;
    store
        .seed(vec![
            seed_row("https://apnews.com/article/1"),
            seed_row("https://apnews.com/article/2"),
        ])
        .await
        .unwrap();
    store.claim_next(2).await.unwrap();

    let reset = store.reset_in_flight().await.unwrap();
    assert_eq!(reset, 2);
    assert_eq!(store.count_by_status(UrlStatus::Pending).await.unwrap(), 2);
    assert_eq!(
        store.count_by_status(UrlStatus::Processing).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn record_failure_updates_fields_and_attempts() {
    let (store, _dir) = open_test_store().await;
    let row = seed_row("https://www.nytimes.com/article/x");
    let url = row.normalized_url.clone();
    store.seed(vec![row]).await.unwrap();
    store.claim_next(1).await.unwrap();

    store
        .record_failure(
            &url,
            UrlStatus::PaywallSuspected,
            BlockReason::SoftPaywall,
            "extracted 80 chars below floor 300",
        )
        .await
        .unwrap();

    let record = store.get_url(&url).await.unwrap().unwrap();
    assert_eq!(record.status, UrlStatus::PaywallSuspected);
    assert_eq!(record.block_reason, Some(BlockReason::SoftPaywall));
    assert_eq!(record.attempt_count, 1);
    assert!(record.last_attempt_at.is_some());
    assert!(record.error_message.unwrap().contains("below floor"));
    assert!(store.get_article(&url).await.unwrap().is_none());
}

#[tokio::test]
async fn record_success_inserts_exactly_one_article() {
    let (store, _dir) = open_test_store().await;
    let row = seed_row("https://www.reuters.com/world/good");
    let url = row.normalized_url.clone();
    store.seed(vec![row]).await.unwrap();
    store.claim_next(1).await.unwrap();

    let text = "word ".repeat(400);
    store
        .record_success(article(&url, "reuters", &text), "primary")
        .await
        .unwrap();

    let record = store.get_url(&url).await.unwrap().unwrap();
    assert_eq!(record.status, UrlStatus::Success);
    assert_eq!(record.extractor_used.as_deref(), Some("primary"));

    let article = store.get_article(&url).await.unwrap().unwrap();
    assert_eq!(article.source, "reuters");
    assert_eq!(article.word_count, 400);
    assert_eq!(article.authors.as_deref(), Some("Jane Doe;John Smith"));
    assert_eq!(article.content_hash, content_hash(&text));
    assert!(article.article_id > 0);
}

#[tokio::test]
async fn duplicate_content_hash_becomes_duplicate_status() {
    let (store, _dir) = open_test_store().await;
    let first = seed_row("https://apnews.com/article/original");
    let second = seed_row("https://www.washingtonpost.com/syndicated");
    let (url_a, url_b) = (first.normalized_url.clone(), second.normalized_url.clone());
    store.seed(vec![first, second]).await.unwrap();
    store.claim_next(2).await.unwrap();

    let text = "identical wire copy ".repeat(50);
    store
        .record_outcome(success_outcome(&url_a, "apnews", &text))
        .await
        .unwrap();
    store
        .record_outcome(success_outcome(&url_b, "washingtonpost", &text))
        .await
        .unwrap();

    assert_eq!(store.article_count().await.unwrap(), 1);
    let a = store.get_url(&url_a).await.unwrap().unwrap();
    let b = store.get_url(&url_b).await.unwrap().unwrap();
    assert_eq!(a.status, UrlStatus::Success);
    assert_eq!(b.status, UrlStatus::Duplicate);
    assert!(b.error_message.unwrap().contains("duplicate of article"));
    assert!(store.get_article(&url_b).await.unwrap().is_none());
}

#[tokio::test]
async fn metrics_groups_by_source_and_status() {
    let (store, _dir) = open_test_store().await;
    store
        .seed(vec![
            seed_row("https://www.reuters.com/world/1"),
            seed_row("https://www.reuters.com/world/2"),
            seed_row("https://apnews.com/article/3"),
        ])
        .await
        .unwrap();
    store.claim_next(3).await.unwrap();

    store
        .record_outcome(success_outcome(
            "https://www.reuters.com/world/1",
            "reuters",
            &"alpha ".repeat(100),
        ))
        .await
        .unwrap();
    store
        .record_outcome(UrlOutcome::failure(
            "https://www.reuters.com/world/2",
            UrlStatus::ErrorNetwork,
            BlockReason::Transport,
            "HTTP 503 after 3 attempts",
        ))
        .await
        .unwrap();
    store
        .record_outcome(UrlOutcome::failure(
            "https://apnews.com/article/3",
            UrlStatus::Dead,
            BlockReason::Deleted,
            "HTTP 404",
        ))
        .await
        .unwrap();

    let metrics = store.metrics().await.unwrap();
    assert_eq!(metrics.total(), 3);
    assert_eq!(metrics.count_for(UrlStatus::Success), 1);
    assert_eq!(metrics.count_for(UrlStatus::ErrorNetwork), 1);
    assert_eq!(metrics.count_for(UrlStatus::Dead), 1);
    assert!(metrics.publish_date_min.is_some());
    assert!((metrics.success_rate() - 1.0 / 3.0).abs() < 1e-9);
}

#[tokio::test]
async fn proxy_lifecycle_roundtrip() {
    let (store, _dir) = open_test_store().await;
    let endpoint = ProxyEndpoint::new("10.1.2.3", 3128, ProxyProtocol::Http);

    store
        .proxy_upsert(endpoint.clone(), Utc::now())
        .await
        .unwrap();
    // Upsert of the same (host, port) must not create a second row.
    store
        .proxy_upsert(endpoint.clone(), Utc::now())
        .await
        .unwrap();

    store
        .proxy_record_outcome(endpoint.clone(), true)
        .await
        .unwrap();
    store
        .proxy_record_outcome(endpoint.clone(), false)
        .await
        .unwrap();

    let active = store.list_active_proxies().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].success_count, 1);
    assert_eq!(active[0].consecutive_failure_count, 1);

    store.retire_proxy(endpoint).await.unwrap();
    assert!(store.list_active_proxies().await.unwrap().is_empty());
}

#[tokio::test]
async fn proxy_success_resets_failure_streak() {
    let (store, _dir) = open_test_store().await;
    let endpoint = ProxyEndpoint::new("10.1.2.4", 3128, ProxyProtocol::Socks5);
    store
        .proxy_upsert(endpoint.clone(), Utc::now())
        .await
        .unwrap();

    store
        .proxy_record_outcome(endpoint.clone(), false)
        .await
        .unwrap();
    store
        .proxy_record_outcome(endpoint.clone(), false)
        .await
        .unwrap();
    store
        .proxy_record_outcome(endpoint.clone(), true)
        .await
        .unwrap();

    let active = store.list_active_proxies().await.unwrap();
    assert_eq!(active[0].consecutive_failure_count, 0);
    assert_eq!(active[0].protocol, ProxyProtocol::Socks5);
}

#[tokio::test]
async fn writes_after_close_fail_cleanly() {
    let (store, _dir) = open_test_store().await;
    store.close().await.unwrap();

    let err = store
        .seed(vec![seed_row("https://apnews.com/late")])
        .await
        .unwrap_err();
    assert!(matches!(err, byline_core::AcquireError::Channel(_)));
}
