//! Drives a run end-to-end: reset in-flight rows, claim pending URLs in
//! batches, dispatch each through the rate limiter to a bounded worker
//! pool, persist every terminal outcome, and shut down gracefully.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cascade::Cascade;
use crate::config::AcquireConfig;
use crate::error::AcquireError;
use crate::models::{StoreMetrics, UrlOutcome, UrlStatus};
use crate::normalize;
use crate::rate_limit::DomainRateLimiter;
use crate::traits::{BrowserFetcher, Fetcher, UrlStore};

pub struct Orchestrator<St, F, B> {
    store: St,
    cascade: Arc<Cascade<F, B>>,
    limiter: Arc<DomainRateLimiter>,
    config: Arc<AcquireConfig>,
}

impl<St, F, B> Orchestrator<St, F, B>
where
    St: UrlStore + 'static,
    F: Fetcher + 'static,
    B: BrowserFetcher + 'static,
{
    pub fn new(store: St, cascade: Cascade<F, B>, config: Arc<AcquireConfig>) -> Self {
        let limiter = Arc::new(DomainRateLimiter::from_config(&config));
        Self {
            store,
            cascade: Arc::new(cascade),
            limiter,
            config,
        }
    }

    /// Drain the pending set to completion (or cancellation) and return the
    /// final metrics.
    pub async fn run(&self, cancel: CancellationToken) -> Result<StoreMetrics, AcquireError> {
        let reset = self.store.reset_in_flight().await?;
        if reset > 0 {
            tracing::info!(count = reset, "Reset in-flight URLs from a previous run");
        }

        let permits = Arc::new(Semaphore::new(self.config.worker_count));
        let mut workers: JoinSet<()> = JoinSet::new();

        'claim: loop {
            if cancel.is_cancelled() {
                break;
            }

            // Backpressure: don't queue dispatch tasks far beyond the pool.
            while workers.len() >= self.config.max_in_flight() {
                tokio::select! {
                    _ = workers.join_next() => {}
                    () = cancel.cancelled() => break 'claim,
                }
            }

            let batch = self.store.claim_next(self.config.claim_batch).await?;
            if batch.is_empty() {
                break;
            }
            tracing::debug!(count = batch.len(), "Claimed batch");

            for record in batch {
                let store = self.store.clone();
                let cascade = Arc::clone(&self.cascade);
                let limiter = Arc::clone(&self.limiter);
                let permits = Arc::clone(&permits);
                let cancel = cancel.clone();

                workers.spawn(async move {
                    let domain = normalize::registrable_domain(&record.normalized_url)
                        .unwrap_or_else(|| "unknown".to_string());

                    // Rate limiter is taken at dispatch time, before a
                    // worker permit. A cancelled wait leaves the row in
                    // `processing`; the next startup resets it.
                    tokio::select! {
                        () = limiter.acquire(&domain) => {}
                        () = cancel.cancelled() => return,
                    }
                    let Ok(_permit) = permits.acquire_owned().await else {
                        return;
                    };

                    let outcome = cascade.run(&record).await;
                    log_outcome(&outcome);
                    if let Err(e) = store.record_outcome(outcome).await {
                        tracing::error!(
                            url = %record.normalized_url,
                            error = %e,
                            "Failed to persist outcome"
                        );
                    }
                });
            }
        }

        self.drain(workers, &cancel).await;

        let metrics = self.store.metrics().await?;
        log_summary(&metrics);
        Ok(metrics)
    }

    /// Wait for in-flight workers. After a shutdown signal they get the
    /// configured grace period, then the join set is aborted — the actual
    /// store writes run on the writer task and are never cut mid-transaction.
    async fn drain(&self, mut workers: JoinSet<()>, cancel: &CancellationToken) {
        loop {
            if workers.is_empty() {
                return;
            }
            tokio::select! {
                _ = workers.join_next() => {}
                () = cancel.cancelled() => break,
            }
        }

        let grace = self.config.grace_shutdown;
        tracing::info!(
            in_flight = workers.len(),
            grace_secs = grace.as_secs(),
            "Shutdown requested, waiting for in-flight workers"
        );
        let drained = tokio::time::timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                abandoned = workers.len(),
                "Grace period expired; abandoned URLs stay in processing until next startup"
            );
            workers.shutdown().await;
        }
    }
}

/// One log entry per terminal URL outcome.
fn log_outcome(outcome: &UrlOutcome) {
    let extractor = outcome.extractor_used.as_deref().unwrap_or("-");
    let reason = outcome
        .block_reason
        .map(|r| r.as_str())
        .unwrap_or("-");
    match outcome.status {
        UrlStatus::Success | UrlStatus::Duplicate => tracing::info!(
            url = %outcome.normalized_url,
            status = %outcome.status,
            extractor,
            "URL completed"
        ),
        UrlStatus::Skipped => tracing::info!(
            url = %outcome.normalized_url,
            status = %outcome.status,
            reason,
            "URL skipped"
        ),
        _ => tracing::warn!(
            url = %outcome.normalized_url,
            status = %outcome.status,
            reason,
            error = outcome.error_message.as_deref().unwrap_or("-"),
            "URL failed"
        ),
    }
}

fn log_summary(metrics: &StoreMetrics) {
    for (source, status, count) in &metrics.counts {
        tracing::info!(source = %source, status = %status, count, "Run summary");
    }
    tracing::info!(
        total = metrics.total(),
        successes = metrics.count_for(UrlStatus::Success),
        success_rate = format!("{:.1}%", metrics.success_rate() * 100.0),
        publish_date_min = ?metrics.publish_date_min,
        publish_date_max = ?metrics.publish_date_max,
        "Run complete"
    );
}
