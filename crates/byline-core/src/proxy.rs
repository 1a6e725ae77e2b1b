//! Health-tracked proxy pool.
//!
//! Free proxies have order-of-magnitude variance in reliability, so the
//! pool is a small state machine rather than a passive list: endpoints are
//! validated before entering rotation, handed out least-recently-used,
//! retired after a streak of consecutive failures, and refreshed from the
//! source when the active count drops below the low-water mark. At most one
//! refresh is in flight at a time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::error::AcquireError;
use crate::models::ProxyEndpoint;
use crate::traits::{ProxyProvider, ProxySource, ProxyStore, ProxyValidator};

#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Active count below which a background refresh is triggered.
    pub low_water_mark: usize,
    /// Consecutive failures after which an endpoint is retired.
    pub retire_threshold: u32,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            low_water_mark: 10,
            retire_threshold: 3,
        }
    }
}

struct PoolInner {
    /// LRU rotation: acquire pops the front, release pushes the back.
    available: VecDeque<ProxyEndpoint>,
    leased: HashSet<ProxyEndpoint>,
    failure_streaks: HashMap<ProxyEndpoint, u32>,
}

pub struct ProxyPool<St, Src, V> {
    store: St,
    source: Src,
    validator: V,
    config: ProxyPoolConfig,
    inner: Arc<Mutex<PoolInner>>,
    refreshing: Arc<AtomicBool>,
}

impl<St, Src, V> Clone for ProxyPool<St, Src, V>
where
    St: Clone,
    Src: Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            source: self.source.clone(),
            validator: self.validator.clone(),
            config: self.config.clone(),
            inner: Arc::clone(&self.inner),
            refreshing: Arc::clone(&self.refreshing),
        }
    }
}

impl<St, Src, V> ProxyPool<St, Src, V>
where
    St: ProxyStore + 'static,
    Src: ProxySource + 'static,
    V: ProxyValidator + 'static,
{
    pub fn new(store: St, source: Src, validator: V, config: ProxyPoolConfig) -> Self {
        Self {
            store,
            source,
            validator,
            config,
            inner: Arc::new(Mutex::new(PoolInner {
                available: VecDeque::new(),
                leased: HashSet::new(),
                failure_streaks: HashMap::new(),
            })),
            refreshing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Load the source list, validate each endpoint, and admit the
    /// survivors into rotation. Returns the number admitted.
    pub async fn load(&self) -> Result<usize, AcquireError> {
        let candidates = self.source.load().await?;
        let total = candidates.len();
        let mut admitted = 0usize;

        for endpoint in candidates {
            if self.contains(&endpoint) {
                continue;
            }
            if !self.validator.validate(&endpoint).await {
                tracing::debug!(proxy = %endpoint, "Discarding proxy that failed validation");
                continue;
            }
            self.store.proxy_upsert(endpoint.clone(), Utc::now()).await?;
            let mut inner = self.inner.lock().unwrap();
            inner.available.push_back(endpoint);
            admitted += 1;
        }

        tracing::info!(admitted, discarded = total - admitted, "Proxy pool loaded");
        Ok(admitted)
    }

    /// Endpoints currently in rotation (available + leased).
    pub fn active_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.available.len() + inner.leased.len()
    }

    fn contains(&self, endpoint: &ProxyEndpoint) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.leased.contains(endpoint) || inner.available.contains(endpoint)
    }

    /// Kick off a background reload when the pool is running dry. Guarded
    /// by a single-flight flag.
    fn maybe_refresh(&self) {
        if self.active_count() >= self.config.low_water_mark {
            return;
        }
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move {
            tracing::info!(
                active = pool.active_count(),
                low_water = pool.config.low_water_mark,
                "Proxy pool below low-water mark, refreshing"
            );
            if let Err(e) = pool.load().await {
                tracing::warn!(error = %e, "Proxy refresh failed");
            }
            pool.refreshing.store(false, Ordering::SeqCst);
        });
    }
}

impl<St, Src, V> ProxyProvider for ProxyPool<St, Src, V>
where
    St: ProxyStore + 'static,
    Src: ProxySource + 'static,
    V: ProxyValidator + 'static,
{
    async fn acquire(&self) -> Option<ProxyEndpoint> {
        let endpoint = {
            let mut inner = self.inner.lock().unwrap();
            let endpoint = inner.available.pop_front();
            if let Some(ep) = &endpoint {
                inner.leased.insert(ep.clone());
            }
            endpoint
        };
        self.maybe_refresh();
        endpoint
    }

    async fn report_success(&self, endpoint: &ProxyEndpoint) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.failure_streaks.remove(endpoint);
            if inner.leased.remove(endpoint) {
                inner.available.push_back(endpoint.clone());
            }
        }
        if let Err(e) = self
            .store
            .proxy_record_outcome(endpoint.clone(), true)
            .await
        {
            tracing::warn!(proxy = %endpoint, error = %e, "Failed to record proxy success");
        }
    }

    async fn report_failure(&self, endpoint: &ProxyEndpoint) {
        let retired = {
            let mut inner = self.inner.lock().unwrap();
            inner.leased.remove(endpoint);
            let streak = inner
                .failure_streaks
                .entry(endpoint.clone())
                .and_modify(|n| *n += 1)
                .or_insert(1);
            if *streak >= self.config.retire_threshold {
                inner.failure_streaks.remove(endpoint);
                inner.available.retain(|ep| ep != endpoint);
                true
            } else {
                inner.available.push_back(endpoint.clone());
                false
            }
        };

        if let Err(e) = self
            .store
            .proxy_record_outcome(endpoint.clone(), false)
            .await
        {
            tracing::warn!(proxy = %endpoint, error = %e, "Failed to record proxy failure");
        }
        if retired {
            tracing::info!(proxy = %endpoint, "Retiring proxy after consecutive failures");
            if let Err(e) = self.store.retire_proxy(endpoint.clone()).await {
                tracing::warn!(proxy = %endpoint, error = %e, "Failed to retire proxy");
            }
        } else {
            self.maybe_refresh();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyProtocol;
    use crate::testutil::{MockProxySource, MockProxyStore, MockProxyValidator};
    use std::time::Duration;

    fn ep(n: u16) -> ProxyEndpoint {
        ProxyEndpoint::new(format!("10.0.0.{n}"), 8080, ProxyProtocol::Http)
    }

    fn pool(
        endpoints: Vec<ProxyEndpoint>,
        good: Vec<ProxyEndpoint>,
        config: ProxyPoolConfig,
    ) -> (
        ProxyPool<MockProxyStore, MockProxySource, MockProxyValidator>,
        MockProxyStore,
        MockProxySource,
    ) {
        let store = MockProxyStore::new();
        let source = MockProxySource::new(endpoints);
        let validator = MockProxyValidator::accepting(good);
        let pool = ProxyPool::new(store.clone(), source.clone(), validator, config);
        (pool, store, source)
    }

    #[tokio::test]
    async fn load_admits_only_validated_endpoints() {
        let (pool, store, _) = pool(
            vec![ep(1), ep(2), ep(3)],
            vec![ep(1), ep(3)],
            ProxyPoolConfig::default(),
        );

        let admitted = pool.load().await.unwrap();
        assert_eq!(admitted, 2);
        assert_eq!(pool.active_count(), 2);
        assert_eq!(store.upserts(), 2);
    }

    #[tokio::test]
    async fn acquire_rotates_least_recently_used() {
        let (pool, _, _) = pool(
            vec![ep(1), ep(2)],
            vec![ep(1), ep(2)],
            ProxyPoolConfig {
                low_water_mark: 0,
                ..Default::default()
            },
        );
        pool.load().await.unwrap();

        let first = pool.acquire().await.unwrap();
        pool.report_success(&first).await;
        let second = pool.acquire().await.unwrap();
        assert_ne!(first, second, "released proxy goes to the back of the queue");
    }

    #[tokio::test]
    async fn retires_after_three_consecutive_failures() {
        let (pool, store, _) = pool(
            vec![ep(1)],
            vec![ep(1)],
            ProxyPoolConfig {
                low_water_mark: 0,
                retire_threshold: 3,
            },
        );
        pool.load().await.unwrap();

        for _ in 0..3 {
            let p = pool.acquire().await.unwrap();
            pool.report_failure(&p).await;
        }

        assert_eq!(pool.active_count(), 0);
        assert_eq!(store.retired(), vec![ep(1)]);
        assert!(pool.acquire().await.is_none());
    }

    #[tokio::test]
    async fn success_resets_the_failure_streak() {
        let (pool, store, _) = pool(
            vec![ep(1)],
            vec![ep(1)],
            ProxyPoolConfig {
                low_water_mark: 0,
                retire_threshold: 3,
            },
        );
        pool.load().await.unwrap();

        for _ in 0..2 {
            let p = pool.acquire().await.unwrap();
            pool.report_failure(&p).await;
        }
        let p = pool.acquire().await.unwrap();
        pool.report_success(&p).await;
        for _ in 0..2 {
            let p = pool.acquire().await.unwrap();
            pool.report_failure(&p).await;
        }

        assert_eq!(pool.active_count(), 1, "streak was reset, not retired");
        assert!(store.retired().is_empty());
    }

    #[tokio::test]
    async fn refresh_is_single_flight() {
        let (pool, _, source) = pool(
            vec![ep(1)],
            vec![ep(1)],
            ProxyPoolConfig {
                low_water_mark: 5,
                ..Default::default()
            },
        );

        // Pool empty and below low water: both acquires trigger the check,
        // only one refresh task may run.
        assert!(pool.acquire().await.is_none());
        assert!(pool.acquire().await.is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(source.loads(), 1);
        assert_eq!(pool.active_count(), 1);
    }
}
