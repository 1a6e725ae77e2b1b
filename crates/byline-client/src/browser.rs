//! Bounded pool of headless-browser contexts.
//!
//! Headless Chromium is driven by an event loop, so the pool runs on its
//! own OS thread with a single-threaded tokio runtime, decoupled from the
//! primary worker pool. Workers cross over through a bounded channel and
//! suspend on a oneshot reply.
//!
//! Each context is one Chromium process paired with exactly one proxy at
//! creation (`--proxy-server`), which gives it an isolated cookie jar and
//! session state — two concurrent fetches never share cookies. Contexts
//! are created lazily up to the pool size and reused; any fetch error
//! tears the context down and the next request builds a fresh one with a
//! fresh proxy.

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::thread;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use byline_core::models::ProxyEndpoint;
use byline_core::traits::{BrowserFetcher, ProxyProvider};
use byline_core::AcquireError;

#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    /// Concurrent browser contexts. Each costs roughly 100–150 MB.
    pub pool_size: usize,
    /// Navigation-to-content timeout per fetch.
    pub fetch_timeout: Duration,
    /// Refuse to build a context without a proxy. Leave off for runs
    /// without a proxy list.
    pub require_proxy: bool,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            fetch_timeout: Duration::from_secs(30),
            require_proxy: false,
        }
    }
}

impl BrowserPoolConfig {
    pub fn with_pool_size(mut self, n: usize) -> Self {
        self.pool_size = n.max(1);
        self
    }

    pub fn with_fetch_timeout(mut self, t: Duration) -> Self {
        self.fetch_timeout = t;
        self
    }

    pub fn with_require_proxy(mut self, required: bool) -> Self {
        self.require_proxy = required;
        self
    }
}

struct FetchJob {
    url: String,
    reply: oneshot::Sender<Result<String, AcquireError>>,
}

pub struct BrowserPool;

impl BrowserPool {
    /// Start the pool's scheduler thread. `proxies` is the health-tracked
    /// pool contexts draw from; `None` runs contexts without proxies.
    pub fn spawn<P>(
        config: BrowserPoolConfig,
        proxies: Option<P>,
    ) -> Result<BrowserPoolHandle, AcquireError>
    where
        P: ProxyProvider + 'static,
    {
        let (tx, rx) = mpsc::channel::<FetchJob>(64);
        let cancel = CancellationToken::new();
        let cancel_for_thread = cancel.clone();

        let thread = thread::Builder::new()
            .name("browser-pool".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to build browser-pool runtime");
                        return;
                    }
                };
                runtime.block_on(dispatch_loop(rx, config, proxies, cancel_for_thread));
            })
            .map_err(|e| AcquireError::BrowserUnavailable(e.to_string()))?;

        Ok(BrowserPoolHandle {
            tx,
            cancel,
            thread: Arc::new(StdMutex::new(Some(thread))),
        })
    }
}

/// Cloneable cross-scheduler handle; the single entry point is
/// [`BrowserFetcher::fetch_rendered`].
#[derive(Clone)]
pub struct BrowserPoolHandle {
    tx: mpsc::Sender<FetchJob>,
    cancel: CancellationToken,
    thread: Arc<StdMutex<Option<thread::JoinHandle<()>>>>,
}

impl BrowserPoolHandle {
    /// Quit all contexts and join the scheduler thread. Idempotent.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.thread.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = handle.join();
            })
            .await;
        }
    }
}

impl BrowserFetcher for BrowserPoolHandle {
    async fn fetch_rendered(&self, url: &str) -> Result<String, AcquireError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(FetchJob {
                url: url.to_string(),
                reply,
            })
            .await
            .map_err(|_| AcquireError::BrowserUnavailable("browser pool is closed".into()))?;
        rx.await
            .map_err(|_| AcquireError::BrowserUnavailable("browser pool dropped request".into()))?
    }
}

async fn dispatch_loop<P>(
    mut rx: mpsc::Receiver<FetchJob>,
    config: BrowserPoolConfig,
    proxies: Option<P>,
    cancel: CancellationToken,
) where
    P: ProxyProvider + 'static,
{
    let idle: Arc<Mutex<Vec<BrowserContext>>> = Arc::new(Mutex::new(Vec::new()));
    let permits = Arc::new(Semaphore::new(config.pool_size));
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            job = rx.recv() => match job {
                Some(job) => {
                    let idle = Arc::clone(&idle);
                    let permits = Arc::clone(&permits);
                    let proxies = proxies.clone();
                    let config = config.clone();
                    in_flight.spawn(serve_job(job, idle, permits, proxies, config));
                }
                None => break,
            },
            () = cancel.cancelled() => break,
        }
    }

    // Let in-flight fetches finish — their own timeouts bound this — then
    // quit every context so no browser process outlives the pool.
    let drain = async {
        while in_flight.join_next().await.is_some() {}
    };
    if tokio::time::timeout(config.fetch_timeout + Duration::from_secs(5), drain)
        .await
        .is_err()
    {
        in_flight.shutdown().await;
    }

    let mut contexts = idle.lock().await;
    for context in contexts.drain(..) {
        context.teardown().await;
    }
    tracing::debug!("Browser pool stopped");
}

async fn serve_job<P>(
    job: FetchJob,
    idle: Arc<Mutex<Vec<BrowserContext>>>,
    permits: Arc<Semaphore>,
    proxies: Option<P>,
    config: BrowserPoolConfig,
) where
    P: ProxyProvider + 'static,
{
    let Ok(_permit) = permits.acquire_owned().await else {
        let _ = job
            .reply
            .send(Err(AcquireError::BrowserUnavailable("pool closed".into())));
        return;
    };

    let existing = idle.lock().await.pop();
    let mut context = match existing {
        Some(context) => context,
        None => {
            let created = tokio::time::timeout(
                config.fetch_timeout,
                BrowserContext::create(&config, proxies.as_ref()),
            )
            .await
            .unwrap_or(Err(AcquireError::Timeout(config.fetch_timeout.as_secs())));
            match created {
                Ok(context) => context,
                Err(e) => {
                    let _ = job.reply.send(Err(e));
                    return;
                }
            }
        }
    };

    match context.fetch(&job.url, config.fetch_timeout).await {
        Ok(html) => {
            if let (Some(pool), Some(endpoint)) = (&proxies, &context.proxy) {
                pool.report_success(endpoint).await;
            }
            idle.lock().await.push(context);
            let _ = job.reply.send(Ok(html));
        }
        Err(e) => {
            // Any error may have corrupted context state: tear down and
            // let the next request build a fresh context + proxy.
            if let (Some(pool), Some(endpoint)) = (&proxies, &context.proxy) {
                pool.report_failure(endpoint).await;
            }
            tracing::warn!(url = %job.url, error = %e, "Browser context failed, recycling");
            context.teardown().await;
            let _ = job.reply.send(Err(e));
        }
    }
}

/// One headless Chromium process plus its CDP handler task and paired proxy.
struct BrowserContext {
    browser: Browser,
    handler: JoinHandle<()>,
    proxy: Option<ProxyEndpoint>,
}

impl BrowserContext {
    async fn create<P>(
        config: &BrowserPoolConfig,
        proxies: Option<&P>,
    ) -> Result<Self, AcquireError>
    where
        P: ProxyProvider,
    {
        let proxy = match proxies {
            Some(pool) => {
                let leased = pool.acquire().await;
                if leased.is_none() && config.require_proxy {
                    return Err(AcquireError::ProxyExhausted);
                }
                leased
            }
            None => None,
        };

        let mut builder = BrowserConfig::builder().no_sandbox();
        if let Some(bin) = find_chrome_binary() {
            builder = builder.chrome_executable(bin);
        }
        if let Some(endpoint) = &proxy {
            builder = builder.arg(format!("--proxy-server={}", endpoint.url()));
        }
        let browser_config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AcquireError::BrowserUnavailable(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| AcquireError::BrowserUnavailable(format!("launch failed: {e}")))?;

        // The CDP handler must be polled continuously for the connection
        // to work.
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    tracing::warn!("Browser CDP handler error: {event:?}");
                    break;
                }
            }
        });

        tracing::debug!(proxy = ?proxy.as_ref().map(|p| p.to_string()), "Browser context created");
        Ok(Self {
            browser,
            handler,
            proxy,
        })
    }

    async fn fetch(&mut self, url: &str, timeout: Duration) -> Result<String, AcquireError> {
        let result = tokio::time::timeout(timeout, async {
            let page = self.browser.new_page(url).await.map_err(|e| {
                AcquireError::BrowserUnavailable(format!("failed to navigate to {url}: {e}"))
            })?;

            // <body> present is the minimal signal that the page rendered
            // its main content.
            page.find_element("body").await.map_err(|e| {
                AcquireError::BrowserUnavailable(format!("page did not render body: {e}"))
            })?;

            let html = page.content().await.map_err(|e| {
                AcquireError::BrowserUnavailable(format!("failed to read page content: {e}"))
            })?;

            let _ = page.close().await;
            Ok::<String, AcquireError>(html)
        })
        .await;

        match result {
            Ok(inner) => inner,
            Err(_) => Err(AcquireError::Timeout(timeout.as_secs())),
        }
    }

    /// Quit the browser process and stop the handler. Called on every
    /// error path and at pool shutdown — leaked Chromium processes are a
    /// correctness bug.
    async fn teardown(mut self) {
        let _ = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

/// Locate a usable Chrome/Chromium binary, honouring `CHROME_BIN` first
/// and falling back to chromiumoxide's own lookup when nothing matches.
fn find_chrome_binary() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROME_BIN") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }
    let candidates: &[&str] = &[
        "/usr/bin/google-chrome-stable",
        "/usr/bin/google-chrome",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
    ];
    candidates.iter().map(PathBuf::from).find(|p| p.exists())
}
