use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use byline_client::{
    BrowserPool, BrowserPoolConfig, BrowserPoolHandle, FileProxySource, HttpFetcher,
    PrimaryExtractor, ReqwestProxyValidator, SecondaryExtractor,
};
use byline_core::cascade::Cascade;
use byline_core::orchestrator::Orchestrator;
use byline_core::proxy::{ProxyPool, ProxyPoolConfig};
use byline_core::traits::UrlStore;
use byline_core::{AcquireConfig, StoreMetrics, UrlStatus};
use byline_store::{StateStore, StoreConfig};

mod seed_file;

#[derive(Parser)]
#[command(name = "byline", version, about = "News-article corpus acquisition pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seed the URL store from an upstream discovery export
    Seed {
        /// Tab-separated export with url, publish_date, source, themes,
        /// tone_scores columns
        #[arg(short, long)]
        input: PathBuf,

        /// State database path
        #[arg(short, long, env = "BYLINE_DB", default_value = "byline.db")]
        db: PathBuf,
    },

    /// Process all pending URLs to completion
    Run {
        /// State database path
        #[arg(short, long, env = "BYLINE_DB", default_value = "byline.db")]
        db: PathBuf,

        /// Primary worker pool size
        #[arg(long, env = "BYLINE_WORKERS", default_value_t = 20)]
        workers: usize,

        /// Concurrent headless-browser contexts
        #[arg(long, default_value_t = 3)]
        browser_pool_size: usize,

        /// Disable the headless-browser fallback entirely
        #[arg(long, default_value_t = false)]
        no_browser: bool,

        /// Proxy list file (one protocol://host:port per line); contexts
        /// require a proxy when this is set
        #[arg(long)]
        proxies: Option<PathBuf>,

        /// Acceptance floor for extracted text, in characters
        #[arg(long, default_value_t = 300)]
        min_text_length: usize,

        /// Fetch attempts per URL, including the first
        #[arg(long, default_value_t = 3)]
        max_attempts: u32,

        /// Seconds granted to in-flight workers on shutdown
        #[arg(long, default_value_t = 30)]
        grace_shutdown_seconds: u64,
    },

    /// Print the (source, status) summary for a state database
    Status {
        /// State database path
        #[arg(short, long, env = "BYLINE_DB", default_value = "byline.db")]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("byline=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Seed { input, db } => cmd_seed(input, db).await,
        Commands::Run {
            db,
            workers,
            browser_pool_size,
            no_browser,
            proxies,
            min_text_length,
            max_attempts,
            grace_shutdown_seconds,
        } => {
            let config = AcquireConfig::default()
                .with_worker_count(workers)
                .with_min_text_length(min_text_length)
                .with_max_attempts(max_attempts)
                .with_grace_shutdown(Duration::from_secs(grace_shutdown_seconds));
            cmd_run(db, config, browser_pool_size, no_browser, proxies).await
        }
        Commands::Status { db } => cmd_status(db).await,
    }
}

async fn cmd_seed(input: PathBuf, db: PathBuf) -> Result<()> {
    let loaded = seed_file::load(&input)
        .await
        .with_context(|| format!("failed to load seed file {}", input.display()))?;
    println!(
        "Read {} rows: {} allowlisted, {} discarded",
        loaded.read,
        loaded.records.len(),
        loaded.read - loaded.records.len()
    );

    let store = open_store(&db).await?;
    let inserted = store
        .seed(loaded.records)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    store.close().await.map_err(|e| anyhow::anyhow!(e))?;

    println!("Seeded {inserted} new URLs into {}", db.display());
    Ok(())
}

async fn cmd_run(
    db: PathBuf,
    config: AcquireConfig,
    browser_pool_size: usize,
    no_browser: bool,
    proxies: Option<PathBuf>,
) -> Result<()> {
    let store = open_store(&db).await?;
    let config = Arc::new(config);

    let fetcher = HttpFetcher::new(&config).map_err(|e| anyhow::anyhow!(e))?;

    let browser: Option<BrowserPoolHandle> = if no_browser {
        None
    } else {
        let proxy_pool = match &proxies {
            Some(path) => {
                let pool = ProxyPool::new(
                    store.clone(),
                    FileProxySource::new(path),
                    ReqwestProxyValidator::new(),
                    ProxyPoolConfig::default(),
                );
                let admitted = pool.load().await.map_err(|e| anyhow::anyhow!(e))?;
                tracing::info!(admitted, "Proxy pool ready");
                Some(pool)
            }
            None => None,
        };

        let browser_config = BrowserPoolConfig::default()
            .with_pool_size(browser_pool_size)
            .with_fetch_timeout(config.browser_timeout)
            .with_require_proxy(proxy_pool.is_some());
        Some(BrowserPool::spawn(browser_config, proxy_pool).map_err(|e| anyhow::anyhow!(e))?)
    };

    let cascade = Cascade::new(
        fetcher,
        Arc::new(PrimaryExtractor::new()),
        Arc::new(SecondaryExtractor::new()),
        browser.clone(),
        Arc::clone(&config),
    );
    let orchestrator = Orchestrator::new(store.clone(), cascade, Arc::clone(&config));

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received");
        token.cancel();
    });

    let metrics = orchestrator.run(cancel).await.map_err(|e| anyhow::anyhow!(e))?;

    if let Some(browser) = browser {
        browser.close().await;
    }
    store.close().await.map_err(|e| anyhow::anyhow!(e))?;

    print_metrics(&metrics);
    Ok(())
}

async fn cmd_status(db: PathBuf) -> Result<()> {
    let store = open_store(&db).await?;
    let metrics = store.metrics().await.map_err(|e| anyhow::anyhow!(e))?;
    store.close().await.map_err(|e| anyhow::anyhow!(e))?;
    print_metrics(&metrics);
    Ok(())
}

async fn open_store(db: &PathBuf) -> Result<StateStore> {
    StateStore::open(StoreConfig::new(db))
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("failed to open state store {}", db.display()))
}

fn print_metrics(metrics: &StoreMetrics) {
    if metrics.counts.is_empty() {
        println!("Store is empty.");
        return;
    }

    println!("{:<20} {:<20} {:>8}", "SOURCE", "STATUS", "COUNT");
    println!("{}", "-".repeat(50));
    for (source, status, count) in &metrics.counts {
        println!("{source:<20} {:<20} {count:>8}", status.to_string());
    }
    println!("{}", "-".repeat(50));
    println!(
        "Total: {}   Success: {} ({:.1}%)",
        metrics.total(),
        metrics.count_for(UrlStatus::Success),
        metrics.success_rate() * 100.0
    );
    if let (Some(min), Some(max)) = (metrics.publish_date_min, metrics.publish_date_max) {
        println!(
            "Publish dates: {} .. {}",
            min.format("%Y-%m-%d"),
            max.format("%Y-%m-%d")
        );
    }
}
