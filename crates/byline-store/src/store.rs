use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use byline_core::models::{
    ArticleRecord, BlockReason, NewArticle, ProxyEndpoint, ProxyProtocol, ProxyRecord, SeedUrl,
    StoreMetrics, UrlOutcome, UrlRecord, UrlStatus,
};
use byline_core::traits::{ProxyStore, UrlStore};
use byline_core::AcquireError;

use crate::writer::{db_err, writer_loop, CommandOutput, WriteOp, WriteRequest};

/// Seed rows inserted per transaction, bounding what a crash can lose.
const SEED_CHUNK: usize = 100;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Reader pool size. The writer task owns its own connection from the
    /// same pool; readers never block it under WAL.
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub write_queue_capacity: usize,
    /// Queued write commands drained into one transaction per wake-up.
    pub write_batch_size: usize,
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            write_queue_capacity: 256,
            write_batch_size: 100,
        }
    }

    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self
    }

    pub fn with_write_batch_size(mut self, n: usize) -> Self {
        self.write_batch_size = n.max(1);
        self
    }
}

/// Central store facade — owns the connection pool, runs migrations, and
/// spawns the single writer task. Cloning shares the pool and the write
/// channel.
#[derive(Clone)]
pub struct StateStore {
    pool: SqlitePool,
    write_tx: mpsc::Sender<WriteRequest>,
    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl StateStore {
    /// Open (or create) the database, run migrations, start the writer.
    pub async fn open(config: StoreConfig) -> Result<Self, AcquireError> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .map_err(|e| AcquireError::Database(format!("Migration failed: {e}")))?;

        let (write_tx, write_rx) = mpsc::channel(config.write_queue_capacity);
        let writer = tokio::spawn(writer_loop(
            pool.clone(),
            write_rx,
            config.write_batch_size,
        ));

        Ok(Self {
            pool,
            write_tx,
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    /// Stop the writer after it drains accepted commands, then close the
    /// pool. Further writes through any clone fail with a channel error.
    pub async fn close(&self) -> Result<(), AcquireError> {
        let _ = self.submit(WriteOp::Shutdown).await;
        if let Some(handle) = self.writer.lock().await.take() {
            handle
                .await
                .map_err(|e| AcquireError::Channel(format!("writer join failed: {e}")))?;
        }
        self.pool.close().await;
        Ok(())
    }

    async fn submit(&self, op: WriteOp) -> Result<CommandOutput, AcquireError> {
        let (reply, rx) = oneshot::channel();
        self.write_tx
            .send(WriteRequest { op, reply })
            .await
            .map_err(|_| AcquireError::Channel("state writer is closed".into()))?;
        rx.await
            .map_err(|_| AcquireError::Channel("state writer dropped the reply".into()))?
    }

    /// Insert the article and flip its URL row to `success` in one
    /// transaction. A duplicate content hash becomes a `duplicate`
    /// transition instead.
    pub async fn record_success(
        &self,
        article: NewArticle,
        extractor_used: &str,
    ) -> Result<(), AcquireError> {
        UrlStore::record_outcome(self, UrlOutcome::success(article, extractor_used)).await
    }

    /// Record a classified failure, incrementing the attempt count.
    pub async fn record_failure(
        &self,
        normalized_url: &str,
        status: UrlStatus,
        block_reason: BlockReason,
        error_message: &str,
    ) -> Result<(), AcquireError> {
        UrlStore::record_outcome(
            self,
            UrlOutcome::failure(normalized_url, status, block_reason, error_message),
        )
        .await
    }

    // -- Readers (non-blocking against the writer under WAL) --

    pub async fn get_url(&self, normalized_url: &str) -> Result<Option<UrlRecord>, AcquireError> {
        let row = sqlx::query_as::<_, UrlRow>(
            r#"
            SELECT normalized_url, source, status, attempt_count, last_attempt_at,
                   error_message, extractor_used, block_reason,
                   gdelt_publish_date, gdelt_themes, gdelt_tone
            FROM urls WHERE normalized_url = ?1
            "#,
        )
        .bind(normalized_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    pub async fn get_article(
        &self,
        normalized_url: &str,
    ) -> Result<Option<ArticleRecord>, AcquireError> {
        let row = sqlx::query_as::<_, ArticleRow>(
            r#"
            SELECT article_id, normalized_url, source, headline, authors, publish_date,
                   publish_date_source, full_text, word_count, content_hash,
                   extraction_timestamp
            FROM articles WHERE normalized_url = ?1
            "#,
        )
        .bind(normalized_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Into::into))
    }

    pub async fn count_by_status(&self, status: UrlStatus) -> Result<i64, AcquireError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM urls WHERE status = ?1"#)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(count)
    }

    pub async fn article_count(&self) -> Result<i64, AcquireError> {
        let (count,): (i64,) = sqlx::query_as(r#"SELECT COUNT(*) FROM articles"#)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count)
    }

    async fn read_metrics(&self) -> Result<StoreMetrics, AcquireError> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r#"
            SELECT source, status, COUNT(*) FROM urls
            GROUP BY source, status
            ORDER BY source, status
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut counts = Vec::with_capacity(rows.len());
        for (source, status, count) in rows {
            let status = status
                .parse::<UrlStatus>()
                .map_err(AcquireError::Database)?;
            counts.push((source, status, count));
        }

        let range: Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> = sqlx::query_as(
            r#"SELECT MIN(publish_date), MAX(publish_date) FROM articles"#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        let (publish_date_min, publish_date_max) = range.unwrap_or((None, None));

        Ok(StoreMetrics {
            counts,
            publish_date_min,
            publish_date_max,
        })
    }
}

impl UrlStore for StateStore {
    async fn seed(&self, records: Vec<SeedUrl>) -> Result<usize, AcquireError> {
        let mut inserted = 0usize;
        for chunk in records.chunks(SEED_CHUNK) {
            match self.submit(WriteOp::Seed(chunk.to_vec())).await? {
                CommandOutput::Inserted(n) => inserted += n,
                _ => return Err(AcquireError::Channel("unexpected writer reply".into())),
            }
        }
        Ok(inserted)
    }

    async fn reset_in_flight(&self) -> Result<u64, AcquireError> {
        match self.submit(WriteOp::ResetInFlight).await? {
            CommandOutput::Reset(n) => Ok(n),
            _ => Err(AcquireError::Channel("unexpected writer reply".into())),
        }
    }

    async fn claim_next(&self, limit: usize) -> Result<Vec<UrlRecord>, AcquireError> {
        match self.submit(WriteOp::Claim(limit)).await? {
            CommandOutput::Claimed(rows) => Ok(rows),
            _ => Err(AcquireError::Channel("unexpected writer reply".into())),
        }
    }

    async fn record_outcome(&self, outcome: UrlOutcome) -> Result<(), AcquireError> {
        self.submit(WriteOp::Outcome(outcome)).await.map(|_| ())
    }

    async fn metrics(&self) -> Result<StoreMetrics, AcquireError> {
        self.read_metrics().await
    }
}

impl ProxyStore for StateStore {
    async fn proxy_upsert(
        &self,
        endpoint: ProxyEndpoint,
        validated_at: DateTime<Utc>,
    ) -> Result<(), AcquireError> {
        self.submit(WriteOp::ProxyUpsert(endpoint, validated_at))
            .await
            .map(|_| ())
    }

    async fn proxy_record_outcome(
        &self,
        endpoint: ProxyEndpoint,
        success: bool,
    ) -> Result<(), AcquireError> {
        self.submit(WriteOp::ProxyOutcome(endpoint, success))
            .await
            .map(|_| ())
    }

    async fn list_active_proxies(&self) -> Result<Vec<ProxyRecord>, AcquireError> {
        let rows = sqlx::query_as::<_, ProxyRow>(
            r#"
            SELECT host, port, protocol, last_validated_at, success_count,
                   consecutive_failure_count, is_active
            FROM proxies WHERE is_active = 1
            ORDER BY last_validated_at
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn retire_proxy(&self, endpoint: ProxyEndpoint) -> Result<(), AcquireError> {
        self.submit(WriteOp::RetireProxy(endpoint)).await.map(|_| ())
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
pub(crate) struct UrlRow {
    normalized_url: String,
    source: String,
    status: String,
    attempt_count: i64,
    last_attempt_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    extractor_used: Option<String>,
    block_reason: Option<String>,
    gdelt_publish_date: Option<DateTime<Utc>>,
    gdelt_themes: Option<String>,
    gdelt_tone: Option<String>,
}

impl From<UrlRow> for UrlRecord {
    fn from(row: UrlRow) -> Self {
        UrlRecord {
            normalized_url: row.normalized_url,
            source: row.source,
            status: row.status.parse().unwrap_or(UrlStatus::Pending),
            attempt_count: row.attempt_count.max(0) as u32,
            last_attempt_at: row.last_attempt_at,
            error_message: row.error_message,
            extractor_used: row.extractor_used,
            block_reason: row.block_reason.and_then(|r| r.parse().ok()),
            gdelt_publish_date: row.gdelt_publish_date,
            gdelt_themes: row.gdelt_themes,
            gdelt_tone: row.gdelt_tone,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ArticleRow {
    article_id: i64,
    normalized_url: String,
    source: String,
    headline: Option<String>,
    authors: Option<String>,
    publish_date: Option<DateTime<Utc>>,
    publish_date_source: Option<String>,
    full_text: String,
    word_count: i64,
    content_hash: String,
    extraction_timestamp: DateTime<Utc>,
}

impl From<ArticleRow> for ArticleRecord {
    fn from(row: ArticleRow) -> Self {
        ArticleRecord {
            article_id: row.article_id,
            normalized_url: row.normalized_url,
            source: row.source,
            headline: row.headline,
            authors: row.authors,
            publish_date: row.publish_date,
            publish_date_source: row.publish_date_source,
            full_text: row.full_text,
            word_count: row.word_count.max(0) as u32,
            content_hash: row.content_hash,
            extraction_timestamp: row.extraction_timestamp,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProxyRow {
    host: String,
    port: i64,
    protocol: String,
    last_validated_at: Option<DateTime<Utc>>,
    success_count: i64,
    consecutive_failure_count: i64,
    is_active: bool,
}

impl From<ProxyRow> for ProxyRecord {
    fn from(row: ProxyRow) -> Self {
        ProxyRecord {
            host: row.host,
            port: row.port.clamp(0, u16::MAX as i64) as u16,
            protocol: row.protocol.parse().unwrap_or(ProxyProtocol::Http),
            last_validated_at: row.last_validated_at,
            success_count: row.success_count.max(0) as u32,
            consecutive_failure_count: row.consecutive_failure_count.max(0) as u32,
            is_active: row.is_active,
        }
    }
}
