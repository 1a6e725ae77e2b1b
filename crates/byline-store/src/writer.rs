//! The single writer task.
//!
//! All mutations flow through one bounded channel into this task; nothing
//! else holds a write handle. Each request carries a oneshot reply that is
//! resolved only after COMMIT, so durability is observable. The writer
//! drains up to a batch of queued requests per wake-up and runs them inside
//! one transaction; if the batch transaction fails, the requests are
//! replayed individually so a poisoned command cannot wedge the queue.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tokio::sync::{mpsc, oneshot};

use byline_core::models::{ProxyEndpoint, SeedUrl, UrlOutcome, UrlRecord, UrlStatus};
use byline_core::AcquireError;

use crate::store::UrlRow;

pub(crate) struct WriteRequest {
    pub op: WriteOp,
    pub reply: oneshot::Sender<Result<CommandOutput, AcquireError>>,
}

pub(crate) enum WriteOp {
    Seed(Vec<SeedUrl>),
    ResetInFlight,
    Claim(usize),
    Outcome(UrlOutcome),
    ProxyUpsert(ProxyEndpoint, DateTime<Utc>),
    ProxyOutcome(ProxyEndpoint, bool),
    RetireProxy(ProxyEndpoint),
    Shutdown,
}

pub(crate) enum CommandOutput {
    Inserted(usize),
    Reset(u64),
    Claimed(Vec<UrlRecord>),
    Done,
}

pub(crate) async fn writer_loop(
    pool: SqlitePool,
    mut rx: mpsc::Receiver<WriteRequest>,
    batch_size: usize,
) {
    let mut buf: Vec<WriteRequest> = Vec::with_capacity(batch_size);
    loop {
        buf.clear();
        let received = rx.recv_many(&mut buf, batch_size.max(1)).await;
        if received == 0 {
            break;
        }
        let shutdown = buf.iter().any(|r| matches!(r.op, WriteOp::Shutdown));
        process_batch(&pool, buf.drain(..).collect()).await;
        if shutdown {
            break;
        }
    }
    tracing::debug!("State writer stopped");
}

async fn process_batch(pool: &SqlitePool, requests: Vec<WriteRequest>) {
    if requests.len() == 1 {
        for request in requests {
            run_single(pool, request).await;
        }
        return;
    }

    match run_in_one_tx(pool, &requests).await {
        Ok(outputs) => {
            for (request, output) in requests.into_iter().zip(outputs) {
                let _ = request.reply.send(Ok(output));
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Batched write failed; replaying commands individually");
            for request in requests {
                run_single(pool, request).await;
            }
        }
    }
}

async fn run_in_one_tx(
    pool: &SqlitePool,
    requests: &[WriteRequest],
) -> Result<Vec<CommandOutput>, AcquireError> {
    let mut tx = pool.begin().await.map_err(db_err)?;
    let mut outputs = Vec::with_capacity(requests.len());
    for request in requests {
        outputs.push(apply_op(&mut tx, &request.op).await?);
    }
    tx.commit().await.map_err(db_err)?;
    Ok(outputs)
}

async fn run_single(pool: &SqlitePool, request: WriteRequest) {
    let result = async {
        let mut tx = pool.begin().await.map_err(db_err)?;
        let output = apply_op(&mut tx, &request.op).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(output)
    }
    .await;
    let _ = request.reply.send(result);
}

async fn apply_op(
    tx: &mut Transaction<'_, Sqlite>,
    op: &WriteOp,
) -> Result<CommandOutput, AcquireError> {
    match op {
        WriteOp::Seed(rows) => {
            let mut inserted = 0usize;
            for row in rows {
                let result = sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO urls
                        (normalized_url, source, status, attempt_count,
                         gdelt_publish_date, gdelt_themes, gdelt_tone)
                    VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?5)
                    "#,
                )
                .bind(&row.normalized_url)
                .bind(&row.source)
                .bind(row.gdelt_publish_date)
                .bind(&row.gdelt_themes)
                .bind(&row.gdelt_tone)
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
                inserted += result.rows_affected() as usize;
            }
            Ok(CommandOutput::Inserted(inserted))
        }

        WriteOp::ResetInFlight => {
            let result = sqlx::query(
                r#"UPDATE urls SET status = 'pending' WHERE status = 'processing'"#,
            )
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
            Ok(CommandOutput::Reset(result.rows_affected()))
        }

        WriteOp::Claim(limit) => {
            // Single statement: the read and the status flip cannot be
            // observed separately.
            let rows = sqlx::query_as::<_, UrlRow>(
                r#"
                UPDATE urls SET status = 'processing'
                WHERE normalized_url IN (
                    SELECT normalized_url FROM urls WHERE status = 'pending' LIMIT ?1
                )
                RETURNING normalized_url, source, status, attempt_count, last_attempt_at,
                          error_message, extractor_used, block_reason,
                          gdelt_publish_date, gdelt_themes, gdelt_tone
                "#,
            )
            .bind(*limit as i64)
            .fetch_all(&mut **tx)
            .await
            .map_err(db_err)?;
            Ok(CommandOutput::Claimed(
                rows.into_iter().map(Into::into).collect(),
            ))
        }

        WriteOp::Outcome(outcome) => {
            apply_outcome(tx, outcome).await?;
            Ok(CommandOutput::Done)
        }

        WriteOp::ProxyUpsert(endpoint, validated_at) => {
            sqlx::query(
                r#"
                INSERT INTO proxies (host, port, protocol, last_validated_at, is_active)
                VALUES (?1, ?2, ?3, ?4, 1)
                ON CONFLICT (host, port) DO UPDATE SET
                    protocol = excluded.protocol,
                    last_validated_at = excluded.last_validated_at,
                    consecutive_failure_count = 0,
                    is_active = 1
                "#,
            )
            .bind(&endpoint.host)
            .bind(endpoint.port as i64)
            .bind(endpoint.protocol.as_str())
            .bind(validated_at)
            .execute(&mut **tx)
            .await
            .map_err(db_err)?;
            Ok(CommandOutput::Done)
        }

        WriteOp::ProxyOutcome(endpoint, success) => {
            let sql = if *success {
                r#"UPDATE proxies
                   SET success_count = success_count + 1, consecutive_failure_count = 0
                   WHERE host = ?1 AND port = ?2"#
            } else {
                r#"UPDATE proxies
                   SET consecutive_failure_count = consecutive_failure_count + 1
                   WHERE host = ?1 AND port = ?2"#
            };
            sqlx::query(sql)
                .bind(&endpoint.host)
                .bind(endpoint.port as i64)
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
            Ok(CommandOutput::Done)
        }

        WriteOp::RetireProxy(endpoint) => {
            sqlx::query(r#"UPDATE proxies SET is_active = 0 WHERE host = ?1 AND port = ?2"#)
                .bind(&endpoint.host)
                .bind(endpoint.port as i64)
                .execute(&mut **tx)
                .await
                .map_err(db_err)?;
            Ok(CommandOutput::Done)
        }

        WriteOp::Shutdown => Ok(CommandOutput::Done),
    }
}

/// Persist one terminal outcome. A success whose content hash already
/// exists in `articles` becomes a `duplicate` transition instead — the
/// conflict never surfaces to the worker.
async fn apply_outcome(
    tx: &mut Transaction<'_, Sqlite>,
    outcome: &UrlOutcome,
) -> Result<(), AcquireError> {
    let now = Utc::now();

    if let (UrlStatus::Success, Some(article)) = (outcome.status, &outcome.article) {
        let existing: Option<(i64,)> =
            sqlx::query_as(r#"SELECT article_id FROM articles WHERE content_hash = ?1"#)
                .bind(&article.content_hash)
                .fetch_optional(&mut **tx)
                .await
                .map_err(db_err)?;

        if let Some((article_id,)) = existing {
            return update_url_row(
                tx,
                &outcome.normalized_url,
                UrlStatus::Duplicate,
                Some(format!("content duplicate of article {article_id}")),
                None,
                outcome.extractor_used.as_deref(),
                now,
            )
            .await;
        }

        sqlx::query(
            r#"
            INSERT INTO articles
                (normalized_url, source, headline, authors, publish_date,
                 publish_date_source, full_text, word_count, content_hash,
                 extraction_timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&article.normalized_url)
        .bind(&article.source)
        .bind(&article.headline)
        .bind(join_authors(&article.authors))
        .bind(article.publish_date)
        .bind(article.publish_date_source.map(|s| s.as_str()))
        .bind(&article.full_text)
        .bind(article.word_count as i64)
        .bind(&article.content_hash)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;

        return update_url_row(
            tx,
            &outcome.normalized_url,
            UrlStatus::Success,
            outcome.error_message.clone(),
            None,
            outcome.extractor_used.as_deref(),
            now,
        )
        .await;
    }

    update_url_row(
        tx,
        &outcome.normalized_url,
        outcome.status,
        outcome.error_message.clone(),
        outcome.block_reason.map(|r| r.as_str().to_string()),
        outcome.extractor_used.as_deref(),
        now,
    )
    .await
}

async fn update_url_row(
    tx: &mut Transaction<'_, Sqlite>,
    normalized_url: &str,
    status: UrlStatus,
    error_message: Option<String>,
    block_reason: Option<String>,
    extractor_used: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), AcquireError> {
    sqlx::query(
        r#"
        UPDATE urls SET
            status = ?1,
            error_message = ?2,
            block_reason = ?3,
            extractor_used = ?4,
            attempt_count = attempt_count + 1,
            last_attempt_at = ?5
        WHERE normalized_url = ?6
        "#,
    )
    .bind(status.as_str())
    .bind(error_message)
    .bind(block_reason)
    .bind(extractor_used)
    .bind(now)
    .bind(normalized_url)
    .execute(&mut **tx)
    .await
    .map_err(db_err)?;
    Ok(())
}

fn join_authors(authors: &[String]) -> Option<String> {
    if authors.is_empty() {
        None
    } else {
        Some(authors.join(";"))
    }
}

pub(crate) fn db_err(e: sqlx::Error) -> AcquireError {
    AcquireError::Database(e.to_string())
}
