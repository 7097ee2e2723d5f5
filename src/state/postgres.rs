/// PostgreSQL store implementations.
///
/// All queries use sqlx runtime-checked queries (not compile-time checked)
/// to avoid requiring a live database during development builds. Batch
/// promotion uses `FOR UPDATE SKIP LOCKED` so concurrent workers never
/// select overlapping rows.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cid::Cid;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::models::{Anchor, ChainTransaction, Request, RequestStatus};
use super::{AnchorStore, BatchPolicy, RequestStore, RequestUpdate, TransactionStore};
use crate::clock::Clock;
use crate::error::{AnchorError, Result};

const ATTEMPTS_EXHAUSTED_MESSAGE: &str = "Anchor attempts exhausted";

fn db_err(e: sqlx::Error) -> AnchorError {
    AnchorError::Database(e.to_string())
}

#[derive(Debug, FromRow)]
struct RequestRow {
    id: Uuid,
    cid: String,
    stream_id: String,
    status: RequestStatus,
    message: Option<String>,
    pinned: bool,
    attempts: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RequestRow> for Request {
    type Error = AnchorError;

    fn try_from(row: RequestRow) -> Result<Request> {
        let cid = Cid::try_from(row.cid.as_str())
            .map_err(|e| AnchorError::InvalidCid(format!("{}: {e}", row.cid)))?;
        Ok(Request {
            id: row.id,
            cid,
            stream_id: row.stream_id,
            status: row.status,
            message: row.message,
            pinned: row.pinned,
            attempts: row.attempts,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_requests(rows: Vec<RequestRow>) -> Result<Vec<Request>> {
    rows.into_iter().map(Request::try_from).collect()
}

#[derive(Debug, FromRow)]
struct AnchorRow {
    id: Uuid,
    request_id: Uuid,
    proof_cid: String,
    path: String,
    cid: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AnchorRow> for Anchor {
    type Error = AnchorError;

    fn try_from(row: AnchorRow) -> Result<Anchor> {
        let proof_cid = Cid::try_from(row.proof_cid.as_str())
            .map_err(|e| AnchorError::InvalidCid(format!("{}: {e}", row.proof_cid)))?;
        let cid = Cid::try_from(row.cid.as_str())
            .map_err(|e| AnchorError::InvalidCid(format!("{}: {e}", row.cid)))?;
        Ok(Anchor {
            id: row.id,
            request_id: row.request_id,
            proof_cid,
            path: row.path,
            cid,
            created_at: row.created_at,
        })
    }
}

/// Request store backed by the `requests` table.
pub struct PgRequestStore {
    pool: PgPool,
    policy: BatchPolicy,
    clock: Arc<dyn Clock>,
}

impl PgRequestStore {
    pub fn new(pool: PgPool, policy: BatchPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            policy,
            clock,
        }
    }
}

#[async_trait]
impl RequestStore for PgRequestStore {
    async fn create_or_update(&self, request: &Request) -> Result<Request> {
        let row: RequestRow = sqlx::query_as(
            r#"
            INSERT INTO requests (id, cid, stream_id, status, message, pinned, attempts, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (cid) DO UPDATE
            SET stream_id = EXCLUDED.stream_id, updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(request.id)
        .bind(request.cid.to_string())
        .bind(&request.stream_id)
        .bind(request.status)
        .bind(&request.message)
        .bind(request.pinned)
        .bind(request.attempts)
        .bind(request.created_at)
        .bind(self.clock.now())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.try_into()
    }

    async fn find_by_cid(&self, cid: &Cid) -> Result<Option<Request>> {
        let row: Option<RequestRow> = sqlx::query_as("SELECT * FROM requests WHERE cid = $1")
            .bind(cid.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.map(Request::try_from).transpose()
    }

    async fn find_by_status(&self, status: RequestStatus) -> Result<Vec<Request>> {
        let rows: Vec<RequestRow> = sqlx::query_as(
            "SELECT * FROM requests WHERE status = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(status)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        into_requests(rows)
    }

    async fn count_by_status(&self, status: RequestStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests WHERE status = $1")
            .bind(status)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(count as u64)
    }

    async fn find_and_mark_ready(&self, limit: usize) -> Result<Vec<Request>> {
        let now = self.clock.now();
        let stale_cutoff = now - self.policy.ready_retry_interval;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Stuck PROCESSING rows past the attempts ceiling are failed.
        sqlx::query(
            r#"
            UPDATE requests SET status = $1, message = $2, updated_at = $3
            WHERE id IN (
                SELECT id FROM requests
                WHERE status = $4 AND updated_at < $5 AND attempts >= $6
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(RequestStatus::Failed)
        .bind(ATTEMPTS_EXHAUSTED_MESSAGE)
        .bind(now)
        .bind(RequestStatus::Processing)
        .bind(stale_cutoff)
        .bind(self.policy.max_anchor_attempts)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        // Stale READY rows are re-batched; retryable PROCESSING rows are
        // returned to READY.
        let stale: Vec<RequestRow> = sqlx::query_as(
            r#"
            UPDATE requests SET status = $1, updated_at = $2
            WHERE id IN (
                SELECT id FROM requests
                WHERE (status = $1 OR status = $3) AND updated_at < $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(RequestStatus::Ready)
        .bind(now)
        .bind(RequestStatus::Processing)
        .bind(stale_cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        let pending_streams: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT stream_id) FROM requests WHERE status = $1",
        )
        .bind(RequestStatus::Pending)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let mut promoted: Vec<RequestRow> = Vec::new();
        if pending_streams as usize >= self.policy.min_stream_count && pending_streams > 0 {
            promoted = if limit == 0 {
                sqlx::query_as(
                    r#"
                    UPDATE requests SET status = $1, updated_at = $2
                    WHERE id IN (
                        SELECT id FROM requests WHERE status = $3
                        FOR UPDATE SKIP LOCKED
                    )
                    RETURNING *
                    "#,
                )
                .bind(RequestStatus::Ready)
                .bind(now)
                .bind(RequestStatus::Pending)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_err)?
            } else {
                sqlx::query_as(
                    r#"
                    UPDATE requests SET status = $1, updated_at = $2
                    WHERE id IN (
                        SELECT id FROM requests
                        WHERE status = $3 AND stream_id IN (
                            SELECT stream_id FROM requests
                            WHERE status = $3
                            GROUP BY stream_id
                            ORDER BY MIN(created_at) ASC, stream_id ASC
                            LIMIT $4
                        )
                        FOR UPDATE SKIP LOCKED
                    )
                    RETURNING *
                    "#,
                )
                .bind(RequestStatus::Ready)
                .bind(now)
                .bind(RequestStatus::Pending)
                .bind(limit as i64)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_err)?
            };
        }

        tx.commit().await.map_err(db_err)?;

        let mut batch = into_requests(stale)?;
        batch.extend(into_requests(promoted)?);
        batch.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(batch)
    }

    async fn update_requests(&self, update: &RequestUpdate, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            r#"
            UPDATE requests
            SET status = $1,
                message = COALESCE($2, message),
                pinned = COALESCE($3, pinned),
                attempts = attempts + CASE WHEN $1 = $4 THEN 1 ELSE 0 END,
                updated_at = $5
            WHERE id = ANY($6) AND status <> $7 AND status <> $8
            "#,
        )
        .bind(update.status)
        .bind(&update.message)
        .bind(update.pinned)
        .bind(RequestStatus::Processing)
        .bind(self.clock.now())
        .bind(ids)
        .bind(RequestStatus::Completed)
        .bind(RequestStatus::Failed)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }

    async fn find_completed_pinned_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Request>> {
        let rows: Vec<RequestRow> = sqlx::query_as(
            r#"
            SELECT * FROM requests
            WHERE status = $1 AND pinned = TRUE AND updated_at < $2
            ORDER BY updated_at ASC
            "#,
        )
        .bind(RequestStatus::Completed)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        into_requests(rows)
    }

    async fn clear_pinned(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let result =
            sqlx::query("UPDATE requests SET pinned = FALSE, updated_at = $1 WHERE id = ANY($2)")
                .bind(self.clock.now())
                .bind(ids)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}

/// Anchor store backed by the `anchors` table.
pub struct PgAnchorStore {
    pool: PgPool,
}

impl PgAnchorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnchorStore for PgAnchorStore {
    async fn save_anchors(&self, anchors: &[Anchor]) -> Result<u64> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut saved = 0;

        for anchor in anchors {
            let result = sqlx::query(
                r#"
                INSERT INTO anchors (id, request_id, proof_cid, path, cid, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (request_id) DO NOTHING
                "#,
            )
            .bind(anchor.id)
            .bind(anchor.request_id)
            .bind(anchor.proof_cid.to_string())
            .bind(&anchor.path)
            .bind(anchor.cid.to_string())
            .bind(anchor.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            saved += result.rows_affected();
        }

        tx.commit().await.map_err(db_err)?;
        Ok(saved)
    }

    async fn find_by_request(&self, request_id: Uuid) -> Result<Option<Anchor>> {
        let row: Option<AnchorRow> =
            sqlx::query_as("SELECT * FROM anchors WHERE request_id = $1")
                .bind(request_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.map(Anchor::try_from).transpose()
    }
}

/// Transaction store backed by the `transactions` table.
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn save(&self, transaction: &ChainTransaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (id, chain_id, tx_hash, block_number, block_timestamp, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(transaction.id)
        .bind(&transaction.chain_id)
        .bind(&transaction.tx_hash)
        .bind(transaction.block_number)
        .bind(transaction.block_timestamp)
        .bind(transaction.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}
