/// Durable state layer for the anchoring pipeline.
///
/// Three tables back the core: `requests` (the single source of truth for
/// request lifecycle), `anchors` (one row per anchored request), and
/// `transactions` (one row per successful cycle). All state transitions are
/// serialized through the store implementations; see `find_and_mark_ready`
/// and `update_requests` for the concurrency contract.
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use cid::Cid;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AnchorError, Result};
use models::{Anchor, ChainTransaction, Request, RequestStatus};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| AnchorError::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AnchorError::Database(format!("Migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Thresholds governing batch readiness and retry.
#[derive(Debug, Clone)]
pub struct BatchPolicy {
    /// Minimum distinct PENDING streams before a batch is promoted.
    pub min_stream_count: usize,
    /// Age after which a READY or PROCESSING row is retried.
    pub ready_retry_interval: Duration,
    /// Batch attempts before a stuck request is failed outright.
    pub max_anchor_attempts: i32,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            min_stream_count: 1,
            ready_retry_interval: Duration::minutes(10),
            max_anchor_attempts: 3,
        }
    }
}

/// A conditional batch update applied to non-terminal requests.
#[derive(Debug, Clone)]
pub struct RequestUpdate {
    pub status: RequestStatus,
    pub message: Option<String>,
    pub pinned: Option<bool>,
}

impl RequestUpdate {
    pub fn status(status: RequestStatus) -> Self {
        Self {
            status,
            message: None,
            pinned: None,
        }
    }

    pub fn with_message(status: RequestStatus, message: &str) -> Self {
        Self {
            status,
            message: Some(message.to_string()),
            pinned: None,
        }
    }

    pub fn pinned(mut self, pinned: bool) -> Self {
        self.pinned = Some(pinned);
        self
    }
}

/// Request table operations.
///
/// Implementations must guarantee:
/// - `find_and_mark_ready` runs atomically: two concurrent calls never
///   promote overlapping rows.
/// - `update_requests` skips rows already in a terminal state, so a request
///   completes or fails at most once.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Upsert by CID. An existing request keeps its id, status, and
    /// creation time.
    async fn create_or_update(&self, request: &Request) -> Result<Request>;

    async fn find_by_cid(&self, cid: &Cid) -> Result<Option<Request>>;

    /// Rows in `status`, oldest `created_at` first, id as tie-break.
    async fn find_by_status(&self, status: RequestStatus) -> Result<Vec<Request>>;

    async fn count_by_status(&self, status: RequestStatus) -> Result<u64>;

    /// Promote PENDING rows to READY and reclaim stale READY/PROCESSING
    /// rows, atomically. `limit` bounds the number of distinct streams
    /// promoted (0 = no bound). Promotion only happens when the PENDING set
    /// spans at least `BatchPolicy::min_stream_count` distinct streams;
    /// stale-row reclaim happens regardless. Returns the promoted and
    /// reclaimed rows, oldest first.
    async fn find_and_mark_ready(&self, limit: usize) -> Result<Vec<Request>>;

    /// Apply `update` to the given rows, skipping any already terminal.
    /// Returns the number of rows actually updated.
    async fn update_requests(&self, update: &RequestUpdate, ids: &[Uuid]) -> Result<u64>;

    /// COMPLETED rows still pinned whose last update is older than `cutoff`.
    async fn find_completed_pinned_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Request>>;

    /// Drop the pinned flag on the given rows.
    async fn clear_pinned(&self, ids: &[Uuid]) -> Result<u64>;
}

/// Anchor table operations.
#[async_trait]
pub trait AnchorStore: Send + Sync {
    /// Persist emitted anchors. A request that already has an anchor keeps
    /// its existing row.
    async fn save_anchors(&self, anchors: &[Anchor]) -> Result<u64>;

    async fn find_by_request(&self, request_id: Uuid) -> Result<Option<Anchor>>;
}

/// Transaction table operations.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn save(&self, transaction: &ChainTransaction) -> Result<()>;
}
