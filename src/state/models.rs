/// Durable records for the anchoring pipeline.
///
/// These structs map to the PostgreSQL tables and are used for both reading
/// and writing via sqlx. CIDs are stored as text columns and parsed at the
/// repository boundary.
use chrono::{DateTime, Utc};
use cid::Cid;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::cid_string;

/// Lifecycle state of an anchoring request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "request_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Ready,
    Processing,
    Completed,
    Failed,
}

impl RequestStatus {
    /// Terminal states are never left again by the core.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

/// One anchoring ask: a CID on a stream, waiting to be committed on-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    #[serde(with = "cid_string")]
    pub cid: Cid,
    pub stream_id: String,
    pub status: RequestStatus,
    pub message: Option<String>,
    /// Whether the stream's content is still pinned on our behalf.
    pub pinned: bool,
    /// Times the coordinator has taken this request into a batch.
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    /// A fresh PENDING request, the shape ingress hands to the store.
    pub fn new(cid: Cid, stream_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            cid,
            stream_id: stream_id.to_string(),
            status: RequestStatus::Pending,
            message: None,
            pinned: false,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Durable record of one emitted anchor commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anchor {
    pub id: Uuid,
    /// The request whose CID sits closest to the anchored tip.
    pub request_id: Uuid,
    #[serde(with = "cid_string")]
    pub proof_cid: Cid,
    /// Edge path from the Merkle root down to this leaf ("0/1/...").
    pub path: String,
    /// CID of the anchor-commit record itself.
    #[serde(with = "cid_string")]
    pub cid: Cid,
    pub created_at: DateTime<Utc>,
}

/// Record of a successful on-chain transaction, one per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub id: Uuid,
    pub chain_id: String,
    pub tx_hash: String,
    pub block_number: i64,
    pub block_timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ChainTransaction {
    pub fn from_receipt(receipt: &crate::chain::TxReceipt, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            chain_id: receipt.chain_id.clone(),
            tx_hash: receipt.tx_hash.clone(),
            block_number: receipt.block_number as i64,
            block_timestamp: DateTime::from_timestamp(receipt.block_timestamp, 0)
                .unwrap_or(now),
            created_at: now,
        }
    }
}
