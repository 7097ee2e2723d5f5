/// The anchoring pipeline.
///
/// One cycle flows READY requests through candidate selection, Merkle tree
/// construction, a single on-chain transaction, and per-leaf anchor-commit
/// emission, then persists the outcomes. The scheduler and garbage
/// collector run on their own cadence around it.
pub mod candidates;
pub mod coordinator;
pub mod emitter;
pub mod gc;
pub mod scheduler;

pub use candidates::StreamCandidateSelector;
pub use coordinator::{AnchorCoordinator, CycleSummary};
pub use emitter::AnchorCommitEmitter;
pub use gc::GarbageCollector;
pub use scheduler::ReadinessScheduler;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cid::Cid;
use uuid::Uuid;

use crate::error::Result;
use crate::merkle::MerkleTree;
use crate::state::models::{Anchor, Request};

/// Message set on requests anchored successfully, and on requests found
/// already anchored by an earlier batch.
pub const ANCHORED_MESSAGE: &str = "CID successfully anchored.";
/// Message set on requests whose CID cannot be related to its stream.
pub const NO_READABLE_VERSION_MESSAGE: &str = "No readable version found";
/// Message set on requests whose stream cannot be loaded at all.
pub const STREAM_LOAD_FAILED_MESSAGE: &str = "Failed to load stream";

/// One stream selected for inclusion in a batch.
///
/// `cid` is the stream tip being anchored; it need not equal any single
/// request's CID. `request_id` is the accepted request closest to that tip,
/// the one the durable Anchor row links to.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub stream_id: String,
    pub cid: Cid,
    pub request_id: Uuid,
    pub accepted: Vec<Request>,
}

impl Candidate {
    pub fn accepted_ids(&self) -> Vec<Uuid> {
        self.accepted.iter().map(|r| r.id).collect()
    }

    /// Creation time of the oldest accepted request; drives batch ordering.
    pub fn earliest_created_at(&self) -> Option<DateTime<Utc>> {
        self.accepted.iter().map(|r| r.created_at).min()
    }
}

/// Result of candidate selection for one cycle.
#[derive(Debug, Default)]
pub struct Selection {
    pub candidates: Vec<Candidate>,
    /// Ids of every accepted request across the kept candidates.
    pub accepted_ids: Vec<Uuid>,
    /// Requests completed without anchoring (already anchored upstream).
    pub completed: u64,
    /// Requests failed during validation.
    pub failed: u64,
}

/// Turns a set of READY requests into per-stream candidates.
#[async_trait]
pub trait CandidateSelector: Send + Sync {
    /// Resolve each request against its stream, deduplicate by stream, and
    /// keep at most `limit` candidates (0 = unlimited). Validation failures
    /// and already-anchored completions are persisted before returning.
    async fn select(&self, requests: Vec<Request>, limit: usize) -> Result<Selection>;
}

/// Publishes one anchor commit per Merkle leaf.
#[async_trait]
pub trait AnchorEmitter: Send + Sync {
    /// Store and announce an anchor commit for each leaf. A leaf whose
    /// emission fails is dropped from the result; the others proceed.
    async fn emit(&self, tree: &MerkleTree, proof_cid: &Cid) -> Result<Vec<Anchor>>;
}
