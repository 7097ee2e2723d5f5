/// Stream service contracts.
///
/// A stream is an ordered log of commits (genesis, signed updates, anchor
/// proofs) identified by a stable stream id. The anchoring core only needs
/// ancestor tests on that log slice — commit discovery and DAG resolution
/// live behind the service boundary.
pub mod http;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use cid::Cid;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Kind of a single commit in a stream's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitType {
    Genesis,
    Signed,
    Anchor,
}

/// One entry in a stream's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub cid: Cid,
    pub commit_type: CommitType,
}

impl LogEntry {
    pub fn new(cid: Cid, commit_type: CommitType) -> Self {
        Self { cid, commit_type }
    }
}

/// A stream's current view: its id and ordered commit log.
#[derive(Debug, Clone)]
pub struct Stream {
    pub id: String,
    pub log: Vec<LogEntry>,
}

impl Stream {
    pub fn new(id: &str, log: Vec<LogEntry>) -> Self {
        Self {
            id: id.to_string(),
            log,
        }
    }

    /// The last commit in the log, if any.
    pub fn tip(&self) -> Option<&LogEntry> {
        self.log.last()
    }
}

/// Position of `cid` in a log, if present.
pub fn position_of(log: &[LogEntry], cid: &Cid) -> Option<usize> {
    log.iter().position(|entry| &entry.cid == cid)
}

/// Whether an anchor commit appears strictly after `pos`.
pub fn anchored_after(log: &[LogEntry], pos: usize) -> bool {
    log[pos + 1..]
        .iter()
        .any(|entry| entry.commit_type == CommitType::Anchor)
}

/// Whether `extension` starts with exactly the entries of `base`.
pub fn is_log_prefix(base: &[LogEntry], extension: &[LogEntry]) -> bool {
    extension.len() >= base.len() && base.iter().zip(extension).all(|(a, b)| a.cid == b.cid)
}

/// A commit-discovery query: resolve the given commits on one stream.
#[derive(Debug, Clone)]
pub struct StreamQuery {
    pub stream_id: String,
    pub paths: Vec<Cid>,
}

impl StreamQuery {
    /// Key under which the result for one queried commit is returned.
    pub fn key_for(stream_id: &str, cid: &Cid) -> String {
        format!("{stream_id}/{cid}")
    }
}

/// Trait for the external stream service.
#[async_trait]
pub trait StreamService: Send + Sync {
    /// Load the authoritative view of a stream.
    async fn load_stream(&self, stream_id: &str) -> Result<Stream>;

    /// Load a commit-scoped view of a stream (the log up to and including
    /// the given commit).
    async fn load_commit(&self, stream_id: &str, commit: &Cid) -> Result<Stream>;

    /// Resolve many commits at once. The result map is keyed by
    /// `StreamQuery::key_for`; commits the service cannot resolve are
    /// simply absent.
    async fn multi_query(&self, queries: &[StreamQuery]) -> Result<HashMap<String, Stream>>;

    /// Ask the service to retain the stream's content.
    async fn pin_stream(&self, stream_id: &str) -> Result<()>;

    /// Release a previously pinned stream.
    async fn unpin_stream(&self, stream_id: &str) -> Result<()>;
}
