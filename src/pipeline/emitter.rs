/// Anchor-commit emission.
///
/// For each Merkle leaf the emitter stores an anchor commit, announces the
/// stream's new tip on pub/sub, and pins the stream. Leaves fail
/// independently: a leaf whose commit cannot be stored or announced is
/// dropped from the batch and its requests stay PROCESSING for a later
/// cycle.
use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use tracing::{info, warn};
use uuid::Uuid;

use super::{AnchorEmitter, Candidate};
use crate::clock::Clock;
use crate::error::Result;
use crate::merkle::MerkleTree;
use crate::proof::{AnchorCommit, UpdateMessage};
use crate::state::models::Anchor;
use crate::storage::{put_record, ContentStore};
use crate::stream::StreamService;

pub struct AnchorCommitEmitter {
    content: Arc<dyn ContentStore>,
    streams: Arc<dyn StreamService>,
    clock: Arc<dyn Clock>,
    topic: String,
}

impl AnchorCommitEmitter {
    pub fn new(
        content: Arc<dyn ContentStore>,
        streams: Arc<dyn StreamService>,
        clock: Arc<dyn Clock>,
        topic: &str,
    ) -> Self {
        Self {
            content,
            streams,
            clock,
            topic: topic.to_string(),
        }
    }

    async fn emit_leaf(&self, candidate: &Candidate, proof_cid: &Cid, path: &str) -> Result<Cid> {
        let commit = AnchorCommit {
            prev: candidate.cid,
            proof: *proof_cid,
            path: path.to_string(),
        };
        let anchor_cid = put_record(self.content.as_ref(), &commit).await?;

        let update = UpdateMessage::new(&candidate.stream_id, anchor_cid);
        self.content.publish(&self.topic, &update.to_bytes()?).await?;

        // Pinning is retention housekeeping, not part of the commit; a
        // failure here must not drop an already-announced leaf.
        if let Err(e) = self.streams.pin_stream(&candidate.stream_id).await {
            warn!(stream = %candidate.stream_id, error = %e, "Failed to pin stream");
        }

        Ok(anchor_cid)
    }
}

#[async_trait]
impl AnchorEmitter for AnchorCommitEmitter {
    async fn emit(&self, tree: &MerkleTree, proof_cid: &Cid) -> Result<Vec<Anchor>> {
        let mut anchors = Vec::with_capacity(tree.leaf_count());

        for leaf in tree.leaves() {
            let candidate = &leaf.candidate;
            match self.emit_leaf(candidate, proof_cid, &leaf.path).await {
                Ok(anchor_cid) => {
                    info!(
                        stream = %candidate.stream_id,
                        anchor = %anchor_cid,
                        path = %leaf.path,
                        "Anchor commit published"
                    );
                    anchors.push(Anchor {
                        id: Uuid::now_v7(),
                        request_id: candidate.request_id,
                        proof_cid: *proof_cid,
                        path: leaf.path.clone(),
                        cid: anchor_cid,
                        created_at: self.clock.now(),
                    });
                }
                Err(e) => {
                    warn!(
                        stream = %candidate.stream_id,
                        error = %e,
                        "Anchor emission failed, leaving requests for a later batch"
                    );
                }
            }
        }

        Ok(anchors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::merkle::MerkleBuilder;
    use crate::state::models::Request;
    use crate::storage::memory::{derive_cid, MemoryContentStore, RAW_CODEC};
    use crate::stream::memory::InMemoryStreamService;
    use chrono::Utc;

    fn cid(seed: &str) -> Cid {
        derive_cid(RAW_CODEC, seed.as_bytes()).unwrap()
    }

    fn candidate(seed: &str, stream: &str) -> Candidate {
        let request = Request::new(cid(seed), stream, Utc::now());
        Candidate {
            stream_id: stream.to_string(),
            cid: cid(seed),
            request_id: request.id,
            accepted: vec![request],
        }
    }

    async fn build_tree(content: Arc<MemoryContentStore>, candidates: Vec<Candidate>) -> MerkleTree {
        MerkleBuilder::new(content, 3).build(candidates).await.unwrap()
    }

    #[tokio::test]
    async fn emits_one_anchor_per_leaf() {
        let content = Arc::new(MemoryContentStore::new());
        let streams = Arc::new(InMemoryStreamService::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let emitter =
            AnchorCommitEmitter::new(content.clone(), streams.clone(), clock, "/anchors");

        let tree = build_tree(
            content.clone(),
            vec![candidate("a", "s1"), candidate("b", "s2")],
        )
        .await;
        let proof_cid = cid("proof");

        let anchors = emitter.emit(&tree, &proof_cid).await.unwrap();

        assert_eq!(anchors.len(), 2);
        assert_eq!(anchors[0].path, "0");
        assert_eq!(anchors[1].path, "1");
        assert!(anchors.iter().all(|a| a.proof_cid == proof_cid));
        assert_eq!(content.published_on("/anchors").len(), 2);
        assert_eq!(streams.pin_calls(), vec!["s1", "s2"]);

        // The published update names the stream and the new anchor tip.
        let update =
            UpdateMessage::from_bytes(&content.published_on("/anchors")[0]).unwrap();
        assert_eq!(update.stream, "s1");
        assert_eq!(update.tip, anchors[0].cid);
    }

    #[tokio::test]
    async fn failed_leaf_is_dropped_and_others_proceed() {
        let content = Arc::new(MemoryContentStore::new());
        let streams = Arc::new(InMemoryStreamService::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let emitter =
            AnchorCommitEmitter::new(content.clone(), streams.clone(), clock, "/anchors");

        let doomed = candidate("doomed", "s1");
        let healthy = candidate("healthy", "s2");
        let healthy_request = healthy.request_id;
        let tree = build_tree(content.clone(), vec![doomed, healthy]).await;

        content.set_put_failure(Some(&cid("doomed").to_string()));
        let anchors = emitter.emit(&tree, &cid("proof")).await.unwrap();

        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].request_id, healthy_request);
        assert_eq!(content.published_on("/anchors").len(), 1);
        assert_eq!(streams.pin_calls(), vec!["s2"]);
    }

    #[tokio::test]
    async fn stored_commit_links_tip_proof_and_path() {
        let content = Arc::new(MemoryContentStore::new());
        let streams = Arc::new(InMemoryStreamService::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let emitter =
            AnchorCommitEmitter::new(content.clone(), streams, clock, "/anchors");

        let tree = build_tree(content.clone(), vec![candidate("a", "s1")]).await;
        let proof_cid = cid("proof");
        let anchors = emitter.emit(&tree, &proof_cid).await.unwrap();

        let record = content.get(&anchors[0].cid).await.unwrap();
        assert_eq!(record["prev"], cid("a").to_string());
        assert_eq!(record["proof"], proof_cid.to_string());
        assert_eq!(record["path"], "");
    }
}
