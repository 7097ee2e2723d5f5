/// Anchoring cycle orchestrator.
///
/// One call to `anchor_requests` drains the READY batch: select candidates,
/// build the Merkle tree, write the root on-chain, emit per-leaf anchor
/// commits, and persist the outcomes. Each step observes the previous
/// step's durable effects; a transaction failure leaves the batch in
/// PROCESSING for a later cycle rather than rolling anything back.
use std::sync::Arc;

use tracing::{debug, info};

use super::{AnchorEmitter, CandidateSelector, ANCHORED_MESSAGE};
use crate::chain::Blockchain;
use crate::clock::Clock;
use crate::error::Result;
use crate::merkle::MerkleBuilder;
use crate::proof::Proof;
use crate::state::models::{ChainTransaction, RequestStatus};
use crate::state::{AnchorStore, RequestStore, RequestUpdate, TransactionStore};
use crate::storage::{put_record, ContentStore};

/// Counts reported after a cycle, for operational logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub candidates: usize,
    pub anchored: usize,
    pub completed: usize,
    /// Requests failed during selection (unloadable stream, no readable
    /// version).
    pub failed: usize,
}

pub struct AnchorCoordinator {
    requests: Arc<dyn RequestStore>,
    anchors: Arc<dyn AnchorStore>,
    transactions: Arc<dyn TransactionStore>,
    selector: Arc<dyn CandidateSelector>,
    emitter: Arc<dyn AnchorEmitter>,
    chain: Arc<dyn Blockchain>,
    content: Arc<dyn ContentStore>,
    builder: MerkleBuilder,
    clock: Arc<dyn Clock>,
    stream_limit: usize,
}

#[allow(clippy::too_many_arguments)]
impl AnchorCoordinator {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        anchors: Arc<dyn AnchorStore>,
        transactions: Arc<dyn TransactionStore>,
        selector: Arc<dyn CandidateSelector>,
        emitter: Arc<dyn AnchorEmitter>,
        chain: Arc<dyn Blockchain>,
        content: Arc<dyn ContentStore>,
        builder: MerkleBuilder,
        clock: Arc<dyn Clock>,
        stream_limit: usize,
    ) -> Self {
        Self {
            requests,
            anchors,
            transactions,
            selector,
            emitter,
            chain,
            content,
            builder,
            clock,
            stream_limit,
        }
    }

    /// Run one anchoring cycle over the current READY batch.
    pub async fn anchor_requests(&self) -> Result<CycleSummary> {
        let ready = self.requests.find_by_status(RequestStatus::Ready).await?;
        if ready.is_empty() {
            debug!("No requests ready for anchoring");
            return Ok(CycleSummary::default());
        }

        info!(requests = ready.len(), "Anchoring cycle started");
        let selection = self.selector.select(ready, self.stream_limit).await?;
        let mut completed = selection.completed;
        let failed = selection.failed as usize;
        if selection.candidates.is_empty() {
            info!(
                completed,
                failed, "No candidates survived selection, skipping cycle"
            );
            return Ok(CycleSummary {
                completed: completed as usize,
                failed,
                ..CycleSummary::default()
            });
        }

        self.requests
            .update_requests(
                &RequestUpdate::status(RequestStatus::Processing),
                &selection.accepted_ids,
            )
            .await?;

        let candidate_count = selection.candidates.len();
        let tree = self.builder.build(selection.candidates).await?;
        let root = match tree.root() {
            Some(root) => *root,
            None => {
                return Ok(CycleSummary {
                    candidates: candidate_count,
                    completed: completed as usize,
                    failed,
                    ..CycleSummary::default()
                })
            }
        };

        // One transaction per batch. On failure the error surfaces to the
        // caller and the batch stays PROCESSING.
        let receipt = self.chain.send_transaction(&root.to_bytes()).await?;
        info!(
            root = %root,
            tx_hash = %receipt.tx_hash,
            block = receipt.block_number,
            "Merkle root committed on-chain"
        );

        let now = self.clock.now();
        self.transactions
            .save(&ChainTransaction::from_receipt(&receipt, now))
            .await?;

        let proof = Proof::new(root, &receipt);
        let proof_cid = put_record(self.content.as_ref(), &proof).await?;

        let emitted = self.emitter.emit(&tree, &proof_cid).await?;

        for anchor in &emitted {
            if let Some(leaf) = tree
                .leaves()
                .iter()
                .find(|l| l.candidate.request_id == anchor.request_id)
            {
                completed += self
                    .requests
                    .update_requests(
                        &RequestUpdate::with_message(RequestStatus::Completed, ANCHORED_MESSAGE)
                            .pinned(true),
                        &leaf.candidate.accepted_ids(),
                    )
                    .await?;
            }
        }
        self.anchors.save_anchors(&emitted).await?;

        info!(
            candidates = candidate_count,
            anchored = emitted.len(),
            completed,
            failed,
            "Anchoring cycle complete"
        );

        Ok(CycleSummary {
            candidates: candidate_count,
            anchored: emitted.len(),
            completed: completed as usize,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::memory::{FailingBlockchain, StaticBlockchain};
    use crate::clock::ManualClock;
    use crate::pipeline::{AnchorCommitEmitter, StreamCandidateSelector};
    use crate::proof::UpdateMessage;
    use crate::state::memory::{
        InMemoryAnchorStore, InMemoryRequestStore, InMemoryTransactionStore,
    };
    use crate::state::models::Request;
    use crate::state::BatchPolicy;
    use crate::storage::memory::{derive_cid, MemoryContentStore, RAW_CODEC};
    use crate::stream::memory::InMemoryStreamService;
    use crate::stream::{CommitType, LogEntry, Stream};
    use chrono::{DateTime, Duration, Utc};
    use cid::Cid;

    const TOPIC: &str = "/anchor/updates";

    fn cid(seed: &str) -> Cid {
        derive_cid(RAW_CODEC, seed.as_bytes()).unwrap()
    }

    fn entry(seed: &str, commit_type: CommitType) -> LogEntry {
        LogEntry::new(cid(seed), commit_type)
    }

    struct Fixture {
        requests: Arc<InMemoryRequestStore>,
        anchors: Arc<InMemoryAnchorStore>,
        transactions: Arc<InMemoryTransactionStore>,
        content: Arc<MemoryContentStore>,
        streams: Arc<InMemoryStreamService>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new(
                DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            ));
            Self {
                requests: Arc::new(InMemoryRequestStore::new(
                    BatchPolicy::default(),
                    clock.clone(),
                )),
                anchors: Arc::new(InMemoryAnchorStore::new()),
                transactions: Arc::new(InMemoryTransactionStore::new()),
                content: Arc::new(MemoryContentStore::new()),
                streams: Arc::new(InMemoryStreamService::new()),
                clock,
            }
        }

        fn coordinator(
            &self,
            chain: Arc<dyn Blockchain>,
            depth_limit: usize,
            stream_limit: usize,
        ) -> AnchorCoordinator {
            let selector = Arc::new(StreamCandidateSelector::new(
                self.streams.clone(),
                self.requests.clone(),
            ));
            let emitter = Arc::new(AnchorCommitEmitter::new(
                self.content.clone(),
                self.streams.clone(),
                self.clock.clone(),
                TOPIC,
            ));
            AnchorCoordinator::new(
                self.requests.clone(),
                self.anchors.clone(),
                self.transactions.clone(),
                selector,
                emitter,
                chain,
                self.content.clone(),
                MerkleBuilder::new(self.content.clone(), depth_limit),
                self.clock.clone(),
                stream_limit,
            )
        }

        /// Seed a PENDING request and a single-commit stream behind it.
        async fn seed(&self, seed: &str, stream: &str) -> Request {
            let request = Request::new(cid(seed), stream, self.clock.now());
            let created = self.requests.create_or_update(&request).await.unwrap();
            self.streams.set_stream(Stream::new(
                stream,
                vec![entry("genesis", CommitType::Genesis), entry(seed, CommitType::Signed)],
            ));
            self.clock.advance(Duration::seconds(1));
            created
        }

        async fn mark_all_ready(&self) {
            self.requests.find_and_mark_ready(0).await.unwrap();
        }

        async fn statuses(&self, requests: &[Request]) -> Vec<RequestStatus> {
            let mut statuses = Vec::new();
            for request in requests {
                statuses.push(
                    self.requests
                        .find_by_cid(&request.cid)
                        .await
                        .unwrap()
                        .unwrap()
                        .status,
                );
            }
            statuses
        }
    }

    #[tokio::test]
    async fn full_batch_of_four_anchors_every_stream() {
        let f = Fixture::new();
        let mut requests = Vec::new();
        for i in 0..4 {
            requests.push(f.seed(&format!("r{i}"), &format!("s{i}")).await);
        }
        f.mark_all_ready().await;

        let chain = Arc::new(StaticBlockchain::default());
        let coordinator = f.coordinator(chain.clone(), 3, 8);
        let summary = coordinator.anchor_requests().await.unwrap();

        assert_eq!(summary.candidates, 4);
        assert_eq!(summary.anchored, 4);
        assert_eq!(summary.completed, 4);
        assert_eq!(summary.failed, 0);

        let anchors = f.anchors.all();
        assert_eq!(anchors.len(), 4);
        let paths: Vec<&str> = anchors.iter().map(|a| a.path.as_str()).collect();
        assert_eq!(paths, vec!["0/0", "0/1", "1/0", "1/1"]);

        assert_eq!(f.content.published_on(TOPIC).len(), 4);
        assert_eq!(chain.sent().len(), 1);
        assert_eq!(f.transactions.all().len(), 1);

        for request in &requests {
            let row = f.requests.find_by_cid(&request.cid).await.unwrap().unwrap();
            assert_eq!(row.status, RequestStatus::Completed);
            assert_eq!(row.message.as_deref(), Some(ANCHORED_MESSAGE));
            assert!(row.pinned);
        }
    }

    #[tokio::test]
    async fn transaction_failure_surfaces_and_leaves_batch_retryable() {
        let f = Fixture::new();
        let mut requests = Vec::new();
        for i in 0..4 {
            requests.push(f.seed(&format!("r{i}"), &format!("s{i}")).await);
        }
        f.mark_all_ready().await;

        let chain = Arc::new(FailingBlockchain::new("Failed to send transaction!"));
        let coordinator = f.coordinator(chain, 3, 8);
        let err = coordinator.anchor_requests().await.unwrap_err();

        assert!(err.to_string().contains("Failed to send transaction!"));
        for status in f.statuses(&requests).await {
            assert_eq!(status, RequestStatus::Processing);
            assert!(!status.is_terminal());
        }
        assert!(f.anchors.all().is_empty());
        assert!(f.transactions.all().is_empty());
        assert!(f.content.published_on(TOPIC).is_empty());
    }

    #[tokio::test]
    async fn over_limit_batch_drains_in_two_cycles_oldest_first() {
        let f = Fixture::new();
        let mut requests = Vec::new();
        for i in 0..8 {
            requests.push(f.seed(&format!("r{i}"), &format!("s{i}")).await);
        }
        f.mark_all_ready().await;

        let coordinator = f.coordinator(Arc::new(StaticBlockchain::default()), 3, 4);

        let first = coordinator.anchor_requests().await.unwrap();
        assert_eq!(first.anchored, 4);
        for status in f.statuses(&requests[..4]).await {
            assert_eq!(status, RequestStatus::Completed);
        }
        for status in f.statuses(&requests[4..]).await {
            assert_eq!(status, RequestStatus::Ready);
        }

        let second = coordinator.anchor_requests().await.unwrap();
        assert_eq!(second.anchored, 4);
        assert_eq!(
            f.requests.count_by_status(RequestStatus::Ready).await.unwrap(),
            0
        );
        assert_eq!(f.anchors.all().len(), 8);
        assert_eq!(f.transactions.all().len(), 2);
    }

    #[tokio::test]
    async fn two_requests_on_one_stream_share_a_single_anchor() {
        let f = Fixture::new();
        let r0 = f.seed("r0", "s1").await;
        let r1 = f.seed("r1", "s1").await;
        f.streams.set_stream(Stream::new(
            "s1",
            vec![
                entry("genesis", CommitType::Genesis),
                entry("r0", CommitType::Signed),
                entry("r1", CommitType::Signed),
            ],
        ));
        f.mark_all_ready().await;

        let coordinator = f.coordinator(Arc::new(StaticBlockchain::default()), 3, 8);
        let summary = coordinator.anchor_requests().await.unwrap();

        assert_eq!(summary.candidates, 1);
        assert_eq!(summary.completed, 2);
        let anchors = f.anchors.all();
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors[0].request_id, r1.id);

        // The anchored tip is the newer commit.
        let commit = f.content.get(&anchors[0].cid).await.unwrap();
        assert_eq!(commit["prev"], cid("r1").to_string());

        for status in f.statuses(&[r0, r1]).await {
            assert_eq!(status, RequestStatus::Completed);
        }
    }

    #[tokio::test]
    async fn externally_anchored_request_completes_without_new_anchor() {
        let f = Fixture::new();
        let r = f.seed("r", "s1").await;
        f.streams.set_stream(Stream::new(
            "s1",
            vec![
                entry("genesis", CommitType::Genesis),
                entry("r", CommitType::Signed),
                entry("external-anchor", CommitType::Anchor),
            ],
        ));
        f.mark_all_ready().await;

        let chain = Arc::new(StaticBlockchain::default());
        let coordinator = f.coordinator(chain.clone(), 3, 8);
        let summary = coordinator.anchor_requests().await.unwrap();

        assert_eq!(summary.candidates, 0);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 0);
        assert!(f.anchors.all().is_empty());
        assert!(chain.sent().is_empty());

        let row = f.requests.find_by_cid(&r.cid).await.unwrap().unwrap();
        assert_eq!(row.status, RequestStatus::Completed);
        assert_eq!(row.message.as_deref(), Some(ANCHORED_MESSAGE));
    }

    #[tokio::test]
    async fn validation_failures_are_counted_in_the_summary() {
        let f = Fixture::new();
        let unresolvable = f.seed("unresolvable", "s1").await;
        // The stream never saw this request's commit.
        f.streams.set_stream(Stream::new(
            "s1",
            vec![
                entry("genesis", CommitType::Genesis),
                entry("other", CommitType::Signed),
            ],
        ));
        f.mark_all_ready().await;

        let chain = Arc::new(StaticBlockchain::default());
        let coordinator = f.coordinator(chain.clone(), 3, 8);
        let summary = coordinator.anchor_requests().await.unwrap();

        assert_eq!(summary.candidates, 0);
        assert_eq!(summary.completed, 0);
        assert_eq!(summary.failed, 1);
        assert!(chain.sent().is_empty());

        let row = f
            .requests
            .find_by_cid(&unresolvable.cid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, RequestStatus::Failed);
    }

    #[tokio::test]
    async fn failed_leaf_keeps_its_requests_processing() {
        let f = Fixture::new();
        let doomed = f.seed("doomed", "s1").await;
        let healthy = f.seed("healthy", "s2").await;
        f.mark_all_ready().await;

        let coordinator = f.coordinator(Arc::new(StaticBlockchain::default()), 3, 8);

        // Fail the anchor-commit put for the doomed stream's tip only. The
        // Merkle interior node is stored before the failure is armed.
        f.content.set_put_failure(None);
        let pattern = format!("\"prev\":\"{}\"", cid("doomed"));
        f.content.set_put_failure(Some(&pattern));

        let summary = coordinator.anchor_requests().await.unwrap();

        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.anchored, 1);
        let row = f.requests.find_by_cid(&doomed.cid).await.unwrap().unwrap();
        assert_eq!(row.status, RequestStatus::Processing);
        let row = f.requests.find_by_cid(&healthy.cid).await.unwrap().unwrap();
        assert_eq!(row.status, RequestStatus::Completed);
    }

    #[tokio::test]
    async fn published_updates_carry_the_new_anchor_tips() {
        let f = Fixture::new();
        f.seed("r0", "s0").await;
        f.mark_all_ready().await;

        let coordinator = f.coordinator(Arc::new(StaticBlockchain::default()), 3, 8);
        coordinator.anchor_requests().await.unwrap();

        let published = f.content.published_on(TOPIC);
        assert_eq!(published.len(), 1);
        let update = UpdateMessage::from_bytes(&published[0]).unwrap();
        assert_eq!(update.stream, "s0");
        assert_eq!(update.tip, f.anchors.all()[0].cid);
    }
}
