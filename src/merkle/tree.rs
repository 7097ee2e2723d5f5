/// Left-packed balanced Merkle tree with content-addressed interior nodes.
///
/// Leaves are candidate tip CIDs laid out at positions 0..n-1 in the lowest
/// level that can hold them. Interior nodes `{l, r}` are stored in the
/// content store; the node's CID is its hash, so the root CID is the Merkle
/// root. When the leaf level is not full, a trailing node carries only a
/// left child — leaves keep their positional paths either way.
use std::sync::Arc;

use cid::Cid;
use serde::Serialize;

use crate::error::{AnchorError, Result};
use crate::pipeline::Candidate;
use crate::storage::{cid_string, cid_string_opt, put_record, ContentStore};

/// One leaf: a candidate and its edge path from the root (left=0, right=1).
#[derive(Debug, Clone)]
pub struct MerkleLeaf {
    pub candidate: Candidate,
    pub path: String,
}

/// A built tree, ready for anchoring.
#[derive(Debug)]
pub struct MerkleTree {
    root: Option<Cid>,
    depth: usize,
    leaves: Vec<MerkleLeaf>,
}

impl MerkleTree {
    /// The Merkle root CID. None for an empty tree.
    pub fn root(&self) -> Option<&Cid> {
        self.root.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn leaves(&self) -> &[MerkleLeaf] {
        &self.leaves
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }
}

#[derive(Serialize)]
struct TreeNode {
    #[serde(with = "cid_string")]
    l: Cid,
    #[serde(with = "cid_string_opt", skip_serializing_if = "Option::is_none")]
    r: Option<Cid>,
}

fn ceil_log2(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }
}

/// Edge path for the leaf at `index` in a tree of the given depth:
/// the big-endian bits of the index, one per level.
pub fn leaf_path(index: usize, depth: usize) -> String {
    (0..depth)
        .rev()
        .map(|bit| if index >> bit & 1 == 1 { "1" } else { "0" })
        .collect::<Vec<_>>()
        .join("/")
}

/// Builds trees of bounded depth over ordered candidates.
pub struct MerkleBuilder {
    store: Arc<dyn ContentStore>,
    depth_limit: usize,
}

impl MerkleBuilder {
    pub fn new(store: Arc<dyn ContentStore>, depth_limit: usize) -> Self {
        Self { store, depth_limit }
    }

    /// Maximum number of leaves a tree may carry.
    pub fn capacity(&self) -> usize {
        1usize << self.depth_limit
    }

    /// Build a tree over the candidates in the given order. The caller must
    /// have bounded the batch to `capacity()` beforehand; exceeding it is a
    /// programming error surfaced as `BatchTooLarge`.
    pub async fn build(&self, candidates: Vec<Candidate>) -> Result<MerkleTree> {
        let count = candidates.len();
        if count > self.capacity() {
            return Err(AnchorError::BatchTooLarge {
                count,
                capacity: self.capacity(),
            });
        }
        if count == 0 {
            return Ok(MerkleTree {
                root: None,
                depth: 0,
                leaves: Vec::new(),
            });
        }

        let depth = ceil_log2(count);
        let mut level: Vec<Cid> = candidates.iter().map(|c| c.cid).collect();

        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            for pair in level.chunks(2) {
                let node = TreeNode {
                    l: pair[0],
                    r: pair.get(1).copied(),
                };
                next.push(put_record(self.store.as_ref(), &node).await?);
            }
            level = next;
        }

        let leaves = candidates
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| MerkleLeaf {
                path: leaf_path(index, depth),
                candidate,
            })
            .collect();

        Ok(MerkleTree {
            root: level.first().copied(),
            depth,
            leaves,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::models::Request;
    use crate::storage::memory::{derive_cid, MemoryContentStore, RAW_CODEC};
    use chrono::Utc;

    fn candidate(seed: &str) -> Candidate {
        let cid = derive_cid(RAW_CODEC, seed.as_bytes()).unwrap();
        let request = Request::new(cid, seed, Utc::now());
        Candidate {
            stream_id: seed.to_string(),
            cid,
            request_id: request.id,
            accepted: vec![request],
        }
    }

    fn builder(depth_limit: usize) -> MerkleBuilder {
        MerkleBuilder::new(Arc::new(MemoryContentStore::new()), depth_limit)
    }

    #[tokio::test]
    async fn empty_batch_builds_empty_tree() {
        let tree = builder(3).build(vec![]).await.unwrap();
        assert!(tree.is_empty());
        assert!(tree.root().is_none());
    }

    #[tokio::test]
    async fn single_candidate_is_its_own_root() {
        let c = candidate("only");
        let expected = c.cid;
        let tree = builder(3).build(vec![c]).await.unwrap();
        assert_eq!(tree.root(), Some(&expected));
        assert_eq!(tree.depth(), 0);
        assert_eq!(tree.leaves()[0].path, "");
    }

    #[tokio::test]
    async fn four_candidates_get_positional_paths() {
        let candidates: Vec<Candidate> =
            ["a", "b", "c", "d"].iter().map(|s| candidate(s)).collect();
        let tree = builder(3).build(candidates).await.unwrap();

        assert_eq!(tree.depth(), 2);
        assert!(tree.root().is_some());
        let paths: Vec<&str> = tree.leaves().iter().map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec!["0/0", "0/1", "1/0", "1/1"]);
    }

    #[tokio::test]
    async fn three_candidates_keep_positional_paths() {
        let candidates: Vec<Candidate> = ["a", "b", "c"].iter().map(|s| candidate(s)).collect();
        let tree = builder(2).build(candidates).await.unwrap();

        assert_eq!(tree.depth(), 2);
        let paths: Vec<&str> = tree.leaves().iter().map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec!["0/0", "0/1", "1/0"]);
    }

    #[tokio::test]
    async fn over_capacity_batch_is_rejected() {
        let candidates: Vec<Candidate> = (0..5).map(|i| candidate(&format!("c{i}"))).collect();
        let err = builder(2).build(candidates).await.unwrap_err();
        assert!(matches!(
            err,
            AnchorError::BatchTooLarge {
                count: 5,
                capacity: 4
            }
        ));
    }

    #[tokio::test]
    async fn construction_is_deterministic() {
        let make = || ["x", "y", "z"].iter().map(|s| candidate(s)).collect::<Vec<_>>();
        let a = builder(4).build(make()).await.unwrap();
        let b = builder(4).build(make()).await.unwrap();
        assert_eq!(a.root(), b.root());
    }

    #[tokio::test]
    async fn interior_nodes_are_stored() {
        let store = Arc::new(MemoryContentStore::new());
        let builder = MerkleBuilder::new(store.clone(), 3);
        let candidates: Vec<Candidate> =
            ["a", "b", "c", "d"].iter().map(|s| candidate(s)).collect();
        let tree = builder.build(candidates).await.unwrap();

        // Two level-1 nodes plus the root.
        assert_eq!(store.record_count(), 3);
        let root = tree.root().unwrap();
        let record = store.get(root).await.unwrap();
        assert!(record.get("l").is_some());
        assert!(record.get("r").is_some());
    }

    #[test]
    fn leaf_path_is_big_endian_binary() {
        assert_eq!(leaf_path(0, 3), "0/0/0");
        assert_eq!(leaf_path(5, 3), "1/0/1");
        assert_eq!(leaf_path(3, 2), "1/1");
        assert_eq!(leaf_path(0, 0), "");
    }
}
