/// Bounded-depth Merkle tree over anchoring candidates.
pub mod tree;

pub use tree::{leaf_path, MerkleBuilder, MerkleLeaf, MerkleTree};
