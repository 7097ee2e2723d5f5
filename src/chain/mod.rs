/// Blockchain clients for writing Merkle roots on-chain.
///
/// One anchoring cycle produces exactly one transaction carrying the root
/// CID's raw bytes as calldata. The receipt ties the batch to a block, which
/// is what the per-request proofs ultimately reference.
pub mod ethereum;
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;

/// Receipt returned after a transaction lands in a block.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    /// CAIP-2 chain identifier (e.g., "eip155:1").
    pub chain_id: String,
    /// Transaction hash on the chain.
    pub tx_hash: String,
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Unix timestamp of that block.
    pub block_timestamp: i64,
}

/// Trait for pluggable blockchain clients.
#[async_trait]
pub trait Blockchain: Send + Sync {
    /// CAIP-2 identifier of the chain this client writes to.
    fn chain_id(&self) -> String;

    /// Write `data` on-chain and wait for inclusion.
    async fn send_transaction(&self, data: &[u8]) -> Result<TxReceipt>;
}
