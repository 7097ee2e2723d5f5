/// Blockchain stubs for tests and local development.
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Blockchain, TxReceipt};
use crate::error::{AnchorError, Result};

/// Returns a fixed receipt for every transaction and records the payloads.
pub struct StaticBlockchain {
    receipt: TxReceipt,
    sent: Mutex<Vec<Vec<u8>>>,
}

impl StaticBlockchain {
    pub fn new(receipt: TxReceipt) -> Self {
        Self {
            receipt,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Payloads of all transactions sent so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

impl Default for StaticBlockchain {
    fn default() -> Self {
        Self::new(TxReceipt {
            chain_id: "eip155:1337".to_string(),
            tx_hash: "0xdead".to_string(),
            block_number: 42,
            block_timestamp: 1_700_000_000,
        })
    }
}

#[async_trait]
impl Blockchain for StaticBlockchain {
    fn chain_id(&self) -> String {
        self.receipt.chain_id.clone()
    }

    async fn send_transaction(&self, data: &[u8]) -> Result<TxReceipt> {
        self.sent.lock().push(data.to_vec());
        Ok(self.receipt.clone())
    }
}

/// Rejects every transaction with a fixed message.
pub struct FailingBlockchain {
    message: String,
}

impl FailingBlockchain {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Blockchain for FailingBlockchain {
    fn chain_id(&self) -> String {
        "eip155:0".to_string()
    }

    async fn send_transaction(&self, _data: &[u8]) -> Result<TxReceipt> {
        Err(AnchorError::Blockchain(self.message.clone()))
    }
}
