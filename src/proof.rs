/// Content-addressed records produced by an anchoring cycle.
///
/// One proof record is written per cycle; every anchor commit in the batch
/// references it by CID. The update message is what stream consumers see on
/// pub/sub when a new anchor commit lands.
use cid::Cid;
use serde::{Deserialize, Serialize};

use crate::chain::TxReceipt;
use crate::error::{AnchorError, Result};
use crate::storage::cid_string;

/// Pub/sub message type tag for tip updates.
pub const MSG_UPDATE: u8 = 0;

/// Links a Merkle root to the on-chain transaction that carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proof {
    #[serde(with = "cid_string")]
    pub root: Cid,
    pub tx_hash: String,
    pub chain_id: String,
    pub block_number: u64,
    pub block_timestamp: i64,
}

impl Proof {
    pub fn new(root: Cid, receipt: &TxReceipt) -> Self {
        Self {
            root,
            tx_hash: receipt.tx_hash.clone(),
            chain_id: receipt.chain_id.clone(),
            block_number: receipt.block_number,
            block_timestamp: receipt.block_timestamp,
        }
    }
}

/// The per-leaf anchor commit appended to a stream's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorCommit {
    /// The stream tip this commit anchors.
    #[serde(with = "cid_string")]
    pub prev: Cid,
    /// The cycle's proof record.
    #[serde(with = "cid_string")]
    pub proof: Cid,
    /// Edge path from the Merkle root to this leaf.
    pub path: String,
}

/// Tip update announced on pub/sub after an anchor commit is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMessage {
    pub typ: u8,
    pub stream: String,
    #[serde(with = "cid_string")]
    pub tip: Cid,
}

impl UpdateMessage {
    pub fn new(stream: &str, tip: Cid) -> Self {
        Self {
            typ: MSG_UPDATE,
            stream: stream.to_string(),
            tip,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| AnchorError::Serialization(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| AnchorError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{derive_cid, RAW_CODEC};

    fn cid(seed: &str) -> Cid {
        derive_cid(RAW_CODEC, seed.as_bytes()).unwrap()
    }

    #[test]
    fn proof_serializes_with_wire_field_names() {
        let receipt = TxReceipt {
            chain_id: "eip155:1".to_string(),
            tx_hash: "0xabc".to_string(),
            block_number: 7,
            block_timestamp: 1_700_000_000,
        };
        let proof = Proof::new(cid("root"), &receipt);
        let value = serde_json::to_value(&proof).unwrap();

        assert_eq!(value["root"], cid("root").to_string());
        assert_eq!(value["txHash"], "0xabc");
        assert_eq!(value["chainId"], "eip155:1");
        assert_eq!(value["blockNumber"], 7);
        assert_eq!(value["blockTimestamp"], 1_700_000_000);
    }

    #[test]
    fn update_message_roundtrip() {
        let message = UpdateMessage::new("stream-1", cid("anchor"));
        let bytes = message.to_bytes().unwrap();
        let restored = UpdateMessage::from_bytes(&bytes).unwrap();

        assert_eq!(restored.typ, MSG_UPDATE);
        assert_eq!(restored.stream, "stream-1");
        assert_eq!(restored.tip, cid("anchor"));
    }
}
