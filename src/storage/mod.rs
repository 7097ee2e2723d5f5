/// Content-addressed storage for anchor records.
///
/// Every structured record the anchoring pipeline produces (Merkle interior
/// nodes, proofs, anchor commits) is stored by content: identical records
/// yield identical CIDs. The store also carries the pub/sub channel used to
/// announce new anchor commits to stream consumers.
pub mod ipfs;
pub mod memory;

use async_trait::async_trait;
use cid::Cid;
use serde::Serialize;
use serde_json::Value;

use crate::error::{AnchorError, Result};

/// Trait for pluggable content-addressed stores.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a structured record, returning its CID. Deterministic: the same
    /// record always yields the same CID.
    async fn put(&self, record: &Value) -> Result<Cid>;

    /// Fetch a record by CID.
    async fn get(&self, cid: &Cid) -> Result<Value>;

    /// Pin a CID so the backing store retains it.
    async fn pin(&self, cid: &Cid) -> Result<()>;

    /// Unpin a CID, allowing the backing store to reclaim it.
    async fn unpin(&self, cid: &Cid) -> Result<()>;

    /// Publish a raw message on a pub/sub topic.
    async fn publish(&self, topic: &str, data: &[u8]) -> Result<()>;
}

/// Serialize a record and store it.
pub async fn put_record<T: Serialize>(store: &dyn ContentStore, record: &T) -> Result<Cid> {
    let value =
        serde_json::to_value(record).map_err(|e| AnchorError::Serialization(e.to_string()))?;
    store.put(&value).await
}

/// Serde adapter: CIDs as their canonical string form.
pub mod cid_string {
    use cid::Cid;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(cid: &Cid, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&cid.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Cid, D::Error> {
        let s = String::deserialize(deserializer)?;
        Cid::try_from(s.as_str()).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional CID fields.
pub mod cid_string_opt {
    use cid::Cid;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(cid: &Option<Cid>, serializer: S) -> Result<S::Ok, S::Error> {
        match cid {
            Some(cid) => serializer.serialize_some(&cid.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Cid>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        s.map(|s| Cid::try_from(s.as_str()).map_err(serde::de::Error::custom))
            .transpose()
    }
}
