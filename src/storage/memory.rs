/// In-memory content store for tests and local development.
///
/// CIDs are derived from the BLAKE3 hash of the record's canonical JSON
/// encoding, so identical records yield identical CIDs just like a real
/// content-addressed store. Publishes and pins are recorded for inspection.
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use cid::Cid;
use multihash::Multihash;
use parking_lot::Mutex;
use serde_json::Value;

use super::ContentStore;
use crate::error::{AnchorError, Result};

/// Multicodec code for dag-json records.
pub const DAG_JSON_CODEC: u64 = 0x0129;
/// Multicodec code for raw byte payloads.
pub const RAW_CODEC: u64 = 0x55;
const BLAKE3_CODE: u64 = 0x1e;

/// Derive a CID for a byte payload. Used internally and by tests that need
/// to fabricate commit CIDs.
pub fn derive_cid(codec: u64, data: &[u8]) -> Result<Cid> {
    let digest = blake3::hash(data);
    let mh = Multihash::wrap(BLAKE3_CODE, digest.as_bytes())
        .map_err(|e| AnchorError::InvalidCid(e.to_string()))?;
    Ok(Cid::new_v1(codec, mh))
}

#[derive(Default)]
pub struct MemoryContentStore {
    records: Mutex<HashMap<Cid, Value>>,
    pins: Mutex<HashSet<Cid>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    fail_puts_containing: Mutex<Option<String>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages published so far on `topic`.
    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, data)| data.clone())
            .collect()
    }

    pub fn is_pinned(&self, cid: &Cid) -> bool {
        self.pins.lock().contains(cid)
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().len()
    }

    /// Fault injection: fail `put` for any record whose JSON encoding
    /// contains `pattern`. Pass `None` to clear.
    pub fn set_put_failure(&self, pattern: Option<&str>) {
        *self.fail_puts_containing.lock() = pattern.map(String::from);
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, record: &Value) -> Result<Cid> {
        let bytes =
            serde_json::to_vec(record).map_err(|e| AnchorError::Serialization(e.to_string()))?;

        if let Some(pattern) = self.fail_puts_containing.lock().as_deref() {
            if String::from_utf8_lossy(&bytes).contains(pattern) {
                return Err(AnchorError::ContentStore("put rejected".to_string()));
            }
        }

        let cid = derive_cid(DAG_JSON_CODEC, &bytes)?;
        self.records.lock().insert(cid, record.clone());
        Ok(cid)
    }

    async fn get(&self, cid: &Cid) -> Result<Value> {
        self.records
            .lock()
            .get(cid)
            .cloned()
            .ok_or_else(|| AnchorError::ContentStore(format!("record not found: {cid}")))
    }

    async fn pin(&self, cid: &Cid) -> Result<()> {
        self.pins.lock().insert(*cid);
        Ok(())
    }

    async fn unpin(&self, cid: &Cid) -> Result<()> {
        self.pins.lock().remove(cid);
        Ok(())
    }

    async fn publish(&self, topic: &str, data: &[u8]) -> Result<()> {
        self.published.lock().push((topic.to_string(), data.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn identical_records_yield_identical_cids() {
        let store = MemoryContentStore::new();
        let a = store.put(&json!({"l": "x", "r": "y"})).await.unwrap();
        let b = store.put(&json!({"l": "x", "r": "y"})).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn distinct_records_yield_distinct_cids() {
        let store = MemoryContentStore::new();
        let a = store.put(&json!({"l": "x"})).await.unwrap();
        let b = store.put(&json!({"l": "y"})).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn get_returns_stored_record() {
        let store = MemoryContentStore::new();
        let record = json!({"path": "0/1"});
        let cid = store.put(&record).await.unwrap();
        assert_eq!(store.get(&cid).await.unwrap(), record);
    }

    #[tokio::test]
    async fn pin_and_unpin() {
        let store = MemoryContentStore::new();
        let cid = store.put(&json!("pinned")).await.unwrap();
        store.pin(&cid).await.unwrap();
        assert!(store.is_pinned(&cid));
        store.unpin(&cid).await.unwrap();
        assert!(!store.is_pinned(&cid));
    }

    #[tokio::test]
    async fn publish_records_by_topic() {
        let store = MemoryContentStore::new();
        store.publish("/anchors", b"one").await.unwrap();
        store.publish("/other", b"two").await.unwrap();
        store.publish("/anchors", b"three").await.unwrap();
        assert_eq!(store.published_on("/anchors").len(), 2);
        assert_eq!(store.published_on("/other").len(), 1);
    }

    #[tokio::test]
    async fn put_failure_injection_is_selective() {
        let store = MemoryContentStore::new();
        store.set_put_failure(Some("doomed"));
        assert!(store.put(&json!({"k": "doomed"})).await.is_err());
        assert!(store.put(&json!({"k": "fine"})).await.is_ok());
        store.set_put_failure(None);
        assert!(store.put(&json!({"k": "doomed"})).await.is_ok());
    }
}
