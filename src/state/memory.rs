/// In-memory store implementations for tests and local development.
///
/// A single mutex guards each table, which trivially gives the same
/// atomicity the PostgreSQL implementations get from row locking.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cid::Cid;
use parking_lot::Mutex;
use uuid::Uuid;

use super::models::{Anchor, ChainTransaction, Request, RequestStatus};
use super::{AnchorStore, BatchPolicy, RequestStore, RequestUpdate, TransactionStore};
use crate::clock::Clock;
use crate::error::Result;

const ATTEMPTS_EXHAUSTED_MESSAGE: &str = "Anchor attempts exhausted";

pub struct InMemoryRequestStore {
    rows: Mutex<HashMap<Uuid, Request>>,
    policy: BatchPolicy,
    clock: Arc<dyn Clock>,
}

impl InMemoryRequestStore {
    pub fn new(policy: BatchPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            policy,
            clock,
        }
    }

    fn sorted(mut requests: Vec<Request>) -> Vec<Request> {
        requests.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        requests
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn create_or_update(&self, request: &Request) -> Result<Request> {
        let mut rows = self.rows.lock();
        let now = self.clock.now();

        if let Some(existing) = rows.values_mut().find(|r| r.cid == request.cid) {
            existing.stream_id = request.stream_id.clone();
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        let mut row = request.clone();
        row.updated_at = now;
        rows.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_by_cid(&self, cid: &Cid) -> Result<Option<Request>> {
        Ok(self.rows.lock().values().find(|r| &r.cid == cid).cloned())
    }

    async fn find_by_status(&self, status: RequestStatus) -> Result<Vec<Request>> {
        let matching = self
            .rows
            .lock()
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        Ok(Self::sorted(matching))
    }

    async fn count_by_status(&self, status: RequestStatus) -> Result<u64> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|r| r.status == status)
            .count() as u64)
    }

    async fn find_and_mark_ready(&self, limit: usize) -> Result<Vec<Request>> {
        let mut rows = self.rows.lock();
        let now = self.clock.now();
        let stale_cutoff = now - self.policy.ready_retry_interval;
        let mut batch_ids = Vec::new();

        // Reclaim stale rows; fail the ones past the attempts ceiling.
        for row in rows.values_mut() {
            match row.status {
                RequestStatus::Ready if row.updated_at < stale_cutoff => {
                    row.updated_at = now;
                    batch_ids.push(row.id);
                }
                RequestStatus::Processing if row.updated_at < stale_cutoff => {
                    if row.attempts >= self.policy.max_anchor_attempts {
                        row.status = RequestStatus::Failed;
                        row.message = Some(ATTEMPTS_EXHAUSTED_MESSAGE.to_string());
                        row.updated_at = now;
                    } else {
                        row.status = RequestStatus::Ready;
                        row.updated_at = now;
                        batch_ids.push(row.id);
                    }
                }
                _ => {}
            }
        }

        // Promote PENDING rows, oldest streams first, when the threshold
        // is met.
        let mut stream_order: HashMap<String, (DateTime<Utc>, String)> = HashMap::new();
        for row in rows.values().filter(|r| r.status == RequestStatus::Pending) {
            let entry = stream_order
                .entry(row.stream_id.clone())
                .or_insert_with(|| (row.created_at, row.stream_id.clone()));
            if row.created_at < entry.0 {
                entry.0 = row.created_at;
            }
        }

        if !stream_order.is_empty() && stream_order.len() >= self.policy.min_stream_count {
            let mut streams: Vec<(DateTime<Utc>, String)> = stream_order.into_values().collect();
            streams.sort();
            let take = if limit == 0 { streams.len() } else { limit };
            let selected: Vec<String> = streams
                .into_iter()
                .take(take)
                .map(|(_, stream_id)| stream_id)
                .collect();

            for row in rows.values_mut() {
                if row.status == RequestStatus::Pending && selected.contains(&row.stream_id) {
                    row.status = RequestStatus::Ready;
                    row.updated_at = now;
                    batch_ids.push(row.id);
                }
            }
        }

        let batch = batch_ids
            .iter()
            .filter_map(|id| rows.get(id).cloned())
            .collect();
        Ok(Self::sorted(batch))
    }

    async fn update_requests(&self, update: &RequestUpdate, ids: &[Uuid]) -> Result<u64> {
        let mut rows = self.rows.lock();
        let now = self.clock.now();
        let mut updated = 0;

        for id in ids {
            if let Some(row) = rows.get_mut(id) {
                if row.status.is_terminal() {
                    continue;
                }
                row.status = update.status;
                if let Some(message) = &update.message {
                    row.message = Some(message.clone());
                }
                if let Some(pinned) = update.pinned {
                    row.pinned = pinned;
                }
                if update.status == RequestStatus::Processing {
                    row.attempts += 1;
                }
                row.updated_at = now;
                updated += 1;
            }
        }

        Ok(updated)
    }

    async fn find_completed_pinned_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Request>> {
        let matching = self
            .rows
            .lock()
            .values()
            .filter(|r| r.status == RequestStatus::Completed && r.pinned && r.updated_at < cutoff)
            .cloned()
            .collect();
        Ok(Self::sorted(matching))
    }

    async fn clear_pinned(&self, ids: &[Uuid]) -> Result<u64> {
        let mut rows = self.rows.lock();
        let now = self.clock.now();
        let mut updated = 0;

        for id in ids {
            if let Some(row) = rows.get_mut(id) {
                row.pinned = false;
                row.updated_at = now;
                updated += 1;
            }
        }

        Ok(updated)
    }
}

#[derive(Default)]
pub struct InMemoryAnchorStore {
    rows: Mutex<Vec<Anchor>>,
}

impl InMemoryAnchorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All anchors saved so far, in insertion order.
    pub fn all(&self) -> Vec<Anchor> {
        self.rows.lock().clone()
    }
}

#[async_trait]
impl AnchorStore for InMemoryAnchorStore {
    async fn save_anchors(&self, anchors: &[Anchor]) -> Result<u64> {
        let mut rows = self.rows.lock();
        let mut saved = 0;
        for anchor in anchors {
            if rows.iter().any(|a| a.request_id == anchor.request_id) {
                continue;
            }
            rows.push(anchor.clone());
            saved += 1;
        }
        Ok(saved)
    }

    async fn find_by_request(&self, request_id: Uuid) -> Result<Option<Anchor>> {
        Ok(self
            .rows
            .lock()
            .iter()
            .find(|a| a.request_id == request_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct InMemoryTransactionStore {
    rows: Mutex<Vec<ChainTransaction>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<ChainTransaction> {
        self.rows.lock().clone()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn save(&self, transaction: &ChainTransaction) -> Result<()> {
        self.rows.lock().push(transaction.clone());
        Ok(())
    }
}
