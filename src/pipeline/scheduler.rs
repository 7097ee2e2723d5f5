/// Batch readiness scheduling.
///
/// Promotes PENDING requests to READY once enough distinct streams have
/// accumulated, re-batches stale READY rows, and announces the batch with
/// an anchor event. Promotion atomicity lives in the request store, so any
/// number of scheduler instances can run concurrently.
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::event::EventProducer;
use crate::state::RequestStore;

pub struct ReadinessScheduler {
    requests: Arc<dyn RequestStore>,
    events: Arc<dyn EventProducer>,
    stream_limit: usize,
}

impl ReadinessScheduler {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        events: Arc<dyn EventProducer>,
        stream_limit: usize,
    ) -> Self {
        Self {
            requests,
            events,
            stream_limit,
        }
    }

    /// Promote a batch if thresholds are met and announce it. Returns the
    /// number of requests in the announced batch (0 when nothing was due).
    pub async fn emit_anchor_event_if_ready(&self) -> Result<usize> {
        let batch = self.requests.find_and_mark_ready(self.stream_limit).await?;
        if batch.is_empty() {
            debug!("No batch ready");
            return Ok(0);
        }

        let event_id = Uuid::new_v4();
        // Event delivery is best-effort; the batch is already durable.
        if let Err(e) = self.events.emit_anchor_event(event_id).await {
            warn!(event = %event_id, error = %e, "Anchor event emission failed");
        }

        info!(requests = batch.len(), event = %event_id, "Anchor batch ready");
        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::event::{FailingEventProducer, RecordingEventProducer};
    use crate::state::memory::InMemoryRequestStore;
    use crate::state::models::{Request, RequestStatus};
    use crate::state::BatchPolicy;
    use crate::storage::memory::{derive_cid, RAW_CODEC};
    use chrono::{DateTime, Duration, Utc};

    fn start_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn fixture(
        policy: BatchPolicy,
    ) -> (
        ReadinessScheduler,
        Arc<InMemoryRequestStore>,
        Arc<RecordingEventProducer>,
        Arc<ManualClock>,
    ) {
        let clock = Arc::new(ManualClock::new(start_time()));
        let requests = Arc::new(InMemoryRequestStore::new(policy, clock.clone()));
        let events = Arc::new(RecordingEventProducer::new());
        let scheduler = ReadinessScheduler::new(requests.clone(), events.clone(), 8);
        (scheduler, requests, events, clock)
    }

    async fn seed_request(
        requests: &InMemoryRequestStore,
        clock: &ManualClock,
        seed: &str,
        stream: &str,
    ) {
        let request = Request::new(
            derive_cid(RAW_CODEC, seed.as_bytes()).unwrap(),
            stream,
            clock.now(),
        );
        requests.create_or_update(&request).await.unwrap();
        clock.advance(Duration::seconds(1));
    }

    #[tokio::test]
    async fn below_threshold_makes_no_promotion_and_no_event() {
        let policy = BatchPolicy {
            min_stream_count: 4,
            ..BatchPolicy::default()
        };
        let (scheduler, requests, events, clock) = fixture(policy);
        for i in 0..3 {
            seed_request(&requests, &clock, &format!("r{i}"), &format!("s{i}")).await;
        }

        let promoted = scheduler.emit_anchor_event_if_ready().await.unwrap();

        assert_eq!(promoted, 0);
        assert!(events.emitted().is_empty());
        assert_eq!(
            requests.count_by_status(RequestStatus::Pending).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn promotion_announces_one_event() {
        let (scheduler, requests, events, clock) = fixture(BatchPolicy::default());
        for i in 0..3 {
            seed_request(&requests, &clock, &format!("r{i}"), &format!("s{i}")).await;
        }

        let promoted = scheduler.emit_anchor_event_if_ready().await.unwrap();

        assert_eq!(promoted, 3);
        assert_eq!(events.emitted().len(), 1);
        assert_eq!(
            requests.count_by_status(RequestStatus::Ready).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn stale_ready_batch_is_reannounced_with_fresh_uuid() {
        let policy = BatchPolicy {
            ready_retry_interval: Duration::minutes(10),
            ..BatchPolicy::default()
        };
        let (scheduler, requests, events, clock) = fixture(policy);
        for i in 0..3 {
            seed_request(&requests, &clock, &format!("r{i}"), &format!("s{i}")).await;
        }

        assert_eq!(scheduler.emit_anchor_event_if_ready().await.unwrap(), 3);

        // Nothing new and nothing stale yet: silent.
        assert_eq!(scheduler.emit_anchor_event_if_ready().await.unwrap(), 0);
        assert_eq!(events.emitted().len(), 1);

        clock.advance(Duration::minutes(10) + Duration::seconds(1));
        assert_eq!(scheduler.emit_anchor_event_if_ready().await.unwrap(), 3);

        let emitted = events.emitted();
        assert_eq!(emitted.len(), 2);
        assert_ne!(emitted[0], emitted[1]);
    }

    #[tokio::test]
    async fn event_producer_failure_is_swallowed() {
        let clock = Arc::new(ManualClock::new(start_time()));
        let requests = Arc::new(InMemoryRequestStore::new(
            BatchPolicy::default(),
            clock.clone(),
        ));
        let scheduler =
            ReadinessScheduler::new(requests.clone(), Arc::new(FailingEventProducer), 8);
        seed_request(&requests, &clock, "r0", "s0").await;

        let promoted = scheduler.emit_anchor_event_if_ready().await.unwrap();

        assert_eq!(promoted, 1);
        assert_eq!(
            requests.count_by_status(RequestStatus::Ready).await.unwrap(),
            1
        );
    }
}
