/// Candidate selection: from READY requests to per-stream batch entries.
///
/// Requests are bucketed by stream. Each bucket resolves against the
/// stream's authoritative log; commits the service has not seen yet are
/// discovered through a multi-query and merged in when they extend the
/// known log. What survives is at most one candidate per stream, carrying
/// the stream tip as the CID to anchor.
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cid::Cid;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    Candidate, CandidateSelector, Selection, ANCHORED_MESSAGE, NO_READABLE_VERSION_MESSAGE,
    STREAM_LOAD_FAILED_MESSAGE,
};
use crate::error::Result;
use crate::state::models::{Request, RequestStatus};
use crate::state::{RequestStore, RequestUpdate};
use crate::stream::{anchored_after, is_log_prefix, position_of, StreamQuery, StreamService};

pub struct StreamCandidateSelector {
    streams: Arc<dyn StreamService>,
    requests: Arc<dyn RequestStore>,
}

impl StreamCandidateSelector {
    pub fn new(streams: Arc<dyn StreamService>, requests: Arc<dyn RequestStore>) -> Self {
        Self { streams, requests }
    }

    /// Resolve one stream bucket into at most one candidate, persisting
    /// completions and rejections as they are discovered.
    async fn evaluate_stream(
        &self,
        stream_id: &str,
        bucket: Vec<Request>,
    ) -> Result<StreamOutcome> {
        let stream = match self.streams.load_stream(stream_id).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(stream = %stream_id, error = %e, "Failed to load stream, failing its requests");
                let ids: Vec<Uuid> = bucket.iter().map(|r| r.id).collect();
                let failed = self
                    .requests
                    .update_requests(
                        &RequestUpdate::with_message(
                            RequestStatus::Failed,
                            STREAM_LOAD_FAILED_MESSAGE,
                        ),
                        &ids,
                    )
                    .await?;
                return Ok(StreamOutcome {
                    failed,
                    ..StreamOutcome::default()
                });
            }
        };

        let mut log = stream.log;

        // Commits missing from the authoritative log may exist on the
        // network without the service having seen them yet.
        let missing: Vec<Cid> = bucket
            .iter()
            .filter(|r| position_of(&log, &r.cid).is_none())
            .map(|r| r.cid)
            .collect();

        if !missing.is_empty() {
            let query = StreamQuery {
                stream_id: stream_id.to_string(),
                paths: missing.clone(),
            };
            match self.streams.multi_query(std::slice::from_ref(&query)).await {
                Ok(found) => {
                    for commit in &missing {
                        if let Some(view) = found.get(&StreamQuery::key_for(stream_id, commit)) {
                            if view.log.len() > log.len() && is_log_prefix(&log, &view.log) {
                                debug!(
                                    stream = %stream_id,
                                    commit = %commit,
                                    "Adopting extended stream view"
                                );
                                log = view.log.clone();
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(stream = %stream_id, error = %e, "Commit discovery failed");
                }
            }
        }

        let mut accepted: Vec<(usize, Request)> = Vec::new();
        let mut already_anchored: Vec<Uuid> = Vec::new();
        let mut unresolved: Vec<Uuid> = Vec::new();

        for request in bucket {
            match position_of(&log, &request.cid) {
                None => unresolved.push(request.id),
                Some(pos) if anchored_after(&log, pos) => already_anchored.push(request.id),
                Some(pos) => accepted.push((pos, request)),
            }
        }

        let mut outcome = StreamOutcome::default();

        if !unresolved.is_empty() {
            outcome.failed += self
                .requests
                .update_requests(
                    &RequestUpdate::with_message(
                        RequestStatus::Failed,
                        NO_READABLE_VERSION_MESSAGE,
                    ),
                    &unresolved,
                )
                .await?;
        }

        if !already_anchored.is_empty() {
            debug!(
                stream = %stream_id,
                requests = already_anchored.len(),
                "Requests already anchored by an earlier batch"
            );
            outcome.completed += self
                .requests
                .update_requests(
                    &RequestUpdate::with_message(RequestStatus::Completed, ANCHORED_MESSAGE),
                    &already_anchored,
                )
                .await?;
        }

        if accepted.is_empty() {
            return Ok(outcome);
        }

        accepted.sort_by_key(|(pos, _)| *pos);
        let tip = match log.last() {
            Some(entry) => entry.cid,
            None => return Ok(outcome),
        };
        let request_id = accepted[accepted.len() - 1].1.id;

        outcome.candidate = Some(Candidate {
            stream_id: stream_id.to_string(),
            cid: tip,
            request_id,
            accepted: accepted.into_iter().map(|(_, r)| r).collect(),
        });
        Ok(outcome)
    }
}

/// What resolving one stream bucket produced: a candidate, plus requests
/// settled along the way.
#[derive(Debug, Default)]
struct StreamOutcome {
    candidate: Option<Candidate>,
    completed: u64,
    failed: u64,
}

#[async_trait]
impl CandidateSelector for StreamCandidateSelector {
    async fn select(&self, requests: Vec<Request>, limit: usize) -> Result<Selection> {
        let mut buckets: BTreeMap<String, Vec<Request>> = BTreeMap::new();
        for request in requests {
            buckets
                .entry(request.stream_id.clone())
                .or_default()
                .push(request);
        }

        let mut candidates = Vec::new();
        let mut completed = 0;
        let mut failed = 0;
        for (stream_id, bucket) in buckets {
            let outcome = self.evaluate_stream(&stream_id, bucket).await?;
            completed += outcome.completed;
            failed += outcome.failed;
            if let Some(candidate) = outcome.candidate {
                candidates.push(candidate);
            }
        }

        // Stream-level FIFO: oldest accepted request first, stream id as
        // tie-break.
        candidates.sort_by(|a, b| {
            (a.earliest_created_at(), &a.stream_id).cmp(&(b.earliest_created_at(), &b.stream_id))
        });

        if limit > 0 && candidates.len() > limit {
            debug!(
                kept = limit,
                deferred = candidates.len() - limit,
                "Batch limit reached, deferring remaining streams"
            );
            candidates.truncate(limit);
        }

        let accepted_ids = candidates
            .iter()
            .flat_map(|c| c.accepted_ids())
            .collect();

        Ok(Selection {
            candidates,
            accepted_ids,
            completed,
            failed,
        })
    }
}
