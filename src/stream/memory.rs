/// In-memory stream service for tests and local development.
///
/// Streams and commit-scoped views are configured up front; pin and unpin
/// calls are recorded for inspection.
use std::collections::HashMap;

use async_trait::async_trait;
use cid::Cid;
use parking_lot::Mutex;

use super::{Stream, StreamQuery, StreamService};
use crate::error::{AnchorError, Result};

#[derive(Default)]
pub struct InMemoryStreamService {
    streams: Mutex<HashMap<String, Stream>>,
    commit_views: Mutex<HashMap<String, Stream>>,
    pin_calls: Mutex<Vec<String>>,
    unpin_calls: Mutex<Vec<String>>,
}

impl InMemoryStreamService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) the authoritative view of a stream.
    pub fn set_stream(&self, stream: Stream) {
        self.streams.lock().insert(stream.id.clone(), stream);
    }

    /// Make a commit-scoped view discoverable through `multi_query`.
    pub fn set_commit_view(&self, stream_id: &str, commit: &Cid, stream: Stream) {
        self.commit_views
            .lock()
            .insert(StreamQuery::key_for(stream_id, commit), stream);
    }

    pub fn pin_calls(&self) -> Vec<String> {
        self.pin_calls.lock().clone()
    }

    pub fn unpin_calls(&self) -> Vec<String> {
        self.unpin_calls.lock().clone()
    }
}

#[async_trait]
impl StreamService for InMemoryStreamService {
    async fn load_stream(&self, stream_id: &str) -> Result<Stream> {
        self.streams
            .lock()
            .get(stream_id)
            .cloned()
            .ok_or_else(|| AnchorError::Stream(format!("stream not found: {stream_id}")))
    }

    async fn load_commit(&self, stream_id: &str, commit: &Cid) -> Result<Stream> {
        self.commit_views
            .lock()
            .get(&StreamQuery::key_for(stream_id, commit))
            .cloned()
            .ok_or_else(|| {
                AnchorError::Stream(format!("commit not found: {stream_id}/{commit}"))
            })
    }

    async fn multi_query(&self, queries: &[StreamQuery]) -> Result<HashMap<String, Stream>> {
        let views = self.commit_views.lock();
        let mut found = HashMap::new();
        for query in queries {
            for commit in &query.paths {
                let key = StreamQuery::key_for(&query.stream_id, commit);
                if let Some(stream) = views.get(&key) {
                    found.insert(key, stream.clone());
                }
            }
        }
        Ok(found)
    }

    async fn pin_stream(&self, stream_id: &str) -> Result<()> {
        self.pin_calls.lock().push(stream_id.to_string());
        Ok(())
    }

    async fn unpin_stream(&self, stream_id: &str) -> Result<()> {
        self.unpin_calls.lock().push(stream_id.to_string());
        Ok(())
    }
}
