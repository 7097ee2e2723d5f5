/// Garbage collection of expired pinned streams.
///
/// A completed request keeps its stream pinned so consumers can fetch the
/// anchored content. After the expiry window the pin is released and the
/// flag cleared, which also makes a second pass over the same rows a no-op.
use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::Result;
use crate::state::RequestStore;
use crate::stream::StreamService;

pub struct GarbageCollector {
    requests: Arc<dyn RequestStore>,
    streams: Arc<dyn StreamService>,
    clock: Arc<dyn Clock>,
    expiry_window: Duration,
}

impl GarbageCollector {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        streams: Arc<dyn StreamService>,
        clock: Arc<dyn Clock>,
        expiry_window: Duration,
    ) -> Self {
        Self {
            requests,
            streams,
            clock,
            expiry_window,
        }
    }

    /// Unpin streams whose request completed longer than the expiry window
    /// ago. Returns the number of streams released.
    pub async fn garbage_collect_pinned_streams(&self) -> Result<usize> {
        let cutoff = self.clock.now() - self.expiry_window;
        let expired = self.requests.find_completed_pinned_before(cutoff).await?;
        if expired.is_empty() {
            return Ok(0);
        }

        let mut released: Vec<Uuid> = Vec::new();
        for request in &expired {
            match self.streams.unpin_stream(&request.stream_id).await {
                Ok(()) => released.push(request.id),
                Err(e) => {
                    warn!(stream = %request.stream_id, error = %e, "Failed to unpin stream");
                }
            }
        }

        if !released.is_empty() {
            self.requests.clear_pinned(&released).await?;
            info!(streams = released.len(), "Expired streams unpinned");
        }

        Ok(released.len())
    }
}
