/// Anchor event production.
///
/// When a batch becomes READY the scheduler announces it so anchor workers
/// can pick it up promptly instead of waiting for their next poll.
/// Delivery is best-effort; a lost event only delays the batch until the
/// stale-READY retry.
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use uuid::Uuid;

use crate::error::{AnchorError, Result};

#[async_trait]
pub trait EventProducer: Send + Sync {
    async fn emit_anchor_event(&self, event_id: Uuid) -> Result<()>;
}

/// Posts anchor events to a configured webhook.
pub struct WebhookEventProducer {
    client: Client,
    url: String,
}

impl WebhookEventProducer {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl EventProducer for WebhookEventProducer {
    async fn emit_anchor_event(&self, event_id: Uuid) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "uuid": event_id }))
            .send()
            .await
            .map_err(|e| AnchorError::Event(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AnchorError::Event(format!(
                "webhook returned {}",
                resp.status()
            )));
        }

        Ok(())
    }
}

/// Logs events without delivering them anywhere. Used when no webhook is
/// configured.
#[derive(Debug, Default)]
pub struct NoopEventProducer;

#[async_trait]
impl EventProducer for NoopEventProducer {
    async fn emit_anchor_event(&self, event_id: Uuid) -> Result<()> {
        tracing::debug!(event = %event_id, "Anchor event (no producer configured)");
        Ok(())
    }
}

/// Records emitted events for inspection in tests.
#[derive(Debug, Default)]
pub struct RecordingEventProducer {
    events: Mutex<Vec<Uuid>>,
}

impl RecordingEventProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> Vec<Uuid> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventProducer for RecordingEventProducer {
    async fn emit_anchor_event(&self, event_id: Uuid) -> Result<()> {
        self.events.lock().push(event_id);
        Ok(())
    }
}

/// Fails every emission; the scheduler must swallow these.
#[derive(Debug, Default)]
pub struct FailingEventProducer;

#[async_trait]
impl EventProducer for FailingEventProducer {
    async fn emit_anchor_event(&self, _event_id: Uuid) -> Result<()> {
        Err(AnchorError::Event("event producer unavailable".to_string()))
    }
}
