/// Stream service client over its HTTP API.
use std::collections::HashMap;

use async_trait::async_trait;
use cid::Cid;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use super::{CommitType, LogEntry, Stream, StreamQuery, StreamService};
use crate::error::{AnchorError, Result};

/// Configuration for the stream service API.
#[derive(Debug, Clone)]
pub struct StreamApiConfig {
    /// Stream node API endpoint (e.g., "http://localhost:7007").
    pub api_url: String,
}

/// HTTP-backed stream service.
pub struct HttpStreamService {
    client: Client,
    config: StreamApiConfig,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    state: StreamStateResponse,
}

#[derive(Debug, Deserialize)]
struct StreamStateResponse {
    log: Vec<LogEntryResponse>,
}

#[derive(Debug, Deserialize)]
struct LogEntryResponse {
    cid: String,
    #[serde(rename = "type")]
    commit_type: u8,
}

fn commit_type_from_wire(value: u8) -> Result<CommitType> {
    match value {
        0 => Ok(CommitType::Genesis),
        1 => Ok(CommitType::Signed),
        2 => Ok(CommitType::Anchor),
        other => Err(AnchorError::Stream(format!("Unknown commit type {other}"))),
    }
}

impl HttpStreamService {
    pub fn new(config: StreamApiConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn fetch_stream(&self, path: &str, stream_id: &str) -> Result<Stream> {
        let resp = self
            .client
            .get(format!("{}{}", self.config.api_url, path))
            .send()
            .await
            .map_err(|e| AnchorError::Stream(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AnchorError::Stream(format!(
                "{path} failed ({status}): {body}"
            )));
        }

        let state: StreamResponse = resp
            .json()
            .await
            .map_err(|e| AnchorError::Serialization(format!("stream response: {e}")))?;

        let mut log = Vec::with_capacity(state.state.log.len());
        for entry in state.state.log {
            let cid = Cid::try_from(entry.cid.as_str())
                .map_err(|e| AnchorError::InvalidCid(format!("{}: {e}", entry.cid)))?;
            log.push(LogEntry::new(cid, commit_type_from_wire(entry.commit_type)?));
        }

        Ok(Stream::new(stream_id, log))
    }
}

#[async_trait]
impl StreamService for HttpStreamService {
    async fn load_stream(&self, stream_id: &str) -> Result<Stream> {
        self.fetch_stream(&format!("/api/v0/streams/{stream_id}"), stream_id)
            .await
    }

    async fn load_commit(&self, stream_id: &str, commit: &Cid) -> Result<Stream> {
        self.fetch_stream(
            &format!("/api/v0/streams/{stream_id}/commits/{commit}"),
            stream_id,
        )
        .await
    }

    /// Fans out to commit-scoped loads. Commits the node cannot resolve are
    /// left out of the result rather than failing the whole query.
    async fn multi_query(&self, queries: &[StreamQuery]) -> Result<HashMap<String, Stream>> {
        let mut found = HashMap::new();
        for query in queries {
            for commit in &query.paths {
                match self.load_commit(&query.stream_id, commit).await {
                    Ok(stream) => {
                        found.insert(StreamQuery::key_for(&query.stream_id, commit), stream);
                    }
                    Err(e) => {
                        warn!(
                            stream = %query.stream_id,
                            commit = %commit,
                            error = %e,
                            "Commit not resolvable"
                        );
                    }
                }
            }
        }
        Ok(found)
    }

    async fn pin_stream(&self, stream_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/api/v0/pins/{stream_id}", self.config.api_url))
            .send()
            .await
            .map_err(|e| AnchorError::Stream(e.to_string()))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AnchorError::Stream(format!("pin failed: {body}")));
        }

        Ok(())
    }

    async fn unpin_stream(&self, stream_id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/api/v0/pins/{stream_id}", self.config.api_url))
            .send()
            .await
            .map_err(|e| AnchorError::Stream(e.to_string()))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AnchorError::Stream(format!("unpin failed: {body}")));
        }

        Ok(())
    }
}
