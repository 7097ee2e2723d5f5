/// IPFS content store via the Kubo HTTP API.
///
/// Records are stored as dag-json so CIDs are deterministic across nodes.
/// Pub/sub publishes go through the same API; consumers subscribed to the
/// update topic learn about new anchor commits without polling.
use async_trait::async_trait;
use cid::Cid;
use reqwest::multipart;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use super::ContentStore;
use crate::error::{AnchorError, Result};

/// Configuration for the IPFS HTTP API.
#[derive(Debug, Clone)]
pub struct IpfsConfig {
    /// IPFS API endpoint (e.g., "http://localhost:5001").
    pub api_url: String,
}

/// IPFS-backed content store.
pub struct IpfsStore {
    client: Client,
    config: IpfsConfig,
}

#[derive(Debug, Deserialize)]
struct DagPutResponse {
    #[serde(rename = "Cid")]
    cid: CidRef,
}

#[derive(Debug, Deserialize)]
struct CidRef {
    #[serde(rename = "/")]
    cid: String,
}

impl IpfsStore {
    pub fn new(config: IpfsConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn api_post(&self, path: &str, args: &[(&str, &str)]) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(format!("{}{}", self.config.api_url, path))
            .query(args)
            .send()
            .await
            .map_err(|e| AnchorError::ContentStore(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AnchorError::ContentStore(format!(
                "{path} failed ({status}): {body}"
            )));
        }

        Ok(resp)
    }
}

#[async_trait]
impl ContentStore for IpfsStore {
    async fn put(&self, record: &Value) -> Result<Cid> {
        let bytes =
            serde_json::to_vec(record).map_err(|e| AnchorError::Serialization(e.to_string()))?;
        let part = multipart::Part::bytes(bytes).file_name("record");
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(format!("{}/api/v0/dag/put", self.config.api_url))
            .query(&[
                ("store-codec", "dag-json"),
                ("input-codec", "dag-json"),
                ("pin", "true"),
            ])
            .multipart(form)
            .send()
            .await
            .map_err(|e| AnchorError::ContentStore(e.to_string()))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AnchorError::ContentStore(format!("dag/put failed: {body}")));
        }

        let put_resp: DagPutResponse = resp
            .json()
            .await
            .map_err(|e| AnchorError::Serialization(format!("dag/put response: {e}")))?;

        Cid::try_from(put_resp.cid.cid.as_str())
            .map_err(|e| AnchorError::InvalidCid(format!("{}: {e}", put_resp.cid.cid)))
    }

    async fn get(&self, cid: &Cid) -> Result<Value> {
        let arg = cid.to_string();
        let resp = self.api_post("/api/v0/dag/get", &[("arg", &arg)]).await?;
        resp.json()
            .await
            .map_err(|e| AnchorError::Serialization(format!("dag/get response: {e}")))
    }

    async fn pin(&self, cid: &Cid) -> Result<()> {
        let arg = cid.to_string();
        self.api_post("/api/v0/pin/add", &[("arg", &arg)]).await?;
        Ok(())
    }

    async fn unpin(&self, cid: &Cid) -> Result<()> {
        let arg = cid.to_string();
        self.api_post("/api/v0/pin/rm", &[("arg", &arg)]).await?;
        Ok(())
    }

    async fn publish(&self, topic: &str, data: &[u8]) -> Result<()> {
        let part = multipart::Part::bytes(data.to_vec()).file_name("data");
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .client
            .post(format!("{}/api/v0/pubsub/pub", self.config.api_url))
            .query(&[("arg", topic)])
            .multipart(form)
            .send()
            .await
            .map_err(|e| AnchorError::ContentStore(e.to_string()))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AnchorError::ContentStore(format!(
                "pubsub/pub failed: {body}"
            )));
        }

        Ok(())
    }
}
