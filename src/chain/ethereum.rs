/// Ethereum calldata client.
///
/// Writes the Merkle root as calldata in a self-addressed transaction.
/// Calldata is stored permanently on-chain and is far cheaper than storage
/// slots. Uses raw JSON-RPC for maximum compatibility with hosted nodes.
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::{sleep, Duration};

use super::{Blockchain, TxReceipt};
use crate::error::{AnchorError, Result};

const RECEIPT_POLL_ATTEMPTS: u32 = 30;
const RECEIPT_POLL_DELAY_SECS: u64 = 2;

/// Configuration for the Ethereum client.
#[derive(Debug, Clone)]
pub struct EthereumConfig {
    /// Ethereum JSON-RPC endpoint (e.g., Infura, Alchemy, local node).
    pub rpc_url: String,
    /// Network label: "mainnet", "sepolia", "local".
    pub network: String,
    /// Private key (hex, without 0x prefix) for signing transactions.
    /// In production this would come from a KMS.
    pub private_key_hex: String,
    /// Chain ID (1 for mainnet, 11155111 for Sepolia).
    pub chain_id: u64,
    /// Gas limit for the anchor transaction.
    pub gas_limit: u64,
    /// Fixed gas price in wei; when unset the node's estimate is used.
    pub gas_price: Option<u128>,
}

impl Default for EthereumConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            network: "local".to_string(),
            private_key_hex: String::new(),
            chain_id: 1337,
            gas_limit: 30_000,
            gas_price: None,
        }
    }
}

/// Ethereum JSON-RPC blockchain client.
pub struct EthereumChain {
    config: EthereumConfig,
    client: Client,
}

/// Simplified JSON-RPC response.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

fn parse_hex_u64(value: &str) -> Result<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| AnchorError::Blockchain(format!("Invalid hex quantity {value}: {e}")))
}

fn parse_hex_u128(value: &str) -> Result<u128> {
    u128::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| AnchorError::Blockchain(format!("Invalid hex quantity {value}: {e}")))
}

impl EthereumChain {
    pub fn new(config: EthereumConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Send a JSON-RPC request to the Ethereum node.
    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp: JsonRpcResponse<T> = self
            .client
            .post(&self.config.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnchorError::Blockchain(e.to_string()))?
            .json()
            .await
            .map_err(|e| AnchorError::Serialization(format!("RPC response parse error: {e}")))?;

        if let Some(err) = resp.error {
            return Err(AnchorError::Blockchain(format!(
                "{method} error: {}",
                err.message
            )));
        }

        resp.result
            .ok_or_else(|| AnchorError::Blockchain(format!("Empty {method} response")))
    }

    /// Build, sign, and send a transaction with `data` as calldata.
    async fn send_raw(&self, data: &[u8]) -> Result<String> {
        use alloy::consensus::SignableTransaction;
        use alloy::primitives::{Bytes, U256};
        use alloy::signers::local::PrivateKeySigner;
        use alloy::signers::Signer;

        let signer: PrivateKeySigner = self
            .config
            .private_key_hex
            .parse()
            .map_err(|e| AnchorError::Config(format!("Invalid ETH private key: {e}")))?;

        let from_address = signer.address();

        let nonce_hex: String = self
            .rpc_call(
                "eth_getTransactionCount",
                serde_json::json!([format!("{from_address:?}"), "pending"]),
            )
            .await?;
        let nonce = parse_hex_u64(&nonce_hex)?;

        let gas_price = match self.config.gas_price {
            Some(price) => price,
            None => {
                let gas_price_hex: String =
                    self.rpc_call("eth_gasPrice", serde_json::json!([])).await?;
                parse_hex_u128(&gas_price_hex)?
            }
        };

        // Self-addressed transaction with the root bytes as calldata.
        let tx = alloy::consensus::TxLegacy {
            chain_id: Some(self.config.chain_id),
            nonce,
            gas_price,
            gas_limit: self.config.gas_limit,
            to: alloy::primitives::TxKind::Call(from_address),
            value: U256::ZERO,
            input: Bytes::copy_from_slice(data),
        };

        let sig_hash = tx.signature_hash();
        let sig = signer
            .sign_hash(&sig_hash)
            .await
            .map_err(|e| AnchorError::Blockchain(format!("ETH signing failed: {e}")))?;

        let signed = alloy::consensus::TxEnvelope::Legacy(tx.into_signed(sig));

        let mut raw_tx = Vec::new();
        alloy::eips::eip2718::Encodable2718::encode_2718(&signed, &mut raw_tx);
        let raw_hex = format!("0x{}", hex::encode(&raw_tx));

        self.rpc_call("eth_sendRawTransaction", serde_json::json!([raw_hex]))
            .await
    }

    /// Poll for the transaction receipt until it lands in a block.
    async fn wait_for_inclusion(&self, tx_hash: &str) -> Result<(u64, i64)> {
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            let receipt: Option<serde_json::Value> = self
                .rpc_call("eth_getTransactionReceipt", serde_json::json!([tx_hash]))
                .await
                .unwrap_or(None);

            if let Some(block_hex) = receipt
                .as_ref()
                .and_then(|r| r.get("blockNumber"))
                .and_then(|b| b.as_str())
            {
                let block_number = parse_hex_u64(block_hex)?;
                let block: serde_json::Value = self
                    .rpc_call(
                        "eth_getBlockByNumber",
                        serde_json::json!([block_hex, false]),
                    )
                    .await?;
                let timestamp_hex = block
                    .get("timestamp")
                    .and_then(|t| t.as_str())
                    .ok_or_else(|| {
                        AnchorError::Blockchain(format!("Block {block_hex} has no timestamp"))
                    })?;
                return Ok((block_number, parse_hex_u64(timestamp_hex)? as i64));
            }

            sleep(Duration::from_secs(RECEIPT_POLL_DELAY_SECS)).await;
        }

        Err(AnchorError::Blockchain(format!(
            "Transaction {tx_hash} not included after {RECEIPT_POLL_ATTEMPTS} polls"
        )))
    }
}

#[async_trait]
impl Blockchain for EthereumChain {
    fn chain_id(&self) -> String {
        format!("eip155:{}", self.config.chain_id)
    }

    async fn send_transaction(&self, data: &[u8]) -> Result<TxReceipt> {
        let tx_hash = self.send_raw(data).await?;
        tracing::info!(
            network = %self.config.network,
            tx_hash = %tx_hash,
            "Anchor transaction sent"
        );

        let (block_number, block_timestamp) = self.wait_for_inclusion(&tx_hash).await?;

        Ok(TxReceipt {
            chain_id: self.chain_id(),
            tx_hash,
            block_number,
            block_timestamp,
        })
    }
}
