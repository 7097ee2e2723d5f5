/// Service configuration.
///
/// Settings are assembled from environment variables at startup; every
/// knob has a default suitable for local development against a local
/// Ethereum node, IPFS daemon, and stream node.
use std::fmt::Display;
use std::str::FromStr;

use chrono::Duration;

use crate::chain::ethereum::EthereumConfig;
use crate::error::{AnchorError, Result};
use crate::state::BatchPolicy;
use crate::storage::ipfs::IpfsConfig;
use crate::stream::http::StreamApiConfig;

const SIXTY_DAYS_MS: u64 = 60 * 24 * 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    /// Maximum Merkle tree depth; a batch holds at most 2^depth streams.
    pub merkle_depth_limit: usize,
    /// Distinct PENDING streams required before a batch is promoted.
    pub min_stream_count: usize,
    /// Age in milliseconds after which a READY batch is retried.
    pub ready_retry_interval_ms: u64,
    /// Age in milliseconds after which anchored pins are collected.
    pub expiry_window_ms: u64,
    /// Batch attempts before a stuck request is failed.
    pub max_anchor_attempts: i32,
    /// Pub/sub topic anchor commits are announced on.
    pub pubsub_topic: String,
    pub schedule_interval_ms: u64,
    pub anchor_interval_ms: u64,
    pub gc_interval_ms: u64,
    /// Webhook for anchor events; when unset events are only logged.
    pub event_webhook_url: Option<String>,
    pub ethereum: EthereumConfig,
    pub ipfs: IpfsConfig,
    pub stream_api: StreamApiConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/cid_anchor".to_string(),
            merkle_depth_limit: 10,
            min_stream_count: 1,
            ready_retry_interval_ms: 600_000,
            expiry_window_ms: SIXTY_DAYS_MS,
            max_anchor_attempts: 3,
            pubsub_topic: "/cid-anchor/updates".to_string(),
            schedule_interval_ms: 60_000,
            anchor_interval_ms: 300_000,
            gc_interval_ms: 86_400_000,
            event_webhook_url: None,
            ethereum: EthereumConfig::default(),
            ipfs: IpfsConfig {
                api_url: "http://localhost:5001".to_string(),
            },
            stream_api: StreamApiConfig {
                api_url: "http://localhost:7007".to_string(),
            },
        }
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|e| AnchorError::Config(format!("{name}: {e}"))),
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Streams per batch: the capacity of a full Merkle tree.
    pub fn stream_limit(&self) -> usize {
        1usize << self.merkle_depth_limit
    }

    pub fn batch_policy(&self) -> BatchPolicy {
        BatchPolicy {
            min_stream_count: self.min_stream_count,
            ready_retry_interval: Duration::milliseconds(self.ready_retry_interval_ms as i64),
            max_anchor_attempts: self.max_anchor_attempts,
        }
    }

    pub fn expiry_window(&self) -> Duration {
        Duration::milliseconds(self.expiry_window_ms as i64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.merkle_depth_limit == 0 || self.merkle_depth_limit > 31 {
            return Err(AnchorError::Config(format!(
                "merkle depth limit must be in 1..=31, got {}",
                self.merkle_depth_limit
            )));
        }
        if self.min_stream_count == 0 {
            return Err(AnchorError::Config(
                "min stream count must be at least 1".to_string(),
            ));
        }
        if self.max_anchor_attempts < 1 {
            return Err(AnchorError::Config(
                "max anchor attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Assemble settings from environment variables, falling back to the
    /// defaults above.
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();

        let settings = Self {
            database_url: env_string("DATABASE_URL", &defaults.database_url),
            merkle_depth_limit: env_parse("MERKLE_DEPTH_LIMIT", defaults.merkle_depth_limit)?,
            min_stream_count: env_parse("MIN_STREAM_COUNT", defaults.min_stream_count)?,
            ready_retry_interval_ms: env_parse(
                "READY_RETRY_INTERVAL_MS",
                defaults.ready_retry_interval_ms,
            )?,
            expiry_window_ms: env_parse("EXPIRY_WINDOW_MS", defaults.expiry_window_ms)?,
            max_anchor_attempts: env_parse("MAX_ANCHOR_ATTEMPTS", defaults.max_anchor_attempts)?,
            pubsub_topic: env_string("PUBSUB_TOPIC", &defaults.pubsub_topic),
            schedule_interval_ms: env_parse("SCHEDULE_INTERVAL_MS", defaults.schedule_interval_ms)?,
            anchor_interval_ms: env_parse("ANCHOR_INTERVAL_MS", defaults.anchor_interval_ms)?,
            gc_interval_ms: env_parse("GC_INTERVAL_MS", defaults.gc_interval_ms)?,
            event_webhook_url: std::env::var("EVENT_WEBHOOK_URL").ok(),
            ethereum: EthereumConfig {
                rpc_url: env_string("ETH_RPC_URL", &defaults.ethereum.rpc_url),
                network: env_string("ETH_NETWORK", &defaults.ethereum.network),
                private_key_hex: env_string("ETH_PRIVATE_KEY", &defaults.ethereum.private_key_hex),
                chain_id: env_parse("ETH_CHAIN_ID", defaults.ethereum.chain_id)?,
                gas_limit: env_parse("ETH_GAS_LIMIT", defaults.ethereum.gas_limit)?,
                gas_price: std::env::var("ETH_GAS_PRICE")
                    .ok()
                    .map(|v| {
                        v.parse()
                            .map_err(|e| AnchorError::Config(format!("ETH_GAS_PRICE: {e}")))
                    })
                    .transpose()?,
            },
            ipfs: IpfsConfig {
                api_url: env_string("IPFS_API_URL", &defaults.ipfs.api_url),
            },
            stream_api: StreamApiConfig {
                api_url: env_string("STREAM_API_URL", &defaults.stream_api.api_url),
            },
        };

        settings.validate()?;
        Ok(settings)
    }
}
