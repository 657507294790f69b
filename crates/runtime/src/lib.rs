//! Memoree Runtime
//!
//! Off-chain core for the Memoree leaderboard service. Aggregates ranked scores
//! from the primary ledger's script API, enriches them with trust flags read from
//! the oracle contract on the secondary (EVM) ledger, caches merged payloads,
//! and links foreign addresses to secondary-ledger signers through a relayer.

use std::time::Duration;
use thiserror::Error;

pub mod cache;
pub mod codec;
pub mod evm;
pub mod linker;
pub mod metrics;
pub mod pipeline;
pub mod records;
pub mod script_gateway;
pub mod trust;

pub use cache::{CacheStore, MemoryStore, RedisStore, ResultCache};
pub use codec::TaggedValue;
pub use evm::{EvmClient, EvmRelayer, OracleClient};
pub use linker::{IdentityLinker, LinkRequest, LinkState, ReceiptSource, Relayer};
pub use pipeline::{LeaderboardSelector, LeaderboardService};
pub use records::{RankedEntry, ScoreRecord};
pub use script_gateway::{FlowRestGateway, LeaderboardScript, ScriptGateway};
pub use trust::{PlayerSummary, TrustEnricher, TrustOracle};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream rejected request with status {status}: {body}")]
    UpstreamRejected { status: u16, body: String },

    #[error("Decode error: {reason}")]
    Decode { reason: String, raw: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Relay submission failed: {0}")]
    RelayFailed(String),

    #[error("Cache backend error: {0}")]
    Cache(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RuntimeError {
    pub(crate) fn decode(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self::Decode {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// Whether the failure was caused by caller input rather than an upstream.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RuntimeError::Validation(_))
    }
}

impl From<reqwest::Error> for RuntimeError {
    fn from(err: reqwest::Error) -> Self {
        Self::UpstreamUnavailable(err.to_string())
    }
}

impl From<redis::RedisError> for RuntimeError {
    fn from(err: redis::RedisError) -> Self {
        Self::Cache(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Primary ledger network presets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Testnet,
    Mainnet,
}

impl Network {
    pub fn rest_url(self) -> &'static str {
        match self {
            Network::Testnet => "https://rest-testnet.onflow.org",
            Network::Mainnet => "https://rest-mainnet.onflow.org",
        }
    }

    /// Account holding the leaderboard admin resource
    pub fn leaderboard_admin(self) -> &'static str {
        match self {
            Network::Testnet => "0xe647591c05619dba",
            Network::Mainnet => "0xb56e8d0d805eebf8",
        }
    }
}

impl std::str::FromStr for Network {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "testnet" => Ok(Network::Testnet),
            "mainnet" => Ok(Network::Mainnet),
            other => Err(RuntimeError::InvalidConfiguration(format!(
                "unknown network: {other}"
            ))),
        }
    }
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Primary ledger REST base URL
    pub flow_rest_url: String,

    /// Secondary ledger JSON-RPC URL
    pub evm_rpc_url: String,

    /// Secondary ledger chain id
    pub evm_chain_id: u64,

    /// Prefix of the identity binding message
    pub app_id: String,

    /// Period alias queried for the "current" tab
    pub current_period_alias: String,

    /// Lifetime of a cached leaderboard payload
    pub cache_ttl: Duration,

    /// Timeout applied to every individual network call
    pub upstream_timeout: Duration,

    /// Budget for the whole trust fan-out of one request
    pub enrichment_deadline: Duration,

    /// Delay between receipt lookups
    pub poll_interval: Duration,

    /// Receipt lookups before giving up
    pub poll_attempts: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flow_rest_url: Network::Testnet.rest_url().to_string(),
            evm_rpc_url: "https://hyperion-testnet.metisdevops.link".to_string(),
            evm_chain_id: 133_717,
            app_id: "Memoree".to_string(),
            current_period_alias: "week1".to_string(),
            cache_ttl: Duration::from_secs(30),
            upstream_timeout: Duration::from_secs(10),
            enrichment_deadline: Duration::from_secs(8),
            poll_interval: Duration::from_secs(2),
            poll_attempts: 30,
        }
    }
}
