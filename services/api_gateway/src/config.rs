//! Service configuration

use anyhow::{Context, Result};
use ethers::types::Address;
use memoree_runtime::{LeaderboardScript, Network, RuntimeConfig};
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    /// Primary ledger network preset
    pub network: Network,

    /// Primary ledger REST base URL
    pub flow_rest_url: String,

    /// Contract imported by the leaderboard script
    pub leaderboard_contract: String,

    /// Account holding the leaderboard admin resource
    pub leaderboard_admin: String,

    /// Period alias served for `tab=current`
    pub current_period_alias: String,

    /// Secondary ledger JSON-RPC URL
    pub evm_rpc_url: String,

    /// Secondary ledger chain id
    pub evm_chain_id: u64,

    /// Oracle contract holding trust summaries
    pub oracle_address: Address,

    /// Contract receiving `setMyMapping` calls
    pub mapper_address: Address,

    /// Relayer credential (hex private key)
    pub relayer_private_key: String,

    /// Prefix of the identity binding message
    pub app_id: String,

    /// Redis connection URL; the in-process store is used when unset
    pub redis_url: Option<String>,

    /// Leaderboard cache TTL (seconds)
    pub cache_ttl_secs: u64,

    /// Per network call timeout (milliseconds)
    pub upstream_timeout_ms: u64,

    /// Trust enrichment deadline per request (milliseconds)
    pub leaderboard_deadline_ms: u64,

    /// API server port
    pub port: u16,
}

impl Config {
    /// Read configuration from the process environment, after loading `.env`
    /// if one is present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let network: Network = var("NETWORK")
            .unwrap_or_else(|| "testnet".to_string())
            .parse()
            .context("Invalid NETWORK")?;

        let oracle_address = var("AI_ORACLE_ADDRESS")
            .context("AI_ORACLE_ADDRESS not set")?
            .trim()
            .parse::<Address>()
            .context("Invalid AI_ORACLE_ADDRESS")?;

        let mapper_address = var("ADDRESS_MAPPER_ADDRESS")
            .context("ADDRESS_MAPPER_ADDRESS not set")?
            .trim()
            .parse::<Address>()
            .context("Invalid ADDRESS_MAPPER_ADDRESS")?;

        let relayer_private_key =
            var("RELAYER_PRIVATE_KEY").context("RELAYER_PRIVATE_KEY not set")?;

        Ok(Config {
            network,

            flow_rest_url: var("FLOW_REST").unwrap_or_else(|| network.rest_url().to_string()),

            leaderboard_contract: var("LEADERBOARD_CONTRACT")
                .unwrap_or_else(|| LeaderboardScript::DEFAULT_CONTRACT.to_string()),

            leaderboard_admin: var("LEADERBOARD_ADMIN")
                .unwrap_or_else(|| network.leaderboard_admin().to_string()),

            current_period_alias: var("CURRENT_PERIOD_ALIAS")
                .unwrap_or_else(|| "week1".to_string()),

            evm_rpc_url: var("HYPERION_RPC_URL")
                .unwrap_or_else(|| "https://hyperion-testnet.metisdevops.link".to_string()),

            evm_chain_id: var("HYPERION_CHAIN_ID")
                .unwrap_or_else(|| "133717".to_string())
                .parse()
                .context("Invalid HYPERION_CHAIN_ID")?,

            oracle_address,

            mapper_address,

            relayer_private_key,

            app_id: var("APP_ID").unwrap_or_else(|| "Memoree".to_string()),

            redis_url: var("REDIS_URL"),

            cache_ttl_secs: var("CACHE_TTL_SECS")
                .unwrap_or_else(|| "30".to_string())
                .parse()
                .context("Invalid CACHE_TTL_SECS")?,

            upstream_timeout_ms: var("UPSTREAM_TIMEOUT_MS")
                .unwrap_or_else(|| "10000".to_string())
                .parse()
                .context("Invalid UPSTREAM_TIMEOUT_MS")?,

            leaderboard_deadline_ms: var("LEADERBOARD_DEADLINE_MS")
                .unwrap_or_else(|| "8000".to_string())
                .parse()
                .context("Invalid LEADERBOARD_DEADLINE_MS")?,

            port: var("PORT")
                .unwrap_or_else(|| "4000".to_string())
                .parse()
                .context("Invalid PORT")?,
        })
    }

    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            flow_rest_url: self.flow_rest_url.clone(),
            evm_rpc_url: self.evm_rpc_url.clone(),
            evm_chain_id: self.evm_chain_id,
            app_id: self.app_id.clone(),
            current_period_alias: self.current_period_alias.clone(),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            upstream_timeout: Duration::from_millis(self.upstream_timeout_ms),
            enrichment_deadline: Duration::from_millis(self.leaderboard_deadline_ms),
            ..RuntimeConfig::default()
        }
    }
}
