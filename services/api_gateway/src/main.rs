use anyhow::{Context, Result};
use memoree_api_gateway::api::{self, AppState};
use memoree_api_gateway::config::Config;
use memoree_runtime::{
    metrics, CacheStore, EvmClient, EvmRelayer, FlowRestGateway, IdentityLinker,
    LeaderboardScript, LeaderboardService, MemoryStore, OracleClient, RedisStore, ResultCache,
};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // .env may carry RUST_LOG
    dotenvy::dotenv().ok();

    // Initialize tracing
    memoree_api_gateway::init_tracing();

    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            return Err(e);
        }
    };

    info!("Starting Memoree API gateway on {:?}", config.network);
    let runtime = config.runtime_config();

    // Initialize metrics
    let registry = metrics::init_metrics();

    // Ledger clients
    let gateway = Arc::new(
        FlowRestGateway::new(runtime.flow_rest_url.clone(), runtime.upstream_timeout)
            .context("Failed to build script gateway")?,
    );
    let evm = EvmClient::connect(
        &runtime.evm_rpc_url,
        runtime.evm_chain_id,
        runtime.upstream_timeout,
    )
    .context("Failed to build EVM client")?;
    let oracle = Arc::new(OracleClient::new(&evm, config.oracle_address));
    let relayer = Arc::new(
        EvmRelayer::new(&evm, &config.relayer_private_key, config.mapper_address)
            .context("Failed to load relayer")?,
    );

    // Result cache backend
    let store: Arc<dyn CacheStore> = match &config.redis_url {
        Some(url) => {
            info!("Caching leaderboards in Redis");
            Arc::new(
                RedisStore::connect(url)
                    .await
                    .context("Failed to connect to Redis")?,
            )
        }
        None => {
            info!("REDIS_URL not set, caching leaderboards in process");
            Arc::new(MemoryStore::new())
        }
    };
    let cache = Arc::new(ResultCache::new(store, runtime.cache_ttl));

    let leaderboard = LeaderboardService::new(
        gateway,
        oracle,
        cache,
        LeaderboardScript::new(
            config.leaderboard_contract.clone(),
            config.leaderboard_admin.clone(),
        ),
        &runtime,
    );
    let linker = IdentityLinker::new(runtime.app_id.clone(), relayer, Arc::new(evm))
        .with_polling(runtime.poll_interval, runtime.poll_attempts);

    let state = Arc::new(AppState {
        leaderboard,
        linker,
        registry,
    });

    // Start API server
    let api_handle = tokio::spawn(api::run_api_server(config.port, state));

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        res = api_handle => {
            error!("API service exited: {:?}", res);
        }
    }

    info!("Shutting down Memoree API gateway");
    Ok(())
}
