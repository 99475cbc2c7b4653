mod chain;
mod db;
mod indexer;
mod metadata;
mod models;
mod rpc;
mod state;
mod types;

use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use chain::ContractRegistry;
use db::DbPool;
use indexer::IndexerContext;
use metadata::GatewayMetadataClient;
use rpc::{RateLimitConfig, RetryConfig, RpcChainSource, RpcClient, RpcClientConfig};
use state::RedisState;
use types::config::IndexerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/config.json".to_string());
    let config = IndexerConfig::load(Path::new(&config_path))?;
    load_required_env_vars(&config)?;

    tracing::info!(
        "Loaded config: window={} interval={:?} start={}",
        config.block_processing_window,
        config.interval(),
        config.start_block_hash
    );

    let rpc_url = env::var(&config.rpc_url_env_var)
        .with_context(|| format!("env var {} not set", config.rpc_url_env_var))?;
    let database_url = env::var(&config.database_url_env_var)
        .with_context(|| format!("env var {} not set", config.database_url_env_var))?;
    let redis_url = env::var(&config.redis_url_env_var)
        .with_context(|| format!("env var {} not set", config.redis_url_env_var))?;

    let pool = DbPool::new(&database_url)
        .await
        .context("failed to create database pool")?;
    pool.run_migrations()
        .await
        .context("failed to run database migrations")?;
    tracing::info!("Database pool initialized and migrations complete");

    let rpc_client = RpcClient::new(
        RpcClientConfig::new(RpcClient::parse_url(&rpc_url)?)
            .with_rate_limit(RateLimitConfig::per_second(config.rpc.requests_per_second))
            .with_retry(RetryConfig::new(config.rpc.max_retries)),
    )?;
    let registry = Arc::new(ContractRegistry::new(&config.contracts));
    let chain_source = RpcChainSource::new(rpc_client, registry.clone());

    let metadata_client = GatewayMetadataClient::new(
        &config.metadata.gateways,
        Duration::from_millis(config.metadata.timeout_ms),
    )
    .context("failed to create metadata client")?;

    let state = RedisState::new(&redis_url).context("failed to create redis client")?;

    let ctx = IndexerContext::new(
        Arc::new(pool),
        Arc::new(chain_source),
        Arc::new(metadata_client),
        Arc::new(state),
        config,
    )
    .with_registry(registry);

    indexer::run(ctx).await.context("indexer stopped")?;
    Ok(())
}

/// Ensures the RPC, database and redis env vars are set, loading .env if needed.
fn load_required_env_vars(config: &IndexerConfig) -> anyhow::Result<()> {
    let required = config.required_env_vars();

    let missing: Vec<&&str> = required
        .iter()
        .filter(|var| env::var(var).is_err())
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    dotenvy::dotenv().with_context(|| {
        format!(
            "Missing env vars {:?} and failed to load .env file",
            missing
        )
    })?;

    let still_missing: Vec<&str> = required
        .iter()
        .filter(|var| env::var(var).is_err())
        .copied()
        .collect();

    anyhow::ensure!(
        still_missing.is_empty(),
        "Missing required env vars after loading .env: {:?}",
        still_missing
    );

    Ok(())
}
