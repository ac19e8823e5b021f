use std::sync::Arc;

use tracing::info;

use convoy_core::cache::Cache;
use convoy_core::config::{Config, DEFAULT_CONFIG_PATH};
use convoy_core::limiter::TokenBucketLimiter;
use convoy_worker::engine::{DispatchEngine, EngineConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let config_path =
        std::env::var("CONVOY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)?;

    let repos = convoy_db::connect(&config.database.dsn).await?;
    let limiter = Arc::new(TokenBucketLimiter::new());
    let cache = Arc::new(Cache::new());

    let engine = DispatchEngine::new(
        repos,
        limiter,
        cache,
        EngineConfig::from_config(&config),
    )?;
    let handle = engine.start();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    handle.shutdown().await;

    Ok(())
}
