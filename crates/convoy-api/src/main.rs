use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use convoy_api::state::AppState;
use convoy_core::config::{Config, DEFAULT_CONFIG_PATH};

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
    let port = config.server.port;

    let repos = convoy_db::connect(&config.database.dsn).await?;
    let state = AppState::new(config, repos);
    let app = convoy_api::app_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting api");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
