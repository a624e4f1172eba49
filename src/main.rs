use anyhow::{Context, Result};
use boostboard::config;
use boostboard::server::{AppState, Server};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::load_config().context("Unable to load config")?;

    let state = AppState::from_config(&config)
        .await
        .context("Unable to initialize boostboard")?;

    Server::new(&config, state).await?.run().await
}
