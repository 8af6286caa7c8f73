use std::sync::Arc;

use anyhow::Context;
use broker::{app, AppState, BrokerConfig};
use broker_sqlite::SqliteJobStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,broker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = BrokerConfig::from_env().context("loading broker configuration")?;
    if config.worker_token.is_empty() {
        tracing::warn!("WORKER_TOKEN is not set; worker routes will reject all requests");
    }
    if config.bot_token.is_empty() {
        tracing::warn!("BOT_TOKEN is not set; bot routes will reject all requests");
    }

    let store = SqliteJobStore::connect(&config.db_path, config.lease_seconds)
        .await
        .context("opening broker database")?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState {
        store: Arc::new(store),
        config: Arc::new(config),
    };
    let router = app(state);

    tracing::info!(%addr, "broker listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    axum::serve(listener, router).await.context("broker server error")?;

    Ok(())
}
