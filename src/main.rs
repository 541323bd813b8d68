use anyhow::Context;
use tracing_subscriber::EnvFilter;

use collab_api_rust::config;
use collab_api_rust::database::DatabaseManager;
use collab_api_rust::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::config();
    tracing::info!("Starting collab API in {:?} mode", config.environment);
    if collab_api_rust::is_development!() && std::env::var("JWT_SECRET").is_err() {
        tracing::warn!("JWT_SECRET not set; using the built-in development secret");
    }

    let pool = DatabaseManager::connect().await.context("failed to connect to the database")?;
    let state = AppState::new(pool).context("invalid resource configuration")?;

    let bind_addr = format!("0.0.0.0:{}", config.api.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Collab API listening on http://{}", bind_addr);

    axum::serve(listener, app(state)).await.context("server error")?;
    Ok(())
}
