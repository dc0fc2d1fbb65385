//! Paperbot - Control & Telemetry Plane
//! Mission: single source of truth between the paper-trading worker and
//! the dashboard. The worker posts telemetry and polls `/control`; the
//! dashboard reads `/data` and issues pause/cryo/revive.

use anyhow::{Context, Result};
use paperbot_backend::{router, AppState, Config};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    info!(
        db_path = %config.db_path,
        port = config.port,
        cors = %config.cors_origins,
        ingest_auth = config.ingest_token.is_some(),
        "🤖 Paperbot backend starting"
    );

    // A corrupt or unopenable store is fatal; serving without persistence
    // would silently drop worker telemetry.
    let state = AppState::new(config.clone()).context("Failed to initialize application state")?;
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
