mod config;
mod errors;
mod quality;
mod routes;
mod scanner;
mod state;
#[cfg(test)]
mod tests;
mod websocket;

use anyhow::{Context, Result};
use clap::Parser;
use fleet_core::{Monitor, SqliteStore};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::config::{Args, Config};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let args = Args::parse();
    let config = Config::load(&args).context("loading configuration")?;

    let store = SqliteStore::connect(
        config.database.to_str().context("database path must be valid UTF-8")?,
        config.db_max_connections,
    )
    .await
    .context("opening database")?;

    let state = AppState::new(store, config.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let monitor = Monitor::new(state.store.clone(), state.registry.clone(), state.events.clone());
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

    let app = routes::router()
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind).await.context("binding listener")?;
    tracing::info!(addr = %config.bind, "fleet-master listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    shutdown_tx.send(true).ok();
    monitor_handle.await.ok();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
