mod cli;
mod websocket;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use serialbridge_core::prelude::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::websocket::{websocket_handler, BridgeState};

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG wins; default to info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = cli.bridge_config()?;
    info!(
        version = serialbridge_core::VERSION,
        flush_interval_ms = config.flush_interval_ms,
        tx_delay_ms = config.tx_delay_ms,
        "starting serialbridge server"
    );

    let backend: Arc<dyn DeviceBackend> = Arc::new(SerialBackend);
    let broadcaster = Arc::new(Broadcaster::with_queue_depth(config.observer_queue_depth));
    let session = Arc::new(Session::new(
        backend.clone(),
        broadcaster.clone(),
        config.clone(),
    ));

    let shutdown = CancellationToken::new();
    let watcher = spawn_port_watcher(
        backend,
        broadcaster,
        config.port_poll_interval(),
        shutdown.clone(),
    );

    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(BridgeState::new(Dispatcher::new(session.clone())))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = cli.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on ws://{addr}/ws");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    shutdown.cancel();
    if let Err(e) = watcher.await {
        warn!("port watcher ended abnormally: {e}");
    }
    session.disconnect().await;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
