//! World Session Server - real-time session and packet-protocol layer
//!
//! This is the main entry point. It handles:
//! - WebSocket connections carrying the JSON packet protocol
//! - Map loading and collision mask compression at startup
//! - Rate limiting, session persistence and broadcast fan-out

mod app;
mod config;
mod http;
mod session;
mod store;
mod translate;
mod util;
mod world;
mod ws;

use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::app::AppState;
use crate::config::Config;
use crate::http::build_router;
use crate::util::time::init_server_time;
use crate::world::MapRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    // Initialize server time tracking
    init_server_time();

    info!("Starting World Session Server");
    info!("Server address: {}", config.server_addr);

    // Maps are immutable for the life of the process
    let maps = MapRegistry::load_dir(&config.map_dir)
        .with_context(|| format!("loading maps from {}", config.map_dir.display()))?;
    if !maps.contains(&config.start_map) {
        anyhow::bail!(
            "start map {:?} not found in {}",
            config.start_map,
            config.map_dir.display()
        );
    }
    info!(maps = maps.len(), start_map = %config.start_map, "Maps loaded");

    let state = AppState::new(config.clone(), maps);

    // Bindings left over from a previous process would block every login
    if let Err(e) = state.store.clear_all_sessions().await {
        error!(error = %e, "Failed to clear stale session bindings");
    }

    // Background tasks
    tokio::spawn(state.rate_limiter.clone().run_sweeper());
    tokio::spawn(session::run_autosave(
        state.sessions.clone(),
        state.store.clone(),
        config.save_interval,
    ));

    // Build router
    let router = build_router(state.clone());

    // Start server
    let addr: SocketAddr = config.server_addr;
    let listener = TcpListener::bind(addr).await?;

    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if !state.sessions.is_empty() {
        info!(sessions = state.sessions.len(), "Flushing player sessions");
        for player in state.sessions.snapshot() {
            session::flush_session(state.store.as_ref(), &player).await;
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
