use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use testfleet_server::background::liveness_sweep::LivenessSweep;
use testfleet_server::background::monitor_ticker::MonitorTicker;
use testfleet_server::config::OrchestratorConfig;
use testfleet_server::router::build_app_router;
use testfleet_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "testfleet_server=debug,testfleet_dispatch=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = OrchestratorConfig::from_env().context("Invalid configuration")?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded orchestrator configuration");

    let state = AppState::new(config);
    let config = state.config.clone();

    // --- Background tasks ---
    let cancel = CancellationToken::new();

    let sweep = LivenessSweep::new(state.registry.clone(), config.stale_after());
    let sweep_handle = tokio::spawn(sweep.run(config.liveness_sweep(), cancel.clone()));

    let ticker = MonitorTicker::new(
        state.monitors.clone(),
        state.orchestrator.clone(),
        config.monitor_tick(),
    );
    let ticker_cancel = cancel.clone();
    let ticker_handle = tokio::spawn(async move { ticker.run(ticker_cancel).await });
    tracing::info!("Background tasks started");

    // --- Start server ---
    let channel = state.channel.clone();
    let app = build_app_router(state);

    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid HOST address '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), sweep_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), ticker_handle).await;
    tracing::info!("Background tasks stopped");

    let agents = channel.connection_count();
    tracing::info!(agents, "Closing remaining agent connections");
    channel.shutdown_all();

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
