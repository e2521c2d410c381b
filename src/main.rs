//! chat-relay server entry point.
//!
//! Starts the Axum HTTP server with the WebSocket relay, the REST
//! inspection endpoints and the stalled-session reaper.

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chat_relay::app_state::AppState;
use chat_relay::build_app;
use chat_relay::config::RelayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    tracing::info!(
        addr = %config.listen_addr,
        queue_capacity = config.queue_capacity,
        drain_timeout_ms = config.drain_timeout.as_millis(),
        typing_debounce_ms = config.typing_debounce.as_millis(),
        "starting chat-relay"
    );

    // Build relay core and background reaper
    let listen_addr = config.listen_addr;
    let reaper_interval = config.reaper_interval;
    let state = AppState::new(config);
    let shutdown = CancellationToken::new();
    let reaper = state
        .lifecycle
        .spawn_drain_reaper(reaper_interval, shutdown.clone());

    let app = build_app(state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    tracing::info!(addr = %listen_addr, "server listening");

    let lifecycle = std::sync::Arc::clone(&state.lifecycle);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            // Open sockets only finish once their sessions are closed
            let _ = lifecycle.shutdown().await;
        })
        .await
        .context("server error")?;

    shutdown.cancel();
    reaper.await.context("drain reaper panicked")?;
    tracing::info!("chat-relay stopped");

    Ok(())
}
