//! vision-svc - camera worker control plane
//!
//! Main entry point.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vision_svc::{camera::SyntheticProvider, state::AppConfig, state::AppState, web_api};

async fn shutdown_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vision_svc=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting vision-svc v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        start_attempts = config.orchestrator.start_attempts,
        lock_wait_ms = config.orchestrator.lock_wait_timeout.as_millis() as u64,
        release_grace_ms = config.release_grace.as_millis() as u64,
        "Configuration loaded"
    );

    // No hardware backend is linked into this binary
    let provider = Arc::new(SyntheticProvider::new());
    tracing::warn!("Using synthetic camera backend");

    let addr = format!("{}:{}", config.host, config.port);
    let (state, control_rx) = AppState::build(config, provider)?;
    tracing::info!(
        workers = state.registry.iter().count(),
        "Workers registered"
    );

    let shutdown = CancellationToken::new();
    let listener_task = state
        .control_bus
        .clone()
        .spawn_listener(control_rx, shutdown.clone());

    let app = web_api::create_router(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await;
    if let Err(e) = &served {
        tracing::error!(error = %e, "Server error");
    }

    // stop the cameras whatever happened above
    shutdown.cancel();
    let stopped = state.orchestrator.stop_all().await;
    tracing::info!(stopped = stopped.len(), "Workers stopped");
    if let Err(e) = listener_task.await {
        tracing::warn!(error = %e, "Control listener ended abnormally");
    }

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}
