//! WebAPI - HTTP / WebSocket delivery for the control plane
//!
//! ## Responsibilities
//!
//! - Worker start/stop/query routes over the orchestrator
//! - Raw control envelopes (same format as the message bus)
//! - Outbound result/event stream over WebSocket

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.uptime_sec(),
        running_workers: state
            .orchestrator
            .running()
            .into_iter()
            .map(|m| m.to_string())
            .collect(),
        subscribers: state.hub.subscriber_count(),
    };

    Json(response)
}
