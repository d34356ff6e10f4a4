//! API Routes

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;

use crate::control_bus::{parse_payload, ControlEnvelope};
use crate::error::{Error, Result};
use crate::models::{ApiResponse, EventsQuery};
use crate::orchestrator::{DispatchResult, Snapshot};
use crate::state::AppState;
use crate::worker::{Overrides, WorkerId};

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health / status
        .route("/healthz", get(super::health_check))
        .route("/api/status", get(status_snapshot))
        // Workers
        .route("/api/workers/:method", get(query_worker))
        .route("/api/workers/:method/start", post(start_worker))
        .route("/api/workers/:method/stop", post(stop_worker))
        // Raw control envelopes
        .route("/api/control", post(post_control))
        // Outbound history
        .route("/api/events", get(list_events))
        // WebSocket
        .route("/ws", get(ws_handler))
        // Legacy counter endpoints
        .route("/start_counter", post(legacy_start_counter))
        .route("/stop_counter", post(legacy_stop_counter))
        .route("/status", get(legacy_status))
        .with_state(state)
}

fn parse_method(raw: &str) -> Result<WorkerId> {
    raw.parse()
        .map_err(|_| Error::UnknownWorker(raw.trim().to_string()))
}

/// Request body as overrides: empty or `null` means none
fn parse_overrides(body: &Bytes) -> Result<Overrides> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Overrides::new());
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| Error::Validation(format!("invalid JSON body: {}", e)))?;
    match value {
        Value::Null => Ok(Overrides::new()),
        Value::Object(map) => Ok(map),
        _ => Err(Error::Validation(
            "overrides must be a JSON object".to_string(),
        )),
    }
}

async fn status_snapshot(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.orchestrator.snapshot())
}

async fn query_worker(
    State(state): State<AppState>,
    Path(method): Path<String>,
) -> Result<impl IntoResponse> {
    let method = parse_method(&method)?;
    Ok(Json(state.orchestrator.query(method)))
}

async fn start_worker(
    State(state): State<AppState>,
    Path(method): Path<String>,
    body: Bytes,
) -> Result<Json<DispatchResult>> {
    let method = parse_method(&method)?;
    let overrides = parse_overrides(&body)?;
    let envelope = ControlEnvelope::new("start", method.as_str(), overrides);
    Ok(Json(state.control_bus.dispatch(envelope).await))
}

async fn stop_worker(
    State(state): State<AppState>,
    Path(method): Path<String>,
) -> Result<Json<DispatchResult>> {
    let method = parse_method(&method)?;
    let envelope = ControlEnvelope::new("stop", method.as_str(), Overrides::new());
    Ok(Json(state.control_bus.dispatch(envelope).await))
}

/// Same envelope format as the message bus
async fn post_control(State(state): State<AppState>, body: Bytes) -> Result<Json<DispatchResult>> {
    let envelope = parse_payload(&body)?;
    Ok(Json(state.control_bus.dispatch(envelope).await))
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100);

    let events = if let Some(method) = query.method {
        state.event_log.get_by_method(&method.to_lowercase(), limit).await
    } else {
        state.event_log.get_latest(limit).await
    };

    Json(ApiResponse::success(events))
}

async fn legacy_start_counter(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DispatchResult>> {
    let overrides = parse_overrides(&body)?;
    let envelope = ControlEnvelope::new("start", WorkerId::Counter.as_str(), overrides);
    Ok(Json(state.control_bus.dispatch(envelope).await))
}

async fn legacy_stop_counter(State(state): State<AppState>) -> Json<DispatchResult> {
    let envelope = ControlEnvelope::new("stop", WorkerId::Counter.as_str(), Overrides::new());
    Json(state.control_bus.dispatch(envelope).await)
}

async fn legacy_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.query(WorkerId::Counter))
}

// ========================================
// WebSocket
// ========================================

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (sender, receiver) = socket.split();
    run_connection(sender, receiver, state).await;
}

/// Outbound: every hub message. Inbound: text frames are control envelopes.
async fn run_connection<S, R>(mut sender: S, mut receiver: R, state: AppState)
where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin + Send + 'static,
{
    let (conn_id, mut rx) = state.hub.register("websocket").await;
    tracing::info!(connection_id = %conn_id, "WebSocket client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let control_tx = state.control_tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            let payload = match result {
                Ok(Message::Text(text)) => text.into_bytes(),
                Ok(Message::Binary(data)) => data,
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %conn_id, "WebSocket client closed");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
            };
            if control_tx.send(payload).await.is_err() {
                tracing::warn!(connection_id = %conn_id, "Control listener gone, dropping message");
                break;
            }
        }
    });

    // whichever side finishes first ends the connection
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            let _ = recv_task.await;
        }
        _ = &mut recv_task => {
            send_task.abort();
            let _ = send_task.await;
        }
    }

    state.hub.unregister(&conn_id).await;
    tracing::info!(connection_id = %conn_id, "WebSocket connection closed");
}
