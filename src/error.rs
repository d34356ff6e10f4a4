//! Error handling for the vision control plane

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::resource_lock::ResourceKind;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Camera lock held by another worker
    #[error("Camera '{kind}' is busy (held by {holder})")]
    ResourceBusy { kind: ResourceKind, holder: String },

    /// Inbound control payload could not be parsed
    #[error("Malformed control message: {0}")]
    MalformedControlMessage(String),

    /// Worker could not be brought up (device open failure, no frames)
    #[error("Worker {method} failed to start: {message}")]
    WorkerStart { method: String, message: String },

    /// Worker stop path failed (loop stuck, task panicked)
    #[error("Worker {method} failed to stop cleanly: {message}")]
    WorkerStop { method: String, message: String },

    /// Override validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Worker identifier not known / not registered
    #[error("Unknown worker: {0}")]
    UnknownWorker(String),

    /// Camera or engine backend error
    #[error("Device error: {0}")]
    Device(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Busy / start failures are expected outcomes that the orchestrator retries
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ResourceBusy { .. } | Error::WorkerStart { .. } | Error::Device(_)
        )
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            Error::ResourceBusy { .. } => (StatusCode::CONFLICT, "RESOURCE_BUSY"),
            Error::MalformedControlMessage(_) => (StatusCode::BAD_REQUEST, "MALFORMED_MESSAGE"),
            Error::WorkerStart { .. } => (StatusCode::SERVICE_UNAVAILABLE, "WORKER_START_FAILED"),
            Error::WorkerStop { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "WORKER_STOP_FAILED"),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            Error::UnknownWorker(_) => (StatusCode::NOT_FOUND, "UNKNOWN_WORKER"),
            Error::Device(_) => (StatusCode::SERVICE_UNAVAILABLE, "DEVICE_ERROR"),
            Error::Serialization(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SERIALIZATION_ERROR"),
            Error::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        let message = self.to_string();

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
