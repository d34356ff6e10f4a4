//! ControlBus - inbound control messages -> orchestrator -> outbound results
//!
//! ## Message flow
//!
//! ```text
//! bytes -> parse_payload -> ControlEnvelope -> Orchestrator -> publish result
//! ```
//!
//! Inbound messages may arrive concurrently from any transport (HTTP, the
//! WebSocket, an external broker bridge). The listener handles each one on its
//! own task, so a slow preempt-and-start does not hold up a `stop`.
//! Malformed payloads are logged and dropped without a reply.

mod types;

pub use types::{ControlAction, ControlEnvelope};

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::orchestrator::{DispatchResult, Orchestrator};
use crate::realtime_hub::RealtimeHub;
use crate::worker::Overrides;

/// Decode an inbound payload into a control envelope
///
/// Tolerates CRLF line endings, a UTF-8 BOM, NUL padding and one level of
/// double encoding (a JSON string holding the JSON object).
pub fn parse_payload(bytes: &[u8]) -> Result<ControlEnvelope> {
    let text = String::from_utf8_lossy(bytes)
        .replace("\r\n", "\n")
        .replace('\r', "\n");
    let text = text
        .trim()
        .trim_start_matches('\u{feff}')
        .trim_matches('\0')
        .trim();
    if text.is_empty() {
        return Err(Error::MalformedControlMessage("empty payload".to_string()));
    }

    let mut data: Value = serde_json::from_str(text)
        .map_err(|e| Error::MalformedControlMessage(format!("invalid JSON: {}", e)))?;
    if let Value::String(inner) = &data {
        data = serde_json::from_str(inner).map_err(|e| {
            Error::MalformedControlMessage(format!("double-encoded payload is not JSON: {}", e))
        })?;
    }

    let Value::Object(mut object) = data else {
        return Err(Error::MalformedControlMessage(
            "payload must be a JSON object".to_string(),
        ));
    };

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let mut payload = match object.remove("payload") {
        None | Some(Value::Null) => serde_json::Map::new(),
        Some(Value::Object(payload)) => payload,
        Some(_) => {
            return Err(Error::MalformedControlMessage(
                "'payload' must be an object".to_string(),
            ))
        }
    };
    let method = payload
        .get("method")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    if kind.is_empty() || method.is_empty() {
        return Err(Error::MalformedControlMessage(
            "missing 'type' or 'payload.method'".to_string(),
        ));
    }

    let overrides: Overrides = match payload.remove("overrides") {
        None | Some(Value::Null) => Overrides::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(Error::MalformedControlMessage(
                "'overrides' must be an object".to_string(),
            ))
        }
    };

    Ok(ControlEnvelope::new(kind, method, overrides))
}

/// ControlBus instance
pub struct ControlBus {
    orchestrator: Arc<Orchestrator>,
    hub: Arc<RealtimeHub>,
}

impl ControlBus {
    pub fn new(orchestrator: Arc<Orchestrator>, hub: Arc<RealtimeHub>) -> Self {
        Self { orchestrator, hub }
    }

    /// Parse and dispatch raw bytes; None when the payload was malformed
    pub async fn handle_raw(&self, bytes: &[u8]) -> Option<DispatchResult> {
        match parse_payload(bytes) {
            Ok(envelope) => Some(self.dispatch(envelope).await),
            Err(e) => {
                error!(error = %e, payload = %String::from_utf8_lossy(bytes), "Dropping control message");
                None
            }
        }
    }

    /// Route one envelope and publish the result
    pub async fn dispatch(&self, envelope: ControlEnvelope) -> DispatchResult {
        debug!(method = %envelope.method, kind = %envelope.kind, "Control message");

        let result = match (envelope.action(), envelope.target()) {
            (Some(ControlAction::Start), Some(method)) => {
                DispatchResult::Command(self.orchestrator.start(method, &envelope.overrides).await)
            }
            (Some(ControlAction::Stop), Some(method)) => {
                DispatchResult::Command(self.orchestrator.stop(method).await)
            }
            (Some(ControlAction::Set), Some(method)) => {
                if !envelope.overrides.is_empty() {
                    debug!(method = %method, "Overrides on 'set' are not applied to a running worker");
                }
                DispatchResult::Command(self.orchestrator.query(method))
            }
            _ => {
                warn!(method = %envelope.method, kind = %envelope.kind, "Unknown control target, answering with snapshot");
                let mut snapshot = self.orchestrator.snapshot();
                snapshot.requested = Some(envelope.method.clone());
                DispatchResult::Snapshot(snapshot)
            }
        };

        info!(
            method = %envelope.method,
            kind = %envelope.kind,
            ok = result.ok(),
            running = result.running(),
            "Control handled"
        );
        self.hub.publish(result.clone()).await;
        result
    }

    /// Consume raw payloads until `shutdown` fires; one task per message
    pub fn spawn_listener(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Vec<u8>>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Control listener started");
            loop {
                let bytes = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(bytes) => bytes,
                        None => break,
                    },
                };
                let bus = self.clone();
                tokio::spawn(async move {
                    bus.handle_raw(&bytes).await;
                });
            }
            info!("Control listener stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::WorkerId;

    #[test]
    fn test_parse_plain() {
        let envelope = parse_payload(
            br#"{"type":"Start","payload":{"method":"COUNTER","overrides":{"line_x":0.4}}}"#,
        )
        .unwrap();
        assert_eq!(envelope.action(), Some(ControlAction::Start));
        assert_eq!(envelope.target(), Some(WorkerId::Counter));
        assert_eq!(envelope.overrides["line_x"], 0.4);
    }

    #[test]
    fn test_parse_dirty_payload() {
        let raw = "\u{feff}{\"type\":\"stop\",\r\n\"payload\":{\"method\":\"follow_me\"}}\0\0";
        let envelope = parse_payload(raw.as_bytes()).unwrap();
        assert_eq!(envelope.action(), Some(ControlAction::Stop));
        assert!(envelope.overrides.is_empty());
    }

    #[test]
    fn test_parse_double_encoded() {
        let inner = r#"{"type":"set","payload":{"method":"tagdata","overrides":null}}"#;
        let outer = serde_json::to_string(inner).unwrap();
        let envelope = parse_payload(outer.as_bytes()).unwrap();
        assert_eq!(envelope.action(), Some(ControlAction::Set));
        assert_eq!(envelope.target(), Some(WorkerId::TagData));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        let cases: [&[u8]; 7] = [
            b"",
            b"not json",
            b"[1,2]",
            br#""just a string""#,
            br#"{"payload":{"method":"counter"}}"#,
            br#"{"type":"start","payload":{}}"#,
            br#"{"type":"start","payload":{"method":"counter","overrides":[1]}}"#,
        ];
        for raw in cases {
            assert!(
                matches!(parse_payload(raw), Err(Error::MalformedControlMessage(_))),
                "accepted {:?}",
                String::from_utf8_lossy(raw)
            );
        }
    }

    #[test]
    fn test_unknown_method_still_parses() {
        let envelope = parse_payload(br#"{"type":"start","payload":{"method":"lidar"}}"#).unwrap();
        assert_eq!(envelope.method, "lidar");
        assert_eq!(envelope.target(), None);
    }
}
