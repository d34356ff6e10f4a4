//! RealtimeHub - outbound result/event channel
//!
//! ## Responsibilities
//!
//! - Subscriber management (WebSocket clients, in-process listeners)
//! - Fan-out of command results and unsolicited worker events
//! - Recording every outbound message in the EventLogService
//!
//! Results and events share one stream; consumers tell them apart by shape
//! (`ok`/`running` vs `type`/`payload`).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::event_log_service::EventLogService;
use crate::orchestrator::DispatchResult;
use crate::worker::WorkerId;

/// Worker event discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    State,
    Detect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub method: WorkerId,
    pub data: Value,
}

/// Unsolicited worker event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub payload: EventPayload,
}

impl WorkerEvent {
    /// `{"type": "state", "payload": {"method": .., "data": {"state": ..}}}`
    pub fn state(method: WorkerId, state: impl Into<String>) -> Self {
        Self {
            kind: EventKind::State,
            payload: EventPayload {
                method,
                data: json!({ "state": state.into() }),
            },
        }
    }

    pub fn detect(method: WorkerId, data: Value) -> Self {
        Self {
            kind: EventKind::Detect,
            payload: EventPayload { method, data },
        }
    }
}

/// Anything published on the outbound channel
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Result(DispatchResult),
    Event(WorkerEvent),
}

impl OutboundMessage {
    fn method(&self) -> Option<String> {
        match self {
            Self::Result(result) => result.method().map(|m| m.to_string()),
            Self::Event(event) => Some(event.payload.method.to_string()),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Result(_) => "result",
            Self::Event(event) => match event.kind {
                EventKind::State => "state",
                EventKind::Detect => "detect",
            },
        }
    }
}

impl From<WorkerEvent> for OutboundMessage {
    fn from(event: WorkerEvent) -> Self {
        Self::Event(event)
    }
}

impl From<DispatchResult> for OutboundMessage {
    fn from(result: DispatchResult) -> Self {
        Self::Result(result)
    }
}

/// Subscriber connection
struct Subscriber {
    id: Uuid,
    label: String,
    tx: mpsc::UnboundedSender<String>,
}

/// RealtimeHub instance
pub struct RealtimeHub {
    subscribers: RwLock<HashMap<Uuid, Subscriber>>,
    subscriber_count: AtomicU64,
    event_log: Arc<EventLogService>,
}

impl RealtimeHub {
    pub fn new(event_log: Arc<EventLogService>) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            subscriber_count: AtomicU64::new(0),
            event_log,
        }
    }

    /// Register a subscriber; receives every outbound message as JSON text
    pub async fn register(&self, label: impl Into<String>) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let label = label.into();
        let (tx, rx) = mpsc::unbounded_channel();

        self.subscribers.write().await.insert(
            id,
            Subscriber {
                id,
                label: label.clone(),
                tx,
            },
        );
        self.subscriber_count.fetch_add(1, Ordering::Relaxed);

        tracing::info!(subscriber_id = %id, label = %label, "Subscriber connected");
        (id, rx)
    }

    pub async fn unregister(&self, id: &Uuid) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(sub) = subscribers.remove(id) {
            self.subscriber_count.fetch_sub(1, Ordering::Relaxed);
            tracing::info!(subscriber_id = %id, label = %sub.label, "Subscriber disconnected");
        }
    }

    /// Publish one outbound message (fire-and-forget)
    pub async fn publish(&self, message: impl Into<OutboundMessage>) {
        let message = message.into();
        let value = match serde_json::to_value(&message) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize outbound message");
                return;
            }
        };
        let text = value.to_string();
        tracing::debug!(message_type = message.label(), payload = %text, "Publishing");

        self.event_log.record(message.method(), value).await;

        let subscribers = self.subscribers.read().await;
        for sub in subscribers.values() {
            if let Err(e) = sub.tx.send(text.clone()) {
                tracing::warn!(subscriber_id = %sub.id, error = %e, "Failed to deliver message");
            }
        }
    }

    pub fn subscriber_count(&self) -> u64 {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    pub fn event_log(&self) -> &Arc<EventLogService> {
        &self.event_log
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new(Arc::new(EventLogService::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = WorkerEvent::state(WorkerId::ControlUnphysics, "boot");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "state", "payload": {"method": "control_unphysics", "data": {"state": "boot"}}})
        );

        let detect = WorkerEvent::detect(WorkerId::Counter, json!({"action": "IN"}));
        assert_eq!(serde_json::to_value(&detect).unwrap()["type"], "detect");
    }

    #[tokio::test]
    async fn test_publish_fans_out_and_records() {
        let hub = RealtimeHub::default();
        let (id_a, mut rx_a) = hub.register("a").await;
        let (_id_b, mut rx_b) = hub.register("b").await;
        assert_eq!(hub.subscriber_count(), 2);

        hub.publish(WorkerEvent::detect(WorkerId::FollowMe, json!({"event": "registered"})))
            .await;

        let a: Value = serde_json::from_str(&rx_a.recv().await.unwrap()).unwrap();
        let b: Value = serde_json::from_str(&rx_b.recv().await.unwrap()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a["payload"]["data"]["event"], "registered");
        assert_eq!(hub.event_log().count().await, 1);

        hub.unregister(&id_a).await;
        assert_eq!(hub.subscriber_count(), 1);
    }
}
