//! EventLogService - outbound message history (ring buffer)
//!
//! Every message the hub fans out (command results and worker events) is
//! recorded here so late subscribers and `/api/events` can see recent traffic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Default ring capacity
pub const DEFAULT_CAPACITY: usize = 2000;

/// One recorded outbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundRecord {
    pub event_id: u64,
    pub recorded_at: DateTime<Utc>,
    /// Worker the message is about, if any (snapshots have none)
    pub method: Option<String>,
    pub message: Value,
}

struct RecordRing {
    records: VecDeque<OutboundRecord>,
    capacity: usize,
    next_id: u64,
}

impl RecordRing {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    fn push(&mut self, method: Option<String>, message: Value) -> u64 {
        let event_id = self.next_id;
        self.next_id += 1;

        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(OutboundRecord {
            event_id,
            recorded_at: Utc::now(),
            method,
            message,
        });
        event_id
    }

    fn latest(&self, count: usize) -> Vec<OutboundRecord> {
        self.records.iter().rev().take(count).cloned().collect()
    }

    fn by_method(&self, method: &str, count: usize) -> Vec<OutboundRecord> {
        self.records
            .iter()
            .rev()
            .filter(|r| r.method.as_deref() == Some(method))
            .take(count)
            .cloned()
            .collect()
    }
}

/// EventLogService instance
pub struct EventLogService {
    buffer: RwLock<RecordRing>,
}

impl EventLogService {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(RecordRing::new(capacity)),
        }
    }

    /// Record a message, returns its id
    pub async fn record(&self, method: Option<String>, message: Value) -> u64 {
        let mut buffer = self.buffer.write().await;
        let id = buffer.push(method, message);
        tracing::trace!(event_id = id, "Outbound message recorded");
        id
    }

    /// Newest first
    pub async fn get_latest(&self, count: usize) -> Vec<OutboundRecord> {
        self.buffer.read().await.latest(count)
    }

    pub async fn get_by_method(&self, method: &str, count: usize) -> Vec<OutboundRecord> {
        self.buffer.read().await.by_method(method, count)
    }

    pub async fn count(&self) -> usize {
        self.buffer.read().await.records.len()
    }
}

impl Default for EventLogService {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
