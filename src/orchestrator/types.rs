//! Orchestrator result types

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::resource_lock::LockSnapshot;
use crate::worker::{WorkerId, WorkerStatus};

/// Per-worker lifecycle phase as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerPhase {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

/// Orchestration timing knobs
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorTimings {
    /// Upper bound on waiting for a preempted camera to free up
    pub lock_wait_timeout: Duration,
    pub lock_poll_step: Duration,
    /// Pause between preemption and the first start attempt
    pub settle_delay: Duration,
    pub start_attempts: u32,
    /// Pause after each attempt that did not end up running
    pub retry_delay: Duration,
}

impl Default for OrchestratorTimings {
    fn default() -> Self {
        Self {
            lock_wait_timeout: Duration::from_millis(5000),
            lock_poll_step: Duration::from_millis(50),
            settle_delay: Duration::from_millis(200),
            start_attempts: 5,
            retry_delay: Duration::from_millis(300),
        }
    }
}

/// Worker status plus orchestrator phase
#[derive(Debug, Clone, Serialize)]
pub struct WorkerView {
    #[serde(flatten)]
    pub status: WorkerStatus,
    pub phase: WorkerPhase,
}

/// Result of start/stop/query on one worker
///
/// `ok` says the command was handled; callers check `running` for the
/// actual outcome.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub ok: bool,
    #[serde(flatten)]
    pub worker: WorkerView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResult {
    pub fn running(&self) -> bool {
        self.worker.status.running
    }

    pub fn method(&self) -> WorkerId {
        self.worker.status.method
    }
}

/// Whole-system status
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub ok: bool,
    /// Any worker running
    pub running: bool,
    /// Highest-priority running worker, or "idle"
    pub current_method: String,
    /// Method named by the request that produced this snapshot, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested: Option<String>,
    pub workers: BTreeMap<WorkerId, WorkerView>,
    pub locks: Vec<LockSnapshot>,
}

/// What a control dispatch returns (and publishes)
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum DispatchResult {
    Command(CommandResult),
    Snapshot(Snapshot),
}

impl DispatchResult {
    pub fn ok(&self) -> bool {
        match self {
            Self::Command(result) => result.ok,
            Self::Snapshot(snapshot) => snapshot.ok,
        }
    }

    pub fn running(&self) -> bool {
        match self {
            Self::Command(result) => result.running(),
            Self::Snapshot(snapshot) => snapshot.running,
        }
    }

    /// Worker this result is about
    pub fn method(&self) -> Option<WorkerId> {
        match self {
            Self::Command(result) => Some(result.method()),
            Self::Snapshot(_) => None,
        }
    }
}
