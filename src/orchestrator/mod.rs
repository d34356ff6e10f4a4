//! Orchestrator - start/stop arbitration across workers
//!
//! ## Start sequence
//!
//! 1. Target already running: return its status
//! 2. Stop running workers on the same camera kind (other kinds keep running)
//! 3. Poll the camera lock until free (bounded, best effort)
//! 4. Settle delay
//! 5. Up to N start attempts with a delay after each one that did not come up
//!
//! Every call blocks its caller for the whole sequence. Worker failures are
//! logged and folded into the returned result; nothing propagates.

mod types;

pub use types::{
    CommandResult, DispatchResult, OrchestratorTimings, Snapshot, WorkerPhase, WorkerView,
};

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::camera::DeviceProvider;
use crate::error::{Error, Result};
use crate::worker::{Overrides, Worker, WorkerId, WorkerStatus};
use crate::worker_registry::WorkerRegistry;

pub struct Orchestrator {
    registry: Arc<WorkerRegistry>,
    provider: Arc<dyn DeviceProvider>,
    timings: OrchestratorTimings,
    phases: Mutex<HashMap<WorkerId, WorkerPhase>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        provider: Arc<dyn DeviceProvider>,
        timings: OrchestratorTimings,
    ) -> Self {
        Self {
            registry,
            provider,
            timings,
            phases: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    fn set_phase(&self, method: WorkerId, phase: WorkerPhase) {
        self.phases.lock().insert(method, phase);
    }

    fn phase_of(&self, worker: &dyn Worker) -> WorkerPhase {
        let recorded = self.phases.lock().get(&worker.id()).copied().unwrap_or_default();
        match recorded {
            WorkerPhase::Starting | WorkerPhase::Stopping => recorded,
            // a loop may have died on its own since the last command
            _ if worker.is_running() => WorkerPhase::Running,
            _ => WorkerPhase::Idle,
        }
    }

    fn view(&self, worker: &dyn Worker) -> WorkerView {
        WorkerView {
            status: worker.status(),
            phase: self.phase_of(worker),
        }
    }

    fn result(&self, worker: &dyn Worker, ok: bool, error: Option<String>) -> CommandResult {
        CommandResult {
            ok,
            worker: self.view(worker),
            error,
        }
    }

    fn unregistered(&self, method: WorkerId) -> CommandResult {
        CommandResult {
            ok: false,
            worker: WorkerView {
                status: WorkerStatus::idle(method, method.default_kind()),
                phase: WorkerPhase::Idle,
            },
            error: Some(Error::UnknownWorker(method.to_string()).to_string()),
        }
    }

    /// Start `method`, preempting same-kind workers
    pub async fn start(&self, method: WorkerId, overrides: &Overrides) -> CommandResult {
        let Some(worker) = self.registry.get(method).cloned() else {
            // camera kind cannot be determined: clear the field entirely
            tracing::warn!(method = %method, "No camera kind known for worker, stopping all workers");
            self.stop_all().await;
            return self.unregistered(method);
        };

        if worker.is_running() {
            tracing::info!(method = %method, "Start ignored: already running");
            return self.result(worker.as_ref(), true, None);
        }

        self.set_phase(method, WorkerPhase::Starting);
        let kind = worker.kind();

        for peer in self.registry.peers_of(method) {
            if peer.is_running() {
                tracing::info!(method = %peer.id(), kind = %kind, target = %method, "Preempting worker on the same camera");
                self.stop(peer.id()).await;
            }
        }

        if let Some(lock) = self.registry.lock_for(kind) {
            let free = lock
                .poll_free(self.timings.lock_wait_timeout, self.timings.lock_poll_step)
                .await;
            if !free {
                tracing::warn!(
                    method = %method,
                    kind = %kind,
                    holder = ?lock.holder(),
                    "Camera still busy after waiting, trying anyway"
                );
            }
        }
        tokio::time::sleep(self.timings.settle_delay).await;

        let mut last_error = None;
        for attempt in 1..=self.timings.start_attempts {
            match self.start_once(worker.as_ref(), overrides).await {
                Ok(()) => {}
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(method = %method, error = %e, "Start rejected");
                    self.set_phase(method, WorkerPhase::Idle);
                    return self.result(worker.as_ref(), false, Some(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(method = %method, attempt, error = %e, "Start attempt failed");
                    last_error = Some(e.to_string());
                }
            }

            if worker.is_running() {
                self.set_phase(method, WorkerPhase::Running);
                tracing::info!(method = %method, kind = %kind, attempt, "Worker running");
                return self.result(worker.as_ref(), true, None);
            }
            tokio::time::sleep(self.timings.retry_delay).await;
        }

        tracing::error!(
            method = %method,
            attempts = self.timings.start_attempts,
            error = last_error.as_deref().unwrap_or("not running"),
            "Worker did not start"
        );
        self.set_phase(method, WorkerPhase::Idle);
        self.result(worker.as_ref(), true, last_error)
    }

    async fn start_once(&self, worker: &dyn Worker, overrides: &Overrides) -> Result<()> {
        let config = worker.configure(overrides)?;
        let camera = self.provider.open_camera(&config.camera)?;
        let engine = self.provider.engine(worker.id(), &config)?;
        worker.start(camera, engine, config).await
    }

    /// Stop `method` (no-op when idle); never fails
    pub async fn stop(&self, method: WorkerId) -> CommandResult {
        let Some(worker) = self.registry.get(method).cloned() else {
            return self.unregistered(method);
        };

        if !worker.is_running() {
            // still reap a loop that exited on its own
            if let Err(e) = worker.stop().await {
                tracing::warn!(method = %method, error = %e, "Stop failed");
            }
            self.set_phase(method, WorkerPhase::Idle);
            return self.result(worker.as_ref(), true, None);
        }

        self.set_phase(method, WorkerPhase::Stopping);
        let error = match worker.stop().await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(method = %method, error = %e, "Stop failed");
                Some(e.to_string())
            }
        };
        self.set_phase(method, WorkerPhase::Idle);
        tracing::info!(method = %method, "Worker stopped");
        self.result(worker.as_ref(), true, error)
    }

    /// Stop every running worker, regardless of camera kind
    pub async fn stop_all(&self) -> Vec<CommandResult> {
        let mut results = Vec::new();
        for entry in self.registry.iter() {
            let method = entry.worker.id();
            if entry.worker.is_running() || self.phase_of(entry.worker.as_ref()) != WorkerPhase::Idle {
                results.push(self.stop(method).await);
            }
        }
        tracing::info!(stopped = results.len(), "All workers stopped");
        results
    }

    pub fn query(&self, method: WorkerId) -> CommandResult {
        match self.registry.get(method) {
            Some(worker) => self.result(worker.as_ref(), true, None),
            None => self.unregistered(method),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut workers = BTreeMap::new();
        let mut current = None;
        for entry in self.registry.iter() {
            let view = self.view(entry.worker.as_ref());
            if view.status.running && current.is_none() {
                current = Some(entry.worker.id());
            }
            workers.insert(entry.worker.id(), view);
        }

        Snapshot {
            ok: true,
            running: current.is_some(),
            current_method: current.map_or_else(|| "idle".to_string(), |m| m.to_string()),
            requested: None,
            workers,
            locks: self.registry.lock_snapshots(),
        }
    }

    /// Ids of running workers, priority order
    pub fn running(&self) -> Vec<WorkerId> {
        self.registry
            .iter()
            .filter(|entry| entry.worker.is_running())
            .map(|entry| entry.worker.id())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::SyntheticProvider;
    use crate::realtime_hub::RealtimeHub;
    use crate::resource_lock::ResourceKind;
    use crate::worker::{WorkerSettings, WorkerTimings};
    use serde_json::json;
    use std::time::Duration;

    fn fast_timings() -> OrchestratorTimings {
        OrchestratorTimings {
            lock_wait_timeout: Duration::from_millis(500),
            lock_poll_step: Duration::from_millis(5),
            settle_delay: Duration::from_millis(5),
            start_attempts: 5,
            retry_delay: Duration::from_millis(5),
        }
    }

    fn orchestrator(provider: SyntheticProvider) -> Orchestrator {
        let timings = WorkerTimings {
            join_timeout: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(50),
            ..WorkerTimings::default()
        };
        let registry = WorkerRegistry::standard(
            &WorkerSettings::default(),
            timings,
            Duration::from_millis(10),
            Arc::new(RealtimeHub::default()),
        )
        .unwrap();
        Orchestrator::new(Arc::new(registry), Arc::new(provider), fast_timings())
    }

    fn provider() -> SyntheticProvider {
        SyntheticProvider::new().with_frame_interval(Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_start_then_query() {
        let orch = orchestrator(provider());

        let result = orch.start(WorkerId::Counter, &Overrides::new()).await;
        assert!(result.ok);
        assert!(result.running());
        assert_eq!(result.worker.phase, WorkerPhase::Running);

        let query = orch.query(WorkerId::Counter);
        assert!(query.running());
        assert_eq!(orch.snapshot().current_method, "counter");

        orch.stop_all().await;
        assert!(orch.running().is_empty());
    }

    #[tokio::test]
    async fn test_preemption_same_kind() {
        let orch = orchestrator(provider());

        assert!(orch.start(WorkerId::Counter, &Overrides::new()).await.running());
        let result = orch.start(WorkerId::TagData, &Overrides::new()).await;

        assert!(result.running());
        assert_eq!(orch.running(), vec![WorkerId::TagData]);
        orch.stop_all().await;
    }

    #[tokio::test]
    async fn test_validation_error_not_retried() {
        let provider = provider();
        let orch = orchestrator(provider.clone());
        let overrides = json!({"line_x": 7}).as_object().cloned().unwrap();

        let result = orch.start(WorkerId::Counter, &overrides).await;
        assert!(!result.ok);
        assert!(!result.running());
        assert!(result.error.unwrap().contains("line_x"));
        assert_eq!(provider.open_count(ResourceKind::Rgb), 0);
    }

    #[tokio::test]
    async fn test_stop_idle_is_noop() {
        let orch = orchestrator(provider());
        let result = orch.stop(WorkerId::FollowMe).await;
        assert!(result.ok);
        assert!(!result.running());
        assert_eq!(result.worker.phase, WorkerPhase::Idle);
    }

    #[tokio::test]
    async fn test_snapshot_priority() {
        let orch = orchestrator(provider());
        orch.start(WorkerId::FollowMe, &Overrides::new()).await;
        assert_eq!(orch.snapshot().current_method, "follow_me");

        orch.start(WorkerId::ControlUnphysics, &Overrides::new()).await;
        let snapshot = orch.snapshot();
        assert_eq!(snapshot.current_method, "control_unphysics");
        assert!(snapshot.workers[&WorkerId::FollowMe].status.running);
        assert!(snapshot.locks.iter().all(|l| !l.free));

        orch.stop_all().await;
        let snapshot = orch.snapshot();
        assert_eq!(snapshot.current_method, "idle");
        assert!(!snapshot.running);
    }
}
