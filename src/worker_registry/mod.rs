//! WorkerRegistry - fixed worker id -> (worker, camera kind) table
//!
//! Built once at startup (together with one ResourceLock per camera kind)
//! and shared read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::realtime_hub::RealtimeHub;
use crate::resource_lock::{LockSnapshot, ResourceKind, ResourceLock};
use crate::worker::{
    CounterBehavior, FollowMeBehavior, ServiceWorker, TagBehavior, UnphysicsBehavior, Worker,
    WorkerBehavior, WorkerId, WorkerSettings, WorkerTimings,
};

/// Registered worker
#[derive(Clone)]
pub struct WorkerEntry {
    pub worker: Arc<dyn Worker>,
    pub kind: ResourceKind,
}

pub struct WorkerRegistry {
    /// Kept sorted by worker id (= priority order)
    entries: Vec<WorkerEntry>,
    locks: HashMap<ResourceKind, Arc<ResourceLock>>,
}

impl WorkerRegistry {
    pub fn new(locks: impl IntoIterator<Item = Arc<ResourceLock>>) -> Self {
        Self {
            entries: Vec::new(),
            locks: locks.into_iter().map(|lock| (lock.kind(), lock)).collect(),
        }
    }

    /// Add a worker; its camera kind must have a lock
    pub fn register(&mut self, worker: Arc<dyn Worker>) -> Result<()> {
        let id = worker.id();
        let kind = worker.kind();
        if self.get(id).is_some() {
            return Err(Error::Internal(format!("worker {} registered twice", id)));
        }
        if !self.locks.contains_key(&kind) {
            return Err(Error::Internal(format!("no lock for camera kind {}", kind)));
        }
        self.entries.push(WorkerEntry { worker, kind });
        self.entries.sort_by_key(|entry| entry.worker.id());
        tracing::debug!(method = %id, kind = %kind, "Worker registered");
        Ok(())
    }

    /// The four standard workers on one RGB lock and one depth lock
    pub fn standard(
        settings: &WorkerSettings,
        timings: WorkerTimings,
        release_grace: Duration,
        hub: Arc<RealtimeHub>,
    ) -> Result<Self> {
        let mut registry = Self::new(
            ResourceKind::ALL
                .into_iter()
                .map(|kind| Arc::new(ResourceLock::with_grace(kind, release_grace))),
        );

        let behaviors: Vec<Arc<dyn WorkerBehavior>> = vec![
            Arc::new(CounterBehavior::new(settings.counter.clone(), settings.rgb.clone())),
            Arc::new(UnphysicsBehavior::new(settings.unphysics.clone())),
            Arc::new(FollowMeBehavior::new(settings.follow_me.clone(), settings.rs.clone())),
            Arc::new(TagBehavior::new(settings.tag.clone())),
        ];
        for behavior in behaviors {
            let lock = registry
                .lock_for(behavior.kind())
                .cloned()
                .ok_or_else(|| Error::Internal(format!("no lock for {}", behavior.kind())))?;
            let worker = ServiceWorker::new(behavior, lock, hub.clone(), timings);
            registry.register(Arc::new(worker))?;
        }
        Ok(registry)
    }

    pub fn get(&self, id: WorkerId) -> Option<&Arc<dyn Worker>> {
        self.entries
            .iter()
            .find(|entry| entry.worker.id() == id)
            .map(|entry| &entry.worker)
    }

    pub fn kind_of(&self, id: WorkerId) -> Option<ResourceKind> {
        self.entries
            .iter()
            .find(|entry| entry.worker.id() == id)
            .map(|entry| entry.kind)
    }

    pub fn lock_for(&self, kind: ResourceKind) -> Option<&Arc<ResourceLock>> {
        self.locks.get(&kind)
    }

    /// Other workers on the same camera kind as `id`
    pub fn peers_of(&self, id: WorkerId) -> Vec<Arc<dyn Worker>> {
        let Some(kind) = self.kind_of(id) else {
            return Vec::new();
        };
        self.entries
            .iter()
            .filter(|entry| entry.kind == kind && entry.worker.id() != id)
            .map(|entry| entry.worker.clone())
            .collect()
    }

    /// Priority order
    pub fn iter(&self) -> impl Iterator<Item = &WorkerEntry> {
        self.entries.iter()
    }

    pub fn lock_snapshots(&self) -> Vec<LockSnapshot> {
        ResourceKind::ALL
            .into_iter()
            .filter_map(|kind| self.locks.get(&kind))
            .map(|lock| lock.snapshot())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard() -> WorkerRegistry {
        WorkerRegistry::standard(
            &WorkerSettings::default(),
            WorkerTimings::default(),
            Duration::from_millis(10),
            Arc::new(RealtimeHub::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_standard_kinds() {
        let registry = standard();
        assert_eq!(registry.kind_of(WorkerId::Counter), Some(ResourceKind::Rgb));
        assert_eq!(registry.kind_of(WorkerId::ControlUnphysics), Some(ResourceKind::Rgb));
        assert_eq!(registry.kind_of(WorkerId::TagData), Some(ResourceKind::Rgb));
        assert_eq!(registry.kind_of(WorkerId::FollowMe), Some(ResourceKind::Rs));
        assert_eq!(registry.lock_snapshots().len(), 2);
    }

    #[test]
    fn test_priority_order_and_peers() {
        let registry = standard();
        let order: Vec<WorkerId> = registry.iter().map(|e| e.worker.id()).collect();
        assert_eq!(order, WorkerId::ALL.to_vec());

        let peers: Vec<WorkerId> = registry
            .peers_of(WorkerId::Counter)
            .iter()
            .map(|w| w.id())
            .collect();
        assert_eq!(peers, vec![WorkerId::ControlUnphysics, WorkerId::TagData]);
        assert!(registry.peers_of(WorkerId::FollowMe).is_empty());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = standard();
        let hub = Arc::new(RealtimeHub::default());
        let lock = registry.lock_for(ResourceKind::Rgb).cloned().unwrap();
        let again = ServiceWorker::new(
            Arc::new(TagBehavior::new(Default::default())),
            lock,
            hub,
            WorkerTimings::default(),
        );
        assert!(registry.register(Arc::new(again)).is_err());
    }
}
