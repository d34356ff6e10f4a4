//! End-to-end orchestration on the synthetic backend

mod common;

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vision_svc::camera::{
    CameraDevice, CameraSpec, DeviceProvider, EngineEvent, FrameEngine, FramePair,
    SyntheticProvider,
};
use vision_svc::orchestrator::Orchestrator;
use vision_svc::realtime_hub::RealtimeHub;
use vision_svc::resource_lock::{ResourceKind, ResourceLock};
use vision_svc::worker::{
    CounterBehavior, FollowMeBehavior, Overrides, ServiceWorker, WorkerConfig, WorkerId,
    WorkerSettings,
};
use vision_svc::worker_registry::WorkerRegistry;

fn no_overrides() -> Overrides {
    Overrides::new()
}

#[tokio::test]
async fn test_preempt_and_cross_kind_scenario() {
    let state = common::app(common::provider());
    let orch = state.orchestrator.clone();

    let counter = orch.start(WorkerId::Counter, &no_overrides()).await;
    assert!(counter.ok);
    assert!(counter.running());

    // same camera kind: counter is preempted
    let unphysics = orch.start(WorkerId::ControlUnphysics, &no_overrides()).await;
    assert!(unphysics.running());
    assert!(!orch.query(WorkerId::Counter).running());

    // other camera kind: runs alongside
    let follow = orch.start(WorkerId::FollowMe, &no_overrides()).await;
    assert!(follow.running());
    assert_eq!(
        orch.running(),
        vec![WorkerId::ControlUnphysics, WorkerId::FollowMe]
    );

    let snapshot = orch.snapshot();
    assert_eq!(snapshot.current_method, "control_unphysics");
    assert!(snapshot.running);

    orch.stop_all().await;
    for id in [WorkerId::Counter, WorkerId::ControlUnphysics, WorkerId::FollowMe] {
        assert!(!orch.query(id).running(), "{} still running", id);
    }
    let snapshot = orch.snapshot();
    assert_eq!(snapshot.current_method, "idle");
    assert!(snapshot.locks.iter().all(|lock| lock.free && lock.holder.is_none()));
}

#[tokio::test]
async fn test_preempted_worker_stops_before_target_boots() {
    let state = common::app(common::provider());
    let (_id, mut rx) = state.hub.register("test").await;
    let orch = state.orchestrator.clone();

    orch.start(WorkerId::ControlUnphysics, &no_overrides()).await;
    orch.start(WorkerId::TagData, &no_overrides()).await;
    orch.stop_all().await;

    let mut states = Vec::new();
    while let Ok(text) = rx.try_recv() {
        let message: Value = serde_json::from_str(&text).unwrap();
        if message["type"] == "state" {
            states.push(format!(
                "{}:{}",
                message["payload"]["method"].as_str().unwrap(),
                message["payload"]["data"]["state"].as_str().unwrap()
            ));
        }
    }
    assert_eq!(
        states,
        vec![
            "control_unphysics:boot",
            "control_unphysics:stop",
            "tagdata:boot",
            "tagdata:stop",
        ]
    );
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let provider = common::provider();
    let state = common::app(provider.clone());
    let orch = state.orchestrator.clone();

    orch.start(WorkerId::FollowMe, &no_overrides()).await;
    orch.start(WorkerId::Counter, &no_overrides()).await;

    let again = orch.start(WorkerId::Counter, &no_overrides()).await;
    assert!(again.ok);
    assert!(again.running());
    assert_eq!(provider.open_count(ResourceKind::Rgb), 1);
    assert!(orch.query(WorkerId::FollowMe).running());

    orch.stop_all().await;
}

#[tokio::test]
async fn test_cross_kind_concurrent_start() {
    let state = common::app(common::provider());
    let orch = state.orchestrator.clone();

    let (ov_a, ov_b) = (Overrides::new(), Overrides::new());
    let (counter, follow) = tokio::join!(
        orch.start(WorkerId::Counter, &ov_a),
        orch.start(WorkerId::FollowMe, &ov_b),
    );
    assert!(counter.running());
    assert!(follow.running());
    assert_eq!(orch.running().len(), 2);

    orch.stop_all().await;
}

#[tokio::test]
async fn test_racing_same_kind_starts_never_overlap() {
    let state = common::app(common::provider());
    let orch = state.orchestrator.clone();
    let registry = state.registry.clone();

    let done = Arc::new(AtomicBool::new(false));
    let sampler = {
        let done = done.clone();
        tokio::spawn(async move {
            let mut worst = 0;
            while !done.load(Ordering::SeqCst) {
                let rgb_running = registry
                    .iter()
                    .filter(|e| e.kind == ResourceKind::Rgb && e.worker.is_running())
                    .count();
                worst = worst.max(rgb_running);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            worst
        })
    };

    let (ov_a, ov_b) = (Overrides::new(), Overrides::new());
    let (a, b) = tokio::join!(
        orch.start(WorkerId::Counter, &ov_a),
        orch.start(WorkerId::TagData, &ov_b),
    );
    done.store(true, Ordering::SeqCst);

    assert!(sampler.await.unwrap() <= 1);
    let running = [a.running(), b.running()];
    assert!(running.iter().filter(|r| **r).count() <= 1);
    assert!(orch.running().len() <= 1);

    orch.stop_all().await;
}

#[tokio::test]
async fn test_dead_camera_gives_up_after_bounded_attempts() {
    let provider = common::provider().with_dead_camera(ResourceKind::Rgb);
    let state = common::app(provider.clone());
    let orch = state.orchestrator.clone();

    let result = orch.start(WorkerId::Counter, &no_overrides()).await;
    assert!(!result.running());
    assert!(result.error.is_some());
    assert_eq!(provider.open_count(ResourceKind::Rgb), 5);
    assert_eq!(provider.close_count(ResourceKind::Rgb), 5);

    let lock = state.registry.lock_for(ResourceKind::Rgb).unwrap();
    assert!(lock.is_free());
}

#[tokio::test]
async fn test_unregistered_worker_stops_everything() {
    let config = common::fast_config();
    let hub = Arc::new(RealtimeHub::default());
    let rgb = Arc::new(ResourceLock::with_grace(ResourceKind::Rgb, config.release_grace));
    let rs = Arc::new(ResourceLock::with_grace(ResourceKind::Rs, config.release_grace));
    let settings = WorkerSettings::default();

    let mut registry = WorkerRegistry::new([rgb.clone(), rs.clone()]);
    registry
        .register(Arc::new(ServiceWorker::new(
            Arc::new(CounterBehavior::new(settings.counter.clone(), settings.rgb.clone())),
            rgb,
            hub.clone(),
            config.worker,
        )))
        .unwrap();
    registry
        .register(Arc::new(ServiceWorker::new(
            Arc::new(FollowMeBehavior::new(settings.follow_me.clone(), settings.rs.clone())),
            rs,
            hub,
            config.worker,
        )))
        .unwrap();

    let provider: SyntheticProvider = common::provider();
    let orch = Orchestrator::new(Arc::new(registry), Arc::new(provider), config.orchestrator);

    assert!(orch.start(WorkerId::Counter, &no_overrides()).await.running());
    assert!(orch.start(WorkerId::FollowMe, &no_overrides()).await.running());

    let result = orch.start(WorkerId::TagData, &no_overrides()).await;
    assert!(!result.ok);
    assert!(!result.running());
    assert!(orch.running().is_empty());
}

#[tokio::test]
async fn test_oversized_counter_window_leaves_camera_usable() {
    let state = common::app(common::provider());
    let orch = state.orchestrator.clone();
    let overrides = json!({"enter_window": 1e300}).as_object().cloned().unwrap();

    let result = tokio::spawn({
        let orch = orch.clone();
        async move { orch.start(WorkerId::Counter, &overrides).await }
    })
    .await
    .expect("start must not panic");
    assert!(!result.ok);
    assert!(!result.running());
    assert!(result.error.unwrap().contains("enter_window"));

    let lock = state.registry.lock_for(ResourceKind::Rgb).unwrap();
    assert_eq!(lock.holder(), None);

    let unphysics = orch.start(WorkerId::ControlUnphysics, &no_overrides()).await;
    assert!(unphysics.running(), "{:?}", unphysics.error);
    orch.stop_all().await;
}

/// Synthetic devices, but the counter's engine hangs on its first frame
struct HangingCounterProvider {
    inner: SyntheticProvider,
    stall: Duration,
}

struct HangingEngine {
    stall: Duration,
}

impl FrameEngine for HangingEngine {
    fn step(&mut self, _frames: &FramePair) -> Vec<EngineEvent> {
        std::thread::sleep(self.stall);
        Vec::new()
    }
}

impl DeviceProvider for HangingCounterProvider {
    fn open_camera(&self, spec: &CameraSpec) -> vision_svc::Result<Box<dyn CameraDevice>> {
        self.inner.open_camera(spec)
    }

    fn engine(
        &self,
        method: WorkerId,
        config: &WorkerConfig,
    ) -> vision_svc::Result<Box<dyn FrameEngine>> {
        if method == WorkerId::Counter {
            return Ok(Box::new(HangingEngine { stall: self.stall }));
        }
        self.inner.engine(method, config)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn test_stuck_worker_does_not_block_preemption() {
    let config = common::fast_config();
    let join_timeout = config.worker.join_timeout;
    let grace = config.release_grace;
    let provider = HangingCounterProvider {
        inner: common::provider(),
        stall: Duration::from_millis(2000),
    };
    let (state, _rx) = vision_svc::AppState::build(config, Arc::new(provider)).unwrap();
    let orch = state.orchestrator.clone();

    assert!(orch.start(WorkerId::Counter, &no_overrides()).await.running());
    tokio::time::sleep(Duration::from_millis(50)).await;

    // preemption sweep goes through the bounded join
    let began = Instant::now();
    let tag = orch.start(WorkerId::TagData, &no_overrides()).await;
    assert!(tag.running(), "{:?}", tag.error);
    assert!(began.elapsed() < join_timeout + grace + Duration::from_millis(1000));
    assert!(!orch.query(WorkerId::Counter).running());
    assert_eq!(orch.running(), vec![WorkerId::TagData]);
    orch.stop_all().await;

    // a direct stop of a stuck worker reports the failure but still succeeds
    assert!(orch.start(WorkerId::Counter, &no_overrides()).await.running());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let began = Instant::now();
    let stopped = orch.stop(WorkerId::Counter).await;
    assert!(began.elapsed() < join_timeout + grace + Duration::from_millis(300));
    assert!(stopped.ok);
    assert!(!stopped.running());
    assert!(stopped.error.unwrap().contains("join timed out"));
    let lock = state.registry.lock_for(ResourceKind::Rgb).unwrap();
    assert!(lock.is_free());
}
