//! ServiceWorker - shared worker lifecycle
//!
//! ## Lifecycle
//!
//! ```text
//! start: try_acquire(lock) -> open camera -> probe first frame -> spawn loop
//! loop:  get_frames -> engine.step -> translate -> publish   (until cancelled)
//! stop:  cancel -> bounded join -> release lock (grace)
//! ```
//!
//! Start and stop are serialized per worker. What a worker publishes and how
//! it validates overrides is delegated to its [`WorkerBehavior`].

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{OverrideReader, Overrides, Worker, WorkerConfig, WorkerId, WorkerStatus};
use crate::camera::{CameraDevice, EngineEvent, FrameEngine, FramePair};
use crate::error::{Error, Result};
use crate::realtime_hub::{RealtimeHub, WorkerEvent};
use crate::resource_lock::{ResourceKind, ResourceLock};

/// Per-worker behaviour plugged into the shared lifecycle
pub trait WorkerBehavior: Send + Sync + 'static {
    fn id(&self) -> WorkerId;

    fn kind(&self) -> ResourceKind {
        self.id().default_kind()
    }

    /// Build a validated config from defaults + overrides
    fn configure(&self, overrides: &mut OverrideReader<'_>) -> Result<WorkerConfig>;

    /// Called once the camera delivered its first frame
    fn on_start(&self, _config: &WorkerConfig) {}

    /// State published right after start
    fn boot_state(&self) -> Option<&'static str> {
        None
    }

    /// State published when the loop exits
    fn stop_state(&self) -> Option<&'static str> {
        None
    }

    /// Map an engine event to an outbound event (None drops it)
    fn translate(&self, event: EngineEvent) -> Option<WorkerEvent> {
        Some(default_translate(self.id(), event))
    }

    /// Called after every processed frame
    fn after_step(&self) {}

    /// Extra status fields
    fn details(&self) -> Map<String, Value> {
        Map::new()
    }

    fn on_stop(&self) {}
}

/// States become `state` events, everything else a `detect` event
pub fn default_translate(method: WorkerId, event: EngineEvent) -> WorkerEvent {
    match event {
        EngineEvent::State(state) => WorkerEvent::state(method, state),
        EngineEvent::Action(action) => WorkerEvent::detect(method, json!({ "action": action })),
        EngineEvent::Event(event) => WorkerEvent::detect(method, json!({ "event": event })),
        EngineEvent::Detect(data) => WorkerEvent::detect(method, data),
    }
}

/// Worker-side timing knobs
#[derive(Debug, Clone, Copy)]
pub struct WorkerTimings {
    /// Bounded wait for the loop to exit on stop
    pub join_timeout: Duration,
    /// How long a freshly opened camera has to deliver its first frame
    pub probe_timeout: Duration,
    /// Sleep after an empty read
    pub idle_backoff: Duration,
    /// Consecutive read errors before the loop gives up
    pub max_consecutive_errors: u32,
}

impl Default for WorkerTimings {
    fn default() -> Self {
        Self {
            join_timeout: Duration::from_millis(3000),
            probe_timeout: Duration::from_millis(1500),
            idle_backoff: Duration::from_millis(2),
            max_consecutive_errors: 50,
        }
    }
}

type SharedEngine = Arc<Mutex<Box<dyn FrameEngine>>>;

/// State visible to both the control side and the loop task
#[derive(Default)]
struct Shared {
    running: AtomicBool,
    /// Set while this worker owes the lock a release
    lock_held: AtomicBool,
    config: RwLock<Option<WorkerConfig>>,
    engine: Mutex<Option<SharedEngine>>,
}

#[derive(Default)]
struct RunState {
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

/// Worker implementation shared by all behaviours
pub struct ServiceWorker {
    behavior: Arc<dyn WorkerBehavior>,
    lock: Arc<ResourceLock>,
    hub: Arc<RealtimeHub>,
    timings: WorkerTimings,
    shared: Arc<Shared>,
    run: tokio::sync::Mutex<RunState>,
}

impl ServiceWorker {
    pub fn new(
        behavior: Arc<dyn WorkerBehavior>,
        lock: Arc<ResourceLock>,
        hub: Arc<RealtimeHub>,
        timings: WorkerTimings,
    ) -> Self {
        Self {
            behavior,
            lock,
            hub,
            timings,
            shared: Arc::new(Shared::default()),
            run: tokio::sync::Mutex::new(RunState::default()),
        }
    }

    async fn release_lock(&self) {
        release_once(&self.shared, &self.lock, self.behavior.id()).await;
    }

    /// Wait for the first color frame
    async fn probe(&self, camera: &mut Box<dyn CameraDevice>) -> Result<()> {
        let backoff = self.timings.idle_backoff;
        let first_frame = async {
            loop {
                if camera.get_frames().await?.has_color() {
                    return Ok::<(), Error>(());
                }
                tokio::time::sleep(backoff).await;
            }
        };
        match tokio::time::timeout(self.timings.probe_timeout, first_frame).await {
            Ok(result) => result,
            Err(_) => Err(Error::Device(format!(
                "no frame within {}ms",
                self.timings.probe_timeout.as_millis()
            ))),
        }
    }

    /// Open, probe and run the start hook; cleans up after its own errors.
    /// Returns the boot state to publish.
    async fn bring_up(
        &self,
        camera: &mut Box<dyn CameraDevice>,
        config: &WorkerConfig,
    ) -> Result<Option<&'static str>> {
        let id = self.behavior.id();

        tracing::info!(method = %id, camera = %config.camera.describe(), "Opening camera");
        if let Err(e) = camera.open().await {
            tracing::error!(method = %id, error = %e, "Camera open failed");
            self.release_lock().await;
            return Err(Error::WorkerStart {
                method: id.to_string(),
                message: e.to_string(),
            });
        }

        if let Err(e) = self.probe(camera).await {
            tracing::error!(method = %id, error = %e, "Camera delivered no frames");
            self.hub.publish(WorkerEvent::state(id, "device_error")).await;
            camera.close().await;
            self.release_lock().await;
            return Err(Error::WorkerStart {
                method: id.to_string(),
                message: e.to_string(),
            });
        }

        self.behavior.on_start(config);
        Ok(self.behavior.boot_state())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn release_once(shared: &Shared, lock: &ResourceLock, owner: WorkerId) {
    if shared.lock_held.swap(false, Ordering::SeqCst) {
        lock.release(owner).await;
    }
}

#[async_trait]
impl Worker for ServiceWorker {
    fn id(&self) -> WorkerId {
        self.behavior.id()
    }

    fn kind(&self) -> ResourceKind {
        self.lock.kind()
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn configure(&self, overrides: &Overrides) -> Result<WorkerConfig> {
        let mut reader = OverrideReader::new(self.behavior.id(), overrides);
        let config = self.behavior.configure(&mut reader)?;
        reader.finish();
        Ok(config)
    }

    async fn start(
        &self,
        mut camera: Box<dyn CameraDevice>,
        engine: Box<dyn FrameEngine>,
        config: WorkerConfig,
    ) -> Result<()> {
        let mut run = self.run.lock().await;
        let id = self.behavior.id();

        if self.is_running() {
            tracing::debug!(method = %id, "Worker already running");
            return Ok(());
        }
        // a loop that gave up on its own has already released everything
        if let Some(handle) = run.handle.take() {
            if tokio::time::timeout(self.timings.join_timeout, handle).await.is_err() {
                tracing::warn!(method = %id, "Previous worker loop still busy; abandoning it");
            }
        }
        run.cancel = None;

        if !self.lock.try_acquire(id) {
            let holder = self
                .lock
                .holder()
                .map(|h| h.to_string())
                .unwrap_or_else(|| "releasing".to_string());
            tracing::warn!(method = %id, kind = %self.lock.kind(), holder = %holder, "Camera is busy");
            return Err(Error::ResourceBusy {
                kind: self.lock.kind(),
                holder,
            });
        }
        self.shared.lock_held.store(true, Ordering::SeqCst);

        // behaviour hooks run below; a panic must not leave the lock held
        let bring_up = AssertUnwindSafe(self.bring_up(&mut camera, &config))
            .catch_unwind()
            .await;
        let boot_state = match bring_up {
            Ok(Ok(boot_state)) => boot_state,
            Ok(Err(e)) => return Err(e),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(method = %id, error = %message, "Worker start panicked");
                camera.close().await;
                self.release_lock().await;
                return Err(Error::Internal(format!("{} start panicked: {}", id, message)));
            }
        };

        let engine: SharedEngine = Arc::new(Mutex::new(engine));
        *self.shared.engine.lock() = Some(engine.clone());
        *self.shared.config.write() = Some(config);
        self.shared.running.store(true, Ordering::SeqCst);

        if let Some(state) = boot_state {
            self.hub.publish(WorkerEvent::state(id, state)).await;
        }

        let cancel = CancellationToken::new();
        let worker_loop = WorkerLoop {
            behavior: self.behavior.clone(),
            hub: self.hub.clone(),
            lock: self.lock.clone(),
            shared: self.shared.clone(),
            camera,
            engine,
            cancel: cancel.clone(),
            timings: self.timings,
        };
        run.handle = Some(tokio::spawn(worker_loop.run()));
        run.cancel = Some(cancel);

        tracing::info!(method = %id, kind = %self.lock.kind(), "Worker started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        let id = self.behavior.id();
        let was_running = self.is_running();
        let cancel = run.cancel.take();
        let handle = run.handle.take();

        if !was_running && handle.is_none() {
            // nothing to join, but a lock may still be owed
            self.release_lock().await;
            return Ok(());
        }

        if let Some(cancel) = &cancel {
            cancel.cancel();
        }

        let mut outcome = Ok(());
        if let Some(mut handle) = handle {
            match tokio::time::timeout(self.timings.join_timeout, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(method = %id, error = %e, "Worker loop failed");
                    outcome = Err(Error::WorkerStop {
                        method: id.to_string(),
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    handle.abort();
                    tracing::warn!(
                        method = %id,
                        timeout_ms = self.timings.join_timeout.as_millis() as u64,
                        "Worker loop did not exit in time"
                    );
                    outcome = Err(Error::WorkerStop {
                        method: id.to_string(),
                        message: "join timed out".to_string(),
                    });
                }
            }
        }

        self.shared.running.store(false, Ordering::SeqCst);
        self.release_lock().await;
        *self.shared.engine.lock() = None;

        if was_running {
            self.behavior.on_stop();
            tracing::info!(method = %id, "Worker stopped");
        }
        outcome
    }

    fn status(&self) -> WorkerStatus {
        let mut details = self.behavior.details();
        if let Some(engine) = self.shared.engine.lock().clone() {
            let engine_status = engine.lock().status();
            if !engine_status.is_null() {
                details.insert("engine".to_string(), engine_status);
            }
        }
        let config = self
            .shared
            .config
            .read()
            .as_ref()
            .and_then(|c| serde_json::to_value(c).ok())
            .unwrap_or(Value::Null);

        WorkerStatus {
            method: self.behavior.id(),
            kind: self.lock.kind(),
            running: self.is_running(),
            config,
            details,
        }
    }
}

/// Background processing loop (one per running worker)
struct WorkerLoop {
    behavior: Arc<dyn WorkerBehavior>,
    hub: Arc<RealtimeHub>,
    lock: Arc<ResourceLock>,
    shared: Arc<Shared>,
    camera: Box<dyn CameraDevice>,
    engine: SharedEngine,
    cancel: CancellationToken,
    timings: WorkerTimings,
}

impl WorkerLoop {
    async fn run(mut self) {
        let id = self.behavior.id();
        let mut consecutive_errors = 0u32;
        tracing::debug!(method = %id, "Worker loop running");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.camera.get_frames() => next,
            };

            match next {
                Ok(frames) if frames.has_color() => {
                    consecutive_errors = 0;
                    process(self.behavior.as_ref(), &self.hub, &self.engine, &frames).await;
                }
                Ok(_) => tokio::time::sleep(self.timings.idle_backoff).await,
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(method = %id, error = %e, consecutive_errors, "Frame read failed");
                    if consecutive_errors >= self.timings.max_consecutive_errors {
                        tracing::error!(method = %id, "Too many frame errors, giving up");
                        break;
                    }
                    tokio::time::sleep(self.timings.idle_backoff).await;
                }
            }
        }

        self.camera.close().await;
        if let Some(state) = self.behavior.stop_state() {
            self.hub.publish(WorkerEvent::state(id, state)).await;
        }

        if !self.cancel.is_cancelled() {
            self.shared.running.store(false, Ordering::SeqCst);
            release_once(&self.shared, &self.lock, id).await;
            tracing::warn!(method = %id, "Worker loop exited without a stop request");
        }
    }
}

async fn process(
    behavior: &dyn WorkerBehavior,
    hub: &RealtimeHub,
    engine: &SharedEngine,
    frames: &FramePair,
) {
    let events = engine.lock().step(frames);
    for event in events {
        if let Some(outbound) = behavior.translate(event) {
            hub.publish(outbound).await;
        }
    }
    behavior.after_step();
}
