//! Synthetic camera backend
//!
//! Generates blank frames at the configured rate and runs scripted engines.
//! Used when no hardware backend is linked and by the test suites.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::{CameraDevice, CameraSpec, DeviceProvider, EngineEvent, Frame, FrameEngine, FramePair};
use crate::error::{Error, Result};
use crate::resource_lock::ResourceKind;
use crate::worker::{WorkerConfig, WorkerId};

/// Open/close counters per camera kind
#[derive(Debug, Default)]
struct DeviceCounters {
    opens: HashMap<ResourceKind, usize>,
    closes: HashMap<ResourceKind, usize>,
}

/// Synthetic DeviceProvider
#[derive(Debug, Clone, Default)]
pub struct SyntheticProvider {
    frame_interval: Option<Duration>,
    /// Kinds whose cameras open fine but never deliver a frame
    dead: HashSet<ResourceKind>,
    /// Kinds whose cameras fail to open
    unavailable: HashSet<ResourceKind>,
    scripts: HashMap<WorkerId, Vec<EngineEvent>>,
    counters: Arc<Mutex<DeviceCounters>>,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed frame interval instead of 1/fps
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    pub fn with_dead_camera(mut self, kind: ResourceKind) -> Self {
        self.dead.insert(kind);
        self
    }

    pub fn with_unavailable_camera(mut self, kind: ResourceKind) -> Self {
        self.unavailable.insert(kind);
        self
    }

    /// Events the engine of `method` emits, one per frame, in order
    pub fn with_script(mut self, method: WorkerId, events: Vec<EngineEvent>) -> Self {
        self.scripts.insert(method, events);
        self
    }

    pub fn open_count(&self, kind: ResourceKind) -> usize {
        self.counters.lock().opens.get(&kind).copied().unwrap_or(0)
    }

    pub fn close_count(&self, kind: ResourceKind) -> usize {
        self.counters.lock().closes.get(&kind).copied().unwrap_or(0)
    }
}

impl DeviceProvider for SyntheticProvider {
    fn open_camera(&self, spec: &CameraSpec) -> Result<Box<dyn CameraDevice>> {
        let interval = self.frame_interval.unwrap_or_else(|| {
            Duration::from_millis(1000 / u64::from(spec.fps.max(1)))
        });
        Ok(Box::new(SyntheticCamera {
            spec: spec.clone(),
            interval,
            dead: self.dead.contains(&spec.kind),
            unavailable: self.unavailable.contains(&spec.kind),
            opened: false,
            seq: 0,
            pixels: Arc::from(vec![0u8; 64]),
            counters: self.counters.clone(),
        }))
    }

    fn engine(&self, method: WorkerId, _config: &WorkerConfig) -> Result<Box<dyn FrameEngine>> {
        let script = self.scripts.get(&method).cloned().unwrap_or_default();
        Ok(Box::new(ScriptedEngine {
            method,
            pending: script.into(),
            frames: 0,
        }))
    }
}

/// Camera producing blank frames
pub struct SyntheticCamera {
    spec: CameraSpec,
    interval: Duration,
    dead: bool,
    unavailable: bool,
    opened: bool,
    seq: u64,
    pixels: Arc<[u8]>,
    counters: Arc<Mutex<DeviceCounters>>,
}

impl SyntheticCamera {
    fn frame(&mut self) -> Frame {
        self.seq += 1;
        Frame {
            seq: self.seq,
            width: self.spec.width,
            height: self.spec.height,
            captured_at: Utc::now(),
            data: self.pixels.clone(),
        }
    }
}

#[async_trait]
impl CameraDevice for SyntheticCamera {
    fn spec(&self) -> &CameraSpec {
        &self.spec
    }

    async fn open(&mut self) -> Result<()> {
        *self.counters.lock().opens.entry(self.spec.kind).or_default() += 1;
        if self.unavailable {
            return Err(Error::Device(format!(
                "cannot open {} camera (dev={})",
                self.spec.kind, self.spec.device
            )));
        }
        self.opened = true;
        Ok(())
    }

    async fn close(&mut self) {
        if self.opened {
            *self.counters.lock().closes.entry(self.spec.kind).or_default() += 1;
        }
        self.opened = false;
    }

    async fn get_frames(&mut self) -> Result<FramePair> {
        if !self.opened {
            return Ok(FramePair::empty());
        }
        tokio::time::sleep(self.interval).await;
        if self.dead {
            return Ok(FramePair::empty());
        }
        let color = self.frame();
        let depth = match self.spec.kind {
            ResourceKind::Rs => Some(color.clone()),
            ResourceKind::Rgb => None,
        };
        Ok(FramePair {
            color: Some(color),
            depth,
        })
    }
}

/// Engine replaying a fixed event script
struct ScriptedEngine {
    method: WorkerId,
    pending: VecDeque<EngineEvent>,
    frames: u64,
}

impl FrameEngine for ScriptedEngine {
    fn step(&mut self, frames: &FramePair) -> Vec<EngineEvent> {
        if !frames.has_color() {
            return Vec::new();
        }
        self.frames += 1;
        self.pending.pop_front().into_iter().collect()
    }

    fn status(&self) -> serde_json::Value {
        json!({
            "engine": format!("synthetic/{}", self.method),
            "frames": self.frames,
            "pending_events": self.pending.len(),
        })
    }
}
