//! Camera / engine capability contracts
//!
//! Frame capture backends and per-frame vision engines live outside this
//! crate. Workers only see them through these traits.

pub mod synthetic;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::resource_lock::ResourceKind;
use crate::worker::{WorkerConfig, WorkerId};

pub use synthetic::SyntheticProvider;

/// One captured image plane
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
    pub data: Arc<[u8]>,
}

/// Color + optional aligned depth, as returned by one `get_frames` call
#[derive(Debug, Clone, Default)]
pub struct FramePair {
    pub color: Option<Frame>,
    pub depth: Option<Frame>,
}

impl FramePair {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_color(&self) -> bool {
        self.color.is_some()
    }
}

/// Camera open parameters, resolved from settings + overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSpec {
    pub kind: ResourceKind,
    /// Device index ("0") or node path ("/dev/video0"); empty for depth cameras
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    #[serde(default)]
    pub use_mjpeg: bool,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
}

fn default_buffer_size() -> u32 {
    2
}

impl CameraSpec {
    pub fn describe(&self) -> String {
        format!(
            "{} dev={} {}x{}@{}fps",
            self.kind, self.device, self.width, self.height, self.fps
        )
    }
}

/// Camera resource handle
///
/// `get_frames` must return within roughly one frame interval and must be
/// cancel-safe: the worker loop drops the pending call when stopping.
#[async_trait]
pub trait CameraDevice: Send {
    fn spec(&self) -> &CameraSpec;

    async fn open(&mut self) -> Result<()>;

    async fn close(&mut self);

    async fn get_frames(&mut self) -> Result<FramePair>;
}

/// Output of one engine step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Mode/state transition ("armed", "following", "tag_found", ...)
    State(String),
    /// Discrete action ("IN", "OUT", "left", ...)
    Action(String),
    /// One-shot event ("registered", "lost", ...)
    Event(String),
    /// Structured detection payload (e.g. tag pose)
    Detect(Value),
}

/// Per-frame processing engine (detector / tracker / recognizer)
pub trait FrameEngine: Send {
    fn step(&mut self, frames: &FramePair) -> Vec<EngineEvent>;

    fn status(&self) -> Value {
        Value::Null
    }
}

/// Builds camera handles and engines for workers
pub trait DeviceProvider: Send + Sync {
    fn open_camera(&self, spec: &CameraSpec) -> Result<Box<dyn CameraDevice>>;

    fn engine(&self, method: WorkerId, config: &WorkerConfig) -> Result<Box<dyn FrameEngine>>;
}
