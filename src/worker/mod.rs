//! Workers - long-lived, start/stop-able camera consumers
//!
//! Each worker is bound to one camera kind and owns one background loop while
//! running. The orchestrator only talks to workers through [`Worker`].

mod counter;
mod follow_me;
pub mod overrides;
pub mod service;
pub mod settings;
mod tagdata;
mod types;
mod unphysics;

use async_trait::async_trait;

use crate::camera::{CameraDevice, FrameEngine};
use crate::error::Result;
use crate::resource_lock::ResourceKind;

pub use counter::CounterBehavior;
pub use follow_me::FollowMeBehavior;
pub use overrides::OverrideReader;
pub use service::{ServiceWorker, WorkerBehavior, WorkerTimings};
pub use settings::WorkerSettings;
pub use tagdata::TagBehavior;
pub use types::{Overrides, WorkerConfig, WorkerId, WorkerStatus};
pub use unphysics::UnphysicsBehavior;

/// Worker capability contract
#[async_trait]
pub trait Worker: Send + Sync {
    fn id(&self) -> WorkerId;

    /// Camera kind this worker is bound to
    fn kind(&self) -> ResourceKind;

    /// True while the loop is active and the camera lock is held
    fn is_running(&self) -> bool;

    /// Resolve overrides against the worker defaults
    fn configure(&self, overrides: &Overrides) -> Result<WorkerConfig>;

    /// Take the camera lock, open the device and spawn the loop
    ///
    /// Fails with `ResourceBusy` when the lock is held elsewhere; the worker
    /// stays idle on every error path.
    async fn start(
        &self,
        camera: Box<dyn CameraDevice>,
        engine: Box<dyn FrameEngine>,
        config: WorkerConfig,
    ) -> Result<()>;

    /// Idempotent
    async fn stop(&self) -> Result<()>;

    /// Never fails, running or idle
    fn status(&self) -> WorkerStatus;
}
