//! vision-svc - camera worker control plane
//!
//! ## Architecture
//!
//! 1. ResourceLock - one exclusive lock per camera kind (`rgb`, `rs`)
//! 2. Worker - start/stop-able camera consumers (counter, gesture control,
//!    follow-me, tag tracker) behind one capability trait
//! 3. WorkerRegistry - fixed id -> (worker, camera kind) table
//! 4. Orchestrator - preemption by camera kind, lock wait, bounded retries
//! 5. ControlBus - control envelopes in, results and worker events out
//! 6. RealtimeHub / EventLogService - outbound fan-out and history
//! 7. WebAPI - HTTP / WebSocket delivery
//!
//! Frame capture and vision engines are external; they plug in through
//! [`camera::DeviceProvider`].

pub mod camera;
pub mod control_bus;
pub mod error;
pub mod event_log_service;
pub mod models;
pub mod orchestrator;
pub mod realtime_hub;
pub mod resource_lock;
pub mod state;
pub mod web_api;
pub mod worker;
pub mod worker_registry;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
