//! Application state
//!
//! The context object built once at startup and handed to every transport.

use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::camera::DeviceProvider;
use crate::control_bus::ControlBus;
use crate::error::Result;
use crate::event_log_service::{EventLogService, DEFAULT_CAPACITY};
use crate::orchestrator::{Orchestrator, OrchestratorTimings};
use crate::realtime_hub::RealtimeHub;
use crate::resource_lock::DEFAULT_RELEASE_GRACE_MS;
use crate::worker::{WorkerSettings, WorkerTimings};
use crate::worker_registry::WorkerRegistry;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "VISION_";

/// Read `VISION_<key>`, falling back to `default` when unset or unparsable
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    let name = format!("{}{}", ENV_PREFIX, key);
    match std::env::var(&name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(var = %name, value = %raw, "Ignoring unparsable setting");
                default
            }
        },
        Err(_) => default,
    }
}

fn env_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_or(key, default_ms))
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Outbound messages kept for `/api/events`
    pub event_log_capacity: usize,
    /// Capacity of the inbound control queue
    pub control_queue: usize,
    pub orchestrator: OrchestratorTimings,
    pub worker: WorkerTimings,
    pub release_grace: Duration,
    pub workers: WorkerSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            event_log_capacity: DEFAULT_CAPACITY,
            control_queue: 64,
            orchestrator: OrchestratorTimings::default(),
            worker: WorkerTimings::default(),
            release_grace: Duration::from_millis(DEFAULT_RELEASE_GRACE_MS),
            workers: WorkerSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let orchestrator = OrchestratorTimings {
            lock_wait_timeout: env_ms("LOCK_WAIT_TIMEOUT_MS", 5000),
            lock_poll_step: env_ms("LOCK_POLL_STEP_MS", 50),
            settle_delay: env_ms("SETTLE_DELAY_MS", 200),
            start_attempts: env_or("START_ATTEMPTS", d.orchestrator.start_attempts).max(1),
            retry_delay: env_ms("RETRY_DELAY_MS", 300),
        };
        let worker = WorkerTimings {
            join_timeout: env_ms("WORKER_JOIN_TIMEOUT_MS", 3000),
            probe_timeout: env_ms("WORKER_PROBE_TIMEOUT_MS", 1500),
            ..d.worker
        };

        Self {
            host: env_or("HOST", d.host),
            port: env_or("PORT", d.port),
            event_log_capacity: env_or("EVENT_LOG_CAPACITY", d.event_log_capacity),
            control_queue: env_or("CONTROL_QUEUE", d.control_queue),
            orchestrator,
            worker,
            release_grace: env_ms("RELEASE_GRACE_MS", DEFAULT_RELEASE_GRACE_MS),
            workers: WorkerSettings::from_env(),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub event_log: Arc<EventLogService>,
    pub hub: Arc<RealtimeHub>,
    pub registry: Arc<WorkerRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub control_bus: Arc<ControlBus>,
    /// Inbound raw control payloads (fed by the WebSocket)
    pub control_tx: mpsc::Sender<Vec<u8>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire every component; returns the receiving end of the control queue
    pub fn build(
        config: AppConfig,
        provider: Arc<dyn DeviceProvider>,
    ) -> Result<(Self, mpsc::Receiver<Vec<u8>>)> {
        let event_log = Arc::new(EventLogService::new(config.event_log_capacity));
        let hub = Arc::new(RealtimeHub::new(event_log.clone()));
        let registry = Arc::new(WorkerRegistry::standard(
            &config.workers,
            config.worker,
            config.release_grace,
            hub.clone(),
        )?);
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            provider,
            config.orchestrator,
        ));
        let control_bus = Arc::new(ControlBus::new(orchestrator.clone(), hub.clone()));
        let (control_tx, control_rx) = mpsc::channel(config.control_queue.max(1));

        let state = Self {
            config: Arc::new(config),
            event_log,
            hub,
            registry,
            orchestrator,
            control_bus,
            control_tx,
            started_at: Utc::now(),
        };
        Ok((state, control_rx))
    }

    pub fn uptime_sec(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_fallback() {
        assert_eq!(env_or("SURELY_UNSET_SETTING", 42u32), 42);
        std::env::set_var("VISION_TEST_BAD_NUMBER", "abc");
        assert_eq!(env_or("TEST_BAD_NUMBER", 7u64), 7);
        std::env::set_var("VISION_TEST_GOOD_NUMBER", " 12 ");
        assert_eq!(env_or("TEST_GOOD_NUMBER", 7u64), 12);
    }

    #[test]
    fn test_default_timings() {
        let config = AppConfig::default();
        assert_eq!(config.orchestrator.start_attempts, 5);
        assert_eq!(config.orchestrator.lock_wait_timeout, Duration::from_secs(5));
        assert_eq!(config.worker.join_timeout, Duration::from_secs(3));
        assert_eq!(config.release_grace, Duration::from_millis(200));
    }
}
