//! Shared fixtures: a fully wired control plane on the synthetic backend
//! with short timings.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use vision_svc::camera::SyntheticProvider;
use vision_svc::orchestrator::OrchestratorTimings;
use vision_svc::state::{AppConfig, AppState};
use vision_svc::worker::{WorkerSettings, WorkerTimings};

pub fn fast_config() -> AppConfig {
    AppConfig {
        orchestrator: OrchestratorTimings {
            lock_wait_timeout: Duration::from_millis(1000),
            lock_poll_step: Duration::from_millis(5),
            settle_delay: Duration::from_millis(10),
            start_attempts: 5,
            retry_delay: Duration::from_millis(10),
        },
        worker: WorkerTimings {
            join_timeout: Duration::from_millis(500),
            probe_timeout: Duration::from_millis(60),
            ..WorkerTimings::default()
        },
        release_grace: Duration::from_millis(40),
        workers: WorkerSettings::default(),
        ..AppConfig::default()
    }
}

pub fn provider() -> SyntheticProvider {
    SyntheticProvider::new().with_frame_interval(Duration::from_millis(2))
}

pub fn app(provider: SyntheticProvider) -> AppState {
    let (state, _rx) = AppState::build(fast_config(), Arc::new(provider)).expect("state");
    state
}
