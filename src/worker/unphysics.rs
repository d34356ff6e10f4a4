//! Gesture control (RGB camera)
//!
//! Camera geometry is fixed by settings; only the gesture engine knobs are
//! overridable per start.

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::service::{default_translate, WorkerBehavior};
use super::settings::UnphysicsDefaults;
use super::{OverrideReader, WorkerConfig, WorkerId};
use crate::camera::EngineEvent;
use crate::error::{Error, Result};
use crate::realtime_hub::WorkerEvent;

#[derive(Default)]
struct Observed {
    state: Option<String>,
    action: Option<String>,
}

pub struct UnphysicsBehavior {
    defaults: UnphysicsDefaults,
    observed: Mutex<Observed>,
}

impl UnphysicsBehavior {
    pub fn new(defaults: UnphysicsDefaults) -> Self {
        Self {
            defaults,
            observed: Mutex::new(Observed::default()),
        }
    }
}

impl WorkerBehavior for UnphysicsBehavior {
    fn id(&self) -> WorkerId {
        WorkerId::ControlUnphysics
    }

    fn configure(&self, r: &mut OverrideReader<'_>) -> Result<WorkerConfig> {
        let d = &self.defaults;
        let proc_width = r.u32("proc_width", d.proc_width)?;
        let proc_height = r.u32("proc_height", d.proc_height)?;
        let frame_skip = r.u32("frame_skip", d.frame_skip)?;
        if proc_width == 0 || proc_height == 0 || frame_skip == 0 {
            return Err(Error::Validation(
                "control_unphysics: proc size and frame_skip must be positive".to_string(),
            ));
        }

        Ok(WorkerConfig {
            camera: d.camera.spec(),
            options: json!({
                "center_radius": r.u32("center_radius", d.center_radius)?,
                "pull_threshold": r.f64("pull_threshold", d.pull_threshold)?,
                "stop_frames_threshold": r.u32("stop_frames_threshold", d.stop_frames_threshold)?,
                "active_frames_threshold": r.u32("active_frames_threshold", d.active_frames_threshold)?,
                "gesture_cooldown_ms": r.f64("gesture_cooldown_ms", d.gesture_cooldown_ms)?,
                "tip_stationary_threshold": r.f64("tip_stationary_threshold", d.tip_stationary_threshold)?,
                "tip_stationary_duration_ms": r.f64("tip_stationary_duration_ms", d.tip_stationary_duration_ms)?,
                "proc_width": proc_width,
                "proc_height": proc_height,
                "frame_skip": frame_skip,
            }),
        })
    }

    fn on_start(&self, _config: &WorkerConfig) {
        *self.observed.lock() = Observed::default();
    }

    fn boot_state(&self) -> Option<&'static str> {
        Some("boot")
    }

    fn stop_state(&self) -> Option<&'static str> {
        Some("stop")
    }

    fn translate(&self, event: EngineEvent) -> Option<WorkerEvent> {
        match event {
            EngineEvent::State(state) => {
                self.observed.lock().state = Some(state.clone());
                Some(WorkerEvent::state(self.id(), state))
            }
            EngineEvent::Action(action) => {
                let action = action.to_uppercase();
                tracing::info!(action = %action, "Gesture");
                self.observed.lock().action = Some(action.clone());
                Some(WorkerEvent::detect(self.id(), json!({ "action": action })))
            }
            other => Some(default_translate(self.id(), other)),
        }
    }

    fn details(&self) -> Map<String, Value> {
        let observed = self.observed.lock();
        let mut details = Map::new();
        details.insert("last_state".to_string(), json!(observed.state));
        details.insert("last_action".to_string(), json!(observed.action));
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime_hub::EventKind;
    use crate::worker::Overrides;

    #[test]
    fn test_camera_is_fixed() {
        let behavior = UnphysicsBehavior::new(UnphysicsDefaults::default());
        let map: Overrides = json!({"rgb_device": "5", "frame_skip": "2"})
            .as_object()
            .cloned()
            .unwrap();
        let mut reader = OverrideReader::new(WorkerId::ControlUnphysics, &map);
        let config = behavior.configure(&mut reader).unwrap();

        assert_eq!(config.camera.device, "/dev/video0");
        assert_eq!(config.options["frame_skip"], 2);
        assert_eq!(config.options["center_radius"], 40);
    }

    #[test]
    fn test_actions_uppercased() {
        let behavior = UnphysicsBehavior::new(UnphysicsDefaults::default());
        let event = behavior.translate(EngineEvent::Action("swipe_left".into())).unwrap();
        assert_eq!(event.kind, EventKind::Detect);
        assert_eq!(event.payload.data, json!({"action": "SWIPE_LEFT"}));

        let state = behavior.translate(EngineEvent::State("armed".into())).unwrap();
        assert_eq!(state.kind, EventKind::State);
        assert_eq!(behavior.details()["last_state"], "armed");
    }
}
