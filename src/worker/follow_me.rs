//! Follow-me person tracking (depth camera)

use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use super::service::WorkerBehavior;
use super::settings::{DepthCameraDefaults, FollowMeDefaults};
use super::{OverrideReader, WorkerConfig, WorkerId};
use crate::camera::{CameraSpec, EngineEvent};
use crate::error::{Error, Result};
use crate::realtime_hub::WorkerEvent;
use crate::resource_lock::ResourceKind;

#[derive(Default)]
struct Tracking {
    state: Option<String>,
    published: u64,
}

pub struct FollowMeBehavior {
    defaults: FollowMeDefaults,
    rs: DepthCameraDefaults,
    tracking: Mutex<Tracking>,
}

impl FollowMeBehavior {
    pub fn new(defaults: FollowMeDefaults, rs: DepthCameraDefaults) -> Self {
        Self {
            defaults,
            rs,
            tracking: Mutex::new(Tracking::default()),
        }
    }
}

impl WorkerBehavior for FollowMeBehavior {
    fn id(&self) -> WorkerId {
        WorkerId::FollowMe
    }

    fn configure(&self, r: &mut OverrideReader<'_>) -> Result<WorkerConfig> {
        let d = &self.defaults;
        let camera = CameraSpec {
            kind: ResourceKind::Rs,
            device: String::new(),
            width: r.u32("rs_width", self.rs.width)?,
            height: r.u32("rs_height", self.rs.height)?,
            fps: r.u32("rs_fps", self.rs.fps)?,
            use_mjpeg: false,
            buffer_size: 1,
        };

        let yolo_conf = r.f64("yolo_conf", d.yolo_conf)?;
        if !(0.0..=1.0).contains(&yolo_conf) {
            return Err(Error::Validation(format!(
                "follow_me: yolo_conf must be within 0..1 (got {})",
                yolo_conf
            )));
        }
        let recognition_range_m = r.f64("recognition_range_m", d.recognition_range_m)?;
        if recognition_range_m <= 0.0 {
            return Err(Error::Validation(
                "follow_me: recognition_range_m must be positive".to_string(),
            ));
        }
        let register = r.u32("register_confirm_frames", d.register_confirm_frames)?;
        let follow = r.u32("follow_confirm_frames", d.follow_confirm_frames)?;
        let pause = r.u32("pause_confirm_frames", d.pause_confirm_frames)?;
        if register == 0 || follow == 0 || pause == 0 {
            return Err(Error::Validation(
                "follow_me: confirm frame counts must be at least 1".to_string(),
            ));
        }

        Ok(WorkerConfig {
            camera,
            options: json!({
                "yolo_weights": r.string("yolo_weights", &d.yolo_weights)?,
                "yolo_conf": yolo_conf,
                "recognition_range_m": recognition_range_m,
                "face_distance_thr": r.f64("face_distance_thr", d.face_distance_thr)?,
                "register_confirm_frames": register,
                "follow_confirm_frames": follow,
                "pause_confirm_frames": pause,
                "cooldown_ms": d.cooldown_ms,
            }),
        })
    }

    fn on_start(&self, _config: &WorkerConfig) {
        *self.tracking.lock() = Tracking::default();
    }

    /// Everything goes out as `detect`, states included
    fn translate(&self, event: EngineEvent) -> Option<WorkerEvent> {
        let mut tracking = self.tracking.lock();
        tracking.published += 1;
        let data = match event {
            EngineEvent::State(state) => {
                tracking.state = Some(state.clone());
                json!({ "state": state })
            }
            EngineEvent::Event(event) => json!({ "event": event }),
            EngineEvent::Action(action) => json!({ "action": action }),
            EngineEvent::Detect(data) => data,
        };
        Some(WorkerEvent::detect(self.id(), data))
    }

    fn details(&self) -> Map<String, Value> {
        let tracking = self.tracking.lock();
        let mut details = Map::new();
        details.insert("mode".to_string(), json!(tracking.state));
        details.insert("events_published".to_string(), json!(tracking.published));
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime_hub::EventKind;
    use crate::worker::Overrides;

    fn behavior() -> FollowMeBehavior {
        FollowMeBehavior::new(FollowMeDefaults::default(), DepthCameraDefaults::default())
    }

    #[test]
    fn test_depth_camera_config() {
        let map: Overrides = json!({"rs_fps": 15, "yolo_conf": "0.6"}).as_object().cloned().unwrap();
        let mut reader = OverrideReader::new(WorkerId::FollowMe, &map);
        let config = behavior().configure(&mut reader).unwrap();
        assert_eq!(config.camera.kind, ResourceKind::Rs);
        assert_eq!(config.camera.fps, 15);
        assert_eq!(config.options["yolo_conf"], 0.6);
    }

    #[test]
    fn test_rejects_zero_confirm_frames() {
        let map: Overrides = json!({"pause_confirm_frames": 0}).as_object().cloned().unwrap();
        let mut reader = OverrideReader::new(WorkerId::FollowMe, &map);
        assert!(behavior().configure(&mut reader).is_err());
    }

    #[test]
    fn test_states_published_as_detect() {
        let follow = behavior();
        let event = follow.translate(EngineEvent::State("following".into())).unwrap();
        assert_eq!(event.kind, EventKind::Detect);
        assert_eq!(event.payload.data, json!({"state": "following"}));
        assert_eq!(follow.details()["mode"], "following");
    }
}
