//! Worker defaults
//!
//! Values used when a start request carries no override. Loaded from
//! `VISION_*` environment variables, falling back to the constants below.

use serde::{Deserialize, Serialize};

use crate::camera::CameraSpec;
use crate::resource_lock::ResourceKind;
use crate::state::env_or;

/// RGB camera defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RgbCameraDefaults {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub use_mjpeg: bool,
    pub buffer_size: u32,
}

impl RgbCameraDefaults {
    fn from_env(prefix: &str, fallback: &RgbCameraDefaults) -> Self {
        Self {
            device: env_or(&format!("{prefix}_DEVICE"), fallback.device.clone()),
            width: env_or(&format!("{prefix}_WIDTH"), fallback.width),
            height: env_or(&format!("{prefix}_HEIGHT"), fallback.height),
            fps: env_or(&format!("{prefix}_FPS"), fallback.fps),
            use_mjpeg: env_or("RGB_USE_MJPEG", fallback.use_mjpeg),
            buffer_size: env_or("RGB_BUFFERSIZE", fallback.buffer_size),
        }
    }

    pub fn spec(&self) -> CameraSpec {
        CameraSpec {
            kind: ResourceKind::Rgb,
            device: self.device.clone(),
            width: self.width,
            height: self.height,
            fps: self.fps,
            use_mjpeg: self.use_mjpeg,
            buffer_size: self.buffer_size,
        }
    }
}

impl Default for RgbCameraDefaults {
    fn default() -> Self {
        Self {
            device: "0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            use_mjpeg: true,
            buffer_size: 2,
        }
    }
}

/// Depth camera defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthCameraDefaults {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for DepthCameraDefaults {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterDefaults {
    pub yolo_weights: String,
    pub camera_side: String,
    pub line_x: f64,
    pub conf: f64,
    pub enter_window: f64,
    pub log_interval: f64,
    pub min_dist: f64,
    pub max_dist: f64,
}

impl Default for CounterDefaults {
    fn default() -> Self {
        Self {
            yolo_weights: "yolo11s.pt".to_string(),
            camera_side: "left".to_string(),
            line_x: 0.5,
            conf: 0.35,
            enter_window: 1.0,
            log_interval: 2.0,
            min_dist: 0.2,
            max_dist: 6.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnphysicsDefaults {
    pub camera: RgbCameraDefaults,
    pub center_radius: u32,
    pub pull_threshold: f64,
    pub stop_frames_threshold: u32,
    pub active_frames_threshold: u32,
    pub gesture_cooldown_ms: f64,
    pub tip_stationary_threshold: f64,
    pub tip_stationary_duration_ms: f64,
    pub proc_width: u32,
    pub proc_height: u32,
    pub frame_skip: u32,
}

impl Default for UnphysicsDefaults {
    fn default() -> Self {
        Self {
            camera: RgbCameraDefaults {
                device: "/dev/video0".to_string(),
                ..RgbCameraDefaults::default()
            },
            center_radius: 40,
            pull_threshold: 70.0,
            stop_frames_threshold: 12,
            active_frames_threshold: 6,
            gesture_cooldown_ms: 1100.0,
            tip_stationary_threshold: 15.0,
            tip_stationary_duration_ms: 150.0,
            proc_width: 320,
            proc_height: 240,
            frame_skip: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowMeDefaults {
    pub yolo_weights: String,
    pub yolo_conf: f64,
    pub recognition_range_m: f64,
    pub face_distance_thr: f64,
    pub register_confirm_frames: u32,
    pub follow_confirm_frames: u32,
    pub pause_confirm_frames: u32,
    pub cooldown_ms: f64,
}

impl Default for FollowMeDefaults {
    fn default() -> Self {
        Self {
            yolo_weights: "yolo11s.pt".to_string(),
            yolo_conf: 0.5,
            recognition_range_m: 2.5,
            face_distance_thr: 0.40,
            register_confirm_frames: 11,
            follow_confirm_frames: 10,
            pause_confirm_frames: 5,
            cooldown_ms: 350.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagDefaults {
    pub camera: RgbCameraDefaults,
    pub calib_file: String,
    pub tag_size_m: f64,
    pub family: String,
    pub nthreads: u32,
    pub quad_decimate: f64,
    pub quad_sigma: f64,
    pub refine_edges: u32,
    pub decode_sharpening: f64,
    pub alpha_pos: f64,
    pub alpha_dist: f64,
    pub alpha_angle: f64,
}

impl Default for TagDefaults {
    fn default() -> Self {
        Self {
            camera: RgbCameraDefaults::default(),
            calib_file: "/app/models/camera_calib2.npz".to_string(),
            tag_size_m: 0.135,
            family: "tag36h11".to_string(),
            nthreads: 2,
            quad_decimate: 1.0,
            quad_sigma: 0.0,
            refine_edges: 1,
            decode_sharpening: 0.25,
            alpha_pos: 0.25,
            alpha_dist: 0.25,
            alpha_angle: 0.25,
        }
    }
}

/// All worker defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub rgb: RgbCameraDefaults,
    pub rs: DepthCameraDefaults,
    pub counter: CounterDefaults,
    pub unphysics: UnphysicsDefaults,
    pub follow_me: FollowMeDefaults,
    pub tag: TagDefaults,
}

impl WorkerSettings {
    /// Defaults overlaid with `VISION_*` environment variables
    pub fn from_env() -> Self {
        let base = Self::default();

        let counter = CounterDefaults {
            yolo_weights: env_or("COUNTER_YOLO_WEIGHTS", base.counter.yolo_weights.clone()),
            camera_side: env_or("COUNTER_CAMERA_SIDE", base.counter.camera_side.clone()),
            line_x: env_or("COUNTER_LINE_X", base.counter.line_x),
            conf: env_or("COUNTER_CONF", base.counter.conf),
            enter_window: env_or("COUNTER_ENTER_WINDOW", base.counter.enter_window),
            log_interval: env_or("COUNTER_LOG_INTERVAL", base.counter.log_interval),
            min_dist: env_or("COUNTER_MIN_DIST", base.counter.min_dist),
            max_dist: env_or("COUNTER_MAX_DIST", base.counter.max_dist),
        };

        let unphysics = UnphysicsDefaults {
            camera: RgbCameraDefaults::from_env("UNPHYSICS_RGB", &base.unphysics.camera),
            gesture_cooldown_ms: env_or(
                "UNPHYSICS_GESTURE_COOLDOWN_MS",
                base.unphysics.gesture_cooldown_ms,
            ),
            proc_width: env_or("UNPHYSICS_PROC_WIDTH", base.unphysics.proc_width),
            proc_height: env_or("UNPHYSICS_PROC_HEIGHT", base.unphysics.proc_height),
            frame_skip: env_or("UNPHYSICS_FRAME_SKIP", base.unphysics.frame_skip),
            ..base.unphysics.clone()
        };

        let follow_me = FollowMeDefaults {
            yolo_weights: env_or("FOLLOW_YOLO_WEIGHTS", base.follow_me.yolo_weights.clone()),
            cooldown_ms: env_or("FOLLOW_COOLDOWN_MS", base.follow_me.cooldown_ms),
            ..base.follow_me.clone()
        };

        let tag = TagDefaults {
            camera: RgbCameraDefaults::from_env("TAG_RGB", &base.tag.camera),
            calib_file: env_or("TAG_CALIB_FILE", base.tag.calib_file.clone()),
            tag_size_m: env_or("TAG_SIZE_M", base.tag.tag_size_m),
            family: env_or("TAG_FAMILY", base.tag.family.clone()),
            nthreads: env_or("TAG_NTHREADS", base.tag.nthreads),
            quad_decimate: env_or("TAG_QUAD_DECIMATE", base.tag.quad_decimate),
            quad_sigma: env_or("TAG_QUAD_SIGMA", base.tag.quad_sigma),
            refine_edges: env_or("TAG_REFINE_EDGES", base.tag.refine_edges),
            decode_sharpening: env_or("TAG_DECODE_SHARPENING", base.tag.decode_sharpening),
            alpha_pos: env_or("TAG_ALPHA_POS", base.tag.alpha_pos),
            alpha_dist: env_or("TAG_ALPHA_DIST", base.tag.alpha_dist),
            alpha_angle: env_or("TAG_ALPHA_ANGLE", base.tag.alpha_angle),
        };

        Self {
            rgb: RgbCameraDefaults::from_env("RGB_CAM", &base.rgb),
            rs: DepthCameraDefaults {
                width: env_or("RS_WIDTH", base.rs.width),
                height: env_or("RS_HEIGHT", base.rs.height),
                fps: env_or("RS_FPS", base.rs.fps),
            },
            counter,
            unphysics,
            follow_me,
            tag,
        }
    }
}
