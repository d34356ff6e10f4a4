//! People counter (line crossing on the RGB camera)

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::service::{default_translate, WorkerBehavior};
use super::settings::{CounterDefaults, RgbCameraDefaults};
use super::{OverrideReader, WorkerConfig, WorkerId};
use crate::camera::{CameraSpec, EngineEvent};
use crate::error::{Error, Result};
use crate::realtime_hub::WorkerEvent;
use crate::resource_lock::ResourceKind;

/// Upper bound for `enter_window` / `log_interval`, in seconds
const MAX_WINDOW_SECS: f64 = 86_400.0;
const FALLBACK_ENTER_WINDOW: Duration = Duration::from_secs(1);
const FALLBACK_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Negative, non-finite or oversized values fall back
fn seconds_or(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(fallback)
}

/// Running IN/OUT tallies for one session
struct Tally {
    total_in: u64,
    total_out: u64,
    enter_window: Duration,
    log_interval: Duration,
    recent_entries: VecDeque<Instant>,
    last_summary: Instant,
}

impl Tally {
    fn new(enter_window: Duration, log_interval: Duration) -> Self {
        Self {
            total_in: 0,
            total_out: 0,
            enter_window,
            log_interval,
            recent_entries: VecDeque::new(),
            last_summary: Instant::now(),
        }
    }

    /// Returns how many entries fall inside the enter window
    fn record_in(&mut self, now: Instant) -> usize {
        self.total_in += 1;
        self.recent_entries.push_back(now);
        while let Some(first) = self.recent_entries.front() {
            if now.duration_since(*first) > self.enter_window {
                self.recent_entries.pop_front();
            } else {
                break;
            }
        }
        self.recent_entries.len()
    }
}

pub struct CounterBehavior {
    defaults: CounterDefaults,
    rgb: RgbCameraDefaults,
    tally: Mutex<Tally>,
}

impl CounterBehavior {
    pub fn new(defaults: CounterDefaults, rgb: RgbCameraDefaults) -> Self {
        let tally = Tally::new(
            seconds_or(defaults.enter_window, FALLBACK_ENTER_WINDOW),
            seconds_or(defaults.log_interval, FALLBACK_LOG_INTERVAL),
        );
        Self {
            defaults,
            rgb,
            tally: Mutex::new(tally),
        }
    }

    pub fn totals(&self) -> (u64, u64) {
        let tally = self.tally.lock();
        (tally.total_in, tally.total_out)
    }
}

impl WorkerBehavior for CounterBehavior {
    fn id(&self) -> WorkerId {
        WorkerId::Counter
    }

    fn configure(&self, r: &mut OverrideReader<'_>) -> Result<WorkerConfig> {
        let d = &self.defaults;
        let camera = CameraSpec {
            kind: ResourceKind::Rgb,
            device: r.string("rgb_device", &self.rgb.device)?,
            width: r.u32("rgb_width", self.rgb.width)?,
            height: r.u32("rgb_height", self.rgb.height)?,
            fps: r.u32("rgb_fps", self.rgb.fps)?,
            use_mjpeg: self.rgb.use_mjpeg,
            buffer_size: self.rgb.buffer_size,
        };

        let camera_side = r.string("camera_side", &d.camera_side)?.to_ascii_lowercase();
        if camera_side != "left" && camera_side != "right" {
            return Err(Error::Validation(format!(
                "counter: camera_side must be 'left' or 'right' (got '{}')",
                camera_side
            )));
        }
        let line_x = r.f64("line_x", d.line_x)?;
        if !(0.0..=1.0).contains(&line_x) {
            return Err(Error::Validation(format!(
                "counter: line_x must be within 0..1 (got {})",
                line_x
            )));
        }
        let conf = r.f64("conf", d.conf)?;
        let enter_window = r.f64("enter_window", d.enter_window)?;
        let log_interval = r.f64("log_interval", d.log_interval)?;
        if enter_window <= 0.0 || log_interval <= 0.0 {
            return Err(Error::Validation(
                "counter: enter_window and log_interval must be positive".to_string(),
            ));
        }
        if enter_window > MAX_WINDOW_SECS || log_interval > MAX_WINDOW_SECS {
            return Err(Error::Validation(format!(
                "counter: enter_window and log_interval must be at most {}s (got {} / {})",
                MAX_WINDOW_SECS, enter_window, log_interval
            )));
        }
        let min_dist = r.f64("min_dist", d.min_dist)?;
        let max_dist = r.f64("max_dist", d.max_dist)?;
        if min_dist < 0.0 || min_dist >= max_dist {
            return Err(Error::Validation(format!(
                "counter: need 0 <= min_dist < max_dist (got {} / {})",
                min_dist, max_dist
            )));
        }

        Ok(WorkerConfig {
            camera,
            options: json!({
                "yolo_weights": r.string("yolo_weights", &d.yolo_weights)?,
                "camera_side": camera_side,
                "line_x": line_x,
                "conf": conf,
                "enter_window": enter_window,
                "log_interval": log_interval,
                "min_dist": min_dist,
                "max_dist": max_dist,
            }),
        })
    }

    fn on_start(&self, config: &WorkerConfig) {
        let seconds = |key: &str, fallback: Duration| {
            config.options[key]
                .as_f64()
                .map_or(fallback, |secs| seconds_or(secs, fallback))
        };
        *self.tally.lock() = Tally::new(
            seconds("enter_window", FALLBACK_ENTER_WINDOW),
            seconds("log_interval", FALLBACK_LOG_INTERVAL),
        );
    }

    fn translate(&self, event: EngineEvent) -> Option<WorkerEvent> {
        let EngineEvent::Action(action) = event else {
            return Some(default_translate(self.id(), event));
        };

        let action = action.to_ascii_uppercase();
        match action.as_str() {
            "IN" => {
                let mut tally = self.tally.lock();
                let recent = tally.record_in(Instant::now());
                if recent >= 2 {
                    tracing::warn!(
                        entries = recent,
                        window_s = tally.enter_window.as_secs_f64(),
                        "Multiple people entered at once"
                    );
                }
            }
            "OUT" => self.tally.lock().total_out += 1,
            _ => {}
        }
        Some(WorkerEvent::detect(self.id(), json!({ "action": action })))
    }

    fn after_step(&self) {
        let mut tally = self.tally.lock();
        if tally.last_summary.elapsed() >= tally.log_interval {
            tally.last_summary = Instant::now();
            tracing::info!(total_in = tally.total_in, total_out = tally.total_out, "Counter summary");
        }
    }

    fn details(&self) -> Map<String, Value> {
        let (total_in, total_out) = self.totals();
        let mut details = Map::new();
        details.insert("total_in".to_string(), json!(total_in));
        details.insert("total_out".to_string(), json!(total_out));
        details
    }

    fn on_stop(&self) {
        let (total_in, total_out) = self.totals();
        tracing::info!(total_in, total_out, "Counter session finished");
    }
}
