//! Marker pose tracker (RGB camera)

use serde_json::json;

use super::service::WorkerBehavior;
use super::settings::TagDefaults;
use super::{OverrideReader, WorkerConfig, WorkerId};
use crate::error::{Error, Result};

pub struct TagBehavior {
    defaults: TagDefaults,
}

impl TagBehavior {
    pub fn new(defaults: TagDefaults) -> Self {
        Self { defaults }
    }
}

impl WorkerBehavior for TagBehavior {
    fn id(&self) -> WorkerId {
        WorkerId::TagData
    }

    fn configure(&self, r: &mut OverrideReader<'_>) -> Result<WorkerConfig> {
        let d = &self.defaults;
        let tag_size_m = r.f64("tag_size_m", d.tag_size_m)?;
        if tag_size_m <= 0.0 {
            return Err(Error::Validation(format!(
                "tagdata: tag_size_m must be positive (got {})",
                tag_size_m
            )));
        }
        let mut alphas = [0.0; 3];
        for (slot, (key, default)) in alphas.iter_mut().zip([
            ("alpha_pos", d.alpha_pos),
            ("alpha_dist", d.alpha_dist),
            ("alpha_angle", d.alpha_angle),
        ]) {
            *slot = r.f64(key, default)?;
            if !(0.0..=1.0).contains(&*slot) {
                return Err(Error::Validation(format!(
                    "tagdata: {} must be within 0..1",
                    key
                )));
            }
        }

        Ok(WorkerConfig {
            camera: d.camera.spec(),
            options: json!({
                "calib_file": d.calib_file,
                "tag_size_m": tag_size_m,
                "family": r.string("family", &d.family)?,
                "nthreads": d.nthreads,
                "quad_decimate": d.quad_decimate,
                "quad_sigma": d.quad_sigma,
                "refine_edges": d.refine_edges,
                "decode_sharpening": d.decode_sharpening,
                "alpha_pos": alphas[0],
                "alpha_dist": alphas[1],
                "alpha_angle": alphas[2],
            }),
        })
    }

    fn boot_state(&self) -> Option<&'static str> {
        Some("boot")
    }

    fn stop_state(&self) -> Option<&'static str> {
        Some("stop")
    }
}
