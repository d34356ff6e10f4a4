//! Worker types

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::camera::CameraSpec;
use crate::resource_lock::ResourceKind;

/// Option -> value overrides carried by a control envelope
pub type Overrides = Map<String, Value>;

/// Worker identifier
///
/// Declaration order is the snapshot priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WorkerId {
    /// People counter (line crossing IN/OUT)
    #[serde(rename = "counter")]
    Counter,
    /// Gesture control
    #[serde(rename = "control_unphysics")]
    ControlUnphysics,
    /// Follow-me person tracking (depth camera)
    #[serde(rename = "follow_me")]
    FollowMe,
    /// Marker pose tracker
    #[serde(rename = "tagdata")]
    TagData,
}

impl WorkerId {
    pub const ALL: [WorkerId; 4] = [
        WorkerId::Counter,
        WorkerId::ControlUnphysics,
        WorkerId::FollowMe,
        WorkerId::TagData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::ControlUnphysics => "control_unphysics",
            Self::FollowMe => "follow_me",
            Self::TagData => "tagdata",
        }
    }

    /// Camera the worker is wired to in the standard deployment
    pub fn default_kind(&self) -> ResourceKind {
        match self {
            Self::FollowMe => ResourceKind::Rs,
            Self::Counter | Self::ControlUnphysics | Self::TagData => ResourceKind::Rgb,
        }
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        WorkerId::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| format!("unknown worker '{}'", s.trim()))
    }
}

/// Validated start configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub camera: CameraSpec,
    /// Worker/engine specific options (typed per worker, kept as JSON here)
    pub options: Value,
}

/// Worker status view (always available, running or idle)
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub method: WorkerId,
    pub kind: ResourceKind,
    pub running: bool,
    pub config: Value,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl WorkerStatus {
    pub fn idle(method: WorkerId, kind: ResourceKind) -> Self {
        Self {
            method,
            kind,
            running: false,
            config: Value::Null,
            details: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_parse_normalizes() {
        assert_eq!("Counter".parse::<WorkerId>().unwrap(), WorkerId::Counter);
        assert_eq!(
            " CONTROL_UNPHYSICS ".parse::<WorkerId>().unwrap(),
            WorkerId::ControlUnphysics
        );
        assert_eq!("tagdata".parse::<WorkerId>().unwrap(), WorkerId::TagData);
        assert!("lidar".parse::<WorkerId>().is_err());
    }

    #[test]
    fn test_worker_id_wire_names() {
        for id in WorkerId::ALL {
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
        }
    }

    #[test]
    fn test_default_kinds() {
        assert_eq!(WorkerId::FollowMe.default_kind(), ResourceKind::Rs);
        assert_eq!(WorkerId::TagData.default_kind(), ResourceKind::Rgb);
    }
}
