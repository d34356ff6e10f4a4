//! Control envelope types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::worker::{Overrides, WorkerId};

/// Control message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Start,
    Stop,
    /// Configuration-only; answered with current status, never restarts
    Set,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Set => "set",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "set" => Ok(Self::Set),
            other => Err(format!("unknown control type '{}'", other)),
        }
    }
}

/// Parsed inbound control message
///
/// `kind` and `method` are kept as normalised strings; values outside the
/// known sets are answered with a snapshot instead of an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub method: String,
    pub overrides: Overrides,
}

impl ControlEnvelope {
    pub fn new(kind: impl AsRef<str>, method: impl AsRef<str>, overrides: Overrides) -> Self {
        Self {
            kind: kind.as_ref().trim().to_lowercase(),
            method: method.as_ref().trim().to_lowercase(),
            overrides,
        }
    }

    pub fn action(&self) -> Option<ControlAction> {
        self.kind.parse().ok()
    }

    pub fn target(&self) -> Option<WorkerId> {
        self.method.parse().ok()
    }
}
