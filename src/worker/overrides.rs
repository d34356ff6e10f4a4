//! Override value coercion
//!
//! Control messages come from loosely typed producers: numbers may arrive as
//! strings ("0.5"), booleans as "true"/"1". Keys a worker does not read are
//! ignored and logged at debug level.

use serde_json::Value;
use std::collections::HashSet;

use super::{Overrides, WorkerId};
use crate::error::{Error, Result};

pub struct OverrideReader<'a> {
    method: WorkerId,
    map: &'a Overrides,
    used: HashSet<&'static str>,
}

impl<'a> OverrideReader<'a> {
    pub fn new(method: WorkerId, map: &'a Overrides) -> Self {
        Self {
            method,
            map,
            used: HashSet::new(),
        }
    }

    fn raw(&mut self, key: &'static str) -> Option<&'a Value> {
        self.used.insert(key);
        let map: &'a Overrides = self.map;
        match map.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn invalid(&self, key: &str, value: &Value, expected: &str) -> Error {
        Error::Validation(format!(
            "{}: override '{}' must be {} (got {})",
            self.method, key, expected, value
        ))
    }

    pub fn f64(&mut self, key: &'static str, default: f64) -> Result<f64> {
        let Some(value) = self.raw(key) else {
            return Ok(default);
        };
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed
            .filter(|v| v.is_finite())
            .ok_or_else(|| self.invalid(key, value, "a number"))
    }

    pub fn u32(&mut self, key: &'static str, default: u32) -> Result<u32> {
        let Some(value) = self.raw(key) else {
            return Ok(default);
        };
        let parsed = match value {
            Value::Number(n) => n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && *f >= 0.0)
                    .map(|f| f as u64)
            }),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };
        parsed
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| self.invalid(key, value, "a non-negative integer"))
    }

    pub fn bool(&mut self, key: &'static str, default: bool) -> Result<bool> {
        let Some(value) = self.raw(key) else {
            return Ok(default);
        };
        let parsed = match value {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|v| v != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        };
        parsed.ok_or_else(|| self.invalid(key, value, "a boolean"))
    }

    /// Strings accept numbers too (device index `0` vs "/dev/video0")
    pub fn string(&mut self, key: &'static str, default: &str) -> Result<String> {
        let Some(value) = self.raw(key) else {
            return Ok(default.to_string());
        };
        match value {
            Value::String(s) => Ok(s.trim().to_string()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(self.invalid(key, other, "a string")),
        }
    }

    /// Log keys nobody asked for
    pub fn finish(self) {
        let unknown: Vec<&String> = self
            .map
            .keys()
            .filter(|k| !self.used.contains(k.as_str()))
            .collect();
        if !unknown.is_empty() {
            tracing::debug!(method = %self.method, keys = ?unknown, "Ignoring unknown overrides");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overrides(value: Value) -> Overrides {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_defaults_when_absent_or_null() {
        let map = overrides(json!({"line_x": null}));
        let mut reader = OverrideReader::new(WorkerId::Counter, &map);
        assert_eq!(reader.f64("line_x", 0.5).unwrap(), 0.5);
        assert_eq!(reader.u32("rgb_fps", 30).unwrap(), 30);
        assert_eq!(reader.string("camera_side", "left").unwrap(), "left");
    }

    #[test]
    fn test_string_numbers_coerced() {
        let map = overrides(json!({"line_x": "0.25", "rgb_fps": "15", "use_depth": "yes", "rgb_device": 2}));
        let mut reader = OverrideReader::new(WorkerId::Counter, &map);
        assert_eq!(reader.f64("line_x", 0.5).unwrap(), 0.25);
        assert_eq!(reader.u32("rgb_fps", 30).unwrap(), 15);
        assert!(reader.bool("use_depth", false).unwrap());
        assert_eq!(reader.string("rgb_device", "0").unwrap(), "2");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let map = overrides(json!({"line_x": "abc", "rgb_fps": -3, "use_depth": [1]}));
        let mut reader = OverrideReader::new(WorkerId::Counter, &map);
        assert!(matches!(reader.f64("line_x", 0.5), Err(Error::Validation(_))));
        assert!(reader.u32("rgb_fps", 30).is_err());
        assert!(reader.bool("use_depth", false).is_err());
    }

    #[test]
    fn test_whole_float_accepted_as_integer() {
        let map = overrides(json!({"rs_fps": 30.0}));
        let mut reader = OverrideReader::new(WorkerId::FollowMe, &map);
        assert_eq!(reader.u32("rs_fps", 15).unwrap(), 30);
    }
}
