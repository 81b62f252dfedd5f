//! Telemetry sample data model and its JSON wire form.
//!
//! A [`Sample`] is assembled once per collection cycle by
//! [`SampleBuilder`](crate::builder::SampleBuilder) and is immutable afterwards.
//! Its JSON form is what the remote sink stores and what the offline queue
//! persists:
//!
//! ```json
//! {"timestamp": 1760000000000,
//!  "hardware": {"device_id": "…", "battery_level": 87, "charging": false},
//!  "sim": {"operator": "…", "cell_id": "…", "signal_dbm": -71},
//!  "location": {"lat": -12.05, "lon": -77.04, "acc": 8.5}}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flat string-keyed map of opaque values produced by one sub-reader.
pub type Reading = BTreeMap<String, Value>;

/// A position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    /// Horizontal accuracy in metres, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acc: Option<f64>,
}

impl Location {
    /// Unchecked constructor. Use [`Location::try_new`] for untrusted input.
    pub fn new(lat: f64, lon: f64, acc: Option<f64>) -> Self {
        Self { lat, lon, acc }
    }

    /// A fix, or `None` when any coordinate is non-finite or out of range.
    pub fn try_new(lat: f64, lon: f64, acc: Option<f64>) -> Option<Self> {
        let fix = Self::new(lat, lon, acc);
        fix.is_valid().then_some(fix)
    }

    /// Finite, `lat` in [-90, 90], `lon` in [-180, 180], `acc` non-negative.
    ///
    /// JSON has no encoding for NaN or infinity, so only valid fixes survive
    /// the offline queue and the sink schema.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
            && self.acc.is_none_or(|a| a.is_finite() && a >= 0.0)
    }
}

/// One timestamped telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the Unix epoch, non-decreasing per builder.
    pub timestamp: u64,
    /// Device identity and power state.
    #[serde(default)]
    pub hardware: Reading,
    /// Radio operator, cell identity, signal strength. May be empty.
    #[serde(default, alias = "red")]
    pub sim: Reading,
    /// Absent when no fix arrived within the cycle budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Sample {
    /// Serialize to the UTF-8 JSON object sent to the sink.
    pub fn to_json(&self) -> String {
        // Maps of `Value` with string keys cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }

    /// Whether a location fix is attached.
    pub fn has_location(&self) -> bool {
        self.location.is_some()
    }
}

/// Check a JSON payload against the sample schema.
///
/// Returns every violation found, not just the first.
pub fn validate_payload(payload: &Value) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    let Some(obj) = payload.as_object() else {
        return Err(vec!["payload must be a JSON object".to_string()]);
    };

    match obj.get("timestamp") {
        Some(ts) if ts.is_u64() => {}
        Some(_) => errors.push("timestamp must be a non-negative integer".to_string()),
        None => errors.push("timestamp is required".to_string()),
    }

    match obj.get("hardware") {
        Some(hw) if hw.is_object() => {}
        Some(_) => errors.push("hardware must be an object".to_string()),
        None => errors.push("hardware is required".to_string()),
    }

    for key in ["sim", "red"] {
        if let Some(v) = obj.get(key) {
            if !v.is_object() {
                errors.push(format!("{key} must be an object"));
            }
        }
    }

    match obj.get("location") {
        None | Some(Value::Null) => {}
        Some(Value::Object(loc)) => {
            check_coordinate(loc.get("lat"), "lat", 90.0, &mut errors);
            check_coordinate(loc.get("lon"), "lon", 180.0, &mut errors);
            if let Some(acc) = loc.get("acc") {
                match acc.as_f64() {
                    Some(a) if a >= 0.0 => {}
                    _ => errors.push("location.acc must be a non-negative number".to_string()),
                }
            }
        }
        Some(_) => errors.push("location must be an object or null".to_string()),
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn check_coordinate(value: Option<&Value>, name: &str, bound: f64, errors: &mut Vec<String>) {
    match value.and_then(Value::as_f64) {
        Some(v) if (-bound..=bound).contains(&v) => {}
        Some(v) => errors.push(format!("location.{name} {v} outside [-{bound}, {bound}]")),
        None => errors.push(format!("location.{name} must be a number")),
    }
}
