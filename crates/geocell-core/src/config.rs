//! Agent configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::motion::IntervalPolicy;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::sample::Location;

/// Runtime settings for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the remote sink.
    pub sink_url: String,
    /// Path prefix under which samples are pushed per agent.
    pub sink_root: String,
    /// Optional `?auth=` token.
    pub auth_token: Option<String>,
    /// Directory of the file-backed key-value store.
    pub state_dir: PathBuf,
    pub moving_interval_secs: u64,
    pub still_interval_secs: u64,
    /// Minimum classifier confidence (percent) that may switch mode.
    pub confidence_floor: u8,
    /// Requested classification cadence.
    pub activity_period_secs: u64,
    pub location_timeout_ms: u64,
    pub delivery_timeout_ms: u64,
    pub queue_capacity: usize,
    pub wake_timeout_secs: u64,
    /// Static position used instead of a positioning provider.
    pub fixed_location: Option<Location>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            sink_url: "http://127.0.0.1:8043".to_string(),
            sink_root: "geocelltrack/tracker".to_string(),
            auth_token: None,
            state_dir: PathBuf::from("./geocell-state"),
            moving_interval_secs: 70,
            still_interval_secs: 300,
            confidence_floor: 70,
            activity_period_secs: 10,
            location_timeout_ms: 10_000,
            delivery_timeout_ms: 15_000,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            wake_timeout_secs: 600,
            fixed_location: None,
        }
    }
}

impl AgentConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, AgentError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&raw).map_err(|e| {
            AgentError::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        let bad = |msg: &str| Err(AgentError::Config(msg.to_string()));
        if self.moving_interval_secs == 0 || self.still_interval_secs == 0 {
            return bad("sampling intervals must be positive");
        }
        if self.confidence_floor > 100 {
            return bad("confidence_floor is a percentage (0-100)");
        }
        if self.location_timeout_ms == 0 || self.delivery_timeout_ms == 0 {
            return bad("timeouts must be positive");
        }
        if self.queue_capacity == 0 {
            return bad("queue_capacity must be positive");
        }
        if let Some(fix) = &self.fixed_location {
            if !fix.is_valid() {
                return Err(AgentError::Config(format!(
                    "fixed_location {fix:?} needs finite lat in [-90, 90], lon in [-180, 180] and acc >= 0"
                )));
            }
        }
        reqwest::Url::parse(&self.sink_url)
            .map_err(|e| AgentError::Config(format!("invalid sink_url '{}': {e}", self.sink_url)))?;
        Ok(())
    }

    pub fn interval_policy(&self) -> IntervalPolicy {
        IntervalPolicy {
            moving: Duration::from_secs(self.moving_interval_secs),
            still: Duration::from_secs(self.still_interval_secs),
            confidence_floor: self.confidence_floor,
        }
    }

    pub fn activity_period(&self) -> Duration {
        Duration::from_secs(self.activity_period_secs)
    }

    pub fn location_timeout(&self) -> Duration {
        Duration::from_millis(self.location_timeout_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }

    pub fn wake_timeout(&self) -> Duration {
        Duration::from_secs(self.wake_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let c = AgentConfig::default();
        c.validate().unwrap();
        assert_eq!(c.interval_policy(), IntervalPolicy::default());
        assert_eq!(c.location_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"sink_url": "http://10.0.0.2:9000", "still_interval_secs": 120,
                "fixed_location": {{"lat": -12.05, "lon": -77.04}}}}"#
        )
        .unwrap();
        let c = AgentConfig::load_from_path(f.path()).unwrap();
        assert_eq!(c.sink_url, "http://10.0.0.2:9000");
        assert_eq!(c.still_interval_secs, 120);
        assert_eq!(c.moving_interval_secs, 70);
        assert_eq!(c.fixed_location, Some(Location::new(-12.05, -77.04, None)));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{{ nope").unwrap();
        assert!(matches!(
            AgentConfig::load_from_path(f.path()),
            Err(AgentError::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases = [
            AgentConfig {
                moving_interval_secs: 0,
                ..Default::default()
            },
            AgentConfig {
                confidence_floor: 101,
                ..Default::default()
            },
            AgentConfig {
                delivery_timeout_ms: 0,
                ..Default::default()
            },
            AgentConfig {
                queue_capacity: 0,
                ..Default::default()
            },
            AgentConfig {
                sink_url: "::".into(),
                ..Default::default()
            },
        ];
        for c in cases {
            assert!(c.validate().is_err(), "{c:?}");
        }
    }

    #[test]
    fn test_validate_rejects_unusable_fixed_location() {
        let fixes = [
            Location::new(f64::NAN, 0.0, None),
            Location::new(0.0, f64::NEG_INFINITY, None),
            Location::new(200.0, 0.0, None),
            Location::new(f64::NAN, 500.0, None),
            Location::new(-12.0, -77.0, Some(-1.0)),
        ];
        for fix in fixes {
            let c = AgentConfig {
                fixed_location: Some(fix),
                ..Default::default()
            };
            assert!(matches!(c.validate(), Err(AgentError::Config(_))), "{fix:?}");
        }

        let ok = AgentConfig {
            fixed_location: Some(Location::new(-90.0, 180.0, Some(0.0))),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_fixed_location_in_file_is_config_error() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"fixed_location": {{"lat": 200.0, "lon": 0.0}}}}"#).unwrap();
        assert!(matches!(
            AgentConfig::load_from_path(f.path()),
            Err(AgentError::Config(_))
        ));
    }
}
