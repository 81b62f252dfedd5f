pub mod flush;
pub mod queue;
pub mod resume;
pub mod run;
pub mod sample;
pub mod sink;

use std::fmt::Display;
use std::path::PathBuf;

use clap::Args;
use geocell_core::{AgentConfig, AgentError, Location};

/// Options shared by every agent-side command. Flags override the config file.
#[derive(Args, Debug, Default, Clone)]
pub struct AgentOpts {
    /// JSON config file (missing fields take their defaults)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Base URL of the sink
    #[arg(long)]
    pub sink_url: Option<String>,

    /// Directory holding the offline queue and agent id
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// Fixed latitude reported with every sample
    #[arg(long, allow_negative_numbers = true, requires = "lon")]
    pub lat: Option<f64>,

    /// Fixed longitude reported with every sample
    #[arg(long, allow_negative_numbers = true, requires = "lat")]
    pub lon: Option<f64>,

    /// Accuracy in metres for the fixed position
    #[arg(long, requires = "lat")]
    pub acc: Option<f64>,
}

/// Resolve the effective config: file (or defaults), then flag overrides.
pub fn load_config(opts: &AgentOpts) -> Result<AgentConfig, AgentError> {
    let mut config = match &opts.config {
        Some(path) => AgentConfig::load_from_path(path)?,
        None => AgentConfig::default(),
    };
    if let Some(url) = &opts.sink_url {
        config.sink_url = url.clone();
    }
    if let Some(dir) = &opts.state_dir {
        config.state_dir = dir.clone();
    }
    if let (Some(lat), Some(lon)) = (opts.lat, opts.lon) {
        config.fixed_location = Some(Location::new(lat, lon, opts.acc));
    }
    config.validate()?;
    Ok(config)
}

/// Unwrap or print the error and exit with status 1.
pub fn or_exit<T, E: Display>(result: Result<T, E>, context: &str) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{context}: {e}");
            std::process::exit(1);
        }
    }
}

pub fn runtime() -> tokio::runtime::Runtime {
    or_exit(tokio::runtime::Runtime::new(), "Error starting async runtime")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file_or_flags() {
        let c = load_config(&AgentOpts::default()).unwrap();
        assert_eq!(c, AgentConfig::default());
    }

    #[test]
    fn test_flags_override_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"sink_url": "http://10.0.0.9:8043", "state_dir": "/var/lib/geocell"}}"#
        )
        .unwrap();
        let opts = AgentOpts {
            config: Some(f.path().to_path_buf()),
            state_dir: Some(PathBuf::from("/tmp/geo")),
            lat: Some(-12.0),
            lon: Some(-77.0),
            ..Default::default()
        };
        let c = load_config(&opts).unwrap();
        assert_eq!(c.sink_url, "http://10.0.0.9:8043");
        assert_eq!(c.state_dir, PathBuf::from("/tmp/geo"));
        assert_eq!(c.fixed_location, Some(Location::new(-12.0, -77.0, None)));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let opts = AgentOpts {
            sink_url: Some("not a url".into()),
            ..Default::default()
        };
        assert!(matches!(load_config(&opts), Err(AgentError::Config(_))));
    }

    #[test]
    fn test_out_of_range_coordinates_are_rejected() {
        for (lat, lon) in [(200.0, 0.0), (f64::NAN, -77.0), (-12.0, 500.0)] {
            let opts = AgentOpts {
                lat: Some(lat),
                lon: Some(lon),
                ..Default::default()
            };
            assert!(
                matches!(load_config(&opts), Err(AgentError::Config(_))),
                "{lat},{lon}"
            );
        }
    }
}
