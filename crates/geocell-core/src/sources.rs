//! External sensor collaborators and their host implementations.
//!
//! Every reader is independent: a failing reader leaves its field empty and
//! never aborts the rest of the sample. The host readers are best-effort and
//! report only what is observable from user space.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::ReadError;
use crate::sample::{Location, Reading};

/// Reads device identity and power state.
pub trait HardwareReader: Send + Sync {
    fn read(&self) -> Result<Reading, ReadError>;
}

/// Reads radio operator, cell identity and signal strength.
pub trait NetworkReader: Send + Sync {
    fn read(&self) -> Result<Reading, ReadError>;
}

/// Asynchronous position source.
///
/// Implementations may take arbitrarily long or never resolve; the caller
/// bounds the wait.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn last_location(&self) -> Option<Location>;
}

// ---------------------------------------------------------------------------
// Hardware
// ---------------------------------------------------------------------------

/// Host hardware reader: machine id, battery level and charging flag.
#[derive(Debug, Default, Clone)]
pub struct HostHardwareReader;

impl HardwareReader for HostHardwareReader {
    fn read(&self) -> Result<Reading, ReadError> {
        let mut out = Reading::new();
        out.insert("os".into(), json!(std::env::consts::OS));
        out.insert("arch".into(), json!(std::env::consts::ARCH));

        insert_opt(&mut out, "device_id", device_id().map(Value::from));
        if let Some((level, charging)) = battery_state(Path::new("/sys/class/power_supply")) {
            out.insert("battery_level".into(), json!(level));
            out.insert("charging".into(), json!(charging));
        }
        Ok(out)
    }
}

fn device_id() -> Option<String> {
    read_trimmed(Path::new("/etc/machine-id"))
        .or_else(|| read_trimmed(Path::new("/etc/hostname")))
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
}

/// First battery-type supply under `root`: `(capacity_percent, charging)`.
fn battery_state(root: &Path) -> Option<(u8, bool)> {
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let dir = entry.path();
        let kind = read_trimmed(&dir.join("type")).unwrap_or_default();
        if !kind.eq_ignore_ascii_case("battery") {
            continue;
        }
        let Some(level) = read_trimmed(&dir.join("capacity")).and_then(|s| s.parse::<u8>().ok())
        else {
            continue;
        };
        let charging = read_trimmed(&dir.join("status"))
            .map(|s| s.eq_ignore_ascii_case("charging") || s.eq_ignore_ascii_case("full"))
            .unwrap_or(false);
        return Some((level.min(100), charging));
    }
    None
}

fn read_trimmed(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let v = raw.trim();
    if v.is_empty() { None } else { Some(v.to_string()) }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Host network reader.
///
/// Hosts have no cellular radio, so operator and cell identity come from the
/// `GEOCELL_OPERATOR` / `GEOCELL_CELL_ID` environment; signal data comes from
/// `/proc/net/wireless` when a wireless interface exists.
#[derive(Debug, Default, Clone)]
pub struct HostNetworkReader;

impl NetworkReader for HostNetworkReader {
    fn read(&self) -> Result<Reading, ReadError> {
        let mut out = Reading::new();
        for (var, key) in [("GEOCELL_OPERATOR", "operator"), ("GEOCELL_CELL_ID", "cell_id")] {
            if let Ok(v) = std::env::var(var) {
                if !v.trim().is_empty() {
                    out.insert(key.into(), json!(v.trim()));
                }
            }
        }
        if let Ok(raw) = std::fs::read_to_string("/proc/net/wireless") {
            out.extend(parse_proc_wireless(&raw));
        }
        Ok(out)
    }
}

/// Parse the first interface row of `/proc/net/wireless`.
///
/// ```text
/// Inter-| sta-|   Quality        |   Discarded packets
///  face | tus | link level noise |  nwid  crypt   frag
///  wlan0: 0000   54.  -56.  -256        0      0      0
/// ```
fn parse_proc_wireless(raw: &str) -> Reading {
    let mut out = Reading::new();
    let Some(line) = raw.lines().skip(2).find(|l| l.contains(':')) else {
        return out;
    };
    let Some((iface, rest)) = line.split_once(':') else {
        return out;
    };
    let fields: Vec<&str> = rest.split_whitespace().collect();
    out.insert("interface".into(), json!(iface.trim()));
    if let Some(q) = fields.get(1).and_then(|v| parse_dotted(v)) {
        out.insert("link_quality".into(), json!(q));
    }
    if let Some(level) = fields.get(2).and_then(|v| parse_dotted(v)) {
        out.insert("signal_dbm".into(), json!(level));
    }
    out
}

fn parse_dotted(v: &str) -> Option<i64> {
    v.trim_end_matches('.').parse().ok()
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// Always reports the same configured fix.
#[derive(Debug, Clone)]
pub struct FixedLocationProvider {
    location: Location,
}

impl FixedLocationProvider {
    pub fn new(location: Location) -> Self {
        Self { location }
    }
}

#[async_trait]
impl LocationProvider for FixedLocationProvider {
    async fn last_location(&self) -> Option<Location> {
        Some(self.location)
    }
}

/// Provider for hosts with no positioning at all.
#[derive(Debug, Default, Clone)]
pub struct NoLocationProvider;

#[async_trait]
impl LocationProvider for NoLocationProvider {
    async fn last_location(&self) -> Option<Location> {
        None
    }
}

fn insert_opt(out: &mut Reading, key: &str, value: Option<Value>) {
    if let Some(v) = value {
        out.insert(key.to_string(), v);
    }
}
