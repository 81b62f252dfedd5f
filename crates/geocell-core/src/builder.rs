//! Assembles one [`Sample`] per cycle from the sensor collaborators.
//!
//! Sub-readers fail independently. A reader that errors or panics leaves its
//! field empty. A location lookup that panics, does not resolve within the
//! budget, or yields an invalid fix leaves `location` absent. The returned
//! sample is always complete.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::error::ReadError;
use crate::sample::{Location, Reading, Sample};
use crate::sources::{
    HardwareReader, HostHardwareReader, HostNetworkReader, LocationProvider, NetworkReader,
    NoLocationProvider,
};

/// Builds samples from a hardware reader, a network reader and a location provider.
pub struct SampleBuilder {
    hardware: Arc<dyn HardwareReader>,
    network: Arc<dyn NetworkReader>,
    location: Arc<dyn LocationProvider>,
    last_timestamp: AtomicU64,
}

impl SampleBuilder {
    pub fn new(
        hardware: Arc<dyn HardwareReader>,
        network: Arc<dyn NetworkReader>,
        location: Arc<dyn LocationProvider>,
    ) -> Self {
        Self {
            hardware,
            network,
            location,
            last_timestamp: AtomicU64::new(0),
        }
    }

    /// Host readers with no positioning.
    pub fn host() -> Self {
        Self::new(
            Arc::new(HostHardwareReader),
            Arc::new(HostNetworkReader),
            Arc::new(NoLocationProvider),
        )
    }

    /// Replace the location provider.
    pub fn with_location(mut self, location: Arc<dyn LocationProvider>) -> Self {
        self.location = location;
        self
    }

    /// Build a sample, waiting at most `location_timeout` for a fix.
    pub async fn build(&self, location_timeout: Duration) -> Sample {
        let timestamp = self.next_timestamp();
        let hardware = contain("hardware", || self.hardware.read());
        let sim = contain("network", || self.network.read());

        let location = self
            .locate(location_timeout)
            .await
            .filter(|fix| {
                let valid = fix.is_valid();
                if !valid {
                    warn!("discarding invalid location fix {fix:?}");
                }
                valid
            });
        if location.is_none() {
            debug!("sample at {timestamp} has no location");
        }

        Sample {
            timestamp,
            hardware,
            sim,
            location,
        }
    }

    /// Ask the provider for a fix on its own task so a panic stays contained.
    async fn locate(&self, location_timeout: Duration) -> Option<Location> {
        let provider = Arc::clone(&self.location);
        let mut lookup = tokio::spawn(async move { provider.last_location().await });
        match tokio::time::timeout(location_timeout, &mut lookup).await {
            Ok(Ok(fix)) => fix,
            Ok(Err(e)) => {
                warn!("location provider failed: {e}");
                None
            }
            Err(_) => {
                lookup.abort();
                warn!("no location fix within {location_timeout:?}; sampling without one");
                None
            }
        }
    }

    /// Wall-clock milliseconds, never lower than the previous sample's.
    fn next_timestamp(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let prev = self.last_timestamp.fetch_max(now, Ordering::SeqCst);
        prev.max(now)
    }
}

/// Run one sub-reader, turning errors and panics into an empty reading.
fn contain<F>(name: &str, read: F) -> Reading
where
    F: FnOnce() -> Result<Reading, ReadError>,
{
    match catch_unwind(AssertUnwindSafe(read)) {
        Ok(Ok(reading)) => reading,
        Ok(Err(e)) => {
            warn!("{name} reader failed: {e}");
            Reading::new()
        }
        Err(_) => {
            warn!("{name} reader panicked");
            Reading::new()
        }
    }
}
