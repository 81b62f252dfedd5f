//! Session duration clock.

use std::time::{Duration, Instant};

/// One reading of the session clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElapsedTick {
    /// `mm:ss`; minutes keep counting past 59.
    pub display: String,
    pub total_seconds: u64,
}

impl ElapsedTick {
    pub fn from_seconds(total_seconds: u64) -> Self {
        Self {
            display: format!("{:02}:{:02}", total_seconds / 60, total_seconds % 60),
            total_seconds,
        }
    }
}

/// Monotonic origin recorded at `start`. Recreated per session, never persisted.
#[derive(Debug, Clone, Copy)]
pub struct ElapsedClock {
    origin: Instant,
}

impl ElapsedClock {
    /// Tick period used by the service.
    pub const PERIOD: Duration = Duration::from_secs(1);

    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    pub fn tick(&self) -> ElapsedTick {
        ElapsedTick::from_seconds(self.elapsed().as_secs())
    }
}
