//! Platform collaborators: the keep-running resource and the status notifier.

use std::fmt;
use std::time::Duration;

use log::info;
use serde::Serialize;

/// Service lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Created,
    Running,
    Stopped,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

// ---------------------------------------------------------------------------
// Wake resource
// ---------------------------------------------------------------------------

/// Held keep-running resource. Released exactly once, on drop.
pub struct WakeGuard {
    tag: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl WakeGuard {
    pub fn new(tag: impl Into<String>, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            tag: tag.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl Drop for WakeGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for WakeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeGuard").field("tag", &self.tag).finish()
    }
}

/// Something that keeps the host awake while the agent runs.
pub trait WakeResource: Send + Sync {
    /// Acquire for at most `timeout`; the guard releases it.
    fn acquire(&self, tag: &str, timeout: Duration) -> WakeGuard;
}

/// Host implementation: a process never sleeps, so only log the scope.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWake;

impl WakeResource for LogWake {
    fn acquire(&self, tag: &str, timeout: Duration) -> WakeGuard {
        info!("wake acquired: {tag} (up to {timeout:?})");
        let owned = tag.to_string();
        WakeGuard::new(tag, move || info!("wake released: {owned}"))
    }
}

// ---------------------------------------------------------------------------
// Status notifier
// ---------------------------------------------------------------------------

/// Foreground-presence signal. The agent does not interpret it further.
pub trait StatusNotifier: Send + Sync {
    fn notify(&self, status: ServiceStatus, message: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl StatusNotifier for LogNotifier {
    fn notify(&self, status: ServiceStatus, message: &str) {
        info!("[{status}] {message}");
    }
}
