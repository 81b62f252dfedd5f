//! Error taxonomy for the agent.
//!
//! Per-sample delivery failures ([`DeliveryError`]) are always recovered
//! locally by queuing. Only [`AgentError`] reaches the owning layer.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single delivery attempt. Every variant is transient.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Connection refused, DNS failure, reset, ...
    #[error("network error: {0}")]
    Network(String),
    /// The sink answered with a non-success status.
    #[error("remote rejected sample (status {status}): {message}")]
    RemoteRejected { status: u16, message: String },
    /// No answer within the attempt budget.
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

impl DeliveryError {
    /// Whether the sample should be kept for a later retry.
    ///
    /// Always `true`: rejected samples get no poison-pill treatment and are
    /// retried like any network failure.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RemoteRejected { .. } | Self::Timeout(_) => true,
        }
    }
}

/// Failure of the local durable key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt persisted value: {0}")]
    Corrupt(String),
    #[error("offline queue is at capacity ({0} samples)")]
    CapacityExceeded(usize),
    #[error("invalid store key: {0:?}")]
    InvalidKey(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced to the layer that owns the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Local durability was lost; the affected sample is gone.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
    /// `start` was called with an empty agent identifier.
    #[error("invalid agent id: identifier must be non-empty")]
    InvalidAgentId,
    /// Malformed configuration file or value.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Failure of one sensor sub-reader. Never surfaced: the field is left empty.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("reader unavailable: {0}")]
    Unavailable(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
