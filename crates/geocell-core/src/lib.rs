//! # geocell-core
//!
//! Field-agent telemetry: sample device, radio and position state on a
//! motion-adaptive cadence and deliver every sample to a remote sink,
//! surviving network outages and process restarts.
//!
//! ## Quick Start
//!
//! ```no_run
//! use geocell_core::{AgentConfig, TrackerService};
//!
//! # async fn demo() -> Result<(), geocell_core::AgentError> {
//! let service = TrackerService::from_config(AgentConfig::default())?;
//! service.start("agent-1")?;
//!
//! let mut payloads = service.last_payload().subscribe();
//! payloads.changed().await.ok();
//! println!("delivered: {:?}", *payloads.borrow());
//!
//! service.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! TrackerService ──start──▶ CollectionScheduler loop
//!                            drain OfflineQueue ─▶ SampleBuilder.build
//!                            ─▶ Deliverer.send ─▶ (fail) OfflineQueue.enqueue
//!                            ─▶ sleep(MotionIntervalController.current_interval)
//! ActivityFeed ──events──▶ MotionIntervalController
//! ElapsedClock ──1 s──▶ elapsed_time / elapsed_seconds
//! ```
//!
//! Only [`AgentError::Persistence`] and [`AgentError::InvalidAgentId`] reach
//! the owner; every delivery failure is absorbed by the offline queue.

pub mod builder;
pub mod clock;
pub mod config;
pub mod deliver;
pub mod error;
pub mod lifecycle;
pub mod motion;
pub mod observe;
pub mod platform;
pub mod queue;
pub mod sample;
pub mod scheduler;
pub mod sources;
pub mod store;

pub use builder::SampleBuilder;
pub use clock::{ElapsedClock, ElapsedTick};
pub use config::AgentConfig;
pub use deliver::{Deliverer, DeliveryReceipt, HttpDeliverer, send_bounded};
pub use error::{AgentError, DeliveryError, ReadError, StoreError};
pub use lifecycle::{ServiceParts, TrackerService};
pub use motion::{
    ActivityEvent, ActivityFeed, ActivityKind, ChannelFeed, IntervalMode, IntervalPolicy,
    MotionIntervalController,
};
pub use observe::Observable;
pub use platform::{LogNotifier, LogWake, ServiceStatus, StatusNotifier, WakeGuard, WakeResource};
pub use queue::{DrainReport, OfflineQueue};
pub use sample::{Location, Reading, Sample, validate_payload};
pub use scheduler::{CollectionScheduler, CycleOutcome, CycleReport, CycleTiming, SchedulerHandle};
pub use sources::{
    FixedLocationProvider, HardwareReader, HostHardwareReader, HostNetworkReader,
    LocationProvider, NetworkReader, NoLocationProvider,
};
pub use store::{FileStore, KvStore, MemoryStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
