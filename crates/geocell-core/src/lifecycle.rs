//! `TrackerService`: start/stop state machine wiring every component together.
//!
//! ```text
//! CREATED --start--> RUNNING --stop--> STOPPED --start--> RUNNING ...
//! ```
//!
//! A running session owns the collection loop, the one-second clock task,
//! the classifier subscription and the wake guard. Stopping drops all of
//! them. Redundant `start` and `stop` calls are no-ops.
//!
//! `stop` is synchronous and does not wait for a cycle already in flight.
//! [`TrackerService::shutdown`] does, and is what an owner about to drop
//! the runtime must call. A `start` right after `stop` queues its loop
//! behind the old one, so one loop runs per service at any time.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::builder::SampleBuilder;
use crate::clock::ElapsedClock;
use crate::config::AgentConfig;
use crate::deliver::{Deliverer, HttpDeliverer};
use crate::error::AgentError;
use crate::motion::{ActivityFeed, MotionIntervalController};
use crate::observe::Observable;
use crate::platform::{
    LogNotifier, LogWake, ServiceStatus, StatusNotifier, WakeGuard, WakeResource,
};
use crate::queue::OfflineQueue;
use crate::scheduler::{
    CollectionScheduler, CycleTiming, LoopSlot, SchedulerHandle, SchedulerOutputs,
};
use crate::sources::FixedLocationProvider;
use crate::store::{AGENT_ID_KEY, FileStore, KvStore};

/// Tag of the wake resource held while running.
pub const WAKE_TAG: &str = "geocelltrack:tracker";
/// Status text while running.
pub const RUNNING_MESSAGE: &str = "Tracking…";
/// Status text after stop.
pub const STOPPED_MESSAGE: &str = "Stopped";

/// Collaborators injected into the service.
pub struct ServiceParts {
    pub store: Arc<dyn KvStore>,
    pub builder: Arc<SampleBuilder>,
    pub deliverer: Arc<dyn Deliverer>,
    pub feed: Option<Arc<dyn ActivityFeed>>,
    pub wake: Arc<dyn WakeResource>,
    pub notifier: Arc<dyn StatusNotifier>,
}

impl ServiceParts {
    pub fn new(
        store: Arc<dyn KvStore>,
        builder: Arc<SampleBuilder>,
        deliverer: Arc<dyn Deliverer>,
    ) -> Self {
        Self {
            store,
            builder,
            deliverer,
            feed: None,
            wake: Arc::new(LogWake),
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Host parts: file store under `state_dir`, HTTP sink, host readers.
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        let store = FileStore::open(&config.state_dir)?;
        let deliverer = HttpDeliverer::new(
            &config.sink_url,
            &config.sink_root,
            config.delivery_timeout(),
        )?
        .with_auth_token(config.auth_token.clone());
        let mut builder = SampleBuilder::host();
        if let Some(loc) = config.fixed_location {
            builder = builder.with_location(Arc::new(FixedLocationProvider::new(loc)));
        }
        Ok(Self::new(Arc::new(store), Arc::new(builder), Arc::new(deliverer)))
    }

    pub fn with_feed(mut self, feed: Arc<dyn ActivityFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    pub fn with_wake(mut self, wake: Arc<dyn WakeResource>) -> Self {
        self.wake = wake;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn StatusNotifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

struct Session {
    agent_id: String,
    scheduler: SchedulerHandle,
    clock_task: JoinHandle<()>,
    feed_task: Option<JoinHandle<()>>,
    _wake: WakeGuard,
}

/// The agent service.
pub struct TrackerService {
    config: AgentConfig,
    parts: ServiceParts,
    queue: Arc<OfflineQueue>,
    controller: Arc<MotionIntervalController>,
    outputs: SchedulerOutputs,
    elapsed_time: Arc<Observable<String>>,
    elapsed_seconds: Arc<Observable<u64>>,
    status: Observable<ServiceStatus>,
    session: Mutex<Option<Session>>,
    loop_slot: LoopSlot,
    /// Stopped loop that may still be finishing its last cycle.
    retired: Mutex<Option<SchedulerHandle>>,
}

impl TrackerService {
    /// Validate the config and reload the offline queue.
    pub fn new(config: AgentConfig, parts: ServiceParts) -> Result<Self, AgentError> {
        config.validate()?;
        let queue = Arc::new(OfflineQueue::open(
            Arc::clone(&parts.store),
            config.queue_capacity,
        )?);
        let controller = Arc::new(MotionIntervalController::new(config.interval_policy()));
        Ok(Self {
            config,
            parts,
            queue,
            controller,
            outputs: SchedulerOutputs::default(),
            elapsed_time: Arc::new(Observable::new("00:00".to_string())),
            elapsed_seconds: Arc::new(Observable::new(0)),
            status: Observable::new(ServiceStatus::Created),
            session: Mutex::new(None),
            loop_slot: LoopSlot::default(),
            retired: Mutex::new(None),
        })
    }

    /// Host service built from `config` alone.
    pub fn from_config(config: AgentConfig) -> Result<Self, AgentError> {
        let parts = ServiceParts::from_config(&config)?;
        Self::new(config, parts)
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Begin tracking as `agent_id`. Must be called inside a Tokio runtime.
    pub fn start(&self, agent_id: &str) -> Result<(), AgentError> {
        let agent_id = agent_id.trim();
        if agent_id.is_empty() {
            return Err(AgentError::InvalidAgentId);
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(AgentError::Config(
                "start must be called from within a Tokio runtime".into(),
            ));
        }

        let mut session = self.session();
        if let Some(running) = session.as_ref() {
            if running.agent_id != agent_id {
                warn!(
                    "start({agent_id}) ignored: already running as {}",
                    running.agent_id
                );
            } else {
                debug!("start({agent_id}) ignored: already running");
            }
            return Ok(());
        }

        if let Err(e) = self.parts.store.put(AGENT_ID_KEY, agent_id) {
            warn!("could not persist agent id for resume: {e}");
        }

        self.controller.reset();
        let wake = self
            .parts
            .wake
            .acquire(WAKE_TAG, self.config.wake_timeout());

        let scheduler = Arc::new(CollectionScheduler::new(
            agent_id,
            Arc::clone(&self.parts.builder),
            Arc::clone(&self.parts.deliverer),
            Arc::clone(&self.queue),
            Arc::clone(&self.controller),
            self.outputs.clone(),
            CycleTiming {
                location_timeout: self.config.location_timeout(),
                delivery_timeout: self.config.delivery_timeout(),
            },
        ))
        .spawn_in(self.loop_slot.clone());

        *session = Some(Session {
            agent_id: agent_id.to_string(),
            scheduler,
            clock_task: self.spawn_clock(),
            feed_task: self.spawn_feed(),
            _wake: wake,
        });
        drop(session);

        self.status.publish(ServiceStatus::Running);
        self.parts
            .notifier
            .notify(ServiceStatus::Running, RUNNING_MESSAGE);
        info!("tracker started for {agent_id}");
        Ok(())
    }

    /// Restart with the agent id persisted by the last `start`.
    pub fn resume(&self) -> Result<(), AgentError> {
        match self.parts.store.get(AGENT_ID_KEY)? {
            Some(id) if !id.trim().is_empty() => {
                info!("resuming as {}", id.trim());
                self.start(&id)
            }
            _ => Err(AgentError::InvalidAgentId),
        }
    }

    /// Stop tracking. Safe to call any number of times.
    ///
    /// A cycle in flight keeps running until it has delivered or queued its
    /// sample; use [`shutdown`](Self::shutdown) to wait for it.
    pub fn stop(&self) {
        let Some(session) = self.session().take() else {
            return;
        };
        let Session {
            agent_id,
            scheduler,
            clock_task,
            feed_task,
            _wake: wake,
        } = session;
        self.controller.deactivate();
        scheduler.stop();
        clock_task.abort();
        if let Some(feed) = feed_task {
            feed.abort();
        }
        // Later loops wait on the slot, so only the newest handle is kept.
        *self.retired() = Some(scheduler);
        drop(wake);

        self.status.publish(ServiceStatus::Stopped);
        self.parts
            .notifier
            .notify(ServiceStatus::Stopped, STOPPED_MESSAGE);
        info!("tracker stopped for {agent_id}");
    }

    /// Stop, then wait until the last cycle has delivered or queued its sample.
    pub async fn shutdown(&self) {
        self.stop();
        let retired = self.retired().take();
        if let Some(handle) = retired {
            handle.join().await;
            debug!("collection loop drained");
        }
    }

    fn retired(&self) -> MutexGuard<'_, Option<SchedulerHandle>> {
        self.retired.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn spawn_clock(&self) -> JoinHandle<()> {
        let clock = ElapsedClock::start();
        let time = Arc::clone(&self.elapsed_time);
        let seconds = Arc::clone(&self.elapsed_seconds);
        let first = clock.tick();
        time.publish(first.display);
        seconds.publish(first.total_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ElapsedClock::PERIOD);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let t = clock.tick();
                time.publish(t.display);
                seconds.publish(t.total_seconds);
            }
        })
    }

    fn spawn_feed(&self) -> Option<JoinHandle<()>> {
        let feed = self.parts.feed.as_ref()?;
        let mut rx = feed.subscribe(self.config.activity_period());
        let controller = Arc::clone(&self.controller);
        Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        controller.apply(event);
                    }
                    Err(RecvError::Lagged(n)) => debug!("skipped {n} stale classifications"),
                    Err(RecvError::Closed) => break,
                }
            }
        }))
    }

    pub fn status(&self) -> ServiceStatus {
        self.status.get()
    }

    pub fn status_observable(&self) -> &Observable<ServiceStatus> {
        &self.status
    }

    /// Agent id of the running session.
    pub fn agent_id(&self) -> Option<String> {
        self.session().as_ref().map(|s| s.agent_id.clone())
    }

    /// `mm:ss` since the session started.
    pub fn elapsed_time(&self) -> &Observable<String> {
        &self.elapsed_time
    }

    pub fn elapsed_seconds(&self) -> &Observable<u64> {
        &self.elapsed_seconds
    }

    /// JSON of the last delivered sample.
    pub fn last_payload(&self) -> &Observable<Option<String>> {
        &self.outputs.last_payload
    }

    /// Samples dropped because local durability failed.
    pub fn lost_samples(&self) -> &Observable<u64> {
        &self.outputs.lost_samples
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn controller(&self) -> &Arc<MotionIntervalController> {
        &self.controller
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }
}

impl Drop for TrackerService {
    fn drop(&mut self) {
        self.stop();
    }
}
