//! Periodic collect-and-deliver loop.
//!
//! One cycle: drain the offline queue, build a sample, attempt it once,
//! queue it on failure, then sleep for the controller's current period.
//! The first cycle runs as soon as the loop starts.
//!
//! A cycle in progress is never cancelled halfway, because a sample that
//! was built but neither delivered nor queued would be lost. `stop()` only
//! prevents the next cycle and the publication of a late success; owners
//! must [`SchedulerHandle::join`] before shutting the runtime down.
//!
//! Loops that share a [`LoopSlot`] run one at a time, in spawn order. A loop
//! spawned right after another was stopped waits for the old cycle to finish
//! before its first cycle starts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::JoinHandle;

use crate::builder::SampleBuilder;
use crate::deliver::{Deliverer, send_bounded};
use crate::error::{AgentError, DeliveryError};
use crate::motion::MotionIntervalController;
use crate::observe::Observable;
use crate::queue::{DrainReport, OfflineQueue};
use crate::sample::Sample;

/// Per-attempt time budgets.
#[derive(Debug, Clone, Copy)]
pub struct CycleTiming {
    pub location_timeout: Duration,
    pub delivery_timeout: Duration,
}

impl Default for CycleTiming {
    fn default() -> Self {
        Self {
            location_timeout: Duration::from_secs(10),
            delivery_timeout: Duration::from_secs(15),
        }
    }
}

/// What happened to the fresh sample of a cycle.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Delivered; `key` is the sink-assigned key if any.
    Delivered { key: Option<String> },
    /// Delivered, but the service had already stopped so nothing was published.
    DeliveredAfterStop,
    /// Attempted, failed and queued.
    Queued(DeliveryError),
    /// Queued without an attempt so it does not overtake older samples.
    Deferred,
    /// Could not be queued; the sample is gone.
    Lost(AgentError),
}

/// Summary of one cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub timestamp: u64,
    pub drain: Option<DrainReport>,
    pub outcome: CycleOutcome,
}

/// Observables the scheduler writes to.
#[derive(Clone)]
pub struct SchedulerOutputs {
    pub last_payload: Arc<Observable<Option<String>>>,
    pub lost_samples: Arc<Observable<u64>>,
}

impl Default for SchedulerOutputs {
    fn default() -> Self {
        Self {
            last_payload: Arc::new(Observable::new(None)),
            lost_samples: Arc::new(Observable::new(0)),
        }
    }
}

/// Drives the collection cycle for one agent.
pub struct CollectionScheduler {
    agent_id: String,
    builder: Arc<SampleBuilder>,
    deliverer: Arc<dyn Deliverer>,
    queue: Arc<OfflineQueue>,
    controller: Arc<MotionIntervalController>,
    outputs: SchedulerOutputs,
    timing: CycleTiming,
    stopped: AtomicBool,
}

impl CollectionScheduler {
    pub fn new(
        agent_id: impl Into<String>,
        builder: Arc<SampleBuilder>,
        deliverer: Arc<dyn Deliverer>,
        queue: Arc<OfflineQueue>,
        controller: Arc<MotionIntervalController>,
        outputs: SchedulerOutputs,
        timing: CycleTiming,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            builder,
            deliverer,
            queue,
            controller,
            outputs,
            timing,
            stopped: AtomicBool::new(false),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn mark_stopped(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    /// Run exactly one cycle.
    pub async fn run_cycle(&self) -> CycleReport {
        let drain = match self
            .queue
            .drain(&self.agent_id, self.deliverer.as_ref(), self.timing.delivery_timeout)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                error!("drain aborted: {e}");
                None
            }
        };
        let backlog = drain.as_ref().is_none_or(|d| d.remaining > 0);

        let sample = self.builder.build(self.timing.location_timeout).await;
        let timestamp = sample.timestamp;

        let outcome = if backlog {
            debug!("backlog pending; queuing sample {timestamp} behind it");
            self.queue_or_lose(sample, CycleOutcome::Deferred).await
        } else {
            match send_bounded(
                self.deliverer.as_ref(),
                &self.agent_id,
                &sample,
                self.timing.delivery_timeout,
            )
            .await
            {
                Ok(receipt) if self.is_stopped() => {
                    debug!("sample {timestamp} delivered after stop (key {:?})", receipt.key);
                    CycleOutcome::DeliveredAfterStop
                }
                Ok(receipt) => {
                    info!("delivered sample {timestamp} (key {:?})", receipt.key);
                    self.outputs.last_payload.publish(Some(sample.to_json()));
                    CycleOutcome::Delivered { key: receipt.key }
                }
                Err(e) => {
                    warn!("delivery of sample {timestamp} failed: {e}; queuing");
                    self.queue_or_lose(sample, CycleOutcome::Queued(e)).await
                }
            }
        };

        CycleReport {
            timestamp,
            drain,
            outcome,
        }
    }

    async fn queue_or_lose(&self, sample: Sample, queued: CycleOutcome) -> CycleOutcome {
        match self.queue.enqueue(sample).await {
            Ok(()) => queued,
            Err(e) => {
                self.outputs.lost_samples.publish(self.queue.lost_count());
                CycleOutcome::Lost(e)
            }
        }
    }

    /// Start the loop on the current runtime.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        self.spawn_in(LoopSlot::default())
    }

    /// Spawn the loop once every earlier loop holding `slot` has exited.
    pub fn spawn_in(self: Arc<Self>, slot: LoopSlot) -> SchedulerHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let scheduler = Arc::clone(&self);
        let task = tokio::spawn(async move {
            let _slot = slot.acquire(&scheduler.agent_id).await;
            info!("collection loop started for {}", scheduler.agent_id);
            loop {
                if scheduler.is_stopped() || *stop_rx.borrow() {
                    break;
                }
                let report = scheduler.run_cycle().await;
                debug!("cycle {} finished: {:?}", report.timestamp, report.outcome);

                let interval = scheduler.controller.current_interval();
                debug!("next cycle in {interval:?}");
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.changed() => break,
                }
            }
            info!("collection loop stopped for {}", scheduler.agent_id);
        });
        SchedulerHandle {
            scheduler: self,
            stop_tx,
            task: Some(task),
        }
    }
}

/// Exclusive right to run a collection loop. Waiters are served in FIFO order.
#[derive(Clone, Default)]
pub struct LoopSlot(Arc<Mutex<()>>);

impl LoopSlot {
    async fn acquire(self, agent_id: &str) -> OwnedMutexGuard<()> {
        match Arc::clone(&self.0).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("loop for {agent_id} waiting for the previous one to finish");
                self.0.lock_owned().await
            }
        }
    }
}

/// Running loop. Stop is idempotent.
pub struct SchedulerHandle {
    scheduler: Arc<CollectionScheduler>,
    stop_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Cancel the pending timer. An in-flight cycle finishes on its own.
    pub fn stop(&self) {
        if self.scheduler.mark_stopped() {
            debug!("stop requested for {}", self.scheduler.agent_id);
        }
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.scheduler.is_stopped()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Stop and wait for the loop to exit.
    pub async fn join(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("collection loop ended abnormally: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deliver::DeliveryReceipt;
    use crate::motion::IntervalPolicy;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct Switchable {
        fail: AtomicBool,
        delay: Mutex<Duration>,
        sent: Mutex<Vec<Sample>>,
        attempts: AtomicUsize,
    }

    impl Switchable {
        fn failing() -> Self {
            let s = Self::default();
            s.fail.store(true, Ordering::SeqCst);
            s
        }

        fn timestamps(&self) -> Vec<u64> {
            self.sent.lock().unwrap().iter().map(|s| s.timestamp).collect()
        }
    }

    #[async_trait]
    impl Deliverer for Switchable {
        async fn send(&self, _: &str, sample: &Sample) -> Result<DeliveryReceipt, DeliveryError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(DeliveryError::Network("down".into()));
            }
            self.sent.lock().unwrap().push(sample.clone());
            Ok(DeliveryReceipt {
                key: Some(format!("k{}", sample.timestamp)),
            })
        }
    }

    struct Rig {
        scheduler: Arc<CollectionScheduler>,
        deliverer: Arc<Switchable>,
        queue: Arc<OfflineQueue>,
        store: Arc<MemoryStore>,
        outputs: SchedulerOutputs,
    }

    fn rig(deliverer: Switchable, moving: Duration) -> Rig {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(OfflineQueue::open(store.clone(), 100).unwrap());
        let deliverer = Arc::new(deliverer);
        let outputs = SchedulerOutputs::default();
        let controller = Arc::new(MotionIntervalController::new(IntervalPolicy {
            moving,
            still: moving * 10,
            confidence_floor: 70,
        }));
        let scheduler = Arc::new(CollectionScheduler::new(
            "agent-1",
            Arc::new(SampleBuilder::host()),
            deliverer.clone(),
            queue.clone(),
            controller,
            outputs.clone(),
            CycleTiming {
                location_timeout: Duration::from_millis(20),
                delivery_timeout: Duration::from_secs(1),
            },
        ));
        Rig {
            scheduler,
            deliverer,
            queue,
            store,
            outputs,
        }
    }

    /// A second scheduler for the same agent, sharing the rig's queue.
    fn successor(r: &Rig) -> Arc<CollectionScheduler> {
        Arc::new(CollectionScheduler::new(
            "agent-1",
            Arc::new(SampleBuilder::host()),
            r.deliverer.clone(),
            r.queue.clone(),
            Arc::new(MotionIntervalController::new(IntervalPolicy::default())),
            r.outputs.clone(),
            CycleTiming {
                location_timeout: Duration::from_millis(20),
                delivery_timeout: Duration::from_secs(1),
            },
        ))
    }

    // -----------------------------------------------------------------------
    // Single cycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_success_publishes_last_payload() {
        let r = rig(Switchable::default(), Duration::from_secs(60));
        let report = r.scheduler.run_cycle().await;
        assert!(matches!(report.outcome, CycleOutcome::Delivered { .. }));
        let sent = r.deliverer.sent.lock().unwrap()[0].to_json();
        assert_eq!(r.outputs.last_payload.get(), Some(sent));
        assert!(r.queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_failure_queues_then_next_cycle_drains_first() {
        let r = rig(Switchable::failing(), Duration::from_secs(60));
        let first = r.scheduler.run_cycle().await;
        assert!(matches!(first.outcome, CycleOutcome::Queued(_)));
        assert_eq!(r.queue.len().await, 1);
        assert!(r.outputs.last_payload.get().is_none());

        r.deliverer.fail.store(false, Ordering::SeqCst);
        let second = r.scheduler.run_cycle().await;
        assert_eq!(second.drain.as_ref().map(|d| d.delivered), Some(1));
        assert!(matches!(second.outcome, CycleOutcome::Delivered { .. }));
        assert_eq!(r.deliverer.timestamps(), vec![first.timestamp, second.timestamp]);
    }

    #[tokio::test]
    async fn test_backlog_defers_new_sample_without_attempt() {
        let r = rig(Switchable::failing(), Duration::from_secs(60));
        r.scheduler.run_cycle().await;
        let before = r.deliverer.attempts.load(Ordering::SeqCst);

        let report = r.scheduler.run_cycle().await;
        assert!(matches!(report.outcome, CycleOutcome::Deferred));
        // Only the drain retry of the head was attempted.
        assert_eq!(r.deliverer.attempts.load(Ordering::SeqCst), before + 1);
        assert_eq!(r.queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_enqueue_failure_counts_lost_sample() {
        let r = rig(Switchable::failing(), Duration::from_secs(60));
        r.store.set_fail_writes(true);
        let report = r.scheduler.run_cycle().await;
        assert!(matches!(report.outcome, CycleOutcome::Lost(AgentError::Persistence(_))));
        assert_eq!(r.outputs.lost_samples.get(), 1);
    }

    #[tokio::test]
    async fn test_success_after_stop_is_not_published() {
        let d = Switchable::default();
        *d.delay.lock().unwrap() = Duration::from_millis(100);
        let r = rig(d, Duration::from_secs(60));
        let sched = r.scheduler.clone();
        let cycle = tokio::spawn(async move { sched.run_cycle().await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        r.scheduler.mark_stopped();
        let report = cycle.await.unwrap();
        assert!(matches!(report.outcome, CycleOutcome::DeliveredAfterStop));
        assert!(r.outputs.last_payload.get().is_none());
    }

    #[tokio::test]
    async fn test_failure_after_stop_is_still_queued() {
        let d = Switchable::failing();
        *d.delay.lock().unwrap() = Duration::from_millis(100);
        let r = rig(d, Duration::from_secs(60));
        let sched = r.scheduler.clone();
        let cycle = tokio::spawn(async move { sched.run_cycle().await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        r.scheduler.mark_stopped();
        let report = cycle.await.unwrap();
        assert!(matches!(report.outcome, CycleOutcome::Queued(_)));
        assert_eq!(r.queue.len().await, 1);
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_loop_runs_immediately_and_rearms() {
        let r = rig(Switchable::default(), Duration::from_millis(150));
        let handle = r.scheduler.clone().spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(r.deliverer.attempts.load(Ordering::SeqCst), 1, "first cycle is immediate");
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(r.deliverer.attempts.load(Ordering::SeqCst) >= 2);
        handle.join().await;
    }

    #[tokio::test]
    async fn test_stop_twice_prevents_further_cycles() {
        let r = rig(Switchable::default(), Duration::from_millis(30));
        let handle = r.scheduler.clone().spawn();
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.stop();
        handle.stop();
        assert!(handle.is_stopped());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_stop = r.deliverer.attempts.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(r.deliverer.attempts.load(Ordering::SeqCst), after_stop);
        assert!(handle.is_finished());
        handle.join().await;
    }

    #[tokio::test]
    async fn test_join_waits_for_in_flight_cycle() {
        let d = Switchable::failing();
        *d.delay.lock().unwrap() = Duration::from_millis(150);
        let r = rig(d, Duration::from_secs(60));
        let handle = r.scheduler.clone().spawn();
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.join().await;
        assert_eq!(r.queue.len().await, 1, "failed sample queued before join returns");
    }

    #[tokio::test]
    async fn test_shared_slot_runs_loops_one_at_a_time() {
        let d = Switchable::failing();
        *d.delay.lock().unwrap() = Duration::from_millis(150);
        let r = rig(d, Duration::from_secs(60));
        let slot = LoopSlot::default();

        let first = r.scheduler.clone().spawn_in(slot.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        first.stop();
        let second = successor(&r).spawn_in(slot);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(r.deliverer.attempts.load(Ordering::SeqCst), 1, "second loop waits");

        first.join().await;
        assert_eq!(r.queue.len().await, 1);
        r.deliverer.fail.store(false, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(500)).await;
        let delivered = r.deliverer.timestamps();
        assert_eq!(delivered.len(), 2, "{delivered:?}");
        assert!(delivered[0] <= delivered[1], "older sample first: {delivered:?}");
        assert!(r.queue.is_empty().await);
        second.join().await;
    }
}
