//! Durable FIFO of samples not yet confirmed delivered.
//!
//! The persisted value under [`OFFLINE_QUEUE_KEY`] is the sole record of
//! undelivered work. Every mutation is flushed to the store before it counts:
//! if the flush fails, the in-memory view is rolled back so it always mirrors
//! what a restarted process would reload.
//!
//! Delivery is at-least-once. A sample whose remote write succeeded but
//! whose local removal could not be persisted is delivered again by a later
//! drain; no idempotency key is attached.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use crate::deliver::{Deliverer, send_bounded};
use crate::error::{AgentError, DeliveryError, StoreError};
use crate::sample::Sample;
use crate::store::{KvStore, OFFLINE_QUEUE_KEY};

/// Default maximum number of buffered samples.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Outcome of one drain pass.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Samples delivered and removed, oldest first.
    pub delivered: usize,
    /// Samples still queued after the pass.
    pub remaining: usize,
    /// The failure that halted the pass, if any.
    pub halted_on: Option<DeliveryError>,
}

/// Persistence-backed FIFO buffer.
pub struct OfflineQueue {
    store: Arc<dyn KvStore>,
    entries: Mutex<Vec<Sample>>,
    capacity: usize,
    lost: AtomicU64,
}

impl OfflineQueue {
    /// Open the queue, reloading anything a previous process left behind.
    ///
    /// A corrupt persisted value is an error rather than an empty queue.
    pub fn open(store: Arc<dyn KvStore>, capacity: usize) -> Result<Self, AgentError> {
        let entries = match store.get(OFFLINE_QUEUE_KEY)? {
            None => Vec::new(),
            Some(raw) if raw.trim().is_empty() => Vec::new(),
            Some(raw) => serde_json::from_str::<Vec<Sample>>(&raw)
                .map_err(|e| StoreError::Corrupt(format!("{OFFLINE_QUEUE_KEY}: {e}")))?,
        };
        if !entries.is_empty() {
            info!("reloaded {} undelivered samples", entries.len());
        }
        Ok(Self {
            store,
            entries: Mutex::new(entries),
            capacity: capacity.max(1),
            lost: AtomicU64::new(0),
        })
    }

    /// Append durably. On failure the sample is lost and counted.
    pub async fn enqueue(&self, mut sample: Sample) -> Result<(), AgentError> {
        if let Some(fix) = sample.location.filter(|fix| !fix.is_valid()) {
            // NaN would persist as `null` and make the stored queue unreadable.
            warn!("dropping invalid location {fix:?} from sample {}", sample.timestamp);
            sample.location = None;
        }
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.capacity {
            return Err(self.lose(&sample, StoreError::CapacityExceeded(self.capacity)));
        }
        let timestamp = sample.timestamp;
        entries.push(sample);
        if let Err(e) = self.flush(&entries).await {
            let sample = entries.pop();
            if let Some(s) = sample {
                return Err(self.lose(&s, e));
            }
            return Err(e.into());
        }
        debug!("queued sample {timestamp} ({} pending)", entries.len());
        Ok(())
    }

    /// Retry every pending sample oldest-first, halting at the first failure.
    ///
    /// Holds the queue for the whole pass, so only one drain runs at a time
    /// and nothing can be appended between retried samples.
    pub async fn drain(
        &self,
        agent_id: &str,
        deliverer: &dyn Deliverer,
        attempt_budget: Duration,
    ) -> Result<DrainReport, AgentError> {
        let mut entries = self.entries.lock().await;
        let mut report = DrainReport::default();

        while let Some(head) = entries.first() {
            match send_bounded(deliverer, agent_id, head, attempt_budget).await {
                Ok(receipt) => {
                    let removed = entries.remove(0);
                    if let Err(e) = self.flush(&entries).await {
                        // Keep memory equal to disk; the sample is resent later.
                        entries.insert(0, removed);
                        report.remaining = entries.len();
                        error!("delivered sample could not be dequeued durably: {e}");
                        return Err(e.into());
                    }
                    debug!(
                        "redelivered sample {} (key {:?})",
                        removed.timestamp, receipt.key
                    );
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!("drain halted at sample {}: {e}", head.timestamp);
                    report.halted_on = Some(e);
                    break;
                }
            }
        }

        report.remaining = entries.len();
        if report.delivered > 0 {
            info!(
                "drained {} queued samples, {} remaining",
                report.delivered, report.remaining
            );
        }
        Ok(report)
    }

    /// Pending sample count.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Copy of the pending samples, oldest first.
    pub async fn snapshot(&self) -> Vec<Sample> {
        self.entries.lock().await.clone()
    }

    /// Samples dropped because local durability failed.
    pub fn lost_count(&self) -> u64 {
        self.lost.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Persist the whole queue. The store write runs on the blocking pool;
    /// callers hold the entries lock across it so flushes never reorder.
    async fn flush(&self, entries: &[Sample]) -> Result<(), StoreError> {
        let json = serde_json::to_string(entries)
            .map_err(|e| StoreError::Corrupt(format!("serialize queue: {e}")))?;
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.put(OFFLINE_QUEUE_KEY, &json))
            .await
            .map_err(|e| StoreError::Unavailable(format!("queue flush task failed: {e}")))?
    }

    fn lose(&self, sample: &Sample, cause: StoreError) -> AgentError {
        let total = self.lost.fetch_add(1, Ordering::SeqCst) + 1;
        error!(
            "lost sample {}: {cause} ({total} lost so far)",
            sample.timestamp
        );
        AgentError::Persistence(cause)
    }
}
