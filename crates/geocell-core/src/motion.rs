//! Motion-driven sampling cadence.
//!
//! An external classifier reports `(kind, confidence)` roughly every ten
//! seconds. [`MotionIntervalController`] folds those events into a two-valued
//! [`IntervalMode`] and the scheduler reads the resulting period once per
//! cycle. Reads and writes are single atomic operations; the scheduler never
//! waits on the classifier.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Activity classes reported by the motion classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    Still,
    Walking,
    Running,
    OnBicycle,
    InVehicle,
    Unknown,
}

impl ActivityKind {
    /// The mode this activity asks for, or `None` when it carries no signal.
    pub fn target_mode(self) -> Option<IntervalMode> {
        match self {
            Self::Still | Self::Walking => Some(IntervalMode::Still),
            Self::Running | Self::OnBicycle | Self::InVehicle => Some(IntervalMode::Moving),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Still => write!(f, "STILL"),
            Self::Walking => write!(f, "WALKING"),
            Self::Running => write!(f, "RUNNING"),
            Self::OnBicycle => write!(f, "ON_BICYCLE"),
            Self::InVehicle => write!(f, "IN_VEHICLE"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STILL" => Ok(Self::Still),
            "WALKING" => Ok(Self::Walking),
            "RUNNING" => Ok(Self::Running),
            "ON_BICYCLE" | "BICYCLE" => Ok(Self::OnBicycle),
            "IN_VEHICLE" | "VEHICLE" => Ok(Self::InVehicle),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(format!("unknown activity kind '{other}'")),
        }
    }
}

/// One classifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    /// Confidence in percent, 0..=100.
    pub confidence: u8,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, confidence: u8) -> Self {
        Self {
            kind,
            confidence: confidence.min(100),
        }
    }

    /// Parse a `KIND CONFIDENCE` line, e.g. `IN_VEHICLE 82`.
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let kind: ActivityKind = parts.next().ok_or("empty classification line")?.parse()?;
        let confidence = parts
            .next()
            .ok_or("missing confidence")?
            .trim_end_matches('%')
            .parse::<u8>()
            .map_err(|e| format!("invalid confidence: {e}"))?;
        Ok(Self::new(kind, confidence))
    }
}

/// Sampling cadence mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntervalMode {
    Moving,
    Still,
}

impl IntervalMode {
    fn as_u8(self) -> u8 {
        match self {
            Self::Moving => 0,
            Self::Still => 1,
        }
    }

    fn from_u8(v: u8) -> Self {
        if v == 1 { Self::Still } else { Self::Moving }
    }
}

impl fmt::Display for IntervalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Moving => write!(f, "moving"),
            Self::Still => write!(f, "still"),
        }
    }
}

/// Periods and confidence threshold for the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalPolicy {
    pub moving: Duration,
    pub still: Duration,
    /// Classifications below this confidence (percent) are ignored.
    pub confidence_floor: u8,
}

impl Default for IntervalPolicy {
    fn default() -> Self {
        Self {
            moving: Duration::from_secs(70),
            still: Duration::from_secs(300),
            confidence_floor: 70,
        }
    }
}

/// Selects the sampling period from classified motion.
///
/// Starts in [`IntervalMode::Moving`] so a mobile agent is never
/// under-sampled before the first classification arrives.
pub struct MotionIntervalController {
    policy: IntervalPolicy,
    mode: AtomicU8,
    active: AtomicBool,
}

impl MotionIntervalController {
    pub fn new(policy: IntervalPolicy) -> Self {
        Self {
            policy,
            mode: AtomicU8::new(IntervalMode::Moving.as_u8()),
            active: AtomicBool::new(true),
        }
    }

    pub fn policy(&self) -> &IntervalPolicy {
        &self.policy
    }

    /// Apply one classification. Returns `true` when the mode changed.
    ///
    /// No-op after [`deactivate`](Self::deactivate), below the confidence
    /// floor, or for `UNKNOWN`.
    pub fn on_activity_classified(&self, kind: ActivityKind, confidence: u8) -> bool {
        if !self.active.load(Ordering::SeqCst) {
            debug!("classification {kind} ({confidence}%) after stop ignored");
            return false;
        }
        if confidence < self.policy.confidence_floor {
            debug!(
                "classification {kind} ({confidence}%) below floor {}%",
                self.policy.confidence_floor
            );
            return false;
        }
        let Some(target) = kind.target_mode() else {
            return false;
        };
        let prev = IntervalMode::from_u8(self.mode.swap(target.as_u8(), Ordering::SeqCst));
        if prev != target {
            info!(
                "motion {kind} ({confidence}%): interval {prev} -> {target} ({:?})",
                self.period_for(target)
            );
            true
        } else {
            false
        }
    }

    /// Convenience for [`ActivityEvent`]s coming off a feed.
    pub fn apply(&self, event: ActivityEvent) -> bool {
        self.on_activity_classified(event.kind, event.confidence)
    }

    pub fn mode(&self) -> IntervalMode {
        IntervalMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    /// Period of the active mode.
    pub fn current_interval(&self) -> Duration {
        self.period_for(self.mode())
    }

    fn period_for(&self, mode: IntervalMode) -> Duration {
        match mode {
            IntervalMode::Moving => self.policy.moving,
            IntervalMode::Still => self.policy.still,
        }
    }

    /// Back to MOVING and accepting classifications.
    pub fn reset(&self) {
        self.mode.store(IntervalMode::Moving.as_u8(), Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
    }

    /// Stop accepting classifications; the current mode is kept.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Default for MotionIntervalController {
    fn default() -> Self {
        Self::new(IntervalPolicy::default())
    }
}

// ---------------------------------------------------------------------------
// Classifier feed
// ---------------------------------------------------------------------------

/// Source of classification events.
///
/// Dropping the returned receiver unsubscribes.
pub trait ActivityFeed: Send + Sync {
    /// Subscribe, asking for events roughly every `period`.
    fn subscribe(&self, period: Duration) -> broadcast::Receiver<ActivityEvent>;
}

/// In-process feed: whoever holds it publishes, the agent subscribes.
#[derive(Clone)]
pub struct ChannelFeed {
    tx: broadcast::Sender<ActivityEvent>,
}

impl ChannelFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Deliver an event to current subscribers. Returns how many received it.
    pub fn publish(&self, event: ActivityEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChannelFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityFeed for ChannelFeed {
    fn subscribe(&self, period: Duration) -> broadcast::Receiver<ActivityEvent> {
        debug!("activity subscription requested every {period:?}");
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> MotionIntervalController {
        MotionIntervalController::new(IntervalPolicy {
            moving: Duration::from_secs(70),
            still: Duration::from_secs(300),
            confidence_floor: 60,
        })
    }

    // -----------------------------------------------------------------------
    // Mode selection
    // -----------------------------------------------------------------------

    #[test]
    fn test_defaults_to_moving() {
        let c = controller();
        assert_eq!(c.mode(), IntervalMode::Moving);
        assert_eq!(c.current_interval(), Duration::from_secs(70));
    }

    #[test]
    fn test_confident_still_switches_to_still_period() {
        let c = controller();
        assert!(c.on_activity_classified(ActivityKind::Still, 90));
        assert_eq!(c.current_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_below_floor_leaves_interval_unchanged() {
        let c = controller();
        c.on_activity_classified(ActivityKind::Still, 90);
        assert!(!c.on_activity_classified(ActivityKind::InVehicle, 59));
        assert_eq!(c.mode(), IntervalMode::Still);
    }

    #[test]
    fn test_vehicle_and_bicycle_switch_back_to_moving() {
        let c = controller();
        c.on_activity_classified(ActivityKind::Walking, 80);
        assert_eq!(c.mode(), IntervalMode::Still);
        c.on_activity_classified(ActivityKind::OnBicycle, 80);
        assert_eq!(c.mode(), IntervalMode::Moving);
        c.on_activity_classified(ActivityKind::Still, 80);
        c.on_activity_classified(ActivityKind::InVehicle, 61);
        assert_eq!(c.mode(), IntervalMode::Moving);
    }

    #[test]
    fn test_unknown_is_ignored() {
        let c = controller();
        c.on_activity_classified(ActivityKind::Still, 90);
        assert!(!c.on_activity_classified(ActivityKind::Unknown, 100));
        assert_eq!(c.mode(), IntervalMode::Still);
    }

    #[test]
    fn test_repeat_classification_reports_no_change() {
        let c = controller();
        assert!(!c.on_activity_classified(ActivityKind::InVehicle, 99));
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn test_classification_after_deactivate_is_noop() {
        let c = controller();
        c.deactivate();
        assert!(!c.on_activity_classified(ActivityKind::Still, 100));
        assert_eq!(c.mode(), IntervalMode::Moving);
    }

    #[test]
    fn test_reset_restores_moving_and_reactivates() {
        let c = controller();
        c.on_activity_classified(ActivityKind::Still, 100);
        c.deactivate();
        c.reset();
        assert!(c.is_active());
        assert_eq!(c.mode(), IntervalMode::Moving);
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    #[test]
    fn test_parse_line() {
        assert_eq!(
            ActivityEvent::parse_line("in_vehicle 82%").unwrap(),
            ActivityEvent::new(ActivityKind::InVehicle, 82)
        );
        assert!(ActivityEvent::parse_line("FLYING 10").is_err());
        assert!(ActivityEvent::parse_line("STILL").is_err());
        assert!(ActivityEvent::parse_line("").is_err());
    }

    #[test]
    fn test_kind_display_roundtrips_through_from_str() {
        for kind in [
            ActivityKind::Still,
            ActivityKind::Walking,
            ActivityKind::Running,
            ActivityKind::OnBicycle,
            ActivityKind::InVehicle,
            ActivityKind::Unknown,
        ] {
            assert_eq!(kind.to_string().parse::<ActivityKind>().unwrap(), kind);
        }
    }

    // -----------------------------------------------------------------------
    // Feed
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_channel_feed_delivers_to_subscriber() {
        let feed = ChannelFeed::new();
        assert_eq!(feed.publish(ActivityEvent::new(ActivityKind::Still, 90)), 0);
        let mut rx = feed.subscribe(Duration::from_secs(10));
        assert_eq!(feed.publish(ActivityEvent::new(ActivityKind::Still, 90)), 1);
        assert_eq!(rx.recv().await.unwrap().kind, ActivityKind::Still);
        drop(rx);
        assert_eq!(feed.subscriber_count(), 0);
    }
}
