//! External collaborators of the recording controller
//!
//! Everything the controller depends on but does not own lives behind a
//! trait here so hosts and tests can substitute their own implementations.
//!
//! # Components
//!
//! - [`PersistenceService`] - Asynchronous experiment storage
//! - [`AppearanceProvider`] - Display metadata for sensors
//! - [`UsageTracker`] - Receives a usage record for every completed recording
//! - [`Clock`] - Wall-clock time used for trial timestamps
//! - [`Collaborators`] - Bundle handed to the controller at construction

pub mod persistence;

pub use persistence::{InMemoryPersistence, PersistCallback, PersistenceService};

use crate::sensors::SensorRegistry;
use crate::triggers::{AlertSink, LoggingAlertSink};
use crate::types::{SensorLayout, SensorSpec};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

// ==================== Clock ====================

/// Source of wall-clock time in milliseconds
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> i64;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// Create a clock reading `now_ms`
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now_ms)),
        }
    }

    /// Set the current time
    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    /// Move the clock forward
    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ==================== Appearance ====================

/// Resolves display metadata for sensor ids
pub trait AppearanceProvider: Send {
    /// Spec for a sensor, if known
    fn spec_for(&self, sensor_id: &str) -> Option<SensorSpec>;
}

/// Appearance provider with a fixed table of specs
#[derive(Debug, Default, Clone)]
pub struct StaticAppearance {
    specs: HashMap<String, SensorSpec>,
}

impl StaticAppearance {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a spec
    pub fn with_spec(mut self, spec: SensorSpec) -> Self {
        self.specs.insert(spec.sensor_id.clone(), spec);
        self
    }
}

impl AppearanceProvider for StaticAppearance {
    fn spec_for(&self, sensor_id: &str) -> Option<SensorSpec> {
        self.specs.get(sensor_id).cloned()
    }
}

// ==================== Usage ====================

/// Summary of a completed recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    /// Trial that was recorded
    pub trial_id: String,
    /// Sensors that recorded into the trial
    pub sensor_ids: Vec<String>,
    /// Number of sensor layouts in the trial
    pub layout_count: usize,
    /// Number of active triggers across the layouts
    pub active_trigger_count: usize,
}

impl UsageRecord {
    /// Build a record from the recording sensors and final layouts
    pub fn new(trial_id: &str, sensor_ids: Vec<String>, layouts: &[SensorLayout]) -> Self {
        Self {
            trial_id: trial_id.to_string(),
            sensor_ids,
            layout_count: layouts.len(),
            active_trigger_count: layouts.iter().map(|l| l.active_trigger_ids.len()).sum(),
        }
    }
}

/// Receives usage records
pub trait UsageTracker: Send {
    /// Called once per successfully stopped recording
    fn track_recording(&mut self, record: &UsageRecord);
}

/// Usage tracker that logs records
#[derive(Debug, Default)]
pub struct LoggingUsageTracker;

impl UsageTracker for LoggingUsageTracker {
    fn track_recording(&mut self, record: &UsageRecord) {
        tracing::info!(
            trial_id = %record.trial_id,
            sensors = ?record.sensor_ids,
            layouts = record.layout_count,
            "Recording completed"
        );
    }
}

/// Usage tracker that keeps records in memory
#[derive(Debug, Default, Clone)]
pub struct CollectingUsageTracker {
    records: Arc<Mutex<Vec<UsageRecord>>>,
}

impl CollectingUsageTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Records collected so far
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().clone()
    }
}

impl UsageTracker for CollectingUsageTracker {
    fn track_recording(&mut self, record: &UsageRecord) {
        self.records.lock().push(record.clone());
    }
}

// ==================== Collaborators ====================

/// Everything the controller needs from the outside world
pub struct Collaborators {
    /// Resolves sensor ids to recorders
    pub sensor_registry: Box<dyn SensorRegistry>,
    /// Experiment storage
    pub persistence: Arc<dyn PersistenceService>,
    /// Display metadata for labels
    pub appearance: Box<dyn AppearanceProvider>,
    /// Vibration and sound
    pub alerts: Box<dyn AlertSink>,
    /// Usage records
    pub usage: Box<dyn UsageTracker>,
    /// Time source for trials and labels
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Collaborators with logging alerts and usage, no appearance table and
    /// the system clock
    pub fn new(
        sensor_registry: Box<dyn SensorRegistry>,
        persistence: Arc<dyn PersistenceService>,
    ) -> Self {
        Self {
            sensor_registry,
            persistence,
            appearance: Box::new(StaticAppearance::new()),
            alerts: Box::new(LoggingAlertSink),
            usage: Box::new(LoggingUsageTracker),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the appearance provider
    pub fn with_appearance(mut self, appearance: impl AppearanceProvider + 'static) -> Self {
        self.appearance = Box::new(appearance);
        self
    }

    /// Replace the alert sink
    pub fn with_alerts(mut self, alerts: impl AlertSink + 'static) -> Self {
        self.alerts = Box::new(alerts);
        self
    }

    /// Replace the usage tracker
    pub fn with_usage(mut self, usage: impl UsageTracker + 'static) -> Self {
        self.usage = Box::new(usage);
        self
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        let shared = clock.clone();
        shared.advance(250);
        assert_eq!(clock.now_ms(), 1_250);
        clock.set(5);
        assert_eq!(shared.now_ms(), 5);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn test_usage_record_summary() {
        let mut layout = SensorLayout::new("s1");
        layout.active_trigger_ids = vec!["t1".to_string(), "t2".to_string()];
        let record = UsageRecord::new("trial", vec!["s1".to_string()], &[layout, SensorLayout::new("s2")]);
        assert_eq!(record.layout_count, 2);
        assert_eq!(record.active_trigger_count, 2);
    }

    #[test]
    fn test_static_appearance() {
        let appearance = StaticAppearance::new().with_spec(SensorSpec::new("s1", "Light").with_units("lx"));
        assert_eq!(appearance.spec_for("s1").map(|s| s.units), Some("lx".to_string()));
        assert!(appearance.spec_for("s2").is_none());
    }
}
