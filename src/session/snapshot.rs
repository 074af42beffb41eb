//! Latest-value cache and snapshots
//!
//! Snapshots never wait for a live reading. They only read what the cache
//! already holds, so sensors without a cached value are left out.

use crate::types::{SensorReading, SensorSnapshot, SensorSpec, SnapshotValue};
use std::collections::HashMap;

/// Most recent reading per sensor
#[derive(Debug, Default)]
pub struct LatestValueCache {
    entries: HashMap<String, Option<SensorReading>>,
}

impl LatestValueCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a sensor (keeps an existing value)
    pub fn track(&mut self, sensor_id: &str) {
        self.entries.entry(sensor_id.to_string()).or_insert(None);
    }

    /// Stop tracking a sensor
    pub fn remove(&mut self, sensor_id: &str) {
        self.entries.remove(sensor_id);
    }

    /// Store a reading for a tracked sensor
    pub fn update(&mut self, sensor_id: &str, reading: SensorReading) {
        if let Some(slot) = self.entries.get_mut(sensor_id) {
            *slot = Some(reading);
        }
    }

    /// Latest reading of a sensor
    pub fn get(&self, sensor_id: &str) -> Option<SensorReading> {
        self.entries.get(sensor_id).copied().flatten()
    }
}

/// Build a snapshot of the requested sensors from the cache
///
/// Entries keep the request order; sensors with no cached value are skipped.
pub fn generate_snapshot_label_value<F>(
    cache: &LatestValueCache,
    sensor_ids: &[String],
    mut spec_for: F,
) -> SnapshotValue
where
    F: FnMut(&str) -> SensorSpec,
{
    let snapshots = sensor_ids
        .iter()
        .filter_map(|sensor_id| {
            cache.get(sensor_id).map(|reading| SensorSnapshot {
                sensor_id: sensor_id.clone(),
                spec: spec_for(sensor_id),
                timestamp_ms: reading.timestamp_ms,
                value: reading.value,
            })
        })
        .collect();
    SnapshotValue { snapshots }
}

/// Render a snapshot as one `name: value units` line per sensor
pub fn format_snapshot(snapshot: &SnapshotValue) -> String {
    snapshot
        .snapshots
        .iter()
        .map(|s| {
            let value = format!("{:.*}", s.spec.precision, s.value);
            if s.spec.units.is_empty() {
                format!("{}: {}", s.spec.name, value)
            } else {
                format!("{}: {} {}", s.spec.name, value, s.spec.units)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_untracked_sensor_is_not_cached() {
        let mut cache = LatestValueCache::new();
        cache.update("s1", SensorReading::new(1, 1.0));
        assert_eq!(cache.get("s1"), None);

        cache.track("s1");
        cache.update("s1", SensorReading::new(2, 2.0));
        cache.track("s1");
        assert_eq!(cache.get("s1"), Some(SensorReading::new(2, 2.0)));
    }

    #[test]
    fn test_snapshot_omits_missing_values() {
        let mut cache = LatestValueCache::new();
        cache.track("s1");
        cache.track("s2");
        cache.update("s1", SensorReading::new(10, 1.5));

        let snapshot = generate_snapshot_label_value(&cache, &ids(&["s1", "s2", "s3"]), SensorSpec::unknown);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.snapshots[0].sensor_id, "s1");
        assert_eq!(snapshot.snapshots[0].timestamp_ms, 10);
    }

    #[test]
    fn test_format_snapshot() {
        let snapshot = SnapshotValue {
            snapshots: vec![
                SensorSnapshot {
                    sensor_id: "s1".to_string(),
                    spec: SensorSpec::new("s1", "Light").with_units("lx").with_precision(1),
                    timestamp_ms: 0,
                    value: 12.345,
                },
                SensorSnapshot {
                    sensor_id: "s2".to_string(),
                    spec: SensorSpec::new("s2", "Count").with_precision(0),
                    timestamp_ms: 0,
                    value: 3.0,
                },
            ],
        };
        assert_eq!(format_snapshot(&snapshot), "Light: 12.3 lx\nCount: 3");
        assert_eq!(format_snapshot(&SnapshotValue::default()), "");
    }
}
