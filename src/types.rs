//! Core data types for FieldLog-RS
//!
//! This module contains the data structures shared by the controller and its
//! collaborators: sensor readings and status, and the minimal experiment
//! model (experiments, trials, labels) the controller appends to.
//!
//! # Main Types
//!
//! - [`SensorReading`] - A single timestamped value from a sensor
//! - [`SensorStatus`] - Connection status reported by a sensor recorder
//! - [`SensorSpec`] - Display metadata for a sensor (name, units)
//! - [`Experiment`] / [`Trial`] - Containers the controller appends recordings to
//! - [`Label`] - Timestamped annotation (text, trigger note, snapshot)
//!
//! # Timestamps
//!
//! All timestamps are wall-clock milliseconds since the Unix epoch (`i64`),
//! matching what sensors report and what the controller clock returns.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single reading from a sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Timestamp of the reading in milliseconds
    pub timestamp_ms: i64,
    /// The measured value
    pub value: f64,
}

impl SensorReading {
    /// Create a new reading
    pub fn new(timestamp_ms: i64, value: f64) -> Self {
        Self {
            timestamp_ms,
            value,
        }
    }
}

/// Connection status reported by a sensor's data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SensorStatus {
    /// Recorder created but not yet reporting
    #[default]
    Initializing,
    /// Attempting to connect to the source
    Connecting,
    /// Connected and producing data
    Connected,
    /// Source is not connected
    Disconnected,
    /// Source reported an error
    Error,
}

impl SensorStatus {
    /// Check if the status means data can flow
    pub fn is_connected(&self) -> bool {
        matches!(self, SensorStatus::Connected)
    }
}

impl std::fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorStatus::Initializing => write!(f, "Initializing"),
            SensorStatus::Connecting => write!(f, "Connecting..."),
            SensorStatus::Connected => write!(f, "Connected"),
            SensorStatus::Disconnected => write!(f, "Disconnected"),
            SensorStatus::Error => write!(f, "Error"),
        }
    }
}

/// Display metadata for a sensor, resolved by the appearance provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSpec {
    /// Sensor identifier
    pub sensor_id: String,
    /// Human readable name
    pub name: String,
    /// Units label (e.g. "m/s²")
    pub units: String,
    /// Number of decimal places to show
    pub precision: usize,
}

impl SensorSpec {
    /// Create a spec with no units and two decimal places
    pub fn new(sensor_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            name: name.into(),
            units: String::new(),
            precision: 2,
        }
    }

    /// Set the units label
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = units.into();
        self
    }

    /// Set the display precision
    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }

    /// Fallback spec when no appearance is known
    pub fn unknown(sensor_id: &str) -> Self {
        Self::new(sensor_id, sensor_id)
    }
}

/// Recorder-specific options (sample rate, filter, ...), passed through opaquely
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorOptions {
    /// Key/value pairs understood by the recorder
    pub values: HashMap<String, String>,
}

impl SensorOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an option
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Look up an option
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Check if there are no options
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// How a sensor is laid out in the experiment when a trial is recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorLayout {
    /// Sensor shown in this slot
    pub sensor_id: String,
    /// Triggers active for this sensor
    pub active_trigger_ids: Vec<String>,
}

impl SensorLayout {
    /// Layout for a sensor with no active triggers
    pub fn new(sensor_id: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            active_trigger_ids: Vec::new(),
        }
    }
}

/// Latest value of one sensor captured in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// Sensor identifier
    pub sensor_id: String,
    /// Display metadata at capture time
    pub spec: SensorSpec,
    /// Timestamp of the cached reading
    pub timestamp_ms: i64,
    /// Cached value
    pub value: f64,
}

/// Point-in-time capture of several sensors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotValue {
    /// One entry per sensor that had a cached value, in request order
    pub snapshots: Vec<SensorSnapshot>,
}

impl SnapshotValue {
    /// Number of sensors captured
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Check if nothing was captured
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Find the entry for a sensor
    pub fn get(&self, sensor_id: &str) -> Option<&SensorSnapshot> {
        self.snapshots.iter().find(|s| s.sensor_id == sensor_id)
    }
}

/// Information carried by a label created by a Note trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerNoteValue {
    /// Trigger that fired
    pub trigger_id: String,
    /// Sensor the trigger watches
    pub sensor_id: String,
    /// Sensor display metadata at firing time
    pub sensor_spec: SensorSpec,
    /// Human readable condition (e.g. "rises above 10")
    pub condition: String,
    /// Value that fired the trigger
    pub value: f64,
    /// Optional caption configured on the trigger
    pub note_text: Option<String>,
}

/// Content of a label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LabelKind {
    /// Free text entered by the user
    Text(String),
    /// Note produced by a trigger
    TriggerNote(TriggerNoteValue),
    /// Snapshot of sensor values
    Snapshot(SnapshotValue),
}

/// A timestamped annotation on a trial or experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    /// Unique label id
    pub label_id: String,
    /// Time the label refers to
    pub timestamp_ms: i64,
    /// Time the label was created
    pub created_ms: i64,
    /// Label content
    pub kind: LabelKind,
}

impl Label {
    /// Create a label with a fresh id
    pub fn new(timestamp_ms: i64, created_ms: i64, kind: LabelKind) -> Self {
        Self {
            label_id: uuid::Uuid::new_v4().to_string(),
            timestamp_ms,
            created_ms,
            kind,
        }
    }
}

/// A single bounded recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Unique trial id
    pub trial_id: String,
    /// When the trial object was created
    pub creation_time_ms: i64,
    /// Start of the recording
    pub recording_start_ms: i64,
    /// End of the recording, set when the trial is finalized
    pub recording_end_ms: Option<i64>,
    /// Sensor layouts at start, replaced with the final layouts at stop
    pub sensor_layouts: Vec<SensorLayout>,
    /// Labels added while this trial was recording
    pub labels: Vec<Label>,
    /// 1-based index of this trial within the experiment
    pub auto_index: usize,
}

impl Trial {
    /// Create a new trial starting at `creation_time_ms`
    pub fn new(
        trial_id: impl Into<String>,
        creation_time_ms: i64,
        sensor_layouts: Vec<SensorLayout>,
        auto_index: usize,
    ) -> Self {
        Self {
            trial_id: trial_id.into(),
            creation_time_ms,
            recording_start_ms: creation_time_ms,
            recording_end_ms: None,
            sensor_layouts,
            labels: Vec::new(),
            auto_index,
        }
    }

    /// Finalize the trial with its end time and final layouts
    pub fn finalize(&mut self, end_ms: i64, sensor_layouts: Vec<SensorLayout>) {
        self.recording_end_ms = Some(end_ms);
        self.sensor_layouts = sensor_layouts;
    }

    /// Check if the trial has been finalized
    pub fn is_finalized(&self) -> bool {
        self.recording_end_ms.is_some()
    }

    /// Recording duration, if finalized
    pub fn duration_ms(&self) -> Option<i64> {
        self.recording_end_ms
            .map(|end| end - self.recording_start_ms)
    }
}

/// Top-level container of trials and labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    /// Unique experiment id
    pub experiment_id: String,
    /// User-facing title (may be empty)
    pub title: String,
    /// Recorded trials, oldest first
    pub trials: Vec<Trial>,
    /// Labels added while not recording
    pub labels: Vec<Label>,
}

impl Experiment {
    /// Create an empty experiment
    pub fn new(experiment_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            title: title.into(),
            trials: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Name shown to the user
    pub fn display_name(&self) -> String {
        if self.title.trim().is_empty() {
            String::from("Untitled Experiment")
        } else {
            self.title.clone()
        }
    }

    /// Find a trial by id
    pub fn trial(&self, trial_id: &str) -> Option<&Trial> {
        self.trials.iter().find(|t| t.trial_id == trial_id)
    }

    /// Find a trial by id (mutable)
    pub fn trial_mut(&mut self, trial_id: &str) -> Option<&mut Trial> {
        self.trials.iter_mut().find(|t| t.trial_id == trial_id)
    }

    /// Remove a trial, returning it
    pub fn remove_trial(&mut self, trial_id: &str) -> Option<Trial> {
        let idx = self.trials.iter().position(|t| t.trial_id == trial_id)?;
        Some(self.trials.remove(idx))
    }

    /// Index the next trial will get
    pub fn next_trial_index(&self) -> usize {
        self.trials.len() + 1
    }
}
