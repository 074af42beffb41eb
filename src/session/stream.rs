//! Per-sensor stream table
//!
//! A [`SensorStream`] owns the recorder of one sensor id along with its
//! trigger list, the previous value used by edge triggers and the number
//! of points recorded into the current trial. The [`StreamTable`] owns all
//! streams and hands out generation numbers so that events from a sink of
//! an earlier incarnation of a stream can be recognized and dropped.

use crate::error::{FieldLogError, Result};
use crate::sensors::{ReadingSink, SensorRecorder};
use crate::triggers::Trigger;
use crate::types::SensorOptions;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Stand-in recorder for a sensor the registry could not provide
///
/// The stream exists so the sensor counts as observed but disconnected;
/// a reboot asks the registry again.
pub(crate) struct UnavailableRecorder {
    sensor_id: String,
    reason: String,
}

impl UnavailableRecorder {
    pub(crate) fn new(sensor_id: &str, reason: String) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            reason,
        }
    }
}

impl SensorRecorder for UnavailableRecorder {
    fn start_observing(&mut self, _sink: ReadingSink) -> Result<()> {
        Err(FieldLogError::sensor(&self.sensor_id, self.reason.clone()))
    }

    fn stop_observing(&mut self) {}

    fn start_recording(&mut self, _trial_id: &str) {}

    fn stop_recording(&mut self) {}

    fn reboot(&mut self) -> Result<()> {
        Err(FieldLogError::sensor(&self.sensor_id, self.reason.clone()))
    }

    fn apply_options(&mut self, _options: &SensorOptions) {}
}

/// Live state of one sensor id
pub struct SensorStream {
    sensor_id: String,
    recorder: Box<dyn SensorRecorder>,
    available: bool,
    generation: u64,
    observing: bool,
    recording: bool,
    recorded_points: usize,
    triggers: Vec<Trigger>,
    previous_value: Option<f64>,
    stop_deadline: Option<Instant>,
}

impl SensorStream {
    /// Wrap a recorder
    pub fn new(sensor_id: &str, recorder: Box<dyn SensorRecorder>) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            recorder,
            available: true,
            generation: 0,
            observing: false,
            recording: false,
            recorded_points: 0,
            triggers: Vec::new(),
            previous_value: None,
            stop_deadline: None,
        }
    }

    /// Stream for a sensor whose recorder could not be created
    pub(crate) fn unavailable(sensor_id: &str, reason: String) -> Self {
        let mut stream = Self::new(sensor_id, Box::new(UnavailableRecorder::new(sensor_id, reason)));
        stream.available = false;
        stream
    }

    /// Sensor id
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Whether a real recorder backs this stream
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Swap in a recorder obtained after the stream was created
    pub(crate) fn replace_recorder(&mut self, recorder: Box<dyn SensorRecorder>) {
        self.recorder = recorder;
        self.available = true;
        self.observing = false;
    }

    /// Generation of the current sink
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the recorder is producing readings
    pub fn is_observing(&self) -> bool {
        self.observing
    }

    /// Whether the recorder is recording into a trial
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Points received since recording started
    pub fn recorded_points(&self) -> usize {
        self.recorded_points
    }

    /// Active triggers
    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    /// Replace the active triggers
    pub fn set_triggers(&mut self, triggers: Vec<Trigger>) {
        self.triggers = triggers;
    }

    /// Start the recorder with a sink of generation `generation`
    ///
    /// The stream counts as observing even when the recorder fails, so the
    /// failure shows up as a disconnected sensor rather than a missing one.
    pub fn start_observing(&mut self, sink: ReadingSink, generation: u64) -> Result<()> {
        self.generation = generation;
        self.observing = true;
        self.stop_deadline = None;
        self.previous_value = None;
        self.recorder.start_observing(sink)
    }

    /// Stop the recorder
    pub fn stop_observing(&mut self) {
        if self.observing {
            self.recorder.stop_observing();
            self.observing = false;
        }
        self.stop_deadline = None;
    }

    /// Start recording into a trial
    pub fn start_recording(&mut self, trial_id: &str) {
        self.recorded_points = 0;
        self.recording = true;
        self.recorder.start_recording(trial_id);
    }

    /// Stop recording
    pub fn stop_recording(&mut self) {
        if self.recording {
            self.recorder.stop_recording();
            self.recording = false;
        }
    }

    /// Ask the recorder to reconnect
    pub fn reboot(&mut self) -> Result<()> {
        self.recorder.reboot()
    }

    /// Forward recorder options
    pub fn apply_options(&mut self, options: &SensorOptions) {
        self.recorder.apply_options(options);
    }

    /// Account for a new value; returns the previous one
    pub fn record_value(&mut self, value: f64) -> Option<f64> {
        if self.recording {
            self.recorded_points += 1;
        }
        self.previous_value.replace(value)
    }

    /// Schedule the physical stop
    pub fn schedule_stop(&mut self, deadline: Instant) {
        self.stop_deadline = Some(deadline);
    }

    /// Cancel a scheduled stop
    pub fn cancel_stop(&mut self) -> bool {
        self.stop_deadline.take().is_some()
    }

    /// Whether a stop is scheduled
    pub fn has_pending_stop(&self) -> bool {
        self.stop_deadline.is_some()
    }

    fn stop_due(&self, now: Instant) -> bool {
        self.stop_deadline.is_some_and(|deadline| deadline <= now)
    }
}

/// All streams, keyed by sensor id
#[derive(Default)]
pub struct StreamTable {
    streams: HashMap<String, SensorStream>,
    next_generation: u64,
    stop_delay: Duration,
}

impl StreamTable {
    /// Create an empty table
    pub fn new(stop_delay: Duration) -> Self {
        Self {
            streams: HashMap::new(),
            next_generation: 0,
            stop_delay,
        }
    }

    /// Delay before an unobserved stream is stopped
    pub fn stop_delay(&self) -> Duration {
        self.stop_delay
    }

    /// Allocate a sink generation
    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Add a stream, replacing any previous one for the same id
    pub fn insert(&mut self, stream: SensorStream) {
        self.streams.insert(stream.sensor_id.clone(), stream);
    }

    /// Remove a stream, stopping its recorder
    pub fn remove(&mut self, sensor_id: &str) -> Option<SensorStream> {
        let mut stream = self.streams.remove(sensor_id)?;
        stream.stop_recording();
        stream.stop_observing();
        Some(stream)
    }

    /// Look up a stream
    pub fn get(&self, sensor_id: &str) -> Option<&SensorStream> {
        self.streams.get(sensor_id)
    }

    /// Look up a stream (mutable)
    pub fn get_mut(&mut self, sensor_id: &str) -> Option<&mut SensorStream> {
        self.streams.get_mut(sensor_id)
    }

    /// Whether a stream exists
    pub fn contains(&self, sensor_id: &str) -> bool {
        self.streams.contains_key(sensor_id)
    }

    /// Number of streams
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Iterate over streams (mutable)
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SensorStream> {
        self.streams.values_mut()
    }

    /// Sorted ids of observing streams
    pub fn observing_ids(&self) -> Vec<String> {
        self.sorted_ids(|s| s.observing)
    }

    /// Sorted ids of recording streams
    pub fn recording_ids(&self) -> Vec<String> {
        self.sorted_ids(|s| s.recording)
    }

    /// Sorted ids of every stream
    pub fn ids(&self) -> Vec<String> {
        self.sorted_ids(|_| true)
    }

    /// Sorted ids of streams whose scheduled stop is due
    pub fn due_stops(&self, now: Instant) -> Vec<String> {
        self.sorted_ids(|s| s.stop_due(now))
    }

    fn sorted_ids(&self, filter: impl Fn(&SensorStream) -> bool) -> Vec<String> {
        let mut ids: Vec<String> = self
            .streams
            .values()
            .filter(|s| filter(s))
            .map(|s| s.sensor_id.clone())
            .collect();
        ids.sort();
        ids
    }
}
