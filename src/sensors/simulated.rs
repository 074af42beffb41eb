//! Simulated sensors for testing and demos
//!
//! This module provides a [`SensorRegistry`] whose recorders either generate
//! data from a signal pattern on a background thread, or are driven by hand
//! through a [`ManualSensorHandle`].
//!
//! # Signal Patterns
//!
//! - [`SignalPattern::Constant`] - Fixed value
//! - [`SignalPattern::Sine`] - Sinusoidal wave with configurable frequency/amplitude
//! - [`SignalPattern::Counter`] - Incrementing counter with wrap-around
//! - [`SignalPattern::Random`] - Random values within a range
//! - [`SignalPattern::Sawtooth`] - Linear ramp that resets periodically
//! - [`SignalPattern::Square`] - Square wave alternating between two values
//!
//! # Example
//!
//! ```ignore
//! use fieldlog_rs::sensors::{SimulatedSensorRegistry, SignalPattern};
//! use fieldlog_rs::types::SensorSpec;
//!
//! let mut registry = SimulatedSensorRegistry::new();
//! let handle = registry.add_manual(SensorSpec::new("s1", "Manual"));
//! registry.add_pattern(SensorSpec::new("s2", "Sine"), SignalPattern::default(), 50);
//!
//! // later, once "s1" is being observed:
//! handle.emit(100, 1.0);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{ReadingSink, SensorRecorder, SensorRegistry};
use crate::error::{FieldLogError, Result};
use crate::types::{SensorOptions, SensorSpec, SensorStatus};

/// Pattern for generating simulated data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SignalPattern {
    /// Constant value
    Constant(f64),
    /// Sine wave with frequency and amplitude
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Counter that increments
    Counter { step: f64, min: f64, max: f64 },
    /// Random values within range
    Random { min: f64, max: f64 },
    /// Sawtooth wave
    Sawtooth { period: f64, amplitude: f64 },
    /// Square wave
    Square { period: f64, amplitude: f64 },
}

impl Default for SignalPattern {
    fn default() -> Self {
        SignalPattern::Sine {
            frequency: 1.0,
            amplitude: 10.0,
            offset: 0.0,
        }
    }
}

/// Stateful generator for a pattern
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    pattern: SignalPattern,
    counter_value: f64,
    seed: u64,
}

impl SignalGenerator {
    /// Create a generator for a pattern
    pub fn new(pattern: SignalPattern) -> Self {
        let counter_value = match pattern {
            SignalPattern::Counter { min, .. } => min,
            _ => 0.0,
        };
        Self {
            pattern,
            counter_value,
            seed: 0x2545_F491_4F6C_DD1D,
        }
    }

    /// Generate a value for the elapsed time
    pub fn next_value(&mut self, elapsed_secs: f64) -> f64 {
        match self.pattern {
            SignalPattern::Constant(v) => v,
            SignalPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * std::f64::consts::PI * frequency * elapsed_secs).sin(),
            SignalPattern::Counter { step, min, max } => {
                let value = self.counter_value;
                self.counter_value += step;
                if self.counter_value > max {
                    self.counter_value = min;
                } else if self.counter_value < min {
                    self.counter_value = max;
                }
                value
            }
            SignalPattern::Random { min, max } => min + self.next_random() * (max - min),
            SignalPattern::Sawtooth { period, amplitude } => {
                let t = elapsed_secs % period;
                amplitude * (t / period)
            }
            SignalPattern::Square { period, amplitude } => {
                let t = elapsed_secs % period;
                if t < period / 2.0 {
                    amplitude
                } else {
                    -amplitude
                }
            }
        }
    }

    /// xorshift64, good enough for test signals
    fn next_random(&mut self) -> f64 {
        let mut s = self.seed;
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        self.seed = s;
        (s as f64) / (u64::MAX as f64)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ==================== Manual sensors ====================

#[derive(Debug, Default)]
struct ManualState {
    sink: Option<ReadingSink>,
    observing: bool,
    recording_trial: Option<String>,
    report_connected: bool,
    fail_reboot: bool,
    start_observing_calls: usize,
    stop_observing_calls: usize,
    start_recording_calls: usize,
    stop_recording_calls: usize,
    reboots: usize,
    last_options: Option<SensorOptions>,
}

/// Test-side handle for a manually driven sensor
///
/// Clones share state with the recorder the registry hands out.
#[derive(Debug, Clone)]
pub struct ManualSensorHandle {
    sensor_id: String,
    state: Arc<Mutex<ManualState>>,
}

impl ManualSensorHandle {
    fn new(sensor_id: &str) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            state: Arc::new(Mutex::new(ManualState {
                report_connected: true,
                ..Default::default()
            })),
        }
    }

    /// Sensor id of this handle
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Push a reading if the sensor is being observed
    pub fn emit(&self, timestamp_ms: i64, value: f64) -> bool {
        let sink = {
            let state = self.state.lock();
            state.sink.clone().filter(|_| state.observing)
        };
        sink.map(|sink| sink.push(timestamp_ms, value))
            .unwrap_or(false)
    }

    /// Report a status change through the current sink
    pub fn report_status(&self, status: SensorStatus) -> bool {
        self.current_sink()
            .map(|sink| sink.report_status(status))
            .unwrap_or(false)
    }

    /// Report a source error through the current sink
    pub fn report_error(&self, message: &str) -> bool {
        self.current_sink()
            .map(|sink| sink.report_error(message))
            .unwrap_or(false)
    }

    fn current_sink(&self) -> Option<ReadingSink> {
        self.state.lock().sink.clone()
    }

    /// Whether the recorder reports `Connected` when observation starts
    pub fn set_report_connected(&self, connected: bool) {
        self.state.lock().report_connected = connected;
    }

    /// Make the next reboots fail
    pub fn set_fail_reboot(&self, fail: bool) {
        self.state.lock().fail_reboot = fail;
    }

    /// Whether the recorder is currently observing
    pub fn is_observing(&self) -> bool {
        self.state.lock().observing
    }

    /// Trial the recorder is recording into, if any
    pub fn recording_trial(&self) -> Option<String> {
        self.state.lock().recording_trial.clone()
    }

    /// Number of `start_observing` calls
    pub fn start_observing_calls(&self) -> usize {
        self.state.lock().start_observing_calls
    }

    /// Number of `stop_observing` calls
    pub fn stop_observing_calls(&self) -> usize {
        self.state.lock().stop_observing_calls
    }

    /// Number of `start_recording` calls
    pub fn start_recording_calls(&self) -> usize {
        self.state.lock().start_recording_calls
    }

    /// Number of `stop_recording` calls
    pub fn stop_recording_calls(&self) -> usize {
        self.state.lock().stop_recording_calls
    }

    /// Number of reboots
    pub fn reboots(&self) -> usize {
        self.state.lock().reboots
    }

    /// Options last applied to the recorder
    pub fn last_options(&self) -> Option<SensorOptions> {
        self.state.lock().last_options.clone()
    }
}

struct ManualRecorder {
    handle: ManualSensorHandle,
}

impl SensorRecorder for ManualRecorder {
    fn start_observing(&mut self, sink: ReadingSink) -> Result<()> {
        let mut state = self.handle.state.lock();
        state.start_observing_calls += 1;
        state.observing = true;
        if state.report_connected {
            sink.report_status(SensorStatus::Connected);
        }
        state.sink = Some(sink);
        Ok(())
    }

    fn stop_observing(&mut self) {
        let mut state = self.handle.state.lock();
        state.stop_observing_calls += 1;
        state.observing = false;
    }

    fn start_recording(&mut self, trial_id: &str) {
        let mut state = self.handle.state.lock();
        state.start_recording_calls += 1;
        state.recording_trial = Some(trial_id.to_string());
    }

    fn stop_recording(&mut self) {
        let mut state = self.handle.state.lock();
        state.stop_recording_calls += 1;
        state.recording_trial = None;
    }

    fn reboot(&mut self) -> Result<()> {
        let mut state = self.handle.state.lock();
        state.reboots += 1;
        if state.fail_reboot {
            return Err(FieldLogError::sensor(&self.handle.sensor_id, "reboot failed"));
        }
        if let Some(sink) = &state.sink {
            sink.report_status(SensorStatus::Connected);
        }
        Ok(())
    }

    fn apply_options(&mut self, options: &SensorOptions) {
        self.handle.state.lock().last_options = Some(options.clone());
    }
}

// ==================== Pattern sensors ====================

/// Recorder that produces a signal on a background thread
struct PatternRecorder {
    sensor_id: String,
    pattern: SignalPattern,
    rate_hz: u32,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    sink: Option<ReadingSink>,
}

impl PatternRecorder {
    fn new(sensor_id: &str, pattern: SignalPattern, rate_hz: u32) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            pattern,
            rate_hz: rate_hz.max(1),
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
            sink: None,
        }
    }

    fn spawn(&mut self, sink: ReadingSink) {
        let running = Arc::new(AtomicBool::new(true));
        self.running = running.clone();

        let interval = Duration::from_micros(1_000_000 / self.rate_hz as u64);
        let mut generator = SignalGenerator::new(self.pattern);
        let sensor_id = self.sensor_id.clone();

        self.thread = Some(std::thread::spawn(move || {
            tracing::debug!("Simulated sensor '{}' producing at {:?}", sensor_id, interval);
            let start = Instant::now();
            while running.load(Ordering::SeqCst) {
                let value = generator.next_value(start.elapsed().as_secs_f64());
                if !sink.push(now_ms(), value) {
                    break;
                }
                std::thread::sleep(interval);
            }
            tracing::debug!("Simulated sensor '{}' stopped", sensor_id);
        }));
    }

    fn halt(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl SensorRecorder for PatternRecorder {
    fn start_observing(&mut self, sink: ReadingSink) -> Result<()> {
        self.halt();
        sink.report_status(SensorStatus::Connected);
        self.sink = Some(sink.clone());
        self.spawn(sink);
        Ok(())
    }

    fn stop_observing(&mut self) {
        self.halt();
    }

    fn start_recording(&mut self, trial_id: &str) {
        tracing::debug!("Simulated sensor '{}' recording into {}", self.sensor_id, trial_id);
    }

    fn stop_recording(&mut self) {
        tracing::debug!("Simulated sensor '{}' stopped recording", self.sensor_id);
    }

    fn reboot(&mut self) -> Result<()> {
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| FieldLogError::sensor(&self.sensor_id, "not observing"))?;
        self.halt();
        sink.report_status(SensorStatus::Connected);
        self.spawn(sink);
        Ok(())
    }

    fn apply_options(&mut self, options: &SensorOptions) {
        if let Some(rate) = options.get("rate_hz").and_then(|r| r.parse::<u32>().ok()) {
            self.rate_hz = rate.max(1);
        }
    }
}

impl Drop for PatternRecorder {
    fn drop(&mut self) {
        self.halt();
    }
}

// ==================== Registry ====================

enum SimulatedSource {
    Manual(ManualSensorHandle),
    Pattern { pattern: SignalPattern, rate_hz: u32 },
}

struct SimulatedSensor {
    spec: SensorSpec,
    source: SimulatedSource,
    fail_creation: bool,
}

/// Registry of simulated sensors
#[derive(Default)]
pub struct SimulatedSensorRegistry {
    sensors: HashMap<String, SimulatedSensor>,
    created: Arc<Mutex<Vec<String>>>,
}

impl SimulatedSensorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a manually driven sensor and return its handle
    pub fn add_manual(&mut self, spec: SensorSpec) -> ManualSensorHandle {
        let handle = ManualSensorHandle::new(&spec.sensor_id);
        self.sensors.insert(
            spec.sensor_id.clone(),
            SimulatedSensor {
                spec,
                source: SimulatedSource::Manual(handle.clone()),
                fail_creation: false,
            },
        );
        handle
    }

    /// Register a pattern-driven sensor
    pub fn add_pattern(&mut self, spec: SensorSpec, pattern: SignalPattern, rate_hz: u32) {
        self.sensors.insert(
            spec.sensor_id.clone(),
            SimulatedSensor {
                spec,
                source: SimulatedSource::Pattern { pattern, rate_hz },
                fail_creation: false,
            },
        );
    }

    /// Make recorder creation fail for a sensor
    pub fn set_fail_creation(&mut self, sensor_id: &str, fail: bool) {
        if let Some(sensor) = self.sensors.get_mut(sensor_id) {
            sensor.fail_creation = fail;
        }
    }

    /// Shared log of sensor ids recorders were created for
    pub fn creation_log(&self) -> Arc<Mutex<Vec<String>>> {
        self.created.clone()
    }
}

impl SensorRegistry for SimulatedSensorRegistry {
    fn create_recorder(&mut self, sensor_id: &str) -> Result<Box<dyn SensorRecorder>> {
        let sensor = self
            .sensors
            .get(sensor_id)
            .ok_or_else(|| FieldLogError::sensor(sensor_id, "unknown sensor"))?;

        if sensor.fail_creation {
            return Err(FieldLogError::sensor(sensor_id, "recorder creation failed"));
        }

        self.created.lock().push(sensor_id.to_string());

        Ok(match &sensor.source {
            SimulatedSource::Manual(handle) => Box::new(ManualRecorder {
                handle: handle.clone(),
            }),
            SimulatedSource::Pattern { pattern, rate_hz } => {
                Box::new(PatternRecorder::new(sensor_id, *pattern, *rate_hz))
            }
        })
    }

    fn spec_for_id(&self, sensor_id: &str) -> Option<SensorSpec> {
        self.sensors.get(sensor_id).map(|s| s.spec.clone())
    }
}
