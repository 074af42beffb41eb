//! Sensor collaborator interfaces
//!
//! The controller never talks to hardware itself. It asks a [`SensorRegistry`]
//! for a [`SensorRecorder`] per sensor id and hands each recorder a
//! [`ReadingSink`] through which readings, status changes and source errors
//! flow back into the controller's command queue.
//!
//! # Components
//!
//! - [`SensorRegistry`] - Resolves sensor ids to recorders and display specs
//! - [`SensorRecorder`] - Lifecycle of one physical data source
//! - [`ReadingSink`] - Thread-safe handle a recorder pushes data into
//! - [`simulated`] - Manually driven and pattern driven recorders for tests and demos
//!
//! # Threading
//!
//! Recorder methods are invoked from the controller thread. Recorders may
//! produce data from any thread; the sink only enqueues, so a recorder that
//! pushes synchronously from inside `start_observing` does not re-enter the
//! controller.

pub mod simulated;

use crate::error::Result;
use crate::session::worker::RecorderCommand;
use crate::types::{SensorOptions, SensorReading, SensorSpec, SensorStatus};
use crossbeam_channel::Sender;

pub use simulated::{ManualSensorHandle, SignalPattern, SimulatedSensorRegistry};

/// Unified interface for a sensor data source
///
/// Implementations must be `Send` so they can be owned by the controller
/// thread.
pub trait SensorRecorder: Send {
    /// Begin producing readings into `sink`
    fn start_observing(&mut self, sink: ReadingSink) -> Result<()>;

    /// Stop producing readings
    fn stop_observing(&mut self);

    /// Begin recording readings for the given trial
    fn start_recording(&mut self, trial_id: &str);

    /// Stop recording (post-processing of the recorded data happens here)
    fn stop_recording(&mut self);

    /// Try to reconnect the underlying source
    fn reboot(&mut self) -> Result<()>;

    /// Apply recorder-specific options
    fn apply_options(&mut self, options: &SensorOptions);
}

/// Resolves sensor ids to recorders
pub trait SensorRegistry: Send {
    /// Create a recorder for a sensor id
    ///
    /// A failure means the sensor is treated as disconnected.
    fn create_recorder(&mut self, sensor_id: &str) -> Result<Box<dyn SensorRecorder>>;

    /// Display metadata for a sensor id, if known
    fn spec_for_id(&self, sensor_id: &str) -> Option<SensorSpec>;

    /// Registry-level connectivity check
    fn is_source_connected_without_error(&self, _sensor_id: &str) -> bool {
        true
    }
}

/// What a recorder reported
#[derive(Debug, Clone, PartialEq)]
pub enum SensorEventKind {
    /// New reading
    Reading(SensorReading),
    /// Connection status changed
    Status(SensorStatus),
    /// Source raised an error
    Error(String),
}

/// An event from a recorder, tagged with its stream incarnation
#[derive(Debug, Clone, PartialEq)]
pub struct SensorEvent {
    /// Sensor that produced the event
    pub sensor_id: String,
    /// Incarnation of the stream the sink was created for
    pub generation: u64,
    /// Event payload
    pub kind: SensorEventKind,
}

/// Handle a recorder uses to push data back to the controller
///
/// Events from a sink whose stream has since been destroyed and recreated
/// are dropped by the controller (the generation no longer matches).
#[derive(Debug, Clone)]
pub struct ReadingSink {
    sensor_id: String,
    generation: u64,
    sender: Sender<RecorderCommand>,
}

impl ReadingSink {
    pub(crate) fn new(sensor_id: impl Into<String>, generation: u64, sender: Sender<RecorderCommand>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            generation,
            sender,
        }
    }

    /// Sensor this sink belongs to
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    /// Push a reading. Returns false once the controller is gone.
    pub fn push(&self, timestamp_ms: i64, value: f64) -> bool {
        self.send(SensorEventKind::Reading(SensorReading::new(timestamp_ms, value)))
    }

    /// Report a connection status change
    pub fn report_status(&self, status: SensorStatus) -> bool {
        self.send(SensorEventKind::Status(status))
    }

    /// Report a data source error
    pub fn report_error(&self, message: impl Into<String>) -> bool {
        self.send(SensorEventKind::Error(message.into()))
    }

    fn send(&self, kind: SensorEventKind) -> bool {
        self.sender
            .send(RecorderCommand::Sensor(SensorEvent {
                sensor_id: self.sensor_id.clone(),
                generation: self.generation,
                kind,
            }))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_sink_tags_events() {
        let (tx, rx) = unbounded();
        let sink = ReadingSink::new("s1", 7, tx);

        assert!(sink.push(100, 1.5));
        assert!(sink.report_status(SensorStatus::Connected));

        match rx.try_recv().unwrap() {
            RecorderCommand::Sensor(event) => {
                assert_eq!(event.sensor_id, "s1");
                assert_eq!(event.generation, 7);
                assert_eq!(
                    event.kind,
                    SensorEventKind::Reading(SensorReading::new(100, 1.5))
                );
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert!(matches!(rx.try_recv().unwrap(), RecorderCommand::Sensor(_)));
    }

    #[test]
    fn test_sink_reports_closed_controller() {
        let (tx, rx) = unbounded();
        let sink = ReadingSink::new("s1", 0, tx);
        drop(rx);
        assert!(!sink.push(1, 1.0));
    }
}
