//! Error handling for the FieldLog-RS recording controller
//!
//! This module defines the crate-wide error type, the typed recording errors
//! delivered on controller operations, and a Result alias for use throughout
//! the crate.

use thiserror::Error;

/// Main error type for FieldLog-RS operations
#[derive(Error, Debug)]
pub enum FieldLogError {
    /// Errors raised by a sensor recorder or the sensor registry
    #[error("Sensor error ({sensor_id}): {message}")]
    Sensor { sensor_id: String, message: String },

    /// Errors reported by the persistence collaborator
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Recording lifecycle errors
    #[error(transparent)]
    Recording(#[from] RecordingError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FieldLogError>,
    },
}

impl FieldLogError {
    /// Create a sensor error for the given sensor id
    pub fn sensor(sensor_id: impl Into<String>, message: impl Into<String>) -> Self {
        FieldLogError::Sensor {
            sensor_id: sensor_id.into(),
            message: message.into(),
        }
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FieldLogError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<toml::de::Error> for FieldLogError {
    fn from(err: toml::de::Error) -> Self {
        FieldLogError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for FieldLogError {
    fn from(err: toml::ser::Error) -> Self {
        FieldLogError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for FieldLogError {
    fn from(err: serde_json::Error) -> Self {
        FieldLogError::Serialization(err.to_string())
    }
}

/// Typed failures of the recording state machine
///
/// These are returned on the `PendingResult` of the operation that caused
/// them. None of them is fatal; the session keeps running.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    /// Recording could not start (nothing observed, no experiment, or the
    /// new trial could not be saved)
    #[error("Failed to start recording: {reason}")]
    StartFailed { reason: String },

    /// One or more observed sensors were disconnected at start time
    #[error("Failed to start recording, sensors disconnected: {}", sensor_ids.join(", "))]
    StartFailedDisconnected { sensor_ids: Vec<String> },

    /// One or more recording sensors disconnected; recording stays active
    #[error("Failed to stop recording, sensors disconnected: {}", sensor_ids.join(", "))]
    StopFailedDisconnected { sensor_ids: Vec<String> },

    /// One or more recording sensors recorded no data; recording stays active
    #[error("Failed to stop recording, no data from: {}", sensor_ids.join(", "))]
    StopFailedNoData { sensor_ids: Vec<String> },

    /// Persistence failed while stopping; the session is inactive but the
    /// saved trial may be inconsistent
    #[error("Failed to save recording: {reason}")]
    FailedSaveRecording { reason: String },

    /// A label was added while no experiment is selected
    #[error("No experiment selected")]
    NoExperimentSelected,

    /// The controller actor is no longer running
    #[error("Recording controller has shut down")]
    ControllerShutdown,
}

impl RecordingError {
    /// Create a start failure with a reason
    pub fn start_failed(reason: impl Into<String>) -> Self {
        RecordingError::StartFailed {
            reason: reason.into(),
        }
    }

    /// Whether the recording is still active after this error
    pub fn leaves_recording_active(&self) -> bool {
        matches!(
            self,
            RecordingError::StopFailedDisconnected { .. } | RecordingError::StopFailedNoData { .. }
        )
    }
}

/// Result type alias for FieldLog-RS operations
pub type Result<T> = std::result::Result<T, FieldLogError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| FieldLogError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| FieldLogError::Io(e).with_context(f()))
    }
}
