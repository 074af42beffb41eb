//! Recording state values published by the controller

use serde::{Deserialize, Serialize};

/// Phase of the recording state machine
///
/// The only legal transitions are
/// `Inactive -> Starting -> Active -> Stopping -> Inactive`, plus the
/// reverts `Starting -> Inactive` (start failed) and `Active -> Inactive`
/// (recording discarded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordingState {
    /// Not recording
    #[default]
    Inactive,
    /// Trial created, waiting for it to be saved
    Starting,
    /// Recording into a trial
    Active,
    /// Trial being finalized and saved
    Stopping,
}

impl RecordingState {
    /// A start or stop is in flight
    pub fn is_transitioning(&self) -> bool {
        matches!(self, RecordingState::Starting | RecordingState::Stopping)
    }

    /// A trial exists and sensors are recording into it
    pub fn is_recording(&self) -> bool {
        matches!(self, RecordingState::Active | RecordingState::Stopping)
    }
}

impl std::fmt::Display for RecordingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordingState::Inactive => write!(f, "Inactive"),
            RecordingState::Starting => write!(f, "Starting"),
            RecordingState::Active => write!(f, "Active"),
            RecordingState::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Identity of a running recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    /// Start of the recording (ms since epoch)
    pub start_time_ms: i64,
    /// Trial being recorded
    pub trial_id: String,
    /// Name of the experiment the trial belongs to
    pub experiment_display_name: String,
}

/// Snapshot of the controller's recording status
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordingStatus {
    /// Current phase
    pub state: RecordingState,
    /// Set while `Active` or `Stopping`
    pub current_recording: Option<RecordingMetadata>,
    /// Whether the user (rather than a trigger) started the recording
    pub user_initiated: bool,
}

impl RecordingStatus {
    /// Not recording
    pub fn inactive() -> Self {
        Self::default()
    }

    /// Start requested; the trial has not been saved yet
    pub fn starting(user_initiated: bool) -> Self {
        Self {
            state: RecordingState::Starting,
            current_recording: None,
            user_initiated,
        }
    }

    /// Recording into `metadata.trial_id`
    pub fn active(metadata: RecordingMetadata, user_initiated: bool) -> Self {
        Self {
            state: RecordingState::Active,
            current_recording: Some(metadata),
            user_initiated,
        }
    }

    /// Same recording, now stopping
    pub fn stopping(&self) -> Self {
        Self {
            state: RecordingState::Stopping,
            current_recording: self.current_recording.clone(),
            user_initiated: self.user_initiated,
        }
    }

    /// Trial id of the current recording
    pub fn trial_id(&self) -> Option<&str> {
        self.current_recording.as_ref().map(|m| m.trial_id.as_str())
    }
}

/// Token returned by `pause_observing_all`
///
/// Only the most recently issued token resumes observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PauseToken(String);

impl PauseToken {
    pub(crate) fn from_counter(counter: u64) -> Self {
        Self(counter.to_string())
    }

    /// Token as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PauseToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl std::fmt::Display for PauseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Successful completion of a start or stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingOutcome {
    /// Recording started
    Started(RecordingMetadata),
    /// Recording stopped and the trial was saved
    Stopped { trial_id: String },
    /// Recording stopped without saving the trial
    Discarded { trial_id: String },
    /// Request arrived in a state where it has nothing to do
    Ignored(RecordingState),
}

impl RecordingOutcome {
    /// Whether the request changed the recording state
    pub fn took_effect(&self) -> bool {
        !matches!(self, RecordingOutcome::Ignored(_))
    }
}
