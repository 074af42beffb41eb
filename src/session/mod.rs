//! Recording session controller
//!
//! This module owns the lifecycle of a recording session: which sensors are
//! observed, the Inactive → Starting → Active → Stopping state machine, trigger
//! evaluation and labels. All mutable state lives on one service thread; the
//! rest of the application talks to it through a [`SessionController`].
//!
//! # Features
//!
//! - Multiplex any number of observers onto one stream per sensor
//! - Start and stop recordings with connectivity and data checks
//! - Evaluate value triggers on every reading
//! - Add text, snapshot and trigger-note labels
//! - Pause and resume all observation with tokens
//!
//! # Example
//!
//! ```ignore
//! use fieldlog_rs::{AppConfig, Collaborators, SessionController};
//!
//! let (controller, handle) = SessionController::spawn(AppConfig::default(), collaborators)?;
//! let status = controller.watch_status();
//! let outcome = controller.start_recording(true).wait()?;
//! ```

pub mod controller;
pub mod listeners;
pub mod snapshot;
pub mod state;
pub mod status;
pub mod stream;
pub mod worker;

pub use controller::{PendingResult, SessionController};
pub use listeners::{
    ListenerId, NoopStatusListener, ObservedIdsListener, ObserverId, SensorObserver,
    SensorStatusListener, TriggerFiredListener,
};
pub use snapshot::format_snapshot;
pub use state::{PauseToken, RecordingMetadata, RecordingOutcome, RecordingState, RecordingStatus};
pub use status::{StatusPublisher, StatusSubscription};
pub use worker::{RecorderCommand, RecorderService};
