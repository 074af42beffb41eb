//! # FieldLog-RS: Recording Session Controller
//!
//! The session layer of a field science data logger. It sits between sensor
//! drivers and the user interface, multiplexing observers onto one stream per
//! sensor, running the recording state machine, evaluating value triggers and
//! attaching labels to experiments and trials.
//!
//! ## Architecture
//!
//! - **Service**: A single thread owns all session state and drains a command queue
//! - **Controller**: A cloneable handle that enqueues commands and returns pending results
//! - **Sensors**: Recorders push readings into sinks that feed the command queue
//! - **Services**: Persistence, clock, appearance, alerts and usage are pluggable traits
//! - **Communication**: Crossbeam channels for commands, oneshot channels for replies
//!
//! ## Configuration
//!
//! Configuration is stored in the platform-appropriate data directory under
//! `dev.hxyulin.fieldlog-rs`:
//!
//! - **Linux**: `~/.local/share/dev.hxyulin.fieldlog-rs/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.fieldlog-rs/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.fieldlog-rs\`
//!
//! ## Example
//!
//! ```ignore
//! use fieldlog_rs::{
//!     config::AppConfig,
//!     sensors::SimulatedSensorRegistry,
//!     services::{Collaborators, InMemoryPersistence},
//!     session::{NoopStatusListener, SessionController},
//!     types::{Experiment, SensorReading},
//! };
//! use std::sync::Arc;
//!
//! let registry = SimulatedSensorRegistry::new();
//! let collaborators = Collaborators::new(Box::new(registry), Arc::new(InMemoryPersistence::new()));
//! let (controller, handle) = SessionController::spawn(AppConfig::default(), collaborators)?;
//!
//! controller.set_selected_experiment(Some(Experiment::new("e1", "Pond survey")));
//! controller
//!     .start_observing("temp", vec![], |r: &SensorReading| println!("{}", r.value), NoopStatusListener, None)
//!     .wait()?;
//! let outcome = controller.start_recording(true).wait()?;
//!
//! controller.shutdown();
//! handle.join().ok();
//! ```

pub mod config;
pub mod error;
pub mod sensors;
pub mod services;
pub mod session;
pub mod triggers;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{FieldLogError, RecordingError, Result};
pub use services::{Collaborators, InMemoryPersistence, PersistenceService};
pub use session::{
    PendingResult, RecordingOutcome, RecordingState, RecordingStatus, SessionController,
};
pub use triggers::{Trigger, TriggerActionType, TriggerWhen};
pub use types::{Experiment, Label, SensorReading, SensorSpec, Trial};
