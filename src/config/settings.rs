//! Settings sections of the application configuration
//!
//! # Main Types
//!
//! - [`ControllerSettings`] - Recording controller tuning (delays, polling)
//! - [`LoggingSettings`] - Log filter and optional log directory
//! - [`SimulationSettings`] - Simulated sensors used by the demo binary

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::sensors::simulated::SignalPattern;

/// Tuning for the recording controller actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Delay before an unobserved sensor is physically stopped (0 = immediately)
    ///
    /// Re-observing the sensor within the delay keeps it running, which
    /// avoids reconnect churn when the host briefly switches views.
    pub stop_delay_ms: u64,

    /// How long the actor waits for a command before checking timers
    pub idle_poll_interval_ms: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            stop_delay_ms: 0,
            idle_poll_interval_ms: super::DEFAULT_IDLE_POLL_INTERVAL_MS,
        }
    }
}

impl ControllerSettings {
    /// Stop delay as a Duration
    pub fn stop_delay(&self) -> Duration {
        Duration::from_millis(self.stop_delay_ms)
    }

    /// Idle poll interval as a Duration (never zero)
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms.max(1))
    }
}

/// Logging configuration for the binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is not set
    pub filter: String,

    /// Directory for daily-rolling log files (None = stderr only)
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: String::from("info,fieldlog_rs=debug"),
            log_dir: None,
        }
    }
}

/// One simulated sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedSensorSettings {
    /// Sensor identifier
    pub sensor_id: String,
    /// Display name
    pub name: String,
    /// Units label
    #[serde(default)]
    pub units: String,
    /// Signal shape
    pub pattern: SignalPattern,
    /// Samples per second
    #[serde(default = "default_rate_hz")]
    pub rate_hz: u32,
}

fn default_rate_hz() -> u32 {
    20
}

/// Simulated sensors and the trigger threshold used by the demo binary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Sensors the demo registers
    pub sensors: Vec<SimulatedSensorSettings>,

    /// Start recording when the first sensor rises above this value
    pub start_threshold: f64,

    /// How long the demo records before stopping, in seconds
    pub record_seconds: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            sensors: vec![
                SimulatedSensorSettings {
                    sensor_id: String::from("sim-sine"),
                    name: String::from("Sine"),
                    units: String::new(),
                    pattern: SignalPattern::Sine {
                        frequency: 0.5,
                        amplitude: 10.0,
                        offset: 0.0,
                    },
                    rate_hz: default_rate_hz(),
                },
                SimulatedSensorSettings {
                    sensor_id: String::from("sim-ramp"),
                    name: String::from("Ramp"),
                    units: String::from("V"),
                    pattern: SignalPattern::Sawtooth {
                        period: 4.0,
                        amplitude: 5.0,
                    },
                    rate_hz: default_rate_hz(),
                },
            ],
            start_threshold: 8.0,
            record_seconds: 3,
        }
    }
}
