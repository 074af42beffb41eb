//! Sensor-value triggers
//!
//! A [`Trigger`] watches one sensor and fires an action when an incoming
//! value satisfies its condition. Evaluation here is pure: [`plan_effects`]
//! turns a reading into a list of [`TriggerEffect`]s and the controller
//! applies them afterwards, so a trigger that starts or stops a recording
//! never re-enters the controller while it is still dispatching the reading.
//!
//! # Conditions
//!
//! | [`TriggerWhen`] | Fires when                                        | Needs previous value |
//! |-----------------|---------------------------------------------------|----------------------|
//! | `At`            | value equals or crosses the threshold             | no (crossing: yes)   |
//! | `RisesAbove`    | previous <= threshold < value                     | yes                  |
//! | `DropsBelow`    | previous >= threshold > value                     | yes                  |
//! | `Above`         | value > threshold, on every reading               | no                   |
//! | `Below`         | value < threshold, on every reading               | no                   |

pub mod alerts;

pub use alerts::{dispatch_alerts, AlertSink, LoggingAlertSink};

use crate::types::SensorReading;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What happens when a trigger fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerActionType {
    /// Start a recording (not user initiated)
    StartRecording,
    /// Stop the current recording
    StopRecording,
    /// Add a note label
    Note,
    /// Raise an alert
    Alert,
}

/// Kind of alert raised by an `Alert` trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AlertType {
    /// Shown by the UI (only exposed through the trigger-fired event)
    Visual,
    /// Sound played through the alert sink
    Audio,
    /// Vibration through the alert sink
    Physical,
}

/// Numeric condition of a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerWhen {
    /// Value reaches the threshold from either side
    At,
    /// Value crosses the threshold going up
    RisesAbove,
    /// Value crosses the threshold going down
    DropsBelow,
    /// Value is above the threshold
    Above,
    /// Value is below the threshold
    Below,
}

impl TriggerWhen {
    /// Human readable verb phrase
    pub fn describe(&self) -> &'static str {
        match self {
            TriggerWhen::At => "at",
            TriggerWhen::RisesAbove => "rises above",
            TriggerWhen::DropsBelow => "drops below",
            TriggerWhen::Above => "above",
            TriggerWhen::Below => "below",
        }
    }
}

/// A user-configured rule on one sensor
///
/// Triggers are owned by the experiment; the controller only reads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Unique trigger id
    pub trigger_id: String,
    /// Sensor the trigger watches
    pub sensor_id: String,
    /// Action taken when the condition is met
    pub action: TriggerActionType,
    /// Condition kind
    pub when: TriggerWhen,
    /// Threshold value
    pub value: f64,
    /// Ignore the trigger unless a recording is in progress
    #[serde(default)]
    pub only_when_recording: bool,
    /// Alert kinds for `Alert` triggers
    #[serde(default)]
    pub alert_types: BTreeSet<AlertType>,
    /// Caption for `Note` triggers
    #[serde(default)]
    pub note_text: Option<String>,
}

impl Trigger {
    /// Create a trigger
    pub fn new(
        trigger_id: impl Into<String>,
        sensor_id: impl Into<String>,
        action: TriggerActionType,
        when: TriggerWhen,
        value: f64,
    ) -> Self {
        Self {
            trigger_id: trigger_id.into(),
            sensor_id: sensor_id.into(),
            action,
            when,
            value,
            only_when_recording: false,
            alert_types: BTreeSet::new(),
            note_text: None,
        }
    }

    /// Only evaluate while recording
    pub fn only_when_recording(mut self) -> Self {
        self.only_when_recording = true;
        self
    }

    /// Set the alert kinds
    pub fn with_alert_types(mut self, alert_types: impl IntoIterator<Item = AlertType>) -> Self {
        self.alert_types = alert_types.into_iter().collect();
        self
    }

    /// Set the note caption
    pub fn with_note_text(mut self, text: impl Into<String>) -> Self {
        self.note_text = Some(text.into());
        self
    }

    /// Condition as text, e.g. "rises above 10"
    pub fn condition_text(&self) -> String {
        format!("{} {}", self.when.describe(), self.value)
    }

    /// Check whether the condition holds for `value`
    pub fn is_met(&self, previous: Option<f64>, value: f64) -> bool {
        evaluate(self.when, self.value, previous, value)
    }
}

/// Evaluate a condition against a value and the sensor's previous value
pub fn evaluate(when: TriggerWhen, threshold: f64, previous: Option<f64>, value: f64) -> bool {
    if value.is_nan() {
        return false;
    }
    match when {
        TriggerWhen::At => {
            if value == threshold {
                return true;
            }
            match previous {
                Some(prev) => {
                    (prev < threshold && value > threshold) || (prev > threshold && value < threshold)
                }
                None => false,
            }
        }
        TriggerWhen::RisesAbove => matches!(previous, Some(prev) if prev <= threshold && value > threshold),
        TriggerWhen::DropsBelow => matches!(previous, Some(prev) if prev >= threshold && value < threshold),
        TriggerWhen::Above => value > threshold,
        TriggerWhen::Below => value < threshold,
    }
}

/// Recording state a reading is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvaluationContext {
    /// A trial is being recorded
    pub is_recording: bool,
    /// A start or stop is in flight
    pub transition_in_progress: bool,
}

/// An action a fired trigger asks the controller to take
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerEffect {
    /// Trigger that fired
    pub trigger: Trigger,
    /// Reading that fired it
    pub reading: SensorReading,
}

impl TriggerEffect {
    /// Action requested by this effect
    pub fn action(&self) -> TriggerActionType {
        self.trigger.action
    }
}

/// Decide which triggers fire for a reading
///
/// Start and stop effects are only planned when they could take effect in
/// `ctx`; the controller re-checks its state when applying them since an
/// earlier effect of the same reading may already have moved it.
pub fn plan_effects(
    triggers: &[Trigger],
    previous: Option<f64>,
    reading: SensorReading,
    ctx: EvaluationContext,
) -> Vec<TriggerEffect> {
    triggers
        .iter()
        .filter(|t| !t.only_when_recording || ctx.is_recording)
        .filter(|t| t.is_met(previous, reading.value))
        .filter(|t| match t.action {
            TriggerActionType::StartRecording => !ctx.is_recording && !ctx.transition_in_progress,
            TriggerActionType::StopRecording => ctx.is_recording && !ctx.transition_in_progress,
            TriggerActionType::Note => true,
            TriggerActionType::Alert => !t.alert_types.is_empty(),
        })
        .map(|t| TriggerEffect {
            trigger: t.clone(),
            reading,
        })
        .collect()
}

/// Notification sent to trigger-fired listeners
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerFiredEvent {
    /// Trigger that produced an effect
    pub trigger: Trigger,
    /// Sensor the reading came from
    pub sensor_id: String,
    /// Reading that fired the trigger
    pub reading: SensorReading,
}

impl TriggerFiredEvent {
    /// Whether the UI should show a visual alert
    pub fn wants_visual_alert(&self) -> bool {
        self.trigger.action == TriggerActionType::Alert
            && self.trigger.alert_types.contains(&AlertType::Visual)
    }
}
