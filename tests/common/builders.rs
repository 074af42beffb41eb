//! Test data builders for creating test objects

use fieldlog_rs::triggers::{AlertType, Trigger, TriggerActionType, TriggerWhen};
use fieldlog_rs::types::{Experiment, SensorLayout};

/// Builder for creating test Triggers
pub struct TriggerBuilder {
    trigger_id: String,
    sensor_id: String,
    action: TriggerActionType,
    when: TriggerWhen,
    value: f64,
    only_when_recording: bool,
    alert_types: Vec<AlertType>,
    note_text: Option<String>,
}

impl TriggerBuilder {
    pub fn new(trigger_id: &str, sensor_id: &str) -> Self {
        Self {
            trigger_id: trigger_id.to_string(),
            sensor_id: sensor_id.to_string(),
            action: TriggerActionType::Note,
            when: TriggerWhen::Above,
            value: 0.0,
            only_when_recording: false,
            alert_types: Vec::new(),
            note_text: None,
        }
    }

    pub fn action(mut self, action: TriggerActionType) -> Self {
        self.action = action;
        self
    }

    pub fn when(mut self, when: TriggerWhen, value: f64) -> Self {
        self.when = when;
        self.value = value;
        self
    }

    pub fn only_when_recording(mut self) -> Self {
        self.only_when_recording = true;
        self
    }

    pub fn alerts(mut self, alert_types: &[AlertType]) -> Self {
        self.alert_types = alert_types.to_vec();
        self
    }

    pub fn note(mut self, text: &str) -> Self {
        self.note_text = Some(text.to_string());
        self
    }

    pub fn build(self) -> Trigger {
        let mut trigger = Trigger::new(
            self.trigger_id,
            self.sensor_id,
            self.action,
            self.when,
            self.value,
        )
        .with_alert_types(self.alert_types);
        if self.only_when_recording {
            trigger = trigger.only_when_recording();
        }
        if let Some(text) = self.note_text {
            trigger = trigger.with_note_text(text);
        }
        trigger
    }
}

/// Builder for creating test Experiments
pub struct ExperimentBuilder {
    experiment_id: String,
    title: String,
}

impl ExperimentBuilder {
    pub fn new(experiment_id: &str) -> Self {
        Self {
            experiment_id: experiment_id.to_string(),
            title: "Field test".to_string(),
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn build(self) -> Experiment {
        Experiment::new(self.experiment_id, self.title)
    }
}

/// One layout per sensor id, with the given active triggers on each
pub fn layouts(sensor_ids: &[&str], trigger_ids: &[&str]) -> Vec<SensorLayout> {
    sensor_ids
        .iter()
        .map(|id| {
            let mut layout = SensorLayout::new(*id);
            layout.active_trigger_ids = trigger_ids.iter().map(|t| t.to_string()).collect();
            layout
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_builder() {
        let trigger = TriggerBuilder::new("t1", "s1")
            .action(TriggerActionType::Alert)
            .when(TriggerWhen::RisesAbove, 3.0)
            .alerts(&[AlertType::Audio])
            .build();

        assert_eq!(trigger.trigger_id, "t1");
        assert_eq!(trigger.action, TriggerActionType::Alert);
        assert_eq!(trigger.when, TriggerWhen::RisesAbove);
        assert!(trigger.alert_types.contains(&AlertType::Audio));
    }
}
