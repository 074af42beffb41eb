//! Alert side effects of `Alert` triggers

use super::{AlertType, Trigger};

/// Device alerting collaborator
///
/// Visual alerts are not part of this interface; the UI shows them when it
/// receives the trigger-fired event.
pub trait AlertSink: Send {
    /// Vibrate the device
    fn vibrate(&mut self);

    /// Play the alert sound
    fn play_sound(&mut self);
}

/// Alert sink that only logs
#[derive(Debug, Default)]
pub struct LoggingAlertSink;

impl AlertSink for LoggingAlertSink {
    fn vibrate(&mut self) {
        tracing::info!("Alert: vibrate");
    }

    fn play_sound(&mut self) {
        tracing::info!("Alert: play sound");
    }
}

/// Run the physical and audio alerts of a trigger
pub fn dispatch_alerts(sink: &mut dyn AlertSink, trigger: &Trigger) {
    if trigger.alert_types.contains(&AlertType::Physical) {
        sink.vibrate();
    }
    if trigger.alert_types.contains(&AlertType::Audio) {
        sink.play_sound();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::{TriggerActionType, TriggerWhen};

    mockall::mock! {
        Sink {}
        impl AlertSink for Sink {
            fn vibrate(&mut self);
            fn play_sound(&mut self);
        }
    }

    #[test]
    fn test_dispatch_only_requested_alerts() {
        let trigger = Trigger::new("t", "s", TriggerActionType::Alert, TriggerWhen::Above, 0.0)
            .with_alert_types([AlertType::Physical, AlertType::Visual]);

        let mut sink = MockSink::new();
        sink.expect_vibrate().times(1).return_const(());
        sink.expect_play_sound().never();

        dispatch_alerts(&mut sink, &trigger);
    }
}
