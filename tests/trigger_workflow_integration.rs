//! Integration tests for trigger workflows
//!
//! These tests validate triggers end to end:
//! - Start and stop triggers driving the recording state machine
//! - Note triggers adding labels
//! - Alert triggers reaching the alert sink
//! - Trigger-fired listeners only hearing about effective triggers

mod common;

use common::builders::TriggerBuilder;
use common::mock_helpers::{MockAlerts, MockAppearance, TestSession};
use common::{wait_for_state, wait_until};
use fieldlog_rs::triggers::{AlertType, TriggerActionType, TriggerFiredEvent, TriggerWhen};
use fieldlog_rs::types::{LabelKind, SensorSpec};
use fieldlog_rs::RecordingState;
use std::sync::{Arc, Mutex};

fn start_trigger(sensor_id: &str, threshold: f64) -> fieldlog_rs::Trigger {
    TriggerBuilder::new("start", sensor_id)
        .action(TriggerActionType::StartRecording)
        .when(TriggerWhen::Above, threshold)
        .build()
}

fn fired_ids(session: &TestSession) -> Arc<Mutex<Vec<String>>> {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = fired.clone();
    session
        .controller
        .add_trigger_fired_listener(move |event: &TriggerFiredEvent| {
            sink.lock().unwrap().push(event.trigger.trigger_id.clone())
        })
        .wait()
        .unwrap();
    fired
}

#[test]
fn test_start_trigger_starts_recording() {
    let session = TestSession::start();
    let status = session.controller.watch_status();
    session.observe("s1", vec![start_trigger("s1", 10.0)]);

    session.sensor("s1").emit(1_000, 5.0);
    session.sync();
    assert_eq!(
        session.controller.current_status().state,
        RecordingState::Inactive
    );

    session.clock.set(9_000);
    session.sensor("s1").emit(1_050, 12.0);

    let active = wait_for_state(&status, RecordingState::Active).expect("recording started");
    assert!(!active.user_initiated);
    let experiment = session.experiment();
    assert_eq!(experiment.trials.len(), 1);
    assert_eq!(experiment.trials[0].creation_time_ms, 9_000);
}

#[test]
fn test_stop_trigger_stops_recording() {
    let session = TestSession::start();
    let status = session.controller.watch_status();
    let stop = TriggerBuilder::new("stop", "s1")
        .action(TriggerActionType::StopRecording)
        .when(TriggerWhen::DropsBelow, 0.0)
        .build();
    session.observe("s1", vec![start_trigger("s1", 10.0), stop]);

    session.sensor("s1").emit(1, 12.0);
    assert!(wait_for_state(&status, RecordingState::Active).is_some());

    session.sensor("s1").emit(2, 3.0);
    session.sensor("s1").emit(3, -1.0);
    assert!(wait_for_state(&status, RecordingState::Inactive).is_some());

    let experiment = session.experiment();
    assert_eq!(experiment.trials.len(), 1);
    assert!(experiment.trials[0].is_finalized());
    assert_eq!(session.usage.records().len(), 1);
}

#[test]
fn test_stop_trigger_while_inactive_is_silent() {
    let session = TestSession::start();
    let fired = fired_ids(&session);
    let stop = TriggerBuilder::new("stop", "s1")
        .action(TriggerActionType::StopRecording)
        .when(TriggerWhen::Above, 0.0)
        .build();
    session.observe("s1", vec![stop]);

    session.sensor("s1").emit(1, 5.0);
    session.sync();

    assert!(fired.lock().unwrap().is_empty());
    assert!(session.experiment().labels.is_empty());
    assert_eq!(
        session.controller.current_status().state,
        RecordingState::Inactive
    );
}

#[test]
fn test_listener_only_hears_effective_triggers() {
    let session = TestSession::start();
    let status = session.controller.watch_status();
    let fired = fired_ids(&session);
    session.observe("s1", vec![start_trigger("s1", 10.0)]);

    session.sensor("s1").emit(1, 12.0);
    assert!(wait_for_state(&status, RecordingState::Active).is_some());
    session.sensor("s1").emit(2, 13.0);
    session.sync();

    assert_eq!(*fired.lock().unwrap(), vec!["start".to_string()]);
}

#[test]
fn test_start_trigger_ignored_during_transition() {
    let session = TestSession::start();
    let status = session.controller.watch_status();
    session.observe("s1", vec![start_trigger("s1", 10.0)]);
    session.persistence.set_hold(true);

    session.sensor("s1").emit(1, 12.0);
    assert!(wait_for_state(&status, RecordingState::Starting).is_some());
    session.sensor("s1").emit(2, 15.0);
    session.sync();
    assert_eq!(session.persistence.held_count(), 1);

    session.persistence.release_held();
    assert!(wait_for_state(&status, RecordingState::Active).is_some());
    assert_eq!(session.experiment().trials.len(), 1);
}

#[test]
fn test_removed_listener_is_not_notified() {
    let session = TestSession::start();
    let fired = Arc::new(Mutex::new(0));
    let counter = fired.clone();
    let id = session
        .controller
        .add_trigger_fired_listener(move |_: &TriggerFiredEvent| *counter.lock().unwrap() += 1)
        .wait()
        .unwrap();
    session.controller.remove_trigger_fired_listener(id);

    let alert = TriggerBuilder::new("alert", "s1")
        .action(TriggerActionType::Alert)
        .when(TriggerWhen::Above, 0.0)
        .alerts(&[AlertType::Visual])
        .build();
    session.observe("s1", vec![alert]);
    session.sensor("s1").emit(1, 1.0);
    session.sync();

    assert_eq!(*fired.lock().unwrap(), 0);
}

#[test]
fn test_alert_trigger_reaches_alert_sink() {
    let mut alerts = MockAlerts::new();
    alerts.expect_vibrate().times(2).return_const(());
    alerts.expect_play_sound().never();

    let mut session = TestSession::builder().alerts(alerts).spawn();
    let visual = Arc::new(Mutex::new(0));
    let counter = visual.clone();
    session
        .controller
        .add_trigger_fired_listener(move |event: &TriggerFiredEvent| {
            if event.wants_visual_alert() {
                *counter.lock().unwrap() += 1;
            }
        })
        .wait()
        .unwrap();

    let alert = TriggerBuilder::new("alert", "s1")
        .action(TriggerActionType::Alert)
        .when(TriggerWhen::RisesAbove, 5.0)
        .alerts(&[AlertType::Physical, AlertType::Visual])
        .build();
    session.observe("s1", vec![alert]);

    for (t, value) in [(1, 0.0), (2, 6.0), (3, 4.0), (4, 7.0), (5, 8.0)] {
        session.sensor("s1").emit(t, value);
    }
    session.sync();
    assert_eq!(*visual.lock().unwrap(), 2);

    session.shutdown();
}

#[test]
fn test_note_trigger_labels_recording_trial() {
    let mut appearance = MockAppearance::new();
    appearance
        .expect_spec_for()
        .returning(|id| Some(SensorSpec::new(id, "Thermometer").with_units("C")));

    let session = TestSession::builder().appearance(appearance).spawn();
    let note = TriggerBuilder::new("hot", "s1")
        .action(TriggerActionType::Note)
        .when(TriggerWhen::Above, 30.0)
        .only_when_recording()
        .note("too hot")
        .build();
    session.observe("s1", vec![note]);

    session.sensor("s1").emit(10, 35.0);
    session.sync();
    assert!(session.experiment().labels.is_empty());

    session.controller.start_recording(true).wait().unwrap();
    session.sensor("s1").emit(20, 36.5);
    session.sync();

    let experiment = session.experiment();
    let labels = &experiment.trials[0].labels;
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].timestamp_ms, 20);
    match &labels[0].kind {
        LabelKind::TriggerNote(note) => {
            assert_eq!(note.sensor_spec.name, "Thermometer");
            assert_eq!(note.condition, "above 30");
            assert_eq!(note.note_text.as_deref(), Some("too hot"));
            common::assert_float_eq(note.value, 36.5, 1e-9);
        }
        other => panic!("unexpected label kind: {:?}", other),
    }
}

#[test]
fn test_updated_triggers_take_effect() {
    let session = TestSession::start();
    let status = session.controller.watch_status();
    session.observe("s1", vec![]);

    session.sensor("s1").emit(1, 50.0);
    session.sync();
    assert_eq!(
        session.controller.current_status().state,
        RecordingState::Inactive
    );

    session
        .controller
        .update_triggers("s1", vec![start_trigger("s1", 10.0)]);
    session.sensor("s1").emit(2, 50.0);
    assert!(wait_for_state(&status, RecordingState::Active).is_some());
    assert!(wait_until(|| session.sensor("s1").recording_trial().is_some()));
}

#[test]
fn test_later_observer_does_not_replace_triggers() {
    let session = TestSession::start();
    let status = session.controller.watch_status();
    session.observe("s1", vec![start_trigger("s1", 10.0)]);
    session.observe("s1", vec![]);

    session.sensor("s1").emit(50, 15.0);
    assert!(wait_for_state(&status, RecordingState::Active).is_some());
}
