//! Integration tests for sensor observation
//!
//! These tests validate observer multiplexing and the features built on it:
//! - Shared streams and release of unobserved sensors
//! - Observed-ids listeners
//! - Latest values, snapshots and labels
//! - Pause/resume tokens and delayed stops
//! - Unavailable sensors and reboots

mod common;

use common::mock_helpers::TestSession;
use common::wait_until;
use fieldlog_rs::session::SensorStatusListener;
use fieldlog_rs::types::{LabelKind, SensorOptions, SensorReading, SensorStatus};
use fieldlog_rs::RecordingError;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct CollectingStatus {
    events: Arc<Mutex<Vec<String>>>,
}

impl SensorStatusListener for CollectingStatus {
    fn on_status_update(&mut self, sensor_id: &str, status: SensorStatus) {
        self.events
            .lock()
            .unwrap()
            .push(format!("{}:{}", sensor_id, status));
    }

    fn on_source_error(&mut self, sensor_id: &str, _message: &str) {
        self.events.lock().unwrap().push(format!("{}:error", sensor_id));
    }
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_observers_share_one_stream() {
    let session = TestSession::start();
    let (first, a) = session.observe_collecting("s1");
    let (second, b) = session.observe_collecting("s1");
    assert_ne!(first, second);
    assert_eq!(session.sensor("s1").start_observing_calls(), 1);
    assert_eq!(session.controller.observer_count("s1").wait(), Ok(2));

    session.sensor("s1").emit(5, 1.25);
    session.sync();
    assert_eq!(*a.lock().unwrap(), vec![SensorReading::new(5, 1.25)]);
    assert_eq!(*b.lock().unwrap(), vec![SensorReading::new(5, 1.25)]);

    session.controller.stop_observing("s1", first);
    session.sync();
    assert!(session.sensor("s1").is_observing());

    session.controller.stop_observing("s1", second);
    session.sync();
    assert!(!session.sensor("s1").is_observing());
    assert_eq!(session.controller.current_observed_ids().wait(), Ok(vec![]));
    assert_eq!(session.controller.most_recent_value("s1").wait(), Ok(None));
}

#[test]
fn test_stop_observing_unknown_observer_is_noop() {
    let session = TestSession::start();
    let id = session.observe("s1", vec![]);
    session.controller.stop_observing("s2", id);
    session.sync();
    assert!(session.sensor("s1").is_observing());
}

#[test]
fn test_observed_ids_listener() {
    let session = TestSession::start();
    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = calls.clone();
    session
        .controller
        .add_observed_ids_listener("ui", move |ids: &[String]| {
            sink.lock().unwrap().push(ids.to_vec())
        });

    let first = session.observe("s1", vec![]);
    session.observe("s2", vec![]);
    session.observe("s2", vec![]);
    session.controller.stop_observing("s1", first);
    session.sync();

    assert_eq!(
        *calls.lock().unwrap(),
        vec![ids(&[]), ids(&["s1"]), ids(&["s1", "s2"]), ids(&["s2"])]
    );

    session.controller.remove_observed_ids_listener("ui");
    session.observe("s1", vec![]);
    session.sync();
    assert_eq!(calls.lock().unwrap().len(), 4);
}

#[test]
fn test_latest_values_and_snapshots() {
    let session = TestSession::start();
    session.observe("s1", vec![]);
    session.observe("s2", vec![]);
    session.sensor("s1").emit(10, 1.5);
    session.sensor("s1").emit(11, 2.5);

    assert_eq!(
        session.controller.most_recent_value("s1").wait(),
        Ok(Some(SensorReading::new(11, 2.5)))
    );
    assert_eq!(session.controller.most_recent_value("s2").wait(), Ok(None));

    let snapshot = session
        .controller
        .generate_snapshot_label_value(ids(&["s2", "s1", "s3"]))
        .wait()
        .unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot.snapshots[0].spec.name, "S1");

    let label = session
        .controller
        .take_snapshot(ids(&["s1"]))
        .wait()
        .unwrap();
    assert!(matches!(label.kind, LabelKind::Snapshot(_)));
    session.controller.add_label("water turned green", 42).wait().unwrap();

    let experiment = session.experiment();
    assert_eq!(experiment.labels.len(), 2);
    assert_eq!(experiment.labels[1].timestamp_ms, 42);
    assert!(session.persistence.update_calls() >= 2);
}

#[test]
fn test_label_without_experiment_fails() {
    let session = TestSession::builder().no_experiment().spawn();
    assert_eq!(
        session.controller.add_label("note", 1).wait(),
        Err(RecordingError::NoExperimentSelected)
    );
}

#[test]
fn test_pause_and_resume_tokens() {
    let session = TestSession::start();
    session.observe("s1", vec![]);

    let first = session.controller.pause_observing_all().wait().unwrap();
    assert!(!session.sensor("s1").is_observing());
    let second = session.controller.pause_observing_all().wait().unwrap();

    assert_eq!(session.controller.resume_observing_all(first).wait(), Ok(false));
    assert!(!session.sensor("s1").is_observing());

    assert_eq!(session.controller.resume_observing_all(second).wait(), Ok(true));
    assert!(session.sensor("s1").is_observing());

    session.sensor("s1").emit(3, 9.0);
    assert_eq!(
        session.controller.most_recent_value("s1").wait(),
        Ok(Some(SensorReading::new(3, 9.0)))
    );
}

#[test]
fn test_pause_does_not_interrupt_recording() {
    let session = TestSession::start();
    session.observe("s1", vec![]);
    session.controller.start_recording(true).wait().unwrap();

    session.controller.pause_observing_all().wait().unwrap();
    assert!(session.sensor("s1").is_observing());
    assert!(session.sensor("s1").recording_trial().is_some());
}

#[test]
fn test_delayed_stop_expires() {
    let session = TestSession::builder().stop_delay_ms(30).spawn();
    let id = session.observe("s1", vec![]);
    session.controller.stop_observing("s1", id);
    session.sync();

    assert!(wait_until(|| !session.sensor("s1").is_observing()));
    assert!(wait_until(|| session
        .controller
        .current_observed_ids()
        .wait()
        .map(|ids| ids.is_empty())
        .unwrap_or(false)));
}

#[test]
fn test_reobserve_cancels_delayed_stop() {
    let session = TestSession::builder().stop_delay_ms(60_000).spawn();
    let id = session.observe("s1", vec![]);
    session.controller.stop_observing("s1", id);
    session.sync();
    assert!(session.sensor("s1").is_observing());

    session.observe("s1", vec![]);
    assert!(session.sensor("s1").is_observing());
    assert_eq!(session.sensor("s1").start_observing_calls(), 1);
    assert_eq!(session.sensor("s1").stop_observing_calls(), 0);
}

#[test]
fn test_unobserved_sensor_records_until_stop() {
    let session = TestSession::start();
    let id = session.observe("s1", vec![]);
    session.controller.start_recording(true).wait().unwrap();
    session.controller.stop_observing("s1", id);
    session.sensor("s1").emit(7, 1.0);
    session.sync();
    assert!(session.sensor("s1").is_observing());

    session.controller.stop_recording().wait().unwrap();
    assert!(!session.sensor("s1").is_observing());
    assert_eq!(session.controller.current_observed_ids().wait(), Ok(vec![]));
}

#[test]
fn test_sensor_joining_active_recording() {
    let session = TestSession::start();
    session.observe("s1", vec![]);
    let trial_id = match session.controller.start_recording(true).wait().unwrap() {
        fieldlog_rs::RecordingOutcome::Started(metadata) => metadata.trial_id,
        other => panic!("unexpected outcome: {:?}", other),
    };

    session.observe("s2", vec![]);
    assert_eq!(session.sensor("s2").recording_trial(), Some(trial_id));
}

#[test]
fn test_unavailable_sensor_is_disconnected() {
    let session = TestSession::builder().failing_sensor("bad").spawn();
    let status = CollectingStatus::default();
    let events = status.events.clone();
    session
        .controller
        .start_observing("bad", vec![], |_: &SensorReading| {}, status, None)
        .wait()
        .unwrap();
    session.sync();

    assert_eq!(
        *events.lock().unwrap(),
        vec!["bad:Disconnected".to_string(), "bad:error".to_string()]
    );
    assert_eq!(session.controller.current_observed_ids().wait(), Ok(ids(&["bad"])));
    assert_eq!(
        session.controller.start_recording(true).wait(),
        Err(RecordingError::StartFailedDisconnected {
            sensor_ids: ids(&["bad"])
        })
    );
    assert_eq!(session.controller.reboot("bad").wait(), Ok(false));
}

#[test]
fn test_reboot_and_options() {
    let session = TestSession::start();
    let options = SensorOptions::new().with("rate", "10");
    session
        .controller
        .start_observing("s1", vec![], |_: &SensorReading| {}, CollectingStatus::default(), Some(options.clone()))
        .wait()
        .unwrap();
    assert_eq!(session.sensor("s1").last_options(), Some(options));

    assert_eq!(session.controller.reboot("s1").wait(), Ok(true));
    assert_eq!(session.sensor("s1").reboots(), 1);

    session.sensor("s1").set_fail_reboot(true);
    assert_eq!(session.controller.reboot("s1").wait(), Ok(false));
    assert_eq!(session.controller.reboot("unknown").wait(), Ok(false));

    let fast = SensorOptions::new().with("rate", "50");
    session.controller.apply_options("s1", fast.clone());
    session.sync();
    assert_eq!(session.sensor("s1").last_options(), Some(fast));
}
