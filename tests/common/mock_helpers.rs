//! Mock construction helpers

use fieldlog_rs::config::AppConfig;
use fieldlog_rs::sensors::{ManualSensorHandle, SimulatedSensorRegistry};
use fieldlog_rs::services::{
    AppearanceProvider, Collaborators, CollectingUsageTracker, InMemoryPersistence, ManualClock,
    UsageRecord, UsageTracker,
};
use fieldlog_rs::session::{NoopStatusListener, ObserverId, SessionController};
use fieldlog_rs::triggers::{AlertSink, Trigger};
use fieldlog_rs::types::{Experiment, SensorReading, SensorSpec};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use super::builders::ExperimentBuilder;

mockall::mock! {
    pub Alerts {}
    impl AlertSink for Alerts {
        fn vibrate(&mut self);
        fn play_sound(&mut self);
    }
}

mockall::mock! {
    pub Usage {}
    impl UsageTracker for Usage {
        fn track_recording(&mut self, record: &UsageRecord);
    }
}

mockall::mock! {
    pub Appearance {}
    impl AppearanceProvider for Appearance {
        fn spec_for(&self, sensor_id: &str) -> Option<SensorSpec>;
    }
}

/// Readings collected by a test observer
pub type Collected = Arc<Mutex<Vec<SensorReading>>>;

/// Builder for a controller running on its own thread with manual sensors
pub struct TestSessionBuilder {
    config: AppConfig,
    sensors: Vec<String>,
    failing: Vec<String>,
    experiment: Option<Experiment>,
    alerts: Option<Box<dyn AlertSink>>,
    usage: Option<Box<dyn UsageTracker>>,
    appearance: Option<Box<dyn AppearanceProvider>>,
}

impl TestSessionBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            sensors: vec!["s1".to_string(), "s2".to_string()],
            failing: Vec::new(),
            experiment: Some(ExperimentBuilder::new("exp-1").build()),
            alerts: None,
            usage: None,
            appearance: None,
        }
    }

    pub fn sensors(mut self, sensor_ids: &[&str]) -> Self {
        self.sensors = sensor_ids.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Register a sensor whose recorder cannot be created
    pub fn failing_sensor(mut self, sensor_id: &str) -> Self {
        self.failing.push(sensor_id.to_string());
        self
    }

    pub fn stop_delay_ms(mut self, stop_delay_ms: u64) -> Self {
        self.config.controller.stop_delay_ms = stop_delay_ms;
        self
    }

    pub fn no_experiment(mut self) -> Self {
        self.experiment = None;
        self
    }

    pub fn alerts(mut self, alerts: impl AlertSink + 'static) -> Self {
        self.alerts = Some(Box::new(alerts));
        self
    }

    pub fn usage(mut self, usage: impl UsageTracker + 'static) -> Self {
        self.usage = Some(Box::new(usage));
        self
    }

    pub fn appearance(mut self, appearance: impl AppearanceProvider + 'static) -> Self {
        self.appearance = Some(Box::new(appearance));
        self
    }

    pub fn spawn(self) -> TestSession {
        let mut registry = SimulatedSensorRegistry::new();
        let mut sensors = HashMap::new();
        for sensor_id in &self.sensors {
            let handle = registry.add_manual(SensorSpec::new(sensor_id, sensor_id.to_uppercase()));
            sensors.insert(sensor_id.clone(), handle);
        }
        for sensor_id in &self.failing {
            registry.add_manual(SensorSpec::new(sensor_id, sensor_id.to_uppercase()));
            registry.set_fail_creation(sensor_id, true);
        }

        let persistence = InMemoryPersistence::new();
        let clock = ManualClock::new(1_000);
        let usage = CollectingUsageTracker::new();

        let mut collaborators =
            Collaborators::new(Box::new(registry), Arc::new(persistence.clone()))
                .with_clock(clock.clone())
                .with_usage(usage.clone());
        if let Some(alerts) = self.alerts {
            collaborators.alerts = alerts;
        }
        if let Some(tracker) = self.usage {
            collaborators.usage = tracker;
        }
        if let Some(appearance) = self.appearance {
            collaborators.appearance = appearance;
        }

        let (controller, handle) =
            SessionController::spawn(self.config, collaborators).expect("spawn recorder");
        controller.set_selected_experiment(self.experiment);

        TestSession {
            controller,
            handle: Some(handle),
            persistence,
            clock,
            usage,
            sensors,
        }
    }
}

impl Default for TestSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running controller plus handles to its collaborators
pub struct TestSession {
    pub controller: SessionController,
    handle: Option<JoinHandle<()>>,
    pub persistence: InMemoryPersistence,
    pub clock: ManualClock,
    pub usage: CollectingUsageTracker,
    sensors: HashMap<String, ManualSensorHandle>,
}

impl TestSession {
    /// Session with two manual sensors `s1` and `s2` and a selected experiment
    pub fn start() -> Self {
        TestSessionBuilder::new().spawn()
    }

    pub fn builder() -> TestSessionBuilder {
        TestSessionBuilder::new()
    }

    pub fn sensor(&self, sensor_id: &str) -> &ManualSensorHandle {
        &self.sensors[sensor_id]
    }

    /// Observe a sensor with a no-op observer
    pub fn observe(&self, sensor_id: &str, triggers: Vec<Trigger>) -> ObserverId {
        self.controller
            .start_observing(sensor_id, triggers, |_: &SensorReading| {}, NoopStatusListener, None)
            .wait()
            .expect("start observing")
    }

    /// Observe a sensor, collecting every reading
    pub fn observe_collecting(&self, sensor_id: &str) -> (ObserverId, Collected) {
        let collected: Collected = Arc::new(Mutex::new(Vec::new()));
        let sink = collected.clone();
        let id = self
            .controller
            .start_observing(
                sensor_id,
                Vec::new(),
                move |r: &SensorReading| sink.lock().unwrap().push(*r),
                NoopStatusListener,
                None,
            )
            .wait()
            .expect("start observing");
        (id, collected)
    }

    /// Wait until every command sent so far has been handled
    pub fn sync(&self) {
        self.controller.sync().wait().expect("sync");
    }

    /// Copy of the selected experiment
    pub fn experiment(&self) -> Experiment {
        self.controller
            .selected_experiment()
            .wait()
            .expect("selected experiment")
            .expect("an experiment is selected")
    }

    /// Shut the controller down and wait for its thread
    pub fn shutdown(&mut self) {
        self.controller.shutdown();
        if let Some(handle) = self.handle.take() {
            handle.join().expect("recorder thread panicked");
        }
    }
}

impl Drop for TestSession {
    fn drop(&mut self) {
        self.controller.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
