//! Listener registries
//!
//! [`ListenerRegistry`] multiplexes any number of logical observers onto one
//! physical sensor stream. Besides the logical observers, each observed
//! sensor carries one service observer: the controller's own hook that feeds
//! the latest-value cache and trigger evaluation. It is counted by
//! [`ListenerRegistry::count_listeners`] so callers can tell when only the
//! service observer remains.
//!
//! The trigger-fired and observed-ids registries are plain multi-subscriber
//! maps.

use crate::triggers::TriggerFiredEvent;
use crate::types::{SensorReading, SensorStatus};
use std::collections::{BTreeMap, HashMap};

/// Id of a logical observer, unique across all sensors
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(pub u64);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

/// Id of a trigger-fired listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

/// Receives readings of one sensor
pub trait SensorObserver: Send {
    /// Called for every reading, in arrival order
    fn on_new_data(&mut self, reading: &SensorReading);
}

impl<F> SensorObserver for F
where
    F: FnMut(&SensorReading) + Send,
{
    fn on_new_data(&mut self, reading: &SensorReading) {
        self(reading)
    }
}

/// Receives status changes and data source errors of one sensor
pub trait SensorStatusListener: Send {
    /// Connection status changed
    fn on_status_update(&mut self, _sensor_id: &str, _status: SensorStatus) {}

    /// The data source raised an error
    fn on_source_error(&mut self, _sensor_id: &str, _message: &str) {}
}

/// Status listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatusListener;

impl SensorStatusListener for NoopStatusListener {}

/// Receives trigger-fired events
pub trait TriggerFiredListener: Send {
    /// A trigger produced an effect
    fn on_trigger_fired(&mut self, event: &TriggerFiredEvent);
}

impl<F> TriggerFiredListener for F
where
    F: FnMut(&TriggerFiredEvent) + Send,
{
    fn on_trigger_fired(&mut self, event: &TriggerFiredEvent) {
        self(event)
    }
}

/// Receives the set of observed sensor ids whenever it changes
pub trait ObservedIdsListener: Send {
    /// Called with the sorted observed ids
    fn on_observed_ids_changed(&mut self, sensor_ids: &[String]);
}

impl<F> ObservedIdsListener for F
where
    F: FnMut(&[String]) + Send,
{
    fn on_observed_ids_changed(&mut self, sensor_ids: &[String]) {
        self(sensor_ids)
    }
}

struct LogicalObserver {
    observer: Box<dyn SensorObserver>,
    status_listener: Box<dyn SensorStatusListener>,
}

#[derive(Default)]
struct SensorListeners {
    observers: BTreeMap<ObserverId, LogicalObserver>,
    service_observer: bool,
    last_status: Option<SensorStatus>,
    error_since_status: bool,
}

/// Per-sensor observers and status listeners
#[derive(Default)]
pub struct ListenerRegistry {
    sensors: HashMap<String, SensorListeners>,
    next_id: u64,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a logical observer for a sensor
    pub fn put_listeners(
        &mut self,
        sensor_id: &str,
        observer: Box<dyn SensorObserver>,
        status_listener: Box<dyn SensorStatusListener>,
    ) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.sensors.entry(sensor_id.to_string()).or_default().observers.insert(
            id,
            LogicalObserver {
                observer,
                status_listener,
            },
        );
        id
    }

    /// Unregister a logical observer; unknown ids are ignored
    pub fn remove(&mut self, sensor_id: &str, observer_id: ObserverId) -> bool {
        self.sensors
            .get_mut(sensor_id)
            .map(|s| s.observers.remove(&observer_id).is_some())
            .unwrap_or(false)
    }

    /// Mark the service observer as installed for a sensor
    pub fn install_service_observer(&mut self, sensor_id: &str) -> bool {
        let entry = self.sensors.entry(sensor_id.to_string()).or_default();
        let newly = !entry.service_observer;
        entry.service_observer = true;
        newly
    }

    /// Forget a sensor entirely (observers, service observer and status)
    pub fn remove_sensor(&mut self, sensor_id: &str) {
        self.sensors.remove(sensor_id);
    }

    /// Logical observers plus the service observer
    pub fn count_listeners(&self, sensor_id: &str) -> usize {
        self.sensors
            .get(sensor_id)
            .map(|s| s.observers.len() + usize::from(s.service_observer))
            .unwrap_or(0)
    }

    /// Logical observers only
    pub fn observer_count(&self, sensor_id: &str) -> usize {
        self.sensors
            .get(sensor_id)
            .map(|s| s.observers.len())
            .unwrap_or(0)
    }

    /// Whether the last status was `Connected` and no error followed it
    pub fn is_source_connected_without_error(&self, sensor_id: &str) -> bool {
        self.sensors
            .get(sensor_id)
            .map(|s| s.last_status == Some(SensorStatus::Connected) && !s.error_since_status)
            .unwrap_or(false)
    }

    /// Deliver a reading to every logical observer of a sensor
    pub fn dispatch_reading(&mut self, sensor_id: &str, reading: &SensorReading) {
        if let Some(sensor) = self.sensors.get_mut(sensor_id) {
            for entry in sensor.observers.values_mut() {
                entry.observer.on_new_data(reading);
            }
        }
    }

    /// Record and deliver a status change
    pub fn dispatch_status(&mut self, sensor_id: &str, status: SensorStatus) {
        if let Some(sensor) = self.sensors.get_mut(sensor_id) {
            sensor.last_status = Some(status);
            sensor.error_since_status = false;
            for entry in sensor.observers.values_mut() {
                entry.status_listener.on_status_update(sensor_id, status);
            }
        }
    }

    /// Record and deliver a data source error
    pub fn dispatch_error(&mut self, sensor_id: &str, message: &str) {
        if let Some(sensor) = self.sensors.get_mut(sensor_id) {
            sensor.error_since_status = true;
            for entry in sensor.observers.values_mut() {
                entry.status_listener.on_source_error(sensor_id, message);
            }
        }
    }
}

/// Trigger-fired listeners keyed by controller-issued ids
#[derive(Default)]
pub struct TriggerFiredListeners {
    listeners: BTreeMap<ListenerId, Box<dyn TriggerFiredListener>>,
    next_id: u64,
}

impl TriggerFiredListeners {
    /// Add a listener
    pub fn add(&mut self, listener: Box<dyn TriggerFiredListener>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.insert(id, listener);
        id
    }

    /// Remove a listener
    pub fn remove(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(&id).is_some()
    }

    /// Notify every listener
    pub fn notify(&mut self, event: &TriggerFiredEvent) {
        for listener in self.listeners.values_mut() {
            listener.on_trigger_fired(event);
        }
    }

    /// Number of listeners
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether there are no listeners
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

/// Observed-ids listeners keyed by caller-supplied keys
#[derive(Default)]
pub struct ObservedIdsListeners {
    listeners: HashMap<String, Box<dyn ObservedIdsListener>>,
}

impl ObservedIdsListeners {
    /// Add or replace the listener under `key`
    pub fn insert(&mut self, key: String, listener: Box<dyn ObservedIdsListener>) {
        self.listeners.insert(key, listener);
    }

    /// Notify one listener
    pub fn notify_one(&mut self, key: &str, sensor_ids: &[String]) {
        if let Some(listener) = self.listeners.get_mut(key) {
            listener.on_observed_ids_changed(sensor_ids);
        }
    }

    /// Remove the listener under `key`
    pub fn remove(&mut self, key: &str) -> bool {
        self.listeners.remove(key).is_some()
    }

    /// Notify every listener
    pub fn notify(&mut self, sensor_ids: &[String]) {
        for listener in self.listeners.values_mut() {
            listener.on_observed_ids_changed(sensor_ids);
        }
    }
}
