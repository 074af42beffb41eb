//! Recorder service thread
//!
//! The [`RecorderService`] owns every piece of mutable session state: the
//! stream table, listener registry, latest-value cache, recording status,
//! selected experiment and pause counter. It runs on its own thread and
//! drains [`RecorderCommand`]s from a crossbeam channel, one at a time.
//!
//! # Responsibilities
//!
//! - **Observation**: creates streams on demand and multiplexes observers
//! - **Recording**: runs the start and stop protocols against persistence
//! - **Triggers**: evaluates every reading and applies the planned effects
//! - **Pause/resume**: token-checked suspension of all observation
//! - **Delayed stop**: stops unobserved sensors once their grace period ends
//!
//! # Re-entrancy
//!
//! Collaborators never call back into the service directly. Sensor sinks and
//! persistence callbacks only enqueue commands, which the service handles on
//! a later turn. Trigger evaluation produces a list of effects that is
//! applied after the reading has been dispatched.

use crate::config::{AppConfig, ControllerSettings};
use crate::error::RecordingError;
use crate::sensors::{ReadingSink, SensorEvent, SensorEventKind, SensorRegistry};
use crate::services::{
    AppearanceProvider, Clock, Collaborators, PersistCallback, PersistenceService, UsageRecord,
    UsageTracker,
};
use crate::session::controller::SessionController;
use crate::session::listeners::{
    ListenerId, ListenerRegistry, ObservedIdsListener, ObservedIdsListeners, ObserverId,
    SensorObserver, SensorStatusListener, TriggerFiredListener, TriggerFiredListeners,
};
use crate::session::snapshot::{generate_snapshot_label_value, LatestValueCache};
use crate::session::state::{
    PauseToken, RecordingMetadata, RecordingOutcome, RecordingState, RecordingStatus,
};
use crate::session::status::StatusPublisher;
use crate::session::stream::{SensorStream, StreamTable};
use crate::triggers::{
    dispatch_alerts, plan_effects, AlertSink, EvaluationContext, Trigger, TriggerActionType,
    TriggerEffect, TriggerFiredEvent,
};
use crate::types::{
    Experiment, Label, LabelKind, SensorLayout, SensorOptions, SensorReading, SensorSpec,
    SensorStatus, SnapshotValue, Trial, TriggerNoteValue,
};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

/// Reply channel of a request
pub type Reply<T> = oneshot::Sender<Result<T, RecordingError>>;

/// Persistence call a completion belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistStep {
    /// New trial saved during start
    StartTrial { trial_id: String },
    /// Finalized trial saved during stop
    StopFinalize { trial_id: String },
    /// Post-processed trial flushed during stop
    StopPostProcess { trial_id: String },
    /// Label saved
    Label { label_id: String },
}

/// Message handled by the recorder service
pub enum RecorderCommand {
    /// Register an observer, creating and starting the stream if needed
    StartObserving {
        sensor_id: String,
        triggers: Vec<Trigger>,
        observer: Box<dyn SensorObserver>,
        status_listener: Box<dyn SensorStatusListener>,
        options: Option<SensorOptions>,
        reply: Reply<ObserverId>,
    },
    /// Unregister an observer
    StopObserving {
        sensor_id: String,
        observer_id: ObserverId,
    },
    /// Ask a sensor to reconnect
    Reboot {
        sensor_id: String,
        reply: Reply<bool>,
    },
    /// Forward recorder options
    ApplyOptions {
        sensor_id: String,
        options: SensorOptions,
    },
    /// Replace a sensor's triggers
    UpdateTriggers {
        sensor_id: String,
        triggers: Vec<Trigger>,
    },
    /// Select the experiment new trials are added to
    SetSelectedExperiment(Option<Experiment>),
    /// Set the layouts captured into trials
    SetSensorLayouts(Vec<SensorLayout>),
    /// Start recording
    StartRecording {
        user_initiated: bool,
        reply: Reply<RecordingOutcome>,
    },
    /// Stop recording and save the trial
    StopRecording { reply: Reply<RecordingOutcome> },
    /// Stop recording and drop the trial
    StopRecordingWithoutSaving { reply: Reply<RecordingOutcome> },
    /// Pause observation of every sensor
    PauseObservingAll { reply: Reply<PauseToken> },
    /// Resume observation if the token is current
    ResumeObservingAll {
        token: PauseToken,
        reply: Reply<bool>,
    },
    /// Build a snapshot from cached values
    GenerateSnapshot {
        sensor_ids: Vec<String>,
        reply: Reply<SnapshotValue>,
    },
    /// Build a snapshot and add it as a label
    TakeSnapshot {
        sensor_ids: Vec<String>,
        reply: Reply<Label>,
    },
    /// Add a text label
    AddLabel {
        text: String,
        timestamp_ms: i64,
        reply: Reply<Label>,
    },
    /// Latest cached reading of a sensor
    MostRecentValue {
        sensor_id: String,
        reply: Reply<Option<SensorReading>>,
    },
    /// Ids of sensors with a stream
    CurrentObservedIds { reply: Reply<Vec<String>> },
    /// Number of logical observers of a sensor
    ObserverCount {
        sensor_id: String,
        reply: Reply<usize>,
    },
    /// Copy of the selected experiment
    SelectedExperiment { reply: Reply<Option<Experiment>> },
    /// Register a trigger-fired listener
    AddTriggerFiredListener {
        listener: Box<dyn TriggerFiredListener>,
        reply: Reply<ListenerId>,
    },
    /// Unregister a trigger-fired listener
    RemoveTriggerFiredListener(ListenerId),
    /// Register an observed-ids listener under a key
    AddObservedIdsListener {
        key: String,
        listener: Box<dyn ObservedIdsListener>,
    },
    /// Unregister an observed-ids listener
    RemoveObservedIdsListener(String),
    /// Completes once every earlier command has been handled
    Sync { reply: Reply<()> },
    /// Stop the service
    Shutdown,
    /// Event from a sensor sink
    Sensor(SensorEvent),
    /// Completion of a persistence call
    PersistenceComplete {
        step: PersistStep,
        result: crate::error::Result<()>,
    },
}

impl std::fmt::Debug for RecorderCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderCommand::StartObserving { sensor_id, triggers, .. } => f
                .debug_struct("StartObserving")
                .field("sensor_id", sensor_id)
                .field("triggers", &triggers.len())
                .finish(),
            RecorderCommand::StopObserving {
                sensor_id,
                observer_id,
            } => f
                .debug_struct("StopObserving")
                .field("sensor_id", sensor_id)
                .field("observer_id", observer_id)
                .finish(),
            RecorderCommand::Reboot { sensor_id, .. } => {
                f.debug_struct("Reboot").field("sensor_id", sensor_id).finish()
            }
            RecorderCommand::ApplyOptions { sensor_id, options } => f
                .debug_struct("ApplyOptions")
                .field("sensor_id", sensor_id)
                .field("options", options)
                .finish(),
            RecorderCommand::UpdateTriggers {
                sensor_id,
                triggers,
            } => f
                .debug_struct("UpdateTriggers")
                .field("sensor_id", sensor_id)
                .field("triggers", &triggers.len())
                .finish(),
            RecorderCommand::SetSelectedExperiment(experiment) => f
                .debug_tuple("SetSelectedExperiment")
                .field(&experiment.as_ref().map(|e| &e.experiment_id))
                .finish(),
            RecorderCommand::SetSensorLayouts(layouts) => {
                f.debug_tuple("SetSensorLayouts").field(layouts).finish()
            }
            RecorderCommand::StartRecording { user_initiated, .. } => f
                .debug_struct("StartRecording")
                .field("user_initiated", user_initiated)
                .finish(),
            RecorderCommand::StopRecording { .. } => write!(f, "StopRecording"),
            RecorderCommand::StopRecordingWithoutSaving { .. } => {
                write!(f, "StopRecordingWithoutSaving")
            }
            RecorderCommand::PauseObservingAll { .. } => write!(f, "PauseObservingAll"),
            RecorderCommand::ResumeObservingAll { token, .. } => f
                .debug_struct("ResumeObservingAll")
                .field("token", token)
                .finish(),
            RecorderCommand::GenerateSnapshot { sensor_ids, .. } => f
                .debug_struct("GenerateSnapshot")
                .field("sensor_ids", sensor_ids)
                .finish(),
            RecorderCommand::TakeSnapshot { sensor_ids, .. } => f
                .debug_struct("TakeSnapshot")
                .field("sensor_ids", sensor_ids)
                .finish(),
            RecorderCommand::AddLabel {
                text, timestamp_ms, ..
            } => f
                .debug_struct("AddLabel")
                .field("text", text)
                .field("timestamp_ms", timestamp_ms)
                .finish(),
            RecorderCommand::MostRecentValue { sensor_id, .. } => f
                .debug_struct("MostRecentValue")
                .field("sensor_id", sensor_id)
                .finish(),
            RecorderCommand::CurrentObservedIds { .. } => write!(f, "CurrentObservedIds"),
            RecorderCommand::ObserverCount { sensor_id, .. } => f
                .debug_struct("ObserverCount")
                .field("sensor_id", sensor_id)
                .finish(),
            RecorderCommand::SelectedExperiment { .. } => write!(f, "SelectedExperiment"),
            RecorderCommand::AddTriggerFiredListener { .. } => write!(f, "AddTriggerFiredListener"),
            RecorderCommand::RemoveTriggerFiredListener(id) => f
                .debug_tuple("RemoveTriggerFiredListener")
                .field(id)
                .finish(),
            RecorderCommand::AddObservedIdsListener { key, .. } => f
                .debug_struct("AddObservedIdsListener")
                .field("key", key)
                .finish(),
            RecorderCommand::RemoveObservedIdsListener(key) => f
                .debug_tuple("RemoveObservedIdsListener")
                .field(key)
                .finish(),
            RecorderCommand::Sync { .. } => write!(f, "Sync"),
            RecorderCommand::Shutdown => write!(f, "Shutdown"),
            RecorderCommand::Sensor(event) => f.debug_tuple("Sensor").field(event).finish(),
            RecorderCommand::PersistenceComplete { step, result } => f
                .debug_struct("PersistenceComplete")
                .field("step", step)
                .field("ok", &result.is_ok())
                .finish(),
        }
    }
}

/// In-flight start or stop
enum Transition {
    Start {
        trial_id: String,
        user_initiated: bool,
        reply: Option<Reply<RecordingOutcome>>,
    },
    Stop {
        trial_id: String,
        reply: Option<Reply<RecordingOutcome>>,
    },
}

/// Deliver a result to the requester, or log it for trigger-initiated requests
fn respond<T>(reply: Option<Reply<T>>, result: Result<T, RecordingError>) {
    match reply {
        Some(reply) => {
            let _ = reply.send(result);
        }
        None => {
            if let Err(e) = result {
                tracing::warn!("Trigger-initiated recording change failed: {}", e);
            }
        }
    }
}

/// The recording controller's state owner
pub struct RecorderService {
    /// Controller tuning
    settings: ControllerSettings,
    /// Command queue
    command_rx: Receiver<RecorderCommand>,
    /// Sender handed to sinks and persistence callbacks
    command_tx: Sender<RecorderCommand>,
    /// Cleared by `Shutdown`
    running: bool,
    sensor_registry: Box<dyn SensorRegistry>,
    persistence: Arc<dyn PersistenceService>,
    appearance: Box<dyn AppearanceProvider>,
    alerts: Box<dyn AlertSink>,
    usage: Box<dyn UsageTracker>,
    clock: Arc<dyn Clock>,
    /// Sensor streams by id
    streams: StreamTable,
    /// Observers and status per sensor
    listeners: ListenerRegistry,
    /// Latest reading per observed sensor
    cache: LatestValueCache,
    /// Current recording status
    status: RecordingStatus,
    /// Multicast of `status`
    publisher: StatusPublisher,
    trigger_listeners: TriggerFiredListeners,
    observed_ids_listeners: ObservedIdsListeners,
    /// Ids last reported to observed-ids listeners
    last_observed_ids: Vec<String>,
    /// Experiment new trials go into
    experiment: Option<Experiment>,
    /// Layouts captured into trials
    sensor_layouts: Vec<SensorLayout>,
    /// Incremented by every pause
    pause_counter: u64,
    /// A pause is in force until its token resumes
    paused: bool,
    /// Start or stop waiting for persistence
    transition: Option<Transition>,
}

impl RecorderService {
    /// Create the service and its controller handle
    pub fn new(config: AppConfig, collaborators: Collaborators) -> (Self, SessionController) {
        let (command_tx, command_rx) = unbounded();
        let publisher = StatusPublisher::default();
        let settings = config.controller;

        let service = Self {
            streams: StreamTable::new(settings.stop_delay()),
            settings,
            command_rx,
            command_tx: command_tx.clone(),
            running: true,
            sensor_registry: collaborators.sensor_registry,
            persistence: collaborators.persistence,
            appearance: collaborators.appearance,
            alerts: collaborators.alerts,
            usage: collaborators.usage,
            clock: collaborators.clock,
            listeners: ListenerRegistry::new(),
            cache: LatestValueCache::new(),
            status: RecordingStatus::inactive(),
            publisher: publisher.clone(),
            trigger_listeners: TriggerFiredListeners::default(),
            observed_ids_listeners: ObservedIdsListeners::default(),
            last_observed_ids: Vec::new(),
            experiment: None,
            sensor_layouts: Vec::new(),
            pause_counter: 0,
            paused: false,
            transition: None,
        };

        (service, SessionController::new(command_tx, publisher))
    }

    /// Run until `Shutdown`
    pub fn run(mut self) {
        tracing::info!("Recorder service started");
        let idle = self.settings.idle_poll_interval();

        while self.running {
            match self.command_rx.recv_timeout(idle) {
                Ok(cmd) => {
                    self.handle_command(cmd);
                    self.process_commands();
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.running = false,
            }
            self.poll_stop_deadlines(Instant::now());
        }

        self.teardown();
        tracing::info!("Recorder service stopped");
    }

    /// Handle every queued command, returning how many ran
    ///
    /// Commands enqueued while handling (sensor events, persistence
    /// completions) are handled in the same call.
    pub fn process_commands(&mut self) -> usize {
        let mut handled = 0;
        while self.running {
            match self.command_rx.try_recv() {
                Ok(cmd) => {
                    self.handle_command(cmd);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        handled
    }

    /// Whether `Shutdown` has not been handled yet
    pub fn is_running(&self) -> bool {
        self.running
    }

    fn handle_command(&mut self, cmd: RecorderCommand) {
        match cmd {
            RecorderCommand::StartObserving {
                sensor_id,
                triggers,
                observer,
                status_listener,
                options,
                reply,
            } => {
                let id = self.start_observing(&sensor_id, triggers, observer, status_listener, options);
                let _ = reply.send(Ok(id));
            }
            RecorderCommand::StopObserving {
                sensor_id,
                observer_id,
            } => {
                self.stop_observing(&sensor_id, observer_id);
            }
            RecorderCommand::Reboot { sensor_id, reply } => {
                let _ = reply.send(Ok(self.reboot(&sensor_id)));
            }
            RecorderCommand::ApplyOptions { sensor_id, options } => {
                match self.streams.get_mut(&sensor_id) {
                    Some(stream) => stream.apply_options(&options),
                    None => tracing::debug!("No stream for '{}', options ignored", sensor_id),
                }
            }
            RecorderCommand::UpdateTriggers {
                sensor_id,
                triggers,
            } => match self.streams.get_mut(&sensor_id) {
                Some(stream) => stream.set_triggers(triggers),
                None => tracing::debug!("No stream for '{}', triggers ignored", sensor_id),
            },
            RecorderCommand::SetSelectedExperiment(experiment) => {
                self.set_selected_experiment(experiment);
            }
            RecorderCommand::SetSensorLayouts(layouts) => {
                self.sensor_layouts = layouts;
            }
            RecorderCommand::StartRecording {
                user_initiated,
                reply,
            } => {
                self.start_recording(user_initiated, Some(reply));
            }
            RecorderCommand::StopRecording { reply } => {
                self.stop_recording(Some(reply));
            }
            RecorderCommand::StopRecordingWithoutSaving { reply } => {
                let _ = reply.send(Ok(self.stop_recording_without_saving()));
            }
            RecorderCommand::PauseObservingAll { reply } => {
                let _ = reply.send(Ok(self.pause_observing_all()));
            }
            RecorderCommand::ResumeObservingAll { token, reply } => {
                let _ = reply.send(Ok(self.resume_observing_all(&token)));
            }
            RecorderCommand::GenerateSnapshot { sensor_ids, reply } => {
                let _ = reply.send(Ok(self.generate_snapshot(&sensor_ids)));
            }
            RecorderCommand::TakeSnapshot { sensor_ids, reply } => {
                let snapshot = self.generate_snapshot(&sensor_ids);
                let now = self.clock.now_ms();
                let label = Label::new(now, now, LabelKind::Snapshot(snapshot));
                let _ = reply.send(self.append_label(label));
            }
            RecorderCommand::AddLabel {
                text,
                timestamp_ms,
                reply,
            } => {
                let label = Label::new(timestamp_ms, self.clock.now_ms(), LabelKind::Text(text));
                let _ = reply.send(self.append_label(label));
            }
            RecorderCommand::MostRecentValue { sensor_id, reply } => {
                let _ = reply.send(Ok(self.cache.get(&sensor_id)));
            }
            RecorderCommand::CurrentObservedIds { reply } => {
                let _ = reply.send(Ok(self.streams.ids()));
            }
            RecorderCommand::ObserverCount { sensor_id, reply } => {
                let _ = reply.send(Ok(self.listeners.observer_count(&sensor_id)));
            }
            RecorderCommand::SelectedExperiment { reply } => {
                let _ = reply.send(Ok(self.experiment.clone()));
            }
            RecorderCommand::AddTriggerFiredListener { listener, reply } => {
                let _ = reply.send(Ok(self.trigger_listeners.add(listener)));
            }
            RecorderCommand::RemoveTriggerFiredListener(id) => {
                self.trigger_listeners.remove(id);
            }
            RecorderCommand::AddObservedIdsListener { key, listener } => {
                self.observed_ids_listeners.insert(key.clone(), listener);
                let ids = self.streams.ids();
                self.observed_ids_listeners.notify_one(&key, &ids);
            }
            RecorderCommand::RemoveObservedIdsListener(key) => {
                self.observed_ids_listeners.remove(&key);
            }
            RecorderCommand::Sync { reply } => {
                let _ = reply.send(Ok(()));
            }
            RecorderCommand::Shutdown => {
                self.running = false;
            }
            RecorderCommand::Sensor(event) => {
                self.handle_sensor_event(event);
            }
            RecorderCommand::PersistenceComplete { step, result } => {
                self.handle_persistence_complete(step, result);
            }
        }
    }

    // ==================== Status ====================

    fn set_status(&mut self, status: RecordingStatus) {
        tracing::debug!("Recording state: {} -> {}", self.status.state, status.state);
        self.status = status.clone();
        self.publisher.publish(status);
    }

    fn evaluation_context(&self) -> EvaluationContext {
        EvaluationContext {
            is_recording: self.status.state.is_recording(),
            transition_in_progress: self.status.state.is_transitioning(),
        }
    }

    fn is_connected(&self, sensor_id: &str) -> bool {
        self.listeners.is_source_connected_without_error(sensor_id)
            && self.sensor_registry.is_source_connected_without_error(sensor_id)
    }

    fn spec_for(&self, sensor_id: &str) -> SensorSpec {
        self.appearance
            .spec_for(sensor_id)
            .or_else(|| self.sensor_registry.spec_for_id(sensor_id))
            .unwrap_or_else(|| SensorSpec::unknown(sensor_id))
    }

    fn persist_callback(&self, step: PersistStep) -> PersistCallback {
        let tx = self.command_tx.clone();
        Box::new(move |result| {
            let _ = tx.send(RecorderCommand::PersistenceComplete { step, result });
        })
    }

    fn notify_observed_ids_if_changed(&mut self) {
        let ids = self.streams.ids();
        if ids != self.last_observed_ids {
            self.observed_ids_listeners.notify(&ids);
            self.last_observed_ids = ids;
        }
    }

    // ==================== Observation ====================

    fn start_observing(
        &mut self,
        sensor_id: &str,
        triggers: Vec<Trigger>,
        observer: Box<dyn SensorObserver>,
        status_listener: Box<dyn SensorStatusListener>,
        options: Option<SensorOptions>,
    ) -> ObserverId {
        let observer_id = self.listeners.put_listeners(sensor_id, observer, status_listener);

        if !self.streams.contains(sensor_id) {
            let stream = match self.sensor_registry.create_recorder(sensor_id) {
                Ok(recorder) => SensorStream::new(sensor_id, recorder),
                Err(e) => {
                    tracing::warn!("No recorder for sensor '{}': {}", sensor_id, e);
                    SensorStream::unavailable(sensor_id, e.to_string())
                }
            };
            self.streams.insert(stream);
        }

        let first_observer = self.listeners.install_service_observer(sensor_id);
        if first_observer {
            self.cache.track(sensor_id);
        }

        if let Some(stream) = self.streams.get_mut(sensor_id) {
            // Triggers belong to the service observer; later observers use update_triggers
            if first_observer {
                stream.set_triggers(triggers);
            } else if !triggers.is_empty() {
                tracing::debug!("'{}' already has triggers attached, new list ignored", sensor_id);
            }
            if let Some(options) = &options {
                stream.apply_options(options);
            }
            if stream.cancel_stop() {
                tracing::debug!("Sensor '{}' re-observed, delayed stop cancelled", sensor_id);
            }
        }

        self.ensure_observing(sensor_id);

        if self.status.state == RecordingState::Active {
            let trial_id = self.status.trial_id().map(str::to_string);
            if let (Some(trial_id), Some(stream)) = (trial_id, self.streams.get_mut(sensor_id)) {
                if !stream.is_recording() {
                    stream.start_recording(&trial_id);
                }
            }
        }

        self.notify_observed_ids_if_changed();
        tracing::debug!(
            "Observing '{}' ({} observers)",
            sensor_id,
            self.listeners.observer_count(sensor_id)
        );
        observer_id
    }

    /// Start the physical stream if it is idle
    fn ensure_observing(&mut self, sensor_id: &str) {
        match self.streams.get(sensor_id) {
            Some(stream) if !stream.is_observing() => {}
            _ => return,
        }

        let generation = self.streams.next_generation();
        let sink = ReadingSink::new(sensor_id, generation, self.command_tx.clone());
        let result = match self.streams.get_mut(sensor_id) {
            Some(stream) => stream.start_observing(sink, generation),
            None => return,
        };

        if let Err(e) = result {
            tracing::warn!("Failed to start observing '{}': {}", sensor_id, e);
            self.listeners.dispatch_status(sensor_id, SensorStatus::Disconnected);
            self.listeners.dispatch_error(sensor_id, &e.to_string());
        }
    }

    fn stop_observing(&mut self, sensor_id: &str, observer_id: ObserverId) {
        if !self.listeners.remove(sensor_id, observer_id) {
            tracing::debug!("Unknown observer {} for '{}'", observer_id, sensor_id);
            return;
        }
        if self.listeners.observer_count(sensor_id) > 0 {
            return;
        }

        let stop_delay = self.streams.stop_delay();
        let Some(stream) = self.streams.get_mut(sensor_id) else {
            self.listeners.remove_sensor(sensor_id);
            self.cache.remove(sensor_id);
            return;
        };

        if stream.is_recording() {
            tracing::debug!("'{}' unobserved while recording, kept until the recording stops", sensor_id);
            return;
        }

        if !stop_delay.is_zero() {
            stream.schedule_stop(Instant::now() + stop_delay);
            tracing::debug!("'{}' unobserved, stopping in {:?}", sensor_id, stop_delay);
            return;
        }

        stream.stop_observing();
        self.clean_up_unused_recorders();
    }

    /// Stop unobserved streams whose grace period has ended
    fn poll_stop_deadlines(&mut self, now: Instant) {
        let due = self.streams.due_stops(now);
        if due.is_empty() {
            return;
        }

        for sensor_id in due {
            let unobserved = self.listeners.observer_count(&sensor_id) == 0;
            if let Some(stream) = self.streams.get_mut(&sensor_id) {
                if unobserved && !stream.is_recording() {
                    tracing::debug!("Delayed stop of '{}'", sensor_id);
                    stream.stop_observing();
                } else {
                    stream.cancel_stop();
                }
            }
        }
        self.clean_up_unused_recorders();
    }

    /// Destroy streams that have no observers, are not recording and are
    /// not waiting for a delayed stop
    fn clean_up_unused_recorders(&mut self) {
        let unused: Vec<String> = self
            .streams
            .ids()
            .into_iter()
            .filter(|id| self.listeners.observer_count(id) == 0)
            .filter(|id| {
                self.streams
                    .get(id)
                    .map(|s| !s.is_recording() && !s.has_pending_stop())
                    .unwrap_or(false)
            })
            .collect();

        for sensor_id in unused {
            self.streams.remove(&sensor_id);
            self.listeners.remove_sensor(&sensor_id);
            self.cache.remove(&sensor_id);
            tracing::debug!("Released stream for '{}'", sensor_id);
        }
        self.notify_observed_ids_if_changed();
    }

    fn reboot(&mut self, sensor_id: &str) -> bool {
        let Some(stream) = self.streams.get_mut(sensor_id) else {
            tracing::debug!("Reboot of unknown sensor '{}'", sensor_id);
            return false;
        };

        if stream.is_available() {
            return match stream.reboot() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Reboot of '{}' failed: {}", sensor_id, e);
                    self.listeners.dispatch_error(sensor_id, &e.to_string());
                    false
                }
            };
        }

        match self.sensor_registry.create_recorder(sensor_id) {
            Ok(recorder) => {
                let was_observing = stream.is_observing();
                stream.replace_recorder(recorder);
                if was_observing {
                    self.ensure_observing(sensor_id);
                }
                true
            }
            Err(e) => {
                tracing::warn!("Sensor '{}' still unavailable: {}", sensor_id, e);
                false
            }
        }
    }

    fn pause_observing_all(&mut self) -> PauseToken {
        self.pause_counter += 1;
        self.paused = true;
        match self.status.state {
            RecordingState::Inactive => self.pause_streams(),
            // Applied if the start fails; a started recording keeps its streams
            RecordingState::Starting => {
                tracing::debug!("Pause {} deferred until the start completes", self.pause_counter)
            }
            _ => {}
        }
        PauseToken::from_counter(self.pause_counter)
    }

    fn pause_streams(&mut self) {
        for stream in self.streams.iter_mut() {
            stream.stop_observing();
        }
        self.clean_up_unused_recorders();
        tracing::debug!("Observation paused ({})", self.pause_counter);
    }

    fn resume_observing_all(&mut self, token: &PauseToken) -> bool {
        if token != &PauseToken::from_counter(self.pause_counter) {
            tracing::debug!("Stale resume token {} (current {})", token, self.pause_counter);
            return false;
        }

        self.paused = false;
        if !self.status.state.is_recording() {
            for sensor_id in self.streams.ids() {
                if self.listeners.observer_count(&sensor_id) > 0 {
                    self.ensure_observing(&sensor_id);
                }
            }
            tracing::debug!("Observation resumed ({})", token);
        }
        true
    }

    // ==================== Sensor events ====================

    fn handle_sensor_event(&mut self, event: SensorEvent) {
        let live = self
            .streams
            .get(&event.sensor_id)
            .map(|s| s.generation() == event.generation && (s.is_observing() || s.is_recording()))
            .unwrap_or(false);
        if !live {
            tracing::trace!("Dropping stale event from '{}'", event.sensor_id);
            return;
        }

        match event.kind {
            SensorEventKind::Reading(reading) => self.handle_reading(&event.sensor_id, reading),
            SensorEventKind::Status(status) => {
                tracing::debug!("Sensor '{}' status: {}", event.sensor_id, status);
                self.listeners.dispatch_status(&event.sensor_id, status);
            }
            SensorEventKind::Error(message) => {
                tracing::warn!("Sensor '{}' error: {}", event.sensor_id, message);
                self.listeners.dispatch_error(&event.sensor_id, &message);
            }
        }
    }

    fn handle_reading(&mut self, sensor_id: &str, reading: SensorReading) {
        let ctx = self.evaluation_context();
        let Some(stream) = self.streams.get_mut(sensor_id) else {
            return;
        };
        let previous = stream.record_value(reading.value);
        let effects = plan_effects(stream.triggers(), previous, reading, ctx);

        self.cache.update(sensor_id, reading);
        self.listeners.dispatch_reading(sensor_id, &reading);

        if !effects.is_empty() {
            self.apply_trigger_effects(sensor_id, effects);
        }
    }

    /// Apply planned trigger effects and notify listeners of those that
    /// took place
    fn apply_trigger_effects(&mut self, sensor_id: &str, effects: Vec<TriggerEffect>) {
        for effect in effects {
            let took_effect = match effect.action() {
                TriggerActionType::StartRecording => {
                    if self.status.state == RecordingState::Inactive {
                        self.start_recording(false, None);
                        self.status.state != RecordingState::Inactive
                    } else {
                        false
                    }
                }
                TriggerActionType::StopRecording => {
                    if self.status.state == RecordingState::Active {
                        self.stop_recording(None);
                        self.status.state != RecordingState::Active
                    } else {
                        false
                    }
                }
                TriggerActionType::Note => match self.add_trigger_note(sensor_id, &effect) {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!("Trigger note not added: {}", e);
                        false
                    }
                },
                TriggerActionType::Alert => {
                    dispatch_alerts(self.alerts.as_mut(), &effect.trigger);
                    true
                }
            };

            if took_effect {
                tracing::debug!(
                    "Trigger '{}' fired on '{}' ({})",
                    effect.trigger.trigger_id,
                    sensor_id,
                    effect.trigger.condition_text()
                );
                self.trigger_listeners.notify(&TriggerFiredEvent {
                    trigger: effect.trigger,
                    sensor_id: sensor_id.to_string(),
                    reading: effect.reading,
                });
            }
        }
    }

    // ==================== Labels ====================

    fn add_trigger_note(&mut self, sensor_id: &str, effect: &TriggerEffect) -> Result<Label, RecordingError> {
        let trigger = &effect.trigger;
        let note = TriggerNoteValue {
            trigger_id: trigger.trigger_id.clone(),
            sensor_id: sensor_id.to_string(),
            sensor_spec: self.spec_for(sensor_id),
            condition: trigger.condition_text(),
            value: effect.reading.value,
            note_text: trigger.note_text.clone(),
        };
        let label = Label::new(
            effect.reading.timestamp_ms,
            self.clock.now_ms(),
            LabelKind::TriggerNote(note),
        );
        self.append_label(label)
    }

    /// Add a label to the recording trial, or to the experiment when not
    /// recording, and save it
    fn append_label(&mut self, label: Label) -> Result<Label, RecordingError> {
        let trial_id = if self.status.state.is_recording() {
            self.status.trial_id().map(str::to_string)
        } else {
            None
        };
        let callback = self.persist_callback(PersistStep::Label {
            label_id: label.label_id.clone(),
        });
        let experiment = self
            .experiment
            .as_mut()
            .ok_or(RecordingError::NoExperimentSelected)?;

        let trial_index = trial_id
            .as_deref()
            .and_then(|id| experiment.trials.iter().position(|t| t.trial_id == id));
        match trial_index {
            Some(index) => experiment.trials[index].labels.push(label.clone()),
            None => experiment.labels.push(label.clone()),
        }

        self.persistence.update_experiment(experiment, callback);
        Ok(label)
    }

    fn generate_snapshot(&self, sensor_ids: &[String]) -> SnapshotValue {
        generate_snapshot_label_value(&self.cache, sensor_ids, |id| self.spec_for(id))
    }

    // ==================== Recording ====================

    fn set_selected_experiment(&mut self, experiment: Option<Experiment>) {
        if self.status.state != RecordingState::Inactive {
            tracing::warn!(
                "Experiment change ignored while recording is {}",
                self.status.state
            );
            return;
        }
        self.experiment = experiment;
    }

    fn start_recording(&mut self, user_initiated: bool, reply: Option<Reply<RecordingOutcome>>) {
        if self.status.state != RecordingState::Inactive {
            respond(reply, Ok(RecordingOutcome::Ignored(self.status.state)));
            return;
        }

        let observing = self.streams.observing_ids();
        if observing.is_empty() {
            respond(reply, Err(RecordingError::start_failed("no sensors are being observed")));
            return;
        }

        let disconnected: Vec<String> = observing
            .into_iter()
            .filter(|id| !self.is_connected(id))
            .collect();
        if !disconnected.is_empty() {
            respond(
                reply,
                Err(RecordingError::StartFailedDisconnected {
                    sensor_ids: disconnected,
                }),
            );
            return;
        }

        let trial_id = uuid::Uuid::new_v4().to_string();
        let callback = self.persist_callback(PersistStep::StartTrial {
            trial_id: trial_id.clone(),
        });
        let now = self.clock.now_ms();
        let layouts = self.sensor_layouts.clone();
        let Some(experiment) = self.experiment.as_mut() else {
            respond(reply, Err(RecordingError::start_failed("no experiment selected")));
            return;
        };

        let trial = Trial::new(trial_id.clone(), now, layouts, experiment.next_trial_index());
        experiment.trials.push(trial);

        self.transition = Some(Transition::Start {
            trial_id: trial_id.clone(),
            user_initiated,
            reply,
        });
        self.set_status(RecordingStatus::starting(user_initiated));
        tracing::info!("Starting recording of trial {}", trial_id);

        if let Some(experiment) = &self.experiment {
            self.persistence.update_experiment(experiment, callback);
        }
    }

    fn handle_persistence_complete(&mut self, step: PersistStep, result: crate::error::Result<()>) {
        match step {
            PersistStep::StartTrial { trial_id } => self.complete_start(&trial_id, result),
            PersistStep::StopFinalize { trial_id } => self.complete_stop_finalize(&trial_id, result),
            PersistStep::StopPostProcess { trial_id } => {
                self.complete_stop_post_process(&trial_id, result)
            }
            PersistStep::Label { label_id } => match result {
                Ok(()) => tracing::trace!("Label {} saved", label_id),
                Err(e) => tracing::error!("Failed to save label {}: {}", label_id, e),
            },
        }
    }

    fn complete_start(&mut self, trial_id: &str, result: crate::error::Result<()>) {
        let (user_initiated, reply) = match self.transition.take() {
            Some(Transition::Start {
                trial_id: pending,
                user_initiated,
                reply,
            }) if pending == trial_id => (user_initiated, reply),
            other => {
                tracing::debug!("Ignoring stale start completion for {}", trial_id);
                self.transition = other;
                return;
            }
        };

        if let Err(e) = result {
            tracing::error!("Failed to save new trial {}: {}", trial_id, e);
            if let Some(experiment) = self.experiment.as_mut() {
                experiment.remove_trial(trial_id);
            }
            self.revert_start();
            respond(
                reply,
                Err(RecordingError::start_failed(format!("could not save trial: {}", e))),
            );
            return;
        }

        let now = self.clock.now_ms();
        let metadata = match &self.experiment {
            Some(experiment) => RecordingMetadata {
                start_time_ms: experiment
                    .trial(trial_id)
                    .map(|t| t.recording_start_ms)
                    .unwrap_or(now),
                trial_id: trial_id.to_string(),
                experiment_display_name: experiment.display_name(),
            },
            None => {
                self.revert_start();
                respond(reply, Err(RecordingError::start_failed("no experiment selected")));
                return;
            }
        };

        for stream in self.streams.iter_mut() {
            if stream.is_observing() {
                stream.start_recording(trial_id);
            }
        }

        self.set_status(RecordingStatus::active(metadata.clone(), user_initiated));
        tracing::info!("Recording trial {}", trial_id);
        respond(reply, Ok(RecordingOutcome::Started(metadata)));
    }

    /// Back to inactive after a failed start, applying any pause made meanwhile
    fn revert_start(&mut self) {
        self.set_status(RecordingStatus::inactive());
        if self.paused {
            self.pause_streams();
        }
    }

    fn stop_recording(&mut self, reply: Option<Reply<RecordingOutcome>>) {
        if self.status.state != RecordingState::Active {
            respond(reply, Ok(RecordingOutcome::Ignored(self.status.state)));
            return;
        }

        let recording = self.streams.recording_ids();
        let disconnected: Vec<String> = recording
            .iter()
            .filter(|id| !self.is_connected(id))
            .cloned()
            .collect();
        if !disconnected.is_empty() {
            respond(
                reply,
                Err(RecordingError::StopFailedDisconnected {
                    sensor_ids: disconnected,
                }),
            );
            return;
        }

        let no_data: Vec<String> = recording
            .into_iter()
            .filter(|id| {
                self.streams
                    .get(id)
                    .map(|s| s.recorded_points() == 0)
                    .unwrap_or(false)
            })
            .collect();
        if !no_data.is_empty() {
            respond(reply, Err(RecordingError::StopFailedNoData { sensor_ids: no_data }));
            return;
        }

        let Some(trial_id) = self.status.trial_id().map(str::to_string) else {
            self.fail_stop(reply, "no trial is being recorded".to_string());
            return;
        };

        self.set_status(self.status.stopping());
        self.transition = Some(Transition::Stop {
            trial_id: trial_id.clone(),
            reply,
        });

        let end_ms = self.clock.now_ms();
        let layouts = self.sensor_layouts.clone();
        let callback = self.persist_callback(PersistStep::StopFinalize {
            trial_id: trial_id.clone(),
        });
        let Some(experiment) = self.experiment.as_mut() else {
            let reply = self.take_stop_reply();
            self.fail_stop(reply, "no experiment selected".to_string());
            return;
        };

        match experiment.trial_mut(&trial_id) {
            Some(trial) => trial.finalize(end_ms, layouts),
            None => tracing::warn!("Trial {} missing from experiment", trial_id),
        }
        tracing::info!("Stopping recording of trial {}", trial_id);
        self.persistence.update_experiment(experiment, callback);
    }

    fn take_stop_reply(&mut self) -> Option<Reply<RecordingOutcome>> {
        match self.transition.take() {
            Some(Transition::Stop { reply, .. }) => reply,
            other => {
                self.transition = other;
                None
            }
        }
    }

    fn is_pending_stop(&self, trial_id: &str) -> bool {
        matches!(&self.transition, Some(Transition::Stop { trial_id: pending, .. }) if pending == trial_id)
    }

    fn complete_stop_finalize(&mut self, trial_id: &str, result: crate::error::Result<()>) {
        if !self.is_pending_stop(trial_id) {
            tracing::debug!("Ignoring stale stop completion for {}", trial_id);
            return;
        }
        if let Err(e) = result {
            let reply = self.take_stop_reply();
            self.fail_stop(reply, e.to_string());
            return;
        }

        let sensor_ids = self.streams.recording_ids();
        for stream in self.streams.iter_mut() {
            stream.stop_recording();
        }

        let layouts = self
            .experiment
            .as_ref()
            .and_then(|e| e.trial(trial_id))
            .map(|t| t.sensor_layouts.clone())
            .unwrap_or_else(|| self.sensor_layouts.clone());
        self.usage
            .track_recording(&UsageRecord::new(trial_id, sensor_ids, &layouts));

        let callback = self.persist_callback(PersistStep::StopPostProcess {
            trial_id: trial_id.to_string(),
        });
        self.persistence.save_immediately(callback);
    }

    fn complete_stop_post_process(&mut self, trial_id: &str, result: crate::error::Result<()>) {
        if !self.is_pending_stop(trial_id) {
            tracing::debug!("Ignoring stale save completion for {}", trial_id);
            return;
        }
        let reply = self.take_stop_reply();
        if let Err(e) = result {
            self.fail_stop(reply, e.to_string());
            return;
        }

        self.close_out();
        tracing::info!("Recording of trial {} saved", trial_id);
        respond(
            reply,
            Ok(RecordingOutcome::Stopped {
                trial_id: trial_id.to_string(),
            }),
        );
    }

    /// Persistence failed while stopping: go inactive anyway and report it
    fn fail_stop(&mut self, reply: Option<Reply<RecordingOutcome>>, reason: String) {
        tracing::error!("Failed to save recording: {}", reason);
        for stream in self.streams.iter_mut() {
            stream.stop_recording();
        }
        self.close_out();
        respond(reply, Err(RecordingError::FailedSaveRecording { reason }));
    }

    fn close_out(&mut self) {
        self.clean_up_unused_recorders();
        self.set_status(RecordingStatus::inactive());
    }

    fn stop_recording_without_saving(&mut self) -> RecordingOutcome {
        if self.status.state != RecordingState::Active {
            return RecordingOutcome::Ignored(self.status.state);
        }
        let trial_id = self.status.trial_id().map(str::to_string).unwrap_or_default();

        for stream in self.streams.iter_mut() {
            stream.stop_recording();
        }
        if let Some(experiment) = self.experiment.as_mut() {
            experiment.remove_trial(&trial_id);
        }

        self.close_out();
        tracing::info!("Recording of trial {} discarded", trial_id);
        RecordingOutcome::Discarded { trial_id }
    }

    fn teardown(&mut self) {
        if self.status.state != RecordingState::Inactive {
            tracing::warn!("Shutting down while recording is {}", self.status.state);
        }
        self.transition = None;
        for sensor_id in self.streams.ids() {
            self.streams.remove(&sensor_id);
        }
        // Pending requests resolve as ControllerShutdown once their replies drop
        while self.command_rx.try_recv().is_ok() {}
    }
}
