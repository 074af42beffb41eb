//! Controller handle
//!
//! [`SessionController`] is the cloneable handle callers hold. Every method
//! enqueues a command for the recorder service and returns immediately.
//! Requests with a result hand back a [`PendingResult`] that can be awaited,
//! waited on from a plain thread, or polled.

use crate::config::AppConfig;
use crate::error::{RecordingError, Result, ResultExt};
use crate::services::Collaborators;
use crate::session::listeners::{
    ListenerId, ObservedIdsListener, ObserverId, SensorObserver, SensorStatusListener,
    TriggerFiredListener,
};
use crate::session::state::{PauseToken, RecordingOutcome, RecordingStatus};
use crate::session::status::{StatusPublisher, StatusSubscription};
use crate::session::worker::{RecorderCommand, RecorderService, Reply};
use crate::triggers::Trigger;
use crate::types::{
    Experiment, Label, SensorLayout, SensorOptions, SensorReading, SnapshotValue,
};
use crossbeam_channel::Sender;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use tokio::sync::oneshot;

/// Result of a request that completes on the recorder thread
///
/// Resolves to [`RecordingError::ControllerShutdown`] if the service stops
/// before answering.
#[derive(Debug)]
pub struct PendingResult<T> {
    receiver: oneshot::Receiver<std::result::Result<T, RecordingError>>,
}

impl<T> PendingResult<T> {
    pub(crate) fn channel() -> (Reply<T>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { receiver: rx })
    }

    /// Block the current thread until the result arrives
    ///
    /// Must not be called from an async context; `.await` it there instead.
    pub fn wait(self) -> std::result::Result<T, RecordingError> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(RecordingError::ControllerShutdown))
    }

    /// The result if it has arrived
    pub fn try_result(&mut self) -> Option<std::result::Result<T, RecordingError>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(RecordingError::ControllerShutdown)),
        }
    }
}

impl<T> Future for PendingResult<T> {
    type Output = std::result::Result<T, RecordingError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(RecordingError::ControllerShutdown)))
    }
}

/// Handle to a running recorder service
#[derive(Clone)]
pub struct SessionController {
    command_tx: Sender<RecorderCommand>,
    status: StatusPublisher,
}

impl SessionController {
    pub(crate) fn new(command_tx: Sender<RecorderCommand>, status: StatusPublisher) -> Self {
        Self { command_tx, status }
    }

    /// Start a recorder service on its own thread
    pub fn spawn(
        config: AppConfig,
        collaborators: Collaborators,
    ) -> Result<(Self, JoinHandle<()>)> {
        let (service, controller) = RecorderService::new(config, collaborators);
        let handle = std::thread::Builder::new()
            .name("fieldlog-recorder".to_string())
            .spawn(move || service.run())
            .context("Failed to spawn recorder thread")?;
        Ok((controller, handle))
    }

    fn send(&self, cmd: RecorderCommand) {
        if self.command_tx.send(cmd).is_err() {
            tracing::debug!("Recorder service is gone, command dropped");
        }
    }

    fn request<T>(&self, build: impl FnOnce(Reply<T>) -> RecorderCommand) -> PendingResult<T> {
        let (reply, pending) = PendingResult::channel();
        self.send(build(reply));
        pending
    }

    // ==================== Status ====================

    /// Subscribe to recording status changes, starting with the current one
    pub fn watch_status(&self) -> StatusSubscription {
        self.status.subscribe()
    }

    /// The most recently published status
    pub fn current_status(&self) -> RecordingStatus {
        self.status.current()
    }

    // ==================== Observation ====================

    /// Observe a sensor with the given triggers
    ///
    /// Triggers are attached by the first observer of a sensor only; use
    /// [`update_triggers`](Self::update_triggers) to change them. Options,
    /// when given, are forwarded to the recorder.
    pub fn start_observing(
        &self,
        sensor_id: impl Into<String>,
        triggers: Vec<Trigger>,
        observer: impl SensorObserver + 'static,
        status_listener: impl SensorStatusListener + 'static,
        options: Option<SensorOptions>,
    ) -> PendingResult<ObserverId> {
        let sensor_id = sensor_id.into();
        self.request(|reply| RecorderCommand::StartObserving {
            sensor_id,
            triggers,
            observer: Box::new(observer),
            status_listener: Box::new(status_listener),
            options,
            reply,
        })
    }

    /// Stop delivering readings to an observer
    pub fn stop_observing(&self, sensor_id: impl Into<String>, observer_id: ObserverId) {
        self.send(RecorderCommand::StopObserving {
            sensor_id: sensor_id.into(),
            observer_id,
        });
    }

    /// Ask a sensor to reconnect; resolves to whether the reboot succeeded
    pub fn reboot(&self, sensor_id: impl Into<String>) -> PendingResult<bool> {
        let sensor_id = sensor_id.into();
        self.request(|reply| RecorderCommand::Reboot { sensor_id, reply })
    }

    /// Forward options to a sensor's recorder, if it has one
    pub fn apply_options(&self, sensor_id: impl Into<String>, options: SensorOptions) {
        self.send(RecorderCommand::ApplyOptions {
            sensor_id: sensor_id.into(),
            options,
        });
    }

    /// Replace the triggers of an observed sensor
    pub fn update_triggers(&self, sensor_id: impl Into<String>, triggers: Vec<Trigger>) {
        self.send(RecorderCommand::UpdateTriggers {
            sensor_id: sensor_id.into(),
            triggers,
        });
    }

    /// Pause observation of every sensor while no recording is running
    pub fn pause_observing_all(&self) -> PendingResult<PauseToken> {
        self.request(|reply| RecorderCommand::PauseObservingAll { reply })
    }

    /// Resume observation; only the token of the latest pause has an effect
    pub fn resume_observing_all(&self, token: PauseToken) -> PendingResult<bool> {
        self.request(|reply| RecorderCommand::ResumeObservingAll { token, reply })
    }

    /// Latest cached reading of an observed sensor
    pub fn most_recent_value(&self, sensor_id: impl Into<String>) -> PendingResult<Option<SensorReading>> {
        let sensor_id = sensor_id.into();
        self.request(|reply| RecorderCommand::MostRecentValue { sensor_id, reply })
    }

    /// Sorted ids of sensors that currently have a stream
    pub fn current_observed_ids(&self) -> PendingResult<Vec<String>> {
        self.request(|reply| RecorderCommand::CurrentObservedIds { reply })
    }

    /// Number of logical observers of a sensor
    pub fn observer_count(&self, sensor_id: impl Into<String>) -> PendingResult<usize> {
        let sensor_id = sensor_id.into();
        self.request(|reply| RecorderCommand::ObserverCount { sensor_id, reply })
    }

    // ==================== Recording ====================

    /// Select the experiment new trials are added to
    ///
    /// Ignored unless the recording state is inactive.
    pub fn set_selected_experiment(&self, experiment: Option<Experiment>) {
        self.send(RecorderCommand::SetSelectedExperiment(experiment));
    }

    /// Copy of the selected experiment, including unsaved changes
    pub fn selected_experiment(&self) -> PendingResult<Option<Experiment>> {
        self.request(|reply| RecorderCommand::SelectedExperiment { reply })
    }

    /// Layouts captured into the next trial
    pub fn set_sensor_layouts(&self, layouts: Vec<SensorLayout>) {
        self.send(RecorderCommand::SetSensorLayouts(layouts));
    }

    /// Start a trial in the selected experiment
    pub fn start_recording(&self, user_initiated: bool) -> PendingResult<RecordingOutcome> {
        self.request(|reply| RecorderCommand::StartRecording {
            user_initiated,
            reply,
        })
    }

    /// Stop the active recording and save the trial
    pub fn stop_recording(&self) -> PendingResult<RecordingOutcome> {
        self.request(|reply| RecorderCommand::StopRecording { reply })
    }

    /// Stop recording and drop the trial instead of saving it
    pub fn stop_recording_without_saving(&self) -> PendingResult<RecordingOutcome> {
        self.request(|reply| RecorderCommand::StopRecordingWithoutSaving { reply })
    }

    // ==================== Labels ====================

    /// Snapshot of the cached values of the given sensors
    pub fn generate_snapshot_label_value(&self, sensor_ids: Vec<String>) -> PendingResult<SnapshotValue> {
        self.request(|reply| RecorderCommand::GenerateSnapshot { sensor_ids, reply })
    }

    /// Snapshot the given sensors and add it as a label
    pub fn take_snapshot(&self, sensor_ids: Vec<String>) -> PendingResult<Label> {
        self.request(|reply| RecorderCommand::TakeSnapshot { sensor_ids, reply })
    }

    /// Add a text label at `timestamp_ms`
    pub fn add_label(&self, text: impl Into<String>, timestamp_ms: i64) -> PendingResult<Label> {
        let text = text.into();
        self.request(|reply| RecorderCommand::AddLabel {
            text,
            timestamp_ms,
            reply,
        })
    }

    // ==================== Listeners ====================

    /// Listen for triggers that took effect
    pub fn add_trigger_fired_listener(
        &self,
        listener: impl TriggerFiredListener + 'static,
    ) -> PendingResult<ListenerId> {
        self.request(|reply| RecorderCommand::AddTriggerFiredListener {
            listener: Box::new(listener),
            reply,
        })
    }

    /// Unregister a trigger-fired listener
    pub fn remove_trigger_fired_listener(&self, id: ListenerId) {
        self.send(RecorderCommand::RemoveTriggerFiredListener(id));
    }

    /// Register a listener for the observed id set under `key`
    ///
    /// The listener is called with the current set right away.
    pub fn add_observed_ids_listener(
        &self,
        key: impl Into<String>,
        listener: impl ObservedIdsListener + 'static,
    ) {
        self.send(RecorderCommand::AddObservedIdsListener {
            key: key.into(),
            listener: Box::new(listener),
        });
    }

    /// Unregister the observed-ids listener under `key`
    pub fn remove_observed_ids_listener(&self, key: impl Into<String>) {
        self.send(RecorderCommand::RemoveObservedIdsListener(key.into()));
    }

    // ==================== Lifecycle ====================

    /// Resolves once every command sent before it has been handled
    pub fn sync(&self) -> PendingResult<()> {
        self.request(|reply| RecorderCommand::Sync { reply })
    }

    /// Stop the recorder service
    pub fn shutdown(&self) {
        self.send(RecorderCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_result_after_reply() {
        let (reply, mut pending) = PendingResult::<u32>::channel();
        assert!(pending.try_result().is_none());
        reply.send(Ok(7)).unwrap();
        assert_eq!(pending.try_result(), Some(Ok(7)));
    }

    #[test]
    fn test_dropped_reply_is_shutdown() {
        let (reply, pending) = PendingResult::<u32>::channel();
        drop(reply);
        assert_eq!(pending.wait(), Err(RecordingError::ControllerShutdown));
    }

    #[test]
    fn test_requests_after_service_dropped() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let controller = SessionController::new(tx, StatusPublisher::default());
        drop(rx);
        assert_eq!(
            controller.start_recording(true).wait(),
            Err(RecordingError::ControllerShutdown)
        );
    }

    #[tokio::test]
    async fn test_pending_result_is_awaitable() {
        let (reply, pending) = PendingResult::<&str>::channel();
        reply.send(Ok("done")).unwrap();
        assert_eq!(pending.await, Ok("done"));
    }
}
