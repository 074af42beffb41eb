//! FieldLog Demo - Main Entry Point
//!
//! Runs the recording controller against simulated sensors. Every configured
//! sensor is observed, a trigger on the first one starts a recording, and the
//! trial is saved after the configured recording time.

use anyhow::{anyhow, Context};
use fieldlog_rs::{
    config::AppConfig,
    sensors::SimulatedSensorRegistry,
    services::{Collaborators, InMemoryPersistence},
    session::{format_snapshot, SensorStatusListener, StatusSubscription},
    triggers::{Trigger, TriggerActionType, TriggerWhen},
    types::{Experiment, LabelKind, SensorLayout, SensorReading, SensorSpec, SensorStatus},
    RecordingOutcome, RecordingState, SessionController,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long to wait for the start trigger before starting manually
const TRIGGER_WAIT: Duration = Duration::from_secs(10);

struct LoggingStatusListener;

impl SensorStatusListener for LoggingStatusListener {
    fn on_status_update(&mut self, sensor_id: &str, status: SensorStatus) {
        tracing::info!("Sensor '{}' is {}", sensor_id, status);
    }

    fn on_source_error(&mut self, sensor_id: &str, message: &str) {
        tracing::warn!("Sensor '{}' reported an error: {}", sensor_id, message);
    }
}

fn init_logging(config: &AppConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));

    let (file_layer, guard) = match &config.logging.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "fieldlog.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}

/// Wait until the status stream reports `target`
async fn wait_for_state(status: &StatusSubscription, target: RecordingState, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        while let Some(current) = status.try_recv() {
            if current.state == target {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load_or_default();
    let _log_guard = init_logging(&config);

    tracing::info!("Starting FieldLog demo");

    let simulation = &config.simulation;
    let first = simulation
        .sensors
        .first()
        .ok_or_else(|| anyhow!("No simulated sensors configured"))?;

    let mut registry = SimulatedSensorRegistry::new();
    for sensor in &simulation.sensors {
        registry.add_pattern(
            SensorSpec::new(&sensor.sensor_id, &sensor.name).with_units(&sensor.units),
            sensor.pattern,
            sensor.rate_hz,
        );
    }

    let persistence = Arc::new(InMemoryPersistence::new());
    let collaborators = Collaborators::new(Box::new(registry), persistence.clone());
    let (controller, handle) = SessionController::spawn(config.clone(), collaborators)
        .context("Failed to start recorder service")?;

    let experiment = Experiment::new(uuid::Uuid::new_v4().to_string(), "Demo experiment");
    controller.set_selected_experiment(Some(experiment));
    controller.set_sensor_layouts(
        simulation
            .sensors
            .iter()
            .map(|s| SensorLayout::new(s.sensor_id.clone()))
            .collect(),
    );

    let status = controller.watch_status();

    for sensor in &simulation.sensors {
        let triggers = if sensor.sensor_id == first.sensor_id {
            vec![
                Trigger::new(
                    "demo-start",
                    &sensor.sensor_id,
                    TriggerActionType::StartRecording,
                    TriggerWhen::Above,
                    simulation.start_threshold,
                ),
                Trigger::new(
                    "demo-note",
                    &sensor.sensor_id,
                    TriggerActionType::Note,
                    TriggerWhen::DropsBelow,
                    0.0,
                )
                .only_when_recording()
                .with_note_text("crossed zero"),
            ]
        } else {
            Vec::new()
        };

        let observer_id = controller
            .start_observing(
                sensor.sensor_id.clone(),
                triggers,
                |_: &SensorReading| {},
                LoggingStatusListener,
                None,
            )
            .await?;
        tracing::debug!("Observing '{}' as {}", sensor.sensor_id, observer_id);
    }

    tracing::info!(
        "Waiting for '{}' to rise above {}",
        first.sensor_id,
        simulation.start_threshold
    );
    if !wait_for_state(&status, RecordingState::Active, TRIGGER_WAIT).await {
        tracing::info!("Start trigger did not fire, starting manually");
        controller.start_recording(true).await?;
    }

    tokio::time::sleep(Duration::from_secs(simulation.record_seconds)).await;

    let ids = simulation.sensors.iter().map(|s| s.sensor_id.clone()).collect();
    let label = controller.take_snapshot(ids).await?;
    if let LabelKind::Snapshot(snapshot) = &label.kind {
        tracing::info!("Snapshot:\n{}", format_snapshot(snapshot));
    }

    match controller.stop_recording().await {
        Ok(RecordingOutcome::Stopped { trial_id }) => tracing::info!("Saved trial {}", trial_id),
        Ok(other) => tracing::warn!("Stop had no effect: {:?}", other),
        Err(e) => tracing::error!("Failed to stop recording: {}", e),
    }

    if let Some(experiment) = controller.selected_experiment().await? {
        for trial in &experiment.trials {
            tracing::info!(
                "Trial {} ({}): {} ms, {} labels",
                trial.auto_index,
                trial.trial_id,
                trial.duration_ms().unwrap_or_default(),
                trial.labels.len()
            );
        }
    }
    tracing::info!(
        "Persistence saw {} updates and {} saves",
        persistence.update_calls(),
        persistence.save_calls()
    );

    controller.shutdown();
    handle
        .join()
        .map_err(|_| anyhow!("Recorder thread panicked"))?;

    tracing::info!("FieldLog demo finished");
    Ok(())
}
