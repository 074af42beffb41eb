//! Experiment persistence
//!
//! Every call is asynchronous: the service receives a [`PersistCallback`]
//! and invokes it exactly once, from any thread, when the operation has
//! finished. The controller's callbacks only enqueue a completion message,
//! so a service may also complete synchronously from inside the call.

use crate::error::{FieldLogError, Result};
use crate::types::Experiment;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Completion callback of a persistence call
pub type PersistCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Durable storage for experiments
pub trait PersistenceService: Send + Sync {
    /// Store the given experiment (with its trials and labels)
    fn update_experiment(&self, experiment: &Experiment, done: PersistCallback);

    /// Flush anything buffered to durable storage
    fn save_immediately(&self, done: PersistCallback);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    UpdateExperiment,
    SaveImmediately,
}

#[derive(Default)]
struct StoreState {
    experiments: HashMap<String, Experiment>,
    fail_updates: bool,
    fail_saves: bool,
    hold: bool,
    held: Vec<(Operation, Option<Experiment>, PersistCallback)>,
    update_calls: usize,
    save_calls: usize,
}

/// Persistence that keeps experiments in memory
///
/// Supports failure injection and a hold mode in which completions are
/// queued until [`InMemoryPersistence::release_held`] is called, which lets
/// tests observe the `Starting` and `Stopping` states.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    state: Arc<Mutex<StoreState>>,
}

impl std::fmt::Debug for InMemoryPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryPersistence")
            .field("experiments", &state.experiments.len())
            .field("held", &state.held.len())
            .finish()
    }
}

impl InMemoryPersistence {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `update_experiment` fail
    pub fn set_fail_updates(&self, fail: bool) {
        self.state.lock().fail_updates = fail;
    }

    /// Make `save_immediately` fail
    pub fn set_fail_saves(&self, fail: bool) {
        self.state.lock().fail_saves = fail;
    }

    /// Queue completions instead of running them
    pub fn set_hold(&self, hold: bool) {
        self.state.lock().hold = hold;
    }

    /// Number of queued completions
    pub fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }

    /// Complete every queued call in order, returning how many ran
    pub fn release_held(&self) -> usize {
        let held = std::mem::take(&mut self.state.lock().held);
        let count = held.len();
        for (operation, experiment, done) in held {
            let result = self.complete(operation, experiment);
            done(result);
        }
        count
    }

    /// Stored copy of an experiment
    pub fn experiment(&self, experiment_id: &str) -> Option<Experiment> {
        self.state.lock().experiments.get(experiment_id).cloned()
    }

    /// Number of `update_experiment` calls
    pub fn update_calls(&self) -> usize {
        self.state.lock().update_calls
    }

    /// Number of `save_immediately` calls
    pub fn save_calls(&self) -> usize {
        self.state.lock().save_calls
    }

    fn complete(&self, operation: Operation, experiment: Option<Experiment>) -> Result<()> {
        let mut state = self.state.lock();
        match operation {
            Operation::UpdateExperiment => {
                if state.fail_updates {
                    return Err(FieldLogError::Persistence(
                        "failed to update experiment".to_string(),
                    ));
                }
                if let Some(experiment) = experiment {
                    state
                        .experiments
                        .insert(experiment.experiment_id.clone(), experiment);
                }
                Ok(())
            }
            Operation::SaveImmediately => {
                if state.fail_saves {
                    return Err(FieldLogError::Persistence("failed to save".to_string()));
                }
                Ok(())
            }
        }
    }

    fn submit(&self, operation: Operation, experiment: Option<Experiment>, done: PersistCallback) {
        {
            let mut state = self.state.lock();
            match operation {
                Operation::UpdateExperiment => state.update_calls += 1,
                Operation::SaveImmediately => state.save_calls += 1,
            }
            if state.hold {
                state.held.push((operation, experiment, done));
                return;
            }
        }
        let result = self.complete(operation, experiment);
        done(result);
    }
}

impl PersistenceService for InMemoryPersistence {
    fn update_experiment(&self, experiment: &Experiment, done: PersistCallback) {
        self.submit(Operation::UpdateExperiment, Some(experiment.clone()), done);
    }

    fn save_immediately(&self, done: PersistCallback) {
        self.submit(Operation::SaveImmediately, None, done);
    }
}
