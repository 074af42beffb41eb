//! Replay-last multicast of the recording status
//!
//! The controller thread is the only publisher. Every subscriber gets its own
//! unbounded channel and receives the current status as soon as it
//! subscribes, followed by every later status in publication order.

use super::state::RecordingStatus;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

struct PublisherState {
    current: RecordingStatus,
    subscribers: Vec<Sender<RecordingStatus>>,
}

/// Shared status publisher
#[derive(Clone)]
pub struct StatusPublisher {
    state: Arc<Mutex<PublisherState>>,
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new(RecordingStatus::inactive())
    }
}

impl StatusPublisher {
    /// Create a publisher holding `initial`
    pub fn new(initial: RecordingStatus) -> Self {
        Self {
            state: Arc::new(Mutex::new(PublisherState {
                current: initial,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Replace the current status and deliver it to every subscriber
    ///
    /// Subscribers whose receiving end was dropped are forgotten.
    pub fn publish(&self, status: RecordingStatus) {
        let mut state = self.state.lock();
        state
            .subscribers
            .retain(|tx| tx.send(status.clone()).is_ok());
        state.current = status;
    }

    /// Subscribe; the current status is delivered first
    pub fn subscribe(&self) -> StatusSubscription {
        let (tx, rx) = unbounded();
        let mut state = self.state.lock();
        let _ = tx.send(state.current.clone());
        state.subscribers.push(tx);
        StatusSubscription { receiver: rx }
    }

    /// The most recently published status
    pub fn current(&self) -> RecordingStatus {
        self.state.lock().current.clone()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

/// Receiving end of a status subscription
pub struct StatusSubscription {
    receiver: Receiver<RecordingStatus>,
}

impl StatusSubscription {
    /// Next status without blocking
    pub fn try_recv(&self) -> Option<RecordingStatus> {
        self.receiver.try_recv().ok()
    }

    /// Next status, waiting up to `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Option<RecordingStatus> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// All statuses received so far
    pub fn drain(&self) -> Vec<RecordingStatus> {
        self.receiver.try_iter().collect()
    }
}
