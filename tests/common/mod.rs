//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use fieldlog_rs::session::StatusSubscription;
use fieldlog_rs::{RecordingState, RecordingStatus};
use std::time::{Duration, Instant};

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Poll `condition` until it holds or the test timeout passes
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + test_timeout();
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Read statuses until one with `state` arrives
pub fn wait_for_state(status: &StatusSubscription, state: RecordingState) -> Option<RecordingStatus> {
    let deadline = Instant::now() + test_timeout();
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match status.recv_timeout(remaining) {
            Some(current) if current.state == state => return Some(current),
            Some(_) => continue,
            None => break,
        }
    }
    None
}

/// States delivered so far, in order
pub fn drain_states(status: &StatusSubscription) -> Vec<RecordingState> {
    status.drain().into_iter().map(|s| s.state).collect()
}
