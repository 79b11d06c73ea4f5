//! Per-source circuit breaker
//!
//! Consecutive permanent failures (auth, parse) trip the breaker and disable
//! the source for the remainder of the run. Any success resets the count.
//! "Not found" is a legitimate answer about the record, not about the source,
//! so it never counts.

use std::sync::Mutex;

use crate::types::FailureKind;

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            state: Mutex::new(BreakerState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state().consecutive_failures
    }

    /// Close the breaker and clear the count, at the start of a new run
    pub fn reset(&self) {
        *self.state() = BreakerState::default();
    }

    pub fn record_success(&self) {
        let mut state = self.state();
        if !state.open {
            state.consecutive_failures = 0;
        }
    }

    /// Returns true only on the call that trips the breaker
    pub fn record_failure(&self, kind: FailureKind) -> bool {
        if !counts_toward_trip(kind) {
            return false;
        }
        let mut state = self.state();
        if state.open {
            return false;
        }
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            state.open = true;
            return true;
        }
        false
    }
}

fn counts_toward_trip(kind: FailureKind) -> bool {
    matches!(kind, FailureKind::AuthError | FailureKind::ParseError)
}
