//! Single-slot resume signal between the worker thread and the controller.
//!
//! `set` wakes the waiter and stores nothing when no one is waiting, so a
//! "continue" issued while the worker is running never lets it skip the next
//! breakpoint. A waiter counts from `arm` (or the start of `wait`) until it
//! wakes. `release` is permanent until `reset` and is what abort uses.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Resumed,
    Released,
}

#[derive(Debug, Default)]
struct SignalState {
    epoch: u64,
    armed_at: u64,
    waiting: bool,
    released: bool,
}

#[derive(Debug, Default)]
pub struct ResumeSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl ResumeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the calling thread as the waiter ahead of `wait`, so a `set`
    /// issued in between is not lost.
    pub fn arm(&self) {
        let mut state = self.state.lock();
        if !state.waiting {
            state.waiting = true;
            state.armed_at = state.epoch;
        }
    }

    /// Parks the calling thread until `set` or `release`.
    pub fn wait(&self) -> WaitOutcome {
        let mut state = self.state.lock();
        if state.released {
            state.waiting = false;
            return WaitOutcome::Released;
        }
        if !state.waiting {
            state.waiting = true;
            state.armed_at = state.epoch;
        }
        let epoch = state.armed_at;
        while state.epoch == epoch && !state.released {
            self.cond.wait(&mut state);
        }
        state.waiting = false;
        if state.released {
            WaitOutcome::Released
        } else {
            WaitOutcome::Resumed
        }
    }

    /// Wakes the parked waiter. Returns `false` when no thread was waiting.
    pub fn set(&self) -> bool {
        let mut state = self.state.lock();
        if !state.waiting {
            return false;
        }
        state.epoch = state.epoch.wrapping_add(1);
        self.cond.notify_all();
        true
    }

    pub fn release(&self) {
        let mut state = self.state.lock();
        state.released = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.released = false;
        state.waiting = false;
    }

    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.state.lock().waiting
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }
}
