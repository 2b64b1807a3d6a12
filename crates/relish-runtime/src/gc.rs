//! GC safe-point coordination.
//!
//! Interpreter threads are mutators. A mutator is *running* unless it has
//! declared a safe point with `allow_gc` (around channel waits, sleeps and
//! other blocking calls). A collection may only proceed while no mutator is
//! running, and no mutator may resume running while a collection is in
//! progress.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct GcState {
    /// Mutators outside a safe point.
    running: usize,
    collecting: bool,
    collections: u64,
}

#[derive(Debug, Default)]
pub struct GcCoordinator {
    state: Mutex<GcState>,
    changed: Condvar,
}

impl GcCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mutator leaves a safe point, waiting out any collection in progress.
    pub fn enter_mutator(&self) {
        let mut state = self.state.lock();
        while state.collecting {
            self.changed.wait(&mut state);
        }
        state.running += 1;
    }

    /// A mutator reaches a safe point.
    pub fn leave_mutator(&self) {
        let mut state = self.state.lock();
        state.running = state.running.saturating_sub(1);
        if state.running == 0 {
            self.changed.notify_all();
        }
    }

    pub fn running(&self) -> usize {
        self.state.lock().running
    }

    pub fn collections(&self) -> u64 {
        self.state.lock().collections
    }

    /// Runs `collect` once every mutator is at a safe point. Gives up and
    /// returns `None` if that does not happen within `wait`.
    pub fn try_collect<T>(&self, wait: Duration, collect: impl FnOnce() -> T) -> Option<T> {
        let deadline = Instant::now() + wait;
        {
            let mut state = self.state.lock();
            if state.collecting {
                return None;
            }
            state.collecting = true;
            while state.running > 0 {
                if self.changed.wait_until(&mut state, deadline).timed_out() && state.running > 0 {
                    state.collecting = false;
                    self.changed.notify_all();
                    return None;
                }
            }
        }

        let result = collect();

        let mut state = self.state.lock();
        state.collecting = false;
        state.collections += 1;
        self.changed.notify_all();
        Some(result)
    }
}
