//! Write gate for the in-memory backend.
//!
//! State sits behind one short-lived mutex that every call takes, so reads
//! never wait on a transaction. Writing additionally needs the gate's
//! writer slot: a transaction keeps it from its first write until it ends,
//! and another session that wants to write waits for it, up to a timeout.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::StorageError;
use crate::types::SessionId;

pub(crate) struct GateState<S> {
    pub writer: Option<SessionId>,
    pub inner: S,
}

pub(crate) struct Gate<S> {
    state: Mutex<GateState<S>>,
    released: Condvar,
}

impl<S> Gate<S> {
    pub fn new(inner: S) -> Self {
        Gate {
            state: Mutex::new(GateState {
                writer: None,
                inner,
            }),
            released: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, GateState<S>> {
        self.state.lock()
    }

    /// Locks the state with the writer slot held by `session`.
    ///
    /// Fails with [`StorageError::Busy`] if another session still holds the
    /// slot after `timeout`.
    pub fn write(
        &self,
        session: SessionId,
        timeout: Duration,
    ) -> Result<MutexGuard<'_, GateState<S>>, StorageError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock();
        while let Some(holder) = guard.writer.filter(|w| *w != session) {
            if self.released.wait_until(&mut guard, deadline).timed_out() {
                return Err(StorageError::Busy { holder });
            }
        }
        guard.writer = Some(session);
        Ok(guard)
    }

    /// Frees the writer slot and wakes waiting writers.
    pub fn release(&self, state: &mut GateState<S>) {
        state.writer = None;
        self.released.notify_all();
    }
}
