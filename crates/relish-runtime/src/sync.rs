//! Mutex and read-write mutex values.
//!
//! These are first-class values, so lock and unlock happen in separate
//! primitive calls rather than through a guard. Unlocking a mutex that is
//! not held fails with [`RuntimeError::UnbalancedUnlock`].

use parking_lot::{Condvar, Mutex};

use crate::error::RuntimeError;

#[derive(Debug, Default)]
pub struct RMutex {
    locked: Mutex<bool>,
    released: Condvar,
}

impl RMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.released.wait(&mut locked);
        }
        *locked = true;
    }

    pub fn try_lock(&self) -> bool {
        let mut locked = self.locked.lock();
        !std::mem::replace(&mut *locked, true)
    }

    pub fn unlock(&self) -> Result<(), RuntimeError> {
        let mut locked = self.locked.lock();
        if !*locked {
            return Err(RuntimeError::UnbalancedUnlock { kind: "Mutex" });
        }
        *locked = false;
        self.released.notify_one();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RwState {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
}

/// Writer-preferring read-write mutex.
#[derive(Debug, Default)]
pub struct RRwMutex {
    state: Mutex<RwState>,
    changed: Condvar,
}

impl RRwMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            self.changed.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = true;
    }

    pub fn unlock(&self) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        if !state.writer {
            return Err(RuntimeError::UnbalancedUnlock { kind: "RwMutex" });
        }
        state.writer = false;
        self.changed.notify_all();
        Ok(())
    }

    pub fn rlock(&self) {
        let mut state = self.state.lock();
        while state.writer || state.waiting_writers > 0 {
            self.changed.wait(&mut state);
        }
        state.readers += 1;
    }

    pub fn runlock(&self) -> Result<(), RuntimeError> {
        let mut state = self.state.lock();
        if state.readers == 0 {
            return Err(RuntimeError::UnbalancedUnlock { kind: "RwMutex" });
        }
        state.readers -= 1;
        if state.readers == 0 {
            self.changed.notify_all();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn unbalanced_unlock_is_an_error() {
        let m = RMutex::new();
        assert!(matches!(
            m.unlock(),
            Err(RuntimeError::UnbalancedUnlock { kind: "Mutex" })
        ));
        let rw = RRwMutex::new();
        assert!(rw.unlock().is_err());
        assert!(rw.runlock().is_err());
    }

    #[test]
    fn mutex_excludes() {
        let m = Arc::new(RMutex::new());
        m.lock();
        assert!(!m.try_lock());
        let waiter = {
            let m = Arc::clone(&m);
            thread::spawn(move || {
                m.lock();
                m.unlock().unwrap();
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());
        m.unlock().unwrap();
        waiter.join().unwrap();
        assert!(m.try_lock());
    }

    #[test]
    fn readers_share_writers_wait() {
        let rw = Arc::new(RRwMutex::new());
        rw.rlock();
        rw.rlock();
        let writer = {
            let rw = Arc::clone(&rw);
            thread::spawn(move || {
                rw.lock();
                rw.unlock().unwrap();
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!writer.is_finished());
        rw.runlock().unwrap();
        rw.runlock().unwrap();
        writer.join().unwrap();
    }
}
