//! In-memory implementation of [`ObjectStore`].
//!
//! [`InMemoryStore`] is a first-class backend for tests and for runs that do
//! not need durability, with the same transaction behavior as the SQLite
//! backend. Beginning never waits. A transaction's first write takes the
//! writer slot and stages a copy of the committed data; the session reads
//! and writes that copy while every other session keeps reading the
//! committed data. Commit publishes the copy, rollback drops it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use relish_core::Dbid;
use uuid::Uuid;

use crate::error::StorageError;
use crate::gate::Gate;
use crate::traits::ObjectStore;
use crate::types::{ObjectRecord, SessionId, BUSY_TIMEOUT};

#[derive(Debug, Clone, Default)]
struct MemData {
    next_dbid: i64,
    objects: HashMap<Dbid, ObjectRecord>,
    uuids: HashMap<Uuid, Dbid>,
    names: BTreeMap<String, Dbid>,
}

#[derive(Default)]
struct MemState {
    committed: MemData,
    /// The writer's uncommitted data.
    staged: Option<MemData>,
    open: HashSet<SessionId>,
}

/// HashMap-backed implementation of [`ObjectStore`].
pub struct InMemoryStore {
    gate: Gate<MemState>,
    write_timeout: Duration,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            gate: Gate::new(MemState::default()),
            write_timeout: BUSY_TIMEOUT,
        }
    }

    /// Sets how long a write waits for another session's transaction.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    fn read_data<T>(
        &self,
        session: SessionId,
        f: impl FnOnce(&MemData) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let state = self.gate.lock();
        match (&state.inner.staged, state.writer == Some(session)) {
            (Some(staged), true) => f(staged),
            _ => f(&state.inner.committed),
        }
    }

    fn write_data<T>(
        &self,
        session: SessionId,
        f: impl FnOnce(&mut MemData) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut state = match self.gate.write(session, self.write_timeout) {
            Ok(state) => state,
            Err(e) => {
                // Losing the wait ends the session's transaction, as a busy
                // database does.
                let mut state = self.gate.lock();
                if state.inner.open.remove(&session) {
                    tracing::warn!(%session, error = %e, "write timed out, rolling back");
                }
                return Err(e);
            }
        };

        if !state.inner.open.contains(&session) {
            let result = f(&mut state.inner.committed);
            self.gate.release(&mut state);
            return result;
        }
        let MemState {
            committed, staged, ..
        } = &mut state.inner;
        f(staged.get_or_insert_with(|| committed.clone()))
    }

    fn end(&self, session: SessionId, commit: bool) -> Result<(), StorageError> {
        let mut state = self.gate.lock();
        if !state.inner.open.remove(&session) {
            return Err(StorageError::NoTransaction);
        }
        if state.writer == Some(session) {
            if let Some(staged) = state.inner.staged.take() {
                if commit {
                    state.inner.committed = staged;
                }
            }
            self.gate.release(&mut state);
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryStore {
    fn begin(&self, session: SessionId) -> Result<(), StorageError> {
        let mut state = self.gate.lock();
        if !state.inner.open.insert(session) {
            return Err(StorageError::TransactionActive);
        }
        Ok(())
    }

    fn commit(&self, session: SessionId) -> Result<(), StorageError> {
        self.end(session, true)
    }

    fn rollback(&self, session: SessionId) -> Result<(), StorageError> {
        self.end(session, false)
    }

    fn in_transaction(&self, session: SessionId) -> bool {
        self.gate.lock().inner.open.contains(&session)
    }

    fn allocate(
        &self,
        session: SessionId,
        uuid: Uuid,
        type_name: &str,
    ) -> Result<Dbid, StorageError> {
        self.write_data(session, |data| {
            data.next_dbid += 1;
            let dbid = Dbid(data.next_dbid);
            data.objects
                .insert(dbid, ObjectRecord::new(dbid, uuid, type_name));
            data.uuids.insert(uuid, dbid);
            Ok(dbid)
        })
    }

    fn write(&self, session: SessionId, record: &ObjectRecord) -> Result<(), StorageError> {
        self.write_data(session, |data| {
            let slot = data
                .objects
                .get_mut(&record.dbid)
                .ok_or(StorageError::ObjectNotFound(record.dbid))?;
            *slot = record.clone();
            Ok(())
        })
    }

    fn load(&self, session: SessionId, dbid: Dbid) -> Result<ObjectRecord, StorageError> {
        self.read_data(session, |data| {
            data.objects
                .get(&dbid)
                .cloned()
                .ok_or(StorageError::ObjectNotFound(dbid))
        })
    }

    fn dbid_for_uuid(
        &self,
        session: SessionId,
        uuid: Uuid,
    ) -> Result<Option<Dbid>, StorageError> {
        self.read_data(session, |data| Ok(data.uuids.get(&uuid).copied()))
    }

    fn delete(&self, session: SessionId, dbid: Dbid) -> Result<(), StorageError> {
        self.write_data(session, |data| {
            let rec = data
                .objects
                .remove(&dbid)
                .ok_or(StorageError::ObjectNotFound(dbid))?;
            data.uuids.remove(&rec.uuid);
            data.names.retain(|_, d| *d != dbid);
            Ok(())
        })
    }

    fn bind_name(&self, session: SessionId, name: &str, dbid: Dbid) -> Result<(), StorageError> {
        self.write_data(session, |data| {
            if data.names.contains_key(name) {
                return Err(StorageError::NameInUse {
                    name: name.to_string(),
                });
            }
            if !data.objects.contains_key(&dbid) {
                return Err(StorageError::ObjectNotFound(dbid));
            }
            data.names.insert(name.to_string(), dbid);
            Ok(())
        })
    }

    fn rename(&self, session: SessionId, old: &str, new: &str) -> Result<(), StorageError> {
        self.write_data(session, |data| {
            let dbid = *data.names.get(old).ok_or_else(|| StorageError::NameNotFound {
                name: old.to_string(),
            })?;
            if old == new {
                return Ok(());
            }
            if data.names.contains_key(new) {
                return Err(StorageError::NameInUse {
                    name: new.to_string(),
                });
            }
            data.names.remove(old);
            data.names.insert(new.to_string(), dbid);
            Ok(())
        })
    }

    fn lookup_name(&self, session: SessionId, name: &str) -> Result<Option<Dbid>, StorageError> {
        self.read_data(session, |data| Ok(data.names.get(name).copied()))
    }

    fn list_names(
        &self,
        session: SessionId,
        prefix: &str,
    ) -> Result<Vec<(String, Dbid)>, StorageError> {
        self.read_data(session, |data| {
            Ok(data
                .names
                .range(prefix.to_string()..)
                .take_while(|(name, _)| name.starts_with(prefix))
                .map(|(name, dbid)| (name.clone(), *dbid))
                .collect())
        })
    }
}
