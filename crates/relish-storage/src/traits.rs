//! The [`ObjectStore`] trait defining the storage contract for objects.
//!
//! Every call names the [`SessionId`] it is made for. A session that has
//! called [`begin`](ObjectStore::begin) runs its calls inside that
//! transaction. Transactions of different sessions are open at the same
//! time: each reads the last committed state plus its own writes, and only
//! writers contend. A writer waits up to [`BUSY_TIMEOUT`] for another
//! writer to finish, then fails with a database error that rolls its
//! transaction back. Calls made outside a transaction are individually
//! atomic.
//!
//! [`BUSY_TIMEOUT`]: crate::types::BUSY_TIMEOUT
//!
//! All backends (SqliteStore, InMemoryStore) implement this trait and are
//! interchangeable behind `Arc<dyn ObjectStore>`.

use relish_core::Dbid;
use uuid::Uuid;

use crate::error::StorageError;
use crate::types::{ObjectRecord, SessionId};

/// The storage contract for persistent objects and named handles.
pub trait ObjectStore: Send + Sync {
    // -------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------

    /// Opens a transaction owned by `session`. Never waits for other
    /// sessions.
    ///
    /// Fails with [`StorageError::TransactionActive`] if the session already
    /// has one.
    fn begin(&self, session: SessionId) -> Result<(), StorageError>;

    /// Makes the session's writes durable and visible.
    fn commit(&self, session: SessionId) -> Result<(), StorageError>;

    /// Discards the session's writes.
    fn rollback(&self, session: SessionId) -> Result<(), StorageError>;

    /// Whether `session` currently owns a transaction.
    fn in_transaction(&self, session: SessionId) -> bool;

    // -------------------------------------------------------------------
    // Objects
    // -------------------------------------------------------------------

    /// Allocates a dbid for a new object.
    ///
    /// Dbids are monotone and never reused for a committed object.
    fn allocate(
        &self,
        session: SessionId,
        uuid: Uuid,
        type_name: &str,
    ) -> Result<Dbid, StorageError>;

    /// Writes (or overwrites) a full object record.
    fn write(&self, session: SessionId, record: &ObjectRecord) -> Result<(), StorageError>;

    /// Loads a full object record.
    fn load(&self, session: SessionId, dbid: Dbid) -> Result<ObjectRecord, StorageError>;

    /// Resolves a UUID to its dbid.
    fn dbid_for_uuid(&self, session: SessionId, uuid: Uuid)
        -> Result<Option<Dbid>, StorageError>;

    /// Removes the object's name bindings and root row.
    ///
    /// Join-table rows referring to it are the caller's responsibility.
    fn delete(&self, session: SessionId, dbid: Dbid) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // Named handles
    // -------------------------------------------------------------------

    /// Binds `name` to `dbid`; fails with [`StorageError::NameInUse`].
    fn bind_name(&self, session: SessionId, name: &str, dbid: Dbid)
        -> Result<(), StorageError>;

    /// Moves a binding from `old` to `new`.
    fn rename(&self, session: SessionId, old: &str, new: &str) -> Result<(), StorageError>;

    /// The dbid bound to `name`, if any.
    fn lookup_name(&self, session: SessionId, name: &str) -> Result<Option<Dbid>, StorageError>;

    /// All bindings whose name starts with `prefix`, sorted by name.
    fn list_names(
        &self,
        session: SessionId,
        prefix: &str,
    ) -> Result<Vec<(String, Dbid)>, StorageError>;
}
