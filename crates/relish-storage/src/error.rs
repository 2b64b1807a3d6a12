//! Storage error types for relish-storage.
//!
//! [`StorageError`] separates database failures, which abort the owning
//! transaction, from logical failures such as a name collision, which leave
//! the transaction open.

use relish_core::Dbid;
use thiserror::Error;

use crate::types::SessionId;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying SQLite call failed.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// No object is stored under the given dbid.
    #[error("object not found: dbid={0}")]
    ObjectNotFound(Dbid),

    /// The name is already bound to another object.
    #[error("name already in use: '{name}'")]
    NameInUse { name: String },

    /// No object is bound to the name.
    #[error("no object named '{name}'")]
    NameNotFound { name: String },

    /// The session already owns an open transaction.
    #[error("transaction already active")]
    TransactionActive,

    /// The session has no open transaction.
    #[error("no active transaction")]
    NoTransaction,

    /// Another session held the write lock for longer than the busy timeout.
    #[error("store busy: {holder} holds the write lock")]
    Busy { holder: SessionId },

    /// Stored data could not be decoded.
    #[error("corrupt data: {reason}")]
    Corrupt { reason: String },
}

impl StorageError {
    /// Whether this is a database failure rather than a logical one.
    ///
    /// Database failures inside a transaction roll it back.
    pub fn is_database_error(&self) -> bool {
        matches!(
            self,
            StorageError::Sqlite(_) | StorageError::Migration(_) | StorageError::Busy { .. }
        )
    }
}
