//! Object storage for the Relish runtime.
//!
//! Provides the [`ObjectStore`] trait defining the storage contract that all
//! backends implement, plus the [`SqliteStore`] and [`InMemoryStore`] as
//! first-class backends.
//!
//! The store knows nothing about runtime values. It persists
//! [`ObjectRecord`]s (literal columns plus relation rows keyed by dbid),
//! named handles, and transactions scoped to a [`SessionId`].
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: SessionId, ObjectRecord, StoredValue, StoredElement
//! - [`traits`]: ObjectStore trait definition
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: migrations and dynamic table naming
//! - [`sqlite`]: SqliteStore implementation

pub mod error;
mod gate;
pub mod memory;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod types;

pub use error::StorageError;
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use traits::ObjectStore;
pub use types::{ObjectRecord, SessionId, StoredElement, StoredValue, BUSY_TIMEOUT};
