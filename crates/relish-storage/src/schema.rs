//! Schema setup and dynamic table naming for the SQLite backend.
//!
//! The fixed tables (`Objects`, `NamedObjects`, `Relations`) are created by
//! `rusqlite_migration` migrations embedded with `include_str!`. Per-type
//! attribute tables and join tables are created on demand by the store;
//! their names are derived here.

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::StorageError;
use crate::types::BUSY_TIMEOUT;

/// Attribute name recorded in `Relations` for a collection's element table.
pub const ELEMENTS_ATTR: &str = "";

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!(
        "migrations/001_initial_schema.sql"
    ))])
}

/// Opens (or creates) a database at `path` with all migrations applied.
pub fn open_database(path: &str) -> Result<Connection, StorageError> {
    let mut conn = open_connection(path)?;
    migrate(&mut conn)?;
    Ok(conn)
}

/// Opens a further connection to an already migrated database.
pub fn open_connection(path: &str) -> Result<Connection, StorageError> {
    let conn = Connection::open(path)?;
    configure(&conn)?;
    Ok(conn)
}

/// Opens an in-memory database with all migrations applied.
pub fn open_in_memory() -> Result<Connection, StorageError> {
    let mut conn = Connection::open_in_memory()?;
    configure(&conn)?;
    migrate(&mut conn)?;
    Ok(conn)
}

fn configure(conn: &Connection) -> Result<(), StorageError> {
    // In-memory databases stay in "memory" journal mode.
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    tracing::trace!(journal_mode = %mode, "connection configured");
    Ok(())
}

fn migrate(conn: &mut Connection) -> Result<(), StorageError> {
    migrations()
        .to_latest(conn)
        .map_err(|e| StorageError::Migration(e.to_string()))
}

/// Quotes an identifier for use in SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Table holding the primitive attributes of `type_name`.
pub fn type_table(type_name: &str) -> String {
    format!("type:{type_name}")
}

/// Join table for attribute `attr` of `type_name`, or for the elements of a
/// collection type when `attr` is [`ELEMENTS_ATTR`].
pub fn relation_table(type_name: &str, attr: &str) -> String {
    if attr == ELEMENTS_ATTR {
        format!("elem:{type_name}")
    } else {
        format!("rel:{type_name}.{attr}")
    }
}
