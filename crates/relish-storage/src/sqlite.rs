//! SQLite implementation of [`ObjectStore`].
//!
//! [`SqliteStore`] keeps a pool of connections to one database in WAL mode.
//! A session that begins a transaction takes a connection out of the pool
//! until it commits or rolls back, so transactions of different sessions
//! run side by side: readers see the last committed state, and a writer
//! waits up to [`BUSY_TIMEOUT`](crate::types::BUSY_TIMEOUT) for another
//! writer's lock. Calls made outside a transaction borrow a pooled
//! connection and, when they write, run in their own short
//! `BEGIN IMMEDIATE` block.
//!
//! Each structured type gets a table of primitive columns that grows with
//! `ALTER TABLE` as attributes appear, and each reference or multi-valued
//! attribute gets a join table registered in `Relations`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use relish_core::Dbid;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::StorageError;
use crate::schema::{quote_ident, relation_table, type_table, ELEMENTS_ATTR};
use crate::traits::ObjectStore;
use crate::types::{ObjectRecord, SessionId, StoredElement, StoredValue};

/// SQLite-backed implementation of [`ObjectStore`].
pub struct SqliteStore {
    /// Database file; `None` for a private in-memory database, which has
    /// exactly one connection.
    path: Option<String>,
    idle: Mutex<Vec<Db>>,
    returned: Condvar,
    /// Connections held by sessions with an open transaction.
    pinned: Mutex<HashMap<SessionId, Arc<Mutex<Db>>>>,
}

struct Db {
    conn: Connection,
    /// Known dynamic tables and their columns. Other connections may add
    /// tables and columns at any time, so a miss is always re-checked
    /// against the schema. DDL is transactional, so this is dropped on
    /// every rollback.
    tables: HashMap<String, HashSet<String>>,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        tracing::info!(path, "opened object store");
        Ok(Self::with_connection(Some(path.to_string()), conn))
    }

    /// Opens an in-memory SQLite database (for testing). Its single
    /// connection makes transactions of different sessions run one at a
    /// time.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(Self::with_connection(None, conn))
    }

    fn with_connection(path: Option<String>, conn: Connection) -> Self {
        SqliteStore {
            path,
            idle: Mutex::new(vec![Db::new(conn)]),
            returned: Condvar::new(),
            pinned: Mutex::new(HashMap::new()),
        }
    }

    fn checkout(&self) -> Result<Db, StorageError> {
        let mut idle = self.idle.lock();
        loop {
            if let Some(db) = idle.pop() {
                return Ok(db);
            }
            match &self.path {
                Some(path) => {
                    drop(idle);
                    let conn = crate::schema::open_connection(path)?;
                    tracing::debug!(path = %path, "opened pooled connection");
                    return Ok(Db::new(conn));
                }
                None => self.returned.wait(&mut idle),
            }
        }
    }

    fn checkin(&self, db: Db) {
        self.idle.lock().push(db);
        self.returned.notify_one();
    }

    fn pinned(&self, session: SessionId) -> Option<Arc<Mutex<Db>>> {
        self.pinned.lock().get(&session).cloned()
    }

    /// Runs `f` for `session`: inside its open transaction if it has one,
    /// otherwise on a pooled connection, in an implicit transaction when
    /// `write` is set.
    ///
    /// A database failure inside an explicit transaction rolls it back.
    fn run<T>(
        &self,
        session: SessionId,
        write: bool,
        f: impl FnOnce(&mut Db) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        if let Some(db) = self.pinned(session) {
            let result = f(&mut *db.lock());
            drop(db);
            if let Err(e) = &result {
                if e.is_database_error() {
                    tracing::warn!(%session, error = %e, "database error, rolling back");
                    if let Err(e) = self.finish(session, false) {
                        tracing::error!(%session, error = %e, "rollback failed");
                    }
                }
            }
            return result;
        }

        let mut db = self.checkout()?;
        let result = if write {
            db.immediate(f)
        } else {
            f(&mut db)
        };
        self.checkin(db);
        result
    }

    /// Ends the session's transaction and returns its connection to the
    /// pool.
    fn finish(&self, session: SessionId, commit: bool) -> Result<(), StorageError> {
        let db = self
            .pinned
            .lock()
            .remove(&session)
            .ok_or(StorageError::NoTransaction)?;
        let outcome = db.lock().end(commit);
        // Another clone only exists while a call of the same session is
        // still running; that connection is closed instead of pooled.
        if let Ok(db) = Arc::try_unwrap(db) {
            self.checkin(db.into_inner());
        }
        outcome
    }
}

impl Db {
    fn new(conn: Connection) -> Self {
        Db {
            conn,
            tables: HashMap::new(),
        }
    }

    /// Runs `f` in its own write transaction.
    fn immediate<T>(
        &mut self,
        f: impl FnOnce(&mut Db) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = f(self);
        let result = match result {
            Ok(value) => self.conn.execute_batch("COMMIT").map(|()| value).map_err(Into::into),
            Err(e) => Err(e),
        };
        if result.is_err() {
            if !self.conn.is_autocommit() {
                let _ = self.conn.execute_batch("ROLLBACK");
            }
            self.tables.clear();
        }
        result
    }

    fn end(&mut self, commit: bool) -> Result<(), StorageError> {
        if commit {
            match self.conn.execute_batch("COMMIT") {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, "commit failed, rolling back");
                    if !self.conn.is_autocommit() {
                        let _ = self.conn.execute_batch("ROLLBACK");
                    }
                    self.tables.clear();
                    return Err(e.into());
                }
            }
        }
        self.tables.clear();
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Re-reads the columns of `table` from the schema. Returns whether the
    /// table exists.
    fn refresh_columns(&mut self, table: &str) -> Result<bool, StorageError> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let cols = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<HashSet<_>, _>>()?;
        drop(stmt);
        if cols.is_empty() {
            self.tables.remove(table);
            return Ok(false);
        }
        self.tables.insert(table.to_string(), cols);
        Ok(true)
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, StorageError> {
        if self.tables.contains_key(table) {
            return Ok(true);
        }
        self.refresh_columns(table)
    }

    fn has_column(&mut self, table: &str, column: &str) -> Result<bool, StorageError> {
        if self.tables.get(table).is_some_and(|cols| cols.contains(column)) {
            return Ok(true);
        }
        self.refresh_columns(table)?;
        Ok(self.tables.get(table).is_some_and(|cols| cols.contains(column)))
    }

    fn ensure_type_table<'a>(
        &mut self,
        table: &str,
        attrs: impl Iterator<Item = &'a String>,
    ) -> Result<(), StorageError> {
        if !self.table_exists(table)? {
            self.conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY, uuid TEXT NOT NULL)",
                quote_ident(table)
            ))?;
            self.refresh_columns(table)?;
        }
        for attr in attrs {
            if !self.has_column(table, attr)? {
                self.conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote_ident(table),
                    quote_ident(attr)
                ))?;
                self.tables
                    .entry(table.to_string())
                    .or_default()
                    .insert(attr.clone());
                tracing::debug!(table, column = %attr, "added column");
            }
        }
        Ok(())
    }

    fn ensure_join_table(&mut self, type_name: &str, attr: &str) -> Result<String, StorageError> {
        let table = relation_table(type_name, attr);
        if !self.table_exists(&table)? {
            self.conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    owner_dbid      INTEGER NOT NULL,
                    ordinal         INTEGER NOT NULL,
                    key_dbid        INTEGER,
                    key_literal,
                    element_dbid    INTEGER,
                    element_literal,
                    PRIMARY KEY (owner_dbid, ordinal)
                )",
                quote_ident(&table)
            ))?;
            self.conn.execute(
                "INSERT OR IGNORE INTO Relations (type_name, attr_name, table_name) VALUES (?1, ?2, ?3)",
                params![type_name, attr, table],
            )?;
            self.refresh_columns(&table)?;
        }
        Ok(table)
    }

    fn write_record(&mut self, rec: &ObjectRecord) -> Result<(), StorageError> {
        let updated = self.conn.execute(
            "UPDATE Objects SET type_name = ?2 WHERE id = ?1",
            params![rec.dbid.0, rec.type_name],
        )?;
        if updated == 0 {
            return Err(StorageError::ObjectNotFound(rec.dbid));
        }

        let table = type_table(&rec.type_name);
        self.ensure_type_table(&table, rec.primitives.keys())?;
        let mut columns = vec![quote_ident("id"), quote_ident("uuid")];
        let mut values = vec![
            SqlValue::Integer(rec.dbid.0),
            SqlValue::Text(rec.uuid.to_string()),
        ];
        for (attr, value) in &rec.primitives {
            columns.push(quote_ident(attr));
            values.push(to_sql(value));
        }
        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote_ident(&table),
            columns.join(", "),
            placeholders.join(", ")
        );
        self.conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(values))?;

        for (attr, rows) in &rec.relations {
            self.replace_rows(&rec.type_name, attr, rec.dbid, rows)?;
        }
        if let Some(rows) = &rec.elements {
            self.replace_rows(&rec.type_name, ELEMENTS_ATTR, rec.dbid, rows)?;
        }
        Ok(())
    }

    fn replace_rows(
        &mut self,
        type_name: &str,
        attr: &str,
        owner: Dbid,
        rows: &[StoredElement],
    ) -> Result<(), StorageError> {
        let table = quote_ident(&self.ensure_join_table(type_name, attr)?);
        self.conn.execute(
            &format!("DELETE FROM {table} WHERE owner_dbid = ?1"),
            params![owner.0],
        )?;
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO {table} (owner_dbid, ordinal, key_dbid, key_literal, element_dbid, element_literal) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        ))?;
        for row in rows {
            let (key_dbid, key_literal) = match &row.key {
                Some(k) => split_ref(k),
                None => (None, SqlValue::Null),
            };
            let (element_dbid, element_literal) = split_ref(&row.value);
            stmt.execute(params![
                owner.0,
                row.ordinal,
                key_dbid,
                key_literal,
                element_dbid,
                element_literal
            ])?;
        }
        Ok(())
    }

    fn load_record(&mut self, dbid: Dbid) -> Result<ObjectRecord, StorageError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT uuid, type_name FROM Objects WHERE id = ?1",
                params![dbid.0],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (uuid_text, type_name) = row.ok_or(StorageError::ObjectNotFound(dbid))?;
        let uuid = Uuid::parse_str(&uuid_text).map_err(|e| StorageError::Corrupt {
            reason: format!("uuid of dbid {dbid}: {e}"),
        })?;
        let mut rec = ObjectRecord::new(dbid, uuid, type_name);

        let table = type_table(&rec.type_name);
        if self.table_exists(&table)? {
            // Not cached: the column list of `*` changes as columns are added.
            let mut stmt = self
                .conn
                .prepare(&format!("SELECT * FROM {} WHERE id = ?1", quote_ident(&table)))?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query(params![dbid.0])?;
            if let Some(row) = rows.next()? {
                for (i, name) in names.iter().enumerate() {
                    if name == "id" || name == "uuid" {
                        continue;
                    }
                    rec.primitives
                        .insert(name.clone(), from_sql(row.get::<_, SqlValue>(i)?));
                }
            }
        }

        let relations: Vec<(String, String)> = {
            let mut stmt = self.conn.prepare_cached(
                "SELECT attr_name, table_name FROM Relations WHERE type_name = ?1",
            )?;
            let rows = stmt.query_map(params![rec.type_name], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };
        for (attr, table) in relations {
            let rows = self.read_rows(&table, dbid)?;
            if attr == ELEMENTS_ATTR {
                rec.elements = Some(rows);
            } else {
                rec.relations.insert(attr, rows);
            }
        }
        Ok(rec)
    }

    fn read_rows(&self, table: &str, owner: Dbid) -> Result<Vec<StoredElement>, StorageError> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT ordinal, key_dbid, key_literal, element_dbid, element_literal FROM {} WHERE owner_dbid = ?1 ORDER BY ordinal",
            quote_ident(table)
        ))?;
        let rows = stmt.query_map(params![owner.0], |row| {
            let ordinal: i64 = row.get(0)?;
            let key_dbid: Option<i64> = row.get(1)?;
            let key_literal: SqlValue = row.get(2)?;
            let element_dbid: Option<i64> = row.get(3)?;
            let element_literal: SqlValue = row.get(4)?;
            Ok((ordinal, key_dbid, key_literal, element_dbid, element_literal))
        })?;
        let mut result = Vec::new();
        for row in rows {
            let (ordinal, key_dbid, key_literal, element_dbid, element_literal) = row?;
            let key = match (key_dbid, key_literal) {
                (Some(d), _) => Some(StoredValue::Ref(Dbid(d))),
                (None, SqlValue::Null) => None,
                (None, literal) => Some(from_sql(literal)),
            };
            let value = match element_dbid {
                Some(d) => StoredValue::Ref(Dbid(d)),
                None => from_sql(element_literal),
            };
            result.push(StoredElement {
                ordinal,
                key,
                value,
            });
        }
        Ok(result)
    }

    fn object_exists(&self, dbid: Dbid) -> Result<bool, StorageError> {
        Ok(self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM Objects WHERE id = ?1)",
            params![dbid.0],
            |row| row.get(0),
        )?)
    }

    fn name_binding(&self, name: &str) -> Result<Option<Dbid>, StorageError> {
        Ok(self
            .conn
            .prepare_cached("SELECT id FROM NamedObjects WHERE name = ?1")?
            .query_row(params![name], |row| row.get(0))
            .optional()?
            .map(Dbid))
    }
}

fn to_sql(value: &StoredValue) -> SqlValue {
    match value {
        StoredValue::Null => SqlValue::Null,
        StoredValue::Int(i) => SqlValue::Integer(*i),
        StoredValue::Float(f) => SqlValue::Real(*f),
        StoredValue::Text(s) => SqlValue::Text(s.clone()),
        StoredValue::Bytes(b) => SqlValue::Blob(b.clone()),
        StoredValue::Ref(d) => SqlValue::Integer(d.0),
    }
}

fn from_sql(value: SqlValue) -> StoredValue {
    match value {
        SqlValue::Null => StoredValue::Null,
        SqlValue::Integer(i) => StoredValue::Int(i),
        SqlValue::Real(f) => StoredValue::Float(f),
        SqlValue::Text(s) => StoredValue::Text(s),
        SqlValue::Blob(b) => StoredValue::Bytes(b),
    }
}

/// Splits a value into its `(dbid, literal)` join-table columns.
fn split_ref(value: &StoredValue) -> (Option<i64>, SqlValue) {
    match value {
        StoredValue::Ref(d) => (Some(d.0), SqlValue::Null),
        other => (None, to_sql(other)),
    }
}

impl ObjectStore for SqliteStore {
    fn begin(&self, session: SessionId) -> Result<(), StorageError> {
        if self.pinned.lock().contains_key(&session) {
            return Err(StorageError::TransactionActive);
        }
        let db = self.checkout()?;
        // Deferred: the write lock is only taken by the first write, so
        // beginning never waits for another session.
        if let Err(e) = db.conn.execute_batch("BEGIN") {
            self.checkin(db);
            return Err(e.into());
        }
        self.pinned.lock().insert(session, Arc::new(Mutex::new(db)));
        tracing::debug!(%session, "begin");
        Ok(())
    }

    fn commit(&self, session: SessionId) -> Result<(), StorageError> {
        self.finish(session, true)?;
        tracing::debug!(%session, "commit");
        Ok(())
    }

    fn rollback(&self, session: SessionId) -> Result<(), StorageError> {
        self.finish(session, false)?;
        tracing::debug!(%session, "rollback");
        Ok(())
    }

    fn in_transaction(&self, session: SessionId) -> bool {
        self.pinned.lock().contains_key(&session)
    }

    fn allocate(
        &self,
        session: SessionId,
        uuid: Uuid,
        type_name: &str,
    ) -> Result<Dbid, StorageError> {
        self.run(session, true, |db| {
            db.conn.execute(
                "INSERT INTO Objects (uuid, type_name) VALUES (?1, ?2)",
                params![uuid.to_string(), type_name],
            )?;
            Ok(Dbid(db.conn.last_insert_rowid()))
        })
    }

    fn write(&self, session: SessionId, record: &ObjectRecord) -> Result<(), StorageError> {
        self.run(session, true, |db| db.write_record(record))
    }

    fn load(&self, session: SessionId, dbid: Dbid) -> Result<ObjectRecord, StorageError> {
        self.run(session, false, |db| db.load_record(dbid))
    }

    fn dbid_for_uuid(
        &self,
        session: SessionId,
        uuid: Uuid,
    ) -> Result<Option<Dbid>, StorageError> {
        self.run(session, false, |db| {
            Ok(db
                .conn
                .prepare_cached("SELECT id FROM Objects WHERE uuid = ?1")?
                .query_row(params![uuid.to_string()], |row| row.get(0))
                .optional()?
                .map(Dbid))
        })
    }

    fn delete(&self, session: SessionId, dbid: Dbid) -> Result<(), StorageError> {
        self.run(session, true, |db| {
            let type_name: String = db
                .conn
                .query_row(
                    "SELECT type_name FROM Objects WHERE id = ?1",
                    params![dbid.0],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(StorageError::ObjectNotFound(dbid))?;
            db.conn
                .execute("DELETE FROM NamedObjects WHERE id = ?1", params![dbid.0])?;
            let table = type_table(&type_name);
            if db.table_exists(&table)? {
                db.conn.execute(
                    &format!("DELETE FROM {} WHERE id = ?1", quote_ident(&table)),
                    params![dbid.0],
                )?;
            }
            db.conn
                .execute("DELETE FROM Objects WHERE id = ?1", params![dbid.0])?;
            Ok(())
        })
    }

    fn bind_name(&self, session: SessionId, name: &str, dbid: Dbid) -> Result<(), StorageError> {
        self.run(session, true, |db| {
            if db.name_binding(name)?.is_some() {
                return Err(StorageError::NameInUse {
                    name: name.to_string(),
                });
            }
            if !db.object_exists(dbid)? {
                return Err(StorageError::ObjectNotFound(dbid));
            }
            db.conn.execute(
                "INSERT INTO NamedObjects (name, id) VALUES (?1, ?2)",
                params![name, dbid.0],
            )?;
            Ok(())
        })
    }

    fn rename(&self, session: SessionId, old: &str, new: &str) -> Result<(), StorageError> {
        self.run(session, true, |db| {
            if db.name_binding(old)?.is_none() {
                return Err(StorageError::NameNotFound {
                    name: old.to_string(),
                });
            }
            if old == new {
                return Ok(());
            }
            if db.name_binding(new)?.is_some() {
                return Err(StorageError::NameInUse {
                    name: new.to_string(),
                });
            }
            db.conn.execute(
                "UPDATE NamedObjects SET name = ?2 WHERE name = ?1",
                params![old, new],
            )?;
            Ok(())
        })
    }

    fn lookup_name(&self, session: SessionId, name: &str) -> Result<Option<Dbid>, StorageError> {
        self.run(session, false, |db| db.name_binding(name))
    }

    fn list_names(
        &self,
        session: SessionId,
        prefix: &str,
    ) -> Result<Vec<(String, Dbid)>, StorageError> {
        self.run(session, false, |db| {
            let mut stmt = db.conn.prepare_cached(
                "SELECT name, id FROM NamedObjects WHERE substr(name, 1, length(?1)) = ?1 ORDER BY name",
            )?;
            let rows = stmt.query_map(params![prefix], |row| {
                Ok((row.get::<_, String>(0)?, Dbid(row.get(1)?)))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: SessionId = SessionId(1);

    fn car(store: &SqliteStore, color: &str) -> ObjectRecord {
        let uuid = Uuid::new_v4();
        let dbid = store.allocate(S, uuid, "shop/Car").unwrap();
        let mut rec = ObjectRecord::new(dbid, uuid, "shop/Car");
        rec.primitives
            .insert("color".into(), StoredValue::Text(color.into()));
        rec.primitives.insert("wheels".into(), StoredValue::Int(4));
        rec
    }

    #[test]
    fn write_then_load_primitives() {
        let store = SqliteStore::in_memory().unwrap();
        let rec = car(&store, "red");
        store.write(S, &rec).unwrap();
        let loaded = store.load(S, rec.dbid).unwrap();
        assert_eq!(loaded, rec);
        assert_eq!(store.dbid_for_uuid(S, rec.uuid).unwrap(), Some(rec.dbid));
    }

    #[test]
    fn columns_are_added_as_attributes_appear() {
        let store = SqliteStore::in_memory().unwrap();
        let mut rec = car(&store, "red");
        store.write(S, &rec).unwrap();
        rec.primitives
            .insert("price".into(), StoredValue::Float(9.5));
        store.write(S, &rec).unwrap();

        let other = car(&store, "blue");
        store.write(S, &other).unwrap();
        let loaded = store.load(S, other.dbid).unwrap();
        assert_eq!(loaded.primitives["price"], StoredValue::Null);
        assert_eq!(store.load(S, rec.dbid).unwrap().primitives["price"], StoredValue::Float(9.5));
    }

    #[test]
    fn relations_and_elements_keep_ordinal_order() {
        let store = SqliteStore::in_memory().unwrap();
        let a = car(&store, "red");
        let b = car(&store, "blue");
        store.write(S, &a).unwrap();
        store.write(S, &b).unwrap();

        let uuid = Uuid::new_v4();
        let dbid = store.allocate(S, uuid, "Map[String,shop/Car]").unwrap();
        let mut map = ObjectRecord::new(dbid, uuid, "Map[String,shop/Car]");
        map.elements = Some(vec![
            StoredElement::keyed(1, StoredValue::Text("b".into()), StoredValue::Ref(b.dbid)),
            StoredElement::keyed(0, StoredValue::Text("a".into()), StoredValue::Ref(a.dbid)),
        ]);
        store.write(S, &map).unwrap();

        let loaded = store.load(S, dbid).unwrap();
        let elements = loaded.elements.unwrap();
        assert_eq!(elements[0].key, Some(StoredValue::Text("a".into())));
        assert_eq!(elements[0].value, StoredValue::Ref(a.dbid));
        assert_eq!(elements[1].value, StoredValue::Ref(b.dbid));
    }

    #[test]
    fn names_are_unique() {
        let store = SqliteStore::in_memory().unwrap();
        let a = car(&store, "red");
        let b = car(&store, "blue");
        store.bind_name(S, "K1", a.dbid).unwrap();
        assert!(matches!(
            store.bind_name(S, "K1", b.dbid),
            Err(StorageError::NameInUse { .. })
        ));
        store.bind_name(S, "K2", a.dbid).unwrap();
        assert!(matches!(
            store.rename(S, "K2", "K1"),
            Err(StorageError::NameInUse { .. })
        ));
        store.rename(S, "K2", "K3").unwrap();
        assert_eq!(store.lookup_name(S, "K3").unwrap(), Some(a.dbid));
        assert_eq!(store.lookup_name(S, "K2").unwrap(), None);
        assert!(matches!(
            store.rename(S, "nope", "K9"),
            Err(StorageError::NameNotFound { .. })
        ));
        let names: Vec<String> = store
            .list_names(S, "K")
            .unwrap()
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["K1", "K3"]);
    }

    #[test]
    fn rollback_discards_writes_and_new_tables() {
        let store = SqliteStore::in_memory().unwrap();
        store.begin(S).unwrap();
        assert!(store.in_transaction(S));
        assert!(matches!(store.begin(S), Err(StorageError::TransactionActive)));
        let rec = car(&store, "red");
        store.write(S, &rec).unwrap();
        store.bind_name(S, "K1", rec.dbid).unwrap();
        store.rollback(S).unwrap();
        assert!(!store.in_transaction(S));

        assert!(matches!(
            store.load(S, rec.dbid),
            Err(StorageError::ObjectNotFound(_))
        ));
        assert_eq!(store.lookup_name(S, "K1").unwrap(), None);

        // The type table vanished with the rollback and is recreated.
        let again = car(&store, "green");
        store.write(S, &again).unwrap();
        assert_eq!(store.load(S, again.dbid).unwrap(), again);
    }

    #[test]
    fn commit_without_begin_fails() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(matches!(store.commit(S), Err(StorageError::NoTransaction)));
        assert!(matches!(store.rollback(S), Err(StorageError::NoTransaction)));
    }

    #[test]
    fn delete_removes_names_and_root_row() {
        let store = SqliteStore::in_memory().unwrap();
        let rec = car(&store, "red");
        store.write(S, &rec).unwrap();
        store.bind_name(S, "K1", rec.dbid).unwrap();
        store.delete(S, rec.dbid).unwrap();
        assert_eq!(store.lookup_name(S, "K1").unwrap(), None);
        assert!(store.load(S, rec.dbid).is_err());
        assert!(matches!(
            store.delete(S, rec.dbid),
            Err(StorageError::ObjectNotFound(_))
        ));
    }
}
