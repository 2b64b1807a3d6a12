//! The runtime half of persistence: identity cache, graph persistence, lazy
//! attribute loading, named handles and transactions.
//!
//! [`Persistence`] sits between in-memory objects and an [`ObjectStore`].
//! Objects are flattened into [`ObjectRecord`]s on write: single primitive
//! attributes become columns, references and multi-valued attributes become
//! relation rows, and collection elements become rows whose ordinal is the
//! iteration order. References are written as dbids, never pointers, so
//! cyclic graphs persist without special handling.
//!
//! The identity cache maps every dbid to the one live object carrying it.
//! A fetch that finds the dbid cached returns that object; otherwise the
//! record is loaded and materialized with its references left lazy (radius
//! 0) or pre-fetched to the requested depth.
//!
//! # Transactions
//!
//! Writes of a thread with an open transaction go into the store's
//! transaction and are logged per session. On rollback, objects stored for
//! the first time lose their dbid, deleted objects get it back, and every
//! other object written is marked stale; a stale object reloads from the
//! store on its next access.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use relish_core::{AttributeDef, CollectionKind, Dbid, TypeFamily, TypeId, TypeRegistry};
use relish_storage::{
    ObjectRecord, ObjectStore, SessionId, StorageError, StoredElement, StoredValue,
};
use uuid::Uuid;

use crate::collection::{Collection, Comparator};
use crate::error::RuntimeError;
use crate::object::{Body, ObjFlags, ObjRef, Pending, RObject, Slot};
use crate::transaction::TxnLog;
use crate::types::TypeTable;
use crate::value::Value;

#[derive(Default)]
struct IdentityCache {
    by_dbid: HashMap<Dbid, ObjRef>,
    by_uuid: HashMap<Uuid, Dbid>,
}

impl IdentityCache {
    fn get(&self, dbid: Dbid) -> Option<ObjRef> {
        self.by_dbid.get(&dbid).cloned()
    }

    /// Inserts `obj` unless the dbid is already cached; returns the cached
    /// object either way.
    fn insert(&mut self, dbid: Dbid, uuid: Uuid, obj: &ObjRef) -> ObjRef {
        let cached = self
            .by_dbid
            .entry(dbid)
            .or_insert_with(|| Arc::clone(obj))
            .clone();
        self.by_uuid.entry(uuid).or_insert(dbid);
        cached
    }

    fn publish(&mut self, dbid: Dbid, obj: &ObjRef) {
        match obj.uuid() {
            Some(uuid) => {
                self.insert(dbid, uuid, obj);
            }
            None => {
                self.by_dbid.entry(dbid).or_insert_with(|| Arc::clone(obj));
            }
        }
    }

    fn remove(&mut self, dbid: Dbid) {
        if let Some(obj) = self.by_dbid.remove(&dbid) {
            if let Some(uuid) = obj.uuid() {
                self.by_uuid.remove(&uuid);
            }
        }
    }
}

/// Flattens a primitive value into a store cell. Handles other than
/// objects have no stored form.
pub fn encode_literal(value: &Value) -> Option<StoredValue> {
    Some(match value {
        Value::Nil => StoredValue::Null,
        Value::Bool(b) => StoredValue::Int(i64::from(*b)),
        Value::Int(i) => StoredValue::Int(*i),
        Value::Int32(i) => StoredValue::Int(i64::from(*i)),
        Value::Uint(u) => StoredValue::Int(*u as i64),
        Value::Uint32(u) => StoredValue::Int(i64::from(*u)),
        Value::Byte(b) => StoredValue::Int(i64::from(*b)),
        Value::Float(f) => StoredValue::Float(*f),
        Value::Str(s) => StoredValue::Text(s.to_string()),
        Value::Bytes(b) => StoredValue::Bytes(b.to_vec()),
        Value::Time(t) => StoredValue::Text(t.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        Value::Object(_)
        | Value::Channel(_)
        | Value::Mutex(_)
        | Value::RwMutex(_)
        | Value::Closure(_) => return None,
    })
}

/// Rebuilds a primitive from a store cell using the declared type.
/// References decode to `Nil`; callers resolve them.
pub fn decode_literal(declared: TypeId, stored: &StoredValue) -> Value {
    match (declared, stored) {
        (_, StoredValue::Null) | (_, StoredValue::Ref(_)) => Value::Nil,
        (TypeId::BOOL, StoredValue::Int(i)) => Value::Bool(*i != 0),
        (TypeId::INT32, StoredValue::Int(i)) => Value::Int32(*i as i32),
        (TypeId::UINT, StoredValue::Int(i)) => Value::Uint(*i as u64),
        (TypeId::UINT32, StoredValue::Int(i)) => Value::Uint32(*i as u32),
        (TypeId::BYTE, StoredValue::Int(i)) => Value::Byte(*i as u8),
        (TypeId::FLOAT, StoredValue::Int(i)) => Value::Float(*i as f64),
        (_, StoredValue::Int(i)) => Value::Int(*i),
        (_, StoredValue::Float(f)) => Value::Float(*f),
        (TypeId::TIME, StoredValue::Text(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| Value::Time(t.with_timezone(&Utc)))
            .unwrap_or(Value::Nil),
        (_, StoredValue::Text(s)) => Value::str(s),
        (_, StoredValue::Bytes(b)) => Value::bytes(b),
    }
}

/// Slot contents for a struct read from the store, without touching any
/// referenced object.
fn slots_from_record(types: &TypeRegistry, type_id: TypeId, record: &ObjectRecord) -> Vec<Slot> {
    let Some(layout) = types.layout(type_id) else {
        return Vec::new();
    };
    layout
        .iter()
        .map(|(name, attr)| {
            if attr.is_multi_valued() {
                return match record.relations.get(name) {
                    Some(rows) => Slot::Lazy(Pending::Many(rows.clone())),
                    None => Slot::Empty,
                };
            }
            if types.is_primitive(attr.type_id) {
                return match record.primitives.get(name) {
                    None | Some(StoredValue::Null) => Slot::Empty,
                    Some(cell) => Slot::Loaded(decode_literal(attr.type_id, cell)),
                };
            }
            match record.relations.get(name).and_then(|rows| rows.first()) {
                Some(StoredElement {
                    value: StoredValue::Ref(dbid),
                    ..
                }) => Slot::Lazy(Pending::One(*dbid)),
                Some(row) => Slot::Loaded(decode_literal(attr.type_id, &row.value)),
                None => Slot::Empty,
            }
        })
        .collect()
}

/// Mediates every store access made on behalf of runtime values.
pub struct Persistence {
    store: Arc<dyn ObjectStore>,
    types: Arc<TypeTable>,
    cache: Mutex<IdentityCache>,
    txns: DashMap<SessionId, TxnLog>,
}

impl Persistence {
    pub fn new(store: Arc<dyn ObjectStore>, types: Arc<TypeTable>) -> Self {
        Persistence {
            store,
            types,
            cache: Mutex::new(IdentityCache::default()),
            txns: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Number of objects in the identity cache.
    pub fn cached_len(&self) -> usize {
        self.cache.lock().by_dbid.len()
    }

    /// The live object carrying `dbid`, if it is in memory.
    pub fn cached(&self, dbid: Dbid) -> Option<ObjRef> {
        self.cache.lock().get(dbid)
    }

    fn with_log(&self, session: SessionId, f: impl FnOnce(&mut TxnLog)) {
        if let Some(mut log) = self.txns.get_mut(&session) {
            f(&mut log);
        }
    }

    // -------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------

    pub fn begin(&self, session: SessionId) -> Result<(), RuntimeError> {
        if self.txns.contains_key(&session) {
            return Err(RuntimeError::TransactionActive);
        }
        self.store.begin(session)?;
        self.txns.insert(session, TxnLog::default());
        tracing::debug!(%session, "transaction begun");
        Ok(())
    }

    pub fn in_transaction(&self, session: SessionId) -> bool {
        self.txns.contains_key(&session)
    }

    pub fn commit(&self, session: SessionId) -> Result<(), RuntimeError> {
        let (_, log) = self
            .txns
            .remove(&session)
            .ok_or(RuntimeError::NoTransaction)?;
        match self.store.commit(session) {
            Ok(()) => {
                tracing::debug!(%session, objects = log.len(), "transaction committed");
                Ok(())
            }
            Err(e) => {
                self.revert(session, &log);
                Err(e.into())
            }
        }
    }

    /// Discards the transaction. If the store already aborted it after a
    /// database error, only the in-memory side is reverted.
    pub fn rollback(&self, session: SessionId) -> Result<(), RuntimeError> {
        let (_, log) = self
            .txns
            .remove(&session)
            .ok_or(RuntimeError::NoTransaction)?;
        let result = if self.store.in_transaction(session) {
            self.store.rollback(session)
        } else {
            Ok(())
        };
        self.revert(session, &log);
        result.map_err(Into::into)
    }

    fn revert(&self, session: SessionId, log: &TxnLog) {
        {
            let mut cache = self.cache.lock();
            for obj in log.created() {
                if let Some(dbid) = obj.dbid() {
                    cache.remove(dbid);
                }
                obj.mark_unstored();
            }
            for (dbid, obj) in log.deleted() {
                if log.was_created(obj) {
                    continue;
                }
                obj.mark_stored(*dbid);
                obj.set_flags(ObjFlags::STALE, true);
                cache.insert(*dbid, obj.ensure_uuid(), obj);
            }
        }
        for obj in log.preexisting() {
            obj.set_flags(ObjFlags::DIRTY, false);
            obj.set_flags(ObjFlags::STALE, true);
        }
        tracing::warn!(
            %session,
            written = log.len(),
            "transaction rolled back; written objects will reload"
        );
    }

    // -------------------------------------------------------------------
    // Writing
    // -------------------------------------------------------------------

    /// Stores `obj` and every object it reaches that is not yet stored or
    /// has unwritten changes. Idempotent.
    pub fn ensure_persisted(&self, session: SessionId, obj: &ObjRef) -> Result<Dbid, RuntimeError> {
        self.persist(session, obj, &mut HashSet::new())
    }

    fn persist(
        &self,
        session: SessionId,
        obj: &ObjRef,
        visiting: &mut HashSet<usize>,
    ) -> Result<Dbid, RuntimeError> {
        if obj.is_stale() {
            self.refresh(session, obj)?;
        }
        let key = Arc::as_ptr(obj) as usize;
        if let Some(dbid) = obj.dbid() {
            if visiting.contains(&key) || (obj.is_stored() && !obj.is_dirty()) {
                return Ok(dbid);
            }
        }
        visiting.insert(key);

        let dbid = match obj.dbid() {
            Some(dbid) => dbid,
            None => self.allocate(session, obj)?,
        };
        let record = self.encode(session, obj, dbid, visiting)?;
        self.store.write(session, &record)?;
        obj.mark_stored(dbid);
        self.with_log(session, |log| log.touch(obj));
        tracing::trace!(%dbid, type_name = %record.type_name, "object written");
        Ok(dbid)
    }

    fn allocate(&self, session: SessionId, obj: &ObjRef) -> Result<Dbid, RuntimeError> {
        let uuid = obj.ensure_uuid();
        let types = self.types.snapshot();
        let dbid = self.store.allocate(session, uuid, types.name(obj.type_id()))?;
        obj.header().dbid = Some(dbid);
        self.cache.lock().insert(dbid, uuid, obj);
        self.with_log(session, |log| log.create(obj));
        Ok(dbid)
    }

    fn encode(
        &self,
        session: SessionId,
        obj: &ObjRef,
        dbid: Dbid,
        visiting: &mut HashSet<usize>,
    ) -> Result<ObjectRecord, RuntimeError> {
        let types = self.types.snapshot();
        let mut record = ObjectRecord::new(dbid, obj.ensure_uuid(), types.name(obj.type_id()));

        let snapshot = match &*obj.body() {
            Body::Collection(c) => Err(c.entries()),
            Body::Struct(slots) => Ok(slots.clone()),
        };
        let slots = match snapshot {
            Ok(slots) => slots,
            Err(entries) => {
                record.elements = Some(self.encode_entries(session, &entries, visiting)?);
                return Ok(record);
            }
        };

        let Some(layout) = types.layout(obj.type_id()) else {
            return Ok(record);
        };
        for (idx, ((name, attr), slot)) in layout.iter().zip(slots).enumerate() {
            if !attr.is_multi_valued() && types.is_primitive(attr.type_id) {
                let cell = match slot {
                    Slot::Loaded(v) => encode_literal(&v).unwrap_or(StoredValue::Null),
                    _ => StoredValue::Null,
                };
                record.primitives.insert(name.clone(), cell);
                continue;
            }
            let rows = match slot {
                Slot::Empty | Slot::Loaded(Value::Nil) => Vec::new(),
                Slot::Lazy(Pending::One(d)) => vec![StoredElement::new(0, StoredValue::Ref(d))],
                Slot::Lazy(Pending::Many(rows)) => rows,
                Slot::Loaded(Value::Object(c)) if attr.is_multi_valued() && c.is_collection() => {
                    c.set_owner(obj, idx);
                    let entries = match &*c.body() {
                        Body::Collection(coll) => coll.entries(),
                        Body::Struct(_) => Vec::new(),
                    };
                    self.encode_entries(session, &entries, visiting)?
                }
                Slot::Loaded(v) => match self.encode_value(session, &v, visiting)? {
                    Some(cell) => vec![StoredElement::new(0, cell)],
                    None => Vec::new(),
                },
            };
            record.relations.insert(name.clone(), rows);
        }
        Ok(record)
    }

    fn encode_value(
        &self,
        session: SessionId,
        value: &Value,
        visiting: &mut HashSet<usize>,
    ) -> Result<Option<StoredValue>, RuntimeError> {
        match value {
            Value::Object(o) => Ok(Some(StoredValue::Ref(self.persist(session, o, visiting)?))),
            other => Ok(encode_literal(other)),
        }
    }

    fn encode_entries(
        &self,
        session: SessionId,
        entries: &[(Option<Value>, Value)],
        visiting: &mut HashSet<usize>,
    ) -> Result<Vec<StoredElement>, RuntimeError> {
        let mut rows = Vec::with_capacity(entries.len());
        for (ordinal, (key, value)) in entries.iter().enumerate() {
            let value = self
                .encode_value(session, value, visiting)?
                .unwrap_or(StoredValue::Null);
            let key = match key {
                Some(k) => Some(
                    self.encode_value(session, k, visiting)?
                        .unwrap_or(StoredValue::Null),
                ),
                None => None,
            };
            rows.push(StoredElement {
                ordinal: ordinal as i64,
                key,
                value,
            });
        }
        Ok(rows)
    }

    // -------------------------------------------------------------------
    // Reading
    // -------------------------------------------------------------------

    /// Materializes the object stored under `dbid`, pre-fetching references
    /// `radius` levels deep.
    pub fn fetch(&self, session: SessionId, dbid: Dbid, radius: u32) -> Result<ObjRef, RuntimeError> {
        let cached = self.cache.lock().get(dbid);
        let obj = match cached {
            Some(obj) => obj,
            None => self.load_object(session, dbid)?,
        };
        if radius > 0 {
            self.preload(session, &obj, radius, &mut HashSet::new())?;
        }
        Ok(obj)
    }

    pub fn fetch_by_uuid(
        &self,
        session: SessionId,
        uuid: Uuid,
        radius: u32,
    ) -> Result<Option<ObjRef>, RuntimeError> {
        let cached = self.cache.lock().by_uuid.get(&uuid).copied();
        let dbid = match cached {
            Some(dbid) => Some(dbid),
            None => self.store.dbid_for_uuid(session, uuid)?,
        };
        dbid.map(|d| self.fetch(session, d, radius)).transpose()
    }

    /// Loads `dbid` together with every uncached object its collection rows
    /// reach, then publishes them to the identity cache in one step. Nothing
    /// is visible to other threads until it is fully built, so no lock is
    /// held across store reads.
    fn load_object(&self, session: SessionId, dbid: Dbid) -> Result<ObjRef, RuntimeError> {
        loop {
            let mut building = HashMap::new();
            let obj = self.build(session, dbid, &mut building)?;

            let mut cache = self.cache.lock();
            if let Some(cached) = cache.get(dbid) {
                return Ok(cached);
            }
            // Another thread published part of this graph first; rebuild
            // against its instances.
            if building.keys().any(|d| cache.by_dbid.contains_key(d)) {
                continue;
            }
            for (d, built) in &building {
                cache.publish(*d, built);
            }
            tracing::trace!(%dbid, objects = building.len(), "object graph materialized");
            return Ok(obj);
        }
    }

    fn build(
        &self,
        session: SessionId,
        dbid: Dbid,
        building: &mut HashMap<Dbid, ObjRef>,
    ) -> Result<ObjRef, RuntimeError> {
        if let Some(obj) = building.get(&dbid) {
            return Ok(Arc::clone(obj));
        }
        if let Some(obj) = self.cache.lock().get(dbid) {
            return Ok(obj);
        }

        let record = self.store.load(session, dbid)?;
        let type_id = self.types.resolve(&record.type_name)?;
        let types = self.types.snapshot();
        let shell = match &record.elements {
            Some(_) => RObject::new_collection(type_id, Collection::for_type(&types, type_id)),
            None => RObject::new_struct(type_id, 0),
        };
        shell.header().uuid = Some(record.uuid);
        shell.mark_stored(record.dbid);
        // Registered before the rows are decoded so cycles resolve to it.
        building.insert(dbid, Arc::clone(&shell));

        let body = match &record.elements {
            Some(rows) => {
                let template = Collection::for_type(&types, type_id);
                Body::Collection(self.collection_from_rows(
                    template.kind(),
                    template.elem_type(),
                    template.key_type(),
                    rows,
                    &mut |d| self.build(session, d, building),
                )?)
            }
            None => Body::Struct(slots_from_record(&types, type_id, &record)),
        };
        *shell.body_mut() = body;
        Ok(shell)
    }

    /// Decodes collection rows; `resolve` turns a stored reference into an
    /// object.
    fn collection_from_rows(
        &self,
        kind: CollectionKind,
        elem_type: TypeId,
        key_type: Option<TypeId>,
        rows: &[StoredElement],
        resolve: &mut dyn FnMut(Dbid) -> Result<ObjRef, RuntimeError>,
    ) -> Result<Collection, RuntimeError> {
        let mut decode = |declared: TypeId, stored: &StoredValue| match stored {
            StoredValue::Ref(dbid) => resolve(*dbid).map(Value::Object),
            other => Ok(decode_literal(declared, other)),
        };
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let key = match &row.key {
                Some(k) => Some(decode(key_type.unwrap_or(TypeId::ANY), k)?),
                None => None,
            };
            entries.push((key, decode(elem_type, &row.value)?));
        }
        Ok(Collection::from_entries(kind, elem_type, key_type, entries))
    }

    /// The collection object backing a multi-valued attribute.
    fn attribute_collection(
        &self,
        owner: &ObjRef,
        slot: usize,
        attr: &AttributeDef,
        collection: Collection,
    ) -> ObjRef {
        let kind = attr.collection.unwrap_or(CollectionKind::List);
        let type_id = match kind.family() {
            TypeFamily::Map => self.types.map_type(TypeId::ANY, attr.type_id),
            TypeFamily::Set => self.types.set_type(attr.type_id),
            _ => self.types.list_type(attr.type_id),
        };
        let coll = RObject::new_collection(type_id, collection);
        coll.set_owner(owner, slot);
        coll
    }

    fn resolve_pending(
        &self,
        session: SessionId,
        obj: &ObjRef,
        slot: usize,
        attr: &AttributeDef,
        pending: &Pending,
    ) -> Result<Value, RuntimeError> {
        match pending {
            Pending::One(dbid) => Ok(Value::Object(self.fetch(session, *dbid, 0)?)),
            Pending::Many(rows) => {
                let kind = attr.collection.unwrap_or(CollectionKind::List);
                let key_type = kind.is_map().then_some(TypeId::ANY);
                let coll = self.collection_from_rows(kind, attr.type_id, key_type, rows, &mut |d| {
                    self.fetch(session, d, 0)
                })?;
                Ok(Value::Object(self.attribute_collection(obj, slot, attr, coll)))
            }
        }
    }

    /// Reloads a stale object's state from the store.
    fn refresh(&self, session: SessionId, obj: &ObjRef) -> Result<(), RuntimeError> {
        let Some(dbid) = obj.dbid() else {
            obj.set_flags(ObjFlags::STALE, false);
            return Ok(());
        };
        let record = match self.store.load(session, dbid) {
            Ok(record) => record,
            Err(StorageError::ObjectNotFound(_)) => {
                self.cache.lock().remove(dbid);
                obj.mark_unstored();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let types = self.types.snapshot();
        let fresh = if obj.is_collection() {
            let template = Collection::for_type(&types, obj.type_id());
            let kind = match &*obj.body() {
                Body::Collection(c) => c.kind(),
                Body::Struct(_) => template.kind(),
            };
            let rows = record.elements.as_deref().unwrap_or_default();
            Body::Collection(self.collection_from_rows(
                kind,
                template.elem_type(),
                template.key_type(),
                rows,
                &mut |d| self.fetch(session, d, 0),
            )?)
        } else {
            Body::Struct(slots_from_record(&types, obj.type_id(), &record))
        };
        *obj.body_mut() = fresh;
        obj.set_flags(ObjFlags::STALE | ObjFlags::DIRTY, false);
        tracing::debug!(%dbid, "stale object reloaded");
        Ok(())
    }

    fn preload(
        &self,
        session: SessionId,
        obj: &ObjRef,
        radius: u32,
        seen: &mut HashSet<usize>,
    ) -> Result<(), RuntimeError> {
        if radius == 0 || !seen.insert(Arc::as_ptr(obj) as usize) {
            return Ok(());
        }
        let reached: Vec<Value> = if obj.is_collection() {
            match &*obj.body() {
                Body::Collection(c) => c.entries().into_iter().map(|(_, v)| v).collect(),
                Body::Struct(_) => Vec::new(),
            }
        } else {
            let types = self.types.snapshot();
            let Some(layout) = types.layout(obj.type_id()) else {
                return Ok(());
            };
            let mut reached = Vec::new();
            for (name, attr) in layout {
                if attr.is_multi_valued() || !types.is_primitive(attr.type_id) {
                    reached.push(self.get_attr(session, obj, name)?);
                }
            }
            reached
        };
        for value in reached {
            if let Value::Object(o) = value {
                // Attribute collections are part of their owner.
                let depth = if o.owner().is_some() { radius } else { radius - 1 };
                self.preload(session, &o, depth, seen)?;
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------

    /// Reads an attribute, loading it through the store on first access.
    pub fn get_attr(&self, session: SessionId, obj: &ObjRef, name: &str) -> Result<Value, RuntimeError> {
        let types = self.types.snapshot();
        let (idx, attr) = types
            .attribute(obj.type_id(), name)
            .ok_or_else(|| RuntimeError::NoSuchAttribute {
                type_name: types.name(obj.type_id()).to_string(),
                attr: name.to_string(),
            })?;
        let attr = attr.clone();
        if obj.is_stale() {
            self.refresh(session, obj)?;
        }

        let slot = match &*obj.body() {
            Body::Struct(slots) => slots.get(idx).cloned().unwrap_or_default(),
            Body::Collection(_) => Slot::Empty,
        };
        let value = match slot {
            Slot::Loaded(v) => return Ok(v),
            Slot::Empty if attr.is_multi_valued() => {
                let kind = attr.collection.unwrap_or(CollectionKind::List);
                let key_type = kind.is_map().then_some(TypeId::ANY);
                let coll = Collection::new(kind, attr.type_id, key_type);
                Value::Object(self.attribute_collection(obj, idx, &attr, coll))
            }
            Slot::Empty => return Ok(Value::zero_of(attr.type_id)),
            Slot::Lazy(pending) => self.resolve_pending(session, obj, idx, &attr, &pending)?,
        };

        // Another thread may have filled the slot meanwhile; theirs wins.
        let mut body = obj.body_mut();
        if let Body::Struct(slots) = &mut *body {
            if let Some(slot) = slots.get_mut(idx) {
                if let Slot::Loaded(existing) = &*slot {
                    return Ok(existing.clone());
                }
                *slot = Slot::Loaded(value.clone());
            }
        }
        Ok(value)
    }

    /// Assigns an attribute after checking the value against the declared
    /// type. Stored objects are written through immediately.
    pub fn set_attr(
        &self,
        session: SessionId,
        obj: &ObjRef,
        name: &str,
        value: Value,
    ) -> Result<(), RuntimeError> {
        let types = self.types.snapshot();
        let (idx, attr) = types
            .attribute(obj.type_id(), name)
            .ok_or_else(|| RuntimeError::NoSuchAttribute {
                type_name: types.name(obj.type_id()).to_string(),
                attr: name.to_string(),
            })?;

        let accepted = if attr.is_multi_valued() {
            match &value {
                Value::Nil => true,
                Value::Object(c) => c.is_collection(),
                _ => false,
            }
        } else {
            let actual = value.type_of();
            types.is_ancestor(attr.type_id, actual)
                || (value.is_nil() && !types.is_primitive(attr.type_id))
        };
        if !accepted {
            return Err(RuntimeError::type_mismatch(
                types.name(attr.type_id),
                types.name(value.type_of()),
            ));
        }
        if attr.is_multi_valued() {
            if let Value::Object(c) = &value {
                c.set_owner(obj, idx);
            }
        }
        if obj.is_stale() {
            self.refresh(session, obj)?;
        }

        match &mut *obj.body_mut() {
            Body::Struct(slots) if idx < slots.len() => slots[idx] = Slot::Loaded(value),
            Body::Struct(slots) => {
                slots.resize(idx, Slot::Empty);
                slots.push(Slot::Loaded(value));
            }
            Body::Collection(_) => {
                return Err(RuntimeError::NoSuchAttribute {
                    type_name: types.name(obj.type_id()).to_string(),
                    attr: name.to_string(),
                })
            }
        }
        obj.set_flags(ObjFlags::DIRTY, true);
        if obj.is_stored() {
            self.persist(session, obj, &mut HashSet::new())?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Collections
    // -------------------------------------------------------------------

    /// Builds the comparison function for a comparator.
    pub fn compare_fn<'a>(
        &'a self,
        session: SessionId,
        comparator: &Comparator,
    ) -> Box<dyn Fn(&Value, &Value) -> Ordering + 'a> {
        match comparator {
            Comparator::Natural => Box::new(|a: &Value, b: &Value| a.natural_cmp(b)),
            Comparator::Custom(f) => {
                let f = Arc::clone(f);
                Box::new(move |a: &Value, b: &Value| f(a, b))
            }
            Comparator::Attribute { name, descending } => {
                let name = name.clone();
                let descending = *descending;
                Box::new(move |a: &Value, b: &Value| {
                    let ord = self
                        .sort_key(session, a, &name)
                        .natural_cmp(&self.sort_key(session, b, &name));
                    if descending {
                        ord.reverse()
                    } else {
                        ord
                    }
                })
            }
        }
    }

    fn sort_key(&self, session: SessionId, value: &Value, attr: &str) -> Value {
        match value {
            Value::Object(o) => self.get_attr(session, o, attr).unwrap_or(Value::Nil),
            other => other.clone(),
        }
    }

    /// Runs `f` on a collection's contents, then writes the change to the
    /// store through the owning object (or the collection itself if it is
    /// stored on its own).
    pub fn mutate_collection<R>(
        &self,
        session: SessionId,
        obj: &ObjRef,
        f: impl FnOnce(&mut Collection, &dyn Fn(&Value, &Value) -> Ordering) -> R,
    ) -> Result<R, RuntimeError> {
        if obj.is_stale() {
            self.refresh(session, obj)?;
        }
        let comparator = match &*obj.body() {
            Body::Collection(c) => c.comparator().clone(),
            Body::Struct(_) => {
                let types = self.types.snapshot();
                return Err(RuntimeError::type_mismatch("Collection", types.name(obj.type_id())));
            }
        };
        let cmp = self.compare_fn(session, &comparator);
        let result = match &mut *obj.body_mut() {
            Body::Collection(c) => f(c, &*cmp),
            Body::Struct(_) => {
                return Err(RuntimeError::type_mismatch("Collection", "object"));
            }
        };
        obj.set_flags(ObjFlags::DIRTY, true);
        self.persist_collection(session, obj)?;
        Ok(result)
    }

    /// Reads a collection's contents without copying them out.
    pub fn read_collection<R>(
        &self,
        session: SessionId,
        obj: &ObjRef,
        f: impl FnOnce(&Collection) -> R,
    ) -> Result<R, RuntimeError> {
        if obj.is_stale() {
            self.refresh(session, obj)?;
        }
        match &*obj.body() {
            Body::Collection(c) => Ok(f(c)),
            Body::Struct(_) => {
                let types = self.types.snapshot();
                Err(RuntimeError::type_mismatch("Collection", types.name(obj.type_id())))
            }
        }
    }

    fn persist_collection(&self, session: SessionId, coll: &ObjRef) -> Result<(), RuntimeError> {
        let Some(link) = coll.owner() else {
            if coll.is_stored() {
                self.persist(session, coll, &mut HashSet::new())?;
            }
            return Ok(());
        };
        let owner = match (link.obj.upgrade(), link.dbid) {
            (Some(owner), _) => owner,
            (None, Some(dbid)) => {
                // The owner left memory; bring it back and reattach.
                let owner = self.fetch(session, dbid, 0)?;
                if let Body::Struct(slots) = &mut *owner.body_mut() {
                    if let Some(slot) = slots.get_mut(link.slot) {
                        *slot = Slot::Loaded(Value::Object(Arc::clone(coll)));
                    }
                }
                coll.set_owner(&owner, link.slot);
                owner
            }
            (None, None) => return Ok(()),
        };
        coll.set_flags(ObjFlags::DIRTY, false);
        owner.set_flags(ObjFlags::DIRTY, true);
        if owner.is_stored() {
            self.persist(session, &owner, &mut HashSet::new())?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Named handles
    // -------------------------------------------------------------------

    /// Persists `obj` and binds `name` to it.
    pub fn dub(&self, session: SessionId, obj: &ObjRef, name: &str) -> Result<(), RuntimeError> {
        let dbid = self.ensure_persisted(session, obj)?;
        self.store.bind_name(session, name, dbid)?;
        tracing::debug!(%dbid, name, "object named");
        Ok(())
    }

    /// The object bound to `name`.
    pub fn summon(&self, session: SessionId, name: &str, radius: u32) -> Result<ObjRef, RuntimeError> {
        let dbid = self
            .store
            .lookup_name(session, name)?
            .ok_or_else(|| StorageError::NameNotFound {
                name: name.to_string(),
            })?;
        self.fetch(session, dbid, radius)
    }

    pub fn name_exists(&self, session: SessionId, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.store.lookup_name(session, name)?.is_some())
    }

    pub fn rename(&self, session: SessionId, old: &str, new: &str) -> Result<(), RuntimeError> {
        self.store.rename(session, old, new)?;
        Ok(())
    }

    pub fn list_names(&self, session: SessionId, prefix: &str) -> Result<Vec<(String, Dbid)>, RuntimeError> {
        Ok(self.store.list_names(session, prefix)?)
    }

    /// Removes the object's name bindings and root row. The object stays
    /// usable in memory as an unstored value.
    pub fn delete(&self, session: SessionId, obj: &ObjRef) -> Result<(), RuntimeError> {
        let Some(dbid) = obj.dbid() else {
            return Ok(());
        };
        self.store.delete(session, dbid)?;
        self.cache.lock().remove(dbid);
        obj.mark_unstored();
        self.with_log(session, |log| log.delete(dbid, obj));
        tracing::debug!(%dbid, "object deleted");
        Ok(())
    }

    // -------------------------------------------------------------------
    // Collection of unreferenced objects
    // -------------------------------------------------------------------

    /// Drops cache entries nothing else references. Dirty objects and
    /// objects in transit on a channel are kept. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        let mut cache = self.cache.lock();
        let before = cache.by_dbid.len();
        // Evicting an object can release the last reference to another.
        loop {
            let mut evicted = Vec::new();
            cache.by_dbid.retain(|_, obj| {
                let keep = Arc::strong_count(obj) > 1 || obj.is_dirty() || obj.in_transit() > 0;
                if !keep {
                    evicted.push(Arc::clone(obj));
                }
                keep
            });
            if evicted.is_empty() {
                break;
            }
            for obj in evicted {
                if let Some(uuid) = obj.uuid() {
                    cache.by_uuid.remove(&uuid);
                }
            }
        }
        before - cache.by_dbid.len()
    }
}
