//! Structured objects and their identity header.
//!
//! Every structured object and collection is an [`RObject`] behind an
//! `Arc`. The header carries the persistent identity (UUID, dbid) and the
//! state flags; the body is either a slot vector in the type's layout order
//! or a [`Collection`].
//!
//! Header and body have separate locks. The header lock is only held for
//! short reads and flag updates; the body lock is held for the duration of
//! an attribute read or write.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use relish_core::{Dbid, TypeId};
use relish_storage::StoredElement;
use uuid::Uuid;

use crate::collection::Collection;
use crate::value::Value;

/// Shared handle to an object.
pub type ObjRef = Arc<RObject>;

bitflags! {
    /// Identity state of an object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjFlags: u8 {
        /// The object has a dbid and a row in the store.
        const STORED_LOCALLY = 1;
        /// In-memory state has changes not yet written.
        const DIRTY = 1 << 1;
        /// In-memory state may disagree with the store after a rollback.
        const STALE = 1 << 2;
    }
}

#[derive(Debug, Default)]
pub struct Header {
    pub uuid: Option<Uuid>,
    pub dbid: Option<Dbid>,
    pub flags: ObjFlags,
    /// Object whose multi-valued attribute this collection backs.
    pub owner: Option<Owner>,
}

/// Back link from an attribute collection to the object holding it.
#[derive(Debug, Clone)]
pub struct Owner {
    pub obj: Weak<RObject>,
    /// The owner's dbid when the link was last refreshed; lets a mutation
    /// reach the store after the owner left the identity cache.
    pub dbid: Option<Dbid>,
    /// Slot index of the attribute in the owner's layout.
    pub slot: usize,
}

/// Reference data read from the store but not yet turned into values.
#[derive(Debug, Clone, PartialEq)]
pub enum Pending {
    One(Dbid),
    Many(Vec<StoredElement>),
}

/// One attribute slot.
#[derive(Debug, Clone, Default)]
pub enum Slot {
    /// Never assigned; reads yield the zero value of the declared type.
    #[default]
    Empty,
    /// Persisted reference not materialized in this process yet.
    Lazy(Pending),
    Loaded(Value),
}

#[derive(Debug)]
pub enum Body {
    Struct(Vec<Slot>),
    Collection(Collection),
}

pub struct RObject {
    type_id: TypeId,
    header: Mutex<Header>,
    in_transit: AtomicU32,
    body: RwLock<Body>,
}

impl RObject {
    /// A fresh structured object with `slots` empty attribute slots.
    pub fn new_struct(type_id: TypeId, slots: usize) -> ObjRef {
        Arc::new(RObject {
            type_id,
            header: Mutex::new(Header::default()),
            in_transit: AtomicU32::new(0),
            body: RwLock::new(Body::Struct(vec![Slot::Empty; slots])),
        })
    }

    pub fn new_collection(type_id: TypeId, collection: Collection) -> ObjRef {
        Arc::new(RObject {
            type_id,
            header: Mutex::new(Header::default()),
            in_transit: AtomicU32::new(0),
            body: RwLock::new(Body::Collection(collection)),
        })
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn header(&self) -> parking_lot::MutexGuard<'_, Header> {
        self.header.lock()
    }

    pub fn body(&self) -> RwLockReadGuard<'_, Body> {
        self.body.read()
    }

    pub fn body_mut(&self) -> RwLockWriteGuard<'_, Body> {
        self.body.write()
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.header.lock().uuid
    }

    /// The object's UUID, allocating one on first demand.
    pub fn ensure_uuid(&self) -> Uuid {
        *self.header.lock().uuid.get_or_insert_with(Uuid::new_v4)
    }

    pub fn dbid(&self) -> Option<Dbid> {
        self.header.lock().dbid
    }

    pub fn flags(&self) -> ObjFlags {
        self.header.lock().flags
    }

    pub fn set_flags(&self, flags: ObjFlags, on: bool) {
        self.header.lock().flags.set(flags, on);
    }

    pub fn is_stored(&self) -> bool {
        self.flags().contains(ObjFlags::STORED_LOCALLY)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags().contains(ObjFlags::DIRTY)
    }

    pub fn is_stale(&self) -> bool {
        self.flags().contains(ObjFlags::STALE)
    }

    /// Records that the object now has a row in the store.
    pub fn mark_stored(&self, dbid: Dbid) {
        let mut header = self.header.lock();
        header.dbid = Some(dbid);
        header.flags.insert(ObjFlags::STORED_LOCALLY);
        header.flags.remove(ObjFlags::DIRTY | ObjFlags::STALE);
    }

    /// Forgets the object's store identity; its UUID is kept.
    pub fn mark_unstored(&self) {
        let mut header = self.header.lock();
        header.dbid = None;
        header.flags.remove(ObjFlags::STORED_LOCALLY | ObjFlags::STALE);
        header.flags.insert(ObjFlags::DIRTY);
    }

    pub fn owner(&self) -> Option<Owner> {
        self.header.lock().owner.clone()
    }

    pub fn set_owner(&self, owner: &ObjRef, slot: usize) {
        let dbid = owner.dbid();
        self.header.lock().owner = Some(Owner {
            obj: Arc::downgrade(owner),
            dbid,
            slot,
        });
    }

    pub fn in_transit(&self) -> u32 {
        self.in_transit.load(Ordering::Acquire)
    }

    pub fn enter_transit(&self) {
        self.in_transit.fetch_add(1, Ordering::AcqRel);
    }

    pub fn leave_transit(&self) {
        let _ = self
            .in_transit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn is_collection(&self) -> bool {
        matches!(&*self.body.read(), Body::Collection(_))
    }

    /// Number of elements if this is a collection.
    pub fn collection_len(&self) -> Option<usize> {
        match &*self.body.read() {
            Body::Collection(c) => Some(c.len()),
            Body::Struct(_) => None,
        }
    }

    /// Short identity description for diagnostics.
    pub fn summary(this: &ObjRef) -> String {
        match this.dbid() {
            Some(dbid) => format!("{}#{}", this.type_id, dbid),
            None => format!("{}@{:p}", this.type_id, Arc::as_ptr(this)),
        }
    }
}

impl fmt::Debug for RObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = self.header.lock();
        f.debug_struct("RObject")
            .field("type_id", &self.type_id)
            .field("dbid", &header.dbid)
            .field("flags", &header.flags)
            .field("in_transit", &self.in_transit())
            .finish()
    }
}
