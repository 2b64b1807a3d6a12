//! Per-thread transaction bookkeeping.
//!
//! The store makes a transaction's writes durable or discards them. The
//! runtime additionally remembers which in-memory objects the transaction
//! wrote so that a rollback can bring them back in line with the store:
//! objects first stored inside the transaction lose their store identity,
//! and every other object written is marked stale and reloaded on its next
//! access.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use relish_core::Dbid;

use crate::object::ObjRef;

/// Objects written by one open transaction.
#[derive(Debug)]
pub struct TxnLog {
    pub started: DateTime<Utc>,
    touched: IndexMap<usize, ObjRef>,
    created: IndexMap<usize, ObjRef>,
    deleted: Vec<(Dbid, ObjRef)>,
}

impl Default for TxnLog {
    fn default() -> Self {
        TxnLog {
            started: Utc::now(),
            touched: IndexMap::new(),
            created: IndexMap::new(),
            deleted: Vec::new(),
        }
    }
}

fn key(obj: &ObjRef) -> usize {
    Arc::as_ptr(obj) as usize
}

impl TxnLog {
    pub fn touch(&mut self, obj: &ObjRef) {
        self.touched.entry(key(obj)).or_insert_with(|| Arc::clone(obj));
    }

    /// Records an object whose dbid was allocated in this transaction.
    pub fn create(&mut self, obj: &ObjRef) {
        self.created.entry(key(obj)).or_insert_with(|| Arc::clone(obj));
    }

    /// Records an object whose root row was deleted in this transaction.
    pub fn delete(&mut self, dbid: Dbid, obj: &ObjRef) {
        self.deleted.push((dbid, Arc::clone(obj)));
    }

    pub fn deleted(&self) -> impl Iterator<Item = &(Dbid, ObjRef)> {
        self.deleted.iter()
    }

    pub fn was_created(&self, obj: &ObjRef) -> bool {
        self.created.contains_key(&key(obj))
    }

    pub fn created(&self) -> impl Iterator<Item = &ObjRef> {
        self.created.values()
    }

    /// Written objects that existed in the store before the transaction.
    pub fn preexisting(&self) -> impl Iterator<Item = &ObjRef> {
        self.touched
            .iter()
            .filter(|(k, _)| !self.created.contains_key(*k))
            .map(|(_, o)| o)
    }

    pub fn len(&self) -> usize {
        self.touched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::RObject;
    use relish_core::TypeId;

    #[test]
    fn preexisting_excludes_created() {
        let old = RObject::new_struct(TypeId(30), 0);
        let new = RObject::new_struct(TypeId(30), 0);
        let mut log = TxnLog::default();
        log.touch(&old);
        log.touch(&new);
        log.touch(&old);
        log.create(&new);
        assert_eq!(log.len(), 2);
        assert!(log.was_created(&new));
        let pre: Vec<_> = log.preexisting().collect();
        assert_eq!(pre.len(), 1);
        assert!(Arc::ptr_eq(pre[0], &old));
    }
}
