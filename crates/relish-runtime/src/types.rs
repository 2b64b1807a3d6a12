//! Shared, snapshot-read type registry.
//!
//! Types are fixed after boot except for parametric instantiations, which
//! can be interned on first use at runtime (`List[Car]` the first time a
//! list of cars is built). Readers take a cheap `Arc` snapshot and never
//! hold a lock across a call; interning clones the registry and swaps it in.

use std::sync::Arc;

use parking_lot::RwLock;
use relish_core::{CoreError, TypeFamily, TypeId, TypeRegistry};

#[derive(Debug)]
pub struct TypeTable {
    inner: RwLock<Arc<TypeRegistry>>,
}

impl TypeTable {
    pub fn new(registry: TypeRegistry) -> Self {
        TypeTable {
            inner: RwLock::new(Arc::new(registry)),
        }
    }

    /// The current registry.
    pub fn snapshot(&self) -> Arc<TypeRegistry> {
        Arc::clone(&self.inner.read())
    }

    /// Interns `family[args]`, reusing an existing instantiation.
    pub fn instantiate(&self, family: TypeFamily, args: &[TypeId]) -> TypeId {
        if let Some(id) = self.inner.read().find_instantiation(family, args) {
            return id;
        }
        let mut guard = self.inner.write();
        let registry = Arc::make_mut(&mut guard);
        match (family, args) {
            (TypeFamily::Map, [k, v]) => registry.map_type(*k, *v),
            (TypeFamily::Set, [e]) => registry.set_type(*e),
            (TypeFamily::Channel, [e]) => registry.channel_type(*e),
            (_, [e, ..]) => registry.list_type(*e),
            (_, []) => registry.list_type(TypeId::ANY),
        }
    }

    pub fn list_type(&self, elem: TypeId) -> TypeId {
        self.instantiate(TypeFamily::List, &[elem])
    }

    pub fn set_type(&self, elem: TypeId) -> TypeId {
        self.instantiate(TypeFamily::Set, &[elem])
    }

    pub fn map_type(&self, key: TypeId, value: TypeId) -> TypeId {
        self.instantiate(TypeFamily::Map, &[key, value])
    }

    pub fn channel_type(&self, elem: TypeId) -> TypeId {
        self.instantiate(TypeFamily::Channel, &[elem])
    }

    /// Resolves a canonical type name, interning parametric names.
    pub fn resolve(&self, name: &str) -> Result<TypeId, CoreError> {
        if let Some(id) = self.inner.read().lookup(name) {
            return Ok(id);
        }
        let mut guard = self.inner.write();
        Arc::make_mut(&mut guard).resolve(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_are_stable_across_interning() {
        let table = TypeTable::new(TypeRegistry::new());
        let before = table.snapshot();
        let list = table.list_type(TypeId::STRING);
        assert_eq!(table.list_type(TypeId::STRING), list);
        assert!(before.get(list).is_none());
        assert_eq!(table.snapshot().name(list), "List[String]");
    }

    #[test]
    fn resolve_interns_parametric_names() {
        let table = TypeTable::new(TypeRegistry::new());
        let id = table.resolve("Map[String,Int]").unwrap();
        assert_eq!(table.map_type(TypeId::STRING, TypeId::INT), id);
        assert!(table.resolve("Nope").is_err());
    }
}
