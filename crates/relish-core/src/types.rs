//! Type definitions for the Relish type lattice.
//!
//! A [`TypeDef`] carries a canonical name, its direct supertypes, its own
//! attribute descriptors and a handful of flags. Parametric instantiations
//! (`List[T]`, `Set[T]`, `Map[K,V]`, `Channel[T]`) record their family and
//! arguments so the registry can intern them and compare them covariantly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::TypeId;

/// Parametric type families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeFamily {
    List,
    Set,
    Map,
    Channel,
}

impl TypeFamily {
    /// Name of the family's base type (`List`, `Set`, ...).
    pub fn base_name(self) -> &'static str {
        match self {
            TypeFamily::List => "List",
            TypeFamily::Set => "Set",
            TypeFamily::Map => "Map",
            TypeFamily::Channel => "Channel",
        }
    }

    /// Number of type arguments the family takes.
    pub fn arity(self) -> usize {
        match self {
            TypeFamily::Map => 2,
            _ => 1,
        }
    }

    pub fn from_base_name(name: &str) -> Option<Self> {
        match name {
            "List" => Some(TypeFamily::List),
            "Set" => Some(TypeFamily::Set),
            "Map" => Some(TypeFamily::Map),
            "Channel" => Some(TypeFamily::Channel),
            _ => None,
        }
    }
}

impl fmt::Display for TypeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_name())
    }
}

/// Collection kind of a multi-valued attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionKind {
    List,
    Set,
    Map,
    SortedList,
    SortedSet,
    SortedMap,
}

impl CollectionKind {
    pub fn is_sorted(self) -> bool {
        matches!(
            self,
            CollectionKind::SortedList | CollectionKind::SortedSet | CollectionKind::SortedMap
        )
    }

    pub fn is_map(self) -> bool {
        matches!(self, CollectionKind::Map | CollectionKind::SortedMap)
    }

    pub fn is_set(self) -> bool {
        matches!(self, CollectionKind::Set | CollectionKind::SortedSet)
    }

    /// The parametric family backing this kind.
    pub fn family(self) -> TypeFamily {
        if self.is_map() {
            TypeFamily::Map
        } else if self.is_set() {
            TypeFamily::Set
        } else {
            TypeFamily::List
        }
    }
}

/// Descriptor of one declared attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDef {
    pub name: String,
    /// Declared element type.
    pub type_id: TypeId,
    /// Cardinality upper bound; `None` means unbounded.
    pub max_arity: Option<u32>,
    /// Collection kind when the attribute holds more than one value.
    pub collection: Option<CollectionKind>,
}

impl AttributeDef {
    /// Single-valued attribute of the given type.
    pub fn single(name: impl Into<String>, type_id: TypeId) -> Self {
        AttributeDef {
            name: name.into(),
            type_id,
            max_arity: Some(1),
            collection: None,
        }
    }

    /// Multi-valued attribute backed by a collection of `kind`.
    pub fn many(name: impl Into<String>, type_id: TypeId, kind: CollectionKind) -> Self {
        AttributeDef {
            name: name.into(),
            type_id,
            max_arity: None,
            collection: Some(kind),
        }
    }

    pub fn is_multi_valued(&self) -> bool {
        self.collection.is_some() || self.max_arity.map_or(true, |n| n > 1)
    }
}

/// Flags describing how values of a type are represented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeFlags {
    /// Immutable primitive value (numbers, strings, times, ...).
    pub is_primitive: bool,
    /// Implemented natively by the runtime rather than as a slot layout.
    pub is_native: bool,
    /// List, set or map.
    pub is_collection: bool,
    /// Keyed collection.
    pub is_map: bool,
}

/// Parametric arguments of an interned instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeParams {
    pub family: TypeFamily,
    pub args: Vec<TypeId>,
}

/// A registered type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    pub id: TypeId,
    /// Canonical name, qualified by package path for user types (`shop/Car`).
    pub name: String,
    /// Defining package path, if any.
    pub package: Option<String>,
    /// Direct supertypes in declaration order.
    pub supertypes: Vec<TypeId>,
    /// Attributes declared directly on this type.
    pub attributes: Vec<AttributeDef>,
    pub flags: TypeFlags,
    /// Family and arguments for parametric instantiations.
    pub params: Option<TypeParams>,
}

impl TypeDef {
    /// The unqualified name (after the last `/`).
    pub fn short_name(&self) -> &str {
        if self.params.is_some() {
            return &self.name;
        }
        self.name.rsplit_once('/').map_or(self.name.as_str(), |(_, n)| n)
    }
}

/// Splits a qualified type name into `(package, short name)`.
pub fn split_qualified(name: &str) -> (Option<&str>, &str) {
    match name.rsplit_once('/') {
        Some((pkg, short)) => (Some(pkg), short),
        None => (None, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_names_roundtrip() {
        for family in [
            TypeFamily::List,
            TypeFamily::Set,
            TypeFamily::Map,
            TypeFamily::Channel,
        ] {
            assert_eq!(TypeFamily::from_base_name(family.base_name()), Some(family));
        }
        assert_eq!(TypeFamily::from_base_name("Vector"), None);
        assert_eq!(TypeFamily::Map.arity(), 2);
    }

    #[test]
    fn collection_kind_family() {
        assert_eq!(CollectionKind::SortedMap.family(), TypeFamily::Map);
        assert_eq!(CollectionKind::SortedSet.family(), TypeFamily::Set);
        assert_eq!(CollectionKind::List.family(), TypeFamily::List);
        assert!(CollectionKind::SortedList.is_sorted());
        assert!(!CollectionKind::Set.is_sorted());
    }

    #[test]
    fn attribute_multiplicity() {
        let single = AttributeDef::single("color", TypeId(12));
        assert!(!single.is_multi_valued());
        let many = AttributeDef::many("wheels", TypeId(30), CollectionKind::List);
        assert!(many.is_multi_valued());
    }

    #[test]
    fn qualified_name_split() {
        assert_eq!(split_qualified("shop/cars/Car"), (Some("shop/cars"), "Car"));
        assert_eq!(split_qualified("Int"), (None, "Int"));
    }
}
