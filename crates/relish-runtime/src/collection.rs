//! Lists, sets and maps, including their sorted variants.
//!
//! A sorted collection keeps its elements ordered under its [`Comparator`]
//! unless sorting has been deferred with [`Collection::defer_sorting`]; in
//! that state elements are appended and the order is restored in one pass by
//! [`Collection::resume_sorting`].
//!
//! Ordering operations take the comparison function as a parameter. The
//! runtime builds it from the collection's comparator, since attribute
//! comparators need the persistence layer to read element attributes.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use relish_core::{CollectionKind, TypeFamily, TypeId, TypeRegistry};

use crate::value::{Value, ValueKey};

/// A prepared comparison function.
pub type CmpFn<'a> = &'a dyn Fn(&Value, &Value) -> Ordering;

/// User-supplied ordering of a sorted collection.
#[derive(Clone, Default)]
pub enum Comparator {
    /// [`Value::natural_cmp`].
    #[default]
    Natural,
    /// Order elements by one of their attributes.
    Attribute { name: String, descending: bool },
    Custom(Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>),
}

impl fmt::Debug for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparator::Natural => f.write_str("Natural"),
            Comparator::Attribute { name, descending } => f
                .debug_struct("Attribute")
                .field("name", name)
                .field("descending", descending)
                .finish(),
            Comparator::Custom(_) => f.write_str("Custom"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum CollectionData {
    List(Vec<Value>),
    Set(IndexSet<ValueKey>),
    Map(IndexMap<ValueKey, Value>),
}

#[derive(Debug, Clone)]
pub struct Collection {
    kind: CollectionKind,
    elem_type: TypeId,
    key_type: Option<TypeId>,
    data: CollectionData,
    comparator: Comparator,
    sorting_deferred: bool,
}

impl Collection {
    /// An empty collection. `key_type` is required for maps.
    pub fn new(kind: CollectionKind, elem_type: TypeId, key_type: Option<TypeId>) -> Self {
        let data = if kind.is_map() {
            CollectionData::Map(IndexMap::new())
        } else if kind.is_set() {
            CollectionData::Set(IndexSet::new())
        } else {
            CollectionData::List(Vec::new())
        };
        Collection {
            kind,
            elem_type,
            key_type,
            data,
            comparator: Comparator::Natural,
            sorting_deferred: false,
        }
    }

    /// An empty unsorted collection shaped by a parametric type
    /// (`List[T]`, `Set[T]`, `Map[K,V]`).
    pub fn for_type(types: &TypeRegistry, type_id: TypeId) -> Self {
        let kind = match types.params(type_id).map(|p| p.family) {
            Some(TypeFamily::Set) => CollectionKind::Set,
            Some(TypeFamily::Map) => CollectionKind::Map,
            _ => CollectionKind::List,
        };
        let elem = types.element_type(type_id).unwrap_or(TypeId::ANY);
        let key = if kind.is_map() {
            Some(types.key_type(type_id).unwrap_or(TypeId::ANY))
        } else {
            None
        };
        Collection::new(kind, elem, key)
    }

    /// Rebuilds a collection from entries already in iteration order.
    pub fn from_entries(
        kind: CollectionKind,
        elem_type: TypeId,
        key_type: Option<TypeId>,
        entries: Vec<(Option<Value>, Value)>,
    ) -> Self {
        let mut c = Collection::new(kind, elem_type, key_type);
        match &mut c.data {
            CollectionData::List(v) => v.extend(entries.into_iter().map(|(_, x)| x)),
            CollectionData::Set(s) => s.extend(entries.into_iter().map(|(_, x)| ValueKey(x))),
            CollectionData::Map(m) => m.extend(
                entries
                    .into_iter()
                    .map(|(k, x)| (ValueKey(k.unwrap_or(Value::Nil)), x)),
            ),
        }
        c
    }

    pub fn with_comparator(mut self, comparator: Comparator) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    /// Declared element (or map value) type.
    pub fn elem_type(&self) -> TypeId {
        self.elem_type
    }

    pub fn key_type(&self) -> Option<TypeId> {
        self.key_type
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }

    pub fn is_sorting_deferred(&self) -> bool {
        self.sorting_deferred
    }

    /// Whether inserts must currently maintain order.
    fn keeps_order(&self) -> bool {
        self.kind.is_sorted() && !self.sorting_deferred
    }

    pub fn len(&self) -> usize {
        match &self.data {
            CollectionData::List(v) => v.len(),
            CollectionData::Set(s) => s.len(),
            CollectionData::Map(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements in iteration order; for maps, the keys.
    pub fn values(&self) -> Vec<Value> {
        match &self.data {
            CollectionData::List(v) => v.clone(),
            CollectionData::Set(s) => s.iter().map(|k| k.0.clone()).collect(),
            CollectionData::Map(m) => m.keys().map(|k| k.0.clone()).collect(),
        }
    }

    /// `(key, value)` pairs in iteration order; keys are `None` except for maps.
    pub fn entries(&self) -> Vec<(Option<Value>, Value)> {
        match &self.data {
            CollectionData::List(v) => v.iter().map(|x| (None, x.clone())).collect(),
            CollectionData::Set(s) => s.iter().map(|k| (None, k.0.clone())).collect(),
            CollectionData::Map(m) => m
                .iter()
                .map(|(k, v)| (Some(k.0.clone()), v.clone()))
                .collect(),
        }
    }

    /// Appends to a list or adds to a set. Sorted lists insert after any
    /// equal elements. Returns false if a set already held the value.
    pub fn push(&mut self, value: Value, cmp: CmpFn<'_>) -> bool {
        let keep = self.keeps_order();
        match &mut self.data {
            CollectionData::List(v) => {
                if keep {
                    let at = v.partition_point(|x| cmp(x, &value) != Ordering::Greater);
                    v.insert(at, value);
                } else {
                    v.push(value);
                }
                true
            }
            CollectionData::Set(s) => {
                let added = s.insert(ValueKey(value));
                if added && keep {
                    s.sort_by(|a, b| cmp(&a.0, &b.0));
                }
                added
            }
            CollectionData::Map(_) => false,
        }
    }

    /// Inserts into a list at `index` (unsorted lists only).
    pub fn insert_at(&mut self, index: usize, value: Value) -> bool {
        match &mut self.data {
            CollectionData::List(v) if !self.kind.is_sorted() && index <= v.len() => {
                v.insert(index, value);
                true
            }
            _ => false,
        }
    }

    /// Binds `key` in a map, returning the previous value.
    pub fn put(&mut self, key: Value, value: Value, cmp: CmpFn<'_>) -> Option<Value> {
        let keep = self.keeps_order();
        match &mut self.data {
            CollectionData::Map(m) => {
                let previous = m.insert(ValueKey(key), value);
                if previous.is_none() && keep {
                    m.sort_by(|a, _, b, _| cmp(&a.0, &b.0));
                }
                previous
            }
            _ => None,
        }
    }

    /// Map lookup.
    pub fn get(&self, key: &Value) -> Option<Value> {
        match &self.data {
            CollectionData::Map(m) => m.get(&ValueKey(key.clone())).cloned(),
            _ => None,
        }
    }

    /// List element at `index`.
    pub fn at(&self, index: usize) -> Option<Value> {
        match &self.data {
            CollectionData::List(v) => v.get(index).cloned(),
            CollectionData::Set(s) => s.get_index(index).map(|k| k.0.clone()),
            CollectionData::Map(m) => m.get_index(index).map(|(k, _)| k.0.clone()),
        }
    }

    /// Replaces a list element (unsorted lists only).
    pub fn set_at(&mut self, index: usize, value: Value) -> bool {
        match &mut self.data {
            CollectionData::List(v) if !self.kind.is_sorted() => match v.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Membership: element for lists and sets, key for maps.
    pub fn contains(&self, value: &Value) -> bool {
        match &self.data {
            CollectionData::List(v) => v.iter().any(|x| x == value),
            CollectionData::Set(s) => s.contains(&ValueKey(value.clone())),
            CollectionData::Map(m) => m.contains_key(&ValueKey(value.clone())),
        }
    }

    /// Removes the first equal element (or the map key). Order is preserved.
    pub fn remove(&mut self, value: &Value) -> bool {
        match &mut self.data {
            CollectionData::List(v) => match v.iter().position(|x| x == value) {
                Some(i) => {
                    v.remove(i);
                    true
                }
                None => false,
            },
            CollectionData::Set(s) => s.shift_remove(&ValueKey(value.clone())),
            CollectionData::Map(m) => m.shift_remove(&ValueKey(value.clone())).is_some(),
        }
    }

    pub fn clear(&mut self) {
        match &mut self.data {
            CollectionData::List(v) => v.clear(),
            CollectionData::Set(s) => s.clear(),
            CollectionData::Map(m) => m.clear(),
        }
    }

    /// Stops maintaining order on insert until [`resume_sorting`](Self::resume_sorting).
    pub fn defer_sorting(&mut self) {
        if self.kind.is_sorted() {
            self.sorting_deferred = true;
        }
    }

    /// Restores order and resumes ordered inserts. Returns whether the
    /// collection was deferred.
    pub fn resume_sorting(&mut self, cmp: CmpFn<'_>) -> bool {
        if !self.sorting_deferred {
            return false;
        }
        self.sort(cmp);
        self.sorting_deferred = false;
        true
    }

    /// Stable sort of the whole collection.
    pub fn sort(&mut self, cmp: CmpFn<'_>) {
        match &mut self.data {
            CollectionData::List(v) => v.sort_by(|a, b| cmp(a, b)),
            CollectionData::Set(s) => s.sort_by(|a, b| cmp(&a.0, &b.0)),
            CollectionData::Map(m) => m.sort_by(|a, _, b, _| cmp(&a.0, &b.0)),
        }
    }

    /// Whether iteration order is non-decreasing under `cmp`.
    pub fn is_ordered(&self, cmp: CmpFn<'_>) -> bool {
        self.values()
            .windows(2)
            .all(|w| cmp(&w[0], &w[1]) != Ordering::Greater)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn natural(a: &Value, b: &Value) -> Ordering {
        a.natural_cmp(b)
    }

    fn ints(c: &Collection) -> Vec<i64> {
        c.values().iter().filter_map(Value::as_int).collect()
    }

    #[test]
    fn sorted_list_keeps_order_on_push() {
        let mut c = Collection::new(CollectionKind::SortedList, TypeId::INT, None);
        for i in [5, 1, 4, 1, 3] {
            c.push(Value::Int(i), &natural);
        }
        assert_eq!(ints(&c), vec![1, 1, 3, 4, 5]);
    }

    #[test]
    fn deferred_sorting_appends_then_resorts() {
        let mut c = Collection::new(CollectionKind::SortedList, TypeId::INT, None);
        c.defer_sorting();
        for i in [3, 2, 1] {
            c.push(Value::Int(i), &natural);
        }
        assert_eq!(ints(&c), vec![3, 2, 1]);
        assert!(c.resume_sorting(&natural));
        assert_eq!(ints(&c), vec![1, 2, 3]);
        assert!(!c.resume_sorting(&natural));
    }

    #[test]
    fn unsorted_list_ignores_defer() {
        let mut c = Collection::new(CollectionKind::List, TypeId::INT, None);
        c.defer_sorting();
        assert!(!c.is_sorting_deferred());
    }

    #[test]
    fn set_rejects_duplicates() {
        let mut c = Collection::new(CollectionKind::SortedSet, TypeId::STRING, None);
        assert!(c.push(Value::str("b"), &natural));
        assert!(c.push(Value::str("a"), &natural));
        assert!(!c.push(Value::str("b"), &natural));
        assert_eq!(c.values(), vec![Value::str("a"), Value::str("b")]);
    }

    #[test]
    fn sorted_map_orders_keys() {
        let mut c = Collection::new(CollectionKind::SortedMap, TypeId::INT, Some(TypeId::STRING));
        c.put(Value::str("z"), Value::Int(1), &natural);
        c.put(Value::str("a"), Value::Int(2), &natural);
        assert_eq!(c.put(Value::str("z"), Value::Int(3), &natural), Some(Value::Int(1)));
        assert_eq!(c.values(), vec![Value::str("a"), Value::str("z")]);
        assert_eq!(c.get(&Value::str("z")), Some(Value::Int(3)));
    }

    #[test]
    fn remove_preserves_order() {
        let mut c = Collection::new(CollectionKind::Set, TypeId::INT, None);
        for i in [1, 2, 3] {
            c.push(Value::Int(i), &natural);
        }
        assert!(c.remove(&Value::Int(2)));
        assert!(!c.remove(&Value::Int(2)));
        assert_eq!(ints(&c), vec![1, 3]);
    }

    #[test]
    fn shaped_by_parametric_type() {
        let mut types = TypeRegistry::new();
        let map = types.map_type(TypeId::STRING, TypeId::INT);
        let c = Collection::for_type(&types, map);
        assert_eq!(c.kind(), CollectionKind::Map);
        assert_eq!(c.key_type(), Some(TypeId::STRING));
        assert_eq!(c.elem_type(), TypeId::INT);
    }

    #[test]
    fn from_entries_keeps_given_order() {
        let c = Collection::from_entries(
            CollectionKind::SortedList,
            TypeId::INT,
            None,
            vec![(None, Value::Int(1)), (None, Value::Int(2))],
        );
        assert_eq!(ints(&c), vec![1, 2]);
        assert!(!c.is_sorting_deferred());
    }

    #[test]
    fn descending_comparator() {
        let desc = |a: &Value, b: &Value| b.natural_cmp(a);
        let mut c = Collection::new(CollectionKind::SortedList, TypeId::INT, None);
        for i in [2, 9, 4] {
            c.push(Value::Int(i), &desc);
        }
        assert_eq!(ints(&c), vec![9, 4, 2]);
    }

    proptest! {
        #[test]
        fn sorted_list_iterates_in_order(xs in proptest::collection::vec(-1000i64..1000, 0..64)) {
            let mut c = Collection::new(CollectionKind::SortedList, TypeId::INT, None);
            for x in &xs {
                c.push(Value::Int(*x), &natural);
            }
            prop_assert!(c.is_ordered(&natural));
            prop_assert_eq!(c.len(), xs.len());
        }

        #[test]
        fn resume_restores_order(xs in proptest::collection::vec(any::<i32>(), 0..64), split in 0usize..64) {
            let mut c = Collection::new(CollectionKind::SortedSet, TypeId::INT32, None);
            let split = split.min(xs.len());
            for x in &xs[..split] {
                c.push(Value::Int32(*x), &natural);
            }
            c.defer_sorting();
            for x in &xs[split..] {
                c.push(Value::Int32(*x), &natural);
            }
            c.resume_sorting(&natural);
            prop_assert!(c.is_ordered(&natural));
        }
    }
}
