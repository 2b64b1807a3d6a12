//! Storage-layer record types.
//!
//! Records are value-agnostic: the runtime flattens an in-memory object into
//! an [`ObjectRecord`] of literal columns and relation rows before writing,
//! and rebuilds values from the declared attribute types after loading.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use relish_core::Dbid;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How long a write waits for another session's write lock.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Identifies the interpreter thread a store call is made on behalf of.
///
/// A session that opened a transaction sees its own uncommitted writes;
/// every other session keeps seeing the last committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// A single stored cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoredValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Reference to another stored object.
    Ref(Dbid),
}

impl StoredValue {
    pub fn as_ref_dbid(&self) -> Option<Dbid> {
        match self {
            StoredValue::Ref(d) => Some(*d),
            _ => None,
        }
    }
}

/// One row of a relation or collection join table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredElement {
    /// Position in iteration order.
    pub ordinal: i64,
    /// Map key; `None` for lists and sets.
    pub key: Option<StoredValue>,
    pub value: StoredValue,
}

impl StoredElement {
    pub fn new(ordinal: i64, value: StoredValue) -> Self {
        StoredElement {
            ordinal,
            key: None,
            value,
        }
    }

    pub fn keyed(ordinal: i64, key: StoredValue, value: StoredValue) -> Self {
        StoredElement {
            ordinal,
            key: Some(key),
            value,
        }
    }
}

/// Everything stored for one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub dbid: Dbid,
    pub uuid: Uuid,
    /// Canonical type name (`shop/Car`, `List[shop/Car]`).
    pub type_name: String,
    /// Single-valued primitive attributes, one column each.
    pub primitives: BTreeMap<String, StoredValue>,
    /// References and multi-valued attributes, one join table each.
    pub relations: BTreeMap<String, Vec<StoredElement>>,
    /// Elements of a collection object; `None` for structured objects.
    pub elements: Option<Vec<StoredElement>>,
}

impl ObjectRecord {
    /// An empty record for a freshly allocated object.
    pub fn new(dbid: Dbid, uuid: Uuid, type_name: impl Into<String>) -> Self {
        ObjectRecord {
            dbid,
            uuid,
            type_name: type_name.into(),
            primitives: BTreeMap::new(),
            relations: BTreeMap::new(),
            elements: None,
        }
    }

    /// Every dbid this record refers to.
    pub fn references(&self) -> impl Iterator<Item = Dbid> + '_ {
        self.relations
            .values()
            .flatten()
            .chain(self.elements.iter().flatten())
            .flat_map(|e| {
                e.key
                    .as_ref()
                    .and_then(StoredValue::as_ref_dbid)
                    .into_iter()
                    .chain(e.value.as_ref_dbid())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_cover_relations_elements_and_keys() {
        let mut rec = ObjectRecord::new(Dbid(1), Uuid::new_v4(), "shop/Garage");
        rec.primitives
            .insert("name".into(), StoredValue::Text("north".into()));
        rec.relations.insert(
            "cars".into(),
            vec![
                StoredElement::new(0, StoredValue::Ref(Dbid(2))),
                StoredElement::new(1, StoredValue::Ref(Dbid(3))),
            ],
        );
        rec.elements = Some(vec![StoredElement::keyed(
            0,
            StoredValue::Ref(Dbid(4)),
            StoredValue::Int(7),
        )]);
        let mut refs: Vec<_> = rec.references().collect();
        refs.sort();
        assert_eq!(refs, vec![Dbid(2), Dbid(3), Dbid(4)]);
    }

    #[test]
    fn record_serializes_to_json() {
        let rec = ObjectRecord::new(Dbid(5), Uuid::nil(), "shop/Car");
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["type_name"], "shop/Car");
        assert_eq!(json["dbid"], 5);
    }
}
