//! Stable ID newtypes for runtime entities.
//!
//! Types, methods and multi-methods are identified by dense `u32` indices into
//! their owning tables. [`Dbid`] is the local database id of a persisted value
//! and wraps SQLite's `INTEGER PRIMARY KEY`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a type in the [`TypeRegistry`](crate::TypeRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

/// Identity of a single method in the multi-method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId(pub u32);

/// Identity of a `(package, name)` multi-method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultiMethodId(pub u32);

/// Local database id, assigned the first time a value is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dbid(pub i64);

impl TypeId {
    /// Index into registry tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MultiMethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Dbid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_id_display() {
        assert_eq!(format!("{}", TypeId(7)), "TypeId(7)");
    }

    #[test]
    fn dbid_display() {
        assert_eq!(format!("{}", Dbid(42)), "42");
    }

    #[test]
    fn type_id_index() {
        assert_eq!(TypeId(12).index(), 12);
    }

    #[test]
    fn serde_roundtrip() {
        let id = MultiMethodId(3);
        let json = serde_json::to_string(&id).unwrap();
        let back: MultiMethodId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);

        let dbid = Dbid(-1);
        let json = serde_json::to_string(&dbid).unwrap();
        let back: Dbid = serde_json::from_str(&json).unwrap();
        assert_eq!(dbid, back);
    }
}
