//! Runtime value representation.
//!
//! [`Value`] is the dynamic counterpart of the type lattice. Primitives are
//! immutable and held inline (strings and byte strings behind an `Arc`);
//! structured objects, collections, channels, mutexes and closures are
//! shared handles whose identity is the pointer they hold.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use relish_core::{MultiMethodId, TypeId};

use crate::channel::RChannel;
use crate::object::{ObjRef, RObject};
use crate::sync::{RMutex, RRwMutex};

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Int32(i32),
    Uint(u64),
    Uint32(u32),
    Byte(u8),
    Float(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    Time(DateTime<Utc>),
    /// Structured object or collection.
    Object(ObjRef),
    Channel(Arc<RChannel>),
    Mutex(Arc<RMutex>),
    RwMutex(Arc<RRwMutex>),
    Closure(Arc<Closure>),
}

/// A multi-method with leading arguments already bound.
#[derive(Debug)]
pub struct Closure {
    pub multi: MultiMethodId,
    pub bound: Vec<Value>,
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    pub fn bytes(b: &[u8]) -> Value {
        Value::Bytes(Arc::from(b))
    }

    /// Value of an attribute of type `t` that was never assigned.
    pub fn zero_of(t: TypeId) -> Value {
        match t {
            TypeId::INT | TypeId::INTEGER | TypeId::NUMERIC => Value::Int(0),
            TypeId::INT32 => Value::Int32(0),
            TypeId::UINT => Value::Uint(0),
            TypeId::UINT32 => Value::Uint32(0),
            TypeId::BYTE => Value::Byte(0),
            TypeId::FLOAT => Value::Float(0.0),
            TypeId::BOOL => Value::Bool(false),
            TypeId::STRING => Value::str(""),
            TypeId::BYTES => Value::bytes(&[]),
            TypeId::TIME => Value::Time(DateTime::<Utc>::UNIX_EPOCH),
            _ => Value::Nil,
        }
    }

    /// The dynamic type of this value.
    pub fn type_of(&self) -> TypeId {
        match self {
            Value::Nil => TypeId::NIL,
            Value::Bool(_) => TypeId::BOOL,
            Value::Int(_) => TypeId::INT,
            Value::Int32(_) => TypeId::INT32,
            Value::Uint(_) => TypeId::UINT,
            Value::Uint32(_) => TypeId::UINT32,
            Value::Byte(_) => TypeId::BYTE,
            Value::Float(_) => TypeId::FLOAT,
            Value::Str(_) => TypeId::STRING,
            Value::Bytes(_) => TypeId::BYTES,
            Value::Time(_) => TypeId::TIME,
            Value::Object(o) => o.type_id(),
            Value::Channel(c) => c.type_id(),
            Value::Mutex(_) => TypeId::MUTEX,
            Value::RwMutex(_) => TypeId::RW_MUTEX,
            Value::Closure(_) => TypeId::CALLABLE,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Whether this is an immutable primitive.
    pub fn is_primitive(&self) -> bool {
        !matches!(
            self,
            Value::Nil
                | Value::Object(_)
                | Value::Channel(_)
                | Value::Mutex(_)
                | Value::RwMutex(_)
                | Value::Closure(_)
        )
    }

    /// The zero-value predicate: `nil`, `false`, numeric zero, empty
    /// strings and byte strings, the Unix epoch, and empty collections.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Nil => true,
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Int32(i) => *i == 0,
            Value::Uint(u) => *u == 0,
            Value::Uint32(u) => *u == 0,
            Value::Byte(b) => *b == 0,
            Value::Float(f) => *f == 0.0,
            Value::Str(s) => s.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Time(t) => *t == DateTime::<Utc>::UNIX_EPOCH,
            Value::Object(o) => o.collection_len() == Some(0),
            Value::Channel(_) | Value::Mutex(_) | Value::RwMutex(_) | Value::Closure(_) => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Any integer kind that fits in an `i64`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Int32(i) => Some(i64::from(*i)),
            Value::Uint(u) => i64::try_from(*u).ok(),
            Value::Uint32(u) => Some(i64::from(*u)),
            Value::Byte(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    pub fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<&Arc<RChannel>> {
        match self {
            Value::Channel(c) => Some(c),
            _ => None,
        }
    }

    fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Uint(u) => Some(i128::from(*u)),
            other => other.as_int().map(i128::from),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Nil => 0,
            Value::Bool(_) => 1,
            Value::Int(_)
            | Value::Int32(_)
            | Value::Uint(_)
            | Value::Uint32(_)
            | Value::Byte(_)
            | Value::Float(_) => 2,
            Value::Str(_) => 3,
            Value::Bytes(_) => 4,
            Value::Time(_) => 5,
            _ => 6,
        }
    }

    /// Address of the shared handle, for identity comparisons.
    fn addr(&self) -> usize {
        match self {
            Value::Object(o) => Arc::as_ptr(o) as usize,
            Value::Channel(c) => Arc::as_ptr(c) as usize,
            Value::Mutex(m) => Arc::as_ptr(m) as usize,
            Value::RwMutex(m) => Arc::as_ptr(m) as usize,
            Value::Closure(c) => Arc::as_ptr(c) as usize,
            _ => 0,
        }
    }

    /// Total order used by sorted collections with the natural comparator.
    ///
    /// Numbers compare numerically across kinds; values of different kinds
    /// order by kind; handles order by address.
    pub fn natural_cmp(&self, other: &Value) -> Ordering {
        let by_rank = self.rank().cmp(&other.rank());
        if by_rank != Ordering::Equal {
            return by_rank;
        }
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (a, b) if a.rank() == 2 => match (a.as_i128(), b.as_i128()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => {
                    let x = a.as_float().unwrap_or(f64::NAN);
                    let y = b.as_float().unwrap_or(f64::NAN);
                    x.total_cmp(&y)
                }
            },
            (a, b) => a.addr().cmp(&b.addr()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::Uint(a), Value::Uint(b)) => a == b,
            (Value::Uint32(a), Value::Uint32(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (a, b) if !a.is_primitive() && !b.is_primitive() => {
                std::mem::discriminant(a) == std::mem::discriminant(b) && a.addr() == b.addr()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("Nil"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Int32(i) => write!(f, "Int32({i})"),
            Value::Uint(u) => write!(f, "Uint({u})"),
            Value::Uint32(u) => write!(f, "Uint32({u})"),
            Value::Byte(b) => write!(f, "Byte({b})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Value::Time(t) => write!(f, "Time({})", t.to_rfc3339()),
            Value::Object(o) => write!(f, "Object({:?})", RObject::summary(o)),
            Value::Channel(c) => write!(f, "Channel(cap={})", c.capacity()),
            Value::Mutex(_) => f.write_str("Mutex"),
            Value::RwMutex(_) => f.write_str("RwMutex"),
            Value::Closure(c) => write!(f, "Closure({})", c.multi),
        }
    }
}

/// Plain rendering used by `print` and template interpolation.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Int32(i) => write!(f, "{i}"),
            Value::Uint(u) => write!(f, "{u}"),
            Value::Uint32(u) => write!(f, "{u}"),
            Value::Byte(b) => write!(f, "{b}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => f.write_str(s),
            Value::Bytes(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Time(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            other => write!(f, "{other:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<ObjRef> for Value {
    fn from(o: ObjRef) -> Self {
        Value::Object(o)
    }
}

/// Hashable wrapper used as a set element or map key.
///
/// Primitives compare by kind and value (floats bitwise); handles compare by
/// identity.
#[derive(Clone, Debug)]
pub struct ValueKey(pub Value);

impl PartialEq for ValueKey {
    fn eq(&self, other: &ValueKey) -> bool {
        match (&self.0, &other.0) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (a, b) => a == b,
        }
    }
}

impl Eq for ValueKey {}

impl Hash for ValueKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            Value::Nil => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Int32(i) => i.hash(state),
            Value::Uint(u) => u.hash(state),
            Value::Uint32(u) => u.hash(state),
            Value::Byte(b) => b.hash(state),
            Value::Float(x) => x.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Bytes(b) => b.hash(state),
            Value::Time(t) => t.hash(state),
            other => other.addr().hash(state),
        }
    }
}

impl From<Value> for ValueKey {
    fn from(v: Value) -> Self {
        ValueKey(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn primitive_types() {
        assert_eq!(Value::Int(1).type_of(), TypeId::INT);
        assert_eq!(Value::str("x").type_of(), TypeId::STRING);
        assert_eq!(Value::Nil.type_of(), TypeId::NIL);
        assert!(Value::Byte(3).is_primitive());
        assert!(!Value::Nil.is_primitive());
    }

    #[test]
    fn zero_values() {
        assert!(Value::Nil.is_zero());
        assert!(Value::str("").is_zero());
        assert!(Value::Float(0.0).is_zero());
        assert!(Value::Time(DateTime::<Utc>::UNIX_EPOCH).is_zero());
        assert!(!Value::Int(-1).is_zero());
        assert!(!Value::str("a").is_zero());
    }

    #[test]
    fn natural_order_is_numeric_across_kinds() {
        assert_eq!(Value::Int(2).natural_cmp(&Value::Float(1.5)), Ordering::Greater);
        assert_eq!(Value::Uint(u64::MAX).natural_cmp(&Value::Int(-1)), Ordering::Greater);
        assert_eq!(Value::Byte(7).natural_cmp(&Value::Int32(7)), Ordering::Equal);
        assert_eq!(Value::str("b").natural_cmp(&Value::str("a")), Ordering::Greater);
        assert_eq!(Value::Nil.natural_cmp(&Value::Bool(false)), Ordering::Less);
    }

    #[test]
    fn keys_hash_by_value() {
        let mut set = HashSet::new();
        set.insert(ValueKey(Value::str("a")));
        set.insert(ValueKey(Value::str("a")));
        set.insert(ValueKey(Value::Int(1)));
        set.insert(ValueKey(Value::Int32(1)));
        set.insert(ValueKey(Value::Float(f64::NAN)));
        set.insert(ValueKey(Value::Float(f64::NAN)));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn display_is_plain() {
        assert_eq!(Value::str("hi").to_string(), "hi");
        assert_eq!(Value::Nil.to_string(), "nil");
        assert_eq!(Value::Bool(true).to_string(), "true");
    }
}
