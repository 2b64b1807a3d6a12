//! Built-in primitives of the root package.
//!
//! Every primitive is a native method, dispatched like any user method.
//! Primitives that return a trailing `err` string report the conditions it
//! can express there (empty on success) instead of failing the thread.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relish_core::{TypeId, ROOT_PACKAGE};

use crate::channel::RChannel;
use crate::error::RuntimeError;
use crate::object::ObjRef;
use crate::runtime::RuntimeBuilder;
use crate::sync::{RMutex, RRwMutex};
use crate::thread::InterpreterThread;
use crate::value::Value;

type Results = Result<Vec<Value>, RuntimeError>;

const P: &str = ROOT_PACKAGE;

fn arg(args: &[Value], i: usize) -> Result<&Value, RuntimeError> {
    args.get(i)
        .ok_or_else(|| RuntimeError::InvalidArgument(format!("missing argument {i}")))
}

fn str_arg(args: &[Value], i: usize) -> Result<&str, RuntimeError> {
    let v = arg(args, i)?;
    v.as_str()
        .ok_or_else(|| RuntimeError::type_mismatch("String", format!("{v:?}")))
}

fn int_arg(args: &[Value], i: usize) -> Result<i64, RuntimeError> {
    let v = arg(args, i)?;
    v.as_int()
        .ok_or_else(|| RuntimeError::type_mismatch("Integer", format!("{v:?}")))
}

fn capacity_arg(args: &[Value], i: usize) -> Result<usize, RuntimeError> {
    let cap = int_arg(args, i)?;
    usize::try_from(cap)
        .map_err(|_| RuntimeError::InvalidArgument(format!("negative channel capacity {cap}")))
}

fn obj_arg(args: &[Value], i: usize) -> Result<&ObjRef, RuntimeError> {
    let v = arg(args, i)?;
    v.as_object()
        .ok_or_else(|| RuntimeError::type_mismatch("NonPrimitive", format!("{v:?}")))
}

fn chan_arg(args: &[Value], i: usize) -> Result<&Arc<RChannel>, RuntimeError> {
    let v = arg(args, i)?;
    v.as_channel()
        .ok_or_else(|| RuntimeError::type_mismatch("Channel", format!("{v:?}")))
}

fn mutex_arg(args: &[Value], i: usize) -> Result<&Arc<RMutex>, RuntimeError> {
    match arg(args, i)? {
        Value::Mutex(m) => Ok(m),
        other => Err(RuntimeError::type_mismatch("Mutex", format!("{other:?}"))),
    }
}

fn rw_arg(args: &[Value], i: usize) -> Result<&Arc<RRwMutex>, RuntimeError> {
    match arg(args, i)? {
        Value::RwMutex(m) => Ok(m),
        other => Err(RuntimeError::type_mismatch("RwMutex", format!("{other:?}"))),
    }
}

fn millis(ms: i64) -> Result<Duration, RuntimeError> {
    u64::try_from(ms)
        .map(Duration::from_millis)
        .map_err(|_| RuntimeError::InvalidArgument(format!("negative duration {ms}ms")))
}

/// The trailing `err` result.
fn err_result(result: Result<(), RuntimeError>) -> Results {
    Ok(vec![Value::str(&match result {
        Ok(()) => String::new(),
        Err(e) => e.err_string(),
    })])
}

/// Substring by codepoint indices, `start` inclusive and `end` exclusive.
pub fn slice_codepoints(s: &str, start: i64, end: i64) -> Result<String, RuntimeError> {
    let len = s.chars().count();
    let bound = |i: i64| -> Result<usize, RuntimeError> {
        usize::try_from(i)
            .ok()
            .filter(|&u| u <= len)
            .ok_or(RuntimeError::IndexOutOfRange { index: i, len })
    };
    let (from, to) = (bound(start)?, bound(end)?);
    if from > to {
        return Err(RuntimeError::IndexOutOfRange { index: start, len });
    }
    Ok(s.chars().skip(from).take(to - from).collect())
}

pub(crate) fn install(b: &mut RuntimeBuilder) -> Result<(), RuntimeError> {
    install_persistence(b)?;
    install_strings(b)?;
    install_collections(b)?;
    install_concurrency(b)?;
    install_misc(b)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

fn install_persistence(b: &mut RuntimeBuilder) -> Result<(), RuntimeError> {
    b.define_native(P, "dub", &[TypeId::NON_PRIMITIVE, TypeId::STRING], &[], |t, args| {
        let p = t.runtime().persistence();
        p.dub(t.session(), obj_arg(&args, 0)?, str_arg(&args, 1)?)?;
        Ok(vec![])
    })?;
    b.define_native(P, "summon", &[TypeId::STRING], &[TypeId::ANY], |t, args| {
        let obj = t
            .runtime()
            .persistence()
            .summon(t.session(), str_arg(&args, 0)?, 0)?;
        Ok(vec![Value::Object(obj)])
    })?;
    b.define_native(P, "exists", &[TypeId::STRING], &[TypeId::BOOL], |t, args| {
        let found = t
            .runtime()
            .persistence()
            .name_exists(t.session(), str_arg(&args, 0)?)?;
        Ok(vec![Value::Bool(found)])
    })?;
    b.define_native(P, "rename", &[TypeId::STRING, TypeId::STRING], &[TypeId::STRING], |t, args| {
        let (old, new) = (str_arg(&args, 0)?, str_arg(&args, 1)?);
        err_result(t.runtime().persistence().rename(t.session(), old, new))
    })?;
    b.define_native(P, "persist", &[TypeId::NON_PRIMITIVE], &[], |t, args| {
        t.runtime()
            .persistence()
            .ensure_persisted(t.session(), obj_arg(&args, 0)?)?;
        Ok(vec![])
    })?;
    b.define_native(P, "delete", &[TypeId::NON_PRIMITIVE], &[], |t, args| {
        t.runtime().persistence().delete(t.session(), obj_arg(&args, 0)?)?;
        Ok(vec![])
    })?;
    b.define_native(P, "begin", &[], &[TypeId::STRING], |t, _| err_result(t.begin()))?;
    b.define_native(P, "commit", &[], &[TypeId::STRING], |t, _| err_result(t.commit()))?;
    b.define_native(P, "rollback", &[], &[TypeId::STRING], |t, _| err_result(t.rollback()))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

fn install_strings(b: &mut RuntimeBuilder) -> Result<(), RuntimeError> {
    b.define_native(P, "len", &[TypeId::STRING], &[TypeId::INT], |_, args| {
        Ok(vec![Value::Int(str_arg(&args, 0)?.chars().count() as i64)])
    })?;
    b.define_native(P, "len", &[TypeId::BYTES], &[TypeId::INT], |_, args| match arg(&args, 0)? {
        Value::Bytes(bytes) => Ok(vec![Value::Int(bytes.len() as i64)]),
        other => Err(RuntimeError::type_mismatch("Bytes", format!("{other:?}"))),
    })?;
    b.define_native(
        P,
        "slice",
        &[TypeId::STRING, TypeId::INT, TypeId::INT],
        &[TypeId::STRING],
        |_, args| {
            let s = slice_codepoints(str_arg(&args, 0)?, int_arg(&args, 1)?, int_arg(&args, 2)?)?;
            Ok(vec![Value::from(s)])
        },
    )?;
    b.define_native(P, "string", &[TypeId::ANY], &[TypeId::STRING], |_, args| {
        Ok(vec![Value::from(arg(&args, 0)?.to_string())])
    })?;
    b.define_variadic_native(P, "print", &[TypeId::ANY], &[], |t, args| {
        let line = args
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}")?;
        tracing::trace!(thread = t.id(), "print");
        Ok(vec![])
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Collections and attributes
// ---------------------------------------------------------------------------

fn install_collections(b: &mut RuntimeBuilder) -> Result<(), RuntimeError> {
    b.define_native(P, "len", &[TypeId::COLLECTION], &[TypeId::INT], |t, args| {
        let n = t
            .runtime()
            .persistence()
            .read_collection(t.session(), obj_arg(&args, 0)?, |c| c.len())?;
        Ok(vec![Value::Int(n as i64)])
    })?;
    b.define_native(P, "push", &[TypeId::LIST, TypeId::ANY], &[], |t, args| {
        let value = arg(&args, 1)?.clone();
        check_element(t, obj_arg(&args, 0)?, &value)?;
        t.runtime()
            .persistence()
            .mutate_collection(t.session(), obj_arg(&args, 0)?, |c, cmp| c.push(value, cmp))?;
        Ok(vec![])
    })?;
    b.define_native(P, "push", &[TypeId::SET, TypeId::ANY], &[TypeId::BOOL], |t, args| {
        let value = arg(&args, 1)?.clone();
        check_element(t, obj_arg(&args, 0)?, &value)?;
        let added = t
            .runtime()
            .persistence()
            .mutate_collection(t.session(), obj_arg(&args, 0)?, |c, cmp| c.push(value, cmp))?;
        Ok(vec![Value::Bool(added)])
    })?;
    b.define_native(P, "put", &[TypeId::MAP, TypeId::ANY, TypeId::ANY], &[], |t, args| {
        let (key, value) = (arg(&args, 1)?.clone(), arg(&args, 2)?.clone());
        check_element(t, obj_arg(&args, 0)?, &value)?;
        t.runtime()
            .persistence()
            .mutate_collection(t.session(), obj_arg(&args, 0)?, |c, cmp| c.put(key, value, cmp))?;
        Ok(vec![])
    })?;
    b.define_native(P, "at", &[TypeId::LIST, TypeId::INT], &[TypeId::ANY], |t, args| {
        let index = int_arg(&args, 1)?;
        let (value, len) = t.runtime().persistence().read_collection(
            t.session(),
            obj_arg(&args, 0)?,
            |c| (usize::try_from(index).ok().and_then(|i| c.at(i)), c.len()),
        )?;
        Ok(vec![value.ok_or(RuntimeError::IndexOutOfRange { index, len })?])
    })?;
    b.define_native(P, "contains", &[TypeId::COLLECTION, TypeId::ANY], &[TypeId::BOOL], |t, args| {
        let needle = arg(&args, 1)?;
        let found = t
            .runtime()
            .persistence()
            .read_collection(t.session(), obj_arg(&args, 0)?, |c| c.contains(needle))?;
        Ok(vec![Value::Bool(found)])
    })?;
    b.define_native(P, "remove", &[TypeId::COLLECTION, TypeId::ANY], &[TypeId::BOOL], |t, args| {
        let needle = arg(&args, 1)?.clone();
        let removed = t
            .runtime()
            .persistence()
            .mutate_collection(t.session(), obj_arg(&args, 0)?, |c, _| c.remove(&needle))?;
        Ok(vec![Value::Bool(removed)])
    })?;
    b.define_native(P, "deferSorting", &[TypeId::COLLECTION], &[], |t, args| {
        t.runtime()
            .persistence()
            .mutate_collection(t.session(), obj_arg(&args, 0)?, |c, _| c.defer_sorting())?;
        Ok(vec![])
    })?;
    b.define_native(P, "resumeSorting", &[TypeId::COLLECTION], &[], |t, args| {
        t.runtime()
            .persistence()
            .mutate_collection(t.session(), obj_arg(&args, 0)?, |c, cmp| c.resume_sorting(cmp))?;
        Ok(vec![])
    })?;

    // Attribute access by name; the object comes last so templates can
    // pipe into it.
    b.define_native(P, "get", &[TypeId::STRING, TypeId::NON_PRIMITIVE], &[TypeId::ANY], |t, args| {
        Ok(vec![t.get_attr(obj_arg(&args, 1)?, str_arg(&args, 0)?)?])
    })?;
    // Map lookup. The String-keyed form outranks attribute access on maps.
    for key_type in [TypeId::ANY, TypeId::STRING] {
        b.define_native(P, "get", &[key_type, TypeId::MAP], &[TypeId::ANY], map_get)?;
    }
    b.define_native(
        P,
        "set",
        &[TypeId::NON_PRIMITIVE, TypeId::STRING, TypeId::ANY],
        &[],
        |t, args| {
            t.set_attr(obj_arg(&args, 0)?, str_arg(&args, 1)?, arg(&args, 2)?.clone())?;
            Ok(vec![])
        },
    )?;
    Ok(())
}

fn map_get(t: &mut InterpreterThread, args: Vec<Value>) -> Results {
    let key = arg(&args, 0)?;
    let found = t
        .runtime()
        .persistence()
        .read_collection(t.session(), obj_arg(&args, 1)?, |c| c.get(key))?;
    Ok(vec![found.unwrap_or(Value::Nil)])
}

fn check_element(t: &InterpreterThread, coll: &ObjRef, value: &Value) -> Result<(), RuntimeError> {
    let elem = t
        .runtime()
        .persistence()
        .read_collection(t.session(), coll, |c| c.elem_type())?;
    let types = t.runtime().types();
    if types.is_ancestor(elem, value.type_of()) || (value.is_nil() && !types.is_primitive(elem)) {
        Ok(())
    } else {
        Err(RuntimeError::type_mismatch(
            types.name(elem),
            types.name(value.type_of()),
        ))
    }
}

// ---------------------------------------------------------------------------
// Channels, mutexes and time
// ---------------------------------------------------------------------------

fn install_concurrency(b: &mut RuntimeBuilder) -> Result<(), RuntimeError> {
    b.define_native(P, "channel", &[TypeId::INT], &[TypeId::CHANNEL], |t, args| {
        let cap = capacity_arg(&args, 0)?;
        Ok(vec![Value::Channel(t.runtime().new_channel(TypeId::ANY, cap))])
    })?;
    // channel("Int", 4) makes a Channel[Int]: sends are checked against Int
    // and methods on Channel[Int] dispatch on it.
    b.define_native(
        P,
        "channel",
        &[TypeId::STRING, TypeId::INT],
        &[TypeId::CHANNEL],
        |t, args| {
            let elem = t.runtime().type_table().resolve(str_arg(&args, 0)?)?;
            let cap = capacity_arg(&args, 1)?;
            Ok(vec![Value::Channel(t.runtime().new_channel(elem, cap))])
        },
    )?;
    b.define_native(P, "send", &[TypeId::CHANNEL, TypeId::ANY], &[], |t, args| {
        let ch = Arc::clone(chan_arg(&args, 0)?);
        let value = arg(&args, 1)?.clone();
        let types = t.runtime().types();
        let elem = ch.elem_type();
        if !(types.is_ancestor(elem, value.type_of()) || (value.is_nil() && !types.is_primitive(elem))) {
            return Err(RuntimeError::type_mismatch(
                types.name(elem),
                types.name(value.type_of()),
            ));
        }
        t.blocking(|| ch.send(value))?;
        Ok(vec![])
    })?;
    b.define_native(P, "recv", &[TypeId::CHANNEL], &[TypeId::ANY, TypeId::BOOL], |t, args| {
        let ch = Arc::clone(chan_arg(&args, 0)?);
        let (value, ok) = t.blocking(|| ch.recv());
        Ok(vec![value, Value::Bool(ok)])
    })?;
    b.define_native(P, "close", &[TypeId::CHANNEL], &[], |_, args| {
        chan_arg(&args, 0)?.close()?;
        Ok(vec![])
    })?;
    b.define_native(P, "len", &[TypeId::CHANNEL], &[TypeId::INT], |_, args| {
        Ok(vec![Value::Int(chan_arg(&args, 0)?.len() as i64)])
    })?;
    b.define_native(P, "cap", &[TypeId::CHANNEL], &[TypeId::INT], |_, args| {
        Ok(vec![Value::Int(chan_arg(&args, 0)?.capacity() as i64)])
    })?;

    b.define_native(P, "mutex", &[], &[TypeId::MUTEX], |_, _| {
        Ok(vec![Value::Mutex(Arc::new(RMutex::new()))])
    })?;
    b.define_native(P, "rwMutex", &[], &[TypeId::RW_MUTEX], |_, _| {
        Ok(vec![Value::RwMutex(Arc::new(RRwMutex::new()))])
    })?;
    b.define_native(P, "lock", &[TypeId::MUTEX], &[], |t, args| {
        let m = Arc::clone(mutex_arg(&args, 0)?);
        t.blocking(|| m.lock());
        Ok(vec![])
    })?;
    b.define_native(P, "unlock", &[TypeId::MUTEX], &[], |_, args| {
        mutex_arg(&args, 0)?.unlock()?;
        Ok(vec![])
    })?;
    b.define_native(P, "lock", &[TypeId::RW_MUTEX], &[], |t, args| {
        let m = Arc::clone(rw_arg(&args, 0)?);
        t.blocking(|| m.lock());
        Ok(vec![])
    })?;
    b.define_native(P, "unlock", &[TypeId::RW_MUTEX], &[], |_, args| {
        rw_arg(&args, 0)?.unlock()?;
        Ok(vec![])
    })?;
    b.define_native(P, "rlock", &[TypeId::RW_MUTEX], &[], |t, args| {
        let m = Arc::clone(rw_arg(&args, 0)?);
        t.blocking(|| m.rlock());
        Ok(vec![])
    })?;
    b.define_native(P, "runlock", &[TypeId::RW_MUTEX], &[], |_, args| {
        rw_arg(&args, 0)?.runlock()?;
        Ok(vec![])
    })?;

    b.define_native(P, "sleep", &[TypeId::INT], &[], |t, args| {
        let d = millis(int_arg(&args, 0)?)?;
        t.blocking(|| std::thread::sleep(d));
        Ok(vec![])
    })?;
    b.define_native(P, "tick", &[TypeId::INT], &[TypeId::CHANNEL], |t, args| {
        let period = millis(int_arg(&args, 0)?)?;
        if period.is_zero() {
            return Err(RuntimeError::InvalidArgument("tick period must be positive".into()));
        }
        let ch = t.runtime().new_channel(TypeId::TIME, 1);
        let feed = Arc::clone(&ch);
        std::thread::Builder::new()
            .name("relish-tick".into())
            .spawn(move || loop {
                std::thread::sleep(period);
                // Ticks are dropped while the receiver lags; the feed stops
                // once the channel is closed or nobody else holds it.
                if Arc::strong_count(&feed) == 1 {
                    break;
                }
                if feed.try_send(Value::Time(Utc::now())).is_err() {
                    break;
                }
            })?;
        Ok(vec![Value::Channel(ch)])
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

fn install_misc(b: &mut RuntimeBuilder) -> Result<(), RuntimeError> {
    b.define_native(P, "now", &[], &[TypeId::TIME], |_, _| Ok(vec![Value::Time(Utc::now())]))?;
    b.define_native(P, "nonempty", &[TypeId::ANY], &[TypeId::BOOL], |_, args| {
        Ok(vec![Value::Bool(!arg(&args, 0)?.is_zero())])
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_respects_codepoints() {
        assert_eq!(slice_codepoints("héllo wörld", 1, 5).unwrap(), "éllo");
        assert_eq!(slice_codepoints("日本語", 1, 3).unwrap(), "本語");
        assert_eq!(slice_codepoints("abc", 3, 3).unwrap(), "");
    }

    #[test]
    fn slice_out_of_range() {
        assert!(matches!(
            slice_codepoints("日本", 0, 3),
            Err(RuntimeError::IndexOutOfRange { index: 3, len: 2 })
        ));
        assert!(slice_codepoints("abc", -1, 2).is_err());
        assert!(slice_codepoints("abc", 2, 1).is_err());
    }

    #[test]
    fn negative_duration_rejected() {
        assert!(millis(-5).is_err());
        assert_eq!(millis(250).unwrap(), Duration::from_millis(250));
    }
}
