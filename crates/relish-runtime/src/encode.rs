//! JSON and XML renderings of runtime values.
//!
//! Objects encode their attributes in layout order, loading lazy ones as
//! needed. An object met again on the current path encodes as a reference
//! (`{"$ref": "<uuid>"}` / `<ref uuid="..."/>`) so cyclic graphs terminate.

use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;

use chrono::SecondsFormat;
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::error::RuntimeError;
use crate::object::{Body, ObjRef, RObject};
use crate::thread::InterpreterThread;
use crate::value::Value;

type Path = HashSet<*const RObject>;

/// Encodes a value as JSON.
pub fn to_json(t: &InterpreterThread, value: &Value) -> Result<Json, RuntimeError> {
    json_value(t, value, &mut Path::new())
}

fn json_value(t: &InterpreterThread, value: &Value, path: &mut Path) -> Result<Json, RuntimeError> {
    Ok(match value {
        Value::Nil => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Int32(i) => json!(i),
        Value::Uint(u) => json!(u),
        Value::Uint32(u) => json!(u),
        Value::Byte(b) => json!(b),
        Value::Float(x) => json!(x),
        Value::Str(s) => json!(&**s),
        Value::Bytes(b) => json!(&**b),
        Value::Time(ts) => json!(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::Object(obj) => {
            let key = Arc::as_ptr(obj);
            if !path.insert(key) {
                return Ok(json!({ "$ref": obj.ensure_uuid().to_string() }));
            }
            let encoded = json_object(t, obj, path);
            path.remove(&key);
            encoded?
        }
        other => json!(other.to_string()),
    })
}

fn json_object(t: &InterpreterThread, obj: &ObjRef, path: &mut Path) -> Result<Json, RuntimeError> {
    if obj.is_collection() {
        let entries = t
            .runtime()
            .persistence()
            .read_collection(t.session(), obj, |c| (c.kind().is_map(), c.entries()))?;
        return match entries {
            (true, pairs) => {
                let mut map = JsonMap::new();
                for (k, v) in pairs {
                    let key = k.map(|k| k.to_string()).unwrap_or_default();
                    map.insert(key, json_value(t, &v, path)?);
                }
                Ok(Json::Object(map))
            }
            (false, items) => items
                .iter()
                .map(|(_, v)| json_value(t, v, path))
                .collect::<Result<Vec<_>, _>>()
                .map(Json::Array),
        };
    }
    let mut map = JsonMap::new();
    for name in attribute_names(t, obj) {
        let v = t.get_attr(obj, &name)?;
        map.insert(name, json_value(t, &v, path)?);
    }
    Ok(Json::Object(map))
}

fn attribute_names(t: &InterpreterThread, obj: &ObjRef) -> Vec<String> {
    let types = t.runtime().types();
    match &*obj.body() {
        Body::Struct(_) => types
            .layout(obj.type_id())
            .map(|l| l.keys().cloned().collect())
            .unwrap_or_default(),
        Body::Collection(_) => Vec::new(),
    }
}

/// Encodes a value as XML. Best effort: element names come from type and
/// attribute names, and everything else is escaped text.
pub fn to_xml(t: &InterpreterThread, value: &Value) -> Result<String, RuntimeError> {
    let mut out = String::new();
    let root = match value {
        Value::Object(obj) => t.runtime().types().get(obj.type_id()).map(|d| element_name(d.short_name())),
        _ => None,
    }
    .unwrap_or_else(|| "value".to_string());
    xml_element(t, &root, value, &mut out, &mut Path::new())?;
    Ok(out)
}

fn xml_element(
    t: &InterpreterThread,
    tag: &str,
    value: &Value,
    out: &mut String,
    path: &mut Path,
) -> Result<(), RuntimeError> {
    let Value::Object(obj) = value else {
        if value.is_nil() {
            let _ = write!(out, "<{tag}/>");
        } else {
            let _ = write!(out, "<{tag}>{}</{tag}>", escape(&value.to_string()));
        }
        return Ok(());
    };
    let key = Arc::as_ptr(obj);
    if !path.insert(key) {
        let _ = write!(out, "<{tag} ref=\"{}\"/>", obj.ensure_uuid());
        return Ok(());
    }
    let _ = write!(out, "<{tag}>");
    if obj.is_collection() {
        let entries = t
            .runtime()
            .persistence()
            .read_collection(t.session(), obj, |c| c.entries())?;
        for (k, v) in entries {
            match k {
                Some(k) => {
                    let _ = write!(out, "<entry key=\"{}\">", escape(&k.to_string()));
                    xml_element(t, "value", &v, out, path)?;
                    out.push_str("</entry>");
                }
                None => xml_element(t, "item", &v, out, path)?,
            }
        }
    } else {
        for name in attribute_names(t, obj) {
            let v = t.get_attr(obj, &name)?;
            xml_element(t, &element_name(&name), &v, out, path)?;
        }
    }
    let _ = write!(out, "</{tag}>");
    path.remove(&key);
    Ok(())
}

fn element_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    match cleaned.chars().next() {
        Some(c) if c.is_alphabetic() || c == '_' => cleaned,
        _ => format!("_{cleaned}"),
    }
}

/// Escapes text for XML and HTML.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
