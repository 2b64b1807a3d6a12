//! Request data to handler arguments.
//!
//! Positional path segments fill the leading parameters. The rest of the
//! parameters are looked up by name in the keyword map built from the query
//! string and the form body; a parameter declared as a `Map` receives the
//! whole keyword map instead. Strings are coerced to the declared primitive
//! type.

use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use relish_core::{CollectionKind, Method, MultiMethodId, TypeId, TypeRegistry};
use relish_runtime::{Comparator, InterpreterThread, RuntimeError, Value};

use crate::error::WebError;

/// Query and form data of one request.
#[derive(Debug, Clone, Default)]
pub struct RequestArgs {
    pub positional: Vec<String>,
    /// Field name to every value given for it, in arrival order.
    pub keywords: IndexMap<String, Vec<String>>,
    /// Uploaded file parts.
    pub files: IndexMap<String, Vec<u8>>,
}

impl RequestArgs {
    pub fn new(positional: Vec<String>) -> Self {
        RequestArgs {
            positional,
            ..Self::default()
        }
    }

    /// Adds the pairs of an `application/x-www-form-urlencoded` string.
    pub fn add_urlencoded(&mut self, data: &[u8]) {
        for (k, v) in url::form_urlencoded::parse(data) {
            self.keywords.entry(k.into_owned()).or_default().push(v.into_owned());
        }
    }
}

/// The method whose parameter list the arguments are bound against: the
/// one with the most parameters among those that can take every positional
/// argument.
fn widest<'a>(thread: &'a InterpreterThread, multi: MultiMethodId, positional: usize) -> Option<&'a Method> {
    let table = thread.runtime().methods();
    let mm = table.multi(multi).ok()?;
    mm.methods()
        .filter_map(|id| table.method(id).ok())
        .filter(|m| m.variadic || m.params.len() >= positional)
        .max_by_key(|m| (m.params.len(), std::cmp::Reverse(m.id.0)))
}

/// Builds the argument list for `multi`.
pub fn bind(
    thread: &InterpreterThread,
    multi: MultiMethodId,
    args: &RequestArgs,
) -> Result<Vec<Value>, WebError> {
    let types = thread.runtime().types();
    let Some(method) = widest(thread, multi, args.positional.len()) else {
        // Nothing takes this many segments; let dispatch report it.
        return Ok(args.positional.iter().map(|s| Value::str(s)).collect());
    };

    let mut values = Vec::with_capacity(method.params.len().max(args.positional.len()));
    for (i, raw) in args.positional.iter().enumerate() {
        let declared = method.param_type_at(i).unwrap_or(TypeId::STRING);
        values.push(coerce(&types, raw, declared)?);
    }
    for param in method
        .params
        .iter()
        .take(method.fixed_arity())
        .skip(args.positional.len())
    {
        let declared = param.type_id;
        let value = if types.is_ancestor(TypeId::MAP, declared) {
            keyword_map(thread, args)?
        } else if let Some(bytes) = args.files.get(&param.name) {
            Value::bytes(bytes)
        } else {
            match args.keywords.get(&param.name).map(Vec::as_slice) {
                None | Some([]) => Value::zero_of(declared),
                Some([one]) if !types.is_ancestor(TypeId::LIST, declared) => {
                    coerce(&types, one, declared)?
                }
                Some(many) => string_list(thread, many)?,
            }
        };
        values.push(value);
    }
    Ok(values)
}

fn string_list(thread: &InterpreterThread, items: &[String]) -> Result<Value, WebError> {
    let rt = thread.runtime();
    let list = rt.new_collection(CollectionKind::List, TypeId::STRING, None, Comparator::Natural);
    rt.persistence().mutate_collection(thread.session(), &list, |c, cmp| {
        for item in items {
            c.push(Value::str(item), cmp);
        }
    })?;
    Ok(Value::Object(list))
}

fn keyword_map(thread: &InterpreterThread, args: &RequestArgs) -> Result<Value, WebError> {
    let rt = thread.runtime();
    let map = rt.new_collection(
        CollectionKind::Map,
        TypeId::ANY,
        Some(TypeId::STRING),
        Comparator::Natural,
    );
    let mut entries = Vec::with_capacity(args.keywords.len() + args.files.len());
    for (k, vs) in &args.keywords {
        let v = match vs.as_slice() {
            [one] => Value::str(one),
            many => string_list(thread, many)?,
        };
        entries.push((Value::str(k), v));
    }
    for (k, bytes) in &args.files {
        entries.push((Value::str(k), Value::bytes(bytes)));
    }
    rt.persistence().mutate_collection(thread.session(), &map, |c, cmp| {
        for (k, v) in entries {
            c.put(k, v, cmp);
        }
    })?;
    Ok(Value::Object(map))
}

/// Converts a request string to `declared`. Non-primitive targets other
/// than `Any` receive the string unchanged and are left to dispatch.
pub fn coerce(types: &TypeRegistry, raw: &str, declared: TypeId) -> Result<Value, WebError> {
    let bad = |what: &str| {
        WebError::Runtime(RuntimeError::InvalidArgument(format!(
            "cannot read '{raw}' as {what}"
        )))
    };
    let value = match declared {
        TypeId::INT | TypeId::INTEGER => Value::Int(raw.trim().parse().map_err(|_| bad("Int"))?),
        TypeId::INT32 => Value::Int32(raw.trim().parse().map_err(|_| bad("Int32"))?),
        TypeId::UINT => Value::Uint(raw.trim().parse().map_err(|_| bad("Uint"))?),
        TypeId::UINT32 => Value::Uint32(raw.trim().parse().map_err(|_| bad("Uint32"))?),
        TypeId::BYTE => Value::Byte(raw.trim().parse().map_err(|_| bad("Byte"))?),
        TypeId::FLOAT | TypeId::NUMERIC => {
            Value::Float(raw.trim().parse().map_err(|_| bad("Float"))?)
        }
        TypeId::BOOL => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" | "1" => Value::Bool(true),
            "false" | "off" | "no" | "0" | "" => Value::Bool(false),
            _ => return Err(bad("Bool")),
        },
        TypeId::BYTES => Value::bytes(raw.as_bytes()),
        TypeId::TIME => Value::Time(parse_time(raw).ok_or_else(|| bad("Time"))?),
        _ => {
            if types.is_primitive(declared) && !types.is_ancestor(declared, TypeId::STRING) {
                return Err(bad(types.name(declared)));
            }
            Value::str(raw)
        }
    };
    Ok(value)
}

/// RFC 3339, or a bare `YYYY-MM-DD` date at midnight UTC.
fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
