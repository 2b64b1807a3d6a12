//! Type manifests.
//!
//! A program's types and methods arrive as a `types.json` manifest produced
//! by the compiler. Types are declared in manifest order, so supertypes
//! must precede their subtypes; attributes may refer to any declared type. Method bodies are expression trees:
//!
//! ```json
//! {
//!   "types": [
//!     { "name": "shop/Car", "attributes": [
//!         { "name": "color", "type": "String" },
//!         { "name": "tags", "type": "String", "collection": "SortedList" } ] }
//!   ],
//!   "methods": [
//!     { "package": "shop", "name": "paint",
//!       "params": [ { "name": "car", "type": "shop/Car" },
//!                   { "name": "color", "type": "String" } ],
//!       "body": { "set": { "obj": { "arg": 0 }, "attr": "color", "value": { "arg": 1 } } } }
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use relish_core::{AttributeDef, CollectionKind, Parameter, TypeId};
use serde::Deserialize;

use crate::error::RuntimeError;
use crate::runtime::{MethodBody, RuntimeBuilder};
use crate::thread::InterpreterThread;
use crate::value::Value;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub types: Vec<TypeSpec>,
    #[serde(default)]
    pub methods: Vec<MethodSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypeSpec {
    pub name: String,
    #[serde(default)]
    pub supertypes: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub collection: Option<CollectionKind>,
    #[serde(default)]
    pub max_arity: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MethodSpec {
    #[serde(default)]
    pub package: String,
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    #[serde(default)]
    pub returns: Vec<String>,
    #[serde(default)]
    pub variadic: bool,
    pub body: Expr,
}

/// A method body expression.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Expr {
    /// JSON literal: null, bool, number or string.
    Lit(serde_json::Value),
    /// Positional argument of the enclosing method.
    Arg(usize),
    /// Multi-method call; the first result is the value.
    Call { name: String, #[serde(default)] args: Vec<Expr> },
    Get { obj: Box<Expr>, attr: String },
    Set { obj: Box<Expr>, attr: String, value: Box<Expr> },
    /// A new object with the given attributes assigned in order.
    New {
        #[serde(rename = "type")]
        type_name: String,
        #[serde(default)]
        attrs: IndexMap<String, Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        #[serde(default, rename = "else")]
        otherwise: Option<Box<Expr>>,
    },
    /// Display forms joined into one string.
    Concat(Vec<Expr>),
    /// Evaluates in order; the last value is the result.
    Seq(Vec<Expr>),
    /// The method's results.
    Return(Vec<Expr>),
}

enum Flow {
    Value(Value),
    Return(Vec<Value>),
}

impl Expr {
    fn eval(&self, t: &mut InterpreterThread, args: &[Value]) -> Result<Flow, RuntimeError> {
        let value = match self {
            Expr::Lit(json) => literal(json)?,
            Expr::Arg(i) => args.get(*i).cloned().ok_or_else(|| {
                RuntimeError::InvalidArgument(format!("argument {i} not passed"))
            })?,
            Expr::Call { name, args: exprs } => {
                let mut actual = Vec::with_capacity(exprs.len());
                for e in exprs {
                    actual.push(e.value(t, args)?);
                }
                t.call_by_name(name, actual)?.into_iter().next().unwrap_or(Value::Nil)
            }
            Expr::Get { obj, attr } => {
                let target = obj.value(t, args)?;
                let obj = target.as_object().ok_or_else(|| {
                    RuntimeError::type_mismatch("NonPrimitive", format!("{target:?}"))
                })?;
                t.get_attr(obj, attr)?
            }
            Expr::Set { obj, attr, value } => {
                let target = obj.value(t, args)?;
                let v = value.value(t, args)?;
                let obj = target.as_object().ok_or_else(|| {
                    RuntimeError::type_mismatch("NonPrimitive", format!("{target:?}"))
                })?;
                t.set_attr(obj, attr, v)?;
                Value::Nil
            }
            Expr::New { type_name, attrs } => {
                let obj = t.new_object(type_name)?;
                for (name, e) in attrs {
                    let v = e.value(t, args)?;
                    t.set_attr(&obj, name, v)?;
                }
                Value::Object(obj)
            }
            Expr::If { cond, then, otherwise } => {
                if !cond.value(t, args)?.is_zero() {
                    return then.eval(t, args);
                }
                match otherwise {
                    Some(e) => return e.eval(t, args),
                    None => Value::Nil,
                }
            }
            Expr::Concat(parts) => {
                let mut s = String::new();
                for p in parts {
                    s.push_str(&p.value(t, args)?.to_string());
                }
                Value::from(s)
            }
            Expr::Seq(exprs) => {
                let mut last = Value::Nil;
                for e in exprs {
                    match e.eval(t, args)? {
                        Flow::Value(v) => last = v,
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                last
            }
            Expr::Return(exprs) => {
                let mut out = Vec::with_capacity(exprs.len());
                for e in exprs {
                    out.push(e.value(t, args)?);
                }
                return Ok(Flow::Return(out));
            }
        };
        Ok(Flow::Value(value))
    }

    /// Evaluates to a single value; a `return` in value position is an error.
    fn value(&self, t: &mut InterpreterThread, args: &[Value]) -> Result<Value, RuntimeError> {
        match self.eval(t, args)? {
            Flow::Value(v) => Ok(v),
            Flow::Return(_) => Err(RuntimeError::InvalidArgument(
                "return used as an expression".into(),
            )),
        }
    }
}

fn literal(json: &serde_json::Value) -> Result<Value, RuntimeError> {
    Ok(match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Value::Int(i),
            (None, Some(f)) => Value::Float(f),
            _ => return Err(RuntimeError::Manifest(format!("unrepresentable number {n}"))),
        },
        serde_json::Value::String(s) => Value::str(s),
        other => {
            return Err(RuntimeError::Manifest(format!(
                "literal must be a scalar, got {other}"
            )))
        }
    })
}

/// A manifest method body.
#[derive(Debug)]
pub struct ExprBody {
    body: Expr,
    returns: usize,
}

impl MethodBody for ExprBody {
    fn call(&self, t: &mut InterpreterThread, args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        match self.body.eval(t, &args)? {
            Flow::Return(values) => Ok(values),
            Flow::Value(_) if self.returns == 0 => Ok(vec![]),
            Flow::Value(v) => Ok(vec![v]),
        }
    }
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Registers the manifest's types, then its methods.
    ///
    /// Type names are all declared before any attribute is resolved, so an
    /// attribute may name its own type or a type declared later.
    pub fn install(self, b: &mut RuntimeBuilder) -> Result<(), RuntimeError> {
        let type_count = self.types.len();
        let mut declared = Vec::with_capacity(type_count);
        for spec in &self.types {
            let supers = spec
                .supertypes
                .iter()
                .map(|s| b.types_mut().resolve(s))
                .collect::<Result<Vec<TypeId>, _>>()?;
            declared.push(b.types_mut().declare_type(&spec.name, &supers)?);
        }
        for (id, spec) in declared.into_iter().zip(&self.types) {
            let mut attrs = Vec::with_capacity(spec.attributes.len());
            for a in &spec.attributes {
                let type_id = b.types_mut().resolve(&a.type_name)?;
                let mut def = match a.collection {
                    Some(kind) => AttributeDef::many(&a.name, type_id, kind),
                    None => AttributeDef::single(&a.name, type_id),
                };
                if a.max_arity.is_some() {
                    def.max_arity = a.max_arity;
                }
                attrs.push(def);
            }
            b.types_mut().define_attributes(id, attrs)?;
            tracing::debug!(type_name = %spec.name, "attributes defined");
        }

        let method_count = self.methods.len();
        for spec in self.methods {
            let params = spec
                .params
                .iter()
                .map(|p| Ok(Parameter::new(&p.name, b.types_mut().resolve(&p.type_name)?)))
                .collect::<Result<Vec<_>, RuntimeError>>()?;
            let returns = spec
                .returns
                .iter()
                .map(|r| b.types_mut().resolve(r))
                .collect::<Result<Vec<_>, _>>()?;
            let body = Arc::new(ExprBody {
                body: spec.body,
                returns: returns.len(),
            });
            b.define_method(&spec.package, &spec.name, params, returns, spec.variadic, body)?;
        }
        tracing::info!(types = type_count, methods = method_count, "manifest installed");
        Ok(())
    }
}
