//! Type lattice, multi-method table and dispatch engine for the Relish runtime.
//!
//! Everything in this crate is plain data: it is populated once while a
//! program's packages are loaded and then only read. The interpreter, the
//! persistence layer and the web dispatcher all build on it.
//!
//! # Modules
//!
//! - [`id`]: stable ID newtypes (`TypeId`, `MethodId`, `MultiMethodId`, `Dbid`)
//! - [`types`]: type definitions, attribute descriptors, parametric families
//! - [`registry`]: the [`TypeRegistry`] with precomputed ancestry
//! - [`method`]: method descriptors
//! - [`multimethod`]: the `(package, name)` -> multi-method table
//! - [`dispatch`]: most-specific method selection and the resolution cache
//! - [`error`]: [`CoreError`]

pub mod dispatch;
pub mod error;
pub mod id;
pub mod method;
pub mod multimethod;
pub mod registry;
pub mod types;

pub use dispatch::{dispatch, Dispatch, DispatchCache};
pub use error::CoreError;
pub use id::{Dbid, MethodId, MultiMethodId, TypeId};
pub use method::{Method, MethodCode, MethodDecl, Parameter};
pub use multimethod::{MultiMethod, MultiMethodTable, ROOT_PACKAGE};
pub use registry::TypeRegistry;
pub use types::{AttributeDef, CollectionKind, TypeDef, TypeFamily, TypeFlags, TypeParams};
