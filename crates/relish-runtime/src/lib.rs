//! The Relish runtime: values, objects, persistence, interpreter threads and
//! built-in primitives.
//!
//! A [`Runtime`] is assembled by a [`RuntimeBuilder`] from a type manifest
//! ([`loader::Manifest`]) plus native primitives, and then shared across
//! [`InterpreterThread`]s.

pub mod builtins;
pub mod channel;
pub mod collection;
pub mod config;
pub mod encode;
pub mod error;
pub mod gc;
pub mod loader;
pub mod object;
pub mod persist;
pub mod runtime;
pub mod sync;
pub mod thread;
pub mod transaction;
pub mod types;
pub mod value;

pub use channel::RChannel;
pub use collection::{Collection, Comparator};
pub use config::RuntimeConfig;
pub use error::RuntimeError;
pub use loader::Manifest;
pub use object::{ObjRef, RObject};
pub use persist::Persistence;
pub use runtime::{MethodBody, NativeFn, Runtime, RuntimeBuilder, ThreadInfo};
pub use sync::{RMutex, RRwMutex};
pub use thread::InterpreterThread;
pub use types::TypeTable;
pub use value::Value;
