//! Core error types for relish-core.
//!
//! Load-time failures (duplicate or unknown types, ambiguous signatures) and
//! dispatch failures share one enum so callers can match on either.

use thiserror::Error;

use crate::id::{MethodId, MultiMethodId, TypeId};

/// Errors produced by the type registry, multi-method table and dispatcher.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A type name is already bound in the registry.
    #[error("duplicate type: '{name}'")]
    DuplicateType { name: String },

    /// A type name could not be resolved.
    #[error("unknown type: '{name}'")]
    UnknownType { name: String },

    /// A TypeId does not refer to a registered type.
    #[error("type not found: TypeId({id})", id = id.0)]
    TypeNotFound { id: TypeId },

    /// A type lists both primitive and non-primitive supertypes.
    #[error("type '{name}' mixes primitive and non-primitive supertypes")]
    MixedLattice { name: String },

    /// Built-in and parametric types cannot be given attributes.
    #[error("type '{name}' is built in and cannot take attributes")]
    BuiltinType { name: String },

    /// Two methods of the same multi-method declare identical parameter types.
    #[error("ambiguous signature: {name}({signature}) is already defined")]
    AmbiguousSignature { name: String, signature: String },

    /// No method of the multi-method accepts the argument types.
    #[error("no applicable method: {name}({args})")]
    NoApplicableMethod { name: String, args: String },

    /// Several applicable methods are incomparable in specificity.
    #[error("ambiguous dispatch: {name}({args}) matches {}", candidates.join(" and "))]
    AmbiguousDispatch {
        name: String,
        args: String,
        candidates: Vec<String>,
    },

    /// No multi-method is registered under the given package and name.
    #[error("multi-method not found: {package}.{name}")]
    MultiMethodNotFound { package: String, name: String },

    /// A MultiMethodId does not refer to a registered multi-method.
    #[error("multi-method not found: MultiMethodId({id})", id = id.0)]
    UnknownMultiMethod { id: MultiMethodId },

    /// A MethodId does not refer to a registered method.
    #[error("method not found: MethodId({id})", id = id.0)]
    MethodNotFound { id: MethodId },

    /// A variadic method declared no parameters to repeat.
    #[error("variadic method '{name}' has no parameters")]
    EmptyVariadic { name: String },
}

impl CoreError {
    /// Whether this is a dispatch failure rather than a load-time failure.
    pub fn is_dispatch_error(&self) -> bool {
        matches!(
            self,
            CoreError::NoApplicableMethod { .. } | CoreError::AmbiguousDispatch { .. }
        )
    }
}
