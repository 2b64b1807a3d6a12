//! Runtime error types with panic semantics for interpreter threads.
//!
//! A [`RuntimeError`] returned from a method body unwinds the calling
//! interpreter thread to its entry point, which rolls back the thread's
//! transaction. Primitives with a trailing `err` string result never return
//! one of these for conditions that string can express.

use relish_core::CoreError;
use relish_storage::StorageError;

/// Errors produced while executing Relish code.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Load-time or dispatch failure from the type and method tables.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Database failure or rejected persistence operation.
    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("type {type_name} has no attribute '{attr}'")]
    NoSuchAttribute { type_name: String, attr: String },

    #[error("send on closed channel")]
    ChannelClosed,

    #[error("unlock of unlocked {kind}")]
    UnbalancedUnlock { kind: &'static str },

    #[error("recursion depth limit ({limit}) exceeded")]
    RecursionLimit { limit: usize },

    #[error("transaction already active")]
    TransactionActive,

    #[error("no active transaction")]
    NoTransaction,

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no body registered for method {method}")]
    MissingBody { method: String },

    /// A Rust panic caught at an interpreter thread's entry point.
    #[error("panic: {message}")]
    Panicked { message: String },

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    pub fn type_mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        RuntimeError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Message used for the trailing `err` result of non-panicking primitives.
    pub fn err_string(&self) -> String {
        match self {
            RuntimeError::Persistence(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}
