//! Interpreter threads.
//!
//! Every unit of Relish execution (a request handler, a `go` call, the main
//! program) runs on an [`InterpreterThread`]. A thread owns its call stack,
//! its persistence session and its GC state. Errors returned from a method
//! body unwind to [`InterpreterThread::run_guarded`], which logs them, rolls
//! back the thread's transaction and hands the error to the caller.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use relish_core::{CoreError, MethodId, MultiMethodId, TypeId};
use relish_storage::SessionId;

use crate::error::RuntimeError;
use crate::object::ObjRef;
use crate::runtime::Runtime;
use crate::value::Value;

/// One active method call.
#[derive(Debug, Clone)]
pub struct Frame {
    pub method: MethodId,
    pub name: String,
}

pub struct InterpreterThread {
    id: u64,
    session: SessionId,
    runtime: Arc<Runtime>,
    package: String,
    frames: Vec<Frame>,
    gc_allowed: bool,
}

impl InterpreterThread {
    pub(crate) fn new(runtime: &Arc<Runtime>, package: &str, label: &str) -> Self {
        let id = runtime.register_thread(package, label);
        runtime.gc().enter_mutator();
        tracing::debug!(thread = id, package, label, "interpreter thread started");
        InterpreterThread {
            id,
            session: SessionId(id),
            runtime: Arc::clone(runtime),
            package: package.to_string(),
            frames: Vec::new(),
            gc_allowed: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// The package unqualified names resolve from.
    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn set_package(&mut self, package: &str) {
        self.package = package.to_string();
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    // -------------------------------------------------------------------
    // Calls
    // -------------------------------------------------------------------

    /// Dispatches `multi` on the dynamic types of `args` and runs the
    /// selected method.
    pub fn call_multi_method(
        &mut self,
        multi: MultiMethodId,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, RuntimeError> {
        let limit = self.runtime.config().max_recursion_depth;
        if self.frames.len() >= limit {
            return Err(RuntimeError::RecursionLimit { limit });
        }

        let rt = Arc::clone(&self.runtime);
        let method = match rt.resolve(multi, &args) {
            Ok(method) => method,
            Err(RuntimeError::Core(e @ CoreError::NoApplicableMethod { .. })) => {
                return Err(self.nil_argument_error(multi, &args).unwrap_or(e.into()));
            }
            Err(e) => return Err(e),
        };

        self.frames.push(Frame {
            method: method.id,
            name: method.qualified_name(),
        });
        let result = rt.invoke(self, method, args);
        self.frames.pop();
        let results = result?;

        if !method.returns.is_empty() {
            let types = rt.types();
            if results.len() != method.returns.len() {
                return Err(RuntimeError::type_mismatch(
                    format!("{} result(s) from {}", method.returns.len(), method.qualified_name()),
                    results.len().to_string(),
                ));
            }
            for (declared, value) in method.returns.iter().zip(&results) {
                let ok = types.is_ancestor(*declared, value.type_of())
                    || (value.is_nil() && !types.is_primitive(*declared));
                if !ok {
                    return Err(RuntimeError::type_mismatch(
                        types.name(*declared),
                        types.name(value.type_of()),
                    ));
                }
            }
        }
        Ok(results)
    }

    /// A `nil` passed where every candidate wants a primitive is a type
    /// error, not a missing method.
    fn nil_argument_error(&self, multi: MultiMethodId, args: &[Value]) -> Option<RuntimeError> {
        let types = self.runtime.types();
        let mm = self.runtime.methods().multi(multi).ok()?;
        for (i, arg) in args.iter().enumerate() {
            if !arg.is_nil() {
                continue;
            }
            for id in mm.candidates(args.len()) {
                let method = self.runtime.methods().method(id).ok()?;
                if let Some(t) = method.param_type_at(i) {
                    if types.is_primitive(t) {
                        return Some(RuntimeError::type_mismatch(types.name(t), "Nil"));
                    }
                }
            }
        }
        None
    }

    /// Calls `name` as seen from the thread's package. A name of the form
    /// `pkg/path.name` calls into that package instead.
    pub fn call_by_name(&mut self, name: &str, args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        let (package, short) = match name.rsplit_once('.') {
            Some((package, short)) => (package.to_string(), short),
            None => (self.package.clone(), name),
        };
        let multi = self
            .runtime
            .lookup_multi(&package, short)
            .ok_or_else(|| CoreError::MultiMethodNotFound {
                package: package.clone(),
                name: short.to_string(),
            })?;
        self.call_multi_method(multi, args)
    }

    /// Calls a closure with its bound arguments prepended.
    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        match callee {
            Value::Closure(c) => {
                let mut all = c.bound.clone();
                all.extend(args);
                self.call_multi_method(c.multi, all)
            }
            other => Err(RuntimeError::type_mismatch(
                "Callable",
                self.runtime.types().name(other.type_of()),
            )),
        }
    }

    // -------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------

    pub fn get_attr(&self, obj: &ObjRef, name: &str) -> Result<Value, RuntimeError> {
        self.runtime.persistence().get_attr(self.session, obj, name)
    }

    pub fn set_attr(&self, obj: &ObjRef, name: &str, value: Value) -> Result<(), RuntimeError> {
        self.runtime.persistence().set_attr(self.session, obj, name, value)
    }

    /// A new instance of the named type.
    pub fn new_object(&self, type_name: &str) -> Result<ObjRef, RuntimeError> {
        let type_id: TypeId = self.runtime.type_table().resolve(type_name)?;
        self.runtime.new_object(type_id)
    }

    // -------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------

    pub fn begin(&mut self) -> Result<(), RuntimeError> {
        self.runtime.persistence().begin(self.session)?;
        self.runtime.note_transaction(self.id, true);
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), RuntimeError> {
        let result = self.runtime.persistence().commit(self.session);
        self.runtime.note_transaction(self.id, false);
        result
    }

    pub fn rollback(&mut self) -> Result<(), RuntimeError> {
        let result = self.runtime.persistence().rollback(self.session);
        self.runtime.note_transaction(self.id, false);
        result
    }

    pub fn in_transaction(&self) -> bool {
        self.runtime.persistence().in_transaction(self.session)
    }

    /// Ends the open transaction, if any: commit on success, otherwise roll
    /// back.
    pub fn commit_or_rollback(&mut self, succeeded: bool) -> Result<(), RuntimeError> {
        if !self.in_transaction() {
            return Ok(());
        }
        if succeeded {
            self.commit()
        } else {
            self.rollback()
        }
    }

    /// Entry point for a unit of work. Runs `f`, catching Rust panics as
    /// well as returned errors; on failure the stack is logged, the
    /// transaction is rolled back and the error is returned.
    pub fn run_guarded<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let outcome = catch_unwind(AssertUnwindSafe(|| f(&mut *self)))
            .unwrap_or_else(|payload| Err(RuntimeError::Panicked {
                message: panic_message(payload),
            }));
        match outcome {
            Ok(value) => {
                self.commit_or_rollback(true)?;
                Ok(value)
            }
            Err(e) => {
                let stack: Vec<&str> = self.frames.iter().rev().map(|f| f.name.as_str()).collect();
                tracing::error!(thread = self.id, error = %e, ?stack, "interpreter thread failed");
                if let Err(rb) = self.commit_or_rollback(false) {
                    tracing::warn!(thread = self.id, error = %rb, "rollback after failure failed");
                }
                self.frames.clear();
                Err(e)
            }
        }
    }

    // -------------------------------------------------------------------
    // GC safe points
    // -------------------------------------------------------------------

    /// Declares a safe point: the thread will not touch object state until
    /// [`disallow_gc`](Self::disallow_gc).
    pub fn allow_gc(&mut self) {
        if !self.gc_allowed {
            self.gc_allowed = true;
            self.runtime.gc().leave_mutator();
        }
    }

    pub fn disallow_gc(&mut self) {
        if self.gc_allowed {
            self.gc_allowed = false;
            self.runtime.gc().enter_mutator();
        }
    }

    /// Runs a blocking operation at a safe point.
    pub fn blocking<T>(&mut self, f: impl FnOnce() -> T) -> T {
        self.allow_gc();
        let result = f();
        self.disallow_gc();
        result
    }
}

impl Drop for InterpreterThread {
    fn drop(&mut self) {
        if self.in_transaction() {
            tracing::warn!(thread = self.id, "thread ended inside a transaction; rolling back");
            let _ = self.rollback();
        }
        if !self.gc_allowed {
            self.runtime.gc().leave_mutator();
        }
        self.runtime.deregister_thread(self.id);
        tracing::debug!(thread = self.id, "interpreter thread finished");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
