//! The [`Runtime`]: shared state of one running program.
//!
//! A runtime owns the type table, the multi-method table with its method
//! bodies, the dispatch cache, the persistence layer, the GC coordinator and
//! the table of live interpreter threads. It is built once by
//! [`RuntimeBuilder`] and then shared as `Arc<Runtime>`; everything except
//! parametric type interning is read-only after [`RuntimeBuilder::build`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use relish_core::{
    AttributeDef, CollectionKind, DispatchCache, Method, MethodCode, MethodDecl, MethodId,
    MultiMethodId, MultiMethodTable, Parameter, TypeId, TypeRegistry, ROOT_PACKAGE,
};
use relish_storage::{InMemoryStore, ObjectStore, SqliteStore};
use serde::Serialize;

use crate::builtins;
use crate::channel::RChannel;
use crate::collection::{Collection, Comparator};
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::gc::GcCoordinator;
use crate::object::{ObjRef, RObject};
use crate::persist::Persistence;
use crate::thread::InterpreterThread;
use crate::types::TypeTable;
use crate::value::Value;

/// A primitive implemented in Rust.
pub type NativeFn = Arc<
    dyn Fn(&mut InterpreterThread, Vec<Value>) -> Result<Vec<Value>, RuntimeError> + Send + Sync,
>;

/// A compiled method body, produced outside the runtime.
pub trait MethodBody: Send + Sync {
    fn call(
        &self,
        thread: &mut InterpreterThread,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, RuntimeError>;
}

/// Entry in the runtime's thread table.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadInfo {
    pub id: u64,
    pub label: String,
    pub package: String,
    pub started: DateTime<Utc>,
    pub in_transaction: bool,
}

/// Collects types, methods and a store, then builds a [`Runtime`].
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    types: TypeRegistry,
    methods: MultiMethodTable,
    natives: Vec<NativeFn>,
    bodies: Vec<Arc<dyn MethodBody>>,
    store: Option<Arc<dyn ObjectStore>>,
}

impl RuntimeBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        RuntimeBuilder {
            config,
            types: TypeRegistry::new(),
            methods: MultiMethodTable::new(),
            natives: Vec::new(),
            bodies: Vec::new(),
            store: None,
        }
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    pub fn methods(&self) -> &MultiMethodTable {
        &self.methods
    }

    pub fn register_type(
        &mut self,
        name: &str,
        supertypes: &[TypeId],
        attributes: Vec<AttributeDef>,
    ) -> Result<TypeId, RuntimeError> {
        Ok(self.types.register_type(name, supertypes, attributes)?)
    }

    /// Uses `store` instead of the one named by the configuration.
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn add_native(
        &mut self,
        package: &str,
        name: &str,
        params: &[TypeId],
        returns: &[TypeId],
        variadic: bool,
        f: NativeFn,
    ) -> Result<MethodId, RuntimeError> {
        let index = self.natives.len() as u32;
        self.natives.push(f);
        let decl = MethodDecl {
            package: package.to_string(),
            name: name.to_string(),
            params: params
                .iter()
                .enumerate()
                .map(|(i, t)| Parameter::new(format!("a{i}"), *t))
                .collect(),
            returns: returns.to_vec(),
            variadic,
            code: MethodCode::Native(index),
        };
        self.methods.add_method(decl, &self.types).map_err(|e| {
            self.natives.pop();
            e.into()
        })
    }

    /// Registers a native primitive.
    pub fn define_native<F>(
        &mut self,
        package: &str,
        name: &str,
        params: &[TypeId],
        returns: &[TypeId],
        f: F,
    ) -> Result<MethodId, RuntimeError>
    where
        F: Fn(&mut InterpreterThread, Vec<Value>) -> Result<Vec<Value>, RuntimeError>
            + Send
            + Sync
            + 'static,
    {
        self.add_native(package, name, params, returns, false, Arc::new(f))
    }

    /// Registers a native primitive whose last parameter repeats.
    pub fn define_variadic_native<F>(
        &mut self,
        package: &str,
        name: &str,
        params: &[TypeId],
        returns: &[TypeId],
        f: F,
    ) -> Result<MethodId, RuntimeError>
    where
        F: Fn(&mut InterpreterThread, Vec<Value>) -> Result<Vec<Value>, RuntimeError>
            + Send
            + Sync
            + 'static,
    {
        self.add_native(package, name, params, returns, true, Arc::new(f))
    }

    /// Registers a method with a compiled body.
    pub fn define_method(
        &mut self,
        package: &str,
        name: &str,
        params: Vec<Parameter>,
        returns: Vec<TypeId>,
        variadic: bool,
        body: Arc<dyn MethodBody>,
    ) -> Result<MethodId, RuntimeError> {
        let index = self.bodies.len() as u32;
        self.bodies.push(body);
        let decl = MethodDecl {
            package: package.to_string(),
            name: name.to_string(),
            params,
            returns,
            variadic,
            code: MethodCode::Compiled(index),
        };
        self.methods.add_method(decl, &self.types).map_err(|e| {
            self.bodies.pop();
            e.into()
        })
    }

    /// Installs the built-in primitives, opens the store and freezes the
    /// method table.
    pub fn build(mut self) -> Result<Arc<Runtime>, RuntimeError> {
        builtins::install(&mut self)?;

        let store: Arc<dyn ObjectStore> = match self.store.take() {
            Some(store) => store,
            None => match &self.config.db_path {
                Some(path) => Arc::new(SqliteStore::new(&path.to_string_lossy())?),
                None => Arc::new(InMemoryStore::new()),
            },
        };

        tracing::info!(
            types = self.types.len(),
            methods = self.methods.len(),
            db = ?self.config.db_path,
            "runtime built"
        );

        let types = Arc::new(TypeTable::new(self.types));
        Ok(Arc::new(Runtime {
            dispatch_cache: DispatchCache::new(self.config.dispatch_cache_capacity),
            persistence: Persistence::new(store, Arc::clone(&types)),
            types,
            methods: self.methods,
            natives: self.natives,
            bodies: self.bodies,
            gc: GcCoordinator::new(),
            threads: DashMap::new(),
            next_thread: AtomicU64::new(1),
            template_lock: Mutex::new(()),
            config: self.config,
        }))
    }
}

pub struct Runtime {
    config: RuntimeConfig,
    types: Arc<TypeTable>,
    methods: MultiMethodTable,
    natives: Vec<NativeFn>,
    bodies: Vec<Arc<dyn MethodBody>>,
    dispatch_cache: DispatchCache,
    persistence: Persistence,
    gc: GcCoordinator,
    threads: DashMap<u64, ThreadInfo>,
    next_thread: AtomicU64,
    template_lock: Mutex<()>,
}

impl Runtime {
    pub fn builder(config: RuntimeConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Snapshot of the type registry.
    pub fn types(&self) -> Arc<TypeRegistry> {
        self.types.snapshot()
    }

    pub fn type_table(&self) -> &TypeTable {
        &self.types
    }

    pub fn methods(&self) -> &MultiMethodTable {
        &self.methods
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    pub fn gc(&self) -> &GcCoordinator {
        &self.gc
    }

    pub fn dispatch_cache(&self) -> &DispatchCache {
        &self.dispatch_cache
    }

    /// The multi-method `name` as seen from `package`: the package's own
    /// first, then the built-ins of the root package.
    pub fn lookup_multi(&self, package: &str, name: &str) -> Option<MultiMethodId> {
        self.methods
            .lookup(package, name)
            .or_else(|| self.methods.lookup(ROOT_PACKAGE, name))
    }

    /// Selects the method of `multi` for the dynamic types of `args`.
    pub fn resolve(&self, multi: MultiMethodId, args: &[Value]) -> Result<&Method, RuntimeError> {
        let arg_types: Vec<TypeId> = args.iter().map(Value::type_of).collect();
        let types = self.types.snapshot();
        let chosen = self
            .dispatch_cache
            .dispatch(&types, &self.methods, multi, &arg_types)?;
        Ok(self.methods.method(chosen.method)?)
    }

    /// Runs a method's body.
    pub fn invoke(
        &self,
        thread: &mut InterpreterThread,
        method: &Method,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, RuntimeError> {
        match method.code {
            MethodCode::Native(i) => {
                let f = self
                    .natives
                    .get(i as usize)
                    .cloned()
                    .ok_or_else(|| RuntimeError::MissingBody {
                        method: method.qualified_name(),
                    })?;
                f(thread, args)
            }
            MethodCode::Compiled(i) => {
                let body = self
                    .bodies
                    .get(i as usize)
                    .cloned()
                    .ok_or_else(|| RuntimeError::MissingBody {
                        method: method.qualified_name(),
                    })?;
                body.call(thread, args)
            }
        }
    }

    // -------------------------------------------------------------------
    // Values
    // -------------------------------------------------------------------

    /// A new instance of a structured or collection type.
    pub fn new_object(&self, type_id: TypeId) -> Result<ObjRef, RuntimeError> {
        let types = self.types.snapshot();
        let def = types
            .get(type_id)
            .ok_or(relish_core::CoreError::TypeNotFound { id: type_id })?;
        if def.flags.is_primitive || !types.is_ancestor(TypeId::NON_PRIMITIVE, type_id) {
            return Err(RuntimeError::type_mismatch("NonPrimitive", def.name.clone()));
        }
        if def.flags.is_native && !def.flags.is_collection {
            return Err(RuntimeError::InvalidArgument(format!(
                "{} values have their own constructor",
                def.name
            )));
        }
        if types.is_collection(type_id) {
            return Ok(RObject::new_collection(
                type_id,
                Collection::for_type(&types, type_id),
            ));
        }
        let slots = types.layout(type_id).map_or(0, |l| l.len());
        Ok(RObject::new_struct(type_id, slots))
    }

    /// A new, possibly sorted, collection.
    pub fn new_collection(
        &self,
        kind: CollectionKind,
        elem: TypeId,
        key: Option<TypeId>,
        comparator: Comparator,
    ) -> ObjRef {
        let type_id = match (kind.is_map(), key) {
            (true, key) => self.types.map_type(key.unwrap_or(TypeId::ANY), elem),
            (false, _) if kind.is_set() => self.types.set_type(elem),
            _ => self.types.list_type(elem),
        };
        let key = if kind.is_map() {
            Some(key.unwrap_or(TypeId::ANY))
        } else {
            None
        };
        let coll = Collection::new(kind, elem, key).with_comparator(comparator);
        RObject::new_collection(type_id, coll)
    }

    pub fn new_channel(&self, elem: TypeId, capacity: usize) -> Arc<RChannel> {
        let type_id = self.types.channel_type(elem);
        Arc::new(RChannel::new(type_id, elem, capacity))
    }

    // -------------------------------------------------------------------
    // Threads
    // -------------------------------------------------------------------

    pub(crate) fn register_thread(&self, package: &str, label: &str) -> u64 {
        let id = self.next_thread.fetch_add(1, Ordering::Relaxed);
        self.threads.insert(
            id,
            ThreadInfo {
                id,
                label: label.to_string(),
                package: package.to_string(),
                started: Utc::now(),
                in_transaction: false,
            },
        );
        id
    }

    pub(crate) fn deregister_thread(&self, id: u64) {
        self.threads.remove(&id);
    }

    pub(crate) fn note_transaction(&self, id: u64, active: bool) {
        if let Some(mut info) = self.threads.get_mut(&id) {
            info.in_transaction = active;
        }
    }

    /// Live interpreter threads, oldest first.
    pub fn threads(&self) -> Vec<ThreadInfo> {
        let mut threads: Vec<ThreadInfo> = self.threads.iter().map(|t| t.value().clone()).collect();
        threads.sort_by_key(|t| t.id);
        threads
    }

    /// Starts an interpreter thread whose lookups resolve from `package`.
    pub fn new_thread(self: &Arc<Self>, package: &str, label: &str) -> InterpreterThread {
        InterpreterThread::new(self, package, label)
    }

    /// Runs `package.name(args)` on a fresh interpreter thread inside a
    /// transaction that commits on success and rolls back on failure.
    pub fn call(
        self: &Arc<Self>,
        package: &str,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, RuntimeError> {
        let mut thread = self.new_thread(package, name);
        thread.run_guarded(|t| {
            t.begin()?;
            t.call_by_name(name, args)
        })
    }

    /// Held for the duration of a template render.
    pub fn template_lock(&self) -> MutexGuard<'_, ()> {
        self.template_lock.lock()
    }

    // -------------------------------------------------------------------
    // Garbage collection
    // -------------------------------------------------------------------

    /// Evicts unreferenced objects from the identity cache once all threads
    /// are at safe points. Returns `None` if they did not get there in time.
    pub fn collect_garbage(&self) -> Option<usize> {
        let evicted = self
            .gc
            .try_collect(self.config.gc_wait, || self.persistence.sweep());
        match evicted {
            Some(n) => tracing::debug!(evicted = n, "gc sweep"),
            None => tracing::debug!(running = self.gc.running(), "gc sweep skipped"),
        }
        evicted
    }

    /// Spawns a background task that collects every `interval`.
    pub fn start_gc_sweep(self: &Arc<Self>, interval: Duration) {
        let runtime = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                let rt = Arc::clone(&runtime);
                match tokio::task::spawn_blocking(move || rt.collect_garbage()).await {
                    Ok(Some(n)) if n > 0 => tracing::info!("Swept {} cached object(s)", n),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "gc sweep task failed"),
                }
            }
        });
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("methods", &self.methods.len())
            .field("threads", &self.threads.len())
            .field("cached", &self.persistence.cached_len())
            .finish()
    }
}
