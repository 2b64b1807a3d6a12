//! The multi-method table.
//!
//! Methods are grouped by `(package, name)` into a [`MultiMethod`], which
//! indexes its fixed-arity methods by parameter count and keeps variadic
//! methods aside so they can be considered for any argument count at or
//! above their fixed arity. The table also tracks every package path that
//! defines a method, together with its ancestor paths, so the web router can
//! walk the package tree.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::error::CoreError;
use crate::id::{MethodId, MultiMethodId};
use crate::method::{qualify, Method, MethodDecl};
use crate::registry::TypeRegistry;

/// Package of the built-in primitive library.
pub const ROOT_PACKAGE: &str = "";

/// All methods sharing one `(package, name)`.
#[derive(Debug, Clone, Serialize)]
pub struct MultiMethod {
    pub id: MultiMethodId,
    pub package: String,
    pub name: String,
    by_arity: BTreeMap<usize, Vec<MethodId>>,
    variadic: Vec<MethodId>,
}

impl MultiMethod {
    /// Methods that may accept `n` arguments: fixed-arity ones first.
    pub fn candidates(&self, n: usize) -> impl Iterator<Item = MethodId> + '_ {
        self.by_arity
            .get(&n)
            .into_iter()
            .flatten()
            .chain(self.variadic.iter())
            .copied()
    }

    /// Every method of this multi-method.
    pub fn methods(&self) -> impl Iterator<Item = MethodId> + '_ {
        self.by_arity
            .values()
            .flatten()
            .chain(self.variadic.iter())
            .copied()
    }

    /// Fixed arities with at least one method, ascending.
    pub fn arities(&self) -> impl Iterator<Item = usize> + '_ {
        self.by_arity.keys().copied()
    }

    pub fn has_variadic(&self) -> bool {
        !self.variadic.is_empty()
    }

    pub fn qualified_name(&self) -> String {
        qualify(&self.package, &self.name)
    }
}

/// Table of all methods and multi-methods.
#[derive(Debug, Clone, Default)]
pub struct MultiMethodTable {
    methods: Vec<Method>,
    multis: Vec<MultiMethod>,
    index: HashMap<(String, String), MultiMethodId>,
    packages: BTreeSet<String>,
    generation: u64,
}

impl MultiMethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method, creating its multi-method on first use.
    ///
    /// Fails with [`CoreError::AmbiguousSignature`] if the multi-method
    /// already has a method with the same parameter types and variadic flag,
    /// and with [`CoreError::TypeNotFound`] if a parameter or return type is
    /// not registered.
    pub fn add_method(
        &mut self,
        decl: MethodDecl,
        registry: &TypeRegistry,
    ) -> Result<MethodId, CoreError> {
        if decl.variadic && decl.params.is_empty() {
            return Err(CoreError::EmptyVariadic { name: decl.name });
        }
        for id in decl
            .params
            .iter()
            .map(|p| p.type_id)
            .chain(decl.returns.iter().copied())
        {
            if registry.get(id).is_none() {
                return Err(CoreError::TypeNotFound { id });
            }
        }

        let multi_id = self.multi_or_insert(&decl.package, &decl.name);
        let multi = &self.multis[multi_id.0 as usize];
        let clash = multi.methods().any(|mid| {
            let m = &self.methods[mid.0 as usize];
            m.variadic == decl.variadic
                && m.params.len() == decl.params.len()
                && m.params
                    .iter()
                    .zip(&decl.params)
                    .all(|(a, b)| a.type_id == b.type_id)
        });
        if clash {
            let types: Vec<_> = decl.params.iter().map(|p| p.type_id).collect();
            return Err(CoreError::AmbiguousSignature {
                name: qualify(&decl.package, &decl.name),
                signature: registry.signature_key(&types),
            });
        }

        let id = MethodId(self.methods.len() as u32);
        let method = Method {
            id,
            multi: multi_id,
            package: decl.package,
            name: decl.name,
            params: decl.params,
            returns: decl.returns,
            variadic: decl.variadic,
            code: decl.code,
        };
        let multi = &mut self.multis[multi_id.0 as usize];
        if method.variadic {
            multi.variadic.push(id);
        } else {
            multi
                .by_arity
                .entry(method.params.len())
                .or_default()
                .push(id);
        }
        tracing::debug!(method = %method.qualified_name(), id = id.0, "registered method");
        self.methods.push(method);
        self.generation += 1;
        Ok(id)
    }

    fn multi_or_insert(&mut self, package: &str, name: &str) -> MultiMethodId {
        let key = (package.to_string(), name.to_string());
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = MultiMethodId(self.multis.len() as u32);
        self.multis.push(MultiMethod {
            id,
            package: package.to_string(),
            name: name.to_string(),
            by_arity: BTreeMap::new(),
            variadic: Vec::new(),
        });
        self.index.insert(key, id);
        self.add_package(package);
        id
    }

    fn add_package(&mut self, package: &str) {
        if package.is_empty() {
            return;
        }
        let mut end = 0;
        for (i, c) in package.char_indices() {
            if c == '/' {
                self.packages.insert(package[..i].to_string());
            }
            end = i + c.len_utf8();
        }
        self.packages.insert(package[..end].to_string());
    }

    /// Multi-method registered under `(package, name)`.
    pub fn lookup(&self, package: &str, name: &str) -> Option<MultiMethodId> {
        self.index
            .get(&(package.to_string(), name.to_string()))
            .copied()
    }

    /// Like [`lookup`](Self::lookup), failing with
    /// [`CoreError::MultiMethodNotFound`].
    pub fn require(&self, package: &str, name: &str) -> Result<MultiMethodId, CoreError> {
        self.lookup(package, name)
            .ok_or_else(|| CoreError::MultiMethodNotFound {
                package: package.to_string(),
                name: name.to_string(),
            })
    }

    pub fn multi(&self, id: MultiMethodId) -> Result<&MultiMethod, CoreError> {
        self.multis
            .get(id.0 as usize)
            .ok_or(CoreError::UnknownMultiMethod { id })
    }

    pub fn method(&self, id: MethodId) -> Result<&Method, CoreError> {
        self.methods
            .get(id.0 as usize)
            .ok_or(CoreError::MethodNotFound { id })
    }

    /// Whether any method is defined in `package` or below it.
    pub fn has_package(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    /// Direct child packages of `package`, as full paths.
    pub fn sub_packages(&self, package: &str) -> Vec<String> {
        let prefix = if package.is_empty() {
            String::new()
        } else {
            format!("{package}/")
        };
        self.packages
            .range(prefix.clone()..)
            .take_while(|p| p.starts_with(&prefix))
            .filter(|p| !p[prefix.len()..].is_empty() && !p[prefix.len()..].contains('/'))
            .cloned()
            .collect()
    }

    /// All multi-methods in registration order.
    pub fn multis(&self) -> impl Iterator<Item = &MultiMethod> {
        self.multis.iter()
    }

    /// All methods in registration order.
    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.methods.iter()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Incremented on every registration; dispatch caches compare against it.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
