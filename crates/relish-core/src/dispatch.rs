//! Multi-method dispatch.
//!
//! [`dispatch`] selects the most specific applicable method for a tuple of
//! dynamic argument types. A method is applicable when every declared
//! parameter type is an ancestor of the corresponding actual type (`Nil` is
//! also accepted by any non-primitive parameter). Among the applicable
//! methods the result is the unique one that no other candidate dominates,
//! where `a` dominates `b` if each of `a`'s parameter types is equal to or
//! more specific than `b`'s and at least one is strictly more specific.
//!
//! [`DispatchCache`] memoizes resolutions per `(multi-method, type tuple)`
//! and drops everything whenever the method table changes.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::id::{MethodId, MultiMethodId, TypeId};
use crate::method::Method;
use crate::multimethod::MultiMethodTable;
use crate::registry::TypeRegistry;

/// Depth charged when `Nil` is passed for a non-primitive parameter.
const NIL_DEPTH: u32 = u16::MAX as u32;

/// Outcome of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub method: MethodId,
    /// Per-position subtype distance from declared to actual type.
    pub depths: SmallVec<[u32; 4]>,
}

/// Selects the most specific method of `multi` for `args`.
pub fn dispatch(
    registry: &TypeRegistry,
    table: &MultiMethodTable,
    multi: MultiMethodId,
    args: &[TypeId],
) -> Result<Dispatch, CoreError> {
    let mm = table.multi(multi)?;

    let mut applicable: Vec<(&Method, SmallVec<[u32; 4]>)> = Vec::new();
    for id in mm.candidates(args.len()) {
        let method = table.method(id)?;
        if let Some(depths) = applicable_depths(registry, method, args) {
            applicable.push((method, depths));
        }
    }

    if applicable.is_empty() {
        return Err(CoreError::NoApplicableMethod {
            name: mm.qualified_name(),
            args: registry.signature_key(args),
        });
    }

    let n = args.len();
    let maximal: Vec<usize> = (0..applicable.len())
        .filter(|&i| {
            !applicable
                .iter()
                .enumerate()
                .any(|(j, (m, _))| j != i && dominates(registry, m, applicable[i].0, n))
        })
        .collect();

    let chosen = match maximal.as_slice() {
        [only] => *only,
        _ => prefer_fixed(registry, &applicable, &maximal, n).ok_or_else(|| {
            CoreError::AmbiguousDispatch {
                name: mm.qualified_name(),
                args: registry.signature_key(args),
                candidates: maximal
                    .iter()
                    .map(|&i| {
                        let m = applicable[i].0;
                        format!("{}({})", m.name, registry.signature_key(&m.param_types()))
                    })
                    .collect(),
            }
        })?,
    };

    let (method, depths) = applicable.swap_remove(chosen);
    tracing::trace!(
        multi = %mm.qualified_name(),
        method = method.id.0,
        "dispatched"
    );
    Ok(Dispatch {
        method: method.id,
        depths,
    })
}

fn applicable_depths(
    registry: &TypeRegistry,
    method: &Method,
    args: &[TypeId],
) -> Option<SmallVec<[u32; 4]>> {
    if !method.accepts_arity(args.len()) {
        return None;
    }
    args.iter()
        .enumerate()
        .map(|(i, actual)| {
            let declared = method.param_type_at(i)?;
            match registry.distance(declared, *actual) {
                Some(d) => Some(d),
                None if *actual == TypeId::NIL && !registry.is_primitive(declared) => {
                    Some(NIL_DEPTH)
                }
                None => None,
            }
        })
        .collect()
}

/// Every position of `a` is equal to or more specific than `b`'s.
fn covers(registry: &TypeRegistry, a: &Method, b: &Method, n: usize) -> bool {
    (0..n).all(|i| match (a.param_type_at(i), b.param_type_at(i)) {
        (Some(ta), Some(tb)) => registry.is_ancestor(tb, ta),
        _ => false,
    })
}

fn dominates(registry: &TypeRegistry, a: &Method, b: &Method, n: usize) -> bool {
    covers(registry, a, b, n)
        && (0..n).any(|i| match (a.param_type_at(i), b.param_type_at(i)) {
            (Some(ta), Some(tb)) => registry.is_more_specific(ta, tb),
            _ => false,
        })
}

/// Breaks a tie between a single fixed-arity method and variadic methods it
/// covers.
fn prefer_fixed(
    registry: &TypeRegistry,
    applicable: &[(&Method, SmallVec<[u32; 4]>)],
    maximal: &[usize],
    n: usize,
) -> Option<usize> {
    let mut fixed = maximal.iter().filter(|&&i| !applicable[i].0.variadic);
    let winner = *fixed.next()?;
    if fixed.next().is_some() {
        return None;
    }
    let w = applicable[winner].0;
    maximal
        .iter()
        .filter(|&&i| i != winner)
        .all(|&i| covers(registry, w, applicable[i].0, n))
        .then_some(winner)
}

type CacheKey = (MultiMethodId, SmallVec<[TypeId; 4]>);

struct CacheInner {
    entries: LruCache<CacheKey, Dispatch>,
    generation: u64,
}

/// LRU memo of dispatch resolutions.
pub struct DispatchCache {
    inner: Mutex<CacheInner>,
}

impl DispatchCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        DispatchCache {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                generation: 0,
            }),
        }
    }

    /// Cached [`dispatch`]. Errors are not cached.
    pub fn dispatch(
        &self,
        registry: &TypeRegistry,
        table: &MultiMethodTable,
        multi: MultiMethodId,
        args: &[TypeId],
    ) -> Result<Dispatch, CoreError> {
        let key: CacheKey = (multi, SmallVec::from_slice(args));
        {
            let mut inner = self.inner.lock();
            if inner.generation != table.generation() {
                inner.entries.clear();
                inner.generation = table.generation();
            }
            if let Some(hit) = inner.entries.get(&key) {
                return Ok(hit.clone());
            }
        }

        let resolved = dispatch(registry, table, multi, args)?;
        let mut inner = self.inner.lock();
        if inner.generation == table.generation() {
            inner.entries.put(key, resolved.clone());
        }
        Ok(resolved)
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for DispatchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCache")
            .field("len", &self.len())
            .finish()
    }
}
