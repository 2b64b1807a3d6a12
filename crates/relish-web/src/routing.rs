//! URL path to multi-method resolution.
//!
//! Path segments are consumed left to right from the root web package. A
//! segment names either a multi-method of the current package (converted
//! from snake_case to camelCase), which ends the walk with the remaining
//! segments as positional arguments, or a sub-package, which the walk
//! descends into. `index`, `default` and `icon` are the fallbacks.

use heck::ToLowerCamelCase;
use relish_core::{MultiMethodId, MultiMethodTable};

use crate::error::WebError;

/// A resolved handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub package: String,
    pub name: String,
    pub multi: MultiMethodId,
    /// Unconsumed path segments.
    pub positional: Vec<String>,
}

/// Splits and percent-decodes a request path.
pub fn segments(path: &str) -> Result<Vec<String>, WebError> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            urlencoding::decode(s)
                .map(|d| d.into_owned())
                .map_err(|_| WebError::BadRequest(format!("path segment '{s}' is not UTF-8")))
        })
        .collect()
}

/// Whether the path names a static asset: its last segment contains a dot.
pub fn is_static(segments: &[String]) -> bool {
    segments.last().is_some_and(|s| s.contains('.'))
}

fn child(package: &str, segment: &str) -> String {
    if package.is_empty() {
        segment.to_string()
    } else {
        format!("{package}/{segment}")
    }
}

fn route(table: &MultiMethodTable, package: &str, name: &str, rest: &[String]) -> Option<Route> {
    table.lookup(package, name).map(|multi| Route {
        package: package.to_string(),
        name: name.to_string(),
        multi,
        positional: rest.to_vec(),
    })
}

/// Resolves `segments` under `root`.
pub fn resolve(table: &MultiMethodTable, root: &str, segments: &[String]) -> Option<Route> {
    let mut package = root.to_string();
    let mut rest = segments;
    loop {
        let Some((first, tail)) = rest.split_first() else {
            return route(table, &package, "index", &[])
                .or_else(|| route(table, &package, "default", &[]));
        };
        if first == "favicon.ico" && tail.is_empty() {
            if let Some(r) = route(table, &package, "icon", &[]) {
                return Some(r);
            }
        }
        let name = first.to_lower_camel_case();
        if let Some(r) = route(table, &package, &name, tail) {
            return Some(r);
        }
        let sub = child(&package, first);
        if table.has_package(&sub) {
            package = sub;
            rest = tail;
            continue;
        }
        return route(table, &package, "default", rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relish_core::{MethodCode, MethodDecl, Parameter, TypeId, TypeRegistry};

    fn table(methods: &[(&str, &str, usize)]) -> MultiMethodTable {
        let reg = TypeRegistry::new();
        let mut table = MultiMethodTable::new();
        for (i, (package, name, arity)) in methods.iter().enumerate() {
            let decl = MethodDecl {
                package: package.to_string(),
                name: name.to_string(),
                params: (0..*arity)
                    .map(|n| Parameter::new(format!("p{n}"), TypeId::STRING))
                    .collect(),
                returns: vec![],
                variadic: false,
                code: MethodCode::Native(i as u32),
            };
            table.add_method(decl, &reg).unwrap();
        }
        table
    }

    fn segs(path: &str) -> Vec<String> {
        segments(path).unwrap()
    }

    #[test]
    fn snake_case_segment_selects_camel_case_method() {
        let t = table(&[("app/web", "fooBar", 2)]);
        let r = resolve(&t, "app/web", &segs("/foo_bar/x/y")).unwrap();
        assert_eq!(r.name, "fooBar");
        assert_eq!(r.positional, vec!["x", "y"]);
    }

    #[test]
    fn walks_into_sub_packages() {
        let t = table(&[("app/web/foo", "bar", 1), ("app/web", "index", 0)]);
        let r = resolve(&t, "app/web", &segs("/foo/bar/baz")).unwrap();
        assert_eq!((r.package.as_str(), r.name.as_str()), ("app/web/foo", "bar"));
        assert_eq!(r.positional, vec!["baz"]);
    }

    #[test]
    fn index_and_default_fallbacks() {
        let t = table(&[("app/web", "index", 0), ("app/web/docs", "default", 2)]);
        assert_eq!(resolve(&t, "app/web", &segs("/")).unwrap().name, "index");
        let r = resolve(&t, "app/web", &segs("/docs/a/b")).unwrap();
        assert_eq!(r.name, "default");
        assert_eq!(r.positional, vec!["a", "b"]);
        assert!(resolve(&t, "app/web", &segs("/nothing")).is_none());
    }

    #[test]
    fn icon_serves_favicon() {
        let t = table(&[("app/web", "icon", 0)]);
        assert_eq!(resolve(&t, "app/web", &segs("/favicon.ico")).unwrap().name, "icon");
    }

    #[test]
    fn unknown_path_is_unrouted() {
        let t = table(&[("app/web", "hello", 0)]);
        assert!(resolve(&t, "app/web", &segs("/goodbye")).is_none());
    }

    #[test]
    fn segments_are_decoded() {
        assert_eq!(segs("/a%20b//c"), vec!["a b", "c"]);
        assert!(is_static(&segs("/css/site.css")));
        assert!(!is_static(&segs("/css/site")));
    }
}
