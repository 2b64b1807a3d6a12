//! Method descriptors.
//!
//! A [`Method`] is one implementation of a multi-method: its declared
//! parameter and return types plus a handle to its code. The code itself
//! lives in the runtime; relish-core only stores an index into the
//! runtime's native or compiled code tables.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::{MethodId, MultiMethodId, TypeId};

/// A declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub type_id: TypeId,
}

impl Parameter {
    pub fn new(name: impl Into<String>, type_id: TypeId) -> Self {
        Parameter {
            name: name.into(),
            type_id,
        }
    }
}

/// Where a method's body lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodCode {
    /// Index into the runtime's native primitive table.
    Native(u32),
    /// Index into the runtime's compiled body table.
    Compiled(u32),
}

/// A method as declared at load time, before it has ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub package: String,
    pub name: String,
    pub params: Vec<Parameter>,
    pub returns: Vec<TypeId>,
    /// The last parameter type repeats for every trailing argument.
    pub variadic: bool,
    pub code: MethodCode,
}

/// A registered method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    pub id: MethodId,
    pub multi: MultiMethodId,
    pub package: String,
    pub name: String,
    pub params: Vec<Parameter>,
    pub returns: Vec<TypeId>,
    pub variadic: bool,
    pub code: MethodCode,
}

impl Method {
    /// Number of fixed (non-repeating) parameters.
    pub fn fixed_arity(&self) -> usize {
        if self.variadic {
            self.params.len().saturating_sub(1)
        } else {
            self.params.len()
        }
    }

    /// Whether the method accepts `n` arguments.
    pub fn accepts_arity(&self, n: usize) -> bool {
        if self.variadic {
            n >= self.fixed_arity()
        } else {
            n == self.params.len()
        }
    }

    /// Declared type of argument position `i`, extending the variadic tail.
    pub fn param_type_at(&self, i: usize) -> Option<TypeId> {
        match self.params.get(i) {
            Some(p) => Some(p.type_id),
            None if self.variadic => self.params.last().map(|p| p.type_id),
            None => None,
        }
    }

    /// Declared parameter types in order.
    pub fn param_types(&self) -> SmallVec<[TypeId; 4]> {
        self.params.iter().map(|p| p.type_id).collect()
    }

    /// `package.name`, or just `name` for root-package methods.
    pub fn qualified_name(&self) -> String {
        qualify(&self.package, &self.name)
    }
}

pub(crate) fn qualify(package: &str, name: &str) -> String {
    if package.is_empty() {
        name.to_string()
    } else {
        format!("{package}.{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn print_method() -> Method {
        Method {
            id: MethodId(0),
            multi: MultiMethodId(0),
            package: String::new(),
            name: "print".into(),
            params: vec![Parameter::new("args", TypeId(0))],
            returns: vec![],
            variadic: true,
            code: MethodCode::Native(0),
        }
    }

    #[test]
    fn variadic_accepts_zero_or_more_trailing_args() {
        let m = print_method();
        assert_eq!(m.fixed_arity(), 0);
        assert!(m.accepts_arity(0));
        assert!(m.accepts_arity(5));
        assert_eq!(m.param_type_at(3), Some(TypeId(0)));
    }

    #[test]
    fn fixed_arity_is_exact() {
        let mut m = print_method();
        m.variadic = false;
        m.params.push(Parameter::new("sep", TypeId(12)));
        assert!(m.accepts_arity(2));
        assert!(!m.accepts_arity(3));
        assert_eq!(m.param_type_at(2), None);
        assert_eq!(m.param_types().as_slice(), &[TypeId(0), TypeId(12)]);
    }

    #[test]
    fn qualified_name_omits_root_package() {
        let mut m = print_method();
        assert_eq!(m.qualified_name(), "print");
        m.package = "shop/web".into();
        assert_eq!(m.qualified_name(), "shop/web.print");
    }
}
