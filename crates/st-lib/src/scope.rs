//! `InstanceScope`: the dynamic-scoping frame the interpreter threads
//! through every opcode.
//!
//! Rather than build an owned, heap-allocated parent chain, a scope
//! borrows its parent for the lifetime of the recursive `exec` call that
//! is rendering the enclosing `ST`: scopes are passed explicitly down
//! every VM operation rather than threaded through thread-local state.
//! The Rust call stack itself mirrors an explicit scope-object chain,
//! since each nested template render is a nested call to `exec`.

use std::cell::Cell;

use crate::template::ST;

pub struct InstanceScope<'a> {
    pub parent: Option<&'a InstanceScope<'a>>,
    pub st: &'a ST,
    pub ip: Cell<u16>,
}

impl<'a> InstanceScope<'a> {
    pub fn root(st: &'a ST) -> Self {
        Self { parent: None, st, ip: Cell::new(0) }
    }

    pub fn child(&'a self, st: &'a ST) -> Self {
        Self { parent: Some(self), st, ip: Cell::new(0) }
    }

    /// Walks `self` then every ancestor looking for a formal argument
    /// named `name`, returning its bound value (or `Value::Null` for an
    /// unset-but-declared slot). `None` means no scope in the chain
    /// declares this name at all.
    pub fn lookup(&self, name: &str) -> Option<crate::value::Value> {
        let mut scope = self;
        loop {
            if let Some(idx) = scope.st.find_local(name) {
                return Some(scope.st.slot(idx));
            }
            match scope.parent {
                Some(p) => scope = p,
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Group;
    use crate::value::Value;
    use std::rc::Rc;

    fn one_arg_st(name: &str) -> ST {
        let group = Group::from_string("").unwrap();
        let mut compiled = st_bytecode::CompiledST::new("t", "/", "");
        compiled.add_arg(st_bytecode::FormalArgument::new(name, 0, st_core::Span::default()));
        ST::new(Rc::new(compiled), group.clone(), group)
    }

    #[test]
    fn lookup_falls_back_to_parent_scope() {
        let outer = one_arg_st("it");
        outer.add("it", Value::str("outer-value"));
        let inner = one_arg_st("other");
        let outer_scope = InstanceScope::root(&outer);
        let inner_scope = outer_scope.child(&inner);
        assert!(matches!(inner_scope.lookup("it"), Some(Value::Str(s)) if &*s == "outer-value"));
    }

    #[test]
    fn lookup_prefers_innermost_binding() {
        let outer = one_arg_st("it");
        outer.add("it", Value::str("outer"));
        let inner = one_arg_st("it");
        inner.add("it", Value::str("inner"));
        let outer_scope = InstanceScope::root(&outer);
        let inner_scope = outer_scope.child(&inner);
        assert!(matches!(inner_scope.lookup("it"), Some(Value::Str(s)) if &*s == "inner"));
    }
}
