//! Type → `ModelAdaptor` lookup with inheritance specificity.
//!
//! `Value`'s built-in shapes (`Aggregate`, `Dictionary`, `Template`) are
//! read directly by the interpreter's `LOAD_PROP` handling; this registry
//! only matters for `Value::Host` payloads, where the host type has no
//! shape the engine knows ahead of time.
//!
//! Rust has no runtime class hierarchy to walk for specificity, so it's
//! modeled explicitly: a host registers `is_a::<Sub, Super>()` edges
//! alongside its adaptor, and lookup picks the unique closest registered
//! ancestor of the queried type, raising `InternalError` if more than one ancestor is
//! tied for closest.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use st_core::ErrorKind;

use crate::template::ST;
use crate::value::Value;

/// Reads a named property off a host object embedded as `Value::Host`.
pub trait ModelAdaptor: 'static {
    fn get_property(&self, st: &ST, model: &dyn Any, property: &str) -> Result<Value, ErrorKind>;
}

/// Type → adaptor registry plus the host-declared "is-a" graph used to
/// resolve a lookup miss to the most specific registered ancestor.
#[derive(Default)]
pub struct AdaptorRegistry {
    adaptors: HashMap<TypeId, Box<dyn ModelAdaptor>>,
    /// child TypeId -> declared parent TypeIds, in registration order.
    is_a: HashMap<TypeId, Vec<TypeId>>,
}

impl AdaptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Any>(&mut self, adaptor: impl ModelAdaptor) {
        self.adaptors.insert(TypeId::of::<T>(), Box::new(adaptor));
    }

    /// Declares that `Sub` should be treated as a `Super` when no adaptor
    /// is registered directly for `Sub`.
    pub fn declare_is_a<Sub: Any, Super: Any>(&mut self) {
        self.is_a.entry(TypeId::of::<Sub>()).or_default().push(TypeId::of::<Super>());
    }

    /// Finds the adaptor to use for `T`, walking the is-a graph
    /// breadth-first and returning the unique adaptor found at the
    /// smallest distance. `Ok(None)` means no adaptor is reachable at all;
    /// `Err` means two or more equally-specific candidates tied.
    pub fn resolve<T: Any>(&self) -> Result<Option<&dyn ModelAdaptor>, ErrorKind> {
        self.resolve_type(TypeId::of::<T>())
    }

    /// Same as [`AdaptorRegistry::resolve`] but for a `TypeId` obtained at
    /// runtime from a `Value::Host` payload, where no static type `T` is
    /// available to name.
    pub fn resolve_type(&self, ty: TypeId) -> Result<Option<&dyn ModelAdaptor>, ErrorKind> {
        if let Some(a) = self.adaptors.get(&ty) {
            return Ok(Some(a.as_ref()));
        }
        let mut frontier = vec![ty];
        let mut seen = std::collections::HashSet::new();
        seen.insert(ty);
        loop {
            let mut next = Vec::new();
            for t in &frontier {
                if let Some(parents) = self.is_a.get(t) {
                    for &p in parents {
                        if seen.insert(p) {
                            next.push(p);
                        }
                    }
                }
            }
            if next.is_empty() {
                return Ok(None);
            }
            let matches: Vec<&dyn ModelAdaptor> = next.iter().filter_map(|t| self.adaptors.get(t)).map(|a| a.as_ref()).collect();
            match matches.len() {
                0 => frontier = next,
                1 => return Ok(Some(matches[0])),
                _ => {
                    return Err(ErrorKind::InternalError {
                        detail: "ambiguous model adaptor match: more than one equally specific supertype is registered".into(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Animal;
    struct Dog;

    struct UpperAdaptor;
    impl ModelAdaptor for UpperAdaptor {
        fn get_property(&self, _st: &ST, _model: &dyn Any, property: &str) -> Result<Value, ErrorKind> {
            Ok(Value::str(property.to_uppercase()))
        }
    }

    #[test]
    fn resolves_directly_registered_type() {
        let mut reg = AdaptorRegistry::new();
        reg.register::<Animal>(UpperAdaptor);
        assert!(reg.resolve::<Animal>().unwrap().is_some());
    }

    #[test]
    fn falls_back_through_declared_is_a_edge() {
        let mut reg = AdaptorRegistry::new();
        reg.register::<Animal>(UpperAdaptor);
        reg.declare_is_a::<Dog, Animal>();
        assert!(reg.resolve::<Dog>().unwrap().is_some());
    }

    #[test]
    fn unregistered_unrelated_type_resolves_to_none() {
        let reg = AdaptorRegistry::new();
        assert!(reg.resolve::<Dog>().unwrap().is_none());
    }
}
