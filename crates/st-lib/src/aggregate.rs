//! `Aggregate`: the built-in property-bag value constructed by
//! `ST::add_aggr`, for the common case of grouping a handful of ad-hoc
//! named fields into one attribute without defining a host type.

use indexmap::IndexMap;

use crate::value::Value;

/// An ordered property bag. Looked up by `LOAD_PROP`/`LOAD_PROP_IND` the
/// same way a dictionary is, but constructed from a single
/// `name.{prop1,prop2,...}` aggregate-spec string rather than key/value
/// pairs supplied one at a time.
#[derive(Clone, Debug, Default)]
pub struct Aggregate {
    fields: IndexMap<String, Value>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let mut a = Aggregate::new();
        a.set("name", Value::str("Ada")).set("age", Value::Int(36));
        assert!(matches!(a.get("name"), Some(Value::Str(s)) if &**s == "Ada"));
        assert!(matches!(a.get("age"), Some(Value::Int(36))));
        assert!(a.get("missing").is_none());
    }
}
