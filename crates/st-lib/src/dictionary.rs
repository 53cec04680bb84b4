//! Group-file dictionary definitions: `d ::= ["k":v, default:v2]`.

use indexmap::IndexMap;

use crate::value::Value;

/// A dictionary entry's value, as written in a group file.
///
/// `UseKey` is the literal `key` sentinel token (grounded in `st_group.py`'s
/// dictionary handling): looking up any key that resolves to this entry
/// returns the lookup key itself, converted to a `Value::Str`, rather than
/// a stored value.
#[derive(Clone, Debug, PartialEq)]
pub enum DictEntry {
    Value(Value),
    UseKey,
}

/// One `name ::= [...]` definition. Lookup falls back to the `default` key
/// entry, if declared, when the requested key is absent.
#[derive(Clone, Debug, Default)]
pub struct Dictionary {
    entries: IndexMap<String, DictEntry>,
    default: Option<DictEntry>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: DictEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn set_default(&mut self, entry: DictEntry) {
        self.default = Some(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.default.is_none()
    }

    /// Resolve `key`, falling back to the `default` entry, if any. `UseKey`
    /// resolves to `key` itself as a string.
    pub fn get(&self, key: &str) -> Option<Value> {
        let entry = self.entries.get(key).or(self.default.as_ref())?;
        Some(match entry {
            DictEntry::Value(v) => v.clone(),
            DictEntry::UseKey => Value::str(key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_key() {
        let mut d = Dictionary::new();
        d.insert("a", DictEntry::Value(Value::str("apple")));
        d.set_default(DictEntry::Value(Value::str("unknown")));
        assert!(matches!(d.get("a"), Some(Value::Str(s)) if &*s == "apple"));
        assert!(matches!(d.get("z"), Some(Value::Str(s)) if &*s == "unknown"));
    }

    #[test]
    fn use_key_sentinel_echoes_the_lookup_key() {
        let mut d = Dictionary::new();
        d.insert("a", DictEntry::UseKey);
        assert!(matches!(d.get("a"), Some(Value::Str(s)) if &*s == "a"));
    }

    #[test]
    fn missing_key_with_no_default_is_none() {
        let d = Dictionary::new();
        assert!(d.get("missing").is_none());
    }
}
