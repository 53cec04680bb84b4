//! String interning for compiled templates.
//!
//! Converts heap-allocated strings into cheap `u16` handles. Comparing two
//! symbols is O(1) integer comparison, and the underlying `strings` vector
//! preserves insertion order so a disassembler can print `LOAD_STR #3` next
//! to the literal string it names without a separate lookup pass.

use indexmap::IndexSet;

/// A handle into a [`StringTable`].
///
/// Two symbols are equal iff they were produced by the same table and the
/// same insertion slot. `u16` caps a single template's string pool at 65536
/// entries, matching the 16-bit operand width of the bytecode format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct StringSym(u16);

impl StringSym {
    #[inline]
    pub fn as_u16(self) -> u16 {
        self.0
    }

    #[inline]
    pub fn from_raw(index: u16) -> Self {
        Self(index)
    }
}

/// De-duplicating, insertion-ordered string pool.
///
/// One `StringTable` is owned by each `CompiledST`; every `LOAD_STR`
/// instruction's operand is a `StringSym` into this table.
#[derive(Debug, Clone, Default)]
pub struct StringTable {
    strings: IndexSet<String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its existing symbol if already present.
    ///
    /// # Panics
    /// Panics if this would be the 65537th distinct string in the table.
    pub fn intern(&mut self, s: &str) -> StringSym {
        if let Some(idx) = self.strings.get_index_of(s) {
            return StringSym(idx as u16);
        }
        let (idx, _) = self.strings.insert_full(s.to_owned());
        assert!(idx <= u16::MAX as usize, "string table overflow");
        StringSym(idx as u16)
    }

    #[inline]
    pub fn resolve(&self, sym: StringSym) -> &str {
        self.strings
            .get_index(sym.0 as usize)
            .expect("StringSym from a foreign table")
    }

    #[inline]
    pub fn try_resolve(&self, sym: StringSym) -> Option<&str> {
        self.strings.get_index(sym.0 as usize).map(String::as_str)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StringSym, &str)> {
        self.strings
            .iter()
            .enumerate()
            .map(|(i, s)| (StringSym(i as u16), s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_repeated_strings() {
        let mut t = StringTable::new();
        let a = t.intern("hello");
        let b = t.intern("world");
        let c = t.intern("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn resolves_back_to_original_text() {
        let mut t = StringTable::new();
        let sym = t.intern("attr");
        assert_eq!(t.resolve(sym), "attr");
    }

    #[test]
    fn preserves_insertion_order() {
        let mut t = StringTable::new();
        t.intern("b");
        t.intern("a");
        t.intern("b");
        let all: Vec<_> = t.iter().map(|(_, s)| s).collect();
        assert_eq!(all, vec!["b", "a"]);
    }
}
