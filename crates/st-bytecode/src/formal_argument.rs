//! Declared formal arguments of a template.

use st_core::Span;

/// How a formal argument's default value was written, if at all.
///
/// Defaults are lazy: an `ANONYMOUS_TEMPLATE` default is itself a compiled
/// sub-template evaluated only the first time the argument is read and
/// found unbound.
#[derive(Clone, Debug, PartialEq)]
pub enum DefaultValue {
    None,
    /// `{...}` — a nested template, named `<name>_default_value` and
    /// compiled alongside its owner.
    AnonymousTemplate,
    /// A quoted string literal, unquoted at compile time.
    Str(String),
    /// `[]` — always the empty list.
    EmptyList,
    Bool(bool),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormalArgument {
    pub name: String,
    pub index: usize,
    pub default: DefaultValue,
    pub span: Span,
}

impl FormalArgument {
    pub fn new(name: impl Into<String>, index: usize, span: Span) -> Self {
        Self { name: name.into(), index, default: DefaultValue::None, span }
    }

    pub fn has_default(&self) -> bool {
        !matches!(self.default, DefaultValue::None)
    }
}
