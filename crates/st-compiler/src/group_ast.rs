//! The parsed shape of one group-file source: definitions, dictionaries,
//! aliases, regions, delimiter declarations, and imports, before any of
//! them have been compiled or resolved against a `Group`'s namespace.

use st_core::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct GroupFile {
    pub delimiters: Option<(char, char)>,
    pub imports: Vec<String>,
    pub defs: Vec<Def>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Def {
    Template(TemplateDef),
    Dictionary(DictionaryDef),
    /// `name ::= other` where `other` is a bare identifier, not a quoted
    /// body — installed as an alias rather than a template.
    Alias { name: String, target: String, span: Span },
    Region(TemplateDef),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TemplateDef {
    pub name: String,
    /// `@owner.region()` region definitions carry their owning template's
    /// name separately from `name` (the region's own name).
    pub region_owner: Option<String>,
    pub formal_args: Vec<FormalArgSyntax>,
    /// Whether a `(...)` argument list was written at all, even if empty.
    pub has_formal_args: bool,
    pub body: String,
    pub body_span: Span,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormalArgSyntax {
    pub name: String,
    pub default: Option<DefaultSyntax>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DefaultSyntax {
    Str(String),
    EmptyList,
    Bool(bool),
    /// `{...}` anonymous template default, source text plus its span
    /// relative to the owning group file.
    AnonTemplate(String, Span),
}

#[derive(Clone, Debug, PartialEq)]
pub struct DictionaryDef {
    pub name: String,
    pub entries: Vec<(DictKey, DictValue)>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DictKey {
    Str(String),
    Default,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DictValue {
    Str(String),
    /// `unset` / `key` sentinel meaning "use the lookup key as the value".
    KeySentinel,
    EmptyList,
}
