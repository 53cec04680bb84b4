//! The AST the parser builds and the code generator walks.
//!
//! One `Vec<Chunk>` describes either a whole template body or a sub-template
//! body; both are compiled the same way (see `codegen::compile_chunks`).

use st_core::Span;

#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
    Text(String),
    /// A run of spaces/tabs at column 0. Demoted to literal `Text` by the
    /// code generator unless it is immediately followed by exactly one
    /// `Expr` chunk and then a `Newline` or the end of the chunk list
    /// (drives `INDENT`/`DEDENT` emission).
    Indent(String),
    Newline,
    Comment,
    Expr(ExprStmt),
    If(IfStmt),
}

/// One `<...>` expression hole: one or more comma-separated source
/// expressions, an optional `:` map-template list, and optional options.
#[derive(Clone, Debug, PartialEq)]
pub struct ExprStmt {
    pub sources: Vec<Expr>,
    pub targets: Vec<TemplateRef>,
    pub options: Options,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfStmt {
    /// `if` branch followed by any number of `elseif` branches.
    pub branches: Vec<(Expr, Vec<Chunk>)>,
    pub else_branch: Option<Vec<Chunk>>,
}

/// A template reference used as a map target: either a call to a named
/// template (possibly with args already bound) or an inline sub-template.
#[derive(Clone, Debug, PartialEq)]
pub enum TemplateRef {
    Named { path: String, args: Vec<Arg>, is_super: bool },
    Anon(SubTemplate),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubTemplate {
    pub params: Vec<String>,
    pub body: Vec<Chunk>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Positional(Expr),
    Named(String, Expr),
    /// `...` passthrough: forward every attribute in scope that the
    /// callee declares and the caller did not explicitly bind.
    Ellipsis,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Options {
    pub separator: Option<Box<Expr>>,
    pub null: Option<Box<Expr>>,
    pub wrap: Option<Box<Expr>>,
    pub anchor: bool,
    pub format: Option<Box<Expr>>,
}

impl Options {
    pub fn is_empty(&self) -> bool {
        self.separator.is_none()
            && self.null.is_none()
            && self.wrap.is_none()
            && !self.anchor
            && self.format.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinFunc {
    First,
    Last,
    Rest,
    Trunc,
    Strip,
    Trim,
    Length,
    StrLen,
    Reverse,
}

impl BuiltinFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "first" => Self::First,
            "last" => Self::Last,
            "rest" => Self::Rest,
            "trunc" => Self::Trunc,
            "strip" => Self::Strip,
            "trim" => Self::Trim,
            "length" => Self::Length,
            "strlen" => Self::StrLen,
            "reverse" => Self::Reverse,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Str(String),
    True,
    False,
    /// `a`, or the first step of a property chain `a.b.c`.
    Attr(String),
    /// `a.b` — property access on the value of `base`.
    Prop { base: Box<Expr>, name: String },
    /// `a.(expr)` — indirect property access.
    PropInd { base: Box<Expr>, name: Box<Expr> },
    /// `(expr)` used in name position, e.g. `<(expr)()>` or `<(expr)>`.
    Indirect(Box<Expr>),
    Call { path: String, args: Vec<Arg>, is_super: bool },
    /// `<(expr)(args)>` — the template name itself is computed.
    IndirectCall { name: Box<Expr>, args: Vec<Arg> },
    Func { func: BuiltinFunc, arg: Box<Expr> },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    SubTemplate(SubTemplate),
    /// `@region()` reference.
    Region { owner: Option<String>, name: String },
}
