//! The closed diagnostic taxonomy and the listener contract that every
//! compile-time and run-time error is funneled through.
//!
//! A template error is never a Rust panic and never aborts a render or a
//! compile on its own: it is formatted into a [`StError`] and handed to
//! whatever [`Listener`] the host registered. Only conditions a host must
//! react to synchronously (I/O failure, an internal invariant violation)
//! are promoted to a hard `Result::Err` by the caller; see `ErrorManager`'s
//! doc comment for the exact line.

use std::fmt;

use serde::Serialize;

/// Which stage of the pipeline raised a diagnostic.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lexer,
    Parser,
    Compile,
    Runtime,
    Internal,
}

/// The closed set of conditions this engine can report. One variant per
/// message format; arguments are plain strings so a `Listener` can render
/// them without reaching back into compiler or VM internals.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
#[serde(tag = "kind")]
pub enum ErrorKind {
    // --- runtime semantic errors ---
    NoSuchTemplate { name: String },
    NoImportedTemplate { name: String },
    NoSuchAttribute { name: String },
    NoSuchAttributePassThrough { name: String },
    RefToImplicitAttributeOutOfScope { name: String },
    MissingFormalArguments,
    NoSuchProperty { expr: String },
    MapArgumentCountMismatch { values: usize, declared: usize },
    ArgumentCountMismatch { passed: usize, template: String, declared: usize },
    ExpectingString { function: String, got: String },
    CantImport { path: String },

    // --- compile-time syntax/semantic errors ---
    SyntaxError { detail: String },
    TemplateRedefinition { name: String },
    EmbeddedRegionRedefinition { name: String },
    RegionRedefinition { name: String },
    MapRedefinition { name: String },
    ParameterRedefinition { name: String },
    AliasTargetUndefined { alias: String, target: String },
    TemplateRedefinitionAsMap { name: String },
    LexerError { detail: String },
    NoDefaultValue,
    NoSuchFunction { name: String },
    NoSuchRegion { template: String, region: String },
    NoSuchOption { name: String },
    InvalidTemplateName { name: String },
    AnonArgumentMismatch { formals: usize, values: usize },
    RequiredParameterAfterOptional { names: String },
    UnsupportedDelimiter { ch: char },

    // --- internal errors ---
    InternalError { detail: String },
    WriteIoError { detail: String },
    CantLoadGroupFile { path: String },
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NoSuchTemplate { name } => write!(f, "no such template: {name}"),
            ErrorKind::NoImportedTemplate { name } => write!(f, "no such template: super.{name}"),
            ErrorKind::NoSuchAttribute { name } => write!(f, "attribute {name} isn't defined"),
            ErrorKind::NoSuchAttributePassThrough { name } => {
                write!(f, "could not pass through undefined attribute {name}")
            }
            ErrorKind::RefToImplicitAttributeOutOfScope { name } => {
                write!(f, "implicitly-defined attribute {name} not visible")
            }
            ErrorKind::MissingFormalArguments => write!(f, "missing argument definitions"),
            ErrorKind::NoSuchProperty { expr } => {
                write!(f, "no such property or can't access: {expr}")
            }
            ErrorKind::MapArgumentCountMismatch { values, declared } => write!(
                f,
                "iterating through {values} values in zip map but template has {declared} declared arguments"
            ),
            ErrorKind::ArgumentCountMismatch { passed, template, declared } => write!(
                f,
                "passed {passed} arg(s) to template {template} with {declared} declared arg(s)"
            ),
            ErrorKind::ExpectingString { function, got } => {
                write!(f, "function {function} expects a string not {got}")
            }
            ErrorKind::CantImport { path } => write!(f, "can't find template(s) in import \"{path}\""),

            ErrorKind::SyntaxError { detail } => write!(f, "{detail}"),
            ErrorKind::TemplateRedefinition { name } => write!(f, "redefinition of template {name}"),
            ErrorKind::EmbeddedRegionRedefinition { name } => write!(
                f,
                "region {name} is embedded and thus already implicitly defined"
            ),
            ErrorKind::RegionRedefinition { name } => write!(f, "redefinition of region {name}"),
            ErrorKind::MapRedefinition { name } => write!(f, "redefinition of dictionary {name}"),
            ErrorKind::ParameterRedefinition { name } => write!(f, "redefinition of parameter {name}"),
            ErrorKind::AliasTargetUndefined { alias, target } => {
                write!(f, "cannot alias {alias} to undefined template: {target}")
            }
            ErrorKind::TemplateRedefinitionAsMap { name } => {
                write!(f, "redefinition of template {name} as a map")
            }
            ErrorKind::LexerError { detail } => write!(f, "{detail}"),
            ErrorKind::NoDefaultValue => write!(f, "missing dictionary default value"),
            ErrorKind::NoSuchFunction { name } => write!(f, "no such function: {name}"),
            ErrorKind::NoSuchRegion { template, region } => {
                write!(f, "template {template} doesn't have a region called {region}")
            }
            ErrorKind::NoSuchOption { name } => write!(f, "no such option: {name}"),
            ErrorKind::InvalidTemplateName { name } => {
                write!(f, "invalid template name or path: {name}")
            }
            ErrorKind::AnonArgumentMismatch { formals, values } => write!(
                f,
                "anonymous template has {formals} arg(s) but mapped across {values} value(s)"
            ),
            ErrorKind::RequiredParameterAfterOptional { names } => write!(
                f,
                "required parameters ({names}) must appear before optional parameters"
            ),
            ErrorKind::UnsupportedDelimiter { ch } => {
                write!(f, "unsupported delimiter character: {ch}")
            }

            ErrorKind::InternalError { detail } => write!(f, "{detail}"),
            ErrorKind::WriteIoError { detail } => {
                write!(f, "error writing output caused by {detail}")
            }
            ErrorKind::CantLoadGroupFile { path } => write!(f, "can't load group file {path}"),
        }
    }
}

/// A fully-located diagnostic: which phase raised it, where in the source
/// (if known), and the underlying [`ErrorKind`].
#[derive(Clone, Debug, Serialize)]
pub struct StError {
    pub phase: Phase,
    pub kind: ErrorKind,
    /// Name of the template the error occurred in, if any.
    pub template: Option<String>,
    /// 1-based source line, if known.
    pub line: Option<u32>,
    /// 0-based column, if known.
    pub column: Option<i32>,
}

impl StError {
    pub fn new(phase: Phase, kind: ErrorKind) -> Self {
        Self { phase, kind, template: None, line: None, column: None }
    }

    pub fn with_template(mut self, name: impl Into<String>) -> Self {
        self.template = Some(name.into());
        self
    }

    pub fn with_location(mut self, line: u32, column: i32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl fmt::Display for StError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = self.line {
            write!(f, "{line}:{}: ", self.column.unwrap_or(0))?;
        }
        write!(f, "{}", self.kind)
    }
}

/// Receives every diagnostic the compiler and interpreter raise.
///
/// Default-implemented methods let a listener only override the channel it
/// cares about; the default compile/runtime/internal handlers all forward
/// to [`Listener::report`].
pub trait Listener {
    fn report(&mut self, error: &StError);

    fn compile_time_error(&mut self, error: &StError) {
        self.report(error);
    }

    fn runtime_error(&mut self, error: &StError) {
        // NoSuchProperty is common and often benign (an adaptor probing for
        // an optional field), but this always reports; hosts that want it
        // muted from stderr noise install a Listener that filters it.
        self.report(error);
    }

    fn internal_error(&mut self, error: &StError) {
        self.report(error);
    }
}

/// Listener that writes every diagnostic to stderr, StringTemplate's
/// default error-manager behavior.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrListener;

impl Listener for StderrListener {
    fn report(&mut self, error: &StError) {
        eprintln!("{error}");
    }
}

/// Listener that mutes `NoSuchProperty` from its runtime channel and
/// forwards everything else to the `log` crate in addition to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuietListener;

impl Listener for QuietListener {
    fn report(&mut self, error: &StError) {
        log::error!("{error}");
        eprintln!("{error}");
    }

    fn runtime_error(&mut self, error: &StError) {
        if matches!(error.kind, ErrorKind::NoSuchProperty { .. }) {
            log::warn!("{error}");
            return;
        }
        self.report(error);
    }
}

/// Collects every diagnostic it sees, for tests and tooling that want to
/// assert on the set of errors a compile or render produced instead of
/// scraping stderr.
#[derive(Debug, Default, Clone)]
pub struct CollectingListener {
    pub errors: Vec<StError>,
}

impl Listener for CollectingListener {
    fn report(&mut self, error: &StError) {
        self.errors.push(error.clone());
    }
}

/// Forwards to the boxed listener, so a `Group` can hold one trait object
/// (`Box<dyn Listener>`) chosen at construction time rather than being
/// generic over every listener type a host might install.
impl Listener for Box<dyn Listener> {
    fn report(&mut self, error: &StError) {
        (**self).report(error)
    }

    fn compile_time_error(&mut self, error: &StError) {
        (**self).compile_time_error(error)
    }

    fn runtime_error(&mut self, error: &StError) {
        (**self).runtime_error(error)
    }

    fn internal_error(&mut self, error: &StError) {
        (**self).internal_error(error)
    }
}

/// Formats diagnostics and dispatches them to a [`Listener`].
///
/// Holds no state beyond the listener itself; reporting never panics and
/// never returns an error, a "report and keep going" philosophy for
/// template-level problems.
pub struct ErrorManager<L: Listener> {
    listener: L,
}

impl<L: Listener> ErrorManager<L> {
    pub fn new(listener: L) -> Self {
        Self { listener }
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }

    pub fn compile_time_error(&mut self, kind: ErrorKind) {
        let err = StError::new(Phase::Compile, kind);
        self.listener.compile_time_error(&err);
    }

    pub fn lexer_error(&mut self, kind: ErrorKind) {
        let err = StError::new(Phase::Lexer, kind);
        self.listener.compile_time_error(&err);
    }

    pub fn runtime_error(&mut self, kind: ErrorKind, template: Option<&str>) {
        let mut err = StError::new(Phase::Runtime, kind);
        if let Some(t) = template {
            err = err.with_template(t);
        }
        self.listener.runtime_error(&err);
    }

    pub fn internal_error(&mut self, kind: ErrorKind) {
        let err = StError::new(Phase::Internal, kind);
        self.listener.internal_error(&err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_no_such_attribute() {
        let kind = ErrorKind::NoSuchAttribute { name: "foo".into() };
        assert_eq!(kind.to_string(), "attribute foo isn't defined");
    }

    #[test]
    fn error_kind_serializes_to_a_tagged_json_object() {
        let kind = ErrorKind::NoSuchAttribute { name: "foo".into() };
        let json: serde_json::Value = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "NoSuchAttribute");
        assert_eq!(json["name"], "foo");
    }

    #[test]
    fn st_error_serializes_with_its_location() {
        let err = StError::new(Phase::Runtime, ErrorKind::NoSuchTemplate { name: "x".into() }).with_location(3, 7);
        let json: serde_json::Value = serde_json::to_value(&err).unwrap();
        assert_eq!(json["phase"], "runtime");
        assert_eq!(json["line"], 3);
        assert_eq!(json["column"], 7);
    }

    #[test]
    fn collecting_listener_records_errors() {
        let mut mgr = ErrorManager::new(CollectingListener::default());
        mgr.runtime_error(ErrorKind::NoSuchTemplate { name: "x".into() }, Some("main"));
        assert_eq!(mgr.listener().errors.len(), 1);
        assert_eq!(mgr.listener().errors[0].template.as_deref(), Some("main"));
    }

    #[test]
    fn quiet_listener_mutes_no_such_property_from_runtime_channel() {
        struct Probe(Vec<String>);
        impl Listener for Probe {
            fn report(&mut self, error: &StError) {
                self.0.push(error.to_string());
            }
        }
        let mut mgr = ErrorManager::new(Probe(Vec::new()));
        mgr.runtime_error(ErrorKind::NoSuchProperty { expr: "x.y".into() }, None);
        assert_eq!(mgr.listener().0.len(), 1);
    }
}
