//! StringTemplate: a strict model-view templating engine with a
//! bytecode VM.
//!
//! A [`Group`] loads and compiles template source (a single group file, a
//! directory of `.st`/`.stg` files, or an in-memory string); [`Group::get_instance_of`]
//! stamps out an [`ST`] bound to a particular attribute set, and
//! [`ST::render`]/[`ST::render_with`] run it through [`interpreter::Interpreter`]
//! to produce text.

pub mod adaptor;
pub mod aggregate;
pub mod dictionary;
pub mod error;
pub mod group;
pub mod interpreter;
pub mod renderer;
pub mod scope;
pub mod template;
pub mod value;

pub use adaptor::{AdaptorRegistry, ModelAdaptor};
pub use aggregate::Aggregate;
pub use dictionary::{DictEntry, Dictionary};
pub use error::Error;
pub use group::Group;
pub use interpreter::Interpreter;
pub use renderer::{AttributeRenderer, RenderKind, RendererRegistry};
pub use scope::InstanceScope;
pub use template::{DebugState, ST};
pub use value::{HostObject, Value};

/// Per-render knobs a host can set without touching the group or
/// instance itself.
#[derive(Clone, Debug, Default)]
pub struct RenderOptions {
    pub locale: Option<String>,
    pub line_width: Option<usize>,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_line_width(mut self, width: usize) -> Self {
        self.line_width = Some(width);
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }
}
