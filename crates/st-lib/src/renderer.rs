//! Type → `AttributeRenderer` lookup, used by `WRITE`/`WRITE_OPT` to turn a
//! scalar value into text honoring an optional `format=` option string.
//!
//! Unlike [`crate::adaptor::AdaptorRegistry`], renderer lookup has no
//! inheritance specificity to resolve: it's a plain type-keyed table, so
//! a value's kind maps to exactly one [`RenderKind`],
//! and the registry either has an entry for that kind or it doesn't.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::value::Value;

/// Formats a value to text, honoring an optional `format=` option string
/// and locale.
pub trait AttributeRenderer: 'static {
    fn to_string(&self, value: &Value, format: Option<&str>, locale: Option<&str>) -> String;
}

/// The key a value maps to when looked up in a [`RendererRegistry`]. Every
/// `Value` variant that can reach `WRITE` without itself being a
/// list/template/dictionary/aggregate is representable here; those
/// composite shapes are handled by the interpreter before a renderer would
/// ever see them (an iterable is rendered element-by-element, not as one
/// opaque blob).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RenderKind {
    Str,
    Int,
    Float,
    Bool,
    Host(TypeId),
}

impl RenderKind {
    pub fn of(value: &Value) -> Option<RenderKind> {
        match value {
            Value::Str(_) => Some(RenderKind::Str),
            Value::Int(_) => Some(RenderKind::Int),
            Value::Float(_) => Some(RenderKind::Float),
            Value::Bool(_) => Some(RenderKind::Bool),
            Value::Host(h) => Some(RenderKind::Host((*h).as_any().type_id())),
            Value::Null | Value::List(_) | Value::Dictionary(_) | Value::Aggregate(_) | Value::Template(_) => None,
        }
    }

    pub fn of_host<T: Any>() -> RenderKind {
        RenderKind::Host(TypeId::of::<T>())
    }
}

#[derive(Default)]
pub struct RendererRegistry {
    renderers: HashMap<RenderKind, Box<dyn AttributeRenderer>>,
}

impl RendererRegistry {
    /// A fresh registry pre-populated with the default string and numeric
    /// renderers every template needs even if the host never calls
    /// `register_renderer`: any template that uses `format=` on a plain
    /// string needs *some* registered renderer to exist.
    pub fn with_defaults() -> Self {
        let mut reg = Self::default();
        reg.register(RenderKind::Str, StringRenderer);
        reg.register(RenderKind::Int, NumberRenderer);
        reg.register(RenderKind::Float, NumberRenderer);
        reg
    }

    pub fn register(&mut self, kind: RenderKind, renderer: impl AttributeRenderer) {
        self.renderers.insert(kind, Box::new(renderer));
    }

    pub fn get(&self, kind: RenderKind) -> Option<&dyn AttributeRenderer> {
        self.renderers.get(&kind).map(|r| r.as_ref())
    }
}

/// Honors `upper`, `lower`, and `cap` (capitalize first character) format
/// strings; any other format string, or none, passes the string through.
pub struct StringRenderer;

impl AttributeRenderer for StringRenderer {
    fn to_string(&self, value: &Value, format: Option<&str>, _locale: Option<&str>) -> String {
        let s = value.to_string();
        match format {
            Some("upper") => s.to_uppercase(),
            Some("lower") => s.to_lowercase(),
            Some("cap") => {
                let mut chars = s.chars();
                match chars.next() {
                    Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                    None => s,
                }
            }
            _ => s,
        }
    }
}

/// Honors a minimal `%Nd`-style width format string (zero-padded to `N`
/// digits); any other format string falls back to the plain decimal
/// rendering.
pub struct NumberRenderer;

impl AttributeRenderer for NumberRenderer {
    fn to_string(&self, value: &Value, format: Option<&str>, _locale: Option<&str>) -> String {
        let plain = value.to_string();
        let Some(fmt) = format else { return plain };
        let Some(digits) = fmt.strip_prefix('%').and_then(|rest| rest.strip_suffix('d')) else {
            return plain;
        };
        let Ok(width) = digits.parse::<usize>() else { return plain };
        let negative = plain.starts_with('-');
        let digits_only = plain.trim_start_matches('-');
        let padded = format!("{digits_only:0>width$}");
        if negative { format!("-{padded}") } else { padded }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_renderer_honors_upper_and_cap() {
        let r = StringRenderer;
        assert_eq!(r.to_string(&Value::str("hi"), Some("upper"), None), "HI");
        assert_eq!(r.to_string(&Value::str("hi"), Some("cap"), None), "Hi");
        assert_eq!(r.to_string(&Value::str("Hi"), None, None), "Hi");
    }

    #[test]
    fn number_renderer_zero_pads_to_width() {
        let r = NumberRenderer;
        assert_eq!(r.to_string(&Value::Int(7), Some("%3d"), None), "007");
        assert_eq!(r.to_string(&Value::Int(-7), Some("%3d"), None), "-007");
    }

    #[test]
    fn defaults_registry_has_string_and_number_renderers() {
        let reg = RendererRegistry::with_defaults();
        assert!(reg.get(RenderKind::Str).is_some());
        assert!(reg.get(RenderKind::Int).is_some());
    }
}
