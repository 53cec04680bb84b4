//! `ST`: a user-facing template instance bound to a `CompiledST` and the
//! group that created it.

use std::cell::RefCell;
use std::rc::Rc;

use st_bytecode::{CompiledST, FormalArgument};
use st_core::Span;

use crate::group::Group;
use crate::interpreter::Interpreter;
use crate::value::Value;
use crate::RenderOptions;

/// One formal argument's slot. `Empty` is distinct from `Value::Null`: a
/// slot the caller never bound is eligible for its declared default; an
/// explicitly-added `null` attribute is not.
#[derive(Clone, Debug)]
enum Slot {
    Empty,
    Set(Value),
}

/// Construction-site and per-attribute history, recorded only when
/// `ST::with_debug` opts in. Rendering this is out of scope; it exists so
/// a host can inspect it.
#[derive(Clone, Debug, Default)]
pub struct DebugState {
    pub creation_site: String,
    pub added: Vec<(String, String)>,
}

struct STInner {
    compiled: Rc<CompiledST>,
    locals: Vec<Slot>,
    creation_group: Group,
    native_group: Group,
    defaults_applied: bool,
    debug: Option<DebugState>,
}

fn compiled_mut(inner: &mut STInner) -> &mut CompiledST {
    if Rc::strong_count(&inner.compiled) > 1 {
        inner.compiled = Rc::new(inner.compiled.clone_for_dynamic_args());
    }
    Rc::get_mut(&mut inner.compiled).expect("unique CompiledST after copy-on-write clone")
}

/// A template instance. Cheap to clone (an `Rc` pointer copy); all clones
/// alias the same underlying locals, matching the host-facing `&ST`
/// handles the public API hands back from `group.get_instance_of`.
#[derive(Clone)]
pub struct ST(Rc<RefCell<STInner>>);

impl ST {
    pub fn new(compiled: Rc<CompiledST>, creation_group: Group, native_group: Group) -> Self {
        let slot_count = compiled.formal_arguments.len();
        ST(Rc::new(RefCell::new(STInner {
            compiled,
            locals: vec![Slot::Empty; slot_count],
            creation_group,
            native_group,
            defaults_applied: false,
            debug: None,
        })))
    }

    pub fn with_debug(self) -> Self {
        {
            let mut inner = self.0.borrow_mut();
            let site = inner.compiled.full_name();
            inner.debug = Some(DebugState { creation_site: site, added: Vec::new() });
        }
        self
    }

    pub fn compiled(&self) -> Rc<CompiledST> {
        self.0.borrow().compiled.clone()
    }

    pub fn creation_group(&self) -> Group {
        self.0.borrow().creation_group.clone()
    }

    pub fn native_group(&self) -> Group {
        self.0.borrow().native_group.clone()
    }

    /// Adds `value` under `name`, chainable. A second `add` of the same
    /// name builds a list rather than overwriting, StringTemplate's
    /// multi-valued attribute rule. Adding an attribute not among a
    /// template's *declared* formal
    /// arguments triggers the copy-on-write clone described in
    /// `CompiledST::clone_for_dynamic_args`; adding an unknown name to a
    /// template that *does* declare an argument list is a host
    /// programming error, logged and otherwise ignored.
    pub fn add(&self, name: &str, value: impl Into<Value>) -> &Self {
        self.add_value(name, value.into());
        self
    }

    fn add_value(&self, name: &str, value: Value) {
        let mut inner = self.0.borrow_mut();
        let idx = match inner.compiled.formal_arguments.get(name).map(|a| a.index) {
            Some(idx) => idx,
            None if inner.compiled.has_formal_args => {
                log::warn!(
                    "add(\"{name}\", ..) ignored: {} has no such declared argument",
                    inner.compiled.full_name()
                );
                return;
            }
            None => {
                let compiled = compiled_mut(&mut inner);
                let idx = compiled.formal_arguments.len();
                compiled.add_arg(FormalArgument::new(name, idx, Span::default()));
                inner.locals.push(Slot::Empty);
                idx
            }
        };
        if let Some(debug) = inner.debug.as_mut() {
            debug.added.push((name.to_string(), value.to_string()));
        }
        let slot = std::mem::replace(&mut inner.locals[idx], Slot::Empty);
        inner.locals[idx] = match slot {
            Slot::Empty => Slot::Set(value),
            Slot::Set(Value::List(existing)) => {
                let mut items = (*existing).clone();
                items.push(value);
                Slot::Set(Value::list(items))
            }
            Slot::Set(previous) => Slot::Set(Value::list(vec![previous, value])),
        };
    }

    pub fn remove(&self, name: &str) {
        let mut inner = self.0.borrow_mut();
        if let Some(idx) = inner.compiled.formal_arguments.get(name).map(|a| a.index) {
            inner.locals[idx] = Slot::Empty;
        }
    }

    pub(crate) fn find_local(&self, name: &str) -> Option<usize> {
        self.0.borrow().compiled.formal_arguments.get(name).map(|a| a.index)
    }

    pub(crate) fn slot(&self, index: usize) -> Value {
        match &self.0.borrow().locals[index] {
            Slot::Set(v) => v.clone(),
            Slot::Empty => Value::Null,
        }
    }

    pub(crate) fn slot_is_empty(&self, index: usize) -> bool {
        matches!(self.0.borrow().locals[index], Slot::Empty)
    }

    pub(crate) fn set_slot(&self, index: usize, value: Value) {
        self.0.borrow_mut().locals[index] = Slot::Set(value);
    }

    /// Reads this instance's own attribute directly, with no enclosing
    /// scope walk; used by `LOAD_PROP`/`LOAD_PROP_IND` when the popped
    /// value is itself a template instance.
    pub fn get_attribute(&self, name: &str) -> Option<Value> {
        let idx = self.find_local(name)?;
        Some(self.slot(idx))
    }

    /// Marks this instance's lazy defaults as applied, returning whether
    /// they already had been (so the interpreter only resolves each
    /// default expression once per instance, the first time it runs).
    pub(crate) fn mark_defaults_applied(&self) -> bool {
        let mut inner = self.0.borrow_mut();
        std::mem::replace(&mut inner.defaults_applied, true)
    }

    pub fn debug_events(&self) -> Option<DebugState> {
        self.0.borrow().debug.clone()
    }

    /// Renders this instance with default options (no line wrap).
    pub fn render(&self) -> String {
        self.render_with(RenderOptions::default())
    }

    pub fn render_with(&self, options: RenderOptions) -> String {
        let mut writer = st_vm::string_writer();
        writer.set_line_width(options.line_width);
        let interp = Interpreter::new();
        interp.render(self, &mut writer);
        writer.into_inner()
    }

    /// Writes this instance through an arbitrary `fmt::Write` sink,
    /// returning the number of characters written.
    pub fn write(&self, sink: &mut dyn std::fmt::Write, options: RenderOptions) -> usize {
        let mut writer = st_vm::Writer::new(sink);
        writer.set_line_width(options.line_width);
        let interp = Interpreter::new();
        interp.render(self, &mut writer);
        writer.index() as usize
    }

    /// Adds a property bag under `name`: an aggregate with one field per
    /// entry in `fields`, paired positionally with `values`.
    pub fn add_aggr(&self, name: &str, fields: &[&str], values: impl IntoIterator<Item = Value>) -> &Self {
        let mut aggregate = crate::aggregate::Aggregate::new();
        let mut values = values.into_iter();
        for field in fields {
            if let Some(v) = values.next() {
                aggregate.set(*field, v);
            }
        }
        self.add_value(name, Value::Aggregate(Rc::new(aggregate)));
        self
    }

    /// `%1, %2, ...`-style convenience formatting for anonymous templates:
    /// translates each `%N` placeholder in `template_source` to `argN` and
    /// compiles the result as a template declaring `arg1..argN` formal
    /// arguments, then binds `args` to them positionally and renders.
    /// `template_source` must still supply its own expression delimiters,
    /// e.g. `"<%1> is <%2>"`.
    pub fn format(template_source: &str, args: &[Value]) -> String {
        let translated = translate_percent_placeholders(template_source, args.len());
        let formals: Vec<String> = (1..=args.len()).map(|i| format!("arg{i}")).collect();
        let source = format!("_format({}) ::= <<{}>>", formals.join(","), translated);
        let group = Group::from_string(source).expect("in-memory group source is never unreadable");
        let st = group.get_instance_of("/_format").expect("just-defined template always resolves");
        for (i, value) in args.iter().enumerate() {
            st.add(&format!("arg{}", i + 1), value.clone());
        }
        st.render()
    }
}

/// Rewrites every `%N` (1-based) in `source` to the bare identifier
/// `argN`, leaving any surrounding `<...>` expression delimiters the
/// caller already wrote untouched, so the translated body can be compiled
/// as an ordinary template. `%%` escapes a literal `%`.
fn translate_percent_placeholders(source: &str, max_arg: usize) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some((_, '%')) => {
                out.push('%');
                chars.next();
            }
            Some((_, d)) if d.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some((_, d)) = chars.peek().copied() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match digits.parse::<usize>() {
                    Ok(n) if n >= 1 && n <= max_arg => out.push_str(&format!("arg{n}")),
                    _ => {
                        out.push('%');
                        out.push_str(&digits);
                    }
                }
            }
            _ => out.push('%'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Group;

    fn simple_st(has_args: bool, args: &[&str]) -> ST {
        let group = Group::from_string("").unwrap();
        let mut compiled = CompiledST::new("t", "/", "");
        for a in args {
            let idx = compiled.formal_arguments.len();
            compiled.add_arg(FormalArgument::new(*a, idx, Span::default()));
        }
        compiled.has_formal_args = has_args;
        ST::new(Rc::new(compiled), group.clone(), group)
    }

    #[test]
    fn second_add_to_same_name_builds_a_list() {
        let st = simple_st(true, &["xs"]);
        st.add("xs", "a");
        st.add("xs", "b");
        let v = st.get_attribute("xs").unwrap();
        assert!(matches!(v, Value::List(items) if items.len() == 2));
    }

    #[test]
    fn add_on_undeclared_name_is_ignored_when_args_are_declared() {
        let st = simple_st(true, &["xs"]);
        st.add("unknown", "x");
        assert!(st.get_attribute("unknown").is_none());
    }

    #[test]
    fn add_on_argless_template_dynamically_extends_it() {
        let st = simple_st(false, &[]);
        st.add("anything", "x");
        assert!(matches!(st.get_attribute("anything"), Some(Value::Str(s)) if &*s == "x"));
    }

    #[test]
    fn copy_on_write_keeps_sibling_instances_independent() {
        let group = Group::from_string("").unwrap();
        let compiled = Rc::new(CompiledST::new("t", "/", ""));
        let a = ST::new(compiled.clone(), group.clone(), group.clone());
        let b = ST::new(compiled, group.clone(), group);
        a.add("x", "only-on-a");
        assert!(a.get_attribute("x").is_some());
        assert!(b.get_attribute("x").is_none());
    }

    #[test]
    fn remove_resets_slot_to_empty() {
        let st = simple_st(true, &["x"]);
        st.add("x", "v");
        st.remove("x");
        assert!(matches!(st.get_attribute("x"), Some(Value::Null)));
    }

    #[test]
    fn add_aggr_builds_a_property_bag_by_position() {
        let st = simple_st(true, &["person"]);
        st.add_aggr("person", &["name", "age"], [Value::str("Ada"), Value::Int(36)]);
        match st.get_attribute("person") {
            Some(Value::Aggregate(a)) => {
                assert!(matches!(a.get("name"), Some(Value::Str(s)) if &**s == "Ada"));
                assert!(matches!(a.get("age"), Some(Value::Int(36))));
            }
            other => panic!("expected an aggregate, got {other:?}"),
        }
    }

    #[test]
    fn format_translates_percent_placeholders_and_binds_positionally() {
        let out = ST::format("<%1> is <%2>", &[Value::str("Ada"), Value::Int(36)]);
        assert_eq!(out, "Ada is 36");
    }

    #[test]
    fn format_escapes_a_literal_percent_with_percent_percent() {
        let out = ST::format("100%% done: <%1>", &[Value::str("ok")]);
        assert_eq!(out, "100% done: ok");
    }
}
