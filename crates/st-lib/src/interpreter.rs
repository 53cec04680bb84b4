//! The stack-based bytecode interpreter.
//!
//! `exec` walks one `CompiledST`'s instruction stream, maintaining an
//! operand stack of [`Slot`]s and threading an [`InstanceScope`] through
//! every nested template it constructs along the way — the Rust call
//! stack mirrors an explicit scope-object chain, since rendering a
//! nested `Value::Template` is itself a recursive `exec` call (see
//! `scope.rs`).
//!
//! `OPTIONS`/`ARGS` push a mutable record onto the operand stack; each
//! following `STORE_OPTION`/`STORE_ARG` pops the value just computed and
//! mutates the record now exposed at the new stack top, rather than
//! popping it. A plain `Vec<Value>` stack has no way to express "mutate
//! the thing beneath the top", so the stack here holds the richer [`Slot`]
//! enum instead.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use st_bytecode::{decode_at, CompiledST, DefaultValue, Opcode};
use st_core::{ErrorKind, StringSym};
use st_vm::Writer;

use crate::group::Group;
use crate::renderer::RenderKind;
use crate::scope::InstanceScope;
use crate::template::ST;
use crate::value::{HostObject, Value};

/// Upper bound on instructions interpreted across one `render` call,
/// independent of how deeply templates recurse into one another — a
/// supplemental safety valve for a stack machine a cyclic `super.t()`
/// chain or a self-referential map could otherwise run forever.
const DEFAULT_MAX_STEPS: u64 = 2_000_000;

#[derive(Default)]
struct OptionsRecord {
    anchor: Option<Value>,
    format: Option<Value>,
    null: Option<Value>,
    separator: Option<Value>,
    wrap: Option<Value>,
}

#[derive(Default)]
struct ArgsRecord {
    named: IndexMap<String, Value>,
    passthrough: bool,
}

enum Slot {
    Val(Value),
    Opts(OptionsRecord),
    Args(ArgsRecord),
}

impl Slot {
    fn into_val(self) -> Value {
        match self {
            Slot::Val(v) => v,
            _ => panic!("interpreter stack corruption: expected a value slot"),
        }
    }
}

/// A single `(name, args)` map target, as pushed by `compile_map_target`.
struct MapTarget {
    name: String,
    args: Option<ArgsRecord>,
}

/// Walks a `CompiledST`'s bytecode against a dynamic-scoping chain of
/// `ST` instances, writing rendered text through a `st_vm::Writer`.
pub struct Interpreter {
    max_steps: Option<u64>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self { max_steps: Some(DEFAULT_MAX_STEPS) }
    }

    /// An interpreter with no fuel limit, for callers that already bound
    /// recursion depth some other way (tests, trusted template sources).
    pub fn unbounded() -> Self {
        Self { max_steps: None }
    }

    pub fn with_max_steps(max_steps: Option<u64>) -> Self {
        Self { max_steps }
    }

    pub fn render<W: fmt::Write>(&self, st: &ST, writer: &mut Writer<W>) {
        let scope = InstanceScope::root(st);
        let mut steps = 0u64;
        let _ = self.exec(st, &scope, writer, &mut steps);
    }

    fn tick(&self, steps: &mut u64, group: &Group, compiled: &CompiledST) -> bool {
        *steps += 1;
        match self.max_steps {
            Some(max) if *steps > max => {
                group.report_internal(ErrorKind::InternalError {
                    detail: format!("execution fuel exhausted rendering {}", compiled.full_name()),
                });
                false
            }
            _ => true,
        }
    }

    fn exec<W: fmt::Write>(&self, st: &ST, scope: &InstanceScope, writer: &mut Writer<W>, steps: &mut u64) -> fmt::Result {
        self.apply_defaults(st, steps);
        let compiled = st.compiled();
        let group = st.creation_group();
        let mut stack: Vec<Slot> = Vec::new();
        let mut ip: u16 = 0;
        let mut indent_mark: Option<u64> = None;
        let mut suppress_newline = false;

        while let Some(instr) = decode_at(&compiled.code, ip) {
            if !self.tick(steps, &group, &compiled) {
                return Ok(());
            }
            let mut next_ip = ip + instr.width;
            match instr.opcode {
                Opcode::LoadStr => {
                    let s = compiled.strings.resolve(StringSym::from_raw(instr.operands[0]));
                    stack.push(Slot::Val(Value::str(s)));
                }
                Opcode::LoadAttr => {
                    let name = compiled.strings.resolve(StringSym::from_raw(instr.operands[0])).to_string();
                    let value = self.load_attr(st, &group, scope, &name);
                    stack.push(Slot::Val(value));
                }
                Opcode::LoadLocal => {
                    let idx = instr.operands[0] as usize;
                    stack.push(Slot::Val(st.slot(idx)));
                }
                Opcode::LoadProp => {
                    let name = compiled.strings.resolve(StringSym::from_raw(instr.operands[0])).to_string();
                    let base = stack.pop().expect("load_prop: empty stack").into_val();
                    let value = self.load_prop(&group, st, &base, &name);
                    stack.push(Slot::Val(value));
                }
                Opcode::LoadPropInd => {
                    let name_val = stack.pop().expect("load_prop_ind: empty stack").into_val();
                    let base = stack.pop().expect("load_prop_ind: empty stack").into_val();
                    let name = name_val.to_string();
                    let value = self.load_prop(&group, st, &base, &name);
                    stack.push(Slot::Val(value));
                }
                Opcode::StoreOption => {
                    let value = stack.pop().expect("store_option: empty stack").into_val();
                    let Some(Slot::Opts(opts)) = stack.last_mut() else {
                        panic!("store_option: top of stack is not an options record");
                    };
                    match instr.operands[0] {
                        st_compiler::codegen::OPT_ANCHOR => opts.anchor = Some(value),
                        st_compiler::codegen::OPT_FORMAT => opts.format = Some(value),
                        st_compiler::codegen::OPT_NULL => opts.null = Some(value),
                        st_compiler::codegen::OPT_SEPARATOR => opts.separator = Some(value),
                        st_compiler::codegen::OPT_WRAP => opts.wrap = Some(value),
                        other => panic!("store_option: unrecognized option slot {other}"),
                    }
                }
                Opcode::StoreArg => {
                    let value = stack.pop().expect("store_arg: empty stack").into_val();
                    let key = compiled.strings.resolve(StringSym::from_raw(instr.operands[0])).to_string();
                    let Some(Slot::Args(args)) = stack.last_mut() else {
                        panic!("store_arg: top of stack is not an args record");
                    };
                    args.named.insert(key, value);
                }
                Opcode::New => {
                    let name = compiled.strings.resolve(StringSym::from_raw(instr.operands[0])).to_string();
                    let n = instr.operands[1] as usize;
                    let positional = pop_n_values(&mut stack, n);
                    let value = self.new_instance(&group, &compiled.prefix, &group, scope, &name, positional, None, &compiled.full_name());
                    stack.push(Slot::Val(value));
                }
                Opcode::NewInd => {
                    let n = instr.operands[0] as usize;
                    let positional = pop_n_values(&mut stack, n);
                    let name = stack.pop().expect("new_ind: missing name").into_val().to_string();
                    let value = self.new_instance(&group, &compiled.prefix, &group, scope, &name, positional, None, &compiled.full_name());
                    stack.push(Slot::Val(value));
                }
                Opcode::NewBoxArgs => {
                    let name = compiled.strings.resolve(StringSym::from_raw(instr.operands[0])).to_string();
                    let args = pop_args_record(&mut stack, "new_box_args");
                    let value = self.new_instance(&group, &compiled.prefix, &group, scope, &name, Vec::new(), Some(&args), &compiled.full_name());
                    stack.push(Slot::Val(value));
                }
                Opcode::SuperNew => {
                    let name = compiled.strings.resolve(StringSym::from_raw(instr.operands[0])).to_string();
                    let n = instr.operands[1] as usize;
                    let positional = pop_n_values(&mut stack, n);
                    let value = self.super_new(st, &group, scope, &name, positional, None, &compiled.full_name());
                    stack.push(Slot::Val(value));
                }
                Opcode::SuperNewBoxArgs => {
                    let name = compiled.strings.resolve(StringSym::from_raw(instr.operands[0])).to_string();
                    let args = pop_args_record(&mut stack, "super_new_box_args");
                    let value = self.super_new(st, &group, scope, &name, Vec::new(), Some(&args), &compiled.full_name());
                    stack.push(Slot::Val(value));
                }
                Opcode::Passthru => {
                    let Some(Slot::Args(args)) = stack.last_mut() else {
                        panic!("passthru: top of stack is not an args record");
                    };
                    args.passthrough = true;
                }
                Opcode::Write => {
                    let value = stack.pop().expect("write: missing value").into_val();
                    self.do_write(&value, None, &group, scope, writer, steps)?;
                }
                Opcode::WriteOpt => {
                    let Some(Slot::Opts(_)) = stack.last() else {
                        panic!("write_opt: top of stack is not an options record");
                    };
                    let Slot::Opts(opts) = stack.pop().unwrap() else { unreachable!() };
                    let value = stack.pop().expect("write_opt: missing value").into_val();
                    self.do_write(&value, Some(&opts), &group, scope, writer, steps)?;
                }
                Opcode::Map => {
                    let target = pop_map_target(&mut stack);
                    let source = stack.pop().expect("map: missing source").into_val();
                    let value = self.run_map(&group, &compiled.prefix, scope, std::slice::from_ref(&target), &source);
                    stack.push(Slot::Val(value));
                }
                Opcode::RotMap => {
                    let n = instr.operands[0] as usize;
                    let mut targets = Vec::with_capacity(n);
                    for _ in 0..n {
                        targets.push(pop_map_target(&mut stack));
                    }
                    targets.reverse();
                    let source = stack.pop().expect("rot_map: missing source").into_val();
                    let value = self.run_map(&group, &compiled.prefix, scope, &targets, &source);
                    stack.push(Slot::Val(value));
                }
                Opcode::ZipMap => {
                    let n = instr.operands[0] as usize;
                    let target = pop_map_target(&mut stack);
                    let sources = pop_n_values(&mut stack, n);
                    let value = self.run_zip_map(&group, &compiled.prefix, scope, &target, &sources);
                    stack.push(Slot::Val(value));
                }
                Opcode::Br => {
                    next_ip = instr.operands[0];
                }
                Opcode::Brf => {
                    let cond = stack.pop().expect("brf: missing condition").into_val();
                    if !cond.is_truthy() {
                        next_ip = instr.operands[0];
                    }
                }
                Opcode::Options => stack.push(Slot::Opts(OptionsRecord::default())),
                Opcode::Args => stack.push(Slot::Args(ArgsRecord::default())),
                Opcode::List => stack.push(Slot::Val(Value::list(Vec::new()))),
                Opcode::Add => {
                    let v = stack.pop().expect("add: missing value").into_val();
                    let base = stack.pop().expect("add: missing list").into_val();
                    let mut items = match base {
                        Value::List(items) => (*items).clone(),
                        Value::Null => Vec::new(),
                        other => vec![other],
                    };
                    items.push(v);
                    stack.push(Slot::Val(Value::list(items)));
                }
                Opcode::ToStr => {
                    let v = stack.pop().expect("tostr: missing value").into_val();
                    let mut nested = st_vm::string_writer();
                    self.write_one(&v, None, &group, scope, &mut nested, steps)?;
                    stack.push(Slot::Val(Value::str(nested.into_inner())));
                }
                Opcode::First => {
                    let v = stack.pop().expect("first: missing value").into_val();
                    let result = match v.as_list() {
                        Some(items) => items.first().cloned().unwrap_or(Value::Null),
                        None => match v.as_chars() {
                            Some(chars) => chars.first().map(|c| Value::str(c.to_string())).unwrap_or(Value::Null),
                            None => v,
                        },
                    };
                    stack.push(Slot::Val(result));
                }
                Opcode::Last => {
                    let v = stack.pop().expect("last: missing value").into_val();
                    let result = match v.as_list() {
                        Some(items) => items.last().cloned().unwrap_or(Value::Null),
                        None => match v.as_chars() {
                            Some(chars) => chars.last().map(|c| Value::str(c.to_string())).unwrap_or(Value::Null),
                            None => v,
                        },
                    };
                    stack.push(Slot::Val(result));
                }
                Opcode::Rest => {
                    let v = stack.pop().expect("rest: missing value").into_val();
                    let result = match v.as_list() {
                        Some(items) if items.len() > 1 => Value::list(items[1..].to_vec()),
                        Some(_) => Value::Null,
                        None => match v.as_chars() {
                            Some(chars) if chars.len() > 1 => Value::str(chars[1..].iter().collect::<String>()),
                            Some(_) => Value::Null,
                            None => Value::Null,
                        },
                    };
                    stack.push(Slot::Val(result));
                }
                Opcode::Trunc => {
                    let v = stack.pop().expect("trunc: missing value").into_val();
                    let result = match v.as_list() {
                        Some(items) if items.len() > 1 => Value::list(items[..items.len() - 1].to_vec()),
                        Some(_) => Value::Null,
                        None => match v.as_chars() {
                            Some(chars) if chars.len() > 1 => Value::str(chars[..chars.len() - 1].iter().collect::<String>()),
                            Some(_) => Value::Null,
                            None => Value::Null,
                        },
                    };
                    stack.push(Slot::Val(result));
                }
                Opcode::Strip => {
                    let v = stack.pop().expect("strip: missing value").into_val();
                    let result = match v.as_list() {
                        Some(items) => Value::list(items.iter().filter(|i| !i.is_null()).cloned().collect()),
                        None => v,
                    };
                    stack.push(Slot::Val(result));
                }
                Opcode::Trim => {
                    let v = stack.pop().expect("trim: missing value").into_val();
                    if !matches!(v, Value::Str(_)) {
                        group.report_runtime(
                            ErrorKind::ExpectingString { function: "trim".into(), got: kind_name(&v).into() },
                            Some(&compiled.full_name()),
                        );
                    }
                    stack.push(Slot::Val(Value::str(v.to_string().trim().to_string())));
                }
                Opcode::Length => {
                    let v = stack.pop().expect("length: missing value").into_val();
                    let n = match v.as_list() {
                        Some(items) => items.len(),
                        None => match v.as_chars() {
                            Some(chars) => chars.len(),
                            None if v.is_null() => 0,
                            None => 1,
                        },
                    };
                    stack.push(Slot::Val(Value::Int(n as i64)));
                }
                Opcode::StrLen => {
                    let v = stack.pop().expect("strlen: missing value").into_val();
                    if !matches!(v, Value::Str(_)) {
                        group.report_runtime(
                            ErrorKind::ExpectingString { function: "strlen".into(), got: kind_name(&v).into() },
                            Some(&compiled.full_name()),
                        );
                    }
                    stack.push(Slot::Val(Value::Int(v.to_string().chars().count() as i64)));
                }
                Opcode::Reverse => {
                    let v = stack.pop().expect("reverse: missing value").into_val();
                    let result = match v.as_list() {
                        Some(items) => {
                            let mut r = items.to_vec();
                            r.reverse();
                            Value::list(r)
                        }
                        None => match v.as_chars() {
                            Some(mut chars) => {
                                chars.reverse();
                                Value::str(chars.into_iter().collect::<String>())
                            }
                            None => v,
                        },
                    };
                    stack.push(Slot::Val(result));
                }
                Opcode::Not => {
                    let v = stack.pop().expect("not: missing value").into_val();
                    stack.push(Slot::Val(Value::Bool(!v.is_truthy())));
                }
                Opcode::Or => {
                    let b = stack.pop().expect("or: missing rhs").into_val();
                    let a = stack.pop().expect("or: missing lhs").into_val();
                    stack.push(Slot::Val(Value::Bool(a.is_truthy() || b.is_truthy())));
                }
                Opcode::And => {
                    let b = stack.pop().expect("and: missing rhs").into_val();
                    let a = stack.pop().expect("and: missing lhs").into_val();
                    stack.push(Slot::Val(Value::Bool(a.is_truthy() && b.is_truthy())));
                }
                Opcode::Indent => {
                    let s = compiled.strings.resolve(StringSym::from_raw(instr.operands[0])).to_string();
                    writer.push_indent(s);
                    indent_mark = Some(writer.index());
                }
                Opcode::Dedent => {
                    writer.pop_indent();
                    if indent_mark == Some(writer.index()) {
                        suppress_newline = true;
                    }
                    indent_mark = None;
                }
                Opcode::Newline => {
                    if suppress_newline {
                        suppress_newline = false;
                    } else {
                        writer.write("\n")?;
                    }
                }
                Opcode::Noop => {}
                Opcode::Pop => {
                    stack.pop();
                }
                Opcode::Null => stack.push(Slot::Val(Value::Null)),
                Opcode::True => stack.push(Slot::Val(Value::Bool(true))),
                Opcode::False => stack.push(Slot::Val(Value::Bool(false))),
                Opcode::WriteStr => {
                    let s = compiled.strings.resolve(StringSym::from_raw(instr.operands[0]));
                    writer.write(s)?;
                }
                Opcode::WriteLocal => {
                    let idx = instr.operands[0] as usize;
                    let v = st.slot(idx);
                    writer.write(&v.to_string())?;
                }
            }
            ip = next_ip;
        }
        Ok(())
    }

    /// Resolves and binds each unset formal argument with a declared
    /// default, lazily. Runs at most once per instance; an `AnonymousTemplate` default is
    /// itself rendered as a nested `<arg>_default_value` template.
    fn apply_defaults(&self, st: &ST, steps: &mut u64) {
        if st.mark_defaults_applied() {
            return;
        }
        let compiled = st.compiled();
        let group = st.creation_group();
        let entries: Vec<_> = compiled.formal_arguments.iter().map(|(n, a)| (n.clone(), a.index, a.default.clone())).collect();
        for (name, index, default) in entries {
            if !st.slot_is_empty(index) {
                continue;
            }
            let value = match default {
                DefaultValue::None => continue,
                DefaultValue::Str(s) => Value::str(s),
                DefaultValue::EmptyList => Value::list(Vec::new()),
                DefaultValue::Bool(b) => Value::Bool(b),
                DefaultValue::AnonymousTemplate => {
                    let default_name = format!("{name}_default_value");
                    match resolve_in(&group, &compiled.prefix, &default_name) {
                        Some((default_compiled, native)) => {
                            let default_st = ST::new(default_compiled, group.clone(), native);
                            let mut nested = Writer::no_indent(String::new());
                            let root = InstanceScope::root(&default_st);
                            let _ = self.exec(&default_st, &root, &mut nested, steps);
                            Value::str(nested.into_inner())
                        }
                        None => Value::Null,
                    }
                }
            };
            st.set_slot(index, value);
        }
    }

    fn load_attr(&self, st: &ST, group: &Group, scope: &InstanceScope, name: &str) -> Value {
        if let Some(v) = scope.lookup(name) {
            return v;
        }
        if let Some(dict) = st.native_group().dictionary(name) {
            return Value::Dictionary(Rc::new(dict));
        }
        group.report_runtime(ErrorKind::NoSuchAttribute { name: name.to_string() }, Some(&st.compiled().full_name()));
        Value::Null
    }

    fn load_prop(&self, group: &Group, st: &ST, base: &Value, name: &str) -> Value {
        let result = match base {
            Value::Dictionary(d) => d.get(name),
            Value::Aggregate(a) => a.get(name).cloned(),
            Value::Template(inner) => inner.get_attribute(name),
            Value::Host(h) => match group.with_adaptor(h.as_any().type_id(), |a| a.get_property(st, h.as_any(), name)) {
                Ok(v) => v,
                Err(e) => {
                    group.report_internal(e);
                    None
                }
            },
            _ => None,
        };
        match result {
            Some(v) => v,
            None => {
                group.report_runtime(ErrorKind::NoSuchProperty { expr: name.to_string() }, Some(&st.compiled().full_name()));
                Value::Null
            }
        }
    }

    fn do_write<W: fmt::Write>(
        &self,
        value: &Value,
        opts: Option<&OptionsRecord>,
        group: &Group,
        scope: &InstanceScope,
        writer: &mut Writer<W>,
        steps: &mut u64,
    ) -> fmt::Result {
        let anchored = opts.and_then(|o| o.anchor.as_ref()).map(|v| v.is_truthy()).unwrap_or(false);
        if anchored {
            writer.push_anchor();
        }
        let result = self.write_value(value, opts, group, scope, writer, steps);
        if anchored {
            writer.pop_anchor();
        }
        result
    }

    /// Writes a `WRITE`/`WRITE_OPT` operand. A list honors the
    /// `separator=` option between elements and, per the Separator/Null
    /// law, a null element contributes neither text nor a separator
    /// unless a `null=` substitute is configured — once one is, the
    /// substituted text participates in separator placement like any
    /// other element.
    fn write_value<W: fmt::Write>(
        &self,
        value: &Value,
        opts: Option<&OptionsRecord>,
        group: &Group,
        scope: &InstanceScope,
        writer: &mut Writer<W>,
        steps: &mut u64,
    ) -> fmt::Result {
        match value {
            Value::List(items) => {
                let sep = opts.and_then(|o| o.separator.as_ref()).map(|v| v.to_string());
                let has_null_sub = opts.and_then(|o| o.null.as_ref()).is_some();
                let mut first = true;
                for item in items.iter() {
                    if item.is_null() && !has_null_sub {
                        continue;
                    }
                    if !first {
                        if let Some(s) = &sep {
                            writer.write_separator(s)?;
                        }
                    }
                    first = false;
                    self.write_one(item, opts, group, scope, writer, steps)?;
                }
                Ok(())
            }
            other => self.write_one(other, opts, group, scope, writer, steps),
        }
    }

    fn write_one<W: fmt::Write>(
        &self,
        value: &Value,
        opts: Option<&OptionsRecord>,
        group: &Group,
        scope: &InstanceScope,
        writer: &mut Writer<W>,
        steps: &mut u64,
    ) -> fmt::Result {
        match value {
            Value::Null => match opts.and_then(|o| o.null.as_ref()) {
                Some(sub) => self.write_scalar(sub, opts, group, writer),
                None => Ok(()),
            },
            Value::Template(inner) => {
                let child = scope.child(inner);
                self.exec(inner, &child, writer, steps)
            }
            _ => self.write_scalar(value, opts, group, writer),
        }
    }

    fn write_scalar<W: fmt::Write>(&self, value: &Value, opts: Option<&OptionsRecord>, group: &Group, writer: &mut Writer<W>) -> fmt::Result {
        let format = opts.and_then(|o| o.format.as_ref()).map(|v| v.to_string());
        let text = match RenderKind::of(value) {
            Some(kind) => group.with_renderer(kind, |r| r.to_string(value, format.as_deref(), None)).unwrap_or_else(|| value.to_string()),
            None => value.to_string(),
        };
        match opts.and_then(|o| o.wrap.as_ref()) {
            Some(w) => writer.write_wrap(&text, &w.to_string()),
            None => writer.write(&text),
        }
    }

    /// Resolves `name` and builds a fresh instance. Positional arguments
    /// bind by declared index; an args record's named entries bind by
    /// name, with `"$i"` synthetic keys (from a mixed positional/named
    /// map-target arg list) binding by the
    /// declared argument at list index `i`. A template with no declared
    /// argument list dynamically extends itself for each named entry,
    /// the same copy-on-write path `ST::add` uses.
    fn new_instance(
        &self,
        search_group: &Group,
        prefix: &str,
        creation_group: &Group,
        scope: &InstanceScope,
        name: &str,
        positional: Vec<Value>,
        args: Option<&ArgsRecord>,
        caller: &str,
    ) -> Value {
        let Some((compiled, native)) = resolve_in(search_group, prefix, name) else {
            search_group.report_runtime(ErrorKind::NoSuchTemplate { name: name.to_string() }, Some(caller));
            return Value::Null;
        };
        if args.is_none() && compiled.has_formal_args && positional.len() != compiled.formal_arguments.len() {
            search_group.report_runtime(
                ErrorKind::ArgumentCountMismatch {
                    passed: positional.len(),
                    template: compiled.full_name(),
                    declared: compiled.formal_arguments.len(),
                },
                Some(caller),
            );
        }
        let inst = ST::new(compiled.clone(), creation_group.clone(), native);
        if compiled.has_formal_args {
            bind_formal_args(&inst, &compiled, positional, args, scope, search_group, caller);
        } else if let Some(args) = args {
            for (k, v) in &args.named {
                inst.add(k, v.clone());
            }
        } else if !positional.is_empty() {
            search_group.report_runtime(ErrorKind::MissingFormalArguments, Some(caller));
        }
        Value::Template(inst)
    }

    fn super_new(
        &self,
        st: &ST,
        creation_group: &Group,
        scope: &InstanceScope,
        name: &str,
        positional: Vec<Value>,
        args: Option<&ArgsRecord>,
        caller: &str,
    ) -> Value {
        match st.native_group().super_group() {
            Some(super_group) => self.new_instance(&super_group, "/", creation_group, scope, name, positional, args, caller),
            None => {
                creation_group.report_runtime(ErrorKind::NoImportedTemplate { name: name.to_string() }, Some(caller));
                Value::Null
            }
        }
    }

    /// Builds the list of mapped `Value::Template` instances for
    /// `MAP`/`ROT_MAP`: `targets[i % targets.len()]` instantiates the
    /// template for element `i`, rotating through the target list. A
    /// null source yields `Value::Null` outright (mapping over nothing
    /// produces nothing); a null element inside a list source yields a
    /// `Value::Null` placeholder so the Separator/Null law at write time
    /// still applies per element.
    fn run_map(&self, group: &Group, prefix: &str, scope: &InstanceScope, targets: &[MapTarget], source: &Value) -> Value {
        if source.is_null() {
            return Value::Null;
        }
        let elements: Vec<Value> = match source.as_list() {
            Some(items) => items.to_vec(),
            None => vec![source.clone()],
        };
        let n = targets.len();
        let mut results = Vec::with_capacity(elements.len());
        for (i, elem) in elements.iter().enumerate() {
            if elem.is_null() {
                results.push(Value::Null);
                continue;
            }
            let target = &targets[i % n];
            results.push(self.build_mapped_instance(group, prefix, scope, target, elem, i));
        }
        Value::list(results)
    }

    fn build_mapped_instance(&self, group: &Group, prefix: &str, scope: &InstanceScope, target: &MapTarget, elem: &Value, index: usize) -> Value {
        let Some((compiled, native)) = resolve_in(group, prefix, &target.name) else {
            group.report_runtime(ErrorKind::NoSuchTemplate { name: target.name.clone() }, None);
            return Value::Null;
        };
        let inst = ST::new(compiled.clone(), group.clone(), native);
        inst.bind_implicit("it", elem.clone());
        inst.bind_implicit("i0", Value::Int(index as i64));
        inst.bind_implicit("i", Value::Int(index as i64 + 1));
        if let Some((first_name, first_arg)) = first_non_implicit_arg(&compiled) {
            let _ = first_name;
            inst.set_slot(first_arg.index, elem.clone());
        }
        apply_args_record(&inst, &compiled, target.args.as_ref(), scope);
        Value::Template(inst)
    }

    /// `ZIP_MAP`: the `i`-th instance binds column `c`'s element `i` to
    /// the `c`-th non-implicit formal argument, for every source column
    /// in parallel; `it` binds to the first source's element. A column
    /// length mismatch is reported (reusing `MapArgumentCountMismatch`,
    /// the same variant the compiler raises for a static arity
    /// mismatch) and truncates to the shortest column.
    fn run_zip_map(&self, group: &Group, prefix: &str, scope: &InstanceScope, target: &MapTarget, sources: &[Value]) -> Value {
        let lists: Vec<Vec<Value>> = sources
            .iter()
            .map(|s| match s.as_list() {
                Some(items) => items.to_vec(),
                None if s.is_null() => Vec::new(),
                None => vec![s.clone()],
            })
            .collect();
        let min_len = lists.iter().map(|l| l.len()).min().unwrap_or(0);
        let max_len = lists.iter().map(|l| l.len()).max().unwrap_or(0);
        if min_len != max_len {
            group.report_runtime(ErrorKind::MapArgumentCountMismatch { values: max_len, declared: min_len }, None);
        }
        let Some((compiled, native)) = resolve_in(group, prefix, &target.name) else {
            group.report_runtime(ErrorKind::NoSuchTemplate { name: target.name.clone() }, None);
            return Value::Null;
        };
        let formal_names: Vec<String> = compiled.formal_arguments.keys().filter(|n| !is_implicit_name(n)).cloned().collect();
        let mut results = Vec::with_capacity(min_len);
        for i in 0..min_len {
            let inst = ST::new(compiled.clone(), group.clone(), native.clone());
            for (col, fname) in formal_names.iter().enumerate() {
                if let (Some(column), Some(arg)) = (lists.get(col), compiled.formal_arguments.get(fname)) {
                    inst.set_slot(arg.index, column[i].clone());
                }
            }
            inst.bind_implicit("it", lists.first().and_then(|l| l.get(i)).cloned().unwrap_or(Value::Null));
            inst.bind_implicit("i0", Value::Int(i as i64));
            inst.bind_implicit("i", Value::Int(i as i64 + 1));
            apply_args_record(&inst, &compiled, target.args.as_ref(), scope);
            results.push(Value::Template(inst));
        }
        Value::list(results)
    }
}

fn is_implicit_name(name: &str) -> bool {
    matches!(name, "it" | "i" | "i0")
}

fn first_non_implicit_arg(compiled: &CompiledST) -> Option<(&str, &st_bytecode::FormalArgument)> {
    compiled.formal_arguments.iter().find(|(n, _)| !is_implicit_name(n)).map(|(n, a)| (n.as_str(), a))
}

fn apply_args_record(inst: &ST, compiled: &CompiledST, args: Option<&ArgsRecord>, scope: &InstanceScope) {
    let Some(args) = args else { return };
    for (k, v) in &args.named {
        if let Some(arg) = compiled.formal_arguments.get(k) {
            inst.set_slot(arg.index, v.clone());
        }
    }
    if args.passthrough {
        for (name, arg) in compiled.formal_arguments.iter() {
            if inst.slot_is_empty(arg.index) {
                if let Some(v) = scope.lookup(name) {
                    inst.set_slot(arg.index, v);
                }
            }
        }
    }
}

/// Binds positional and named arguments onto a freshly constructed
/// instance whose template declares a formal-argument list. Positional
/// arguments bind by list index; named entries bind by declared name,
/// with a synthetic `"$i"` key (from a mixed positional/named map-target
/// arg list) binding by declared index `i`. A named entry that matches
/// neither a declared formal argument nor a `$i` index is reported as an
/// argument-count mismatch rather than silently dropped.
fn bind_formal_args(
    inst: &ST,
    compiled: &CompiledST,
    positional: Vec<Value>,
    args: Option<&ArgsRecord>,
    scope: &InstanceScope,
    group: &Group,
    caller: &str,
) {
    for (i, v) in positional.into_iter().enumerate() {
        if let Some((_, arg)) = compiled.formal_arguments.get_index(i) {
            inst.set_slot(arg.index, v);
        }
    }
    let Some(args) = args else { return };
    for (k, v) in &args.named {
        if let Some(arg) = compiled.formal_arguments.get(k) {
            inst.set_slot(arg.index, v.clone());
        } else if let Some(idx) = k.strip_prefix('$').and_then(|rest| rest.parse::<usize>().ok()) {
            if let Some((_, arg)) = compiled.formal_arguments.get_index(idx) {
                inst.set_slot(arg.index, v.clone());
            } else {
                group.report_runtime(
                    ErrorKind::ArgumentCountMismatch { passed: args.named.len(), template: compiled.full_name(), declared: compiled.formal_arguments.len() },
                    Some(caller),
                );
            }
        } else {
            group.report_runtime(
                ErrorKind::ArgumentCountMismatch { passed: args.named.len(), template: compiled.full_name(), declared: compiled.formal_arguments.len() },
                Some(caller),
            );
        }
    }
    if args.passthrough {
        for (name, arg) in compiled.formal_arguments.iter() {
            if inst.slot_is_empty(arg.index) {
                if let Some(v) = scope.lookup(name) {
                    inst.set_slot(arg.index, v);
                }
            }
        }
    }
}

fn pop_n_values(stack: &mut Vec<Slot>, n: usize) -> Vec<Value> {
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        values.push(stack.pop().expect("missing positional value").into_val());
    }
    values.reverse();
    values
}

fn pop_args_record(stack: &mut Vec<Slot>, who: &str) -> ArgsRecord {
    match stack.pop() {
        Some(Slot::Args(a)) => a,
        _ => panic!("{who}: top of stack is not an args record"),
    }
}

fn pop_map_target(stack: &mut Vec<Slot>) -> MapTarget {
    let args_slot = stack.pop().expect("map target: missing args/null marker");
    let args = match args_slot {
        Slot::Val(Value::Null) => None,
        Slot::Args(a) => Some(a),
        _ => panic!("map target: unexpected args slot shape"),
    };
    let name = match stack.pop().expect("map target: missing name").into_val() {
        Value::Str(s) => s.to_string(),
        other => other.to_string(),
    };
    MapTarget { name, args }
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Int(_) => "int",
        Value::Float(_) => "float",
        Value::Str(_) => "string",
        Value::List(_) => "list",
        Value::Dictionary(_) => "dictionary",
        Value::Aggregate(_) => "aggregate",
        Value::Template(_) => "template",
        Value::Host(_) => "host object",
    }
}

/// Joins a call-site name against the enclosing template's own prefix,
/// since `parse_template_ref` leaves a bare (no leading `/`) name as-is
/// and `Group::resolve` only ever looks up fully `/`-joined keys. A
/// leading `/` in the call-site name always means "from this group's
/// root" and is used unchanged.
fn full_path(prefix: &str, name: &str) -> String {
    if name.starts_with('/') {
        return name.to_string();
    }
    if prefix.is_empty() || prefix == "/" {
        format!("/{name}")
    } else {
        format!("{}/{name}", prefix.trim_end_matches('/'))
    }
}

/// Resolves `name` against `group`, joining it onto `prefix` first; a
/// bare name that misses there falls back to a root-level lookup, since
/// a template compiled under a nested directory prefix may still call a
/// sibling defined at the group's own root.
fn resolve_in(group: &Group, prefix: &str, name: &str) -> Option<(Rc<CompiledST>, Group)> {
    let joined = full_path(prefix, name);
    if let Some(hit) = group.resolve(&joined) {
        return Some(hit);
    }
    if !name.starts_with('/') && joined != format!("/{name}") {
        return group.resolve(&format!("/{name}"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Group;

    fn render(src: &str) -> String {
        let group = Group::from_string(src).unwrap();
        let st = group.get_instance_of("/t").unwrap();
        st.render()
    }

    #[test]
    fn simple_interpolation() {
        assert_eq!(render(r#"t(name) ::= "hello <name>!""#), "hello !");
    }

    #[test]
    fn attribute_substitution_with_a_bound_value() {
        let group = Group::from_string(r#"t(name) ::= "hello <name>!""#).unwrap();
        let st = group.get_instance_of("/t").unwrap();
        st.add("name", "Ada");
        assert_eq!(st.render(), "hello Ada!");
    }

    #[test]
    fn separator_joins_list_elements() {
        let group = Group::from_string(r#"t(names) ::= "<names; separator=\", \">""#).unwrap();
        let st = group.get_instance_of("/t").unwrap();
        st.add("names", "a");
        st.add("names", "b");
        st.add("names", "c");
        assert_eq!(st.render(), "a, b, c");
    }

    #[test]
    fn null_elements_are_skipped_without_a_null_option() {
        let group = Group::from_string(r#"t(xs) ::= "<xs; separator=\",\">""#).unwrap();
        let st = group.get_instance_of("/t").unwrap();
        st.add("xs", "a");
        st.add_value("xs", Value::Null);
        st.add("xs", "b");
        assert_eq!(st.render(), "a,b");
    }

    #[test]
    fn map_with_anonymous_subtemplate() {
        let group = Group::from_string(r#"t(xs) ::= "<xs:{x|[<x>]}>""#).unwrap();
        let st = group.get_instance_of("/t").unwrap();
        st.add("xs", "a");
        st.add("xs", "b");
        assert_eq!(st.render(), "[a][b]");
    }

    #[test]
    fn if_else_picks_the_matching_branch() {
        let group = Group::from_string(r#"t(cond) ::= "<if(cond)>yes<else>no<endif>""#).unwrap();
        let st = group.get_instance_of("/t").unwrap();
        st.add("cond", false);
        assert_eq!(st.render(), "no");
    }

    #[test]
    fn zip_map_pairs_up_two_lists() {
        let group = Group::from_string(r#"t(names, ages) ::= "<names, ages:{n, a|<n>=<a>}; separator=\",\">""#).unwrap();
        let st = group.get_instance_of("/t").unwrap();
        st.add("names", "Ada");
        st.add("names", "Linus");
        st.add("ages", Value::Int(36));
        st.add("ages", Value::Int(53));
        assert_eq!(st.render(), "Ada=36,Linus=53");
    }

    #[test]
    fn nested_template_call_indents_with_its_enclosing_line() {
        let group = Group::from_string(
            r#"
            outer(x) ::= "  <inner(x)>"
            inner(x) ::= "a<\n>b"
            "#,
        )
        .unwrap();
        let st = group.get_instance_of("/outer").unwrap();
        st.add("x", "v");
        assert_eq!(st.render(), "  a\n  b");
    }
}
