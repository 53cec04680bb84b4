//! Walks a `Vec<Chunk>` and emits bytecode.
//!
//! A map target (the right-hand side of a `:`) is compiled to a `(name,
//! args)` pair pushed onto the stack rather than to an eager `NEW` — `MAP`/
//! `ROT_MAP`/`ZIP_MAP` construct one `ST` per iterated element themselves
//! (binding `it`/`i`/`i0`), so the target side only needs to tell them which
//! template to instantiate and which, if any, fixed arguments to merge in.
//! A standalone call expression (`<f(x)>` used as a value) is the only
//! place `NEW`/`NEW_BOX_ARGS`/`SUPER_NEW`/`SUPER_NEW_BOX_ARGS` appear,
//! since there it really does construct exactly one `ST` immediately.
//!
//! Option storage uses five fixed slot indices (`OPT_ANCHOR` etc., defined
//! below) rather than the five named option fields `compiled_st.py` and
//! `bytecode.py` keep as individual array slots under the hood — same
//! shape, numbering is just local to this workspace.

use std::collections::HashSet;

use st_bytecode::{Assembler, CompiledST, DefaultValue, FormalArgument, Opcode, RegionDefType};
use st_core::{ErrorKind, Span, StringTable};

use crate::ast::{Arg, BuiltinFunc, Chunk, Expr, ExprStmt, IfStmt, Options, SubTemplate, TemplateRef};

pub const OPT_ANCHOR: u16 = 0;
pub const OPT_FORMAT: u16 = 1;
pub const OPT_NULL: u16 = 2;
pub const OPT_SEPARATOR: u16 = 3;
pub const OPT_WRAP: u16 = 4;

/// How a formal argument's default was written in `name(arg=default)`
/// syntax, before compilation. Produced by the group-file parser.
#[derive(Clone, Debug, PartialEq)]
pub enum DefaultValueSpec {
    None,
    Str(String),
    EmptyList,
    Bool(bool),
    AnonymousTemplate(SubTemplate),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormalArgSpec {
    pub name: String,
    pub default: DefaultValueSpec,
}

impl FormalArgSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self { name: name.into(), default: DefaultValueSpec::None }
    }
}

pub struct CompileUnit {
    pub main: CompiledST,
    /// Anonymous sub-templates and default-value templates discovered
    /// while compiling `main`, named `_sub<N>`/`<arg>_default_value`. The
    /// caller installs these into the owning group's template map.
    pub nested: Vec<CompiledST>,
}

pub fn compile_template(
    name: &str,
    prefix: &str,
    template_text: &str,
    formal_args: &[FormalArgSpec],
    has_formal_args: bool,
    delim_start: char,
    delim_stop: char,
) -> (CompileUnit, Vec<ErrorKind>) {
    let (chunks, mut errors) = crate::parser::parse_template_body(template_text, delim_start, delim_stop);
    let mut next_sub_id = 0usize;
    let mut ctx = CodegenCtx {
        name: name.to_string(),
        prefix: prefix.to_string(),
        template_text: template_text.to_string(),
        delim_start,
        delim_stop,
        formal_args,
        asm: Assembler::new(),
        strings: StringTable::new(),
        implicitly_defined: Vec::new(),
        nested: Vec::new(),
        source_map: Vec::new(),
        next_sub_id: &mut next_sub_id,
        errors: Vec::new(),
        declared_regions: HashSet::new(),
    };
    ctx.compile_chunk_list(&chunks);
    let (compiled, mut nested, mut ctx_errors) = ctx.finish(has_formal_args, false, Span::new(0, template_text.len() as u32));
    errors.append(&mut ctx_errors);
    let mut all_nested = Vec::new();
    all_nested.append(&mut nested);
    (CompileUnit { main: compiled, nested: all_nested }, errors)
}

struct CodegenCtx<'a> {
    name: String,
    prefix: String,
    template_text: String,
    delim_start: char,
    delim_stop: char,
    formal_args: &'a [FormalArgSpec],
    asm: Assembler,
    strings: StringTable,
    implicitly_defined: Vec<String>,
    nested: Vec<CompiledST>,
    source_map: Vec<(u16, Span)>,
    next_sub_id: &'a mut usize,
    errors: Vec<ErrorKind>,
    /// Bare region names (`r` in `<@r()>`) already given a blank
    /// placeholder during this template's own compilation, so two
    /// references to the same region don't register it twice.
    declared_regions: HashSet<String>,
}

enum ArgMode {
    Positional(usize),
    Map,
}

impl<'a> CodegenCtx<'a> {
    fn error(&mut self, kind: ErrorKind) {
        self.errors.push(kind);
    }

    fn mark(&mut self, span: Span) {
        self.source_map.push((self.asm.here(), span));
    }

    fn finish(mut self, has_formal_args: bool, is_anon_subtemplate: bool, span: Span) -> (CompiledST, Vec<CompiledST>, Vec<ErrorKind>) {
        let mut compiled = CompiledST::new(self.name.clone(), self.prefix.clone(), self.template_text.clone());
        compiled.code = self.asm.into_bytes();
        compiled.strings = self.strings;
        compiled.has_formal_args = has_formal_args;
        compiled.is_anon_subtemplate = is_anon_subtemplate;
        compiled.implicitly_defined_templates = self.implicitly_defined;
        compiled.source_map = self.source_map;
        compiled.span = span;

        for spec in self.formal_args {
            let mut arg = FormalArgument::new(spec.name.clone(), 0, Span::default());
            arg.default = match &spec.default {
                DefaultValueSpec::None => DefaultValue::None,
                DefaultValueSpec::Str(s) => DefaultValue::Str(s.clone()),
                DefaultValueSpec::EmptyList => DefaultValue::EmptyList,
                DefaultValueSpec::Bool(b) => DefaultValue::Bool(*b),
                DefaultValueSpec::AnonymousTemplate(sub) => {
                    let default_name = format!("{}_default_value", spec.name);
                    let nested_specs: Vec<FormalArgSpec> = sub.params.iter().map(FormalArgSpec::required).collect();
                    let (unit, mut nested_errors) = compile_template(
                        &default_name,
                        &self.prefix,
                        sub.span.slice(&self.template_text),
                        &nested_specs,
                        true,
                        self.delim_start,
                        self.delim_stop,
                    );
                    self.errors.append(&mut nested_errors);
                    self.nested.push(unit.main);
                    self.nested.extend(unit.nested);
                    DefaultValue::AnonymousTemplate
                }
            };
            compiled.add_arg(arg);
        }
        (compiled, self.nested, self.errors)
    }

    fn compile_chunk_list(&mut self, chunks: &[Chunk]) {
        let mut i = 0;
        while i < chunks.len() {
            match &chunks[i] {
                Chunk::Text(s) => {
                    self.emit_write_str(s);
                    i += 1;
                }
                Chunk::Newline => {
                    self.asm.emit0(Opcode::Newline);
                    i += 1;
                }
                Chunk::Comment => {
                    i += 1;
                }
                Chunk::If(stmt) => {
                    self.compile_if(stmt);
                    i += 1;
                }
                Chunk::Indent(ws) => {
                    let promote = matches!(chunks.get(i + 1), Some(Chunk::Expr(_)))
                        && matches!(chunks.get(i + 2), None | Some(Chunk::Newline));
                    if promote {
                        let sym = self.strings.intern(ws);
                        self.asm.emit1(Opcode::Indent, sym.as_u16());
                        if let Some(Chunk::Expr(e)) = chunks.get(i + 1) {
                            self.compile_expr_stmt(e);
                        }
                        self.asm.emit0(Opcode::Dedent);
                        i += 2;
                    } else {
                        self.emit_write_str(ws);
                        i += 1;
                    }
                }
                Chunk::Expr(e) => {
                    self.compile_expr_stmt(e);
                    i += 1;
                }
            }
        }
    }

    fn emit_write_str(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        let sym = self.strings.intern(s);
        self.asm.emit1(Opcode::WriteStr, sym.as_u16());
    }

    fn compile_if(&mut self, stmt: &IfStmt) {
        let mut end_jumps = Vec::new();
        for (cond, body) in &stmt.branches {
            self.compile_expr_value(cond);
            let brf_addr = self.asm.emit1(Opcode::Brf, 0);
            self.compile_chunk_list(body);
            let br_addr = self.asm.emit1(Opcode::Br, 0);
            end_jumps.push(br_addr);
            let next = self.asm.here();
            self.asm.patch_addr(brf_addr, next);
        }
        if let Some(body) = &stmt.else_branch {
            self.compile_chunk_list(body);
        }
        let end = self.asm.here();
        for addr in end_jumps {
            self.asm.patch_addr(addr, end);
        }
    }

    fn compile_expr_stmt(&mut self, e: &ExprStmt) {
        self.mark(e.span);
        if e.targets.is_empty() {
            for src in &e.sources {
                self.compile_expr_value(src);
                self.emit_write(&e.options);
            }
            return;
        }
        for src in &e.sources {
            self.compile_expr_value(src);
        }
        for t in &e.targets {
            self.compile_map_target(t);
        }
        match (e.sources.len(), e.targets.len()) {
            (1, 1) => self.asm.emit0(Opcode::Map),
            (1, n) => {
                self.asm.emit1(Opcode::RotMap, n as u16);
            }
            (n, 1) if n > 1 => {
                self.asm.emit1(Opcode::ZipMap, n as u16);
            }
            (n, m) => {
                self.error(ErrorKind::MapArgumentCountMismatch { values: n, declared: m });
                self.asm.emit1(Opcode::ZipMap, n as u16);
            }
        }
        self.emit_write(&e.options);
    }

    fn emit_write(&mut self, options: &Options) {
        if options.is_empty() {
            self.asm.emit0(Opcode::Write);
            return;
        }
        self.asm.emit0(Opcode::Options);
        if let Some(e) = &options.separator {
            self.compile_expr_value(e);
            self.asm.emit1(Opcode::StoreOption, OPT_SEPARATOR);
        }
        if let Some(e) = &options.null {
            self.compile_expr_value(e);
            self.asm.emit1(Opcode::StoreOption, OPT_NULL);
        }
        if let Some(e) = &options.wrap {
            self.compile_expr_value(e);
            self.asm.emit1(Opcode::StoreOption, OPT_WRAP);
        }
        if options.anchor {
            self.asm.emit0(Opcode::True);
            self.asm.emit1(Opcode::StoreOption, OPT_ANCHOR);
        }
        if let Some(e) = &options.format {
            self.compile_expr_value(e);
            self.asm.emit1(Opcode::StoreOption, OPT_FORMAT);
        }
        self.asm.emit0(Opcode::WriteOpt);
    }

    fn compile_map_target(&mut self, t: &TemplateRef) {
        match t {
            TemplateRef::Anon(sub) => {
                let name = self.register_nested(sub);
                let sym = self.strings.intern(&name);
                self.asm.emit1(Opcode::LoadStr, sym.as_u16());
                self.asm.emit0(Opcode::Null);
            }
            TemplateRef::Named { path, args, .. } => {
                let sym = self.strings.intern(path);
                self.asm.emit1(Opcode::LoadStr, sym.as_u16());
                if args.is_empty() {
                    self.asm.emit0(Opcode::Null);
                } else {
                    self.compile_arg_map(args);
                }
            }
        }
    }

    fn compile_arg_map(&mut self, args: &[Arg]) {
        self.asm.emit0(Opcode::Args);
        for (i, a) in args.iter().enumerate() {
            match a {
                Arg::Positional(e) => {
                    self.compile_expr_value(e);
                    let key = self.strings.intern(&format!("${i}"));
                    self.asm.emit1(Opcode::StoreArg, key.as_u16());
                }
                Arg::Named(name, e) => {
                    self.compile_expr_value(e);
                    let key = self.strings.intern(name);
                    self.asm.emit1(Opcode::StoreArg, key.as_u16());
                }
                Arg::Ellipsis => {
                    let key = self.strings.intern("...");
                    self.asm.emit1(Opcode::Passthru, key.as_u16());
                }
            }
        }
    }

    fn compile_call(&mut self, path: &str, args: &[Arg], is_super: bool) {
        let mode = self.compile_call_args(args);
        let sym = self.strings.intern(path);
        match (mode, is_super) {
            (ArgMode::Positional(n), false) => {
                self.asm.emit2(Opcode::New, sym.as_u16(), n as u16);
            }
            (ArgMode::Positional(n), true) => {
                self.asm.emit2(Opcode::SuperNew, sym.as_u16(), n as u16);
            }
            (ArgMode::Map, false) => {
                self.asm.emit1(Opcode::NewBoxArgs, sym.as_u16());
            }
            (ArgMode::Map, true) => {
                self.asm.emit1(Opcode::SuperNewBoxArgs, sym.as_u16());
            }
        }
    }

    fn compile_call_args(&mut self, args: &[Arg]) -> ArgMode {
        if args.is_empty() {
            return ArgMode::Positional(0);
        }
        if args.iter().all(|a| matches!(a, Arg::Positional(_))) {
            for a in args {
                if let Arg::Positional(e) = a {
                    self.compile_expr_value(e);
                }
            }
            return ArgMode::Positional(args.len());
        }
        self.compile_arg_map(args);
        ArgMode::Map
    }

    fn region_path(&self, owner: Option<&str>, name: &str) -> String {
        let enclosing = owner.unwrap_or(&self.name);
        format!("/region__{enclosing}__{name}")
    }

    /// Registers a blank placeholder for this template's own region
    /// `name` the first time it is referenced, so `<@name()>` renders
    /// empty until an explicit `@owner.name() ::= "..."` overrides it.
    /// Installed into the owning group alongside the outer template's
    /// other nested templates (see `CodegenCtx::finish`'s caller).
    fn ensure_blank_region(&mut self, name: &str) {
        if !self.declared_regions.insert(name.to_string()) {
            return;
        }
        let mangled = format!("region__{}__{}", self.name, name);
        let mut blank = CompiledST::new(mangled, "/", String::new());
        blank.is_region = true;
        blank.region_def_type = Some(RegionDefType::Implicit);
        self.nested.push(blank);
    }

    fn register_nested(&mut self, sub: &SubTemplate) -> String {
        let id = *self.next_sub_id;
        *self.next_sub_id += 1;
        let sub_name = format!("_sub{id}");
        let formal_args: Vec<FormalArgSpec> = sub.params.iter().map(FormalArgSpec::required).collect();
        let source_text = if sub.span.is_empty() { "" } else { sub.span.slice(&self.template_text) };
        let mut nested_ctx = CodegenCtx {
            name: sub_name.clone(),
            prefix: self.prefix.clone(),
            template_text: source_text.to_string(),
            delim_start: self.delim_start,
            delim_stop: self.delim_stop,
            formal_args: &formal_args,
            asm: Assembler::new(),
            strings: StringTable::new(),
            implicitly_defined: Vec::new(),
            nested: Vec::new(),
            source_map: Vec::new(),
            next_sub_id: self.next_sub_id,
            errors: Vec::new(),
            declared_regions: HashSet::new(),
        };
        nested_ctx.compile_chunk_list(&sub.body);
        let (compiled, mut more_nested, mut nested_errors) = nested_ctx.finish(true, true, sub.span);
        self.errors.append(&mut nested_errors);
        self.nested.push(compiled);
        self.nested.append(&mut more_nested);
        self.implicitly_defined.push(sub_name.clone());
        if self.prefix.is_empty() || self.prefix == "/" {
            format!("/{sub_name}")
        } else {
            format!("{}/{sub_name}", self.prefix.trim_end_matches('/'))
        }
    }

    fn compile_expr_value(&mut self, e: &Expr) {
        match e {
            Expr::Str(s) => {
                let sym = self.strings.intern(s);
                self.asm.emit1(Opcode::LoadStr, sym.as_u16());
            }
            Expr::True => {
                self.asm.emit0(Opcode::True);
            }
            Expr::False => {
                self.asm.emit0(Opcode::False);
            }
            Expr::Attr(name) => {
                let sym = self.strings.intern(name);
                self.asm.emit1(Opcode::LoadAttr, sym.as_u16());
            }
            Expr::Prop { base, name } => {
                self.compile_expr_value(base);
                let sym = self.strings.intern(name);
                self.asm.emit1(Opcode::LoadProp, sym.as_u16());
            }
            Expr::PropInd { base, name } => {
                self.compile_expr_value(base);
                self.compile_expr_value(name);
                self.asm.emit0(Opcode::LoadPropInd);
            }
            Expr::Indirect(inner) => self.compile_expr_value(inner),
            Expr::Call { path, args, is_super } => self.compile_call(path, args, *is_super),
            Expr::IndirectCall { name, args } => {
                self.compile_expr_value(name);
                let mut n = 0u16;
                for a in args {
                    match a {
                        Arg::Positional(e) | Arg::Named(_, e) => {
                            self.compile_expr_value(e);
                            n += 1;
                        }
                        Arg::Ellipsis => {
                            self.error(ErrorKind::InternalError {
                                detail: "ellipsis arguments are not supported on an indirect template call".into(),
                            });
                        }
                    }
                }
                self.asm.emit1(Opcode::NewInd, n);
            }
            Expr::Func { func, arg } => {
                self.compile_expr_value(arg);
                self.asm.emit0(builtin_opcode(*func));
            }
            Expr::Not(inner) => {
                self.compile_expr_value(inner);
                self.asm.emit0(Opcode::Not);
            }
            Expr::And(l, r) => {
                self.compile_expr_value(l);
                self.compile_expr_value(r);
                self.asm.emit0(Opcode::And);
            }
            Expr::Or(l, r) => {
                self.compile_expr_value(l);
                self.compile_expr_value(r);
                self.asm.emit0(Opcode::Or);
            }
            Expr::SubTemplate(sub) => {
                let name = self.register_nested(sub);
                let sym = self.strings.intern(&name);
                self.asm.emit1(Opcode::LoadStr, sym.as_u16());
            }
            Expr::Region { owner, name } => {
                if owner.is_none() {
                    self.ensure_blank_region(name);
                }
                let path = self.region_path(owner.as_deref(), name);
                self.compile_call(&path, &[], false);
            }
        }
    }
}

fn builtin_opcode(func: BuiltinFunc) -> Opcode {
    match func {
        BuiltinFunc::First => Opcode::First,
        BuiltinFunc::Last => Opcode::Last,
        BuiltinFunc::Rest => Opcode::Rest,
        BuiltinFunc::Trunc => Opcode::Trunc,
        BuiltinFunc::Strip => Opcode::Strip,
        BuiltinFunc::Trim => Opcode::Trim,
        BuiltinFunc::Length => Opcode::Length,
        BuiltinFunc::StrLen => Opcode::StrLen,
        BuiltinFunc::Reverse => Opcode::Reverse,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_bytecode::disassemble;
    use st_core::Colors;

    fn compile(src: &str, args: &[&str]) -> CompileUnit {
        let specs: Vec<FormalArgSpec> = args.iter().map(|a| FormalArgSpec::required(*a)).collect();
        let (unit, errors) = compile_template("t", "/", src, &specs, !args.is_empty(), '<', '>');
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        unit
    }

    #[test]
    fn plain_text_compiles_to_a_single_write_str() {
        let unit = compile("hello", &[]);
        assert_eq!(unit.main.code.len(), 3);
        assert_eq!(unit.main.code[0], Opcode::WriteStr.as_u8());
    }

    #[test]
    fn interpolation_loads_and_writes_attribute() {
        let unit = compile("<name>", &["name"]);
        let dump = disassemble(&unit.main.code, &unit.main.strings, Colors::OFF);
        assert!(dump.contains("load_attr"));
        assert!(dump.contains("write"));
    }

    #[test]
    fn separator_option_emits_options_and_write_opt() {
        let unit = compile("<names; separator=\", \">", &["names"]);
        let dump = disassemble(&unit.main.code, &unit.main.strings, Colors::OFF);
        assert!(dump.contains("options"));
        assert!(dump.contains("store_option"));
        assert!(dump.contains("write_opt"));
    }

    #[test]
    fn map_with_anonymous_subtemplate_registers_a_nested_compiled_st() {
        let unit = compile("<names:{n|<n>!}>", &["names"]);
        assert_eq!(unit.nested.len(), 1);
        assert_eq!(unit.nested[0].name, "_sub0");
        assert_eq!(unit.main.implicitly_defined_templates, vec!["_sub0".to_string()]);
        let dump = disassemble(&unit.main.code, &unit.main.strings, Colors::OFF);
        assert!(dump.contains("map"));
    }

    #[test]
    fn if_else_emits_branch_and_forward_jump() {
        let unit = compile("<if(cond)>a<else>b<endif>", &["cond"]);
        let dump = disassemble(&unit.main.code, &unit.main.strings, Colors::OFF);
        assert!(dump.contains("brf"));
        assert!(dump.contains("br "));
    }

    #[test]
    fn named_argument_call_builds_an_arg_map() {
        let unit = compile("<greet(name=who)>", &["who"]);
        let dump = disassemble(&unit.main.code, &unit.main.strings, Colors::OFF);
        assert!(dump.contains("args"));
        assert!(dump.contains("store_arg"));
        assert!(dump.contains("new_box_args"));
    }

    #[test]
    fn zip_map_with_two_sources_uses_zip_map_opcode() {
        let unit = compile("<names, phones:{n, p | <n>}>", &["names", "phones"]);
        let dump = disassemble(&unit.main.code, &unit.main.strings, Colors::OFF);
        assert!(dump.contains("zip_map"));
    }

    #[test]
    fn promoted_indent_wraps_the_expression() {
        let unit = compile("  <x>\n", &["x"]);
        let dump = disassemble(&unit.main.code, &unit.main.strings, Colors::OFF);
        assert!(dump.contains("indent"));
        assert!(dump.contains("dedent"));
    }

    #[test]
    fn non_promoted_leading_whitespace_is_literal_text() {
        let unit = compile("  hello <x>", &["x"]);
        let dump = disassemble(&unit.main.code, &unit.main.strings, Colors::OFF);
        assert!(!dump.contains("indent"));
    }
}
