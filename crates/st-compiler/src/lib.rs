//! Template and group-file compilation.
//!
//! Two independent grammars live here, sharing nothing but [`st_core`]'s
//! error taxonomy and string/span types:
//!
//! - The template-body grammar (`lexer`, `ast`, `parser`, `codegen`):
//!   `<expr>`-style holes, conditionals, maps, and sub-templates, compiled
//!   straight to [`st_bytecode::CompiledST`].
//! - The group-file grammar (`group_lexer`, `group_ast`, `group_parser`):
//!   `name(args) ::= "..."` definitions, dictionaries, aliases, regions,
//!   imports, and a `delimiters` declaration. A group file's definitions
//!   still embed template bodies, so [`compile_template_def`] hands those
//!   bodies back to the template compiler.

pub mod ast;
pub mod codegen;
pub mod group_ast;
pub mod group_lexer;
pub mod group_parser;
pub mod lexer;
pub mod parser;

pub use ast::{Arg, BuiltinFunc, Chunk, Expr, ExprStmt, IfStmt, Options, SubTemplate, TemplateRef};
pub use codegen::{compile_template, CompileUnit, DefaultValueSpec, FormalArgSpec};
pub use group_ast::{DefaultSyntax, Def, DictKey, DictValue, DictionaryDef, FormalArgSyntax, GroupFile, TemplateDef};
pub use group_parser::parse_group_file;
pub use parser::{parse_subtemplate_literal, parse_template_body};

use st_core::ErrorKind;

/// Converts a group-file template definition's formal-argument syntax
/// (strings, not yet compiled) into the `FormalArgSpec`s
/// [`compile_template`] expects, compiling any `{args | body}` default
/// values along the way, then compiles the template body itself.
pub fn compile_template_def(def: &TemplateDef, prefix: &str, delim_start: char, delim_stop: char) -> (CompileUnit, Vec<ErrorKind>) {
    let mut errors = Vec::new();
    let mut specs = Vec::with_capacity(def.formal_args.len());
    for arg in &def.formal_args {
        let default = match &arg.default {
            None => DefaultValueSpec::None,
            Some(DefaultSyntax::Str(s)) => DefaultValueSpec::Str(s.clone()),
            Some(DefaultSyntax::EmptyList) => DefaultValueSpec::EmptyList,
            Some(DefaultSyntax::Bool(b)) => DefaultValueSpec::Bool(*b),
            Some(DefaultSyntax::AnonTemplate(text, _span)) => {
                let (sub, mut sub_errors) = parse_subtemplate_literal(text, delim_start, delim_stop);
                errors.append(&mut sub_errors);
                DefaultValueSpec::AnonymousTemplate(sub)
            }
        };
        specs.push(FormalArgSpec { name: arg.name.clone(), default });
    }
    let name = def.region_owner.as_ref().map(|owner| format!("region__{owner}__{}", def.name)).unwrap_or_else(|| def.name.clone());
    let (unit, mut compile_errors) = compile_template(&name, prefix, &def.body, &specs, def.has_formal_args, delim_start, delim_stop);
    errors.append(&mut compile_errors);
    (unit, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_a_template_def_parsed_from_group_source() {
        let (file, errors) = parse_group_file(r#"hi(name) ::= "hello <name>!""#);
        assert!(errors.is_empty());
        let def = match &file.defs[0] {
            Def::Template(t) => t,
            other => panic!("expected template def, got {other:?}"),
        };
        let (unit, errors) = compile_template_def(def, "/", '<', '>');
        assert!(errors.is_empty());
        assert_eq!(unit.main.name, "hi");
        assert_eq!(unit.main.formal_arguments.len(), 1);
    }

    #[test]
    fn compiles_a_default_value_anonymous_template() {
        let (file, errors) = parse_group_file(r#"wrap(x={[<x>]}) ::= "<x>""#);
        assert!(errors.is_empty());
        let def = match &file.defs[0] {
            Def::Template(t) => t,
            other => panic!("expected template def, got {other:?}"),
        };
        let (unit, errors) = compile_template_def(def, "/", '<', '>');
        assert!(errors.is_empty());
        assert_eq!(unit.nested.len(), 1);
        assert_eq!(unit.nested[0].name, "x_default_value");
    }

    #[test]
    fn region_definition_gets_mangled_name() {
        let (file, errors) = parse_group_file(r#"@t.header() ::= "top""#);
        assert!(errors.is_empty());
        let def = match &file.defs[0] {
            Def::Region(t) => t,
            other => panic!("expected region def, got {other:?}"),
        };
        let (unit, errors) = compile_template_def(def, "/", '<', '>');
        assert!(errors.is_empty());
        assert_eq!(unit.main.name, "region__t__header");
    }
}
