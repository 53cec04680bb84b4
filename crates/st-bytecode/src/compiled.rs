//! `CompiledST`: the artifact the compiler produces and the interpreter
//! executes — bytecode, the string pool it indexes into, and the formal
//! argument list new `ST` instances are stamped out from.

use indexmap::IndexMap;
use st_core::{Span, StringTable};

use crate::formal_argument::FormalArgument;

/// How a region template came to exist, mirroring the reference engine's
/// `RegionType`. `Implicit` is the blank placeholder auto-registered the
/// first time an enclosing template references `<@name()>` with no
/// explicit definition yet in scope; it may be overridden by exactly one
/// `Explicit` (`@owner.name() ::= "..."`) or `Embedded` (`<@name>...<@end>`)
/// definition, after which a further redefinition is an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionDefType {
    Implicit,
    Embedded,
    Explicit,
}

/// A compiled template.
///
/// `formal_arguments` is the one field that needs copy-on-write semantics:
/// multiple `ST` instances are typically stamped out from the same
/// `CompiledST` (`Group::get_instance_of` hands out a fresh `ST` each call,
/// all sharing one `Rc<CompiledST>`), but a template defined with no
/// declared argument list may still receive attributes dynamically via
/// `ST::add`. The first such `add` on a shared, argument-less `CompiledST`
/// must clone it (see `clone_for_dynamic_args`) so that sibling instances
/// stamped from the same template are not mutated by each other's `add`
/// calls.
#[derive(Clone, Debug)]
pub struct CompiledST {
    pub name: String,
    /// Fully-qualified group path this template was defined under, e.g.
    /// `/a/b` for a template named `c` nested under group dir `a/b`.
    pub prefix: String,
    pub template_text: String,
    pub code: Vec<u8>,
    pub strings: StringTable,
    /// Declared in source order; `None` means "no formal arg list was
    /// written", which is what makes dynamic `add()` legal in the first
    /// place (see `has_formal_args`).
    pub formal_arguments: IndexMap<String, FormalArgument>,
    /// `false` for templates compiled without a declared `(args)` list,
    /// e.g. `t() ::= "<x>"` where `x` was never declared — such templates
    /// accept arbitrary attributes via `ST::add`, copying the `CompiledST`
    /// on first use so sibling instances are unaffected.
    pub has_formal_args: bool,
    /// Names of the `{...}` sub-templates embedded in this template's
    /// source; defined into the owning `Group` lazily on first reference.
    pub implicitly_defined_templates: Vec<String>,
    pub is_anon_subtemplate: bool,
    /// `true` for a region template (`/region__<owner>__<name>`), whether
    /// it was installed as an implicit blank, an embedded body, or an
    /// explicit `@owner.name() ::= "..."` definition; `region_def_type`
    /// distinguishes which.
    pub is_region: bool,
    pub region_def_type: Option<RegionDefType>,
    /// Per-instruction-address source span, used for error messages that
    /// need to point at a byte range in the template's source text.
    pub source_map: Vec<(u16, Span)>,
    pub span: Span,
}

impl CompiledST {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, template_text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            template_text: template_text.into(),
            code: Vec::new(),
            strings: StringTable::new(),
            formal_arguments: IndexMap::new(),
            has_formal_args: false,
            implicitly_defined_templates: Vec::new(),
            is_anon_subtemplate: false,
            is_region: false,
            region_def_type: None,
            source_map: Vec::new(),
            span: Span::default(),
        }
    }

    pub fn full_name(&self) -> String {
        if self.prefix.is_empty() || self.prefix == "/" {
            format!("/{}", self.name)
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), self.name)
        }
    }

    /// Declare a new formal argument, assigning it the next index.
    ///
    /// # Panics
    /// Panics on a duplicate name; the compiler must have already raised
    /// `ErrorKind::ParameterRedefinition` before calling this.
    pub fn add_arg(&mut self, mut arg: FormalArgument) {
        assert!(
            !self.formal_arguments.contains_key(&arg.name),
            "duplicate formal argument {}",
            arg.name
        );
        arg.index = self.formal_arguments.len();
        self.formal_arguments.insert(arg.name.clone(), arg);
    }

    /// The source span covering `[start, stop]` of this template's source
    /// map, used to report the text of an anonymous sub-template.
    pub fn template_range(&self) -> Span {
        self.source_map
            .iter()
            .fold(None, |acc: Option<Span>, (_, s)| {
                Some(match acc {
                    Some(a) => a.union(*s),
                    None => *s,
                })
            })
            .unwrap_or(self.span)
    }

    /// Clone this `CompiledST` for copy-on-write: called the first time an
    /// argument-less template instance receives an attribute via
    /// `ST::add`, so that other instances stamped from the same shared
    /// `CompiledST` keep their original (empty) formal argument list.
    pub fn clone_for_dynamic_args(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_core::Span;

    #[test]
    fn full_name_joins_prefix_and_name() {
        let c = CompiledST::new("greeting", "/a/b", "hi");
        assert_eq!(c.full_name(), "/a/b/greeting");
    }

    #[test]
    fn full_name_at_root_has_single_leading_slash() {
        let c = CompiledST::new("greeting", "/", "hi");
        assert_eq!(c.full_name(), "/greeting");
    }

    #[test]
    fn add_arg_assigns_sequential_indices() {
        let mut c = CompiledST::new("t", "/", "<a><b>");
        c.add_arg(FormalArgument::new("a", 0, Span::default()));
        c.add_arg(FormalArgument::new("b", 0, Span::default()));
        assert_eq!(c.formal_arguments["a"].index, 0);
        assert_eq!(c.formal_arguments["b"].index, 1);
    }

    #[test]
    #[should_panic(expected = "duplicate formal argument")]
    fn add_arg_rejects_duplicates() {
        let mut c = CompiledST::new("t", "/", "<a>");
        c.add_arg(FormalArgument::new("a", 0, Span::default()));
        c.add_arg(FormalArgument::new("a", 0, Span::default()));
    }

    #[test]
    fn clone_for_dynamic_args_is_independent() {
        let mut c = CompiledST::new("t", "/", "<a>");
        let mut clone = c.clone_for_dynamic_args();
        clone.add_arg(FormalArgument::new("a", 0, Span::default()));
        assert!(c.formal_arguments.is_empty());
        assert_eq!(clone.formal_arguments.len(), 1);
    }
}
