//! `Group`: a namespace of compiled templates and dictionaries, loaded
//! from one of four source shapes: a single group file, a directory of
//! `.st`/`.stg` files, a "raw" directory of bodies with no header syntax,
//! or an in-memory string.
//!
//! Loading is lazy: construction only touches the filesystem enough to
//! fail fast on an unreadable path; parsing and compilation happen on
//! first [`Group::resolve`].

use std::any::Any;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;
use st_bytecode::{CompiledST, RegionDefType};
use st_compiler::{compile_template_def, parse_group_file, Def, DictKey, DictValue, GroupFile, TemplateDef};
use st_core::{ErrorKind, ErrorManager, Listener, QuietListener};

use crate::adaptor::AdaptorRegistry;
use crate::dictionary::{DictEntry, Dictionary};
use crate::error::Error;
use crate::renderer::{AttributeRenderer, RendererRegistry};
use crate::template::ST;
use crate::value::Value;

enum GroupSource {
    File { path: PathBuf, text: String },
    Dir { root: PathBuf, raw: bool },
    Str { text: String },
}

enum TemplateEntry {
    Compiled(Rc<CompiledST>),
    NotFound,
}

struct GroupInner {
    source: GroupSource,
    delim_start: char,
    delim_stop: char,
    templates: IndexMap<String, TemplateEntry>,
    dictionaries: IndexMap<String, Dictionary>,
    imports: Vec<Group>,
    renderers: RendererRegistry,
    adaptors: AdaptorRegistry,
    loaded: bool,
    errors: ErrorManager<Box<dyn Listener>>,
}

/// A namespace of compiled templates, dictionaries, and the registries
/// (`ModelAdaptor`, `AttributeRenderer`) that govern how attribute values
/// render inside it. Cheap to clone: every clone is a pointer copy
/// sharing one `RefCell`-guarded namespace, so groups can be passed
/// around by reference.
#[derive(Clone)]
pub struct Group(Rc<RefCell<GroupInner>>);

impl Group {
    fn from_source(source: GroupSource) -> Self {
        Group(Rc::new(RefCell::new(GroupInner {
            source,
            delim_start: '<',
            delim_stop: '>',
            templates: IndexMap::new(),
            dictionaries: IndexMap::new(),
            imports: Vec::new(),
            renderers: RendererRegistry::with_defaults(),
            adaptors: AdaptorRegistry::new(),
            loaded: false,
            errors: ErrorManager::new(Box::new(QuietListener)),
        })))
    }

    /// Loads a single group file, `name.stg`-style. The file is read
    /// eagerly, so a missing or
    /// unreadable path fails here rather than on first render; parsing
    /// that content into templates is still deferred.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Group, Error> {
        let path = path.as_ref().to_path_buf();
        let text = std::fs::read_to_string(&path).map_err(|source| Error::Io { path: path.clone(), source })?;
        Ok(Self::from_source(GroupSource::File { path, text }))
    }

    /// Loads a directory group: one `.st` file per template, named by its
    /// path relative to `root`, plus any `.stg` files at any depth
    /// defining templates/dictionaries the ordinary way. A `.st` file's
    /// first line may declare a formal-argument list in parentheses; if
    /// it doesn't, the whole file is the template body with no declared
    /// arguments.
    pub fn from_dir(root: impl AsRef<Path>) -> Result<Group, Error> {
        Self::from_dir_impl(root, false)
    }

    /// Like [`Group::from_dir`], but `.st` files are never scanned for a
    /// formal-argument header line: the entire file content is always the
    /// template body.
    pub fn from_raw_dir(root: impl AsRef<Path>) -> Result<Group, Error> {
        Self::from_dir_impl(root, true)
    }

    fn from_dir_impl(root: impl AsRef<Path>, raw: bool) -> Result<Group, Error> {
        let root = root.as_ref().to_path_buf();
        let meta = std::fs::metadata(&root).map_err(|source| Error::Io { path: root.clone(), source })?;
        if !meta.is_dir() {
            return Err(Error::Io {
                path: root.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            });
        }
        Ok(Self::from_source(GroupSource::Dir { root, raw }))
    }

    /// Loads a group from an in-memory group-file source string, useful
    /// for tests and for templates assembled at runtime.
    pub fn from_string(src: impl Into<String>) -> Result<Group, Error> {
        Ok(Self::from_source(GroupSource::Str { text: src.into() }))
    }

    pub fn delimiters(&self) -> (char, char) {
        let inner = self.0.borrow();
        (inner.delim_start, inner.delim_stop)
    }

    /// Adds `other` as an import, searched after this group's own
    /// templates miss.
    pub fn import(&self, other: Group) {
        self.0.borrow_mut().imports.push(other);
    }

    /// Registers a renderer for `kind`, recursing into every import so
    /// the renderer reaches every group reachable through it.
    pub fn register_renderer(&self, kind: crate::renderer::RenderKind, renderer: impl AttributeRenderer + Clone + 'static) {
        let imports = {
            let mut inner = self.0.borrow_mut();
            inner.renderers.register(kind, renderer.clone());
            inner.imports.clone()
        };
        for import in imports {
            import.register_renderer(kind, renderer.clone());
        }
    }

    /// Registers a model adaptor for `T`, recursing into every import.
    pub fn register_model_adaptor<T: Any>(&self, adaptor: impl crate::adaptor::ModelAdaptor + Clone) {
        let imports = {
            let mut inner = self.0.borrow_mut();
            inner.adaptors.register::<T>(adaptor.clone());
            inner.imports.clone()
        };
        for import in imports {
            import.register_model_adaptor::<T>(adaptor.clone());
        }
    }

    pub(crate) fn with_renderer<R>(&self, kind: crate::renderer::RenderKind, f: impl FnOnce(&dyn AttributeRenderer) -> R) -> Option<R> {
        let inner = self.0.borrow();
        inner.renderers.get(kind).map(|r| f(r))
    }

    pub(crate) fn with_adaptor<R>(&self, ty: std::any::TypeId, f: impl FnOnce(&dyn crate::adaptor::ModelAdaptor) -> Result<R, ErrorKind>) -> Result<Option<R>, ErrorKind> {
        let inner = self.0.borrow();
        match inner.adaptors.resolve_type(ty)? {
            Some(a) => f(a).map(Some),
            None => Ok(None),
        }
    }

    /// Resolves `name` to a compiled template and the group whose own map
    /// actually contains it: a hit in this group's own map short-circuits; a cached
    /// miss sentinel short-circuits too, without re-searching imports;
    /// otherwise imports are searched in declaration order and a miss is
    /// cached so repeated lookups of a truly-absent name stay O(1).
    pub fn resolve(&self, name: &str) -> Option<(Rc<CompiledST>, Group)> {
        self.ensure_loaded();
        {
            let inner = self.0.borrow();
            match inner.templates.get(name) {
                Some(TemplateEntry::Compiled(c)) => return Some((c.clone(), self.clone())),
                Some(TemplateEntry::NotFound) => return None,
                None => {}
            }
        }
        let imports = self.0.borrow().imports.clone();
        for import in &imports {
            if let Some(hit) = import.resolve(name) {
                return Some(hit);
            }
        }
        self.0.borrow_mut().templates.insert(name.to_string(), TemplateEntry::NotFound);
        None
    }

    pub fn dictionary(&self, name: &str) -> Option<Dictionary> {
        self.ensure_loaded();
        if let Some(d) = self.0.borrow().dictionaries.get(name).cloned() {
            return Some(d);
        }
        let imports = self.0.borrow().imports.clone();
        imports.iter().find_map(|import| import.dictionary(name))
    }

    /// The first import of this group, in declaration order — where
    /// `super.name(...)` resolves.
    pub fn super_group(&self) -> Option<Group> {
        self.ensure_loaded();
        self.0.borrow().imports.first().cloned()
    }

    /// Resolves `name` and builds a fresh instance bound to this group as
    /// both creation and native group.
    pub fn get_instance_of(&self, name: &str) -> Option<ST> {
        let (compiled, native) = self.resolve(name)?;
        Some(ST::new(compiled, self.clone(), native))
    }

    pub(crate) fn report_runtime(&self, kind: ErrorKind, template: Option<&str>) {
        self.0.borrow_mut().errors.runtime_error(kind, template);
    }

    pub(crate) fn report_internal(&self, kind: ErrorKind) {
        self.0.borrow_mut().errors.internal_error(kind);
    }

    fn report_compile(&self, kind: ErrorKind) {
        self.0.borrow_mut().errors.compile_time_error(kind);
    }

    fn ensure_loaded(&self) {
        if self.0.borrow().loaded {
            return;
        }
        self.0.borrow_mut().loaded = true;
        // Borrow state out before recursing into loader helpers, which
        // themselves borrow `self.0` again while installing templates.
        let plan = {
            let inner = self.0.borrow();
            match &inner.source {
                GroupSource::File { text, .. } => LoadPlan::GroupFile(text.clone()),
                GroupSource::Str { text } => LoadPlan::GroupFile(text.clone()),
                GroupSource::Dir { root, raw } => LoadPlan::Dir(root.clone(), *raw),
            }
        };
        match plan {
            LoadPlan::GroupFile(text) => self.load_group_file_text(&text),
            LoadPlan::Dir(root, raw) => self.load_dir(&root, &root, raw),
        }
    }

    fn load_group_file_text(&self, text: &str) {
        let (file, errors) = parse_group_file(text);
        for e in errors {
            self.report_compile(e);
        }
        self.install_group_file(&file, "/");
    }

    fn install_group_file(&self, file: &GroupFile, prefix: &str) {
        if let Some((start, stop)) = file.delimiters {
            for ch in [start, stop] {
                if is_reserved_delimiter_char(ch) {
                    self.report_compile(ErrorKind::UnsupportedDelimiter { ch });
                    return;
                }
            }
            let mut inner = self.0.borrow_mut();
            inner.delim_start = start;
            inner.delim_stop = stop;
        }
        let (delim_start, delim_stop) = self.delimiters();

        for def in &file.defs {
            match def {
                Def::Template(t) => self.install_template_def(t, prefix, delim_start, delim_stop),
                Def::Region(t) => self.install_template_def(t, prefix, delim_start, delim_stop),
                Def::Dictionary(d) => self.install_dictionary(d.name.clone(), &d.entries),
                Def::Alias { .. } => {}
            }
        }
        // Aliases are installed in a second pass so forward references to
        // a template defined later in the same file still resolve.
        for def in &file.defs {
            if let Def::Alias { name, target, .. } = def {
                self.install_alias(name, target, prefix);
            }
        }
        for path in &file.imports {
            self.install_import(path);
        }
    }

    fn install_template_def(&self, def: &TemplateDef, prefix: &str, delim_start: char, delim_stop: char) {
        let (mut unit, errors) = compile_template_def(def, prefix, delim_start, delim_stop);
        for e in errors {
            self.report_compile(e);
        }
        if def.region_owner.is_some() {
            unit.main.is_region = true;
            unit.main.region_def_type = Some(RegionDefType::Explicit);
        }
        self.define_template(unit.main);
        for nested in unit.nested {
            self.define_template(nested);
        }
    }

    /// Installs `compiled` under its own `full_name()`, enforcing the
    /// three-tier region redefinition rule: a plain (non-region) name may
    /// never be redefined; an implicit blank region (auto-registered the
    /// first time `<@name()>` was referenced with nothing overriding it
    /// yet) may be overridden by exactly one explicit or embedded region
    /// definition; an explicit or embedded region, once installed, may not
    /// be redefined again.
    fn define_template(&self, compiled: CompiledST) {
        let full_name = compiled.full_name();
        let mut inner = self.0.borrow_mut();
        if let Some(TemplateEntry::Compiled(existing)) = inner.templates.get(&full_name) {
            let overriding_blank_region = existing.is_region && compiled.is_region && existing.region_def_type == Some(RegionDefType::Implicit);
            if !overriding_blank_region {
                let kind = if existing.is_region {
                    match existing.region_def_type {
                        Some(RegionDefType::Embedded) => ErrorKind::EmbeddedRegionRedefinition { name: full_name },
                        _ => ErrorKind::RegionRedefinition { name: full_name },
                    }
                } else {
                    ErrorKind::TemplateRedefinition { name: full_name }
                };
                drop(inner);
                self.report_compile(kind);
                return;
            }
        }
        inner.templates.insert(full_name, TemplateEntry::Compiled(Rc::new(compiled)));
    }

    fn install_dictionary(&self, name: String, entries: &[(DictKey, DictValue)]) {
        let mut dict = Dictionary::new();
        for (key, value) in entries {
            let entry = match value {
                DictValue::Str(s) => DictEntry::Value(Value::str(s.clone())),
                DictValue::KeySentinel => DictEntry::UseKey,
                DictValue::EmptyList => DictEntry::Value(Value::list(Vec::new())),
            };
            match key {
                DictKey::Str(k) => dict.insert(k.clone(), entry),
                DictKey::Default => dict.set_default(entry),
            }
        }
        let mut inner = self.0.borrow_mut();
        if inner.dictionaries.contains_key(&name) {
            drop(inner);
            self.report_compile(ErrorKind::MapRedefinition { name });
            return;
        }
        inner.dictionaries.insert(name, dict);
    }

    fn install_alias(&self, name: &str, target: &str, prefix: &str) {
        let full_name = join_prefix(prefix, name);
        let target_name = join_prefix(prefix, target);
        let existing = {
            let inner = self.0.borrow();
            match inner.templates.get(&target_name) {
                Some(TemplateEntry::Compiled(c)) => Some(c.clone()),
                _ => None,
            }
        };
        match existing {
            Some(c) => {
                self.0.borrow_mut().templates.insert(full_name, TemplateEntry::Compiled(c));
            }
            None => self.report_compile(ErrorKind::AliasTargetUndefined {
                alias: name.to_string(),
                target: target.to_string(),
            }),
        }
    }

    /// Resolves a group-file `import "path"` relative to this group's own
    /// file location. A group loaded from a bare string has no directory
    /// to resolve against, so such an import is reported and skipped.
    fn install_import(&self, path: &str) {
        let base = match &self.0.borrow().source {
            GroupSource::File { path, .. } => path.parent().map(Path::to_path_buf),
            _ => None,
        };
        let Some(base) = base else {
            self.report_compile(ErrorKind::CantImport { path: path.to_string() });
            return;
        };
        let as_file = base.join(format!("{path}.stg"));
        let as_dir = base.join(path);
        let imported = if as_file.is_file() {
            Group::from_file(&as_file).ok()
        } else if as_dir.is_dir() {
            Group::from_dir(&as_dir).ok()
        } else {
            None
        };
        match imported {
            Some(g) => self.import(g),
            None => self.report_compile(ErrorKind::CantImport { path: path.to_string() }),
        }
    }

    fn load_dir(&self, base: &Path, dir: &Path, raw: bool) {
        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(err) => {
                self.report_compile(ErrorKind::CantLoadGroupFile { path: format!("{}: {err}", dir.display()) });
                return;
            }
        };
        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        paths.sort();

        for path in &paths {
            if path.is_dir() {
                self.load_dir(base, path, raw);
            }
        }
        // `.st` files first, so a same-level `.stg` definition with the
        // same name wins the redefinition check below.
        for path in &paths {
            if path.extension().and_then(|e| e.to_str()) == Some("st") {
                self.load_st_file(base, path, raw);
            }
        }
        for path in &paths {
            if path.extension().and_then(|e| e.to_str()) == Some("stg") {
                match std::fs::read_to_string(path) {
                    Ok(text) => {
                        let (file, errors) = parse_group_file(&text);
                        for e in errors {
                            self.report_compile(e);
                        }
                        let prefix = dir_prefix(base, dir);
                        self.install_group_file(&file, &prefix);
                    }
                    Err(err) => self.report_compile(ErrorKind::CantLoadGroupFile { path: format!("{}: {err}", path.display()) }),
                }
            }
        }
    }

    fn load_st_file(&self, base: &Path, path: &Path, raw: bool) {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(err) => {
                self.report_compile(ErrorKind::CantLoadGroupFile { path: format!("{}: {err}", path.display()) });
                return;
            }
        };
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("").to_string();
        if name.is_empty() {
            self.report_compile(ErrorKind::InvalidTemplateName { name: path.display().to_string() });
            return;
        }
        let prefix = dir_prefix(base, path.parent().unwrap_or(base));
        let (formal_args, body) = if raw { (Vec::new(), text.as_str()) } else { split_st_header(&text) };
        let has_formal_args = !raw && formal_args_declared(&text);
        let (delim_start, delim_stop) = self.delimiters();
        let specs: Vec<st_compiler::FormalArgSpec> = formal_args.into_iter().map(st_compiler::FormalArgSpec::required).collect();
        let (unit, errors) = st_compiler::compile_template(&name, &prefix, body, &specs, has_formal_args, delim_start, delim_stop);
        for e in errors {
            self.report_compile(e);
        }
        self.define_template(unit.main);
        for nested in unit.nested {
            self.define_template(nested);
        }
    }
}

enum LoadPlan {
    GroupFile(String),
    Dir(PathBuf, bool),
}

/// Characters a `delimiters "x", "y"` declaration may not use: letters,
/// digits, and whitespace would collide with ordinary template text and
/// identifiers.
fn is_reserved_delimiter_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch.is_whitespace() || ch == '\\'
}

fn join_prefix(prefix: &str, name: &str) -> String {
    if prefix.is_empty() || prefix == "/" {
        format!("/{name}")
    } else {
        format!("{}/{name}", prefix.trim_end_matches('/'))
    }
}

fn dir_prefix(base: &Path, dir: &Path) -> String {
    match dir.strip_prefix(base) {
        Ok(rel) if rel.as_os_str().is_empty() => "/".to_string(),
        Ok(rel) => format!("/{}", rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/")),
        Err(_) => "/".to_string(),
    }
}

/// Whether a `.st` file's first non-blank line looks like a
/// parenthesized formal-argument header, e.g. `(name, age)`.
fn formal_args_declared(text: &str) -> bool {
    text.trim_start().starts_with('(')
}

/// Splits an optional `(args)` header line off the front of a directory
/// group's `.st` file body, returning the declared names and the
/// remaining body text.
fn split_st_header(text: &str) -> (Vec<String>, &str) {
    let trimmed = text.trim_start();
    if !trimmed.starts_with('(') {
        return (Vec::new(), text);
    }
    match trimmed.find(')') {
        Some(close) => {
            let header = &trimmed[1..close];
            let args = header.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            let rest = &trimmed[close + 1..];
            (args, rest.strip_prefix('\n').unwrap_or(rest))
        }
        None => (Vec::new(), text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_a_template_defined_in_string_source() {
        let group = Group::from_string(r#"hi(name) ::= "hello <name>!""#).unwrap();
        assert!(group.resolve("/hi").is_some());
    }

    #[test]
    fn missing_template_caches_as_not_found() {
        let group = Group::from_string("").unwrap();
        assert!(group.resolve("/nope").is_none());
        assert!(group.resolve("/nope").is_none());
    }

    #[test]
    fn import_is_searched_after_own_templates_miss() {
        let base = Group::from_string(r#"hi(name) ::= "hello <name>!""#).unwrap();
        let top = Group::from_string("").unwrap();
        top.import(base);
        assert!(top.resolve("/hi").is_some());
    }

    #[test]
    fn redefining_a_template_in_the_same_file_is_reported_and_keeps_the_first() {
        let group = Group::from_string(
            r#"
            a() ::= "one"
            a() ::= "two"
            "#,
        )
        .unwrap();
        let (compiled, _) = group.resolve("/a").unwrap();
        assert_eq!(compiled.template_text, "one");
    }

    #[test]
    fn unreferenced_and_unoverridden_region_renders_empty() {
        let group = Group::from_string(r#"t() ::= "a<@r()>b""#).unwrap();
        let st = group.get_instance_of("/t").unwrap();
        assert_eq!(st.render(), "ab");
        let (blank, _) = group.resolve("/region__t__r").unwrap();
        assert!(blank.is_region);
        assert_eq!(blank.region_def_type, Some(RegionDefType::Implicit));
    }

    #[test]
    fn explicit_region_definition_overrides_the_implicit_blank_once() {
        let group = Group::from_string(
            r#"
            t() ::= "a<@r()>b"
            @t.r() ::= "X"
            "#,
        )
        .unwrap();
        let st = group.get_instance_of("/t").unwrap();
        assert_eq!(st.render(), "aXb");
        let (region, _) = group.resolve("/region__t__r").unwrap();
        assert_eq!(region.region_def_type, Some(RegionDefType::Explicit));
    }

    #[test]
    fn redefining_an_explicit_region_a_second_time_is_reported_and_keeps_the_first() {
        let group = Group::from_string(
            r#"
            t() ::= "<@r()>"
            @t.r() ::= "one"
            @t.r() ::= "two"
            "#,
        )
        .unwrap();
        let (compiled, _) = group.resolve("/region__t__r").unwrap();
        assert_eq!(compiled.template_text, "one");
    }

    #[test]
    fn dictionary_lookup_falls_back_to_declared_default() {
        let group = Group::from_string(
            r#"
            colors ::= [
                "red": "FF0000",
                default: "unknown"
            ]
            "#,
        )
        .unwrap();
        let dict = group.dictionary("colors").unwrap();
        assert!(matches!(dict.get("red"), Some(Value::Str(s)) if &*s == "FF0000"));
        assert!(matches!(dict.get("blue"), Some(Value::Str(s)) if &*s == "unknown"));
    }

    #[test]
    fn dollar_delimiters_are_honored() {
        let group = Group::from_string(
            "delimiters \"$\", \"$\"\nhi(name) ::= \"hello $name$!\"",
        )
        .unwrap();
        let st = group.get_instance_of("/hi").unwrap();
        st.add("name", "Ada");
        assert_eq!(st.render(), "hello Ada!");
    }

    #[test]
    fn alphanumeric_delimiter_is_rejected() {
        let group = Group::from_string("delimiters \"a\", \">\"\nhi() ::= \"x\"").unwrap();
        assert!(group.resolve("/hi").is_none());
    }
}
