//! Parses `.stg` group-file source into a [`GroupFile`].
//!
//! A definition's right-hand side is disambiguated by the first
//! significant character after `::=`: `[` starts a dictionary, `"`/`<<`/
//! `<%` starts a template body, and a bare identifier with nothing else
//! following is an alias to another template.

use st_core::{ErrorKind, Span};

use crate::group_ast::{DefaultSyntax, Def, DictKey, DictValue, DictionaryDef, FormalArgSyntax, GroupFile, TemplateDef};
use crate::group_lexer::{Lexer, TokKind, Token};

pub fn parse_group_file(src: &str) -> (GroupFile, Vec<ErrorKind>) {
    let mut p = Parser::new(src);
    let file = p.parse_file();
    (file, p.lexer.errors.drain(..).chain(p.errors.drain(..)).collect())
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    lookahead: Option<Token>,
    errors: Vec<ErrorKind>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { lexer: Lexer::new(src), lookahead: None, errors: Vec::new() }
    }

    fn peek(&mut self) -> &Token {
        if self.lookahead.is_none() {
            self.lookahead = Some(self.lexer.next_token());
        }
        self.lookahead.as_ref().unwrap()
    }

    fn bump(&mut self) -> Token {
        self.peek();
        self.lookahead.take().unwrap()
    }

    fn error(&mut self, kind: ErrorKind) {
        self.errors.push(kind);
    }

    fn expect_str(&mut self) -> String {
        match self.bump().kind {
            TokKind::Str(s) => s,
            other => {
                self.error(ErrorKind::SyntaxError { detail: format!("expected a quoted string, found {other:?}") });
                String::new()
            }
        }
    }

    fn expect_ident(&mut self) -> String {
        match self.bump().kind {
            TokKind::Ident(s) => s,
            other => {
                self.error(ErrorKind::SyntaxError { detail: format!("expected an identifier, found {other:?}") });
                String::new()
            }
        }
    }

    fn expect(&mut self, kind: TokKind) {
        if self.peek().kind != kind {
            self.error(ErrorKind::SyntaxError { detail: format!("expected {kind:?}, found {:?}", self.peek().kind) });
            return;
        }
        self.bump();
    }

    fn parse_file(&mut self) -> GroupFile {
        let mut file = GroupFile { delimiters: None, imports: Vec::new(), defs: Vec::new() };
        loop {
            match self.peek().kind.clone() {
                TokKind::Eof => break,
                TokKind::Ident(name) if name == "delimiters" => {
                    self.bump();
                    let start = self.expect_str();
                    self.expect(TokKind::Comma);
                    let stop = self.expect_str();
                    let start_ch = start.chars().next().unwrap_or('<');
                    let stop_ch = stop.chars().next().unwrap_or('>');
                    file.delimiters = Some((start_ch, stop_ch));
                }
                TokKind::Ident(name) if name == "import" => {
                    self.bump();
                    let path = self.expect_str();
                    file.imports.push(path);
                }
                TokKind::At => {
                    file.defs.push(Def::Region(self.parse_region_def()));
                }
                TokKind::Ident(_) => {
                    file.defs.push(self.parse_named_def());
                }
                other => {
                    self.error(ErrorKind::SyntaxError { detail: format!("unexpected token at top level: {other:?}") });
                    self.bump();
                }
            }
        }
        file
    }

    fn parse_region_def(&mut self) -> TemplateDef {
        let start = self.peek().span.start;
        self.bump(); // '@'
        let owner = self.expect_ident();
        self.expect(TokKind::Dot);
        let name = self.expect_ident();
        self.expect(TokKind::LParen);
        self.expect(TokKind::RParen);
        self.expect(TokKind::ColonColonEquals);
        let (body, body_span) = self.lexer.scan_body();
        let stop = body_span.stop;
        TemplateDef {
            name,
            region_owner: Some(owner),
            formal_args: Vec::new(),
            has_formal_args: true,
            body,
            body_span,
            span: Span::new(start, stop),
        }
    }

    fn parse_named_def(&mut self) -> Def {
        let start = self.peek().span.start;
        let name = self.expect_ident();
        let mut formal_args = Vec::new();
        let mut has_formal_args = false;
        if matches!(self.peek().kind, TokKind::LParen) {
            has_formal_args = true;
            self.bump();
            formal_args = self.parse_formal_args();
            self.expect(TokKind::RParen);
        }
        self.expect(TokKind::ColonColonEquals);

        match self.lexer.peek_significant_char() {
            Some('[') => {
                self.lookahead = None; // invalidate cached peek; reread raw '['
                self.expect(TokKind::LBrack);
                let dict = self.parse_dict_body(name, start);
                Def::Dictionary(dict)
            }
            Some('"') | Some('<') => {
                let (body, body_span) = self.lexer.scan_body();
                let stop = body_span.stop;
                Def::Template(TemplateDef { name, region_owner: None, formal_args, has_formal_args, body, body_span, span: Span::new(start, stop) })
            }
            _ => {
                let target = self.expect_ident();
                let stop = self.peek().span.start;
                Def::Alias { name, target, span: Span::new(start, stop) }
            }
        }
    }

    fn parse_formal_args(&mut self) -> Vec<FormalArgSyntax> {
        let mut args = Vec::new();
        if matches!(self.peek().kind, TokKind::RParen) {
            return args;
        }
        loop {
            let name = self.expect_ident();
            let default = if matches!(self.peek().kind, TokKind::Equals) {
                self.bump();
                Some(self.parse_default_value())
            } else {
                None
            };
            args.push(FormalArgSyntax { name, default });
            if matches!(self.peek().kind, TokKind::Comma) {
                self.bump();
                continue;
            }
            break;
        }
        args
    }

    fn parse_default_value(&mut self) -> DefaultSyntax {
        if self.lexer.peek_significant_char() == Some('{') {
            self.lookahead = None;
            let (text, span) = self.lexer.scan_brace_balanced();
            return DefaultSyntax::AnonTemplate(text, span);
        }
        match self.peek().kind.clone() {
            TokKind::Str(_) => DefaultSyntax::Str(self.expect_str()),
            TokKind::LBrack => {
                self.bump();
                self.expect(TokKind::RBrack);
                DefaultSyntax::EmptyList
            }
            TokKind::Ident(ref name) if name == "true" => {
                self.bump();
                DefaultSyntax::Bool(true)
            }
            TokKind::Ident(ref name) if name == "false" => {
                self.bump();
                DefaultSyntax::Bool(false)
            }
            other => {
                self.error(ErrorKind::SyntaxError { detail: format!("unsupported default value: {other:?}") });
                self.bump();
                DefaultSyntax::Str(String::new())
            }
        }
    }

    fn parse_dict_body(&mut self, name: String, start: u32) -> DictionaryDef {
        let mut entries = Vec::new();
        loop {
            if matches!(self.peek().kind, TokKind::RBrack) {
                break;
            }
            let key = match self.peek().kind.clone() {
                TokKind::Str(_) => DictKey::Str(self.expect_str()),
                TokKind::Ident(ref ident) if ident == "default" => {
                    self.bump();
                    DictKey::Default
                }
                other => {
                    self.error(ErrorKind::SyntaxError { detail: format!("expected a dictionary key, found {other:?}") });
                    self.bump();
                    continue;
                }
            };
            self.expect(TokKind::Colon);
            let value = match self.peek().kind.clone() {
                TokKind::Str(_) => DictValue::Str(self.expect_str()),
                TokKind::LBrack => {
                    self.bump();
                    self.expect(TokKind::RBrack);
                    DictValue::EmptyList
                }
                TokKind::Ident(ref ident) if ident == "key" => {
                    self.bump();
                    DictValue::KeySentinel
                }
                other => {
                    self.error(ErrorKind::SyntaxError { detail: format!("expected a dictionary value, found {other:?}") });
                    self.bump();
                    DictValue::Str(String::new())
                }
            };
            entries.push((key, value));
            if matches!(self.peek().kind, TokKind::Comma) {
                self.bump();
                continue;
            }
            break;
        }
        let stop = self.peek().span.stop;
        self.expect(TokKind::RBrack);
        DictionaryDef { name, entries, span: Span::new(start, stop) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_simple_template_definition() {
        let (file, errors) = parse_group_file(r#"hi(name) ::= "hello <name>!""#);
        assert!(errors.is_empty());
        assert_eq!(file.defs.len(), 1);
        match &file.defs[0] {
            Def::Template(t) => {
                assert_eq!(t.name, "hi");
                assert_eq!(t.formal_args.len(), 1);
                assert_eq!(t.body, "hello <name>!");
            }
            other => panic!("expected template def, got {other:?}"),
        }
    }

    #[test]
    fn parses_heredoc_body() {
        let src = "outer() ::= <<\nprefix:\n    <inner()>\n>>\ninner() ::= \"a\\nb\"";
        let (file, errors) = parse_group_file(src);
        assert!(errors.is_empty());
        assert_eq!(file.defs.len(), 2);
    }

    #[test]
    fn parses_dictionary_with_default_key() {
        let (file, errors) = parse_group_file(r#"types ::= ["int":"Integer", default: "Object"]"#);
        assert!(errors.is_empty());
        match &file.defs[0] {
            Def::Dictionary(d) => {
                assert_eq!(d.name, "types");
                assert_eq!(d.entries.len(), 2);
                assert_eq!(d.entries[1].0, DictKey::Default);
            }
            other => panic!("expected dictionary def, got {other:?}"),
        }
    }

    #[test]
    fn parses_alias() {
        let (file, errors) = parse_group_file("b ::= a\na() ::= \"x\"");
        assert!(errors.is_empty());
        assert!(matches!(&file.defs[0], Def::Alias { name, target, .. } if name == "b" && target == "a"));
    }

    #[test]
    fn parses_import_and_delimiters() {
        let (file, errors) = parse_group_file("delimiters \"$\", \"$\"\nimport \"base.stg\"\nt() ::= \"$x$\"");
        assert!(errors.is_empty());
        assert_eq!(file.delimiters, Some(('$', '$')));
        assert_eq!(file.imports, vec!["base.stg".to_string()]);
    }

    #[test]
    fn parses_region_definition() {
        let (file, errors) = parse_group_file(r#"@t.region() ::= "body""#);
        assert!(errors.is_empty());
        match &file.defs[0] {
            Def::Region(t) => {
                assert_eq!(t.region_owner.as_deref(), Some("t"));
                assert_eq!(t.name, "region");
            }
            other => panic!("expected region def, got {other:?}"),
        }
    }

    #[test]
    fn parses_formal_argument_with_string_default() {
        let (file, errors) = parse_group_file(r#"greet(name="world") ::= "hi <name>""#);
        assert!(errors.is_empty());
        match &file.defs[0] {
            Def::Template(t) => {
                assert_eq!(t.formal_args[0].name, "name");
                assert_eq!(t.formal_args[0].default, Some(DefaultSyntax::Str("world".into())));
            }
            other => panic!("expected template def, got {other:?}"),
        }
    }
}
