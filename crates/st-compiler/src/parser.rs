//! Recursive-descent parser over the token stream produced by [`Lexer`].
//!
//! One `Vec<Chunk>` shape serves both a whole template body and a
//! sub-template body (see `ast::Chunk`); `parse_chunks_until` is the single
//! routine both entry points share, parameterized by what signals "body is
//! done" (`Eof`, an upcoming `else`/`elseif`/`endif`, or a closing `}`).

use std::collections::VecDeque;

use st_core::{ErrorKind, Span};

use crate::ast::{Arg, BuiltinFunc, Chunk, Expr, ExprStmt, IfStmt, Options, SubTemplate, TemplateRef};
use crate::lexer::{Lexer, TokKind, Token};

#[derive(Clone, Copy, PartialEq, Eq)]
enum ChunkStop {
    TopLevel,
    ElseFamily,
    SubBody,
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    queue: VecDeque<Token>,
    pub errors: Vec<ErrorKind>,
}

/// Parses a whole template body (top-level, stops at end of input).
pub fn parse_template_body(src: &str, delim_start: char, delim_stop: char) -> (Vec<Chunk>, Vec<ErrorKind>) {
    let mut p = Parser::new(Lexer::new(src, delim_start, delim_stop));
    let chunks = p.parse_chunks_until(ChunkStop::TopLevel);
    (chunks, p.into_errors())
}

/// Parses a `{args | body}` default value whose outer braces a group-file
/// parser has already stripped, e.g. the right-hand side of
/// `greet(x={<x> there})`.
pub fn parse_subtemplate_literal(text: &str, delim_start: char, delim_stop: char) -> (SubTemplate, Vec<ErrorKind>) {
    let mut p = Parser::new(Lexer::new_for_inside(text, delim_start, delim_stop));
    let params = p.lexer.try_enter_subtemplate();
    let body = p.parse_chunks_until(ChunkStop::SubBody);
    let span = Span::new(0, text.len() as u32);
    (SubTemplate { params, body, span }, p.into_errors())
}

impl<'a> Parser<'a> {
    fn new(lexer: Lexer<'a>) -> Self {
        Self { lexer, queue: VecDeque::new(), errors: Vec::new() }
    }

    fn into_errors(mut self) -> Vec<ErrorKind> {
        self.errors.append(&mut self.lexer.errors);
        self.errors
    }

    fn fill(&mut self, n: usize) {
        while self.queue.len() < n {
            let t = self.lexer.next_token();
            self.queue.push_back(t);
        }
    }

    fn peek(&mut self) -> &Token {
        self.fill(1);
        &self.queue[0]
    }

    fn peek2(&mut self) -> &Token {
        self.fill(2);
        &self.queue[1]
    }

    fn bump(&mut self) -> Token {
        self.fill(1);
        self.queue.pop_front().expect("filled above")
    }

    fn error(&mut self, kind: ErrorKind) {
        self.errors.push(kind);
    }

    fn expect_ident(&mut self) -> String {
        match self.bump().kind {
            TokKind::Ident(name) => name,
            other => {
                self.error(ErrorKind::SyntaxError { detail: format!("expected identifier, found {other:?}") });
                String::new()
            }
        }
    }

    fn expect_rdelim(&mut self) {
        if !matches!(self.peek().kind, TokKind::RDelim) {
            self.error(ErrorKind::SyntaxError { detail: "expected '>'".into() });
            return;
        }
        self.bump();
    }

    fn expect_ldelim(&mut self) {
        if !matches!(self.peek().kind, TokKind::LDelim) {
            self.error(ErrorKind::SyntaxError { detail: "expected '<'".into() });
            return;
        }
        self.bump();
    }

    fn expect_kind(&mut self, kind: TokKind) {
        if self.peek().kind != kind {
            self.error(ErrorKind::SyntaxError { detail: format!("expected {kind:?}") });
            return;
        }
        self.bump();
    }

    fn at_chunk_stop(&mut self, stop: ChunkStop) -> bool {
        match stop {
            ChunkStop::TopLevel => matches!(self.peek().kind, TokKind::Eof),
            ChunkStop::SubBody => matches!(self.peek().kind, TokKind::Eof | TokKind::RCurly),
            ChunkStop::ElseFamily => {
                if matches!(self.peek().kind, TokKind::Eof) {
                    return true;
                }
                matches!(self.peek().kind, TokKind::LDelim)
                    && matches!(self.peek2().kind, TokKind::Else | TokKind::ElseIf | TokKind::EndIf)
            }
        }
    }

    fn parse_chunks_until(&mut self, stop: ChunkStop) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        while !self.at_chunk_stop(stop) {
            match self.peek().kind.clone() {
                TokKind::Text(s) => {
                    self.bump();
                    chunks.push(Chunk::Text(s));
                }
                TokKind::Indent(s) => {
                    self.bump();
                    chunks.push(Chunk::Indent(s));
                }
                TokKind::Newline => {
                    self.bump();
                    chunks.push(Chunk::Newline);
                }
                TokKind::LDelim => chunks.push(self.parse_expr_hole()),
                TokKind::Eof => break,
                other => {
                    self.error(ErrorKind::SyntaxError { detail: format!("unexpected token {other:?}") });
                    self.bump();
                }
            }
        }
        chunks
    }

    fn parse_expr_hole(&mut self) -> Chunk {
        self.bump(); // LDelim
        match self.peek().kind.clone() {
            TokKind::If => {
                self.bump();
                self.parse_if()
            }
            _ => self.parse_expr_stmt(),
        }
    }

    fn parse_if(&mut self) -> Chunk {
        let mut branches = Vec::new();
        let cond = self.parse_expr();
        self.expect_rdelim();
        let body = self.parse_chunks_until(ChunkStop::ElseFamily);
        branches.push((cond, body));
        loop {
            self.expect_ldelim();
            match self.peek().kind.clone() {
                TokKind::ElseIf => {
                    self.bump();
                    let cond = self.parse_expr();
                    self.expect_rdelim();
                    let body = self.parse_chunks_until(ChunkStop::ElseFamily);
                    branches.push((cond, body));
                }
                TokKind::Else => {
                    self.bump();
                    self.expect_rdelim();
                    let body = self.parse_chunks_until(ChunkStop::ElseFamily);
                    self.expect_ldelim();
                    self.expect_kind(TokKind::EndIf);
                    self.expect_rdelim();
                    return Chunk::If(IfStmt { branches, else_branch: Some(body) });
                }
                TokKind::EndIf => {
                    self.bump();
                    self.expect_rdelim();
                    return Chunk::If(IfStmt { branches, else_branch: None });
                }
                other => {
                    self.error(ErrorKind::SyntaxError { detail: format!("expected elseif/else/endif, found {other:?}") });
                    self.bump();
                    return Chunk::If(IfStmt { branches, else_branch: None });
                }
            }
        }
    }

    fn parse_expr_stmt(&mut self) -> Chunk {
        let start = self.peek().span.start;
        let mut sources = vec![self.parse_expr()];
        while matches!(self.peek().kind, TokKind::Comma) {
            self.bump();
            sources.push(self.parse_expr());
        }
        let mut targets = Vec::new();
        if matches!(self.peek().kind, TokKind::Colon) {
            self.bump();
            targets.push(self.parse_template_ref());
            while matches!(self.peek().kind, TokKind::Comma) {
                self.bump();
                targets.push(self.parse_template_ref());
            }
        }
        let options = if matches!(self.peek().kind, TokKind::Semi) {
            self.bump();
            self.parse_options()
        } else {
            Options::default()
        };
        let stop = self.peek().span.stop;
        self.expect_rdelim();
        Chunk::Expr(ExprStmt { sources, targets, options, span: Span::new(start, stop) })
    }

    fn parse_template_ref(&mut self) -> TemplateRef {
        if matches!(self.peek().kind, TokKind::LCurly) {
            let start = self.peek().span.start;
            self.bump();
            let params = self.lexer.try_enter_subtemplate();
            let body = self.parse_chunks_until(ChunkStop::SubBody);
            let stop = self.peek().span.stop;
            self.expect_kind(TokKind::RCurly);
            return TemplateRef::Anon(SubTemplate { params, body, span: Span::new(start, stop) });
        }
        let mut is_super = false;
        if matches!(self.peek().kind, TokKind::Super) {
            self.bump();
            self.expect_kind(TokKind::Dot);
            is_super = true;
        }
        let mut path = if matches!(self.peek().kind, TokKind::Slash) {
            self.bump();
            "/".to_string()
        } else {
            String::new()
        };
        path.push_str(&self.expect_ident());
        while matches!(self.peek().kind, TokKind::Slash) {
            self.bump();
            path.push('/');
            path.push_str(&self.expect_ident());
        }
        let args = if matches!(self.peek().kind, TokKind::LParen) {
            self.bump();
            self.parse_args()
        } else {
            Vec::new()
        };
        TemplateRef::Named { path, args, is_super }
    }

    fn parse_args(&mut self) -> Vec<Arg> {
        // LParen already consumed.
        let mut args = Vec::new();
        if matches!(self.peek().kind, TokKind::RParen) {
            self.bump();
            return args;
        }
        loop {
            if matches!(self.peek().kind, TokKind::Ellipsis) {
                self.bump();
                args.push(Arg::Ellipsis);
            } else if let TokKind::Ident(name) = self.peek().kind.clone() {
                if matches!(self.peek2().kind, TokKind::Equals) {
                    self.bump();
                    self.bump();
                    args.push(Arg::Named(name, self.parse_expr()));
                } else {
                    args.push(Arg::Positional(self.parse_expr()));
                }
            } else {
                args.push(Arg::Positional(self.parse_expr()));
            }
            if matches!(self.peek().kind, TokKind::Comma) {
                self.bump();
                continue;
            }
            break;
        }
        self.expect_kind(TokKind::RParen);
        args
    }

    fn parse_options(&mut self) -> Options {
        // Semi already consumed.
        let mut opts = Options::default();
        loop {
            let name = match self.peek().kind.clone() {
                TokKind::Ident(name) => {
                    self.bump();
                    name
                }
                _ => break,
            };
            let value = if matches!(self.peek().kind, TokKind::Equals) {
                self.bump();
                Some(Box::new(self.parse_expr()))
            } else {
                None
            };
            match name.as_str() {
                "separator" => opts.separator = value,
                "null" | "default" => opts.null = value,
                "wrap" => opts.wrap = value,
                "anchor" => opts.anchor = true,
                "format" => opts.format = value,
                other => self.error(ErrorKind::NoSuchOption { name: other.to_string() }),
            }
            if matches!(self.peek().kind, TokKind::Comma) {
                self.bump();
                continue;
            }
            break;
        }
        opts
    }

    fn parse_expr(&mut self) -> Expr {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Expr {
        let mut lhs = self.parse_and();
        while matches!(self.peek().kind, TokKind::OrOr) {
            self.bump();
            let rhs = self.parse_and();
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        lhs
    }

    fn parse_and(&mut self) -> Expr {
        let mut lhs = self.parse_not();
        while matches!(self.peek().kind, TokKind::AndAnd) {
            self.bump();
            let rhs = self.parse_not();
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        lhs
    }

    fn parse_not(&mut self) -> Expr {
        if matches!(self.peek().kind, TokKind::Bang) {
            self.bump();
            Expr::Not(Box::new(self.parse_not()))
        } else {
            self.parse_postfix()
        }
    }

    fn parse_postfix(&mut self) -> Expr {
        let mut base = self.parse_primary();
        loop {
            if matches!(self.peek().kind, TokKind::Dot) {
                self.bump();
                if matches!(self.peek().kind, TokKind::LParen) {
                    self.bump();
                    let inner = self.parse_expr();
                    self.expect_kind(TokKind::RParen);
                    base = Expr::PropInd { base: Box::new(base), name: Box::new(inner) };
                } else {
                    let name = self.expect_ident();
                    base = Expr::Prop { base: Box::new(base), name };
                }
            } else {
                break;
            }
        }
        base
    }

    fn parse_primary(&mut self) -> Expr {
        match self.peek().kind.clone() {
            TokKind::Str(s) => {
                self.bump();
                Expr::Str(s)
            }
            TokKind::True => {
                self.bump();
                Expr::True
            }
            TokKind::False => {
                self.bump();
                Expr::False
            }
            TokKind::At => {
                self.bump();
                let first = self.expect_ident();
                if matches!(self.peek().kind, TokKind::Dot) {
                    self.bump();
                    let name = self.expect_ident();
                    self.expect_kind(TokKind::LParen);
                    self.expect_kind(TokKind::RParen);
                    Expr::Region { owner: Some(first), name }
                } else {
                    self.expect_kind(TokKind::LParen);
                    self.expect_kind(TokKind::RParen);
                    Expr::Region { owner: None, name: first }
                }
            }
            TokKind::LParen => {
                self.bump();
                let inner = self.parse_expr();
                self.expect_kind(TokKind::RParen);
                if matches!(self.peek().kind, TokKind::LParen) {
                    self.bump();
                    let args = self.parse_args();
                    Expr::IndirectCall { name: Box::new(inner), args }
                } else {
                    Expr::Indirect(Box::new(inner))
                }
            }
            TokKind::LCurly => {
                let start = self.peek().span.start;
                self.bump();
                let params = self.lexer.try_enter_subtemplate();
                let body = self.parse_chunks_until(ChunkStop::SubBody);
                let stop = self.peek().span.stop;
                self.expect_kind(TokKind::RCurly);
                Expr::SubTemplate(SubTemplate { params, body, span: Span::new(start, stop) })
            }
            TokKind::Super => {
                self.bump();
                self.expect_kind(TokKind::Dot);
                let name = self.expect_ident();
                let args = if matches!(self.peek().kind, TokKind::LParen) {
                    self.bump();
                    self.parse_args()
                } else {
                    Vec::new()
                };
                Expr::Call { path: name, args, is_super: true }
            }
            TokKind::Ident(name) => {
                self.bump();
                if let Some(func) = BuiltinFunc::from_name(&name) {
                    if matches!(self.peek().kind, TokKind::LParen) {
                        self.bump();
                        let arg = self.parse_expr();
                        self.expect_kind(TokKind::RParen);
                        return Expr::Func { func, arg: Box::new(arg) };
                    }
                }
                if matches!(self.peek().kind, TokKind::LParen) {
                    self.bump();
                    let args = self.parse_args();
                    return Expr::Call { path: name, args, is_super: false };
                }
                if matches!(self.peek().kind, TokKind::Slash) {
                    let mut path = name;
                    while matches!(self.peek().kind, TokKind::Slash) {
                        self.bump();
                        path.push('/');
                        path.push_str(&self.expect_ident());
                    }
                    if matches!(self.peek().kind, TokKind::LParen) {
                        self.bump();
                        let args = self.parse_args();
                        return Expr::Call { path, args, is_super: false };
                    }
                    return Expr::Attr(path);
                }
                Expr::Attr(name)
            }
            other => {
                self.error(ErrorKind::SyntaxError { detail: format!("unexpected token in expression: {other:?}") });
                self.bump();
                Expr::Attr(String::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_parses_to_one_chunk() {
        let (chunks, errors) = parse_template_body("hello", '<', '>');
        assert!(errors.is_empty());
        assert_eq!(chunks, vec![Chunk::Text("hello".into())]);
    }

    #[test]
    fn simple_attribute_interpolation() {
        let (chunks, errors) = parse_template_body("hi <name>!", '<', '>');
        assert!(errors.is_empty());
        assert_eq!(chunks.len(), 3);
        match &chunks[1] {
            Chunk::Expr(e) => assert_eq!(e.sources, vec![Expr::Attr("name".into())]),
            other => panic!("expected Expr chunk, got {other:?}"),
        }
    }

    #[test]
    fn separator_option_parses() {
        let (chunks, errors) = parse_template_body("<names; separator=\", \">", '<', '>');
        assert!(errors.is_empty());
        match &chunks[0] {
            Chunk::Expr(e) => assert_eq!(e.options.separator, Some(Box::new(Expr::Str(", ".into())))),
            other => panic!("expected Expr chunk, got {other:?}"),
        }
    }

    #[test]
    fn map_with_anonymous_subtemplate() {
        let (chunks, errors) = parse_template_body("<names:{n|<n>!}>", '<', '>');
        assert!(errors.is_empty());
        match &chunks[0] {
            Chunk::Expr(e) => {
                assert_eq!(e.sources, vec![Expr::Attr("names".into())]);
                match &e.targets[0] {
                    TemplateRef::Anon(sub) => {
                        assert_eq!(sub.params, vec!["n".to_string()]);
                        assert_eq!(sub.body.len(), 2);
                    }
                    other => panic!("expected anon sub-template, got {other:?}"),
                }
            }
            other => panic!("expected Expr chunk, got {other:?}"),
        }
    }

    #[test]
    fn map_with_no_params_subtemplate() {
        let (chunks, errors) = parse_template_body("<names:{<it>}>", '<', '>');
        assert!(errors.is_empty());
        match &chunks[0] {
            Chunk::Expr(e) => match &e.targets[0] {
                TemplateRef::Anon(sub) => assert!(sub.params.is_empty()),
                other => panic!("expected anon sub-template, got {other:?}"),
            },
            other => panic!("expected Expr chunk, got {other:?}"),
        }
    }

    #[test]
    fn if_else_chain() {
        let (chunks, errors) = parse_template_body("<if(cond)>a<elseif(other)>b<else>c<endif>", '<', '>');
        assert!(errors.is_empty());
        match &chunks[0] {
            Chunk::If(stmt) => {
                assert_eq!(stmt.branches.len(), 2);
                assert!(stmt.else_branch.is_some());
            }
            other => panic!("expected If chunk, got {other:?}"),
        }
    }

    #[test]
    fn named_template_call_with_args() {
        let (chunks, _errors) = parse_template_body("<greet(name=\"Sam\")>", '<', '>');
        match &chunks[0] {
            Chunk::Expr(e) => assert_eq!(
                e.sources,
                vec![Expr::Call { path: "greet".into(), args: vec![Arg::Named("name".into(), Expr::Str("Sam".into()))], is_super: false }]
            ),
            other => panic!("expected Expr chunk, got {other:?}"),
        }
    }

    #[test]
    fn zip_map_with_two_sources() {
        let (chunks, errors) = parse_template_body("<names, phones:{n, p | <n>: <p>}>", '<', '>');
        assert!(errors.is_empty());
        match &chunks[0] {
            Chunk::Expr(e) => assert_eq!(e.sources.len(), 2),
            other => panic!("expected Expr chunk, got {other:?}"),
        }
    }

    #[test]
    fn builtin_function_call() {
        let (chunks, errors) = parse_template_body("<first(names)>", '<', '>');
        assert!(errors.is_empty());
        match &chunks[0] {
            Chunk::Expr(e) => assert_eq!(e.sources, vec![Expr::Func { func: BuiltinFunc::First, arg: Box::new(Expr::Attr("names".into())) }]),
            other => panic!("expected Expr chunk, got {other:?}"),
        }
    }

    #[test]
    fn property_chain_and_indirect_property() {
        let (chunks, errors) = parse_template_body("<x.y.(z)>", '<', '>');
        assert!(errors.is_empty());
        match &chunks[0] {
            Chunk::Expr(e) => assert_eq!(
                e.sources,
                vec![Expr::PropInd {
                    base: Box::new(Expr::Prop { base: Box::new(Expr::Attr("x".into())), name: "y".into() }),
                    name: Box::new(Expr::Attr("z".into())),
                }]
            ),
            other => panic!("expected Expr chunk, got {other:?}"),
        }
    }
}
