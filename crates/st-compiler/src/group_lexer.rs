//! Hand-written tokenizer for `.stg` group-file syntax.
//!
//! Group-file source is simple enough (no nested expression-mode
//! switching) that a single flat token set suffices, unlike the template
//! lexer's mode stack. The one irregular piece is a template body itself:
//! `"..."`, `<<...>>`, and `<%...%>` are scanned by [`Lexer::scan_body`]
//! rather than by `next_token`, since a body's contents (arbitrary
//! template source, including `<angle brackets>`) are not tokens of the
//! group-file grammar — they're handed whole to [`crate::parser`] later.

use st_core::{ErrorKind, Span};

#[derive(Clone, Debug, PartialEq)]
pub enum TokKind {
    Ident(String),
    Str(String),
    ColonColonEquals,
    LParen,
    RParen,
    LBrack,
    RBrack,
    Comma,
    Equals,
    Colon,
    At,
    Dot,
    Slash,
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokKind,
    pub span: Span,
}

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    pub errors: Vec<ErrorKind>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0, errors: Vec::new() }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, skip: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(skip)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while !matches!(self.peek_char(), None | Some('\n')) {
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.bump();
                    self.bump();
                    while self.peek_char().is_some() && !self.starts_with("*/") {
                        self.bump();
                    }
                    if self.peek_char().is_some() {
                        self.bump();
                        self.bump();
                    } else {
                        self.errors.push(ErrorKind::LexerError { detail: "unterminated block comment".into() });
                    }
                }
                _ => break,
            }
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_trivia();
        let start = self.pos;
        let c = match self.peek_char() {
            Some(c) => c,
            None => return Token { kind: TokKind::Eof, span: Span::new(start as u32, start as u32) },
        };
        let kind = match c {
            ':' => {
                self.bump();
                if self.starts_with(":=") {
                    self.bump();
                    self.bump();
                    TokKind::ColonColonEquals
                } else {
                    TokKind::Colon
                }
            }
            '(' => {
                self.bump();
                TokKind::LParen
            }
            ')' => {
                self.bump();
                TokKind::RParen
            }
            '[' => {
                self.bump();
                TokKind::LBrack
            }
            ']' => {
                self.bump();
                TokKind::RBrack
            }
            ',' => {
                self.bump();
                TokKind::Comma
            }
            '=' => {
                self.bump();
                TokKind::Equals
            }
            '@' => {
                self.bump();
                TokKind::At
            }
            '.' => {
                self.bump();
                TokKind::Dot
            }
            '/' => {
                self.bump();
                TokKind::Slash
            }
            '"' => return self.scan_quoted_string(start),
            c if c.is_alphabetic() || c == '_' => {
                let s = start;
                while matches!(self.peek_char(), Some(c) if c.is_alphanumeric() || c == '_') {
                    self.bump();
                }
                TokKind::Ident(self.src[s..self.pos].to_string())
            }
            other => {
                self.errors.push(ErrorKind::LexerError { detail: format!("unexpected character '{other}' in group file") });
                self.bump();
                TokKind::Ident(other.to_string())
            }
        };
        Token { kind, span: Span::new(start as u32, self.pos as u32) }
    }

    fn scan_quoted_string(&mut self, start: usize) -> Token {
        self.bump();
        let mut s = String::new();
        loop {
            match self.peek_char() {
                None => {
                    self.errors.push(ErrorKind::LexerError { detail: "unterminated string".into() });
                    break;
                }
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    match self.bump() {
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some('"') => s.push('"'),
                        Some('\\') => s.push('\\'),
                        Some(other) => s.push(other),
                        None => self.errors.push(ErrorKind::LexerError { detail: "unterminated string".into() }),
                    }
                }
                Some(c) => {
                    s.push(c);
                    self.bump();
                }
            }
        }
        Token { kind: TokKind::Str(s), span: Span::new(start as u32, self.pos as u32) }
    }

    pub fn peek_significant_char(&mut self) -> Option<char> {
        self.skip_trivia();
        self.peek_char()
    }

    /// Scans a `{args | body}` anonymous-template default value, counting
    /// brace depth so a `{` inside the body doesn't end the scan early.
    /// The outer braces are not included in the returned text.
    pub fn scan_brace_balanced(&mut self) -> (String, Span) {
        self.skip_trivia();
        let outer_start = self.pos;
        self.bump(); // '{'
        let start = self.pos;
        let mut depth = 1usize;
        loop {
            match self.peek_char() {
                None => {
                    self.errors.push(ErrorKind::LexerError { detail: "unterminated {...} default value".into() });
                    break;
                }
                Some('{') => {
                    depth += 1;
                    self.bump();
                }
                Some('}') => {
                    depth -= 1;
                    if depth == 0 {
                        let text = self.src[start..self.pos].to_string();
                        self.bump();
                        return (text, Span::new(outer_start as u32, self.pos as u32));
                    }
                    self.bump();
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
        (self.src[start..self.pos].to_string(), Span::new(outer_start as u32, self.pos as u32))
    }

    /// Called right after consuming `::=`. Scans whichever of `"..."`,
    /// `<<...>>`, or `<%...%>` starts the body and returns its unquoted
    /// text and source span (span covers the delimiters too, for
    /// diagnostics that point at the whole definition).
    pub fn scan_body(&mut self) -> (String, Span) {
        self.skip_trivia();
        let start = self.pos;
        if self.peek_char() == Some('"') {
            self.bump();
            let mut s = String::new();
            loop {
                match self.peek_char() {
                    None => {
                        self.errors.push(ErrorKind::LexerError { detail: "unterminated template body".into() });
                        break;
                    }
                    Some('"') => {
                        self.bump();
                        break;
                    }
                    Some('\\') => {
                        self.bump();
                        match self.bump() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some('"') => s.push('"'),
                            Some('\\') => s.push('\\'),
                            Some(other) => s.push(other),
                            None => {}
                        }
                    }
                    Some(c) => {
                        s.push(c);
                        self.bump();
                    }
                }
            }
            return (s, Span::new(start as u32, self.pos as u32));
        }
        if self.starts_with("<<") {
            self.bump();
            self.bump();
            // A line of only whitespace right after `<<` is dropped, matching
            // the common convention of writing the opening delimiter on its
            // own line for readability.
            if self.peek_char() == Some('\n') {
                self.bump();
            } else if self.peek_char() == Some('\r') {
                self.bump();
                if self.peek_char() == Some('\n') {
                    self.bump();
                }
            }
            let mut s = String::new();
            loop {
                if self.peek_char().is_none() {
                    self.errors.push(ErrorKind::LexerError { detail: "unterminated <<...>> template body".into() });
                    break;
                }
                if self.starts_with("\\>>") {
                    s.push_str(">>");
                    self.bump();
                    self.bump();
                    self.bump();
                    continue;
                }
                if self.starts_with(">>") {
                    self.bump();
                    self.bump();
                    break;
                }
                s.push(self.bump().unwrap());
            }
            return (s, Span::new(start as u32, self.pos as u32));
        }
        if self.starts_with("<%") {
            self.bump();
            self.bump();
            let mut s = String::new();
            loop {
                if self.peek_char().is_none() {
                    self.errors.push(ErrorKind::LexerError { detail: "unterminated <%...%> template body".into() });
                    break;
                }
                if self.starts_with("%>") {
                    self.bump();
                    self.bump();
                    break;
                }
                s.push(self.bump().unwrap());
            }
            return (s, Span::new(start as u32, self.pos as u32));
        }
        self.errors.push(ErrorKind::SyntaxError { detail: "expected a template body (\"...\", <<...>>, or <%...%>)".into() });
        (String::new(), Span::new(start as u32, start as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokKind> {
        let mut lx = Lexer::new(src);
        let mut out = Vec::new();
        loop {
            let t = lx.next_token();
            let done = t.kind == TokKind::Eof;
            out.push(t.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn recognizes_coloncolonequals_and_idents() {
        assert_eq!(
            kinds("greet(name) ::= "),
            vec![
                TokKind::Ident("greet".into()),
                TokKind::LParen,
                TokKind::Ident("name".into()),
                TokKind::RParen,
                TokKind::ColonColonEquals,
                TokKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(kinds("// a comment\nfoo /* block */ bar"), vec![TokKind::Ident("foo".into()), TokKind::Ident("bar".into()), TokKind::Eof]);
    }

    #[test]
    fn scan_body_reads_quoted_string() {
        let mut lx = Lexer::new("\"hello <name>\" rest");
        let (body, _) = lx.scan_body();
        assert_eq!(body, "hello <name>");
    }

    #[test]
    fn scan_body_reads_heredoc_with_escaped_close() {
        let mut lx = Lexer::new("<<\nline one\nclose \\>> literal\n>>");
        let (body, _) = lx.scan_body();
        assert_eq!(body, "line one\nclose >> literal\n");
    }
}
