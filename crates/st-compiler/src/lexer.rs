//! Hand-written, mode-switching lexer for template source.
//!
//! Two families of mode live on a stack rather than a flat enum, because a
//! sub-template body (`{x|...}`) re-enters "outside expression" scanning
//! from inside an expression, and must return to "inside expression"
//! scanning (not to the template's top level) once its closing `}` is
//! found.
//!
//! The lexer is pull-based (`next_token` is called on demand by the
//! parser) rather than pre-tokenizing the whole input, because whether
//! `{` opens a parameterized sub-template (`{x, y | body}`) or a bare one
//! (`{body}`) can only be decided by speculatively scanning ahead for a
//! `|` and rewinding if it is not found (§4.1). A pull lexer lets the
//! parser drive that speculation with a plain save/restore of the byte
//! cursor instead of needing general token-stream backtracking.

use st_core::{ErrorKind, Span};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Mode {
    /// Top-level template text.
    OutsideTop,
    /// Text inside an open sub-template body; unescaped `}` ends it.
    OutsideSub,
    /// Between the configured start/stop delimiters.
    Inside,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokKind {
    Text(String),
    Indent(String),
    Newline,
    LDelim,
    RDelim,
    LCurly,
    RCurly,
    Pipe,
    Ident(String),
    Str(String),
    If,
    Else,
    ElseIf,
    EndIf,
    Super,
    True,
    False,
    Dot,
    Comma,
    Colon,
    Semi,
    LParen,
    RParen,
    LBrack,
    RBrack,
    Bang,
    Equals,
    Slash,
    At,
    Ellipsis,
    AndAnd,
    OrOr,
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokKind,
    pub span: Span,
}

/// Cursor + mode stack shared by the lexer's pull interface.
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    mode_stack: Vec<Mode>,
    at_start_of_line: bool,
    delim_start: char,
    delim_stop: char,
    pub errors: Vec<ErrorKind>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str, delim_start: char, delim_stop: char) -> Self {
        Self {
            src,
            pos: 0,
            mode_stack: vec![Mode::OutsideTop],
            at_start_of_line: true,
            delim_start,
            delim_stop,
            errors: Vec::new(),
        }
    }

    /// For a sub-template body, rather than a whole template.
    pub fn new_for_subtemplate_body(src: &'a str, pos: usize, delim_start: char, delim_stop: char) -> Self {
        Self {
            src,
            pos,
            mode_stack: vec![Mode::OutsideSub],
            at_start_of_line: true,
            delim_start,
            delim_stop,
            errors: Vec::new(),
        }
    }

    /// Starts scanning already "inside" an expression, with no enclosing
    /// delimiter to return to. Used to parse a `{args | body}` default
    /// value lifted whole out of a group-file formal-argument list, whose
    /// outer braces the group-file lexer already stripped.
    pub fn new_for_inside(src: &'a str, delim_start: char, delim_stop: char) -> Self {
        Self {
            src,
            pos: 0,
            mode_stack: vec![Mode::Inside],
            at_start_of_line: true,
            delim_start,
            delim_stop,
            errors: Vec::new(),
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Save enough state to retry a speculative scan (used only while
    /// `Inside`, so the mode stack never needs saving alongside it).
    pub fn save(&self) -> usize {
        self.pos
    }

    pub fn restore(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, skip_bytes: usize) -> Option<char> {
        self.src[self.pos + skip_bytes..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    /// Current mode, after an `Inside` scan decided to open or close a
    /// sub-template (`try_enter_subtemplate` / the `}` branch of
    /// `lex_outside`).
    pub fn enter_subtemplate_body(&mut self) {
        self.mode_stack.push(Mode::OutsideSub);
        self.at_start_of_line = false;
    }

    pub fn next_token(&mut self) -> Token {
        match self.mode_stack.last().copied().unwrap_or(Mode::OutsideTop) {
            Mode::OutsideTop | Mode::OutsideSub => self.lex_outside(),
            Mode::Inside => self.lex_inside(),
        }
    }

    /// Speculatively scans `ident (',' ident)* '|'` right after an already
    /// consumed `{`. On success, consumes through the `|` and switches to
    /// `OutsideSub`; on failure, rewinds and switches to `OutsideSub`
    /// anyway (the `{` just opens a parameterless sub-template body).
    pub fn try_enter_subtemplate(&mut self) -> Vec<String> {
        let checkpoint = self.save();
        let mut params = Vec::new();
        loop {
            self.skip_inside_whitespace();
            match self.scan_ident() {
                Some(name) => params.push(name),
                None => {
                    self.restore(checkpoint);
                    params.clear();
                    break;
                }
            }
            self.skip_inside_whitespace();
            if self.peek_char() == Some(',') {
                self.bump();
                continue;
            }
            if self.peek_char() == Some('|') {
                self.bump();
                break;
            }
            self.restore(checkpoint);
            params.clear();
            break;
        }
        self.enter_subtemplate_body();
        params
    }

    fn skip_inside_whitespace(&mut self) {
        while matches!(self.peek_char(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn scan_ident(&mut self) -> Option<String> {
        let start = self.pos;
        match self.peek_char() {
            Some(c) if c.is_alphabetic() || c == '_' => {
                self.bump();
            }
            _ => return None,
        }
        while matches!(self.peek_char(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        Some(self.src[start..self.pos].to_string())
    }

    fn lex_outside(&mut self) -> Token {
        let in_sub = self.mode_stack.last() == Some(&Mode::OutsideSub);

        if self.at_start_of_line {
            let start = self.pos;
            while matches!(self.peek_char(), Some(' ') | Some('\t')) {
                self.bump();
            }
            self.at_start_of_line = false;
            if self.pos > start {
                return Token { kind: TokKind::Indent(self.src[start..self.pos].to_string()), span: Span::new(start as u32, self.pos as u32) };
            }
        }

        let start = self.pos;
        match self.peek_char() {
            None => Token { kind: TokKind::Eof, span: Span::new(start as u32, start as u32) },
            Some('\r') => {
                self.bump();
                if self.peek_char() == Some('\n') {
                    self.bump();
                }
                self.at_start_of_line = true;
                Token { kind: TokKind::Newline, span: Span::new(start as u32, self.pos as u32) }
            }
            Some('\n') => {
                self.bump();
                self.at_start_of_line = true;
                Token { kind: TokKind::Newline, span: Span::new(start as u32, self.pos as u32) }
            }
            Some('}') if in_sub => {
                self.bump();
                self.mode_stack.pop();
                Token { kind: TokKind::RCurly, span: Span::new(start as u32, self.pos as u32) }
            }
            Some(c) if c == self.delim_start => self.lex_delim_start(start),
            _ => self.lex_text_run(in_sub),
        }
    }

    fn lex_delim_start(&mut self, start: usize) -> Token {
        // `<! comment !>` — consumed and re-lexed as text-mode's next
        // token; comments never reach the parser.
        if self.peek_at(self.delim_start.len_utf8()) == Some('!') {
            self.bump();
            self.bump();
            while !self.starts_with(&format!("!{}", self.delim_stop)) && self.peek_char().is_some() {
                self.bump();
            }
            if self.peek_char().is_some() {
                self.bump();
                self.bump();
            } else {
                self.errors.push(ErrorKind::LexerError { detail: "unterminated comment".into() });
            }
            return self.lex_outside();
        }
        // `<\n>`, `<\t>`, `<\uXXXX>` — literal-character escapes written
        // between the delimiters, never entering Inside mode.
        if self.starts_with(&format!("{}\\n{}", self.delim_start, self.delim_stop)) {
            for _ in 0..(1 + 2 + 1) {
                self.bump();
            }
            return Token { kind: TokKind::Text("\n".into()), span: Span::new(start as u32, self.pos as u32) };
        }
        if self.starts_with(&format!("{}\\t{}", self.delim_start, self.delim_stop)) {
            for _ in 0..(1 + 2 + 1) {
                self.bump();
            }
            return Token { kind: TokKind::Text("\t".into()), span: Span::new(start as u32, self.pos as u32) };
        }
        if self.peek_at(self.delim_start.len_utf8()) == Some('\\')
            && self.peek_at(self.delim_start.len_utf8() + 1) == Some('u')
        {
            let hex_start = self.pos + self.delim_start.len_utf8() + 2;
            if hex_start + 4 <= self.src.len() {
                let hex = &self.src[hex_start..hex_start + 4];
                if hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    if let Ok(code) = u32::from_str_radix(hex, 16) {
                        if self.src[hex_start + 4..].starts_with(self.delim_stop) {
                            if let Some(ch) = char::from_u32(code) {
                                self.pos = hex_start + 4 + self.delim_stop.len_utf8();
                                return Token { kind: TokKind::Text(ch.to_string()), span: Span::new(start as u32, self.pos as u32) };
                            }
                        }
                    }
                }
            }
        }
        self.bump();
        self.mode_stack.push(Mode::Inside);
        Token { kind: TokKind::LDelim, span: Span::new(start as u32, self.pos as u32) }
    }

    fn lex_text_run(&mut self, in_sub: bool) -> Token {
        let start = self.pos;
        let mut text = String::new();
        loop {
            match self.peek_char() {
                None | Some('\n') | Some('\r') => break,
                Some('}') if in_sub => break,
                Some(c) if c == self.delim_start => break,
                Some('\\') => {
                    self.bump();
                    match self.peek_char() {
                        Some('\\') => {
                            text.push('\\');
                            self.bump();
                        }
                        Some(c) if c == self.delim_start => {
                            text.push(self.delim_start);
                            self.bump();
                        }
                        Some('}') => {
                            text.push('}');
                            self.bump();
                        }
                        Some(other) => {
                            self.errors.push(ErrorKind::LexerError { detail: format!("invalid escape \\{other}") });
                            text.push(other);
                            self.bump();
                        }
                        None => {
                            self.errors.push(ErrorKind::LexerError { detail: "unterminated escape".into() });
                        }
                    }
                }
                Some(c) => {
                    text.push(c);
                    self.bump();
                }
            }
        }
        Token { kind: TokKind::Text(text), span: Span::new(start as u32, self.pos as u32) }
    }

    fn lex_inside(&mut self) -> Token {
        while matches!(self.peek_char(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
        let start = self.pos;
        let c = match self.peek_char() {
            Some(c) => c,
            None => return Token { kind: TokKind::Eof, span: Span::new(start as u32, start as u32) },
        };
        if c == self.delim_stop {
            self.bump();
            self.mode_stack.pop();
            return Token { kind: TokKind::RDelim, span: Span::new(start as u32, self.pos as u32) };
        }
        let kind = match c {
            '"' => return self.lex_string(start),
            '{' => {
                self.bump();
                TokKind::LCurly
            }
            '.' => {
                self.bump();
                if self.starts_with("..") {
                    self.bump();
                    self.bump();
                    TokKind::Ellipsis
                } else {
                    TokKind::Dot
                }
            }
            ',' => {
                self.bump();
                TokKind::Comma
            }
            ':' => {
                self.bump();
                TokKind::Colon
            }
            ';' => {
                self.bump();
                TokKind::Semi
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
            '!' => {
                self.bump();
                TokKind::Bang
            }
            '=' => {
                self.bump();
                TokKind::Equals
            }
            '/' => {
                self.bump();
                TokKind::Slash
            }
            '@' => {
                self.bump();
                TokKind::At
            }
            '|' => {
                self.bump();
                if self.peek_char() == Some('|') {
                    self.bump();
                    TokKind::OrOr
                } else {
                    TokKind::Pipe
                }
            }
            '&' => {
                self.bump();
                if self.peek_char() == Some('&') {
                    self.bump();
                    TokKind::AndAnd
                } else {
                    self.errors.push(ErrorKind::LexerError { detail: "expected '&&'".into() });
                    TokKind::Bang
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let name = self.scan_ident().unwrap();
                return Token { kind: keyword_or_ident(&name), span: Span::new(start as u32, self.pos as u32) };
            }
            other => {
                self.errors.push(ErrorKind::LexerError { detail: format!("unexpected character '{other}'") });
                self.bump();
                TokKind::Ident(other.to_string())
            }
        };
        Token { kind, span: Span::new(start as u32, self.pos as u32) }
    }

    fn lex_string(&mut self, start: usize) -> Token {
        self.bump(); // opening quote
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
                    match self.peek_char() {
                        Some('n') => {
                            s.push('\n');
                            self.bump();
                        }
                        Some('t') => {
                            s.push('\t');
                            self.bump();
                        }
                        Some('"') => {
                            s.push('"');
                            self.bump();
                        }
                        Some('\\') => {
                            s.push('\\');
                            self.bump();
                        }
                        Some(other) => {
                            s.push(other);
                            self.bump();
                        }
                        None => {
                            self.errors.push(ErrorKind::LexerError { detail: "unterminated string".into() });
                        }
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
}

fn keyword_or_ident(name: &str) -> TokKind {
    match name {
        "if" => TokKind::If,
        "else" => TokKind::Else,
        "elseif" => TokKind::ElseIf,
        "endif" => TokKind::EndIf,
        "super" => TokKind::Super,
        "true" => TokKind::True,
        "false" => TokKind::False,
        _ => TokKind::Ident(name.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokKind> {
        let mut lx = Lexer::new(src, '<', '>');
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
    fn plain_text_has_no_expr_tokens() {
        assert_eq!(kinds("hello world"), vec![TokKind::Text("hello world".into()), TokKind::Eof]);
    }

    #[test]
    fn delimited_identifier_round_trips() {
        assert_eq!(
            kinds("hi <name>!"),
            vec![
                TokKind::Text("hi ".into()),
                TokKind::LDelim,
                TokKind::Ident("name".into()),
                TokKind::RDelim,
                TokKind::Text("!".into()),
                TokKind::Eof,
            ]
        );
    }

    #[test]
    fn escapes_decode_to_literal_characters() {
        assert_eq!(kinds(r"a \< b \\ c"), vec![TokKind::Text("a < b \\ c".into()), TokKind::Eof]);
    }

    #[test]
    fn leading_whitespace_is_an_indent_token() {
        assert_eq!(
            kinds("    <x>"),
            vec![
                TokKind::Indent("    ".into()),
                TokKind::LDelim,
                TokKind::Ident("x".into()),
                TokKind::RDelim,
                TokKind::Eof,
            ]
        );
    }

    #[test]
    fn comment_is_swallowed() {
        assert_eq!(kinds("a<! not real !>b"), vec![TokKind::Text("a".into()), TokKind::Text("b".into()), TokKind::Eof]);
    }

    #[test]
    fn newline_literal_escape_inside_delimiters() {
        assert_eq!(kinds(r"a<\n>b"), vec![TokKind::Text("a".into()), TokKind::Text("\n".into()), TokKind::Text("b".into()), TokKind::Eof]);
    }

    #[test]
    fn subtemplate_with_params_switches_mode_after_pipe() {
        let mut lx = Lexer::new("<xs:{x|<x>}>", '<', '>');
        assert_eq!(lx.next_token().kind, TokKind::LDelim);
        assert_eq!(lx.next_token().kind, TokKind::Ident("xs".into()));
        assert_eq!(lx.next_token().kind, TokKind::Colon);
        assert_eq!(lx.next_token().kind, TokKind::LCurly);
        let params = lx.try_enter_subtemplate();
        assert_eq!(params, vec!["x".to_string()]);
        assert_eq!(lx.next_token().kind, TokKind::LDelim);
        assert_eq!(lx.next_token().kind, TokKind::Ident("x".into()));
        assert_eq!(lx.next_token().kind, TokKind::RDelim);
        assert_eq!(lx.next_token().kind, TokKind::RCurly);
        assert_eq!(lx.next_token().kind, TokKind::RDelim);
    }

    #[test]
    fn subtemplate_without_params_rewinds_and_still_switches_mode() {
        let mut lx = Lexer::new("<xs:{<it>}>", '<', '>');
        lx.next_token(); // LDelim
        lx.next_token(); // xs
        lx.next_token(); // Colon
        lx.next_token(); // LCurly
        let params = lx.try_enter_subtemplate();
        assert!(params.is_empty());
        assert_eq!(lx.next_token().kind, TokKind::LDelim);
        assert_eq!(lx.next_token().kind, TokKind::Ident("it".into()));
    }
}
