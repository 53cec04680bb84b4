//! The indentation/wrap/anchor state machine that sits between the
//! interpreter and whatever sink the caller handed it.
//!
//! `Writer` and `NoIndentWriter` share one implementation; the only
//! difference is whether the indent/anchor stacks are consulted when a new
//! line starts (`NoIndentWriter::new` just builds a `Writer` with
//! `indent_enabled: false`). Indentation is applied lazily: pushing an
//! indent string records it, but nothing is written to the sink until the
//! next real character at the start of a line forces it out — an `INDENT`
//! whose body never writes anything never leaves a stray prefix behind.

use std::fmt;

/// Writes through to any [`fmt::Write`] sink: a `String` being built for
/// `ST::render`, or a caller-supplied formatter for `ST::write`.
pub struct Writer<W: fmt::Write> {
    sink: W,
    indents: Vec<String>,
    anchors: Vec<i64>,
    /// Current column, in characters, since the last newline. Starts every
    /// line at 0 and increments per character written (including
    /// indent/anchor padding).
    line_pos: i64,
    /// Total characters written to the sink so far, used by `index()` for
    /// source-to-output mapping in debug events.
    char_index: u64,
    line_width: Option<usize>,
    newline: String,
    indent_enabled: bool,
    at_start_of_line: bool,
}

impl<W: fmt::Write> Writer<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            indents: Vec::new(),
            anchors: Vec::new(),
            line_pos: 0,
            char_index: 0,
            line_width: None,
            newline: "\n".to_string(),
            indent_enabled: true,
            at_start_of_line: true,
        }
    }

    /// A writer that ignores the indent/anchor stacks entirely; used when
    /// a caller wants raw concatenation (e.g. rendering into a context
    /// that does its own formatting).
    pub fn no_indent(sink: W) -> Self {
        let mut w = Self::new(sink);
        w.indent_enabled = false;
        w
    }

    pub fn set_line_width(&mut self, width: Option<usize>) {
        self.line_width = width;
    }

    pub fn set_newline(&mut self, newline: impl Into<String>) {
        self.newline = newline.into();
    }

    pub fn push_indent(&mut self, s: impl Into<String>) {
        self.indents.push(s.into());
    }

    pub fn pop_indent(&mut self) {
        self.indents.pop();
    }

    /// Records the current column as an alignment target for subsequent
    /// lines; only takes effect once a new line is actually started.
    pub fn push_anchor(&mut self) {
        self.anchors.push(self.line_pos.max(0));
    }

    pub fn pop_anchor(&mut self) {
        self.anchors.pop();
    }

    pub fn index(&self) -> u64 {
        self.char_index
    }

    /// Unwraps the writer, returning its sink. Used by `ST::render` to
    /// pull the finished `String` back out of a `string_writer()`.
    pub fn into_inner(self) -> W {
        self.sink
    }

    /// Write `s`, substituting the configured newline sequence for every
    /// `\n` byte in the input and applying indent/anchor padding at the
    /// start of each line. Never triggers a wrap.
    pub fn write(&mut self, s: &str) -> fmt::Result {
        self.raw_write(s)
    }

    /// Same as [`Writer::write`] but checks the wrap threshold first: if
    /// wrapping is configured, the line is non-empty, and the current
    /// column is at or past `line_width`, `wrap` is emitted (itself
    /// re-entering indent/anchor handling, since it may embed a newline)
    /// before `s`.
    pub fn write_wrap(&mut self, s: &str, wrap: &str) -> fmt::Result {
        if let Some(width) = self.line_width {
            if !self.at_start_of_line && self.line_pos as usize >= width {
                self.raw_write(wrap)?;
            }
        }
        self.raw_write(s)
    }

    /// Like [`Writer::write`] but documents that separators never trigger
    /// a wrap check of their own — a wrap is only ever considered before
    /// the element that follows a separator, never before the separator
    /// itself.
    pub fn write_separator(&mut self, s: &str) -> fmt::Result {
        self.raw_write(s)
    }

    fn raw_write(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            if ch == '\n' {
                self.sink.write_str(&self.newline)?;
                self.char_index += self.newline.chars().count() as u64;
                self.line_pos = 0;
                self.at_start_of_line = true;
            } else {
                if self.at_start_of_line {
                    self.emit_indent_and_anchor()?;
                    self.at_start_of_line = false;
                }
                let mut buf = [0u8; 4];
                self.sink.write_str(ch.encode_utf8(&mut buf))?;
                self.char_index += 1;
                self.line_pos += 1;
            }
        }
        Ok(())
    }

    fn emit_indent_and_anchor(&mut self) -> fmt::Result {
        if !self.indent_enabled {
            return Ok(());
        }
        if !self.indents.is_empty() {
            let indent: String = self.indents.concat();
            self.sink.write_str(&indent)?;
            let len = indent.chars().count() as i64;
            self.char_index += len as u64;
            self.line_pos = len;
        }
        if let Some(&anchor) = self.anchors.last() {
            if anchor > self.line_pos {
                let pad = (anchor - self.line_pos) as usize;
                for _ in 0..pad {
                    self.sink.write_str(" ")?;
                }
                self.char_index += pad as u64;
                self.line_pos = anchor;
            }
        }
        Ok(())
    }
}

/// Builds a plain `Writer<String>`, the common case for `ST::render`.
pub fn string_writer() -> Writer<String> {
    Writer::new(String::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_write_passes_through() {
        let mut w = string_writer();
        w.write("hello").unwrap();
        assert_eq!(w.sink, "hello");
    }

    #[test]
    fn indent_applies_at_start_of_each_line() {
        let mut w = string_writer();
        w.push_indent("    ");
        w.write("a\nb").unwrap();
        assert_eq!(w.sink, "    a\n    b");
    }

    #[test]
    fn indent_is_never_emitted_if_nothing_is_written() {
        let mut w = string_writer();
        w.push_indent("    ");
        w.pop_indent();
        assert_eq!(w.sink, "");
    }

    #[test]
    fn anchor_pads_only_when_it_exceeds_indent_width() {
        let mut w = string_writer();
        w.write("ab").unwrap();
        w.push_anchor();
        w.write("\ncd").unwrap();
        assert_eq!(w.sink, "ab\n  cd");
    }

    #[test]
    fn anchor_never_pads_backward() {
        let mut w = string_writer();
        w.push_indent("    ");
        w.push_anchor();
        w.pop_indent();
        w.write("x\ny").unwrap();
        assert_eq!(w.sink, "x\n  y");
    }

    #[test]
    fn wrap_is_not_emitted_when_under_line_width() {
        let mut w = string_writer();
        w.set_line_width(Some(80));
        w.write_wrap("short", "\n").unwrap();
        assert_eq!(w.sink, "short");
    }

    #[test]
    fn wrap_emits_when_at_or_past_line_width() {
        let mut w = string_writer();
        w.set_line_width(Some(4));
        w.write("abcd").unwrap();
        w.write_wrap("e", "|").unwrap();
        assert_eq!(w.sink, "abcd|e");
    }

    #[test]
    fn no_indent_writer_ignores_pushed_indent() {
        let mut w = Writer::no_indent(String::new());
        w.push_indent("    ");
        w.write("a\nb").unwrap();
        assert_eq!(w.sink, "a\nb");
    }

    #[test]
    fn index_counts_every_emitted_character() {
        let mut w = string_writer();
        w.write("abc").unwrap();
        assert_eq!(w.index(), 3);
    }
}
