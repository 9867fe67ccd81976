//! Character cursor over MLIR snapshot text
//!
//! MLIR's printed form mixes a handful of fixed punctuation with open-ended
//! attribute and type syntax. The parser only needs to find the structural
//! boundaries (ops, regions, blocks, dictionaries, locations); everything in
//! between is kept as source slices. The lexer provides the scanning
//! primitives for that: identifiers, sigil-prefixed names, string literals
//! and bracket-balanced spans.

use crate::utils::{Error, Result, Span};

/// The lexer state
pub struct Lexer<'a> {
    /// Source text
    source: &'a str,
    /// Current byte position
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given snapshot text
    pub fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    pub fn source(&self) -> &'a str {
        self.source
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Get the current byte without advancing
    pub fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.pos).copied()
    }

    /// Get the byte `n` positions ahead without advancing
    pub fn peek_at(&self, n: usize) -> Option<u8> {
        self.source.as_bytes().get(self.pos + n).copied()
    }

    /// Advance one byte
    pub fn advance(&mut self) -> Option<u8> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    /// Byte-wise, so it is safe at any position, including inside a
    /// multi-byte character
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.source.as_bytes()[self.pos.min(self.source.len())..].starts_with(prefix.as_bytes())
    }

    /// Source text between `start` and the current position
    pub fn slice_from(&self, start: usize) -> &'a str {
        &self.source[start..self.pos]
    }

    /// Span from `start` to the current position
    pub fn span_from(&self, start: usize) -> Span {
        let before = &self.source[..start];
        let line = before.matches('\n').count() + 1;
        let column = start - before.rfind('\n').map(|i| i + 1).unwrap_or(0) + 1;
        Span::new(start, self.pos, line, column)
    }

    pub fn error(&self, start: usize, message: impl Into<String>) -> Error {
        Error::Parse { message: message.into(), span: self.span_from(start) }
    }

    pub fn eof_error(&self, start: usize, expected: &str) -> Error {
        Error::UnexpectedEof { expected: expected.to_string(), span: self.span_from(start) }
    }

    /// Skip whitespace, newlines and `//` comments
    pub fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.advance();
                }
                b'/' if self.peek_at(1) == Some(b'/') => self.skip_comment(),
                _ => break,
            }
        }
    }

    /// Skip spaces and tabs only
    pub fn skip_inline_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r')) {
            self.advance();
        }
    }

    /// Skip to (not past) the end of the line
    pub fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == b'\n' {
                break;
            }
            self.advance();
        }
    }

    /// True when only blanks or a comment remain on the current line
    pub fn rest_of_line_is_blank(&self) -> bool {
        self.line_is_blank_from(self.pos)
    }

    /// True when only blanks or a comment follow `pos` on its line
    pub fn line_is_blank_from(&self, pos: usize) -> bool {
        let rest = &self.source[pos.min(self.source.len())..];
        let line = rest.split('\n').next().unwrap_or("");
        let line = line.trim_start();
        line.is_empty() || line.starts_with("//")
    }

    pub fn expect(&mut self, expected: u8) -> Result<()> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c == expected => {
                self.advance();
                Ok(())
            }
            Some(c) => Err(self.error(
                start,
                format!("expected '{}', got '{}'", expected as char, c as char),
            )),
            None => Err(self.eof_error(start, &(expected as char).to_string())),
        }
    }

    /// Read a bare identifier: `[A-Za-z_][A-Za-z0-9_$.]*`
    pub fn read_identifier(&mut self) -> &'a str {
        let start = self.pos;
        if matches!(self.peek(), Some(c) if c.is_ascii_alphabetic() || c == b'_') {
            self.advance();
            while matches!(self.peek(), Some(c) if is_bare_char(c)) {
                self.advance();
            }
        }
        self.slice_from(start)
    }

    /// Read a sigil-prefixed name (`%x`, `^bb0`, `@sym`, `#loc3`, `!t`),
    /// including quoted forms such as `@"weird name"`
    pub fn read_prefixed(&mut self) -> Result<&'a str> {
        let start = self.pos;
        self.advance();
        if self.peek() == Some(b'"') {
            self.read_string()?;
        } else {
            while matches!(self.peek(), Some(c) if is_suffix_char(c)) {
                self.advance();
            }
        }
        Ok(self.slice_from(start))
    }

    /// Read a value reference with an optional `#N` use index or `:N` pack
    pub fn read_value(&mut self) -> Result<&'a str> {
        let start = self.pos;
        self.read_prefixed()?;
        if matches!(self.peek(), Some(b'#' | b':')) && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            self.advance();
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        Ok(self.slice_from(start))
    }

    /// Read a `"..."` literal with escapes, returning it quoted
    pub fn read_string(&mut self) -> Result<&'a str> {
        let start = self.pos;
        self.expect(b'"')?;
        loop {
            match self.advance() {
                Some(b'\\') => {
                    self.advance();
                }
                Some(b'"') => break,
                Some(_) => {}
                None => return Err(self.eof_error(start, "closing '\"'")),
            }
        }
        Ok(self.slice_from(start))
    }

    /// Consume a bracketed span starting at the current opening bracket and
    /// return it, brackets included. Strings are skipped; `<` only nests
    /// when it follows an identifier character or opens `<{`.
    pub fn scan_balanced(&mut self) -> Result<&'a str> {
        let start = self.pos;
        let mut stack: Vec<u8> = Vec::new();
        loop {
            let c = match self.peek() {
                Some(c) => c,
                None => return Err(self.eof_error(start, "closing bracket")),
            };
            match c {
                b'"' => {
                    self.read_string()?;
                    continue;
                }
                b'-' if self.peek_at(1) == Some(b'>') => {
                    self.advance();
                }
                b'(' | b'[' | b'{' => stack.push(c),
                b'<' if self.opens_angle() || self.pos == start => stack.push(c),
                b')' | b']' | b'}' => {
                    // a stray `<` (comparison) cannot outlive its bracket
                    while stack.last() == Some(&b'<') && stack.len() > 1 {
                        stack.pop();
                    }
                    if stack.pop() != Some(opening_of(c)) {
                        return Err(self.error(start, format!("unbalanced '{}'", c as char)));
                    }
                }
                b'>' if stack.last() == Some(&b'<') => {
                    stack.pop();
                }
                _ => {}
            }
            self.advance();
            if stack.is_empty() {
                return Ok(self.slice_from(start));
            }
        }
    }

    /// Whether the `<` at the current position opens a nested group
    pub fn opens_angle(&self) -> bool {
        let prev = self.pos.checked_sub(1).and_then(|i| self.source.as_bytes().get(i).copied());
        matches!(prev, Some(c) if is_suffix_char(c) || c == b'>' || c == b'"')
            || self.peek_at(1) == Some(b'{')
    }

    /// Consume text up to the end of the line, stopping early at a `}` that
    /// closes an enclosing construct and, if asked, at a top-level `loc(`
    pub fn scan_line_tail(&mut self, stop_at_location: bool) -> Result<&'a str> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            match c {
                b'\n' | b'}' => break,
                b'/' if self.peek_at(1) == Some(b'/') => break,
                b'l' if stop_at_location && self.at_location_keyword() => break,
                b'"' => {
                    self.read_string()?;
                }
                b'(' | b'[' | b'{' => {
                    self.scan_balanced()?;
                }
                b'<' if self.opens_angle() => {
                    self.scan_balanced()?;
                }
                _ => {
                    self.advance();
                }
            }
        }
        Ok(self.slice_from(start).trim_end())
    }

    /// True at a `loc(` that is not the tail of a longer identifier
    pub fn at_location_keyword(&self) -> bool {
        if !self.starts_with("loc(") {
            return false;
        }
        let prev = self.pos.checked_sub(1).and_then(|i| self.source.as_bytes().get(i).copied());
        !matches!(prev, Some(c) if is_suffix_char(c))
    }
}

pub fn is_bare_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'$' | b'.')
}

pub fn is_suffix_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'_' | b'$' | b'.' | b'-')
}

fn opening_of(close: u8) -> u8 {
    match close {
        b')' => b'(',
        b']' => b'[',
        _ => b'{',
    }
}

/// Split `text` at top-level occurrences of `sep`, ignoring separators
/// inside strings or brackets. Empty pieces are dropped.
pub fn split_top_level(text: &str, sep: u8) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut angle = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut last = 0;
    let bytes = text.as_bytes();
    for (i, &c) in bytes.iter().enumerate() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            b'"' => in_string = true,
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'<' if i > 0 && (is_suffix_char(bytes[i - 1]) || bytes[i - 1] == b'>') => angle += 1,
            b'>' if i > 0 && bytes[i - 1] == b'-' => {}
            b'>' if angle > 0 => angle -= 1,
            _ if c == sep && depth == 0 && angle == 0 => {
                parts.push(text[last..i].trim());
                last = i + 1;
            }
            _ => {}
        }
    }
    parts.push(text[last..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Byte offset of the first top-level `loc(` in `text`
pub fn find_top_level_location(text: &str) -> Option<usize> {
    let mut lexer = Lexer::new(text);
    while let Some(c) = lexer.peek() {
        match c {
            b'l' if lexer.at_location_keyword() => return Some(lexer.pos()),
            b'"' => {
                lexer.read_string().ok()?;
            }
            b'(' | b'[' | b'{' => {
                lexer.scan_balanced().ok()?;
            }
            b'<' if lexer.opens_angle() => {
                lexer.scan_balanced().ok()?;
            }
            _ => {
                lexer.advance();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_identifiers_and_values() {
        let mut lexer = Lexer::new("arith.addi %0#1 %arg0:2 @\"a b\"");
        assert_eq!(lexer.read_identifier(), "arith.addi");
        lexer.skip_whitespace();
        assert_eq!(lexer.read_value().unwrap(), "%0#1");
        lexer.skip_whitespace();
        assert_eq!(lexer.read_value().unwrap(), "%arg0:2");
        lexer.skip_whitespace();
        assert_eq!(lexer.read_prefixed().unwrap(), "@\"a b\"");
        assert_eq!(lexer.peek(), None);
    }

    #[test]
    fn test_scan_balanced_nested() {
        let mut lexer = Lexer::new("(tensor<4xf32>, \"a)b\") -> i32");
        assert_eq!(lexer.scan_balanced().unwrap(), "(tensor<4xf32>, \"a)b\")");

        let mut lexer = Lexer::new("<{map = affine_map<(d0) -> (d0)>}> rest");
        assert_eq!(lexer.scan_balanced().unwrap(), "<{map = affine_map<(d0) -> (d0)>}>");
    }

    #[test]
    fn test_scan_balanced_unterminated() {
        let mut lexer = Lexer::new("(a, b");
        assert!(matches!(lexer.scan_balanced(), Err(Error::UnexpectedEof { .. })));

        let mut lexer = Lexer::new("(a]");
        assert!(matches!(lexer.scan_balanced(), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_line_tail_stops_at_location() {
        let mut lexer = Lexer::new("(i32, i32) -> i32 loc(#loc1)\nnext");
        assert_eq!(lexer.scan_line_tail(true).unwrap(), "(i32, i32) -> i32");
        assert!(lexer.starts_with("loc(#loc1)"));

        let mut lexer = Lexer::new("loc(\"a.mlir\":1:2) // trailing\n");
        assert_eq!(lexer.scan_line_tail(false).unwrap(), "loc(\"a.mlir\":1:2)");
    }

    #[test]
    fn test_starts_with_inside_multibyte_char() {
        let mut lexer = Lexer::new("\"café\" #-}");
        while lexer.peek() != Some(b'\xA9') {
            lexer.advance();
        }
        assert!(!lexer.starts_with("#-}"));
        lexer.advance();
        assert!(!lexer.starts_with("#-}"));
        lexer.advance();
        lexer.advance();
        assert!(lexer.starts_with("#-}"));
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(
            split_top_level("a = 1, b = dense<[1, 2]> : tensor<2xi32>, c = \"x,y\", d", b','),
            vec!["a = 1", "b = dense<[1, 2]> : tensor<2xi32>", "c = \"x,y\"", "d"]
        );
        assert_eq!(split_top_level("", b','), Vec::<&str>::new());
    }

    #[test]
    fn test_find_top_level_location() {
        assert_eq!(find_top_level_location("%a: i32 loc(\"x\":1:2)"), Some(8));
        assert_eq!(find_top_level_location("%a: !t<\"loc(\">"), None);
        assert_eq!(find_top_level_location("%a: i32"), None);
    }

    #[test]
    fn test_span_line_and_column() {
        let mut lexer = Lexer::new("ab\ncd");
        lexer.advance();
        lexer.advance();
        lexer.advance();
        lexer.advance();
        let span = lexer.span_from(3);
        assert_eq!((span.line, span.column), (2, 1));
    }
}
