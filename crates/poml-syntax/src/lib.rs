//! Lexer and error-recovering CST parser for POML markup.
//!
//! ```
//! let parsed = poml_syntax::parse("<p>Hello {{ name }}</p>");
//! assert!(parsed.diagnostics.is_empty());
//! assert_eq!(parsed.root.children.len(), 1);
//! ```

pub mod cst;
pub mod diagnostic;
pub mod lexer;
pub mod parser;
pub mod token;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub use cst::{
    Attribute, AttributeValue, CloseTag, CommentNode, Element, ElementBody, ElementContent,
    ForIteratorValue, NodeKind, NodeRef, OpenTagPartial, PragmaNode, Quoted, QuotedPart,
    QuotedTemplate, Root, TemplateNode, TextNode,
};
pub use diagnostic::{Diagnostic, Diagnostics, Severity, Stage};
pub use lexer::{tokenize, tokenize_with, LexerOptions, DEFAULT_LITERAL_TAGS};
pub use token::{Token, TokenKind};

// ============================================================================
// Span
// ============================================================================

/// Half-open byte range `[start, end)` into a source string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    /// Like `contains` but also accepts the end offset, which is where a
    /// cursor sits right after the last character.
    pub fn contains_inclusive(&self, offset: usize) -> bool {
        self.start <= offset && offset <= self.end
    }

    pub fn contains_span(&self, other: Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Smallest span covering both.
    pub fn cover(&self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// Shift by a base offset.
    pub fn offset(&self, base: usize) -> Span {
        Span::new(self.start + base, self.end + base)
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// ============================================================================
// Location
// ============================================================================

/// Location in source code (1-indexed line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Location {
    pub line: usize,
    pub column: usize,
    pub byte_offset: usize,
}

impl Location {
    pub fn new(line: usize, column: usize, byte_offset: usize) -> Self {
        Self {
            line,
            column,
            byte_offset,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Converts byte offsets to line/column pairs.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            line_starts,
            len: source.len(),
        }
    }

    /// Columns count bytes from the start of the line.
    pub fn location(&self, offset: usize) -> Location {
        let offset = offset.min(self.len);
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        Location::new(line + 1, offset - self.line_starts[line] + 1, offset)
    }

    /// Inverse of `location`; out-of-range positions clamp to the source.
    pub fn offset(&self, line: usize, column: usize) -> usize {
        let Some(start) = line
            .checked_sub(1)
            .and_then(|l| self.line_starts.get(l))
        else {
            return self.len;
        };
        (start + column.saturating_sub(1)).min(self.len)
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum SyntaxError {
    #[error("{message} at line {line}, column {column}")]
    Invalid {
        message: String,
        line: usize,
        column: usize,
        span: Span,
    },

    #[error("invalid utf-8 in source")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

impl SyntaxError {
    fn from_diagnostic(diagnostic: &Diagnostic, index: &LineIndex) -> Self {
        let location = index.location(diagnostic.span.start);
        SyntaxError::Invalid {
            message: diagnostic.message.clone(),
            line: location.line,
            column: location.column,
            span: diagnostic.span,
        }
    }
}

// ============================================================================
// Names
// ============================================================================

/// Canonical form used to look up tag and attribute names: ASCII lowercase
/// with `-` and `_` removed, so `output-format`, `OutputFormat` and
/// `output_format` all agree.
pub fn normalize_tag_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '-' && *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Convert `max-tokens` or `max_tokens` to `maxTokens`.
pub fn to_camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for ch in name.chars() {
        if ch == '-' || ch == '_' {
            upper = !out.is_empty();
        } else if upper {
            out.push(ch.to_ascii_uppercase());
            upper = false;
        } else {
            out.push(ch);
        }
    }
    out
}

// ============================================================================
// Parsing
// ============================================================================

/// Result of parsing one document.
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub root: Root,
    pub diagnostics: Diagnostics,
}

/// Tokenize and parse with the default options.
pub fn parse(source: &str) -> ParseResult {
    parse_with(source, &LexerOptions::default())
}

pub fn parse_with(source: &str, options: &LexerOptions) -> ParseResult {
    let tokens = tokenize_with(source, options);
    tracing::trace!(tokens = tokens.len(), "tokenized source");
    let (root, diagnostics) = parser::parse_with(tokens, options);
    ParseResult { root, diagnostics }
}

/// Parse, failing on the first error diagnostic.
pub fn parse_strict(source: &str) -> Result<Root, SyntaxError> {
    let result = parse(source);
    if let Some(error) = result.diagnostics.first_error() {
        return Err(SyntaxError::from_diagnostic(error, &LineIndex::new(source)));
    }
    Ok(result.root)
}

/// Parse raw bytes, which must be valid UTF-8.
pub fn parse_bytes(source: &[u8]) -> Result<ParseResult, SyntaxError> {
    let source = std::str::from_utf8(source)?;
    Ok(parse(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_tag_name() {
        assert_eq!(normalize_tag_name("output-format"), "outputformat");
        assert_eq!(normalize_tag_name("OutputFormat"), "outputformat");
        assert_eq!(normalize_tag_name("output_format"), "outputformat");
    }

    #[test]
    fn test_to_camel_case() {
        assert_eq!(to_camel_case("max-tokens"), "maxTokens");
        assert_eq!(to_camel_case("top_p"), "topP");
        assert_eq!(to_camel_case("model"), "model");
    }

    #[test]
    fn test_line_index() {
        let index = LineIndex::new("ab\ncd\n");
        assert_eq!(index.location(0), Location::new(1, 1, 0));
        assert_eq!(index.location(3), Location::new(2, 1, 3));
        assert_eq!(index.location(4), Location::new(2, 2, 4));
        assert_eq!(index.offset(2, 2), 4);
        assert_eq!(index.line_count(), 3);
    }

    #[test]
    fn test_parse_strict_reports_location() {
        let err = parse_strict("<p>\n</q>").unwrap_err();
        match err {
            SyntaxError::Invalid { line, column, .. } => {
                assert_eq!(line, 2);
                assert_eq!(column, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_bytes_rejects_invalid_utf8() {
        assert!(matches!(
            parse_bytes(&[0x3c, 0xff]),
            Err(SyntaxError::InvalidUtf8(_))
        ));
    }
}
