//! Token types for the POML lexer.

use crate::Span;

/// Token kinds produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// `<` opening a tag
    OpenBracket,
    /// `</` opening a closing tag
    ClosingOpenBracket,
    /// `>`
    CloseBracket,
    /// `/>`
    SelfCloseBracket,
    /// `=` inside a tag
    Equals,
    /// Tag or attribute name
    Identifier,
    /// `"`
    DoubleQuote,
    /// `'`
    SingleQuote,
    /// `{{`
    TemplateOpen,
    /// `}}`
    TemplateClose,
    /// `<!--`
    CommentOpen,
    /// `-->`
    CommentClose,
    /// `@pragma` at the start of a comment body
    PragmaKeyword,
    /// Spaces, tabs and line breaks
    Whitespace,
    /// Any other run of text: markup text, quoted text, expression text,
    /// comment bodies and literal element bodies
    TextContent,
}

impl TokenKind {
    /// The fixed literal for punctuation kinds.
    pub fn literal(self) -> Option<&'static str> {
        match self {
            TokenKind::OpenBracket => Some("<"),
            TokenKind::ClosingOpenBracket => Some("</"),
            TokenKind::CloseBracket => Some(">"),
            TokenKind::SelfCloseBracket => Some("/>"),
            TokenKind::Equals => Some("="),
            TokenKind::DoubleQuote => Some("\""),
            TokenKind::SingleQuote => Some("'"),
            TokenKind::TemplateOpen => Some("{{"),
            TokenKind::TemplateClose => Some("}}"),
            TokenKind::CommentOpen => Some("<!--"),
            TokenKind::CommentClose => Some("-->"),
            TokenKind::PragmaKeyword => Some("@pragma"),
            TokenKind::Identifier | TokenKind::Whitespace | TokenKind::TextContent => None,
        }
    }
}

/// A token with its kind, source text and byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            text: text.into(),
            span,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }
}
