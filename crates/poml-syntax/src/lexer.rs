//! Hand-written, context-sensitive lexer for POML markup.
//!
//! The lexer is a mode stack:
//! - Markup: text, tags, comments and `{{` templates
//! - Tag: names, `=`, quotes, `>` and `/>`
//! - Quote: quoted attribute text, re-entering Template on `{{`
//! - Template: expression text up to the matching `}}`
//! - Literal: verbatim body of a literal element up to its own close tag
//!
//! Tokenizing never fails. Anything the current mode does not recognize
//! becomes a `TextContent` token and is left for the parser to judge.

use crate::token::{Token, TokenKind};
use crate::{normalize_tag_name, Span};

/// Tags whose bodies are captured verbatim by default.
pub const DEFAULT_LITERAL_TAGS: &[&str] = &[
    "text",
    "output-schema",
    "tool-definition",
    "tool",
    "stylesheet",
];

/// Lexer configuration.
#[derive(Debug, Clone)]
pub struct LexerOptions {
    literal_tags: Vec<String>,
}

impl Default for LexerOptions {
    fn default() -> Self {
        Self {
            literal_tags: DEFAULT_LITERAL_TAGS
                .iter()
                .map(|name| normalize_tag_name(name))
                .collect(),
        }
    }
}

impl LexerOptions {
    /// Register an additional literal tag.
    pub fn with_literal_tag(mut self, name: &str) -> Self {
        let key = normalize_tag_name(name);
        if !self.literal_tags.contains(&key) {
            self.literal_tags.push(key);
        }
        self
    }

    pub fn is_literal_tag(&self, name: &str) -> bool {
        let key = normalize_tag_name(name);
        self.literal_tags.iter().any(|tag| *tag == key)
    }
}

/// Tokenize a source string with the default options.
pub fn tokenize(source: &str) -> Vec<Token> {
    tokenize_with(source, &LexerOptions::default())
}

/// Tokenize a source string.
pub fn tokenize_with(source: &str, options: &LexerOptions) -> Vec<Token> {
    let mut lexer = Lexer::new(source, options);
    lexer.run();
    lexer.tokens
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Mode {
    Markup,
    Tag,
    Quote(char),
    Template,
    Literal(String),
}

struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    modes: Vec<Mode>,
    tokens: Vec<Token>,
    options: &'a LexerOptions,
    tag_name: Option<String>,
    tag_is_closing: bool,
}

impl<'a> Lexer<'a> {
    const TEMPLATE_OPEN: &'static str = "{{";
    const TEMPLATE_CLOSE: &'static str = "}}";
    const COMMENT_OPEN: &'static str = "<!--";
    const COMMENT_CLOSE: &'static str = "-->";
    const PRAGMA: &'static str = "@pragma";

    fn new(source: &'a str, options: &'a LexerOptions) -> Self {
        Self {
            source,
            pos: 0,
            modes: vec![Mode::Markup],
            tokens: Vec::new(),
            options,
            tag_name: None,
            tag_is_closing: false,
        }
    }

    fn run(&mut self) {
        while !self.eof() {
            let mode = self.modes.last().cloned().unwrap_or(Mode::Markup);
            match mode {
                Mode::Markup => self.lex_markup(),
                Mode::Tag => self.lex_tag(),
                Mode::Quote(quote) => self.lex_quote(quote),
                Mode::Template => self.lex_template(),
                Mode::Literal(name) => self.lex_literal(&name),
            }
        }
    }

    // ------------------------------------------------------------------
    // Modes
    // ------------------------------------------------------------------

    fn lex_markup(&mut self) {
        if self.looking_at(Self::COMMENT_OPEN) {
            self.lex_comment();
        } else if self.looking_at("</") && self.is_name_start_at(self.pos + 2) {
            self.emit_fixed(TokenKind::ClosingOpenBracket);
            self.enter_tag(true);
        } else if self.looking_at("<") && self.is_name_start_at(self.pos + 1) {
            self.emit_fixed(TokenKind::OpenBracket);
            self.enter_tag(false);
        } else if self.looking_at(Self::TEMPLATE_OPEN) {
            self.emit_fixed(TokenKind::TemplateOpen);
            self.modes.push(Mode::Template);
        } else if self.peek().is_some_and(is_whitespace) {
            self.lex_whitespace();
        } else {
            let start = self.pos;
            // Always consume at least one char so a stray `<` makes progress.
            self.bump();
            while let Some(ch) = self.peek() {
                if is_whitespace(ch) || self.at_markup_boundary() {
                    break;
                }
                self.bump();
            }
            self.emit_from(TokenKind::TextContent, start);
        }
    }

    fn lex_tag(&mut self) {
        let Some(ch) = self.peek() else {
            return;
        };
        if is_whitespace(ch) {
            self.lex_whitespace();
        } else if is_name_start(ch) {
            let start = self.pos;
            while self.peek().is_some_and(is_name_continue) {
                self.bump();
            }
            if self.tag_name.is_none() {
                self.tag_name = Some(self.source[start..self.pos].to_string());
            }
            self.emit_from(TokenKind::Identifier, start);
        } else if self.looking_at("/>") {
            self.emit_fixed(TokenKind::SelfCloseBracket);
            self.leave_tag();
        } else if ch == '>' {
            self.emit_fixed(TokenKind::CloseBracket);
            let literal = match (&self.tag_name, self.tag_is_closing) {
                (Some(name), false) if self.options.is_literal_tag(name) => Some(name.clone()),
                _ => None,
            };
            self.leave_tag();
            if let Some(name) = literal {
                self.modes.push(Mode::Literal(name));
            }
        } else if ch == '=' {
            self.emit_fixed(TokenKind::Equals);
        } else if ch == '"' {
            self.emit_fixed(TokenKind::DoubleQuote);
            self.modes.push(Mode::Quote('"'));
        } else if ch == '\'' {
            self.emit_fixed(TokenKind::SingleQuote);
            self.modes.push(Mode::Quote('\''));
        } else if self.looking_at(Self::TEMPLATE_OPEN) {
            self.emit_fixed(TokenKind::TemplateOpen);
            self.modes.push(Mode::Template);
        } else if ch == '<' {
            // Unterminated tag; let markup mode take over without consuming.
            self.leave_tag();
        } else {
            let start = self.pos;
            self.bump();
            while let Some(next) = self.peek() {
                if is_whitespace(next)
                    || is_name_start(next)
                    || matches!(next, '>' | '=' | '"' | '\'' | '<' | '/')
                    || self.looking_at(Self::TEMPLATE_OPEN)
                {
                    break;
                }
                self.bump();
            }
            self.emit_from(TokenKind::TextContent, start);
        }
    }

    fn lex_quote(&mut self, quote: char) {
        if self.peek() == Some(quote) {
            let kind = if quote == '"' {
                TokenKind::DoubleQuote
            } else {
                TokenKind::SingleQuote
            };
            self.emit_fixed(kind);
            self.modes.pop();
        } else if self.looking_at(Self::TEMPLATE_OPEN) {
            self.emit_fixed(TokenKind::TemplateOpen);
            self.modes.push(Mode::Template);
        } else {
            let start = self.pos;
            while let Some(ch) = self.peek() {
                if ch == quote || self.looking_at(Self::TEMPLATE_OPEN) {
                    break;
                }
                self.bump();
            }
            self.emit_from(TokenKind::TextContent, start);
        }
    }

    fn lex_template(&mut self) {
        if self.peek().is_some_and(is_whitespace) {
            self.lex_whitespace();
        }
        let start = self.pos;
        let close = self.find_template_close();
        let body_end = close.unwrap_or(self.source.len());
        let body = &self.source[start..body_end];
        let trimmed_len = body.trim_end_matches(is_whitespace).len();

        if trimmed_len > 0 {
            self.pos = start + trimmed_len;
            self.emit_from(TokenKind::TextContent, start);
        }
        if self.pos < body_end {
            let ws_start = self.pos;
            self.pos = body_end;
            self.emit_from(TokenKind::Whitespace, ws_start);
        }
        if close.is_some() {
            self.emit_fixed(TokenKind::TemplateClose);
        }
        self.modes.pop();
    }

    fn lex_literal(&mut self, name: &str) {
        let start = self.pos;
        let end = self.find_literal_close(name).unwrap_or(self.source.len());
        if end > start {
            self.pos = end;
            self.emit_from(TokenKind::TextContent, start);
        }
        self.modes.pop();
    }

    fn lex_comment(&mut self) {
        self.emit_fixed(TokenKind::CommentOpen);
        let body_start = self.pos;
        let close = self.source[body_start..]
            .find(Self::COMMENT_CLOSE)
            .map(|idx| body_start + idx);
        let body_end = close.unwrap_or(self.source.len());
        let body = &self.source[body_start..body_end];

        if body.trim_start().starts_with(Self::PRAGMA) {
            while self.pos < body_end {
                if self.peek().is_some_and(is_whitespace) {
                    self.lex_whitespace_until(body_end);
                } else if self.looking_at(Self::PRAGMA) {
                    self.emit_fixed(TokenKind::PragmaKeyword);
                } else {
                    let start = self.pos;
                    while self.pos < body_end && !self.peek().is_some_and(is_whitespace) {
                        self.bump();
                    }
                    self.emit_from(TokenKind::TextContent, start);
                }
            }
        } else if body_end > body_start {
            self.pos = body_end;
            self.emit_from(TokenKind::TextContent, body_start);
        }

        if close.is_some() {
            self.emit_fixed(TokenKind::CommentClose);
        }
    }

    // ------------------------------------------------------------------
    // Scanning helpers
    // ------------------------------------------------------------------

    /// Locate the `}}` that ends the current template, skipping string
    /// literals and balanced object braces.
    fn find_template_close(&self) -> Option<usize> {
        let bytes = self.source.as_bytes();
        let mut i = self.pos;
        let mut depth = 0usize;
        let mut quote: Option<u8> = None;

        while i < bytes.len() {
            let b = bytes[i];
            if let Some(q) = quote {
                if b == b'\\' {
                    i += 2;
                    continue;
                }
                if b == q {
                    quote = None;
                }
                i += 1;
                continue;
            }
            match b {
                b'"' | b'\'' | b'`' => quote = Some(b),
                b'{' => depth += 1,
                b'}' if depth > 0 => depth -= 1,
                b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
                _ => {}
            }
            i += 1;
        }
        None
    }

    /// Locate `</name` followed by optional whitespace and `>`.
    fn find_literal_close(&self, name: &str) -> Option<usize> {
        let rest = &self.source[self.pos..];
        let mut offset = 0;
        while let Some(idx) = rest[offset..].find("</") {
            let at = offset + idx;
            let after = &rest[at + 2..];
            if after.len() >= name.len()
                && after.is_char_boundary(name.len())
                && after[..name.len()].eq_ignore_ascii_case(name)
            {
                let tail = after[name.len()..].trim_start_matches(is_whitespace);
                if tail.starts_with('>') {
                    return Some(self.pos + at);
                }
            }
            offset = at + 2;
        }
        None
    }

    fn at_markup_boundary(&self) -> bool {
        self.looking_at(Self::TEMPLATE_OPEN)
            || self.looking_at(Self::COMMENT_OPEN)
            || (self.looking_at("</") && self.is_name_start_at(self.pos + 2))
            || (self.looking_at("<") && self.is_name_start_at(self.pos + 1))
    }

    fn lex_whitespace(&mut self) {
        self.lex_whitespace_until(self.source.len());
    }

    fn lex_whitespace_until(&mut self, limit: usize) {
        let start = self.pos;
        while self.pos < limit && self.peek().is_some_and(is_whitespace) {
            self.bump();
        }
        self.emit_from(TokenKind::Whitespace, start);
    }

    fn enter_tag(&mut self, closing: bool) {
        self.tag_name = None;
        self.tag_is_closing = closing;
        self.modes.push(Mode::Tag);
    }

    fn leave_tag(&mut self) {
        self.tag_name = None;
        self.tag_is_closing = false;
        self.modes.pop();
    }

    fn eof(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(ch) = self.peek() {
            self.pos += ch.len_utf8();
        }
    }

    fn looking_at(&self, pattern: &str) -> bool {
        self.source[self.pos..].starts_with(pattern)
    }

    fn is_name_start_at(&self, pos: usize) -> bool {
        self.source
            .get(pos..)
            .and_then(|rest| rest.chars().next())
            .is_some_and(is_name_start)
    }

    /// Emit a punctuation token and advance past its literal.
    fn emit_fixed(&mut self, kind: TokenKind) {
        let literal = kind.literal().unwrap_or_default();
        let start = self.pos;
        self.pos += literal.len();
        self.emit_from(kind, start);
    }

    fn emit_from(&mut self, kind: TokenKind, start: usize) {
        if self.pos == start {
            return;
        }
        let span = Span::new(start, self.pos);
        self.tokens
            .push(Token::new(kind, &self.source[start..self.pos], span));
    }
}

fn is_whitespace(ch: char) -> bool {
    matches!(ch, ' ' | '\t' | '\r' | '\n')
}

fn is_name_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_name_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_plain_text_keeps_whitespace() {
        let tokens = tokenize("Hello  world");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::TextContent,
                TokenKind::Whitespace,
                TokenKind::TextContent
            ]
        );
        assert_eq!(tokens[1].text, "  ");
    }

    #[test]
    fn test_element_with_attribute() {
        let tokens = tokenize(r#"<p speaker="ai">hi</p>"#);
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::OpenBracket,
                TokenKind::Identifier,
                TokenKind::Whitespace,
                TokenKind::Identifier,
                TokenKind::Equals,
                TokenKind::DoubleQuote,
                TokenKind::TextContent,
                TokenKind::DoubleQuote,
                TokenKind::CloseBracket,
                TokenKind::TextContent,
                TokenKind::ClosingOpenBracket,
                TokenKind::Identifier,
                TokenKind::CloseBracket,
            ]
        );
    }

    #[test]
    fn test_template_ignores_close_inside_string() {
        let tokens = tokenize("{{ '}}' + x }}");
        let text: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::TextContent)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(text, vec!["'}}' + x"]);
        assert_eq!(tokens.last().unwrap().kind, TokenKind::TemplateClose);
    }

    #[test]
    fn test_template_with_object_literal() {
        let tokens = tokenize("{{ {a: {b: 1}} }}");
        assert_eq!(tokens[2].text, "{a: {b: 1}}");
        assert_eq!(tokens.last().unwrap().kind, TokenKind::TemplateClose);
    }

    #[test]
    fn test_template_inside_quote() {
        let tokens = tokenize(r#"<p a="x {{y}} z">"#);
        let k = kinds(&tokens);
        assert!(k.contains(&TokenKind::TemplateOpen));
        assert!(k.contains(&TokenKind::TemplateClose));
        assert_eq!(tokens.last().unwrap().kind, TokenKind::CloseBracket);
    }

    #[test]
    fn test_literal_element_is_verbatim() {
        let tokens = tokenize("<text><b>{{x}}</i></text>");
        assert_eq!(tokens[3].kind, TokenKind::TextContent);
        assert_eq!(tokens[3].text, "<b>{{x}}</i>");
        assert_eq!(tokens[4].kind, TokenKind::ClosingOpenBracket);
    }

    #[test]
    fn test_unclosed_literal_runs_to_end() {
        let tokens = tokenize("<text>a < b");
        assert_eq!(tokens.last().unwrap().text, "a < b");
    }

    #[test]
    fn test_comment_and_pragma() {
        let tokens = tokenize("<!-- note --><!-- @pragma components -table -->");
        let k = kinds(&tokens);
        assert_eq!(k[0], TokenKind::CommentOpen);
        assert_eq!(tokens[1].text, " note ");
        assert!(k.contains(&TokenKind::PragmaKeyword));
        assert_eq!(k.iter().filter(|k| **k == TokenKind::CommentClose).count(), 2);
    }

    #[test]
    fn test_stray_less_than_is_text() {
        let tokens = tokenize("a < b");
        assert!(tokens.iter().all(|t| matches!(
            t.kind,
            TokenKind::TextContent | TokenKind::Whitespace
        )));
    }

    #[test]
    fn test_spans_cover_source() {
        let source = "<p a='1'>x {{ y }}</p><!-- c -->";
        let tokens = tokenize(source);
        let rebuilt: String = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(rebuilt, source);
        for pair in tokens.windows(2) {
            assert_eq!(pair[0].span.end, pair[1].span.start);
        }
    }
}
