//! Recursive descent parser producing the CST.
//!
//! The parser never aborts. Malformed regions are recorded as diagnostics
//! and recovered locally so the rest of the document still parses:
//! - a close tag that does not match the innermost open element becomes
//!   plain text at the current depth (ancestors are not searched)
//! - an element still open at end of input is closed implicitly
//! - an empty or unterminated `{{ }}` keeps a template node with what it has

use once_cell::sync::Lazy;
use regex::Regex;

use crate::cst::{
    Attribute, AttributeValue, CloseTag, CommentNode, Element, ElementBody, ElementContent,
    ForIteratorValue, OpenTagPartial, PragmaNode, Quoted, QuotedPart, QuotedTemplate, Root,
    TemplateNode, TextNode,
};
use crate::diagnostic::{Diagnostics, Stage};
use crate::lexer::LexerOptions;
use crate::token::{Token, TokenKind};
use crate::Span;

/// Element nesting the parser descends into. Anything deeper is kept as text.
pub const MAX_ELEMENT_DEPTH: usize = 128;

static FOR_ITERATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_$][A-Za-z0-9_$]*)\s+in\s+(\S(?s:.*?))\s*$")
        .expect("for-iterator pattern is valid")
});

/// Parse a token stream with the default lexer options.
pub fn parse(tokens: Vec<Token>) -> (Root, Diagnostics) {
    parse_with(tokens, &LexerOptions::default())
}

/// Parse a token stream. `options` must be the ones the tokens were lexed
/// with so literal elements are recognized consistently.
pub fn parse_with(tokens: Vec<Token>, options: &LexerOptions) -> (Root, Diagnostics) {
    let mut parser = Parser::new(tokens, options);
    let root = parser.parse_root();
    (root, parser.diagnostics)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    options: &'a LexerOptions,
    diagnostics: Diagnostics,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Token>, options: &'a LexerOptions) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            options,
            diagnostics: Diagnostics::new(),
        }
    }

    fn parse_root(&mut self) -> Root {
        let end = self.tokens.last().map_or(0, |t| t.span.end);
        let (children, _) = self.parse_contents(None);
        Root {
            children,
            span: Span::new(0, end),
        }
    }

    /// Parse element content until end of input or the close tag of
    /// `open_name`. Returns the children and the matching close tag.
    fn parse_contents(
        &mut self,
        open_name: Option<&str>,
    ) -> (Vec<ElementContent>, Option<CloseTag>) {
        let mut children = Vec::new();

        while let Some(token) = self.current() {
            match token.kind {
                TokenKind::OpenBracket if self.depth >= MAX_ELEMENT_DEPTH => {
                    let text = self.skip_nested_element();
                    children.push(ElementContent::Text(text));
                }
                TokenKind::OpenBracket => {
                    let element = self.parse_element();
                    children.push(ElementContent::Element(element));
                }
                TokenKind::ClosingOpenBracket => {
                    let close = self.parse_close_tag();
                    match open_name {
                        Some(name) if name.eq_ignore_ascii_case(&close.name) => {
                            return (children, Some(close));
                        }
                        Some(name) => {
                            self.diagnostics.error(
                                close.span,
                                format!(
                                    "Unexpected closing tag </{}>; expected </{}>",
                                    close.name, name
                                ),
                                Stage::Parse,
                            );
                            children.push(self.close_tag_as_text(&close));
                        }
                        None => {
                            self.diagnostics.error(
                                close.span,
                                format!(
                                    "Closing tag </{}> has no matching open tag",
                                    close.name
                                ),
                                Stage::Parse,
                            );
                            children.push(self.close_tag_as_text(&close));
                        }
                    }
                }
                TokenKind::TemplateOpen => {
                    let template = self.parse_template();
                    children.push(ElementContent::Template(template));
                }
                TokenKind::CommentOpen => {
                    children.push(self.parse_comment());
                }
                _ => {
                    children.push(ElementContent::Text(self.parse_text()));
                }
            }
        }

        (children, None)
    }

    fn parse_text(&mut self) -> TextNode {
        let start = self.current_start();
        let mut value = String::new();
        let mut end = start;
        while let Some(token) = self.current() {
            if matches!(
                token.kind,
                TokenKind::OpenBracket
                    | TokenKind::ClosingOpenBracket
                    | TokenKind::TemplateOpen
                    | TokenKind::CommentOpen
            ) && end > start
            {
                break;
            }
            value.push_str(&token.text);
            end = token.span.end;
            self.pos += 1;
        }
        TextNode {
            value,
            span: Span::new(start, end),
        }
    }

    /// Consume an element too deeply nested to parse, up to its balancing
    /// close tag, and keep its source as text.
    fn skip_nested_element(&mut self) -> TextNode {
        let start = self.current_start();
        let first_tag_end = self.current_end();
        let mut open = 0usize;
        while let Some(kind) = self.current().map(|t| t.kind) {
            match kind {
                TokenKind::OpenBracket => {
                    let (tag, terminator) = self.parse_open_tag();
                    if terminator == Some(TokenKind::CloseBracket) {
                        open += 1;
                        if self.options.is_literal_tag(&tag.name)
                            && self.current_is(TokenKind::TextContent)
                        {
                            self.pos += 1;
                        }
                    }
                }
                TokenKind::ClosingOpenBracket => {
                    self.parse_close_tag();
                    open = open.saturating_sub(1);
                }
                _ => self.pos += 1,
            }
            if open == 0 {
                break;
            }
        }
        let span = Span::new(start, self.previous_end());
        self.diagnostics.error(
            Span::new(start, first_tag_end),
            format!("Elements are nested more than {MAX_ELEMENT_DEPTH} levels deep"),
            Stage::Parse,
        );
        let value = self
            .tokens
            .iter()
            .filter(|t| span.contains_span(t.span))
            .map(|t| t.text.as_str())
            .collect();
        TextNode { value, span }
    }

    fn close_tag_as_text(&self, close: &CloseTag) -> ElementContent {
        let text: String = self
            .tokens
            .iter()
            .filter(|t| close.span.contains_span(t.span))
            .map(|t| t.text.as_str())
            .collect();
        ElementContent::Text(TextNode {
            value: text,
            span: close.span,
        })
    }

    // ------------------------------------------------------------------
    // Elements
    // ------------------------------------------------------------------

    fn parse_element(&mut self) -> Element {
        let (open, terminator) = self.parse_open_tag();

        match terminator {
            Some(TokenKind::SelfCloseBracket) => {
                let span = Span::new(open.span.start, self.previous_end());
                Element {
                    open,
                    body: ElementBody::SelfClosing,
                    close: None,
                    span,
                }
            }
            Some(_) if self.options.is_literal_tag(&open.name) => self.parse_literal_body(open),
            Some(_) => {
                let name = open.name.clone();
                self.depth += 1;
                let (children, close) = self.parse_contents(Some(&name));
                self.depth -= 1;
                let end = close
                    .as_ref()
                    .map(|c| c.span.end)
                    .or_else(|| children.last().map(|c| c.span().end))
                    .unwrap_or_else(|| self.previous_end());
                if close.is_none() {
                    self.diagnostics.error(
                        open.name_span,
                        format!("Element <{name}> is never closed"),
                        Stage::Parse,
                    );
                }
                let span = Span::new(open.span.start, end.max(open.span.end));
                Element {
                    open,
                    body: ElementBody::Children(children),
                    close,
                    span,
                }
            }
            None => {
                self.diagnostics.error(
                    open.span,
                    format!("Open tag <{}> is not terminated", open.name),
                    Stage::Parse,
                );
                let span = open.span;
                Element {
                    open,
                    body: ElementBody::Children(Vec::new()),
                    close: None,
                    span,
                }
            }
        }
    }

    fn parse_literal_body(&mut self, open: OpenTagPartial) -> Element {
        let body_start = self.previous_end();
        let body = match self.current() {
            Some(token) if token.kind == TokenKind::TextContent => {
                let node = TextNode {
                    value: token.text.clone(),
                    span: token.span,
                };
                self.pos += 1;
                node
            }
            _ => TextNode {
                value: String::new(),
                span: Span::new(body_start, body_start),
            },
        };

        let close = match self.current() {
            Some(token) if token.kind == TokenKind::ClosingOpenBracket => {
                Some(self.parse_close_tag())
            }
            _ => {
                self.diagnostics.error(
                    open.name_span,
                    format!("Literal element <{}> is never closed", open.name),
                    Stage::Parse,
                );
                None
            }
        };
        let end = close.as_ref().map_or(body.span.end, |c| c.span.end);
        let span = Span::new(open.span.start, end);
        Element {
            open,
            body: ElementBody::Literal(body),
            close,
            span,
        }
    }

    /// Parse `<name attr...` and consume the terminating `>` or `/>`.
    /// The returned span of the open tag excludes the terminator.
    fn parse_open_tag(&mut self) -> (OpenTagPartial, Option<TokenKind>) {
        let start = self.current_start();
        self.pos += 1; // <

        let (name, name_span) = match self.current() {
            Some(token) if token.kind == TokenKind::Identifier => {
                let pair = (token.text.clone(), token.span);
                self.pos += 1;
                pair
            }
            _ => (String::new(), Span::new(start + 1, start + 1)),
        };

        let mut attributes = Vec::new();
        let mut end = name_span.end;

        loop {
            let Some(token) = self.current() else {
                let span = Span::new(start, end);
                return (
                    OpenTagPartial {
                        name,
                        name_span,
                        attributes,
                        span,
                    },
                    None,
                );
            };
            match token.kind {
                TokenKind::Whitespace => {
                    end = token.span.end;
                    self.pos += 1;
                }
                TokenKind::Identifier => {
                    let attribute = self.parse_attribute();
                    end = attribute.span.end;
                    attributes.push(attribute);
                }
                TokenKind::CloseBracket | TokenKind::SelfCloseBracket => {
                    let kind = token.kind;
                    self.pos += 1;
                    let span = Span::new(start, end);
                    return (
                        OpenTagPartial {
                            name,
                            name_span,
                            attributes,
                            span,
                        },
                        Some(kind),
                    );
                }
                TokenKind::TemplateOpen => {
                    let template = self.parse_template();
                    self.diagnostics.error(
                        template.span,
                        "Template is not bound to an attribute",
                        Stage::Parse,
                    );
                    end = template.span.end;
                }
                TokenKind::TextContent
                | TokenKind::Equals
                | TokenKind::DoubleQuote
                | TokenKind::SingleQuote => {
                    let span = token.span;
                    let message = format!("Unexpected '{}' in tag <{}>", token.text, name);
                    self.diagnostics.error(span, message, Stage::Parse);
                    end = span.end;
                    self.skip_stray_in_tag();
                }
                _ => {
                    let span = Span::new(start, end);
                    return (
                        OpenTagPartial {
                            name,
                            name_span,
                            attributes,
                            span,
                        },
                        None,
                    );
                }
            }
        }
    }

    /// Skip one stray token inside a tag; a stray quote swallows its
    /// quoted content so the rest of the tag stays aligned.
    fn skip_stray_in_tag(&mut self) {
        let Some(kind) = self.current().map(|t| t.kind) else {
            return;
        };
        self.pos += 1;
        if matches!(kind, TokenKind::DoubleQuote | TokenKind::SingleQuote) {
            while let Some(current) = self.current().map(|t| t.kind) {
                self.pos += 1;
                if current == kind {
                    break;
                }
            }
        }
    }

    fn parse_close_tag(&mut self) -> CloseTag {
        let start = self.current_start();
        self.pos += 1; // </
        let (name, name_span) = match self.current() {
            Some(token) if token.kind == TokenKind::Identifier => {
                let pair = (token.text.clone(), token.span);
                self.pos += 1;
                pair
            }
            _ => (String::new(), Span::new(start + 2, start + 2)),
        };
        let mut end = name_span.end;
        if self.current_is(TokenKind::Whitespace) {
            end = self.current_end();
            self.pos += 1;
        }
        if self.current_is(TokenKind::CloseBracket) {
            end = self.current_end();
            self.pos += 1;
        } else {
            self.diagnostics.error(
                Span::new(start, end),
                format!("Closing tag </{name}> is not terminated"),
                Stage::Parse,
            );
        }
        CloseTag {
            name,
            name_span,
            span: Span::new(start, end),
        }
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    fn parse_attribute(&mut self) -> Attribute {
        let key_token = self.tokens[self.pos].clone();
        self.pos += 1;
        let key = key_token.text;
        let key_span = key_token.span;

        let save = self.pos;
        if self.current_is(TokenKind::Whitespace) {
            self.pos += 1;
        }
        if !self.current_is(TokenKind::Equals) {
            self.pos = save;
            return Attribute {
                key,
                key_span,
                value: None,
                span: key_span,
            };
        }
        let equals_end = self.current_end();
        self.pos += 1;
        if self.current_is(TokenKind::Whitespace) {
            self.pos += 1;
        }

        let value = match self.current().map(|t| t.kind) {
            Some(TokenKind::DoubleQuote) | Some(TokenKind::SingleQuote) => {
                Some(self.parse_quoted_value(&key))
            }
            Some(TokenKind::TemplateOpen) => Some(AttributeValue::Template(self.parse_template())),
            Some(TokenKind::Identifier) | Some(TokenKind::TextContent) => {
                let token = self.tokens[self.pos].clone();
                self.pos += 1;
                self.diagnostics.warning(
                    token.span,
                    format!("Value of attribute '{key}' should be quoted"),
                    Stage::Parse,
                );
                Some(AttributeValue::Quoted(Quoted {
                    value: token.text,
                    value_span: token.span,
                    span: token.span,
                }))
            }
            _ => {
                self.diagnostics.error(
                    Span::new(key_span.start, equals_end),
                    format!("Attribute '{key}' is missing a value"),
                    Stage::Parse,
                );
                None
            }
        };

        let end = value.as_ref().map_or(equals_end, |v| v.span().end);
        Attribute {
            key,
            key_span,
            value,
            span: Span::new(key_span.start, end),
        }
    }

    fn parse_quoted_value(&mut self, key: &str) -> AttributeValue {
        let quote = self.tokens[self.pos].clone();
        self.pos += 1;
        let start = quote.span.start;
        let mut parts = Vec::new();
        let mut end = quote.span.end;
        let mut closed = false;

        while let Some(token) = self.current() {
            match token.kind {
                kind if kind == quote.kind => {
                    end = token.span.end;
                    self.pos += 1;
                    closed = true;
                    break;
                }
                TokenKind::TemplateOpen => {
                    let template = self.parse_template();
                    end = template.span.end;
                    parts.push(QuotedPart::Template(template));
                }
                TokenKind::TextContent | TokenKind::Whitespace => {
                    let text = TextNode {
                        value: token.text.clone(),
                        span: token.span,
                    };
                    end = token.span.end;
                    self.pos += 1;
                    parts.push(QuotedPart::Text(text));
                }
                _ => break,
            }
        }

        let span = Span::new(start, end);
        if !closed {
            self.diagnostics.error(
                span,
                format!("Value of attribute '{key}' is missing its closing quote"),
                Stage::Parse,
            );
        }

        let has_template = parts
            .iter()
            .any(|part| matches!(part, QuotedPart::Template(_)));
        if has_template {
            return AttributeValue::QuotedTemplate(QuotedTemplate { parts, span });
        }

        let value_start = quote.span.end;
        let value_end = if closed { end - 1 } else { end };
        let value: String = parts
            .iter()
            .map(|part| match part {
                QuotedPart::Text(t) => t.value.as_str(),
                QuotedPart::Template(_) => "",
            })
            .collect();
        let quoted = Quoted {
            value,
            value_span: Span::new(value_start, value_end.max(value_start)),
            span,
        };

        if key.eq_ignore_ascii_case("for") {
            if let Some(iterator) = self.for_iterator(&quoted) {
                return AttributeValue::ForIterator(iterator);
            }
            self.diagnostics.error(
                quoted.value_span,
                "Expected 'item in expression' in for attribute",
                Stage::Parse,
            );
        }
        AttributeValue::Quoted(quoted)
    }

    fn for_iterator(&self, quoted: &Quoted) -> Option<ForIteratorValue> {
        let captures = FOR_ITERATOR.captures(&quoted.value)?;
        let iterator = captures.get(1)?;
        let collection = captures.get(2)?;
        let base = quoted.value_span.start;
        Some(ForIteratorValue {
            iterator: iterator.as_str().to_string(),
            iterator_span: Span::new(base + iterator.start(), base + iterator.end()),
            collection: collection.as_str().to_string(),
            collection_span: Span::new(base + collection.start(), base + collection.end()),
            span: quoted.span,
        })
    }

    // ------------------------------------------------------------------
    // Templates and comments
    // ------------------------------------------------------------------

    fn parse_template(&mut self) -> TemplateNode {
        let start = self.current_start();
        let open_end = self.current_end();
        self.pos += 1; // {{
        let mut end = open_end;

        if self.current_is(TokenKind::Whitespace) {
            end = self.current_end();
            self.pos += 1;
        }
        let (expression, expression_span) = if self.current_is(TokenKind::TextContent) {
            let token = self.tokens[self.pos].clone();
            self.pos += 1;
            end = token.span.end;
            (token.text, token.span)
        } else {
            (String::new(), Span::new(end, end))
        };
        if self.current_is(TokenKind::Whitespace) {
            end = self.current_end();
            self.pos += 1;
        }

        if self.current_is(TokenKind::TemplateClose) {
            end = self.current_end();
            self.pos += 1;
        } else {
            self.diagnostics.error(
                Span::new(start, end),
                "Template is missing its closing '}}'",
                Stage::Parse,
            );
        }

        let span = Span::new(start, end);
        if expression.is_empty() {
            self.diagnostics
                .error(span, "Template expression is empty", Stage::Parse);
        }
        TemplateNode {
            expression,
            expression_span,
            span,
        }
    }

    fn parse_comment(&mut self) -> ElementContent {
        let start = self.current_start();
        let mut end = self.current_end();
        self.pos += 1; // <!--

        let mut words = Vec::new();
        let mut content = String::new();
        let mut is_pragma = false;
        let mut closed = false;

        while let Some(token) = self.current() {
            end = token.span.end;
            match token.kind {
                TokenKind::CommentClose => closed = true,
                TokenKind::PragmaKeyword => is_pragma = true,
                TokenKind::TextContent => {
                    content.push_str(&token.text);
                    words.push(token.text.clone());
                }
                _ => content.push_str(&token.text),
            }
            self.pos += 1;
            if closed {
                break;
            }
        }

        let span = Span::new(start, end);
        if !closed {
            self.diagnostics
                .error(span, "Comment is missing its closing '-->'", Stage::Parse);
        }

        if is_pragma {
            let mut words = words.into_iter();
            let directive = words.next().unwrap_or_default();
            if directive.is_empty() {
                self.diagnostics
                    .warning(span, "Pragma has no directive", Stage::Parse);
            }
            return ElementContent::Pragma(PragmaNode {
                directive,
                options: words.collect(),
                span,
            });
        }
        ElementContent::Comment(CommentNode { content, span })
    }

    // ------------------------------------------------------------------
    // Cursor helpers
    // ------------------------------------------------------------------

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn current_is(&self, kind: TokenKind) -> bool {
        self.current().is_some_and(|t| t.kind == kind)
    }

    fn current_start(&self) -> usize {
        self.current()
            .map_or_else(|| self.previous_end(), |t| t.span.start)
    }

    fn current_end(&self) -> usize {
        self.current()
            .map_or_else(|| self.previous_end(), |t| t.span.end)
    }

    fn previous_end(&self) -> usize {
        self.pos
            .checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(0, |t| t.span.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_source(source: &str) -> (Root, Diagnostics) {
        parse(tokenize(source))
    }

    fn element(content: &ElementContent) -> &Element {
        match content {
            ElementContent::Element(e) => e,
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_elements() {
        let (root, diagnostics) = parse_source("<task><p>hi</p></task>");
        assert!(diagnostics.is_empty());
        let task = element(&root.children[0]);
        assert_eq!(task.name(), "task");
        assert_eq!(task.span, Span::new(0, 22));
        let p = element(&task.children()[0]);
        assert_eq!(p.span, Span::new(6, 15));
    }

    #[test]
    fn test_self_closing() {
        let (root, diagnostics) = parse_source("<br/>");
        assert!(diagnostics.is_empty());
        assert_eq!(element(&root.children[0]).body, ElementBody::SelfClosing);
    }

    #[test]
    fn test_attribute_kinds() {
        let (root, diagnostics) =
            parse_source(r#"<p a="x" b="{{y}}" c="1 {{z}}" d={{w}} for="i in items" e/>"#);
        assert!(diagnostics.is_empty(), "{diagnostics:?}");
        let attrs = &element(&root.children[0]).open.attributes;
        assert!(matches!(attrs[0].value, Some(AttributeValue::Quoted(_))));
        match &attrs[1].value {
            Some(AttributeValue::QuotedTemplate(q)) => assert!(q.sole_template().is_some()),
            other => panic!("unexpected {other:?}"),
        }
        match &attrs[2].value {
            Some(AttributeValue::QuotedTemplate(q)) => assert!(q.sole_template().is_none()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(attrs[3].value, Some(AttributeValue::Template(_))));
        match &attrs[4].value {
            Some(AttributeValue::ForIterator(f)) => {
                assert_eq!(f.iterator, "i");
                assert_eq!(f.collection, "items");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(attrs[5].value.is_none());
    }

    #[test]
    fn test_orphan_close_tag_becomes_text() {
        let (root, diagnostics) = parse_source("<p>a</p></x><p>b</p>");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(root.children.len(), 3);
        match &root.children[1] {
            ElementContent::Text(t) => assert_eq!(t.value, "</x>"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_close_does_not_search_ancestors() {
        let (root, diagnostics) = parse_source("<a><b>x</a></b>");
        let a = element(&root.children[0]);
        assert!(a.close.is_none());
        let b = element(&a.children()[0]);
        assert!(b.close.is_some());
        assert_eq!(b.children().len(), 2);
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn test_empty_template_recovers() {
        let (root, diagnostics) = parse_source("a {{ }} b");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(root.children.len(), 3);
    }

    #[test]
    fn test_literal_body() {
        let (root, diagnostics) = parse_source("<text>a <b> c</text>");
        assert!(diagnostics.is_empty());
        match &element(&root.children[0]).body {
            ElementBody::Literal(text) => assert_eq!(text.value, "a <b> c"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_pragma() {
        let (root, _) = parse_source("<!-- @pragma components +table -image -->");
        match &root.children[0] {
            ElementContent::Pragma(p) => {
                assert_eq!(p.directive, "components");
                assert_eq!(p.options, vec!["+table", "-image"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_deep_nesting_becomes_text() {
        let depth = 10_000;
        let source = format!("{}x{}<p>after</p>", "<p>".repeat(depth), "</p>".repeat(depth));
        let (root, diagnostics) = parse_source(&source);
        assert_eq!(diagnostics.len(), 1, "{diagnostics:?}");
        assert!(diagnostics.has_errors());
        assert_eq!(root.children.len(), 2);
        assert_eq!(element(&root.children[1]).name(), "p");

        let mut node = element(&root.children[0]);
        for _ in 1..MAX_ELEMENT_DEPTH {
            node = element(&node.children()[0]);
        }
        match &node.children()[0] {
            ElementContent::Text(text) => assert!(text.value.starts_with("<p><p>")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_open_tag() {
        let (root, diagnostics) = parse_source("<ta");
        assert!(diagnostics.has_errors());
        assert_eq!(element(&root.children[0]).name(), "ta");
    }
}
