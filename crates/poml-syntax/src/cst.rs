//! Concrete syntax tree.
//!
//! Every node owns its children and carries the byte range it was parsed
//! from. A node's range always contains the ranges of its children.

use serde::Serialize;

use crate::Span;

/// The kind of a CST node, as reported to editor queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Root,
    ElementContent,
    Element,
    OpenTagPartial,
    CloseTag,
    Attribute,
    Template,
    Comment,
    Pragma,
    Quoted,
    QuotedTemplate,
    ForIteratorValue,
}

/// The whole document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Root {
    pub children: Vec<ElementContent>,
    pub span: Span,
}

/// Anything that can appear between tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementContent {
    Element(Element),
    Template(TemplateNode),
    Comment(CommentNode),
    Pragma(PragmaNode),
    Text(TextNode),
}

impl ElementContent {
    pub fn span(&self) -> Span {
        match self {
            ElementContent::Element(n) => n.span,
            ElementContent::Template(n) => n.span,
            ElementContent::Comment(n) => n.span,
            ElementContent::Pragma(n) => n.span,
            ElementContent::Text(n) => n.span,
        }
    }
}

/// A plain run of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextNode {
    pub value: String,
    pub span: Span,
}

/// `{{ expression }}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateNode {
    /// The expression text with surrounding whitespace removed.
    pub expression: String,
    /// Range of `expression`; empty and positioned after `{{` when the
    /// template has no content.
    pub expression_span: Span,
    pub span: Span,
}

/// `<!-- ... -->`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentNode {
    pub content: String,
    pub span: Span,
}

/// `<!-- @pragma directive option... -->`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PragmaNode {
    pub directive: String,
    pub options: Vec<String>,
    pub span: Span,
}

/// `<name attr...>` up to (not including) `>` or `/>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTagPartial {
    pub name: String,
    pub name_span: Span,
    pub attributes: Vec<Attribute>,
    pub span: Span,
}

/// `</name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseTag {
    pub name: String,
    pub name_span: Span,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementBody {
    /// `<name ... />`
    SelfClosing,
    /// Verbatim body of a literal element.
    Literal(TextNode),
    /// Structured children.
    Children(Vec<ElementContent>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub open: OpenTagPartial,
    pub body: ElementBody,
    /// `None` for self-closing elements and for elements left unclosed.
    pub close: Option<CloseTag>,
    pub span: Span,
}

impl Element {
    pub fn name(&self) -> &str {
        &self.open.name
    }

    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.open
            .attributes
            .iter()
            .find(|attr| attr.key.eq_ignore_ascii_case(key))
    }

    pub fn children(&self) -> &[ElementContent] {
        match &self.body {
            ElementBody::Children(children) => children,
            _ => &[],
        }
    }

    /// Range of the body between the open and close tags.
    pub fn body_span(&self) -> Span {
        let start = self.open.span.end;
        let end = self.close.as_ref().map_or(self.span.end, |c| c.span.start);
        let start = match &self.body {
            ElementBody::SelfClosing => self.span.end,
            _ => start.min(end),
        };
        Span::new(start, end.max(start))
    }
}

/// `key = value`, or a bare `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub key: String,
    pub key_span: Span,
    pub value: Option<AttributeValue>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Quoted(Quoted),
    QuotedTemplate(QuotedTemplate),
    Template(TemplateNode),
    ForIterator(ForIteratorValue),
}

impl AttributeValue {
    pub fn span(&self) -> Span {
        match self {
            AttributeValue::Quoted(n) => n.span,
            AttributeValue::QuotedTemplate(n) => n.span,
            AttributeValue::Template(n) => n.span,
            AttributeValue::ForIterator(n) => n.span,
        }
    }
}

/// A quoted value without templates. `span` includes the quotes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quoted {
    pub value: String,
    pub value_span: Span,
    pub span: Span,
}

/// A quoted value that embeds at least one `{{...}}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedTemplate {
    pub parts: Vec<QuotedPart>,
    pub span: Span,
}

impl QuotedTemplate {
    /// The single template when the value is exactly `"{{expr}}"`.
    pub fn sole_template(&self) -> Option<&TemplateNode> {
        match self.parts.as_slice() {
            [QuotedPart::Template(template)] => Some(template),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotedPart {
    Text(TextNode),
    Template(TemplateNode),
}

/// `"item in expression"` on a `for` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForIteratorValue {
    pub iterator: String,
    pub iterator_span: Span,
    pub collection: String,
    pub collection_span: Span,
    pub span: Span,
}

// ============================================================================
// Uniform traversal
// ============================================================================

/// A borrowed view of any CST node.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Root(&'a Root),
    Element(&'a Element),
    OpenTag(&'a OpenTagPartial),
    CloseTag(&'a CloseTag),
    Attribute(&'a Attribute),
    Template(&'a TemplateNode),
    Comment(&'a CommentNode),
    Pragma(&'a PragmaNode),
    Text(&'a TextNode),
    Quoted(&'a Quoted),
    QuotedTemplate(&'a QuotedTemplate),
    ForIterator(&'a ForIteratorValue),
}

impl<'a> NodeRef<'a> {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeRef::Root(_) => NodeKind::Root,
            NodeRef::Element(_) => NodeKind::Element,
            NodeRef::OpenTag(_) => NodeKind::OpenTagPartial,
            NodeRef::CloseTag(_) => NodeKind::CloseTag,
            NodeRef::Attribute(_) => NodeKind::Attribute,
            NodeRef::Template(_) => NodeKind::Template,
            NodeRef::Comment(_) => NodeKind::Comment,
            NodeRef::Pragma(_) => NodeKind::Pragma,
            NodeRef::Text(_) => NodeKind::ElementContent,
            NodeRef::Quoted(_) => NodeKind::Quoted,
            NodeRef::QuotedTemplate(_) => NodeKind::QuotedTemplate,
            NodeRef::ForIterator(_) => NodeKind::ForIteratorValue,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            NodeRef::Root(n) => n.span,
            NodeRef::Element(n) => n.span,
            NodeRef::OpenTag(n) => n.span,
            NodeRef::CloseTag(n) => n.span,
            NodeRef::Attribute(n) => n.span,
            NodeRef::Template(n) => n.span,
            NodeRef::Comment(n) => n.span,
            NodeRef::Pragma(n) => n.span,
            NodeRef::Text(n) => n.span,
            NodeRef::Quoted(n) => n.span,
            NodeRef::QuotedTemplate(n) => n.span,
            NodeRef::ForIterator(n) => n.span,
        }
    }

    pub fn children(&self) -> Vec<NodeRef<'a>> {
        match self {
            NodeRef::Root(root) => root.children.iter().map(NodeRef::from).collect(),
            NodeRef::Element(element) => {
                let mut out = vec![NodeRef::OpenTag(&element.open)];
                match &element.body {
                    ElementBody::SelfClosing => {}
                    ElementBody::Literal(text) => out.push(NodeRef::Text(text)),
                    ElementBody::Children(children) => {
                        out.extend(children.iter().map(NodeRef::from))
                    }
                }
                if let Some(close) = &element.close {
                    out.push(NodeRef::CloseTag(close));
                }
                out
            }
            NodeRef::OpenTag(open) => open.attributes.iter().map(NodeRef::Attribute).collect(),
            NodeRef::Attribute(attr) => match &attr.value {
                Some(AttributeValue::Quoted(q)) => vec![NodeRef::Quoted(q)],
                Some(AttributeValue::QuotedTemplate(q)) => vec![NodeRef::QuotedTemplate(q)],
                Some(AttributeValue::Template(t)) => vec![NodeRef::Template(t)],
                Some(AttributeValue::ForIterator(f)) => vec![NodeRef::ForIterator(f)],
                None => Vec::new(),
            },
            NodeRef::QuotedTemplate(q) => q
                .parts
                .iter()
                .map(|part| match part {
                    QuotedPart::Text(t) => NodeRef::Text(t),
                    QuotedPart::Template(t) => NodeRef::Template(t),
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The innermost node whose range contains `offset`, with the chain of
    /// its ancestors (outermost first).
    pub fn path_at(self, offset: usize) -> Vec<NodeRef<'a>> {
        let mut path = Vec::new();
        let mut current = self;
        if !current.span().contains_inclusive(offset) {
            return path;
        }
        loop {
            path.push(current);
            let next = current
                .children()
                .into_iter()
                .find(|child| child.span().contains(offset))
                .or_else(|| {
                    current
                        .children()
                        .into_iter()
                        .find(|child| child.span().contains_inclusive(offset))
                });
            match next {
                Some(child) => current = child,
                None => return path,
            }
        }
    }
}

impl<'a> From<&'a ElementContent> for NodeRef<'a> {
    fn from(content: &'a ElementContent) -> Self {
        match content {
            ElementContent::Element(n) => NodeRef::Element(n),
            ElementContent::Template(n) => NodeRef::Template(n),
            ElementContent::Comment(n) => NodeRef::Comment(n),
            ElementContent::Pragma(n) => NodeRef::Pragma(n),
            ElementContent::Text(n) => NodeRef::Text(n),
        }
    }
}

impl<'a> From<&'a Root> for NodeRef<'a> {
    fn from(root: &'a Root) -> Self {
        NodeRef::Root(root)
    }
}
