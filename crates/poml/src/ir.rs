//! Intermediate representation: presentation-tagged nodes that keep the
//! source range of the element that produced them.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use poml_syntax::Span;
use serde::{Deserialize, Serialize};

use crate::components::InlineStyle;

/// Who a piece of content is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Human,
    Ai,
    System,
    Tool,
}

impl Speaker {
    pub fn as_str(self) -> &'static str {
        match self {
            Speaker::Human => "human",
            Speaker::Ai => "ai",
            Speaker::System => "system",
            Speaker::Tool => "tool",
        }
    }

    /// Chat-completion role name.
    pub fn role(self) -> &'static str {
        match self {
            Speaker::Human => "user",
            Speaker::Ai => "assistant",
            Speaker::System => "system",
            Speaker::Tool => "tool",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Speaker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "human" | "user" => Ok(Speaker::Human),
            "ai" | "assistant" => Ok(Speaker::Ai),
            "system" => Ok(Speaker::System),
            "tool" => Ok(Speaker::Tool),
            other => Err(format!("unknown speaker '{other}'")),
        }
    }
}

/// Presentation of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Syntax {
    #[default]
    Markdown,
    Html,
    Text,
    Json,
    Yaml,
    Xml,
    Multimedia,
}

impl Syntax {
    pub fn as_str(self) -> &'static str {
        match self {
            Syntax::Markdown => "markdown",
            Syntax::Html => "html",
            Syntax::Text => "text",
            Syntax::Json => "json",
            Syntax::Yaml => "yaml",
            Syntax::Xml => "xml",
            Syntax::Multimedia => "multimedia",
        }
    }

    pub fn is_serialization(self) -> bool {
        matches!(self, Syntax::Json | Syntax::Yaml | Syntax::Xml)
    }
}

impl FromStr for Syntax {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(Syntax::Markdown),
            "html" => Ok(Syntax::Html),
            "text" | "plain" => Ok(Syntax::Text),
            "json" => Ok(Syntax::Json),
            "yaml" | "yml" => Ok(Syntax::Yaml),
            "xml" => Ok(Syntax::Xml),
            "multimedia" => Ok(Syntax::Multimedia),
            other => Err(format!("unknown syntax '{other}'")),
        }
    }
}

/// Whitespace policy for text runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WhiteSpace {
    /// Keep text as written.
    Pre,
    /// Collapse runs of whitespace and trim the ends.
    #[default]
    Filter,
    /// Only trim the ends.
    Trim,
}

impl FromStr for WhiteSpace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pre" => Ok(WhiteSpace::Pre),
            "filter" | "collapse" => Ok(WhiteSpace::Filter),
            "trim" => Ok(WhiteSpace::Trim),
            other => Err(format!("unknown whiteSpace '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptionStyle {
    #[default]
    Header,
    Bold,
    Plain,
    Hidden,
}

impl FromStr for CaptionStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "header" => Ok(CaptionStyle::Header),
            "bold" => Ok(CaptionStyle::Bold),
            "plain" => Ok(CaptionStyle::Plain),
            "hidden" => Ok(CaptionStyle::Hidden),
            other => Err(format!("unknown captionStyle '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptionEnding {
    #[default]
    Colon,
    Newline,
    None,
}

impl FromStr for CaptionEnding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "colon" => Ok(CaptionEnding::Colon),
            "newline" => Ok(CaptionEnding::Newline),
            "none" => Ok(CaptionEnding::None),
            other => Err(format!("unknown captionEnding '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListStyle {
    #[default]
    Dash,
    Star,
    Plus,
    Decimal,
    Latin,
}

impl ListStyle {
    /// Marker for the item at `index` (0-based), including the trailing space.
    pub fn marker(self, index: usize) -> String {
        match self {
            ListStyle::Dash => "- ".to_string(),
            ListStyle::Star => "* ".to_string(),
            ListStyle::Plus => "+ ".to_string(),
            ListStyle::Decimal => format!("{}. ", index + 1),
            ListStyle::Latin => format!("{}. ", latin_numeral(index + 1)),
        }
    }
}

/// Bijective base-26 letters: 1 is `a`, 26 is `z`, 27 is `aa`.
fn latin_numeral(mut n: usize) -> String {
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        letters.push(char::from(b'a' + (n % 26) as u8));
        n /= 26;
    }
    letters.iter().rev().collect()
}

impl FromStr for ListStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dash" => Ok(ListStyle::Dash),
            "star" => Ok(ListStyle::Star),
            "plus" => Ok(ListStyle::Plus),
            "decimal" => Ok(ListStyle::Decimal),
            "latin" => Ok(ListStyle::Latin),
            other => Err(format!("unknown listStyle '{other}'")),
        }
    }
}

/// An embedded image or audio clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaPart {
    #[serde(rename = "type")]
    pub media_type: String,
    pub base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrKind {
    Document,
    /// A paragraph.
    Block,
    /// Raises the heading level of everything inside.
    Section,
    Heading,
    /// A captioned block; the children are the body.
    Captioned {
        caption: String,
        style: CaptionStyle,
        ending: CaptionEnding,
    },
    Inline(InlineStyle),
    LineBreak,
    /// `exact` is set when `value` is the verbatim source text of `span`.
    Text {
        value: String,
        exact: bool,
    },
    Code {
        lang: Option<String>,
        inline: bool,
    },
    List {
        style: ListStyle,
    },
    ListItem,
    Table {
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    /// A value rendered in the node's serialization syntax.
    Serialized {
        value: serde_json::Value,
    },
    Media(MediaPart),
    /// An explicit message; the node's `speaker` says whose.
    Message,
    ToolRequest {
        id: String,
        name: String,
        parameters: serde_json::Value,
    },
    ToolResponse {
        id: String,
        name: String,
    },
}

impl IrKind {
    pub fn tag(&self) -> &'static str {
        match self {
            IrKind::Document => "document",
            IrKind::Block => "p",
            IrKind::Section => "section",
            IrKind::Heading => "h",
            IrKind::Captioned { .. } => "cp",
            IrKind::Inline(InlineStyle::Plain) => "span",
            IrKind::Inline(InlineStyle::Bold) => "b",
            IrKind::Inline(InlineStyle::Italic) => "i",
            IrKind::Inline(InlineStyle::Strikethrough) => "s",
            IrKind::Inline(InlineStyle::Underline) => "u",
            IrKind::LineBreak => "br",
            IrKind::Text { .. } => "text",
            IrKind::Code { .. } => "code",
            IrKind::List { .. } => "list",
            IrKind::ListItem => "item",
            IrKind::Table { .. } => "table",
            IrKind::Serialized { .. } => "obj",
            IrKind::Media(_) => "media",
            IrKind::Message => "msg",
            IrKind::ToolRequest { .. } => "tool-request",
            IrKind::ToolResponse { .. } => "tool-response",
        }
    }

    /// Inline nodes flow into the surrounding paragraph.
    pub fn is_inline(&self) -> bool {
        matches!(
            self,
            IrKind::Text { .. }
                | IrKind::Inline(_)
                | IrKind::LineBreak
                | IrKind::Code { inline: true, .. }
                | IrKind::Media(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IrNode {
    pub kind: IrKind,
    pub syntax: Syntax,
    /// Set on the node that declares a speaker; descendants inherit it.
    pub speaker: Option<Speaker>,
    pub white_space: WhiteSpace,
    pub children: Vec<IrNode>,
    /// Range of the source element this node came from.
    pub span: Span,
}

impl IrNode {
    pub fn new(kind: IrKind, span: Span) -> Self {
        Self {
            kind,
            syntax: Syntax::default(),
            speaker: None,
            white_space: WhiteSpace::default(),
            children: Vec::new(),
            span,
        }
    }

    pub fn text(value: impl Into<String>, span: Span, exact: bool) -> Self {
        Self::new(
            IrKind::Text {
                value: value.into(),
                exact,
            },
            span,
        )
    }

    pub fn with_children(mut self, children: Vec<IrNode>) -> Self {
        self.children = children;
        self
    }

    /// Depth-first iterator over this node and its descendants.
    pub fn walk(&self) -> Vec<&IrNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    /// Concatenated text of all text descendants.
    pub fn text_content(&self) -> String {
        self.walk()
            .into_iter()
            .filter_map(|node| match &node.kind {
                IrKind::Text { value, .. } => Some(value.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Markup dump with the original source range on every element.
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        self.write_markup(&mut out, 0);
        out
    }

    fn write_markup(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        if let IrKind::Text { value, .. } = &self.kind {
            let _ = writeln!(
                out,
                "{indent}<text original-start-index=\"{}\" original-end-index=\"{}\">{}</text>",
                self.span.start,
                self.span.end,
                escape_xml(value)
            );
            return;
        }

        let tag = self.kind.tag();
        let _ = write!(out, "{indent}<{tag}");
        if self.syntax != Syntax::Markdown {
            let _ = write!(out, " syntax=\"{}\"", self.syntax.as_str());
        }
        if let Some(speaker) = self.speaker {
            let _ = write!(out, " speaker=\"{speaker}\"");
        }
        for (key, value) in self.kind_attributes() {
            let _ = write!(out, " {key}=\"{}\"", escape_xml(&value));
        }
        let _ = write!(
            out,
            " original-start-index=\"{}\" original-end-index=\"{}\"",
            self.span.start, self.span.end
        );
        if self.children.is_empty() {
            out.push_str("/>\n");
            return;
        }
        out.push_str(">\n");
        for child in &self.children {
            child.write_markup(out, depth + 1);
        }
        let _ = writeln!(out, "{indent}</{tag}>");
    }

    fn kind_attributes(&self) -> Vec<(&'static str, String)> {
        match &self.kind {
            IrKind::Captioned { caption, .. } => vec![("caption", caption.clone())],
            IrKind::Code { lang, inline } => {
                let mut attrs = vec![("inline", inline.to_string())];
                if let Some(lang) = lang {
                    attrs.push(("lang", lang.clone()));
                }
                attrs
            }
            IrKind::List { style } => vec![("list-style", format!("{style:?}").to_lowercase())],
            IrKind::Table { header, rows } => vec![
                ("columns", header.join(",")),
                ("rows", rows.len().to_string()),
            ],
            IrKind::Serialized { value } => vec![("value", value.to_string())],
            IrKind::Media(media) => {
                let mut attrs = vec![("type", media.media_type.clone())];
                if let Some(alt) = &media.alt {
                    attrs.push(("alt", alt.clone()));
                }
                attrs
            }
            IrKind::ToolRequest {
                id,
                name,
                parameters,
            } => vec![
                ("id", id.clone()),
                ("name", name.clone()),
                ("parameters", parameters.to_string()),
            ],
            IrKind::ToolResponse { id, name } => vec![("id", id.clone()), ("name", name.clone())],
            _ => Vec::new(),
        }
    }
}

pub(crate) fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_is_depth_first() {
        let tree = IrNode::new(IrKind::Document, Span::new(0, 10)).with_children(vec![
            IrNode::new(IrKind::Block, Span::new(0, 5))
                .with_children(vec![IrNode::text("a", Span::new(3, 4), true)]),
            IrNode::text("b", Span::new(6, 7), true),
        ]);
        let tags: Vec<_> = tree.walk().iter().map(|n| n.kind.tag()).collect();
        assert_eq!(tags, vec!["document", "p", "text", "text"]);
        assert_eq!(tree.text_content(), "ab");
    }

    #[test]
    fn test_markup_dump_carries_ranges() {
        let mut node = IrNode::new(IrKind::Block, Span::new(0, 12));
        node.speaker = Some(Speaker::Ai);
        node.children = vec![IrNode::text("a<b", Span::new(3, 6), true)];
        let markup = node.to_markup();
        assert!(markup.starts_with(
            "<p speaker=\"ai\" original-start-index=\"0\" original-end-index=\"12\">"
        ));
        assert!(markup.contains(">a&lt;b</text>"));
    }

    #[test]
    fn test_list_markers() {
        assert_eq!(ListStyle::Decimal.marker(2), "3. ");
        assert_eq!(ListStyle::Latin.marker(1), "b. ");
        assert_eq!(ListStyle::Latin.marker(25), "z. ");
        assert_eq!(ListStyle::Latin.marker(26), "aa. ");
        assert_eq!(ListStyle::Latin.marker(27), "ab. ");
        assert_eq!(ListStyle::Latin.marker(701), "zz. ");
        assert_eq!(ListStyle::Latin.marker(702), "aaa. ");
        assert_eq!(ListStyle::Dash.marker(5), "- ");
    }

    #[test]
    fn test_speaker_aliases() {
        assert_eq!("user".parse::<Speaker>(), Ok(Speaker::Human));
        assert_eq!("assistant".parse::<Speaker>(), Ok(Speaker::Ai));
        assert!("robot".parse::<Speaker>().is_err());
    }
}
