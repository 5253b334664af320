//! Serialization of IR into text, rich content or chat messages.
//!
//! Every mode is built from the same piece layout, so the source map of
//! the plain rendering is exact: each output character belongs to exactly
//! one segment.

mod layout;
mod pieces;
mod speaker;

use poml_syntax::Span;
use serde::Serialize;

use crate::ir::{IrNode, MediaPart, Speaker};
use layout::Layout;
use pieces::Fragment;
use speaker::speaker_runs;

/// A call the assistant makes to a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "tool_request")]
pub struct ToolRequestPart {
    pub id: String,
    pub name: String,
    pub parameters: serde_json::Value,
}

/// The answer to a tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "tool_response")]
pub struct ToolResponsePart {
    pub id: String,
    pub name: String,
    pub content: String,
}

/// One element of rich content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RichPart {
    Text(String),
    Media(MediaPart),
    ToolRequest(ToolRequestPart),
    ToolResponse(ToolResponsePart),
}

/// Message content: a plain string when there is nothing but text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Rich(Vec<RichPart>),
}

impl Content {
    pub(crate) fn from_parts(mut parts: Vec<RichPart>) -> Self {
        if parts.is_empty() {
            return Content::Text(String::new());
        }
        if parts.len() == 1 {
            if let RichPart::Text(text) = &mut parts[0] {
                return Content::Text(std::mem::take(text));
            }
        }
        Content::Rich(parts)
    }

    pub fn parts(&self) -> Vec<RichPart> {
        match self {
            Content::Text(text) => vec![RichPart::Text(text.clone())],
            Content::Rich(parts) => parts.clone(),
        }
    }

    /// Text of the content; non-text parts are skipped.
    pub fn text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Rich(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    RichPart::Text(text) => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub speaker: Speaker,
    pub content: Content,
}

/// Output range `output_start..output_end` came from input range
/// `input_start..input_end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub input_start: usize,
    pub input_end: usize,
    pub output_start: usize,
    pub output_end: usize,
}

impl Segment {
    pub fn input(&self) -> Span {
        Span::new(self.input_start, self.input_end)
    }

    pub fn output(&self) -> Span {
        Span::new(self.output_start, self.output_end)
    }

    /// Verbatim copies map offset by offset.
    fn is_linear(&self) -> bool {
        self.input().len() == self.output().len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceMap {
    pub segments: Vec<Segment>,
}

impl SourceMap {
    fn from_fragment(fragment: &Fragment) -> Self {
        let mut segments = Vec::with_capacity(fragment.pieces.len());
        let mut offset = 0;
        for piece in &fragment.pieces {
            if piece.text.is_empty() {
                continue;
            }
            let end = offset + piece.text.len();
            segments.push(Segment {
                input_start: piece.span.start,
                input_end: piece.span.end,
                output_start: offset,
                output_end: end,
            });
            offset = end;
        }
        Self { segments }
    }

    /// Source range that produced the output character at `offset`.
    pub fn to_input(&self, offset: usize) -> Option<Span> {
        let segment = self.segments.iter().find(|s| s.output().contains(offset))?;
        if segment.is_linear() {
            let at = segment.input_start + (offset - segment.output_start);
            Some(Span::new(at, at + 1))
        } else {
            Some(segment.input())
        }
    }

    /// Output ranges produced from the source character at `offset`,
    /// innermost first.
    pub fn to_output(&self, offset: usize) -> Vec<Span> {
        let mut hits: Vec<&Segment> = self
            .segments
            .iter()
            .filter(|s| s.input().contains(offset))
            .collect();
        hits.sort_by_key(|s| s.input().len());
        let Some(narrowest) = hits.first().map(|s| s.input().len()) else {
            return Vec::new();
        };
        hits.into_iter()
            .filter(|s| s.input().len() == narrowest)
            .map(|s| {
                if s.is_linear() {
                    let at = s.output_start + (offset - s.input_start);
                    Span::new(at, at + 1)
                } else {
                    s.output()
                }
            })
            .collect()
    }
}

/// Rendered text together with its source map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedOutput {
    pub text: String,
    pub source_map: SourceMap,
}

impl MappedOutput {
    fn from_fragment(fragment: &Fragment) -> Self {
        Self {
            text: fragment.text(),
            source_map: SourceMap::from_fragment(fragment),
        }
    }
}

/// A message with the source map of its text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedMessage {
    pub speaker: Speaker,
    /// Range covering every node of the message.
    pub span: Span,
    pub output: MappedOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Plain,
    Rich,
    Speaker,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub mode: WriteMode,
    /// Emit a single message in speaker mode.
    pub single_speaker: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Written {
    Text(String),
    Rich(Vec<RichPart>),
    Messages(Vec<Message>),
}

pub fn write(ir: &IrNode, options: &WriteOptions) -> Written {
    match options.mode {
        WriteMode::Plain => Written::Text(write_plain(ir)),
        WriteMode::Rich => Written::Rich(write_rich(ir)),
        WriteMode::Speaker => Written::Messages(write_messages(ir, options.single_speaker)),
    }
}

/// Flat text; media become their alt text.
pub fn write_plain(ir: &IrNode) -> String {
    Layout::plain().render(ir).text()
}

/// Text interleaved with media and tool parts, in document order.
pub fn write_rich(ir: &IrNode) -> Vec<RichPart> {
    split_parts(Layout::rich().render(ir))
}

pub fn write_messages(ir: &IrNode, single_speaker: bool) -> Vec<Message> {
    let layout = Layout::rich();
    speaker_runs(ir, single_speaker)
        .into_iter()
        .map(|run| Message {
            speaker: run.speaker,
            content: Content::from_parts(split_parts(layout.render_all(&run.nodes, run.span))),
        })
        .collect()
}

/// Plain rendering with its source map.
pub fn write_with_source_map(ir: &IrNode) -> MappedOutput {
    MappedOutput::from_fragment(&Layout::plain().render(ir))
}

/// Per-message renderings with source maps relative to each message's text.
/// Non-text parts appear as their fallback text.
pub fn write_messages_with_source_map(ir: &IrNode, single_speaker: bool) -> Vec<MappedMessage> {
    let layout = Layout::rich();
    speaker_runs(ir, single_speaker)
        .into_iter()
        .map(|run| MappedMessage {
            speaker: run.speaker,
            span: run.span,
            output: MappedOutput::from_fragment(&layout.render_all(&run.nodes, run.span)),
        })
        .collect()
}

/// Cut a rendered fragment at its parts. Text is kept as written except
/// for the paragraph breaks that separate it from a neighbouring part;
/// whitespace-only text is dropped.
fn split_parts(fragment: Fragment) -> Vec<RichPart> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let flush = |text: &mut String, parts: &mut Vec<RichPart>, before_part: bool| {
        let after_part = parts.last().is_some_and(|p| !matches!(p, RichPart::Text(_)));
        let mut kept = text.as_str();
        if after_part {
            kept = kept.trim_start_matches('\n');
        }
        if before_part {
            kept = kept.trim_end_matches('\n');
        }
        if !kept.trim().is_empty() {
            parts.push(RichPart::Text(kept.to_string()));
        }
        text.clear();
    };
    for piece in fragment.pieces {
        match piece.part {
            Some(part) => {
                flush(&mut text, &mut parts, true);
                parts.push(*part);
            }
            None => text.push_str(&piece.text),
        }
    }
    flush(&mut text, &mut parts, false);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrKind, Syntax};
    use pretty_assertions::assert_eq;

    fn source_text_doc() -> IrNode {
        // <p>Hello</p><p>World</p>
        IrNode::new(IrKind::Document, Span::new(0, 24)).with_children(vec![
            IrNode::new(IrKind::Block, Span::new(0, 12))
                .with_children(vec![IrNode::text("Hello", Span::new(3, 8), true)]),
            IrNode::new(IrKind::Block, Span::new(12, 24))
                .with_children(vec![IrNode::text("World", Span::new(15, 20), true)]),
        ])
    }

    #[test]
    fn test_paragraphs_join_with_blank_line() {
        assert_eq!(write_plain(&source_text_doc()), "Hello\n\nWorld");
    }

    #[test]
    fn test_source_map_covers_output() {
        let mapped = write_with_source_map(&source_text_doc());
        let mut expected = 0;
        for segment in &mapped.source_map.segments {
            assert_eq!(segment.output_start, expected);
            expected = segment.output_end;
        }
        assert_eq!(expected, mapped.text.len());
        assert_eq!(mapped.source_map.to_input(7), Some(Span::new(15, 16)));
        assert_eq!(mapped.source_map.to_output(4), vec![Span::new(1, 2)]);
    }

    #[test]
    fn test_rich_output_splits_media() {
        let mut media = IrNode::new(
            IrKind::Media(MediaPart {
                media_type: "image/png".to_string(),
                base64: "AAAA".to_string(),
                alt: Some("a cat".to_string()),
            }),
            Span::new(10, 20),
        );
        media.syntax = Syntax::Multimedia;
        let doc = IrNode::new(IrKind::Document, Span::new(0, 30)).with_children(vec![
            IrNode::new(IrKind::Block, Span::new(0, 10))
                .with_children(vec![IrNode::text("Look", Span::new(3, 7), true)]),
            media,
        ]);
        let parts = write_rich(&doc);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], RichPart::Text("Look".to_string()));
        assert!(matches!(&parts[1], RichPart::Media(m) if m.base64 == "AAAA"));
        assert_eq!(write_plain(&doc), "Look\n\na cat");
    }

    #[test]
    fn test_text_beside_inline_media_keeps_its_spaces() {
        let mut media = IrNode::new(
            IrKind::Media(MediaPart {
                media_type: "image/png".to_string(),
                base64: "AAAA".to_string(),
                alt: Some("tiny".to_string()),
            }),
            Span::new(9, 30),
        );
        media.syntax = Syntax::Multimedia;
        let paragraph = IrNode::new(IrKind::Block, Span::new(0, 34)).with_children(vec![
            IrNode::text("Image ", Span::new(3, 9), true),
            media,
        ]);
        let doc = IrNode::new(IrKind::Document, Span::new(0, 34)).with_children(vec![paragraph]);
        let parts = write_rich(&doc);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], RichPart::Text("Image ".to_string()));
        assert_eq!(write_plain(&doc), "Image tiny");
    }

    #[test]
    fn test_messages_collapse_to_text() {
        let mut doc = source_text_doc();
        doc.children[1].speaker = Some(Speaker::Ai);
        let messages = write_messages(&doc, false);
        assert_eq!(
            messages,
            vec![
                Message {
                    speaker: Speaker::Human,
                    content: Content::Text("Hello".to_string()),
                },
                Message {
                    speaker: Speaker::Ai,
                    content: Content::Text("World".to_string()),
                },
            ]
        );
        let json = serde_json::to_value(&messages).unwrap();
        assert_eq!(json[1]["speaker"], "ai");
        assert_eq!(json[1]["content"], "World");
    }
}
