//! Block and inline layout of IR nodes into fragments.

use poml_syntax::Span;
use serde_json::Value as JsonValue;

use super::pieces::{normalize_run, Fragment, InlinePiece, Piece};
use super::{RichPart, ToolRequestPart, ToolResponsePart};
use crate::components::InlineStyle;
use crate::expr::stdlib::to_json_string;
use crate::ir::{escape_xml, CaptionEnding, CaptionStyle, IrKind, IrNode, ListStyle, Syntax, WhiteSpace};

const PARAGRAPH_BREAK: &str = "\n\n";

#[derive(Debug, Clone, Copy)]
struct Context {
    level: usize,
    /// Syntax of the enclosing container.
    syntax: Syntax,
}

/// Lays out one IR tree. In rich mode media and tool calls become parts;
/// in plain mode they fall back to text.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Layout {
    rich: bool,
}

fn inline_markers(style: InlineStyle, syntax: Syntax) -> (&'static str, &'static str) {
    match (syntax, style) {
        (_, InlineStyle::Plain) => ("", ""),
        (Syntax::Markdown | Syntax::Multimedia, InlineStyle::Bold) => ("**", "**"),
        (Syntax::Markdown | Syntax::Multimedia, InlineStyle::Italic) => ("*", "*"),
        (Syntax::Markdown | Syntax::Multimedia, InlineStyle::Strikethrough) => ("~~", "~~"),
        (Syntax::Markdown | Syntax::Multimedia, InlineStyle::Underline) => ("<u>", "</u>"),
        (Syntax::Html, InlineStyle::Bold) => ("<b>", "</b>"),
        (Syntax::Html, InlineStyle::Italic) => ("<i>", "</i>"),
        (Syntax::Html, InlineStyle::Strikethrough) => ("<s>", "</s>"),
        (Syntax::Html, InlineStyle::Underline) => ("<u>", "</u>"),
        _ => ("", ""),
    }
}

fn is_markdown(syntax: Syntax) -> bool {
    matches!(syntax, Syntax::Markdown | Syntax::Multimedia)
}

fn wrap(fragment: Fragment, open: &str, close: &str, span: Span) -> Fragment {
    let mut out = Fragment::synthetic(open, span);
    out.append(fragment);
    out.push_synthetic(close, span);
    out
}

impl Layout {
    pub fn plain() -> Self {
        Self { rich: false }
    }

    pub fn rich() -> Self {
        Self { rich: true }
    }

    pub fn render(&self, ir: &IrNode) -> Fragment {
        let ctx = Context {
            level: 1,
            syntax: ir.syntax,
        };
        let mut fragment = self.render_block(ir, ctx);
        fragment.trim_by(|c| c == '\n', char::is_whitespace);
        fragment
    }

    /// Render several top-level nodes as one document.
    pub fn render_all(&self, nodes: &[&IrNode], span: Span) -> Fragment {
        let white_space = nodes.first().map_or(WhiteSpace::default(), |n| n.white_space);
        let syntax = nodes.first().map_or(Syntax::default(), |n| n.syntax);
        let ctx = Context { level: 1, syntax };
        let groups = self.groups(nodes.iter().copied(), white_space, ctx);
        let mut fragment = Fragment::join(groups, PARAGRAPH_BREAK, span);
        fragment.trim_by(|c| c == '\n', char::is_whitespace);
        fragment
    }

    /// Children laid out as paragraphs: runs of inline nodes form one
    /// paragraph each, blocks stand alone. Blank groups are dropped.
    fn groups<'n>(
        &self,
        children: impl IntoIterator<Item = &'n IrNode>,
        white_space: WhiteSpace,
        ctx: Context,
    ) -> Vec<Fragment> {
        let mut out = Vec::new();
        let mut run: Vec<InlinePiece> = Vec::new();
        let flush = |run: &mut Vec<InlinePiece>, out: &mut Vec<Fragment>| {
            if run.is_empty() {
                return;
            }
            let fragment = normalize_run(std::mem::take(run), white_space);
            if !fragment.is_blank() {
                out.push(fragment);
            }
        };
        for child in children {
            if child.kind.is_inline() {
                self.render_inline(child, ctx, &mut run);
            } else {
                flush(&mut run, &mut out);
                let fragment = self.render_block(child, ctx);
                if !fragment.is_blank() {
                    out.push(fragment);
                }
            }
        }
        flush(&mut run, &mut out);
        out
    }

    fn container(&self, node: &IrNode, ctx: Context) -> Fragment {
        let inner = Context {
            syntax: node.syntax,
            ..ctx
        };
        let groups = self.groups(&node.children, node.white_space, inner);
        Fragment::join(groups, PARAGRAPH_BREAK, node.span)
    }

    fn inline_content(&self, node: &IrNode, ctx: Context) -> Fragment {
        let mut run = Vec::new();
        for child in &node.children {
            self.render_inline(child, ctx, &mut run);
        }
        normalize_run(run, node.white_space)
    }

    fn render_inline(&self, node: &IrNode, ctx: Context, run: &mut Vec<InlinePiece>) {
        let synthetic = |text: &str| InlinePiece {
            piece: Piece::new(text, node.span, false),
            policy: None,
        };
        match &node.kind {
            IrKind::Text { value, exact } => run.push(InlinePiece {
                piece: Piece::new(value.clone(), node.span, *exact),
                policy: Some(node.white_space),
            }),
            IrKind::LineBreak => run.push(synthetic("\n")),
            IrKind::Inline(style) => {
                let (open, close) = inline_markers(*style, node.syntax);
                if !open.is_empty() {
                    run.push(synthetic(open));
                }
                for child in &node.children {
                    self.render_inline(child, ctx, run);
                }
                if !close.is_empty() {
                    run.push(synthetic(close));
                }
            }
            IrKind::Code { inline: true, .. } => {
                let fence = if is_markdown(node.syntax) { "`" } else { "" };
                let (open, close) = match node.syntax {
                    Syntax::Html => ("<code>", "</code>"),
                    _ => (fence, fence),
                };
                if !open.is_empty() {
                    run.push(synthetic(open));
                }
                for text in code_pieces(node) {
                    run.push(InlinePiece {
                        piece: text,
                        policy: Some(WhiteSpace::Pre),
                    });
                }
                if !close.is_empty() {
                    run.push(synthetic(close));
                }
            }
            _ => {
                // A block inside inline content keeps its own layout.
                let fragment = self.render_block(node, ctx);
                run.extend(fragment.pieces.into_iter().map(|piece| InlinePiece {
                    piece,
                    policy: None,
                }));
            }
        }
    }

    fn render_block(&self, node: &IrNode, ctx: Context) -> Fragment {
        match &node.kind {
            IrKind::Document | IrKind::Message => self.container(node, ctx),
            IrKind::Block => {
                let body = self.container(node, ctx);
                if node.syntax == Syntax::Html && ctx.syntax != Syntax::Html && !body.is_blank() {
                    wrap(body, "<p>", "</p>", node.span)
                } else {
                    body
                }
            }
            IrKind::Section => self.container(
                node,
                Context {
                    level: ctx.level + 1,
                    ..ctx
                },
            ),
            IrKind::Heading => {
                let content = self.inline_content(node, ctx);
                self.heading(content, node, ctx.level)
            }
            IrKind::Captioned {
                caption,
                style,
                ending,
            } => self.captioned(node, caption, *style, *ending, ctx),
            IrKind::List { style } => self.list(node, *style, ctx),
            IrKind::ListItem => self.container(node, ctx),
            IrKind::Table { header, rows } => {
                Fragment::synthetic(markdown_table(header, rows), node.span)
            }
            IrKind::Code { lang, .. } => {
                let mut body = Fragment::new();
                for piece in code_pieces(node) {
                    body.push(piece);
                }
                body.trim_by(|c| c == '\n' || c == '\r', char::is_whitespace);
                if is_markdown(node.syntax) {
                    let open = format!("```{}\n", lang.as_deref().unwrap_or_default());
                    wrap(body, &open, "\n```", node.span)
                } else if node.syntax == Syntax::Html {
                    wrap(body, "<pre><code>", "</code></pre>", node.span)
                } else {
                    body
                }
            }
            IrKind::Serialized { value } => {
                let text = serialize(value, node.syntax);
                if ctx.syntax.is_serialization() {
                    Fragment::synthetic(text, node.span)
                } else {
                    let open = format!("```{}\n", node.syntax.as_str());
                    wrap(Fragment::synthetic(text, node.span), &open, "\n```", node.span)
                }
            }
            IrKind::Media(media) => {
                let alt = media.alt.clone().unwrap_or_default();
                if self.rich {
                    let mut fragment = Fragment::new();
                    fragment.push_part(RichPart::Media(media.clone()), alt, node.span);
                    fragment
                } else {
                    Fragment::synthetic(alt, node.span)
                }
            }
            IrKind::ToolRequest {
                id,
                name,
                parameters,
            } => {
                let request = ToolRequestPart {
                    id: id.clone(),
                    name: name.clone(),
                    parameters: parameters.clone(),
                };
                let fallback = serde_json::json!({
                    "id": id,
                    "name": name,
                    "parameters": parameters,
                });
                let fallback = to_json_string(&fallback, "  ").unwrap_or_default();
                if self.rich {
                    let mut fragment = Fragment::new();
                    fragment.push_part(RichPart::ToolRequest(request), fallback, node.span);
                    fragment
                } else {
                    Fragment::synthetic(fallback, node.span)
                }
            }
            IrKind::ToolResponse { id, name } => {
                let body = Layout::plain().container(node, ctx);
                if self.rich {
                    let content = body.text();
                    let mut fragment = Fragment::new();
                    let part = RichPart::ToolResponse(ToolResponsePart {
                        id: id.clone(),
                        name: name.clone(),
                        content: content.clone(),
                    });
                    fragment.push_part(part, content, node.span);
                    fragment
                } else {
                    body
                }
            }
            IrKind::Text { .. } | IrKind::Inline(_) | IrKind::LineBreak => {
                let mut run = Vec::new();
                self.render_inline(node, ctx, &mut run);
                normalize_run(run, node.white_space)
            }
        }
    }

    fn heading(&self, content: Fragment, node: &IrNode, level: usize) -> Fragment {
        let level = level.clamp(1, 6);
        match node.syntax {
            Syntax::Html => wrap(
                content,
                &format!("<h{level}>"),
                &format!("</h{level}>"),
                node.span,
            ),
            syntax if is_markdown(syntax) => {
                let mut out = Fragment::synthetic(format!("{} ", "#".repeat(level)), node.span);
                out.append(content);
                out
            }
            _ => content,
        }
    }

    fn captioned(
        &self,
        node: &IrNode,
        caption: &str,
        style: CaptionStyle,
        ending: CaptionEnding,
        ctx: Context,
    ) -> Fragment {
        let span = node.span;
        match style {
            CaptionStyle::Hidden => self.container(node, ctx),
            CaptionStyle::Header => {
                let heading = self.heading(Fragment::synthetic(caption, span), node, ctx.level);
                let body = self.container(
                    node,
                    Context {
                        level: ctx.level + 1,
                        ..ctx
                    },
                );
                if body.is_blank() {
                    return heading;
                }
                Fragment::join(vec![heading, body], PARAGRAPH_BREAK, span)
            }
            CaptionStyle::Bold | CaptionStyle::Plain => {
                let mut label = caption.to_string();
                if ending == CaptionEnding::Colon && !label.ends_with(':') {
                    label.push(':');
                }
                let label = match style {
                    CaptionStyle::Bold => {
                        let (open, close) = inline_markers(InlineStyle::Bold, node.syntax);
                        format!("{open}{label}{close}")
                    }
                    _ => label,
                };
                let body = self.container(node, ctx);
                if body.is_blank() {
                    return Fragment::synthetic(label, span);
                }
                let inline_body = node.children.iter().all(|c| c.kind.is_inline());
                let separator = match ending {
                    CaptionEnding::Newline => "\n",
                    CaptionEnding::None => " ",
                    CaptionEnding::Colon if inline_body => " ",
                    CaptionEnding::Colon => PARAGRAPH_BREAK,
                };
                Fragment::join(vec![Fragment::synthetic(label, span), body], separator, span)
            }
        }
    }

    fn list(&self, node: &IrNode, style: ListStyle, ctx: Context) -> Fragment {
        let inner = Context {
            syntax: node.syntax,
            ..ctx
        };
        let items: Vec<Fragment> = node
            .children
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let marker = style.marker(index);
                let mut content = match item.kind {
                    IrKind::ListItem => self.container(item, inner),
                    _ => self.render_block(item, inner),
                };
                content.indent(&" ".repeat(marker.chars().count()), item.span);
                let mut out = Fragment::synthetic(marker, item.span);
                out.append(content);
                out
            })
            .collect();
        Fragment::join(items, "\n", node.span)
    }
}

/// Verbatim text of a code element.
fn code_pieces(node: &IrNode) -> Vec<Piece> {
    node.walk()
        .into_iter()
        .filter_map(|n| match &n.kind {
            IrKind::Text { value, exact } => Some(Piece::new(value.clone(), n.span, *exact)),
            _ => None,
        })
        .collect()
}

fn table_cell(text: &str) -> String {
    text.replace('\n', " ").replace('|', "\\|")
}

/// A pipe table whose columns are as wide as their widest cell.
fn markdown_table(header: &[String], rows: &[Vec<String>]) -> String {
    let columns = header
        .len()
        .max(rows.iter().map(Vec::len).max().unwrap_or(0));
    if columns == 0 {
        return String::new();
    }
    let cell = |row: &[String], i: usize| table_cell(row.get(i).map_or("", String::as_str));
    let widths: Vec<usize> = (0..columns)
        .map(|i| {
            std::iter::once(cell(header, i))
                .chain(rows.iter().map(|row| cell(row, i)))
                .map(|text| text.chars().count())
                .max()
                .unwrap_or(0)
                .max(1)
        })
        .collect();
    let line = |cells: Vec<String>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(text, width)| {
                let pad = width.saturating_sub(text.chars().count());
                format!("{text}{}", " ".repeat(pad))
            })
            .collect();
        format!("| {} |", padded.join(" | "))
    };
    let mut lines = Vec::with_capacity(rows.len() + 2);
    lines.push(line((0..columns).map(|i| cell(header, i)).collect()));
    lines.push(line(widths.iter().map(|w| "-".repeat(*w)).collect()));
    for row in rows {
        lines.push(line((0..columns).map(|i| cell(row, i)).collect()));
    }
    lines.join("\n")
}

/// A value in a serialization syntax.
fn serialize(value: &JsonValue, syntax: Syntax) -> String {
    match syntax {
        Syntax::Yaml => match serde_yaml::to_string(value) {
            Ok(text) => text
                .strip_prefix("---\n")
                .unwrap_or(&text)
                .trim_end()
                .to_string(),
            Err(_) => to_json_string(value, "  ").unwrap_or_default(),
        },
        Syntax::Xml => {
            let mut out = String::new();
            write_xml(value, "data", 0, &mut out);
            out.trim_end().to_string()
        }
        _ => to_json_string(value, "  ").unwrap_or_default(),
    }
}

fn write_xml(value: &JsonValue, tag: &str, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    match value {
        JsonValue::Object(map) => {
            out.push_str(&format!("{indent}<{tag}>\n"));
            for (key, child) in map {
                write_xml(child, key, depth + 1, out);
            }
            out.push_str(&format!("{indent}</{tag}>\n"));
        }
        JsonValue::Array(items) => {
            out.push_str(&format!("{indent}<{tag}>\n"));
            for item in items {
                write_xml(item, "item", depth + 1, out);
            }
            out.push_str(&format!("{indent}</{tag}>\n"));
        }
        JsonValue::Null => out.push_str(&format!("{indent}<{tag}/>\n")),
        JsonValue::String(s) => out.push_str(&format!("{indent}<{tag}>{}</{tag}>\n", escape_xml(s))),
        other => out.push_str(&format!("{indent}<{tag}>{other}</{tag}>\n")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_markdown_table_widths() {
        let table = markdown_table(
            &["name".to_string(), "age".to_string()],
            &[
                vec!["Alice".to_string(), "30".to_string()],
                vec!["Bob".to_string(), "25".to_string()],
            ],
        );
        assert_eq!(
            table,
            "| name  | age |\n| ----- | --- |\n| Alice | 30  |\n| Bob   | 25  |"
        );
    }

    #[test]
    fn test_serialize_yaml_and_xml() {
        let value = json!({"a": 1, "b": ["x"]});
        assert_eq!(serialize(&value, Syntax::Yaml), "a: 1\nb:\n- x");
        assert_eq!(
            serialize(&value, Syntax::Xml),
            "<data>\n  <a>1</a>\n  <b>\n    <item>x</item>\n  </b>\n</data>"
        );
    }
}
