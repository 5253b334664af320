//! Lowering: component tree to IR.
//!
//! Presentation props (`syntax`, `whiteSpace`) are inherited, so every IR
//! node carries its effective values. `speaker` is set only on the node
//! that declares it.

use std::str::FromStr;

use poml_syntax::{Diagnostics, Span, Stage};
use serde_json::Value as JsonValue;

use crate::components::{ComponentKind, InlineStyle};
use crate::ir::{IrKind, IrNode, ListStyle, MediaPart, Speaker, Syntax, WhiteSpace};
use crate::tree::{ComponentChild, ComponentNode, TextChunk};
use crate::value::Value;

/// Lower an evaluated document. Invalid presentation props are reported
/// and replaced by their defaults.
pub fn lower(tree: &ComponentNode, diagnostics: &mut Diagnostics) -> IrNode {
    let mut lowering = Lowering { diagnostics };
    let inherited = Inherited {
        syntax: Syntax::default(),
        white_space: WhiteSpace::default(),
    };
    let mut nodes = lowering.lower_node(tree, inherited);
    match nodes.len() {
        1 if matches!(nodes[0].kind, IrKind::Document) => nodes.remove(0),
        _ => IrNode::new(IrKind::Document, tree.span).with_children(nodes),
    }
}

#[derive(Debug, Clone, Copy)]
struct Inherited {
    syntax: Syntax,
    white_space: WhiteSpace,
}

struct Lowering<'d> {
    diagnostics: &'d mut Diagnostics,
}

impl<'d> Lowering<'d> {
    fn enum_prop<T: FromStr<Err = String>>(&mut self, node: &ComponentNode, name: &str) -> Option<T> {
        let raw = node.prop_string(name)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(message) => {
                self.diagnostics.warning(node.span, message, Stage::Write);
                None
            }
        }
    }

    fn bool_prop(node: &ComponentNode, name: &str) -> Option<bool> {
        match node.prop(name)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn lower_children(&mut self, node: &ComponentNode, inherited: Inherited) -> Vec<IrNode> {
        let mut out = Vec::new();
        for child in &node.children {
            match child {
                ComponentChild::Text(text) => out.push(lower_text(text, inherited)),
                ComponentChild::Node(child) => out.extend(self.lower_node(child, inherited)),
            }
        }
        out
    }

    fn lower_node(&mut self, node: &ComponentNode, parent: Inherited) -> Vec<IrNode> {
        if node.def.kind.is_meta()
            || matches!(node.def.kind, ComponentKind::Let | ComponentKind::Include)
        {
            return Vec::new();
        }

        let default_syntax = match node.def.kind {
            ComponentKind::Image | ComponentKind::Audio => Syntax::Multimedia,
            ComponentKind::Object if !parent.syntax.is_serialization() => Syntax::Json,
            _ => parent.syntax,
        };
        let default_white_space = match node.def.kind {
            ComponentKind::Text | ComponentKind::Code => WhiteSpace::Pre,
            _ => parent.white_space,
        };
        let inherited = Inherited {
            syntax: self.enum_prop(node, "syntax").unwrap_or(default_syntax),
            white_space: self
                .enum_prop(node, "whiteSpace")
                .unwrap_or(default_white_space),
        };
        let mut speaker: Option<Speaker> = self.enum_prop(node, "speaker");

        let kind = match node.def.kind {
            ComponentKind::Document => IrKind::Document,
            ComponentKind::Paragraph => IrKind::Block,
            ComponentKind::Section => IrKind::Section,
            ComponentKind::Header => IrKind::Heading,
            ComponentKind::LineBreak => IrKind::LineBreak,
            ComponentKind::Inline(style) => IrKind::Inline(style),
            ComponentKind::Text => IrKind::Inline(InlineStyle::Plain),
            ComponentKind::CaptionedParagraph | ComponentKind::Intention => {
                let caption = node
                    .prop_string("caption")
                    .or_else(|| node.def.default_caption.map(str::to_string));
                match caption {
                    Some(caption) => IrKind::Captioned {
                        caption,
                        style: self.enum_prop(node, "captionStyle").unwrap_or_default(),
                        ending: self.enum_prop(node, "captionEnding").unwrap_or_default(),
                    },
                    None => IrKind::Block,
                }
            }
            ComponentKind::Code => {
                let lang = node.prop_string("lang");
                let inline = Self::bool_prop(node, "inline")
                    .unwrap_or_else(|| !node.text_content().contains('\n'));
                IrKind::Code { lang, inline }
            }
            ComponentKind::List => IrKind::List {
                style: self.enum_prop::<ListStyle>(node, "listStyle").unwrap_or_default(),
            },
            ComponentKind::ListItem => IrKind::ListItem,
            ComponentKind::Table => return vec![self.lower_table(node, inherited, speaker)],
            ComponentKind::Object => {
                let value = node.prop("data").map(Value::to_json).unwrap_or(JsonValue::Null);
                IrKind::Serialized { value }
            }
            ComponentKind::Image | ComponentKind::Audio => {
                return vec![lower_media(node, inherited, speaker)];
            }
            ComponentKind::Message(role) => {
                speaker = Some(role);
                IrKind::Message
            }
            ComponentKind::ToolRequest => {
                speaker = speaker.or(Some(Speaker::Ai));
                IrKind::ToolRequest {
                    id: node.prop_string("id").unwrap_or_default(),
                    name: node.prop_string("name").unwrap_or_default(),
                    parameters: node
                        .prop("parameters")
                        .map(json_prop)
                        .unwrap_or(JsonValue::Object(Default::default())),
                }
            }
            ComponentKind::ToolResponse => {
                speaker = speaker.or(Some(Speaker::Tool));
                IrKind::ToolResponse {
                    id: node.prop_string("id").unwrap_or_default(),
                    name: node.prop_string("name").unwrap_or_default(),
                }
            }
            ComponentKind::Generic => {
                let children = self.lower_children(node, inherited);
                let kind = if children.iter().all(|c| c.kind.is_inline()) {
                    IrKind::Inline(InlineStyle::Plain)
                } else {
                    IrKind::Block
                };
                return vec![finish(kind, node.span, inherited, speaker, children)];
            }
            // Handled above.
            ComponentKind::Let
            | ComponentKind::Include
            | ComponentKind::OutputSchema
            | ComponentKind::ToolDefinition
            | ComponentKind::Runtime
            | ComponentKind::Stylesheet => return Vec::new(),
        };

        let mut children = match kind {
            IrKind::Serialized { .. } | IrKind::ToolRequest { .. } => Vec::new(),
            _ => self.lower_children(node, inherited),
        };
        if let IrKind::List { .. } = kind {
            children = into_list_items(children, node.span, inherited);
        }
        vec![finish(kind, node.span, inherited, speaker, children)]
    }

    fn lower_table(
        &mut self,
        node: &ComponentNode,
        inherited: Inherited,
        speaker: Option<Speaker>,
    ) -> IrNode {
        let records = match node.prop("records").map(json_prop) {
            Some(JsonValue::Array(records)) => records,
            Some(other) => {
                self.diagnostics.warning(
                    node.span,
                    format!("table records must be an array, found {}", json_kind(&other)),
                    Stage::Write,
                );
                Vec::new()
            }
            None => Vec::new(),
        };
        let columns = node.prop("columns").map(json_prop);
        let (header, rows) = table_cells(records, columns);
        finish(
            IrKind::Table { header, rows },
            node.span,
            inherited,
            speaker,
            Vec::new(),
        )
    }
}

fn finish(
    kind: IrKind,
    span: Span,
    inherited: Inherited,
    speaker: Option<Speaker>,
    children: Vec<IrNode>,
) -> IrNode {
    let mut node = IrNode::new(kind, span).with_children(children);
    node.syntax = inherited.syntax;
    node.white_space = inherited.white_space;
    node.speaker = speaker;
    node
}

fn lower_text(text: &TextChunk, inherited: Inherited) -> IrNode {
    let mut node = IrNode::text(text.value.clone(), text.span, text.exact);
    node.syntax = inherited.syntax;
    node.white_space = inherited.white_space;
    node
}

fn lower_media(node: &ComponentNode, inherited: Inherited, speaker: Option<Speaker>) -> IrNode {
    let alt = node.prop_string("alt");
    match node.prop_string("base64") {
        Some(base64) if inherited.syntax == Syntax::Multimedia => {
            let default_type = match node.def.kind {
                ComponentKind::Audio => "audio/mpeg",
                _ => "image/png",
            };
            let part = MediaPart {
                media_type: node
                    .prop_string("type")
                    .unwrap_or_else(|| default_type.to_string()),
                base64,
                alt,
            };
            finish(IrKind::Media(part), node.span, inherited, speaker, Vec::new())
        }
        _ => {
            let mut text = IrNode::text(alt.unwrap_or_default(), node.span, false);
            text.syntax = inherited.syntax;
            text.white_space = inherited.white_space;
            text.speaker = speaker;
            text
        }
    }
}

/// List children that are not items are wrapped in one; whitespace
/// between items is dropped.
fn into_list_items(children: Vec<IrNode>, span: Span, inherited: Inherited) -> Vec<IrNode> {
    children
        .into_iter()
        .filter(|child| match &child.kind {
            IrKind::Text { value, .. } => !value.trim().is_empty(),
            _ => true,
        })
        .map(|child| match child.kind {
            IrKind::ListItem => child,
            _ => {
                let item_span = if child.span.is_empty() { span } else { child.span };
                finish(IrKind::ListItem, item_span, inherited, None, vec![child])
            }
        })
        .collect()
}

/// Props given as a JSON string are parsed.
fn json_prop(value: &Value) -> JsonValue {
    match value {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| JsonValue::String(s.clone())),
        other => other.to_json(),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn cell_text(value: &JsonValue) -> String {
    Value::from_json(value.clone()).stringify()
}

/// Header and body cells. Columns may be names or `{field, header}`
/// objects; without columns, object keys are used in order of first
/// appearance, and array records use their first row as the header.
fn table_cells(records: Vec<JsonValue>, columns: Option<JsonValue>) -> (Vec<String>, Vec<Vec<String>>) {
    let columns: Option<Vec<(String, String)>> = match columns {
        Some(JsonValue::Array(columns)) => Some(
            columns
                .iter()
                .map(|column| match column {
                    JsonValue::Object(map) => {
                        let field = map.get("field").map(cell_text).unwrap_or_default();
                        let header = map
                            .get("header")
                            .map(cell_text)
                            .unwrap_or_else(|| field.clone());
                        (field, header)
                    }
                    other => (cell_text(other), cell_text(other)),
                })
                .collect(),
        ),
        _ => None,
    };

    let all_arrays = !records.is_empty() && records.iter().all(JsonValue::is_array);
    if all_arrays {
        let mut rows: Vec<Vec<String>> = records
            .iter()
            .map(|record| match record {
                JsonValue::Array(cells) => cells.iter().map(cell_text).collect(),
                _ => Vec::new(),
            })
            .collect();
        let header = match columns {
            Some(columns) => columns.into_iter().map(|(_, header)| header).collect(),
            None => rows.remove(0),
        };
        return (header, rows);
    }

    let columns = columns.unwrap_or_else(|| {
        let mut keys: Vec<String> = Vec::new();
        for record in &records {
            if let JsonValue::Object(map) = record {
                for key in map.keys() {
                    if !keys.contains(key) {
                        keys.push(key.clone());
                    }
                }
            }
        }
        keys.into_iter().map(|k| (k.clone(), k)).collect()
    });
    let rows = records
        .iter()
        .map(|record| {
            columns
                .iter()
                .map(|(field, _)| record.get(field).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();
    let header = columns.into_iter().map(|(_, header)| header).collect();
    (header, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::{evaluate, EvalOptions};
    use crate::loader::{MemoryLoader, SourceLoader};
    use crate::scope::Scope;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn lower_source(source: &str) -> (IrNode, Diagnostics) {
        let parsed = poml_syntax::parse(source);
        let mut loader = SourceLoader::new(Arc::new(MemoryLoader::new()), "/", 4);
        let eval = evaluate(&parsed.root, Scope::default(), &mut loader, &EvalOptions::default());
        let mut diagnostics = Diagnostics::new();
        let ir = lower(&eval.tree, &mut diagnostics);
        (ir, diagnostics)
    }

    #[test]
    fn test_ranges_come_from_elements() {
        let source = "<poml><task>Do <b>it</b></task></poml>";
        let (ir, _) = lower_source(source);
        let task = &ir.children[0];
        assert!(matches!(task.kind, IrKind::Captioned { ref caption, .. } if caption == "Task"));
        assert_eq!(&source[task.span.start..task.span.end], "<task>Do <b>it</b></task>");
        let bold = &task.children[1];
        assert_eq!(&source[bold.span.start..bold.span.end], "<b>it</b>");
    }

    #[test]
    fn test_presentation_is_inherited() {
        let (ir, _) = lower_source(r#"<section syntax="html" whiteSpace="pre"><p>x</p></section>"#);
        let p = &ir.children[0].children[0];
        assert_eq!(p.syntax, Syntax::Html);
        assert_eq!(p.white_space, WhiteSpace::Pre);
    }

    #[test]
    fn test_invalid_prop_is_a_warning() {
        let (ir, diagnostics) = lower_source(r#"<list listStyle="roman"><item>a</item></list>"#);
        assert!(matches!(ir.children[0].kind, IrKind::List { style: ListStyle::Dash }));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_message_speaker() {
        let (ir, _) = lower_source("<ai-msg>hi</ai-msg><p speaker=\"system\">s</p>");
        assert_eq!(ir.children[0].speaker, Some(Speaker::Ai));
        assert_eq!(ir.children[1].speaker, Some(Speaker::System));
    }

    #[test]
    fn test_table_cells_from_objects() {
        let (header, rows) = table_cells(
            vec![json!({"name": "Alice", "age": 30}), json!({"name": "Bob"})],
            None,
        );
        assert_eq!(header, vec!["name", "age"]);
        assert_eq!(rows, vec![vec!["Alice", "30"], vec!["Bob", ""]]);
    }

    #[test]
    fn test_table_cells_with_columns_and_arrays() {
        let (header, rows) = table_cells(
            vec![json!(["Alice", 30])],
            Some(json!(["Name", {"field": "age", "header": "Age"}])),
        );
        assert_eq!(header, vec!["Name", "Age"]);
        assert_eq!(rows, vec![vec!["Alice", "30"]]);

        let (header, rows) = table_cells(vec![json!(["h1", "h2"]), json!([1, 2])], None);
        assert_eq!(header, vec!["h1", "h2"]);
        assert_eq!(rows, vec![vec!["1", "2"]]);
    }

    #[test]
    fn test_media_without_payload_falls_back_to_alt() {
        let (ir, _) = lower_source(r#"<img alt="a cat"/>"#);
        assert!(matches!(&ir.children[0].kind, IrKind::Text { value, .. } if value == "a cat"));
    }
}
