//! Editor queries over one compiled generation of a document.
//!
//! A [`DocumentAnalysis`] is immutable. Editors build a new one per edit
//! and may query an older one from any thread until it is dropped.

use poml_syntax::{Attribute, Diagnostic, NodeKind, NodeRef, OpenTagPartial, Span};
use serde::Serialize;

use crate::components::{ComponentDef, ComponentRegistry, PropDef};
use crate::eval::{TraceRecord, TraceValue};
use crate::ir::Speaker;
use crate::writer::{self, MappedMessage, MappedOutput, Segment};
use crate::{CompileOptions, Compilation, Poml};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hover {
    pub kind: NodeKind,
    pub range: Span,
    /// Canonical name of the enclosing component.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<&'static str>,
    /// Values of the innermost traced expression, one per evaluation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<TraceValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompletionKind {
    Component,
    CloseTag,
    Attribute,
    Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub label: String,
    pub kind: CompletionKind,
    /// Source range the label replaces.
    pub range: Span,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<&'static str>,
}

/// Source range of one output message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageOffset {
    pub speaker: Speaker,
    pub range: Span,
}

#[derive(Debug, Clone)]
pub struct DocumentAnalysis {
    document: Poml,
    compilation: Compilation,
    registry: ComponentRegistry,
    plain: MappedOutput,
    messages: Vec<MappedMessage>,
}

fn starts_with_ignore_case(candidate: &str, prefix: &str) -> bool {
    candidate
        .get(..prefix.len())
        .map_or(false, |head| head.eq_ignore_ascii_case(prefix))
}

/// Empty, or a tag name being typed.
fn is_partial_name(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        None => true,
        Some(first) => {
            first.is_ascii_alphabetic()
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        }
    }
}

impl DocumentAnalysis {
    pub fn new(source: &str, context: serde_json::Value, options: CompileOptions) -> Self {
        let registry = options.registry().clone();
        let document = Poml::parse_with(source, options);
        let compilation = document.compile(context);
        let plain = compilation.write_with_source_map();
        let messages = writer::write_messages_with_source_map(&compilation.ir, compilation.single_speaker);
        Self {
            document,
            compilation,
            registry,
            plain,
            messages,
        }
    }

    pub fn source(&self) -> &str {
        self.document.source()
    }

    pub fn compilation(&self) -> &Compilation {
        &self.compilation
    }

    /// Parse, evaluation and schema diagnostics.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.compilation.diagnostics.as_slice()
    }

    fn path_at(&self, offset: usize) -> Vec<NodeRef<'_>> {
        NodeRef::Root(self.document.root()).path_at(offset)
    }

    fn component_for(&self, name: &str) -> Option<&ComponentDef> {
        self.registry.lookup(name)
    }

    /// The innermost node at `offset`, with what it resolves to.
    pub fn hover(&self, offset: usize) -> Option<Hover> {
        let path = self.path_at(offset);
        let innermost = *path.last()?;
        let element = path.iter().rev().find_map(|node| match node {
            NodeRef::Element(element) => Some(*element),
            _ => None,
        });
        let def = element.and_then(|e| self.component_for(e.name()));

        let attribute = path.iter().rev().find_map(|node| match node {
            NodeRef::Attribute(attr) => Some(*attr),
            _ => None,
        });
        let documentation = match (def, attribute) {
            (Some(def), Some(attr)) => def.prop(&attr.key).map(|p| p.doc),
            (Some(def), None) => Some(def.doc),
            _ => None,
        };
        let values = self
            .compilation
            .trace
            .at(offset)
            .first()
            .map(|record: &&TraceRecord| record.values.clone())
            .unwrap_or_default();

        Some(Hover {
            kind: innermost.kind(),
            range: innermost.span(),
            component: def.map(|d| d.name),
            documentation,
            values,
        })
    }

    /// Candidates for a tag name, attribute name or attribute value being
    /// written at `offset`.
    pub fn complete(&self, offset: usize) -> Vec<Completion> {
        let path = self.path_at(offset);
        let Some(innermost) = path.last().copied() else {
            return Vec::new();
        };
        let element = path.iter().rev().find_map(|node| match node {
            NodeRef::Element(element) => Some(*element),
            _ => None,
        });

        match innermost {
            NodeRef::OpenTag(open) if open.name_span.contains_inclusive(offset) => {
                let prefix = self.slice(open.name_span.start, offset);
                self.complete_component(prefix, open.name_span)
            }
            NodeRef::OpenTag(open) => self.complete_attribute(open, None, offset),
            NodeRef::Attribute(attr) if attr.key_span.contains_inclusive(offset) => {
                let open = path.iter().rev().find_map(|node| match node {
                    NodeRef::OpenTag(open) => Some(*open),
                    _ => None,
                });
                match open {
                    Some(open) => self.complete_attribute(open, Some(attr), offset),
                    None => Vec::new(),
                }
            }
            NodeRef::Quoted(quoted) if quoted.value_span.contains_inclusive(offset) => {
                let attribute = path.iter().rev().find_map(|node| match node {
                    NodeRef::Attribute(attr) => Some(*attr),
                    _ => None,
                });
                let prop = element
                    .and_then(|e| self.component_for(e.name()))
                    .zip(attribute)
                    .and_then(|(def, attr)| def.prop(&attr.key));
                match prop {
                    Some(prop) => {
                        let prefix = self.slice(quoted.value_span.start, offset);
                        value_completions(prop, prefix, quoted.value_span)
                    }
                    None => Vec::new(),
                }
            }
            NodeRef::CloseTag(close) if close.name_span.contains_inclusive(offset) => {
                let prefix = self.slice(close.name_span.start, offset);
                self.complete_close_tag(offset, prefix, close.name_span)
            }
            // `<` and `</` not yet followed by a matching name stay text.
            NodeRef::Text(text) => {
                let head = self.slice(text.span.start, offset);
                let Some(lt) = head.rfind('<') else {
                    return Vec::new();
                };
                let after = &head[lt + 1..];
                let (closing, prefix) = match after.strip_prefix('/') {
                    Some(name) => (true, name),
                    None => (false, after),
                };
                if !is_partial_name(prefix) {
                    return Vec::new();
                }
                let range = Span::new(offset - prefix.len(), offset);
                if closing {
                    self.complete_close_tag(offset, prefix, range)
                } else {
                    self.complete_component(prefix, range)
                }
            }
            _ => Vec::new(),
        }
    }

    fn slice(&self, start: usize, end: usize) -> &str {
        self.source().get(start..end).unwrap_or("")
    }

    fn complete_component(&self, prefix: &str, range: Span) -> Vec<Completion> {
        self.registry
            .names()
            .into_iter()
            .filter(|name| starts_with_ignore_case(name, prefix))
            .map(|name| Completion {
                label: name.to_string(),
                kind: CompletionKind::Component,
                range,
                detail: self.component_for(name).map(|d| d.doc),
            })
            .collect()
    }

    /// Attribute names of the tag's component not written yet. `current`
    /// is the attribute whose key is under the cursor.
    fn complete_attribute(
        &self,
        open: &OpenTagPartial,
        current: Option<&Attribute>,
        offset: usize,
    ) -> Vec<Completion> {
        let Some(def) = self.component_for(&open.name) else {
            return Vec::new();
        };
        let (prefix, range) = match current {
            Some(attr) => (
                self.slice(attr.key_span.start, offset),
                Span::new(attr.key_span.start, attr.key_span.end),
            ),
            None => ("", Span::new(offset, offset)),
        };
        let written: Vec<String> = open
            .attributes
            .iter()
            .filter(|attr| current.map_or(true, |c| c.key_span != attr.key_span))
            .map(|attr| attr.key.to_ascii_lowercase())
            .collect();
        def.all_props()
            .filter(|p| !written.contains(&p.name.to_ascii_lowercase()))
            .filter(|p| starts_with_ignore_case(p.name, prefix))
            .map(|p| Completion {
                label: p.name.to_string(),
                kind: CompletionKind::Attribute,
                range,
                detail: Some(p.doc),
            })
            .collect()
    }

    /// The innermost element still open at `offset`.
    fn complete_close_tag(&self, offset: usize, prefix: &str, range: Span) -> Vec<Completion> {
        let open = self.path_at(offset).into_iter().rev().find_map(|node| match node {
            NodeRef::Element(element)
                if element.close.as_ref().map_or(true, |c| c.span.contains_inclusive(offset)) =>
            {
                Some(element.name())
            }
            _ => None,
        });
        open.filter(|name| starts_with_ignore_case(name, prefix))
            .map(|name| Completion {
                label: name.to_string(),
                kind: CompletionKind::CloseTag,
                range,
                detail: None,
            })
            .into_iter()
            .collect()
    }

    /// Source range of each chat message, in output order.
    pub fn message_offsets(&self) -> Vec<MessageOffset> {
        self.messages
            .iter()
            .map(|m| MessageOffset {
                speaker: m.speaker,
                range: m.span,
            })
            .collect()
    }

    /// Index of the message whose source range contains `offset`.
    pub fn message_at(&self, offset: usize) -> Option<usize> {
        self.messages.iter().position(|m| m.span.contains(offset))
    }

    /// Source map segments of the plain rendering.
    pub fn plain_spans(&self) -> &[Segment] {
        &self.plain.source_map.segments
    }

    pub fn plain_text(&self) -> &str {
        &self.plain.text
    }

    /// Source range behind the plain output character at `offset`.
    pub fn source_at_output(&self, offset: usize) -> Option<Span> {
        self.plain.source_map.to_input(offset)
    }

    /// Plain output ranges produced from the source character at `offset`.
    pub fn output_at_source(&self, offset: usize) -> Vec<Span> {
        self.plain.source_map.to_output(offset)
    }
}

fn value_completions(prop: &PropDef, prefix: &str, range: Span) -> Vec<Completion> {
    prop.values
        .iter()
        .filter(|value| starts_with_ignore_case(value, prefix))
        .map(|value| Completion {
            label: value.to_string(),
            kind: CompletionKind::Value,
            range,
            detail: None,
        })
        .collect()
}
