//! Component tree: the evaluated form of a document.

use poml_syntax::Span;

use crate::components::ComponentDef;
use crate::value::{Object, Value};

/// One resolved element with its evaluated props.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentNode {
    pub def: ComponentDef,
    /// Tag name as written in the source.
    pub tag: String,
    /// Props keyed in camelCase, in attribute order after stylesheet
    /// defaults.
    pub props: Object,
    pub children: Vec<ComponentChild>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComponentChild {
    Node(ComponentNode),
    Text(TextChunk),
}

/// Text from the source or from an evaluated template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub value: String,
    pub span: Span,
    /// `value` is the verbatim source text of `span`.
    pub exact: bool,
}

impl ComponentNode {
    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    pub fn prop_str(&self, name: &str) -> Option<&str> {
        self.props.get(name).and_then(Value::as_str)
    }

    /// A prop rendered as text, for string-ish props that may hold numbers.
    pub fn prop_string(&self, name: &str) -> Option<String> {
        match self.props.get(name)? {
            Value::Null => None,
            value => Some(value.stringify()),
        }
    }

    pub fn child_nodes(&self) -> impl Iterator<Item = &ComponentNode> {
        self.children.iter().filter_map(|child| match child {
            ComponentChild::Node(node) => Some(node),
            ComponentChild::Text(_) => None,
        })
    }

    /// Concatenated text of this subtree.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            match child {
                ComponentChild::Text(text) => out.push_str(&text.value),
                ComponentChild::Node(node) => out.push_str(&node.text_content()),
            }
        }
        out
    }

    /// Point every range in this subtree at `span`. Used for content that
    /// came from another file.
    pub fn reanchor(&mut self, span: Span) {
        self.span = span;
        for child in &mut self.children {
            match child {
                ComponentChild::Node(node) => node.reanchor(span),
                ComponentChild::Text(text) => {
                    text.span = span;
                    text.exact = false;
                }
            }
        }
    }
}
