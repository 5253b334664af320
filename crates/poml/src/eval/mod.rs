//! Evaluation of a parsed document into a component tree.
//!
//! The evaluator walks the CST depth-first. Each element is resolved to a
//! component definition, `for` is expanded, `if` is checked per iteration,
//! and the element's attributes become props. `let`, `include`, pragmas
//! and the schema meta elements are handled here and leave nothing in the
//! tree except what an include brings in.
//!
//! Problems never abort the walk: they become diagnostics, and only the
//! subtree that failed is dropped.

mod attributes;
mod directives;
pub mod stylesheet;
pub mod trace;

use poml_syntax::{
    AttributeValue, Diagnostics, Element, ElementBody, ElementContent, LexerOptions, PragmaNode,
    Root, Span, Stage,
};

use crate::components::{ComponentDef, ComponentKind, ComponentRegistry, DOCUMENT, GENERIC};
use crate::expr::FunctionTable;
use crate::ir::WhiteSpace;
use crate::loader::SourceLoader;
use crate::schema::{schema_functions, SchemaCollector, SchemaOutcome};
use crate::scope::Scope;
use crate::tree::{ComponentChild, ComponentNode, TextChunk};
use crate::value::{Object, Value};

pub use stylesheet::Stylesheet;
pub use trace::{ExpressionTrace, TraceKind, TraceRecord, TraceValue};

/// Settings shared by a document and everything it includes.
#[derive(Debug, Clone)]
pub struct EvalOptions {
    pub registry: ComponentRegistry,
    pub functions: FunctionTable,
    pub lexer: LexerOptions,
    pub stylesheet: Stylesheet,
    /// Read media `src` files and embed them as base64.
    pub embed_media: bool,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            registry: ComponentRegistry::standard(),
            functions: FunctionTable::standard(),
            lexer: LexerOptions::default(),
            stylesheet: Stylesheet::default(),
            embed_media: true,
        }
    }
}

/// Result of evaluating one document.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Always a document node.
    pub tree: ComponentNode,
    pub trace: ExpressionTrace,
    pub schema: SchemaOutcome,
    /// Evaluation and schema diagnostics. Parse diagnostics are not
    /// repeated here, except those of included files.
    pub diagnostics: Diagnostics,
    /// Set by `<!-- @pragma speaker single -->`.
    pub single_speaker: bool,
}

/// Evaluate a parsed document against `scope`.
pub fn evaluate(
    root: &Root,
    scope: Scope,
    loader: &mut SourceLoader,
    options: &EvalOptions,
) -> Evaluation {
    let mut scope = scope;
    let mut evaluator = Evaluator::new(loader, options, options.registry.clone());
    let children = evaluator.eval_root(root, &mut scope);
    let tree = document_node(children, root.span);
    Evaluation {
        tree,
        trace: evaluator.trace,
        schema: evaluator.schema.finish(),
        diagnostics: evaluator.diagnostics,
        single_speaker: evaluator.single_speaker,
    }
}

/// Use the document's own `<poml>` element when it is the only content,
/// otherwise wrap everything in one.
fn document_node(children: Vec<ComponentChild>, span: Span) -> ComponentNode {
    let mut significant = children.iter().filter(|child| match child {
        ComponentChild::Text(text) => !text.value.trim().is_empty(),
        ComponentChild::Node(_) => true,
    });
    if let (Some(ComponentChild::Node(node)), None) = (significant.next(), significant.next()) {
        if node.def.kind == ComponentKind::Document {
            return node.clone();
        }
    }
    ComponentNode {
        def: DOCUMENT,
        tag: DOCUMENT.name.to_string(),
        props: Object::new(),
        children,
        span,
    }
}

pub(crate) struct Evaluator<'a> {
    loader: &'a mut SourceLoader,
    options: &'a EvalOptions,
    /// Pragmas can enable and disable components for the rest of the file.
    registry: ComponentRegistry,
    stylesheet: Stylesheet,
    schema_functions: FunctionTable,
    trace: ExpressionTrace,
    diagnostics: Diagnostics,
    schema: SchemaCollector,
    single_speaker: bool,
}

impl<'a> Evaluator<'a> {
    fn new(loader: &'a mut SourceLoader, options: &'a EvalOptions, registry: ComponentRegistry) -> Self {
        Self {
            loader,
            options,
            registry,
            stylesheet: options.stylesheet.clone(),
            schema_functions: schema_functions(&options.functions),
            trace: ExpressionTrace::new(),
            diagnostics: Diagnostics::new(),
            schema: SchemaCollector::new(),
            single_speaker: false,
        }
    }

    fn eval_root(&mut self, root: &Root, scope: &mut Scope) -> Vec<ComponentChild> {
        self.collect_stylesheets(&root.children);
        self.eval_contents(&root.children, scope)
    }

    /// Stylesheets apply to the whole file, wherever they appear.
    fn collect_stylesheets(&mut self, contents: &[ElementContent]) {
        for content in contents {
            let ElementContent::Element(element) = content else {
                continue;
            };
            let is_stylesheet = self
                .registry
                .lookup(element.name())
                .is_some_and(|def| def.kind == ComponentKind::Stylesheet);
            if !is_stylesheet {
                self.collect_stylesheets(element.children());
                continue;
            }
            let body = match &element.body {
                ElementBody::Literal(text) => text.value.clone(),
                _ => element_text(element),
            };
            match Stylesheet::parse(&body) {
                Ok(sheet) => {
                    tracing::debug!("applying stylesheet element");
                    self.stylesheet.merge(sheet);
                }
                Err(message) => self.diagnostics.error(element.span, message, Stage::Evaluate),
            }
        }
    }

    /// Evaluate a sibling sequence under its own frame, so `let` bindings
    /// are visible to later siblings and their descendants only.
    fn eval_contents(&mut self, contents: &[ElementContent], scope: &mut Scope) -> Vec<ComponentChild> {
        scope.push_scope(Object::new());
        let mut out = Vec::new();
        for content in contents {
            match content {
                ElementContent::Text(text) => out.push(ComponentChild::Text(TextChunk {
                    value: text.value.clone(),
                    span: text.span,
                    exact: true,
                })),
                ElementContent::Template(template) => {
                    if template.expression.is_empty() {
                        continue;
                    }
                    if let Some(value) = self.eval_expr(
                        &template.expression,
                        template.span,
                        TraceKind::Template,
                        scope,
                    ) {
                        out.push(ComponentChild::Text(TextChunk {
                            value: value.stringify(),
                            span: template.span,
                            exact: false,
                        }));
                    }
                }
                ElementContent::Comment(_) => {}
                ElementContent::Pragma(pragma) => self.apply_pragma(pragma),
                ElementContent::Element(element) => self.eval_element(element, scope, &mut out),
            }
        }
        scope.pop_scope();
        out
    }

    fn resolve(&mut self, element: &Element) -> ComponentDef {
        match self.registry.lookup(element.name()) {
            Some(def) => *def,
            None => {
                tracing::debug!(tag = element.name(), "unresolved component");
                self.diagnostics.info(
                    element.open.name_span,
                    format!(
                        "Unknown component <{}>; its content is rendered as is",
                        element.name()
                    ),
                    Stage::Evaluate,
                );
                GENERIC
            }
        }
    }

    fn eval_element(&mut self, element: &Element, scope: &mut Scope, out: &mut Vec<ComponentChild>) {
        let def = self.resolve(element);

        let Some(attr) = element.attribute("for") else {
            self.eval_instance(element, &def, scope, out);
            return;
        };
        let Some(AttributeValue::ForIterator(iterator)) = &attr.value else {
            // The parser has already reported a malformed iterator.
            if !matches!(attr.value, Some(AttributeValue::Quoted(_))) {
                self.diagnostics.error(
                    attr.span,
                    "for expects a value of the form 'item in expression'",
                    Stage::Evaluate,
                );
            }
            return;
        };
        let Some(collection) = self.eval_expr(
            &iterator.collection,
            iterator.collection_span,
            TraceKind::AttributeExpression,
            scope,
        ) else {
            return;
        };
        let items = match collection {
            Value::Array(items) => items,
            other => {
                self.diagnostics.error(
                    iterator.collection_span,
                    format!(
                        "for expects an array, but '{}' is {}",
                        iterator.collection,
                        other.type_name()
                    ),
                    Stage::Evaluate,
                );
                return;
            }
        };

        let length = items.len();
        for (index, item) in items.into_iter().enumerate() {
            let mut frame = Object::new();
            frame.insert(iterator.iterator.clone(), item);
            frame.insert("loop".to_string(), loop_object(index, length));
            scope.push_scope(frame);
            self.eval_instance(element, &def, scope, out);
            scope.pop_scope();
        }
    }

    /// One iteration of an element: check `if`, then build the node.
    fn eval_instance(
        &mut self,
        element: &Element,
        def: &ComponentDef,
        scope: &mut Scope,
        out: &mut Vec<ComponentChild>,
    ) {
        if let Some(attr) = element.attribute("if") {
            match self.eval_attribute(attr, scope, true) {
                Some(Value::Bool(true)) => {}
                Some(Value::Bool(false)) | None => return,
                Some(other) => {
                    self.diagnostics.error(
                        attributes::value_span(attr),
                        format!("if expects a boolean, found {}", other.type_name()),
                        Stage::Evaluate,
                    );
                    return;
                }
            }
        }

        match def.kind {
            ComponentKind::Let => {
                self.eval_let(element, scope);
                return;
            }
            ComponentKind::Include => {
                self.eval_include(element, scope, out);
                return;
            }
            ComponentKind::OutputSchema | ComponentKind::ToolDefinition | ComponentKind::Runtime => {
                self.eval_meta(element, def, scope);
                return;
            }
            ComponentKind::Stylesheet => return,
            _ => {}
        }

        let mut props = self.eval_props(element, def, scope);
        let children = match &element.body {
            ElementBody::SelfClosing => Vec::new(),
            ElementBody::Literal(text) => vec![ComponentChild::Text(TextChunk {
                value: text.value.clone(),
                span: text.span,
                exact: true,
            })],
            ElementBody::Children(contents) => self.eval_contents(contents, scope),
        };
        if matches!(def.kind, ComponentKind::Image | ComponentKind::Audio) {
            self.load_media(element, &mut props);
        }
        out.push(ComponentChild::Node(ComponentNode {
            def: *def,
            tag: element.name().to_string(),
            props,
            children,
            span: element.span,
        }));
    }

    fn apply_pragma(&mut self, pragma: &PragmaNode) {
        tracing::debug!(directive = %pragma.directive, options = ?pragma.options, "pragma");
        match pragma.directive.to_ascii_lowercase().as_str() {
            "components" => {
                for option in &pragma.options {
                    let (enabled, name) = match option.strip_prefix('-') {
                        Some(name) => (false, name),
                        None => (true, option.strip_prefix('+').unwrap_or(option)),
                    };
                    if !self.registry.set_enabled(name, enabled) {
                        self.diagnostics.warning(
                            pragma.span,
                            format!("Unknown component '{name}' in pragma"),
                            Stage::Evaluate,
                        );
                    }
                }
            }
            "speaker" => match pragma.options.first().map(String::as_str) {
                Some("single") => self.single_speaker = true,
                Some("multi") => self.single_speaker = false,
                _ => self.diagnostics.warning(
                    pragma.span,
                    "speaker pragma expects 'single' or 'multi'",
                    Stage::Evaluate,
                ),
            },
            "whitespace" | "white-space" => {
                let value = pragma.options.first().map(String::as_str).unwrap_or_default();
                if value.parse::<WhiteSpace>().is_ok() {
                    self.stylesheet.set("*", "whiteSpace", Value::string(value));
                } else {
                    self.diagnostics.warning(
                        pragma.span,
                        format!("Unknown whitespace mode '{value}'"),
                        Stage::Evaluate,
                    );
                }
            }
            other => self.diagnostics.warning(
                pragma.span,
                format!("Unknown pragma '{other}'"),
                Stage::Evaluate,
            ),
        }
    }
}

fn loop_object(index: usize, length: usize) -> Value {
    let mut object = Object::new();
    object.insert("index".to_string(), Value::from(index));
    object.insert("length".to_string(), Value::from(length));
    object.insert("first".to_string(), Value::Bool(index == 0));
    object.insert("last".to_string(), Value::Bool(index + 1 == length));
    Value::Object(object)
}

/// Raw text of an element's body, ignoring templates and tags.
fn element_text(element: &Element) -> String {
    fn collect(contents: &[ElementContent], out: &mut String) {
        for content in contents {
            match content {
                ElementContent::Text(text) => out.push_str(&text.value),
                ElementContent::Element(element) => collect(element.children(), out),
                _ => {}
            }
        }
    }
    let mut out = String::new();
    match &element.body {
        ElementBody::Literal(text) => out.push_str(&text.value),
        ElementBody::Children(contents) => collect(contents, &mut out),
        ElementBody::SelfClosing => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{MemoryLoader, DEFAULT_MAX_INCLUDE_DEPTH};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn run_with(source: &str, context: serde_json::Value, loader: MemoryLoader) -> Evaluation {
        let parsed = poml_syntax::parse(source);
        let mut loader = SourceLoader::new(Arc::new(loader), "/docs", DEFAULT_MAX_INCLUDE_DEPTH);
        evaluate(
            &parsed.root,
            Scope::from_json(context),
            &mut loader,
            &EvalOptions::default(),
        )
    }

    fn run(source: &str) -> Evaluation {
        run_with(source, json!({}), MemoryLoader::new())
    }

    fn texts(node: &ComponentNode) -> Vec<String> {
        node.child_nodes().map(ComponentNode::text_content).collect()
    }

    #[test]
    fn test_for_expands_siblings() {
        let eval = run(r#"<p for="i in [1, 2, 3]">{{i}}</p>"#);
        assert_eq!(texts(&eval.tree), vec!["1", "2", "3"]);
        let record = eval
            .trace
            .records()
            .iter()
            .find(|r| r.expression == "i")
            .unwrap();
        assert_eq!(
            record.values,
            vec![
                TraceValue::Value(json!(1)),
                TraceValue::Value(json!(2)),
                TraceValue::Value(json!(3))
            ]
        );
    }

    #[test]
    fn test_loop_object() {
        let eval = run(
            r#"<p for="x in ['a', 'b']">{{loop.index}}{{loop.first}}{{loop.last}}{{loop.length}}</p>"#,
        );
        assert_eq!(texts(&eval.tree), vec!["0truefalse2", "1falsetrue2"]);
    }

    #[test]
    fn test_if_false_skips_subtree() {
        let eval = run(r#"<p if="false">{{ missing }}</p><p>kept</p>"#);
        assert_eq!(texts(&eval.tree), vec!["kept"]);
        assert!(eval.trace.records().iter().all(|r| r.expression != "missing"));
        assert!(eval.diagnostics.is_empty());
    }

    #[test]
    fn test_if_requires_boolean() {
        let eval = run(r#"<p if="{{ 1 }}">x</p>"#);
        assert_eq!(eval.tree.child_nodes().count(), 0);
        assert!(eval.diagnostics.as_slice()[0].message.contains("boolean"));
    }

    #[test]
    fn test_for_requires_array() {
        let eval = run(r#"<p for="x in 'abc'">{{x}}</p>"#);
        assert_eq!(eval.tree.child_nodes().count(), 0);
        assert!(eval.diagnostics.has_errors());
    }

    #[test]
    fn test_undefined_name_drops_only_that_text() {
        let eval = run("<p>a {{ nope }} b</p>");
        assert_eq!(texts(&eval.tree), vec!["a  b"]);
        assert_eq!(eval.diagnostics.len(), 1);
        assert_eq!(eval.diagnostics.as_slice()[0].message, "'nope' is not defined");
    }

    #[test]
    fn test_let_scoping() {
        let eval = run(concat!(
            r#"<section><let name="x" value="1 + 1"/><p>{{x}}</p></section>"#,
            r#"<p>{{x}}</p>"#
        ));
        let section = eval.tree.child_nodes().next().unwrap();
        assert_eq!(section.text_content(), "2");
        assert_eq!(eval.diagnostics.len(), 1);
    }

    #[test]
    fn test_let_body_and_spread() {
        let eval = run(concat!(
            r#"<let name="cfg">{"n": 3}</let>"#,
            r#"<let value="{{ {a: 'A'} }}"/>"#,
            r#"<p>{{cfg.n}}{{a}}</p>"#
        ));
        assert!(eval.diagnostics.is_empty(), "{:?}", eval.diagnostics);
        assert_eq!(texts(&eval.tree), vec!["3A"]);
    }

    #[test]
    fn test_context_and_sole_template_keeps_type() {
        let eval = run_with(
            r#"<table records="{{rows}}"/>"#,
            json!({"rows": [{"a": 1}]}),
            MemoryLoader::new(),
        );
        let table = eval.tree.child_nodes().next().unwrap();
        assert!(matches!(table.prop("records"), Some(Value::Array(_))));
    }

    #[test]
    fn test_include_reanchors() {
        let loader = MemoryLoader::new().with_file("/docs/part.poml", "<p>{{who}} {{ oops }}</p>");
        let source = r#"<let name="who" value="'Ada'"/><include src="part.poml"/>"#;
        let eval = run_with(source, json!({}), loader);
        let include_start = source.find("<include").unwrap();
        let p = eval.tree.child_nodes().next().unwrap();
        assert_eq!(p.text_content(), "Ada ");
        assert_eq!(p.span.start, include_start);
        let diagnostic = &eval.diagnostics.as_slice()[0];
        assert_eq!(&source[diagnostic.span.start..diagnostic.span.end], "\"part.poml\"");
    }

    #[test]
    fn test_include_cycle_is_a_diagnostic() {
        let loader = MemoryLoader::new()
            .with_file("/docs/a.poml", r#"<include src="b.poml"/>"#)
            .with_file("/docs/b.poml", r#"<include src="a.poml"/>"#);
        let eval = run_with(r#"<include src="a.poml"/>"#, json!({}), loader);
        assert!(eval
            .diagnostics
            .iter()
            .any(|d| d.message.contains("Circular include")));
    }

    #[test]
    fn test_missing_include() {
        let eval = run(r#"<p>a</p><include src="gone.poml"/><p>b</p>"#);
        assert_eq!(texts(&eval.tree), vec!["a", "b"]);
        assert!(eval.diagnostics.as_slice()[0].message.contains("File not found"));
    }

    #[test]
    fn test_unknown_component_is_generic() {
        let eval = run("<blink>hi</blink>");
        let node = eval.tree.child_nodes().next().unwrap();
        assert_eq!(node.def.kind, ComponentKind::Generic);
        assert_eq!(
            eval.diagnostics.as_slice()[0].severity,
            poml_syntax::Severity::Information
        );
    }

    #[test]
    fn test_components_pragma() {
        let eval = run("<!-- @pragma components -table --><table/>");
        let node = eval.tree.child_nodes().next().unwrap();
        assert_eq!(node.def.kind, ComponentKind::Generic);
    }

    #[test]
    fn test_speaker_pragma() {
        assert!(run("<!-- @pragma speaker single --><p>x</p>").single_speaker);
    }

    #[test]
    fn test_stylesheet_element_applies_everywhere() {
        let eval = run(r#"<p>x</p><stylesheet>{"p": {"syntax": "html"}}</stylesheet>"#);
        let p = eval.tree.child_nodes().next().unwrap();
        assert_eq!(p.prop_str("syntax"), Some("html"));
        assert_eq!(eval.tree.child_nodes().count(), 1);
    }

    #[test]
    fn test_explicit_poml_root_is_kept() {
        let eval = run("\n<poml syntax=\"text\"><p>x</p></poml>\n");
        assert_eq!(eval.tree.prop_str("syntax"), Some("text"));
    }

    #[test]
    fn test_output_schema_and_runtime() {
        let eval = run(concat!(
            r#"<output-schema>{"type": "object", "properties": {"a": {"type": "string"}}}</output-schema>"#,
            r#"<runtime model="gpt-4o" max-tokens="256" temperature="{{ 0.5 }}"/>"#,
            r#"<tool-definition name="lookup" description="Find a row">"#,
            r#"z.object({ id: z.number() })</tool-definition>"#,
        ));
        assert!(eval.diagnostics.is_empty(), "{:?}", eval.diagnostics);
        assert!(eval.schema.response_schema.is_some());
        assert_eq!(eval.schema.tools[0].name, "lookup");
        assert_eq!(
            eval.schema.tools[0].parameters.as_json()["required"],
            json!(["id"])
        );
        assert_eq!(eval.schema.runtime["maxTokens"], json!(256));
        assert_eq!(eval.schema.runtime["temperature"], json!(0.5));
        assert_eq!(eval.tree.child_nodes().count(), 0);
    }

    #[test]
    fn test_duplicate_output_schema() {
        let eval = run(concat!(
            r#"<output-schema>{"type": "string"}</output-schema>"#,
            r#"<output-schema>{"type": "number"}</output-schema><p>still here</p>"#
        ));
        assert!(eval.schema.response_schema.is_none());
        assert!(eval.diagnostics.iter().any(|d| d.stage == Stage::Schema));
        assert_eq!(texts(&eval.tree), vec!["still here"]);
    }

    #[test]
    fn test_media_is_embedded() {
        let loader = MemoryLoader::new().with_file("/docs/pic.png", vec![1u8, 2, 3]);
        let eval = run_with(r#"<img src="pic.png" alt="a pic"/>"#, json!({}), loader);
        let img = eval.tree.child_nodes().next().unwrap();
        assert_eq!(img.prop_str("base64"), Some("AQID"));
        assert_eq!(img.prop_str("type"), Some("image/png"));
    }
}
