//! `let`, `include`, media loading and the schema meta elements.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use poml_syntax::{Diagnostic, Element, ElementBody, Span, Stage};
use serde_json::Value as JsonValue;

use super::attributes::value_span;
use super::trace::TraceKind;
use super::{element_text, Evaluator};
use crate::components::{ComponentDef, ComponentKind};
use crate::schema::{eval_expression, interpolate_json, SchemaObject, SchemaParser};
use crate::scope::Scope;
use crate::tree::{ComponentChild, ComponentNode};
use crate::value::{Object, Value};

/// Media type from a file extension.
pub(crate) fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        _ => "application/octet-stream",
    }
}

/// Interpret `let` content according to its `type`.
fn read_let_value(text: &str, ty: Option<&str>) -> Result<Value, String> {
    match ty.map(str::to_ascii_lowercase).as_deref() {
        Some("string") | Some("text") => Ok(Value::string(text)),
        Some("json") | Some("object") => serde_json::from_str::<JsonValue>(text)
            .map(Value::from_json)
            .map_err(|e| format!("let content is not valid JSON: {e}")),
        Some("number") => text
            .trim()
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| format!("let content '{}' is not a number", text.trim())),
        Some("boolean") => match text.trim() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            other => Err(format!("let content '{other}' is not a boolean")),
        },
        Some(other) => Err(format!("Unknown let type '{other}'")),
        None => Ok(serde_json::from_str::<JsonValue>(text.trim())
            .map(Value::from_json)
            .unwrap_or_else(|_| Value::string(text))),
    }
}

impl<'a> Evaluator<'a> {
    pub(super) fn eval_let(&mut self, element: &Element, scope: &mut Scope) {
        let name = self.eval_attribute_text(element, "name", scope);
        let ty = self.eval_attribute_text(element, "type", scope);

        let value = if let Some(attr) = element.attribute("value") {
            match self.eval_attribute(attr, scope, true) {
                Some(value) => value,
                None => return,
            }
        } else if let Some(attr) = element.attribute("src") {
            let Some(src) = self.eval_attribute_text(element, "src", scope) else {
                return;
            };
            let path = self.loader.resolve(&src);
            let text = match self.loader.read_text(&path) {
                Ok(text) => text,
                Err(e) => {
                    self.diagnostics
                        .error(value_span(attr), e.to_string(), Stage::Evaluate);
                    return;
                }
            };
            let is_json = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            let ty = ty.as_deref().or(if is_json { Some("json") } else { Some("string") });
            match read_let_value(&text, ty) {
                Ok(value) => value,
                Err(message) => {
                    self.diagnostics
                        .error(value_span(attr), message, Stage::Evaluate);
                    return;
                }
            }
        } else {
            let text = match &element.body {
                ElementBody::Children(contents) => {
                    let children = self.eval_contents(contents, scope);
                    children_text(&children)
                }
                _ => element_text(element),
            };
            match read_let_value(&text, ty.as_deref()) {
                Ok(value) => value,
                Err(message) => {
                    self.diagnostics
                        .error(element.body_span(), message, Stage::Evaluate);
                    return;
                }
            }
        };

        match (name, value) {
            (Some(name), value) => scope.set(name, value),
            (None, Value::Object(bindings)) => {
                for (name, value) in bindings {
                    scope.set(name, value);
                }
            }
            (None, _) => self.diagnostics.error(
                element.open.span,
                "let without a name must bind an object",
                Stage::Evaluate,
            ),
        }
    }

    pub(super) fn eval_include(
        &mut self,
        element: &Element,
        scope: &mut Scope,
        out: &mut Vec<ComponentChild>,
    ) {
        let Some(attr) = element.attribute("src") else {
            self.diagnostics.error(
                element.open.span,
                "include requires a src attribute",
                Stage::Evaluate,
            );
            return;
        };
        let anchor = value_span(attr);
        let Some(src) = self.eval_attribute_text(element, "src", scope) else {
            return;
        };

        let mut seed = scope.flatten();
        if let Some(attr) = element.attribute("context") {
            match self.eval_attribute(attr, scope, false) {
                Some(Value::Object(context)) => seed.extend(context),
                Some(other) => {
                    self.diagnostics.error(
                        value_span(attr),
                        format!("include context must be an object, found {}", other.type_name()),
                        Stage::Evaluate,
                    );
                    return;
                }
                None => return,
            }
        }

        let path = self.loader.resolve(&src);
        if let Err(e) = self.loader.push_include(&path) {
            self.diagnostics.error(anchor, e.to_string(), Stage::Evaluate);
            return;
        }
        tracing::debug!(path = %path.display(), depth = self.loader.include_depth(), "include");
        let text = match self.loader.read_text(&path) {
            Ok(text) => text,
            Err(e) => {
                self.loader.pop_include();
                self.diagnostics.error(anchor, e.to_string(), Stage::Evaluate);
                return;
            }
        };

        let parsed = poml_syntax::parse_with(&text, &self.options.lexer);
        let file = path.display().to_string();
        let reanchor = |d: Diagnostic| Diagnostic {
            span: anchor,
            message: format!("{file}: {}", d.message),
            ..d
        };
        for diagnostic in parsed.diagnostics {
            self.diagnostics.push(reanchor(diagnostic));
        }

        let mut child_scope = Scope::new(seed);
        let mut nested = Evaluator::new(&mut *self.loader, self.options, self.registry.clone());
        let children = nested.eval_root(&parsed.root, &mut child_scope);
        let Evaluator {
            trace,
            diagnostics,
            schema,
            single_speaker,
            ..
        } = nested;
        self.loader.pop_include();

        for diagnostic in diagnostics {
            self.diagnostics.push(reanchor(diagnostic));
        }
        self.trace.absorb(trace, element.span);
        self.schema.absorb(schema, element.span, &mut self.diagnostics);
        self.single_speaker |= single_speaker;

        for child in hoist_document(children) {
            out.push(match child {
                ComponentChild::Node(mut node) => {
                    node.reanchor(element.span);
                    ComponentChild::Node(node)
                }
                ComponentChild::Text(mut text) => {
                    text.span = element.span;
                    text.exact = false;
                    ComponentChild::Text(text)
                }
            });
        }
    }

    /// Read a media `src` into `base64` and `type` props.
    pub(super) fn load_media(&mut self, element: &Element, props: &mut Object) {
        if !self.options.embed_media || props.contains_key("base64") {
            return;
        }
        let Some(src) = props.get("src").and_then(Value::as_str).map(str::to_string) else {
            return;
        };
        let path = self.loader.resolve(&src);
        match self.loader.read_bytes(&path) {
            Ok(bytes) => {
                props.insert("base64".to_string(), Value::String(STANDARD.encode(bytes)));
                if !props.contains_key("type") {
                    props.insert("type".to_string(), Value::string(media_type_for(&path)));
                }
            }
            Err(e) => {
                let span = element.attribute("src").map_or(element.open.span, value_span);
                self.diagnostics.error(span, e.to_string(), Stage::Evaluate);
            }
        }
    }

    /// `output-schema`, `tool-definition` and `runtime`.
    pub(super) fn eval_meta(&mut self, element: &Element, def: &ComponentDef, scope: &Scope) {
        if def.kind == ComponentKind::Runtime {
            for attr in &element.open.attributes {
                if attr.key.eq_ignore_ascii_case("if") || attr.key.eq_ignore_ascii_case("for") {
                    continue;
                }
                if let Some(value) = self.eval_attribute(attr, scope, false) {
                    self.schema.add_runtime(&attr.key, &value);
                }
            }
            return;
        }

        let parser = match self.eval_attribute_text(element, "parser", scope) {
            Some(raw) => match raw.parse::<SchemaParser>() {
                Ok(parser) => parser,
                Err(message) => {
                    let span = element.attribute("parser").map_or(element.span, value_span);
                    self.schema.fail(span, message, &mut self.diagnostics);
                    return;
                }
            },
            None => SchemaParser::Auto,
        };
        let Some(schema) = self.build_schema(element, parser, scope) else {
            return;
        };

        if def.kind == ComponentKind::OutputSchema {
            self.schema
                .set_response_schema(schema, element.span, &mut self.diagnostics);
        } else {
            let name = self.eval_attribute_text(element, "name", scope);
            let description = self.eval_attribute_text(element, "description", scope);
            self.schema.add_tool(
                name,
                description,
                schema,
                element.span,
                &mut self.diagnostics,
            );
        }
    }

    fn build_schema(
        &mut self,
        element: &Element,
        parser: SchemaParser,
        scope: &Scope,
    ) -> Option<SchemaObject> {
        let (body, body_span) = match &element.body {
            ElementBody::Literal(text) => (text.value.clone(), text.span),
            _ => (element_text(element), element.body_span()),
        };
        if body.trim().is_empty() {
            self.schema
                .fail(element.span, "Schema declaration is empty", &mut self.diagnostics);
            return None;
        }

        let result = match parser.resolve(&body) {
            SchemaParser::Eval => {
                let (expr, offset) = eval_expression(&body);
                let span = Span::new(body_span.start + offset, body_span.start + offset + expr.len());
                self.eval_traced(expr, span, TraceKind::EvalBlock, scope)
                    .map_err(|e| format!("Schema expression failed: {e}"))
                    .and_then(|value| SchemaObject::from_value(&value))
            }
            _ => {
                let interpolated = interpolate_json(&body, |expr, range| {
                    let span = Span::new(body_span.start + range.start, body_span.start + range.end);
                    self.eval_traced(expr, span, TraceKind::Template, scope)
                });
                interpolated
                    .map_err(|e| format!("Schema template failed: {e}"))
                    .and_then(|text| {
                        serde_json::from_str::<JsonValue>(&text)
                            .map_err(|e| format!("Schema is not valid JSON: {e}"))
                    })
                    .and_then(SchemaObject::from_json)
            }
        };

        match result {
            Ok(schema) => Some(schema),
            Err(message) => {
                self.schema.fail(body_span, message, &mut self.diagnostics);
                None
            }
        }
    }
}

/// An included file's own `<poml>` wrapper is dropped.
fn hoist_document(children: Vec<ComponentChild>) -> Vec<ComponentChild> {
    let mut significant = children.iter().filter(|child| match child {
        ComponentChild::Text(text) => !text.value.trim().is_empty(),
        ComponentChild::Node(_) => true,
    });
    let is_wrapped = matches!(
        (significant.next(), significant.next()),
        (Some(ComponentChild::Node(ComponentNode { def, .. })), None)
            if def.kind == ComponentKind::Document
    );
    if !is_wrapped {
        return children;
    }
    children
        .into_iter()
        .find_map(|child| match child {
            ComponentChild::Node(node) => Some(node.children),
            ComponentChild::Text(_) => None,
        })
        .unwrap_or_default()
}

fn children_text(children: &[ComponentChild]) -> String {
    children
        .iter()
        .map(|child| match child {
            ComponentChild::Text(text) => text.value.clone(),
            ComponentChild::Node(node) => node.text_content(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("pic.PNG", "image/png")]
    #[case("a/b.jpeg", "image/jpeg")]
    #[case("clip.mp3", "audio/mpeg")]
    #[case("noext", "application/octet-stream")]
    fn test_media_type_for(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(media_type_for(Path::new(path)), expected);
    }

    #[test]
    fn test_read_let_value() {
        assert_eq!(read_let_value(" 42 ", None), Ok(Value::Number(42.0)));
        assert_eq!(read_let_value("hello", None), Ok(Value::string("hello")));
        assert_eq!(read_let_value("42", Some("string")), Ok(Value::string("42")));
        assert!(read_let_value("{", Some("json")).is_err());
        assert_eq!(read_let_value("true", Some("boolean")), Ok(Value::Bool(true)));
    }
}
