//! Response schemas, tool definitions and runtime parameters declared by
//! meta elements.
//!
//! Schema problems are file-global: any error withholds the response
//! schema and the tools, while the rest of the document still renders.

pub mod builder;
mod validate;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use poml_syntax::{to_camel_case, Diagnostics, Span, Stage};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::expr::{ExprError, FunctionTable};
use crate::value::Value;

pub use builder::{as_builder, SchemaBuilder, SchemaNamespace};
pub use validate::ValidationError;

static NUMERIC_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^-?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").unwrap());

static JSON_TEMPLATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{(?s:(.*?))\}\}").unwrap());

/// How the body of a schema declaration is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaParser {
    Json,
    Eval,
    /// `json` when the body looks like an object literal, else `eval`.
    #[default]
    Auto,
}

impl SchemaParser {
    /// Settle `auto` for a concrete body.
    pub fn resolve(self, body: &str) -> SchemaParser {
        match self {
            SchemaParser::Auto if body.trim_start().starts_with('{') => SchemaParser::Json,
            SchemaParser::Auto => SchemaParser::Eval,
            other => other,
        }
    }
}

impl FromStr for SchemaParser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(SchemaParser::Json),
            "eval" | "expr" => Ok(SchemaParser::Eval),
            "auto" | "" => Ok(SchemaParser::Auto),
            other => Err(format!("unknown parser '{other}'")),
        }
    }
}

/// A JSON-Schema document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SchemaObject {
    schema: JsonValue,
}

impl SchemaObject {
    /// Accept a JSON-Schema document after a structural check.
    pub fn from_json(schema: JsonValue) -> Result<Self, String> {
        validate::check_structure(&schema, "")?;
        Ok(Self { schema })
    }

    /// Convert the result of an `eval` body: a builder, or a plain object
    /// holding a schema document.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        if let Some(builder) = as_builder(value) {
            return Self::from_json(builder.to_schema());
        }
        match value {
            Value::Object(_) => Self::from_json(value.to_json()),
            other => Err(format!(
                "schema expression must produce a schema, found {}",
                other.type_name()
            )),
        }
    }

    pub fn as_json(&self) -> &JsonValue {
        &self.schema
    }

    pub fn into_json(self) -> JsonValue {
        self.schema
    }

    /// Every constraint `instance` violates; empty when it conforms.
    pub fn validate(&self, instance: &JsonValue) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        validate::validate(&self.schema, instance, "", &mut errors);
        errors
    }

    pub fn is_valid(&self, instance: &JsonValue) -> bool {
        self.validate(instance).is_empty()
    }
}

impl fmt::Display for SchemaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.schema)
    }
}

/// Serializes as `{"type": "function", "name", "description", "parameters"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename = "function")]
pub struct ToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: SchemaObject,
}

/// Everything a document declared through meta elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<SchemaObject>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub runtime: Map<String, JsonValue>,
}

/// Function table for `eval` bodies: the standard library plus `z`.
pub fn schema_functions(base: &FunctionTable) -> FunctionTable {
    let mut table = base.clone();
    table.register_namespace("z", Value::Host(Arc::new(SchemaNamespace)));
    table
}

/// Strip statement dressing so `return z.object({...});` reads as an
/// expression. Returns the offset of the expression inside `body` too.
pub fn eval_expression(body: &str) -> (&str, usize) {
    let leading = body.len() - body.trim_start().len();
    let mut expr = body.trim();
    let mut offset = leading;
    if let Some(rest) = expr.strip_prefix("return") {
        if rest.starts_with(char::is_whitespace) || rest.starts_with('(') {
            let trimmed = rest.trim_start();
            offset += expr.len() - trimmed.len();
            expr = trimmed;
        }
    }
    let expr = expr.trim_end().trim_end_matches(';').trim_end();
    (expr, offset)
}

/// Replace `{{ }}` inside a JSON body. `eval` receives the expression and
/// its byte range within `body`. Strings are inserted as they are, other
/// values as JSON text.
pub fn interpolate_json<F>(body: &str, mut eval: F) -> Result<String, ExprError>
where
    F: FnMut(&str, std::ops::Range<usize>) -> Result<Value, ExprError>,
{
    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    for captures in JSON_TEMPLATE.captures_iter(body) {
        let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        out.push_str(&body[last..whole.start()]);
        let text = inner.as_str();
        let start = inner.start() + (text.len() - text.trim_start().len());
        let expr = text.trim();
        let value = eval(expr, start..start + expr.len())?;
        match value {
            Value::String(s) => out.push_str(&s),
            other => out.push_str(&other.to_json().to_string()),
        }
        last = whole.end();
    }
    out.push_str(&body[last..]);
    Ok(out)
}

/// Coerce a runtime attribute: `"true"`/`"false"` become booleans, numeric
/// literals numbers, valid JSON structured values; anything else stays a
/// string.
pub fn coerce_runtime_value(value: &Value) -> JsonValue {
    let text = match value {
        Value::String(s) => s.trim(),
        other => return other.to_json(),
    };
    match text {
        "true" => return JsonValue::Bool(true),
        "false" => return JsonValue::Bool(false),
        _ => {}
    }
    if NUMERIC_LITERAL.is_match(text) {
        if let Ok(n) = text.parse::<i64>() {
            return JsonValue::from(n);
        }
        if let Some(n) = text.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
            return JsonValue::Number(n);
        }
    }
    if text.starts_with(['{', '[', '"']) {
        if let Ok(json) = serde_json::from_str::<JsonValue>(text) {
            return json;
        }
    }
    match value {
        Value::String(s) => JsonValue::String(s.clone()),
        other => other.to_json(),
    }
}

/// Accumulates declarations while a document is evaluated.
#[derive(Debug, Default)]
pub struct SchemaCollector {
    response_schema: Option<SchemaObject>,
    tools: Vec<ToolDefinition>,
    runtime: Map<String, JsonValue>,
    failed: bool,
}

impl SchemaCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_response_schema(
        &mut self,
        schema: SchemaObject,
        span: Span,
        diagnostics: &mut Diagnostics,
    ) {
        if self.response_schema.is_some() {
            self.fail(
                span,
                "Multiple output schemas declared; only one is allowed per document",
                diagnostics,
            );
            return;
        }
        self.response_schema = Some(schema);
    }

    pub fn add_tool(
        &mut self,
        name: Option<String>,
        description: Option<String>,
        parameters: SchemaObject,
        span: Span,
        diagnostics: &mut Diagnostics,
    ) {
        let name = match name.map(|n| n.trim().to_string()) {
            Some(name) if !name.is_empty() => name,
            _ => {
                self.fail(span, "Tool definition requires a non-empty name", diagnostics);
                return;
            }
        };
        self.tools.push(ToolDefinition {
            name,
            description,
            parameters,
        });
    }

    /// Record a runtime parameter. Keys are camelCased.
    pub fn add_runtime(&mut self, key: &str, value: &Value) {
        self.runtime
            .insert(to_camel_case(key), coerce_runtime_value(value));
    }

    /// Record a schema error; the schema result is withheld from now on.
    pub fn fail(&mut self, span: Span, message: impl Into<String>, diagnostics: &mut Diagnostics) {
        let message = message.into();
        tracing::warn!(start = span.start, end = span.end, "schema error: {message}");
        self.failed = true;
        diagnostics.error(span, message, Stage::Schema);
    }

    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Fold declarations from an included document into this one.
    pub fn absorb(&mut self, other: SchemaCollector, span: Span, diagnostics: &mut Diagnostics) {
        self.failed |= other.failed;
        if let Some(schema) = other.response_schema {
            self.set_response_schema(schema, span, diagnostics);
        }
        self.tools.extend(other.tools);
        self.runtime.extend(other.runtime);
    }

    pub fn finish(self) -> SchemaOutcome {
        if self.failed {
            return SchemaOutcome {
                response_schema: None,
                tools: Vec::new(),
                runtime: self.runtime,
            };
        }
        SchemaOutcome {
            response_schema: self.response_schema,
            tools: self.tools,
            runtime: self.runtime,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("true", json!(true))]
    #[case("false", json!(false))]
    #[case("42", json!(42))]
    #[case("0.7", json!(0.7))]
    #[case("[1, 2]", json!([1, 2]))]
    #[case("{\"a\": 1}", json!({"a": 1}))]
    #[case("gpt-4o", json!("gpt-4o"))]
    #[case("{broken", json!("{broken"))]
    fn test_runtime_coercion(#[case] raw: &str, #[case] expected: JsonValue) {
        assert_eq!(coerce_runtime_value(&Value::string(raw)), expected);
    }

    #[test]
    fn test_parser_resolution() {
        assert_eq!(SchemaParser::Auto.resolve("  {\"type\": \"string\"}"), SchemaParser::Json);
        assert_eq!(SchemaParser::Auto.resolve("z.string()"), SchemaParser::Eval);
        assert_eq!(SchemaParser::Json.resolve("z.string()"), SchemaParser::Json);
        assert_eq!("eval".parse::<SchemaParser>(), Ok(SchemaParser::Eval));
    }

    #[test]
    fn test_eval_expression_strips_return() {
        let body = "\n  return z.string();\n";
        let (expr, offset) = eval_expression(body);
        assert_eq!(expr, "z.string()");
        assert_eq!(&body[offset..offset + expr.len()], "z.string()");
    }

    #[test]
    fn test_interpolate_json() {
        let body = r#"{"type": "string", "maxLength": {{ n }}, "description": "{{d}}"}"#;
        let mut seen = Vec::new();
        let out = interpolate_json(body, |expr, range| {
            seen.push((expr.to_string(), range.clone()));
            Ok(match expr {
                "n" => Value::Number(3.0),
                _ => Value::string("short"),
            })
        })
        .unwrap();
        assert_eq!(
            serde_json::from_str::<JsonValue>(&out).unwrap(),
            json!({"type": "string", "maxLength": 3, "description": "short"})
        );
        assert_eq!(&body[seen[0].1.clone()], "n");
    }

    #[test]
    fn test_duplicate_schema_withholds_result() {
        let mut diagnostics = Diagnostics::new();
        let mut collector = SchemaCollector::new();
        let schema = SchemaObject::from_json(json!({"type": "string"})).unwrap();
        collector.set_response_schema(schema.clone(), Span::new(0, 5), &mut diagnostics);
        collector.set_response_schema(schema, Span::new(10, 15), &mut diagnostics);
        collector.add_runtime("max-tokens", &Value::string("100"));
        let outcome = collector.finish();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics.as_slice()[0].span, Span::new(10, 15));
        assert_eq!(outcome.response_schema, None);
        assert_eq!(outcome.runtime.get("maxTokens"), Some(&json!(100)));
    }

    #[test]
    fn test_unnamed_tool_is_an_error() {
        let mut diagnostics = Diagnostics::new();
        let mut collector = SchemaCollector::new();
        let params = SchemaObject::from_json(json!({"type": "object"})).unwrap();
        collector.add_tool(Some("  ".into()), None, params, Span::new(0, 1), &mut diagnostics);
        assert!(diagnostics.has_errors());
        assert!(collector.finish().tools.is_empty());
    }

    #[test]
    fn test_from_value_rejects_scalars() {
        assert!(SchemaObject::from_value(&Value::Number(1.0)).is_err());
        let object = Value::from_json(json!({"type": "number"}));
        assert_eq!(
            SchemaObject::from_value(&object).unwrap().as_json(),
            &json!({"type": "number"})
        );
    }
}
