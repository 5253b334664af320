//! The `z` schema builder exposed to `eval` schema bodies.
//!
//! `z.object({ name: z.string().describe("Full name"), age: z.number().optional() })`
//! builds the JSON Schema for an object with a required `name` and an
//! optional `age`.

use std::any::Any;
use std::sync::Arc;

use serde_json::{json, Map, Value as JsonValue};

use crate::expr::ExprError;
use crate::value::{HostObject, Value};

/// One schema under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaBuilder {
    schema: Map<String, JsonValue>,
    optional: bool,
}

impl SchemaBuilder {
    fn new(schema: JsonValue) -> Self {
        let schema = match schema {
            JsonValue::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            schema,
            optional: false,
        }
    }

    fn typed(name: &str) -> Self {
        Self::new(json!({ "type": name }))
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn to_schema(&self) -> JsonValue {
        JsonValue::Object(self.schema.clone())
    }

    fn declared_type(&self) -> Option<&str> {
        self.schema.get("type").and_then(JsonValue::as_str)
    }

    fn into_value(self) -> Value {
        Value::Host(Arc::new(self))
    }

    fn bound(&self, method: &str, args: &[Value]) -> Result<Self, ExprError> {
        let n = match args.first() {
            Some(Value::Number(n)) => *n,
            _ => {
                return Err(ExprError::type_error(format!(
                    "{method}() expects a number"
                )))
            }
        };
        let key = match (self.declared_type(), method) {
            (Some("string"), "min") => "minLength",
            (Some("string"), "max") => "maxLength",
            (Some("array"), "min") => "minItems",
            (Some("array"), "max") => "maxItems",
            (_, "min") => "minimum",
            _ => "maximum",
        };
        let mut next = self.clone();
        next.schema.insert(key.to_string(), number_json(n));
        Ok(next)
    }
}

/// Integral bounds stay integers.
fn number_json(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

impl HostObject for SchemaBuilder {
    fn type_name(&self) -> &'static str {
        "schema"
    }

    fn call_method(&self, name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
        let mut next = self.clone();
        match name {
            "describe" => {
                let text = args.first().map(Value::to_display_string).unwrap_or_default();
                next.schema
                    .insert("description".to_string(), JsonValue::String(text));
            }
            "optional" => next.optional = true,
            "nullable" => {
                let schema = JsonValue::Object(next.schema.clone());
                next.schema = match next.schema.get("type").cloned() {
                    Some(JsonValue::String(t)) => {
                        let mut map = next.schema.clone();
                        map.insert("type".to_string(), json!([t, "null"]));
                        map
                    }
                    _ => {
                        let mut map = Map::new();
                        map.insert("anyOf".to_string(), json!([schema, {"type": "null"}]));
                        map
                    }
                };
            }
            "int" => {
                next.schema
                    .insert("type".to_string(), JsonValue::String("integer".to_string()));
            }
            "min" | "max" => next = self.bound(name, &args)?,
            "array" => return Ok(array_of(self.clone()).into_value()),
            _ => {
                return Err(ExprError::UnknownMethod {
                    type_name: "schema".to_string(),
                    method: name.to_string(),
                })
            }
        }
        Ok(next.into_value())
    }

    fn to_json(&self) -> JsonValue {
        self.to_schema()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Extract a builder from a runtime value.
pub fn as_builder(value: &Value) -> Option<&SchemaBuilder> {
    match value {
        Value::Host(host) => host.as_any().downcast_ref::<SchemaBuilder>(),
        _ => None,
    }
}

fn expect_builder<'a>(value: Option<&'a Value>, method: &str) -> Result<&'a SchemaBuilder, ExprError> {
    value
        .and_then(as_builder)
        .ok_or_else(|| ExprError::type_error(format!("z.{method}() expects a schema")))
}

fn array_of(item: SchemaBuilder) -> SchemaBuilder {
    SchemaBuilder::new(json!({ "type": "array", "items": item.to_schema() }))
}

/// The `z` namespace.
#[derive(Debug, Default)]
pub struct SchemaNamespace;

impl HostObject for SchemaNamespace {
    fn type_name(&self) -> &'static str {
        "z"
    }

    fn call_method(&self, name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
        let builder = match name {
            "string" | "number" | "integer" | "boolean" | "null" => SchemaBuilder::typed(name),
            "any" | "unknown" => SchemaBuilder::new(json!({})),
            "array" => array_of(expect_builder(args.first(), name)?.clone()),
            "object" => {
                let shape = match args.first() {
                    Some(Value::Object(shape)) => shape,
                    _ => return Err(ExprError::type_error("z.object() expects an object")),
                };
                let mut properties = Map::new();
                let mut required = Vec::new();
                for (key, value) in shape {
                    let field = expect_builder(Some(value), name)?;
                    if !field.is_optional() {
                        required.push(JsonValue::String(key.clone()));
                    }
                    properties.insert(key.clone(), field.to_schema());
                }
                SchemaBuilder::new(json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                    "additionalProperties": false,
                }))
            }
            "enum" => {
                let values = match args.first() {
                    Some(Value::Array(values)) => values,
                    _ => return Err(ExprError::type_error("z.enum() expects an array")),
                };
                let values: Vec<JsonValue> = values.iter().map(Value::to_json).collect();
                if values.iter().all(JsonValue::is_string) {
                    SchemaBuilder::new(json!({ "type": "string", "enum": values }))
                } else {
                    SchemaBuilder::new(json!({ "enum": values }))
                }
            }
            "literal" => {
                let value = args.first().map(Value::to_json).unwrap_or(JsonValue::Null);
                SchemaBuilder::new(json!({ "const": value }))
            }
            "union" => {
                let options = match args.first() {
                    Some(Value::Array(options)) => options,
                    _ => return Err(ExprError::type_error("z.union() expects an array")),
                };
                let schemas = options
                    .iter()
                    .map(|o| expect_builder(Some(o), name).map(SchemaBuilder::to_schema))
                    .collect::<Result<Vec<_>, _>>()?;
                SchemaBuilder::new(json!({ "anyOf": schemas }))
            }
            _ => {
                return Err(ExprError::UnknownMethod {
                    type_name: "z".to_string(),
                    method: name.to_string(),
                })
            }
        };
        Ok(builder.into_value())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
