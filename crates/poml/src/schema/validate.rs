//! Structural checks on schema documents and instance validation.

use serde::Serialize;
use serde_json::Value as JsonValue;

const TYPE_NAMES: &[&str] = &[
    "string", "number", "integer", "boolean", "object", "array", "null",
];

/// One failed constraint, located by JSON pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

fn pointer(path: &str, segment: &str) -> String {
    let escaped = segment.replace('~', "~0").replace('/', "~1");
    format!("{path}/{escaped}")
}

/// Reject documents that are not usable as a schema.
pub(crate) fn check_structure(schema: &JsonValue, path: &str) -> Result<(), String> {
    let map = match schema {
        JsonValue::Bool(_) => return Ok(()),
        JsonValue::Object(map) => map,
        other => {
            return Err(format!(
                "schema at '{}' must be an object, found {}",
                display_path(path),
                json_type(other)
            ))
        }
    };

    if let Some(ty) = map.get("type") {
        let names: Vec<&JsonValue> = match ty {
            JsonValue::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        for name in names {
            match name.as_str() {
                Some(n) if TYPE_NAMES.contains(&n) => {}
                _ => {
                    return Err(format!(
                        "unknown type {name} at '{}'",
                        display_path(&pointer(path, "type"))
                    ))
                }
            }
        }
    }

    if let Some(properties) = map.get("properties") {
        let properties = properties.as_object().ok_or_else(|| {
            format!("'properties' at '{}' must be an object", display_path(path))
        })?;
        for (key, sub) in properties {
            check_structure(sub, &pointer(&pointer(path, "properties"), key))?;
        }
    }

    if let Some(required) = map.get("required") {
        let ok = required
            .as_array()
            .is_some_and(|items| items.iter().all(JsonValue::is_string));
        if !ok {
            return Err(format!(
                "'required' at '{}' must be an array of strings",
                display_path(path)
            ));
        }
    }

    if let Some(items) = map.get("items") {
        check_structure(items, &pointer(path, "items"))?;
    }

    if let Some(additional) = map.get("additionalProperties") {
        check_structure(additional, &pointer(path, "additionalProperties"))?;
    }

    for key in ["anyOf", "oneOf", "allOf"] {
        if let Some(options) = map.get(key) {
            let options = options.as_array().ok_or_else(|| {
                format!("'{key}' at '{}' must be an array", display_path(path))
            })?;
            for (i, option) in options.iter().enumerate() {
                check_structure(option, &pointer(&pointer(path, key), &i.to_string()))?;
            }
        }
    }

    if let Some(values) = map.get("enum") {
        if !values.is_array() {
            return Err(format!("'enum' at '{}' must be an array", display_path(path)));
        }
    }

    Ok(())
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

pub(crate) fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(n) if n.is_i64() || n.is_u64() => "integer",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn matches_type(name: &str, value: &JsonValue) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => match value {
            JsonValue::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        },
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => false,
    }
}

/// Check `instance` against `schema`, appending every failure.
pub(crate) fn validate(
    schema: &JsonValue,
    instance: &JsonValue,
    path: &str,
    errors: &mut Vec<ValidationError>,
) {
    let map = match schema {
        JsonValue::Bool(false) => {
            errors.push(ValidationError {
                path: display_path(path).to_string(),
                message: "no value is allowed here".to_string(),
            });
            return;
        }
        JsonValue::Object(map) => map,
        _ => return,
    };
    let mut fail = |message: String| {
        errors.push(ValidationError {
            path: display_path(path).to_string(),
            message,
        })
    };

    if let Some(ty) = map.get("type") {
        let names: Vec<&str> = match ty {
            JsonValue::Array(items) => items.iter().filter_map(JsonValue::as_str).collect(),
            JsonValue::String(name) => vec![name.as_str()],
            _ => Vec::new(),
        };
        if !names.is_empty() && !names.iter().any(|name| matches_type(name, instance)) {
            fail(format!(
                "expected {}, found {}",
                names.join(" or "),
                json_type(instance)
            ));
            return;
        }
    }

    if let Some(JsonValue::Array(options)) = map.get("enum") {
        if !options.contains(instance) {
            fail(format!("{instance} is not one of the allowed values"));
        }
    }

    if let Some(expected) = map.get("const") {
        if expected != instance {
            fail(format!("expected {expected}, found {instance}"));
        }
    }

    if let Some(n) = instance.as_f64() {
        if let Some(min) = map.get("minimum").and_then(JsonValue::as_f64) {
            if n < min {
                fail(format!("{instance} is less than the minimum of {min}"));
            }
        }
        if let Some(max) = map.get("maximum").and_then(JsonValue::as_f64) {
            if n > max {
                fail(format!("{instance} is greater than the maximum of {max}"));
            }
        }
    }

    if let Some(s) = instance.as_str() {
        let len = s.chars().count() as u64;
        if let Some(min) = map.get("minLength").and_then(JsonValue::as_u64) {
            if len < min {
                fail(format!("string is shorter than {min} characters"));
            }
        }
        if let Some(max) = map.get("maxLength").and_then(JsonValue::as_u64) {
            if len > max {
                fail(format!("string is longer than {max} characters"));
            }
        }
    }

    if let Some(options) = map.get("anyOf").and_then(JsonValue::as_array) {
        let any = options.iter().any(|option| {
            let mut scratch = Vec::new();
            validate(option, instance, path, &mut scratch);
            scratch.is_empty()
        });
        if !any {
            fail("value does not match any of the allowed schemas".to_string());
        }
    }

    if let JsonValue::Array(items) = instance {
        let len = items.len() as u64;
        if let Some(min) = map.get("minItems").and_then(JsonValue::as_u64) {
            if len < min {
                fail(format!("array has fewer than {min} items"));
            }
        }
        if let Some(max) = map.get("maxItems").and_then(JsonValue::as_u64) {
            if len > max {
                fail(format!("array has more than {max} items"));
            }
        }
        if let Some(item_schema) = map.get("items") {
            for (i, item) in items.iter().enumerate() {
                validate(item_schema, item, &pointer(path, &i.to_string()), errors);
            }
        }
    }

    if let JsonValue::Object(fields) = instance {
        if let Some(required) = map.get("required").and_then(JsonValue::as_array) {
            for key in required.iter().filter_map(JsonValue::as_str) {
                if !fields.contains_key(key) {
                    errors.push(ValidationError {
                        path: display_path(path).to_string(),
                        message: format!("missing required property '{key}'"),
                    });
                }
            }
        }
        let properties = map.get("properties").and_then(JsonValue::as_object);
        for (key, value) in fields {
            let child = pointer(path, key);
            match properties.and_then(|p| p.get(key)) {
                Some(sub) => validate(sub, value, &child, errors),
                None => match map.get("additionalProperties") {
                    Some(JsonValue::Bool(false)) => errors.push(ValidationError {
                        path: child,
                        message: format!("unexpected property '{key}'"),
                    }),
                    Some(sub @ JsonValue::Object(_)) => validate(sub, value, &child, errors),
                    _ => {}
                },
            }
        }
    }
}
