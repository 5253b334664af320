//! The injected function table: global functions, namespaces such as
//! `JSON` and `Math`, and the methods available on strings and arrays.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use super::ExprError;
use crate::value::{HostObject, Object, Value};

pub type NativeFn = fn(&[Value]) -> Result<Value, ExprError>;

/// Functions and namespaces visible to expressions.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    functions: HashMap<String, NativeFn>,
    namespaces: IndexMap<String, Value>,
}

impl FunctionTable {
    /// An empty table: expressions can only use operators and methods.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard library.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register_function("String", |args| {
            Ok(Value::String(arg(args, 0).to_display_string()))
        });
        table.register_function("Number", |args| Ok(Value::Number(arg(args, 0).to_number())));
        table.register_function("Boolean", |args| Ok(Value::Bool(arg(args, 0).is_truthy())));
        table.register_function("parseInt", parse_int);
        table.register_function("parseFloat", parse_float);
        table.register_function("isArray", |args| {
            Ok(Value::Bool(matches!(arg(args, 0), Value::Array(_))))
        });
        table.register_namespace("JSON", Value::Host(Arc::new(JsonNamespace)));
        table.register_namespace("Math", Value::Host(Arc::new(MathNamespace)));
        table.register_namespace("Object", Value::Host(Arc::new(ObjectNamespace)));
        table
    }

    pub fn register_function(&mut self, name: &str, function: NativeFn) {
        self.functions.insert(name.to_string(), function);
    }

    pub fn register_namespace(&mut self, name: &str, value: Value) {
        self.namespaces.insert(name.to_string(), value);
    }

    pub fn function(&self, name: &str) -> Option<NativeFn> {
        self.functions.get(name).copied()
    }

    pub fn namespace(&self, name: &str) -> Option<&Value> {
        self.namespaces.get(name)
    }

    /// Every global name, sorted, for completion.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .functions
            .keys()
            .chain(self.namespaces.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }
}

static NULL: Value = Value::Null;

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&NULL)
}

/// Upper bound on strings built by `repeat` and the pad methods.
const MAX_BUILT_LEN: usize = 1 << 20;

/// A non-negative whole count, rejecting NaN, infinities and values that
/// would build a string longer than `MAX_BUILT_LEN`.
fn count_arg(args: &[Value], index: usize, method: &str) -> Result<usize, ExprError> {
    let count = arg(args, index).to_number();
    if !count.is_finite() || count < 0.0 || count > MAX_BUILT_LEN as f64 {
        return Err(ExprError::type_error(format!(
            "Invalid count value for {method}: {}",
            arg(args, index).to_display_string()
        )));
    }
    Ok(count as usize)
}

fn string_arg(args: &[Value], index: usize, method: &str) -> Result<String, ExprError> {
    match args.get(index) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_display_string()),
        None => Err(ExprError::type_error(format!(
            "{method} expects an argument at position {index}"
        ))),
    }
}

fn parse_int(args: &[Value]) -> Result<Value, ExprError> {
    let text = arg(args, 0).to_display_string();
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let digits: String = digits.chars().take_while(char::is_ascii_digit).collect();
    let value = digits.parse::<f64>().unwrap_or(f64::NAN);
    Ok(Value::Number(if negative { -value } else { value }))
}

fn parse_float(args: &[Value]) -> Result<Value, ExprError> {
    let text = arg(args, 0).to_display_string();
    let text = text.trim();
    // Longest prefix that parses as a float.
    let value = (1..=text.len())
        .rev()
        .filter(|end| text.is_char_boundary(*end))
        .find_map(|end| text[..end].parse::<f64>().ok())
        .unwrap_or(f64::NAN);
    Ok(Value::Number(value))
}

/// Slice bounds with negative indexes counting from the end.
fn slice_bounds(args: &[Value], len: usize) -> (usize, usize) {
    let resolve = |value: &Value, default: usize| match value {
        Value::Null => default,
        other => {
            let n = other.to_number();
            if n.is_nan() {
                0
            } else if n < 0.0 {
                len.saturating_sub((-n) as usize)
            } else {
                (n as usize).min(len)
            }
        }
    };
    let start = resolve(arg(args, 0), 0);
    let end = resolve(arg(args, 1), len);
    (start, end.max(start))
}

/// Methods on plain values.
pub fn call_method(target: &Value, method: &str, args: Vec<Value>) -> Result<Value, ExprError> {
    match (target, method) {
        (_, "toString") => Ok(Value::String(target.to_display_string())),
        (Value::String(s), _) => string_method(s, method, &args),
        (Value::Array(items), _) => array_method(items, method, &args),
        (Value::Number(n), "toFixed") => {
            let digits = arg(&args, 0).to_number();
            let digits = if digits.is_nan() { 0.0 } else { digits };
            if !(0.0..=100.0).contains(&digits) {
                return Err(ExprError::type_error(
                    "toFixed() digits argument must be between 0 and 100",
                ));
            }
            let digits = digits as usize;
            Ok(Value::String(format!("{n:.digits$}")))
        }
        _ => Err(ExprError::UnknownMethod {
            type_name: target.type_name().to_string(),
            method: method.to_string(),
        }),
    }
}

fn string_method(s: &str, method: &str, args: &[Value]) -> Result<Value, ExprError> {
    Ok(match method {
        "toUpperCase" => Value::String(s.to_uppercase()),
        "toLowerCase" => Value::String(s.to_lowercase()),
        "trim" => Value::string(s.trim()),
        "trimStart" => Value::string(s.trim_start()),
        "trimEnd" => Value::string(s.trim_end()),
        "includes" => Value::Bool(s.contains(&string_arg(args, 0, method)?)),
        "startsWith" => Value::Bool(s.starts_with(&string_arg(args, 0, method)?)),
        "endsWith" => Value::Bool(s.ends_with(&string_arg(args, 0, method)?)),
        "indexOf" => {
            let needle = string_arg(args, 0, method)?;
            match s.find(&needle) {
                Some(byte) => Value::from(s[..byte].chars().count()),
                None => Value::Number(-1.0),
            }
        }
        "split" => {
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Null) => vec![Value::string(s)],
                Some(separator) => {
                    let separator = separator.to_display_string();
                    if separator.is_empty() {
                        s.chars().map(|c| Value::String(c.to_string())).collect()
                    } else {
                        s.split(separator.as_str()).map(Value::string).collect()
                    }
                }
            };
            Value::Array(parts)
        }
        "replace" | "replaceAll" => {
            let from = string_arg(args, 0, method)?;
            let to = string_arg(args, 1, method)?;
            if method == "replace" {
                Value::String(s.replacen(&from, &to, 1))
            } else {
                Value::String(s.replace(&from, &to))
            }
        }
        "slice" | "substring" => {
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(args, chars.len());
            Value::String(chars[start..end].iter().collect())
        }
        "repeat" => {
            let count = count_arg(args, 0, method)?;
            if s.len().saturating_mul(count) > MAX_BUILT_LEN {
                return Err(ExprError::type_error("repeat() result is too long"));
            }
            Value::String(s.repeat(count))
        }
        "padStart" | "padEnd" => {
            let width = match arg(args, 0).to_number() {
                n if n.is_nan() || n <= 0.0 => 0,
                _ => count_arg(args, 0, method)?,
            };
            let fill = match args.get(1) {
                Some(v) => v.to_display_string(),
                None => " ".to_string(),
            };
            let missing = width.saturating_sub(s.chars().count());
            let pad: String = fill.chars().cycle().take(missing).collect();
            if method == "padStart" {
                Value::String(format!("{pad}{s}"))
            } else {
                Value::String(format!("{s}{pad}"))
            }
        }
        _ => {
            return Err(ExprError::UnknownMethod {
                type_name: "string".to_string(),
                method: method.to_string(),
            })
        }
    })
}

fn array_method(items: &[Value], method: &str, args: &[Value]) -> Result<Value, ExprError> {
    Ok(match method {
        "join" => {
            let separator = match args.first() {
                None | Some(Value::Null) => ",".to_string(),
                Some(v) => v.to_display_string(),
            };
            Value::String(
                items
                    .iter()
                    .map(|v| match v {
                        Value::Null => String::new(),
                        other => other.to_display_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(&separator),
            )
        }
        "includes" => Value::Bool(items.contains(arg(args, 0))),
        "indexOf" => match items.iter().position(|v| v == arg(args, 0)) {
            Some(i) => Value::from(i),
            None => Value::Number(-1.0),
        },
        "slice" => {
            let (start, end) = slice_bounds(args, items.len());
            Value::Array(items[start..end].to_vec())
        }
        "concat" => {
            let mut out = items.to_vec();
            for value in args {
                match value {
                    Value::Array(more) => out.extend(more.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Value::Array(out)
        }
        "reverse" => Value::Array(items.iter().rev().cloned().collect()),
        "at" => {
            let n = arg(args, 0).to_number();
            let index = if n < 0.0 {
                items.len().checked_sub((-n) as usize)
            } else {
                Some(n as usize)
            };
            index
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(Value::Null)
        }
        _ => {
            return Err(ExprError::UnknownMethod {
                type_name: "array".to_string(),
                method: method.to_string(),
            })
        }
    })
}

// ============================================================================
// Namespaces
// ============================================================================

#[derive(Debug)]
struct JsonNamespace;

impl HostObject for JsonNamespace {
    fn type_name(&self) -> &'static str {
        "JSON"
    }

    fn call_method(&self, name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
        match name {
            "stringify" => {
                let json = arg(&args, 0).to_json();
                let indent = match args.get(2) {
                    Some(Value::Number(n)) if *n > 0.0 => " ".repeat((*n as usize).min(10)),
                    Some(Value::String(s)) => s.clone(),
                    _ => String::new(),
                };
                to_json_string(&json, &indent).map(Value::String)
            }
            "parse" => {
                let text = string_arg(&args, 0, "JSON.parse")?;
                serde_json::from_str(&text)
                    .map(Value::from_json)
                    .map_err(|e| ExprError::Custom(format!("JSON.parse: {e}")))
            }
            _ => Err(ExprError::UnknownMethod {
                type_name: "JSON".to_string(),
                method: name.to_string(),
            }),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Serialize with the given indent; an empty indent gives compact output.
pub(crate) fn to_json_string(json: &serde_json::Value, indent: &str) -> Result<String, ExprError> {
    if indent.is_empty() {
        return Ok(json.to_string());
    }
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    json.serialize(&mut serializer)
        .map_err(|e| ExprError::Custom(e.to_string()))?;
    String::from_utf8(out).map_err(|e| ExprError::Custom(e.to_string()))
}

#[derive(Debug)]
struct MathNamespace;

impl HostObject for MathNamespace {
    fn type_name(&self) -> &'static str {
        "Math"
    }

    fn get(&self, name: &str) -> Option<Value> {
        match name {
            "PI" => Some(Value::Number(std::f64::consts::PI)),
            "E" => Some(Value::Number(std::f64::consts::E)),
            _ => None,
        }
    }

    fn call_method(&self, name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
        let numbers: Vec<f64> = args.iter().map(Value::to_number).collect();
        let first = numbers.first().copied().unwrap_or(f64::NAN);
        let value = match name {
            "min" => numbers.iter().copied().fold(f64::INFINITY, f64::min),
            "max" => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            "round" => (first + 0.5).floor(),
            "floor" => first.floor(),
            "ceil" => first.ceil(),
            "abs" => first.abs(),
            "sqrt" => first.sqrt(),
            "pow" => first.powf(numbers.get(1).copied().unwrap_or(f64::NAN)),
            _ => {
                return Err(ExprError::UnknownMethod {
                    type_name: "Math".to_string(),
                    method: name.to_string(),
                })
            }
        };
        Ok(Value::Number(value))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
struct ObjectNamespace;

impl HostObject for ObjectNamespace {
    fn type_name(&self) -> &'static str {
        "Object"
    }

    fn call_method(&self, name: &str, args: Vec<Value>) -> Result<Value, ExprError> {
        let empty = Object::new();
        let object = match arg(&args, 0) {
            Value::Object(object) => object,
            Value::Null => {
                return Err(ExprError::type_error(format!(
                    "Object.{name} called on null"
                )))
            }
            _ => &empty,
        };
        let value = match name {
            "keys" => object.keys().map(|k| Value::string(k.as_str())).collect(),
            "values" => object.values().cloned().collect(),
            "entries" => object
                .iter()
                .map(|(k, v)| Value::Array(vec![Value::string(k.as_str()), v.clone()]))
                .collect(),
            _ => {
                return Err(ExprError::UnknownMethod {
                    type_name: "Object".to_string(),
                    method: name.to_string(),
                })
            }
        };
        Ok(Value::Array(value))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
