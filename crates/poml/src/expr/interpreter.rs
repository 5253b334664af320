//! Tree-walking evaluator for parsed expressions.

use super::ast::{BinaryOp, Expr, LogicalOp, UnaryOp};
use super::stdlib::{self, FunctionTable};
use super::{ExprError, Resolver};
use crate::value::{Object, Value};

pub struct Interpreter<'a> {
    functions: &'a FunctionTable,
    resolver: &'a dyn Resolver,
}

impl<'a> Interpreter<'a> {
    pub fn new(functions: &'a FunctionTable, resolver: &'a dyn Resolver) -> Self {
        Self {
            functions,
            resolver,
        }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, ExprError> {
        Ok(self.eval_chain(expr)?.unwrap_or(Value::Null))
    }

    /// Evaluate, returning `None` when an optional chain short-circuits so
    /// that `a?.b.c` yields null instead of failing on `.c`.
    fn eval_chain(&self, expr: &Expr) -> Result<Option<Value>, ExprError> {
        match expr {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let Some(target) = self.eval_chain(object)? else {
                    return Ok(None);
                };
                if *optional && target.is_null() {
                    return Ok(None);
                }
                get_property(&target, property).map(Some)
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let Some(target) = self.eval_chain(object)? else {
                    return Ok(None);
                };
                if *optional && target.is_null() {
                    return Ok(None);
                }
                let key = self.eval(index)?;
                get_index(&target, &key).map(Some)
            }
            Expr::Call {
                callee,
                args,
                optional,
            } => self.eval_call(callee, args, *optional),
            other => self.eval_simple(other).map(Some),
        }
    }

    fn eval_simple(&self, expr: &Expr) -> Result<Value, ExprError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Object(entries) => {
                let mut object = Object::new();
                for (key, value) in entries {
                    object.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Object(object))
            }
            Expr::Ident(name) => self.lookup(name),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::TypeOf => Value::string(match value {
                        Value::Null => "object",
                        Value::Array(_) => "object",
                        ref other => other.type_name(),
                    }),
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, left, right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left)?;
                let take_left = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Nullish => !left.is_null(),
                };
                if take_left {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Member { .. } | Expr::Index { .. } | Expr::Call { .. } => self.eval(expr),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, ExprError> {
        if let Some(value) = self.resolver.resolve(name) {
            return Ok(value);
        }
        if let Some(value) = self.functions.namespace(name) {
            return Ok(value.clone());
        }
        match name {
            "NaN" => Ok(Value::Number(f64::NAN)),
            "Infinity" => Ok(Value::Number(f64::INFINITY)),
            _ => Err(ExprError::Undefined(name.to_string())),
        }
    }

    fn eval_call(
        &self,
        callee: &Expr,
        args: &[Expr],
        optional: bool,
    ) -> Result<Option<Value>, ExprError> {
        match callee {
            Expr::Member {
                object,
                property,
                optional: member_optional,
            } => {
                let Some(target) = self.eval_chain(object)? else {
                    return Ok(None);
                };
                if *member_optional && target.is_null() {
                    return Ok(None);
                }
                let args = self.eval_args(args)?;
                match &target {
                    Value::Host(host) => host.call_method(property, args).map(Some),
                    _ => stdlib::call_method(&target, property, args).map(Some),
                }
            }
            Expr::Ident(name) if self.resolver.resolve(name).is_none() => {
                let function = self
                    .functions
                    .function(name)
                    .ok_or_else(|| match self.functions.namespace(name) {
                        Some(_) => ExprError::NotCallable(name.clone()),
                        None => ExprError::Undefined(name.clone()),
                    })?;
                let args = self.eval_args(args)?;
                function(&args).map(Some)
            }
            other => {
                let Some(value) = self.eval_chain(other)? else {
                    return Ok(None);
                };
                if optional && value.is_null() {
                    return Ok(None);
                }
                Err(ExprError::NotCallable(describe(other)))
            }
        }
    }

    fn eval_args(&self, args: &[Expr]) -> Result<Vec<Value>, ExprError> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member { property, .. } => property.clone(),
        _ => "expression".to_string(),
    }
}

pub(crate) fn get_property(target: &Value, property: &str) -> Result<Value, ExprError> {
    match target {
        Value::Null => Err(ExprError::type_error(format!(
            "Cannot read properties of null (reading '{property}')"
        ))),
        Value::String(s) if property == "length" => Ok(Value::from(s.chars().count())),
        Value::Array(items) if property == "length" => Ok(Value::from(items.len())),
        Value::Object(object) => Ok(object.get(property).cloned().unwrap_or(Value::Null)),
        Value::Host(host) => Ok(host.get(property).unwrap_or(Value::Null)),
        _ => Ok(Value::Null),
    }
}

fn get_index(target: &Value, key: &Value) -> Result<Value, ExprError> {
    match (target, key) {
        (Value::Array(items), Value::Number(n)) => Ok(index_of(*n, items.len())
            .and_then(|i| items.get(i).cloned())
            .unwrap_or(Value::Null)),
        (Value::String(s), Value::Number(n)) => Ok(index_of(*n, s.chars().count())
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null)),
        (_, key) => get_property(target, &key.to_display_string()),
    }
}

fn index_of(n: f64, len: usize) -> Option<usize> {
    (n.fract() == 0.0 && n >= 0.0 && (n as usize) < len).then_some(n as usize)
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExprError> {
    Ok(match op {
        BinaryOp::Add => match (&left, &right) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::String(_), _)
            | (_, Value::String(_))
            | (Value::Array(_), _)
            | (_, Value::Array(_))
            | (Value::Object(_), _)
            | (_, Value::Object(_)) => Value::String(format!(
                "{}{}",
                left.to_display_string(),
                right.to_display_string()
            )),
            _ => Value::Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::StrictEq => Value::Bool(left == right),
        BinaryOp::StrictNotEq => Value::Bool(left != right),
        BinaryOp::Eq => Value::Bool(loose_equals(&left, &right)),
        BinaryOp::NotEq => Value::Bool(!loose_equals(&left, &right)),
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq => {
            let ordering = match (&left, &right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Gt => ordering.is_gt(),
                BinaryOp::LtEq => ordering.is_le(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::In => match &right {
            Value::Object(object) => Value::Bool(object.contains_key(&left.to_display_string())),
            Value::Array(items) => Value::Bool(
                index_of(left.to_number(), items.len()).is_some(),
            ),
            other => {
                return Err(ExprError::type_error(format!(
                    "Cannot use 'in' operator to search in {}",
                    other.type_name()
                )))
            }
        },
    })
}

fn loose_equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_))
        | (Value::Bool(_), _)
        | (_, Value::Bool(_)) => left.to_number() == right.to_number(),
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{evaluate, MapResolver};
    use serde_json::json;

    fn eval(source: &str) -> Result<Value, ExprError> {
        let scope = MapResolver::from([
            (
                "user".to_string(),
                Value::from_json(json!({"name": "Ada", "tags": ["a", "b"], "profile": null})),
            ),
            ("n".to_string(), Value::Number(3.0)),
        ]);
        evaluate(source, &scope, &FunctionTable::standard())
    }

    #[test]
    fn test_arithmetic_and_concat() {
        assert_eq!(eval("1 + 2 * n").unwrap(), Value::Number(7.0));
        assert_eq!(eval("'n=' + n").unwrap(), Value::string("n=3"));
        assert_eq!(eval("7 % 4").unwrap(), Value::Number(3.0));
    }

    #[test]
    fn test_member_and_index() {
        assert_eq!(eval("user.name").unwrap(), Value::string("Ada"));
        assert_eq!(eval("user.tags[1]").unwrap(), Value::string("b"));
        assert_eq!(eval("user['name']").unwrap(), Value::string("Ada"));
        assert_eq!(eval("user.missing").unwrap(), Value::Null);
        assert_eq!(eval("user.tags.length").unwrap(), Value::Number(2.0));
    }

    #[test]
    fn test_optional_chaining_short_circuits() {
        assert_eq!(eval("user.profile?.email.domain").unwrap(), Value::Null);
        assert!(eval("user.profile.email").is_err());
    }

    #[test]
    fn test_logical_operators() {
        assert_eq!(eval("user.profile ?? 'none'").unwrap(), Value::string("none"));
        assert_eq!(eval("0 || 'x'").unwrap(), Value::string("x"));
        assert_eq!(eval("n > 2 && n < 4").unwrap(), Value::Bool(true));
        assert_eq!(eval("n === 3 ? 'yes' : 'no'").unwrap(), Value::string("yes"));
        assert_eq!(eval("'3' == n").unwrap(), Value::Bool(true));
        assert_eq!(eval("'3' === n").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_undefined_variable() {
        assert_eq!(eval("nope + 1"), Err(ExprError::Undefined("nope".into())));
    }

    #[test]
    fn test_unknown_function() {
        assert!(matches!(eval("launch()"), Err(ExprError::Undefined(_))));
        assert!(matches!(eval("JSON()"), Err(ExprError::NotCallable(_))));
    }
}
