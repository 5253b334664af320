//! The embedded expression language.
//!
//! A closed grammar: literals, arrays and objects, arithmetic, comparison
//! and boolean operators, member/index access, and calls into an injected
//! [`FunctionTable`]. There are no statements and no user-defined
//! functions.
//!
//! ```
//! use poml::expr::{evaluate, FunctionTable, MapResolver};
//! use poml::Value;
//!
//! let scope = MapResolver::from([("name".to_string(), Value::string("ada"))]);
//! let value = evaluate("name.toUpperCase() + '!'", &scope, &FunctionTable::standard()).unwrap();
//! assert_eq!(value, Value::string("ADA!"));
//! ```

pub mod ast;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod stdlib;

use std::collections::HashMap;

use thiserror::Error;

use crate::value::Value;

pub use ast::Expr;
pub use interpreter::Interpreter;
pub use parser::parse_expression;
pub use stdlib::{FunctionTable, NativeFn};

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { message: String, offset: usize },

    #[error("'{0}' is not defined")]
    Undefined(String),

    #[error("{0}")]
    Type(String),

    #[error("'{0}' is not a function")]
    NotCallable(String),

    #[error("{type_name} has no method '{method}'")]
    UnknownMethod { type_name: String, method: String },

    #[error("{0}")]
    Custom(String),
}

impl ExprError {
    pub fn syntax(message: impl Into<String>, offset: usize) -> Self {
        ExprError::Syntax {
            message: message.into(),
            offset,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        ExprError::Type(message.into())
    }
}

/// Source of variable bindings for identifier lookup.
pub trait Resolver {
    fn resolve(&self, name: &str) -> Option<Value>;
}

/// A flat map of bindings, mostly useful for tests and one-off evaluation.
#[derive(Debug, Clone, Default)]
pub struct MapResolver(pub HashMap<String, Value>);

impl Resolver for MapResolver {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.0.get(name).cloned()
    }
}

impl<const N: usize> From<[(String, Value); N]> for MapResolver {
    fn from(entries: [(String, Value); N]) -> Self {
        MapResolver(HashMap::from(entries))
    }
}

/// Parse and evaluate in one call.
pub fn evaluate(
    source: &str,
    resolver: &dyn Resolver,
    functions: &FunctionTable,
) -> Result<Value, ExprError> {
    let expr = parse_expression(source)?;
    Interpreter::new(functions, resolver).eval(&expr)
}
