//! Error types for the POML compiler.

use thiserror::Error;

use crate::expr::ExprError;

pub use poml_syntax::{Location, Stage, SyntaxError};

/// All errors that can surface from the POML API.
///
/// The pipeline itself records problems as diagnostics; these errors are
/// what the convenience entry points and the file/format helpers return.
#[derive(Error, Debug)]
pub enum PomlError {
    #[error("{stage} error at line {}, column {}: {message}", location.line, location.column)]
    Diagnostic {
        stage: Stage,
        message: String,
        location: Location,
    },

    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("Expression error: {0}")]
    Expression(#[from] ExprError),

    #[error("Type error: {message}")]
    TypeError { message: String },

    #[error("Include error: {message}")]
    IncludeError { message: String },

    #[error("Schema error: {message}")]
    SchemaError { message: String },

    #[error("Unknown output format '{0}'")]
    UnknownFormat(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for POML operations
pub type Result<T> = std::result::Result<T, PomlError>;
