//! Diagnostics accumulated by every stage of the pipeline.

use std::fmt;

use serde::Serialize;

use crate::Span;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Information,
    Hint,
}

/// The pipeline stage that produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Parse,
    Evaluate,
    Schema,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Parse => "parse",
            Stage::Evaluate => "evaluate",
            Stage::Schema => "schema",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub span: Span,
    pub severity: Severity,
    pub message: String,
    pub stage: Stage,
}

impl Diagnostic {
    pub fn new(span: Span, severity: Severity, message: impl Into<String>, stage: Stage) -> Self {
        Self {
            span,
            severity,
            message: message.into(),
            stage,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{}: {} [{}]",
            self.span.start, self.span.end, self.message, self.stage
        )
    }
}

/// Accumulator threaded through one parse/evaluate invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        tracing::trace!(
            stage = %diagnostic.stage,
            start = diagnostic.span.start,
            end = diagnostic.span.end,
            "{}",
            diagnostic.message
        );
        self.items.push(diagnostic);
    }

    pub fn error(&mut self, span: Span, message: impl Into<String>, stage: Stage) {
        self.push(Diagnostic::new(span, Severity::Error, message, stage));
    }

    pub fn warning(&mut self, span: Span, message: impl Into<String>, stage: Stage) {
        self.push(Diagnostic::new(span, Severity::Warning, message, stage));
    }

    pub fn info(&mut self, span: Span, message: impl Into<String>, stage: Stage) {
        self.push(Diagnostic::new(span, Severity::Information, message, stage));
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in other {
            self.push(diagnostic);
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(Diagnostic::is_error)
    }

    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.items.iter().find(|d| d.is_error())
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
