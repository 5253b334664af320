//! Record of every expression evaluation, keyed by source range.

use poml_syntax::Span;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraceKind {
    /// `{{ }}` in text.
    Template,
    /// An attribute value, including `if` and `for`.
    AttributeExpression,
    /// The body of an `eval` schema declaration.
    EvalBlock,
}

/// Outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceValue {
    Value(serde_json::Value),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    pub span: Span,
    pub expression: String,
    pub kind: TraceKind,
    /// One entry per evaluation, in evaluation order.
    pub values: Vec<TraceValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpressionTrace {
    records: Vec<TraceRecord>,
}

impl ExpressionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an evaluation. Repeated evaluations of the same expression at
    /// the same range (loop iterations) add to the existing record.
    pub fn record(&mut self, span: Span, expression: &str, kind: TraceKind, value: TraceValue) {
        if let Some(record) = self
            .records
            .iter_mut()
            .find(|r| r.span == span && r.kind == kind && r.expression == expression)
        {
            record.values.push(value);
            return;
        }
        self.records.push(TraceRecord {
            span,
            expression: expression.to_string(),
            kind,
            values: vec![value],
        });
    }

    pub fn records(&self) -> &[TraceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records whose range contains `offset`, innermost first.
    pub fn at(&self, offset: usize) -> Vec<&TraceRecord> {
        let mut found: Vec<&TraceRecord> = self
            .records
            .iter()
            .filter(|r| r.span.contains_inclusive(offset))
            .collect();
        found.sort_by_key(|r| r.span.len());
        found
    }

    /// Records that fall inside `span`.
    pub fn within(&self, span: Span) -> impl Iterator<Item = &TraceRecord> {
        self.records
            .iter()
            .filter(move |r| span.contains_span(r.span))
    }

    /// Merge records from a nested evaluation (an included file), moving
    /// them onto `span`.
    pub fn absorb(&mut self, other: ExpressionTrace, span: Span) {
        for record in other.records {
            for value in record.values {
                self.record(span, &record.expression, record.kind, value);
            }
        }
    }
}
