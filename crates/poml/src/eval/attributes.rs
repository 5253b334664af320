//! Attribute values and traced expression evaluation.

use poml_syntax::{to_camel_case, Attribute, AttributeValue, Element, QuotedPart, Span, Stage};

use super::trace::{TraceKind, TraceValue};
use super::Evaluator;
use crate::components::{ComponentDef, ComponentKind};
use crate::expr::{self, ExprError};
use crate::scope::Scope;
use crate::value::{Object, Value};

/// Attributes whose quoted text is an expression rather than a string.
fn is_expression_attribute(def: &ComponentDef, key: &str) -> bool {
    key.eq_ignore_ascii_case("if") || (def.kind == ComponentKind::Let && key == "value")
}

impl<'a> Evaluator<'a> {
    /// Evaluate and trace one expression. Failures are traced but not
    /// reported; callers decide which stage they belong to.
    pub(super) fn eval_traced(
        &mut self,
        source: &str,
        span: Span,
        kind: TraceKind,
        scope: &Scope,
    ) -> Result<Value, ExprError> {
        let functions = match kind {
            TraceKind::EvalBlock => &self.schema_functions,
            _ => &self.options.functions,
        };
        let result = expr::evaluate(source, scope, functions);
        let traced = match &result {
            Ok(value) => TraceValue::Value(value.to_json()),
            Err(error) => TraceValue::Error(error.to_string()),
        };
        self.trace.record(span, source, kind, traced);
        result
    }

    /// Evaluate an expression, reporting failures as evaluation errors.
    pub(super) fn eval_expr(
        &mut self,
        source: &str,
        span: Span,
        kind: TraceKind,
        scope: &Scope,
    ) -> Option<Value> {
        match self.eval_traced(source, span, kind, scope) {
            Ok(value) => Some(value),
            Err(error) => {
                self.diagnostics.error(span, error.to_string(), Stage::Evaluate);
                None
            }
        }
    }

    /// The value of one attribute.
    ///
    /// A bare attribute is `true`. A sole `{{ }}` keeps the type of its
    /// value; text mixed with templates becomes a string. With
    /// `expression` set, plain quoted text is evaluated as an expression.
    pub(super) fn eval_attribute(
        &mut self,
        attr: &Attribute,
        scope: &Scope,
        expression: bool,
    ) -> Option<Value> {
        let kind = TraceKind::AttributeExpression;
        match &attr.value {
            None => Some(Value::Bool(true)),
            Some(AttributeValue::Quoted(quoted)) if expression => {
                if quoted.value.trim().is_empty() {
                    self.diagnostics.error(
                        quoted.span,
                        format!("Attribute '{}' has an empty expression", attr.key),
                        Stage::Evaluate,
                    );
                    return None;
                }
                self.eval_expr(&quoted.value, quoted.value_span, kind, scope)
            }
            Some(AttributeValue::Quoted(quoted)) => Some(Value::String(quoted.value.clone())),
            Some(AttributeValue::Template(template)) => {
                if template.expression.is_empty() {
                    return None;
                }
                self.eval_expr(&template.expression, template.span, kind, scope)
            }
            Some(AttributeValue::QuotedTemplate(quoted)) => {
                if let Some(template) = quoted.sole_template() {
                    if template.expression.is_empty() {
                        return None;
                    }
                    return self.eval_expr(&template.expression, template.span, kind, scope);
                }
                let mut text = String::new();
                for part in &quoted.parts {
                    match part {
                        QuotedPart::Text(t) => text.push_str(&t.value),
                        QuotedPart::Template(t) if t.expression.is_empty() => {}
                        QuotedPart::Template(t) => {
                            let value = self.eval_expr(&t.expression, t.span, kind, scope)?;
                            text.push_str(&value.stringify());
                        }
                    }
                }
                Some(Value::String(text))
            }
            Some(AttributeValue::ForIterator(iterator)) => Some(Value::String(format!(
                "{} in {}",
                iterator.iterator, iterator.collection
            ))),
        }
    }

    /// An attribute read as text, for names and paths.
    pub(super) fn eval_attribute_text(
        &mut self,
        element: &Element,
        key: &str,
        scope: &Scope,
    ) -> Option<String> {
        let attr = element.attribute(key)?;
        match self.eval_attribute(attr, scope, false)? {
            Value::Null => None,
            value => Some(value.stringify()),
        }
    }

    /// Props for an element: stylesheet defaults, then attributes in
    /// source order. `if` and `for` are directives, not props.
    pub(super) fn eval_props(
        &mut self,
        element: &Element,
        def: &ComponentDef,
        scope: &Scope,
    ) -> Object {
        let mut props = self.stylesheet.defaults_for(def, element.name());
        for attr in &element.open.attributes {
            let key = to_camel_case(&attr.key);
            if key.eq_ignore_ascii_case("if") || key.eq_ignore_ascii_case("for") {
                continue;
            }
            let expression = is_expression_attribute(def, &key);
            if let Some(value) = self.eval_attribute(attr, scope, expression) {
                props.insert(key, value);
            }
        }
        props
    }
}

/// Range to report an attribute problem at: its value when present.
pub(super) fn value_span(attr: &Attribute) -> Span {
    attr.value.as_ref().map_or(attr.span, AttributeValue::span)
}
