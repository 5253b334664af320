//! Default props per component, from options or `<stylesheet>` elements.

use indexmap::IndexMap;
use poml_syntax::{normalize_tag_name, to_camel_case};
use serde_json::Value as JsonValue;

use crate::components::ComponentDef;
use crate::value::{Object, Value};

const ANY: &str = "*";

/// `{"*": {"syntax": "markdown"}, "table": {"syntax": "csv"}}`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stylesheet {
    rules: IndexMap<String, Object>,
}

impl Stylesheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: JsonValue) -> Result<Self, String> {
        let JsonValue::Object(selectors) = json else {
            return Err("stylesheet must be a JSON object".to_string());
        };
        let mut sheet = Self::new();
        for (selector, props) in selectors {
            let JsonValue::Object(props) = props else {
                return Err(format!("stylesheet entry '{selector}' must be an object"));
            };
            for (prop, value) in props {
                sheet.set(&selector, &prop, Value::from_json(value));
            }
        }
        Ok(sheet)
    }

    pub fn parse(source: &str) -> Result<Self, String> {
        let json: JsonValue = serde_json::from_str(source)
            .map_err(|e| format!("stylesheet is not valid JSON: {e}"))?;
        Self::from_json(json)
    }

    fn key(selector: &str) -> String {
        let selector = selector.trim();
        if selector == ANY {
            ANY.to_string()
        } else {
            normalize_tag_name(selector)
        }
    }

    pub fn set(&mut self, selector: &str, prop: &str, value: Value) {
        self.rules
            .entry(Self::key(selector))
            .or_default()
            .insert(to_camel_case(prop), value);
    }

    /// Later rules override earlier ones prop by prop.
    pub fn merge(&mut self, other: Stylesheet) {
        for (selector, props) in other.rules {
            let entry = self.rules.entry(selector).or_default();
            entry.extend(props);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Defaults for one element: `*` first, then entries naming the
    /// component or any of its aliases.
    pub fn defaults_for(&self, def: &ComponentDef, tag: &str) -> Object {
        let mut props = Object::new();
        if let Some(any) = self.rules.get(ANY) {
            props.extend(any.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let mut names: Vec<String> = std::iter::once(def.name)
            .chain(def.aliases.iter().copied())
            .map(normalize_tag_name)
            .collect();
        let tag = normalize_tag_name(tag);
        if !names.contains(&tag) {
            names.push(tag);
        }
        for (selector, rule) in &self.rules {
            if names.contains(selector) {
                props.extend(rule.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ComponentRegistry;
    use serde_json::json;

    #[test]
    fn test_specific_rule_wins_over_any() {
        let sheet = Stylesheet::from_json(json!({
            "*": {"syntax": "markdown", "white-space": "pre"},
            "paragraph": {"syntax": "html"}
        }))
        .unwrap();
        let registry = ComponentRegistry::standard();
        let def = registry.lookup("p").unwrap();
        let props = sheet.defaults_for(def, "p");
        assert_eq!(props.get("syntax"), Some(&Value::string("html")));
        assert_eq!(props.get("whiteSpace"), Some(&Value::string("pre")));
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(Stylesheet::from_json(json!([1])).is_err());
        assert!(Stylesheet::from_json(json!({"p": 1})).is_err());
        assert!(Stylesheet::parse("{").is_err());
    }
}
