//! Lexical scope chain for variable resolution during evaluation.

use crate::expr::Resolver;
use crate::value::{Object, Value};

/// A chain of frames. Lookups walk from the innermost frame outwards; the
/// outermost frame holds the document's external context.
#[derive(Debug, Clone)]
pub struct Scope {
    frames: Vec<Object>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new(Object::new())
    }
}

impl Scope {
    /// Create a scope whose root frame holds `context`.
    pub fn new(context: Object) -> Self {
        Self {
            frames: vec![context],
        }
    }

    /// Create a scope from a JSON context; non-object contexts are ignored.
    pub fn from_json(context: serde_json::Value) -> Self {
        match Value::from_json(context) {
            Value::Object(object) => Self::new(object),
            _ => Self::default(),
        }
    }

    /// Push a frame (for `for` iterations, sibling sequences and includes).
    pub fn push_scope(&mut self, bindings: Object) {
        self.frames.push(bindings);
    }

    /// Pop the innermost frame. The root frame is never popped.
    pub fn pop_scope(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Bind a name in the innermost frame, replacing any earlier binding
    /// in that frame.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.into(), value);
        }
    }

    /// Resolve a name from the innermost frame that defines it
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.frames.iter().rev().find_map(|frame| frame.get(name))
    }

    /// Flatten the chain into one object, inner bindings winning. Used to
    /// seed the root frame of an included document.
    pub fn flatten(&self) -> Object {
        let mut out = Object::new();
        for frame in &self.frames {
            for (name, value) in frame {
                out.insert(name.clone(), value.clone());
            }
        }
        out
    }

    /// Every visible name, innermost first, without duplicates.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for frame in self.frames.iter().rev() {
            for name in frame.keys() {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }
}

impl Resolver for Scope {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_scope() -> Scope {
        Scope::from_json(json!({"name": "Alice", "user": {"email": "alice@example.com"}}))
    }

    #[test]
    fn test_resolve_simple() {
        let scope = create_test_scope();
        assert_eq!(scope.get("name"), Some(&Value::string("Alice")));
        assert_eq!(scope.get("unknown"), None);
    }

    #[test]
    fn test_inner_frame_shadows_outer() {
        let mut scope = create_test_scope();
        let mut bindings = Object::new();
        bindings.insert("name".to_string(), Value::string("Bob"));
        scope.push_scope(bindings);
        assert_eq!(scope.get("name"), Some(&Value::string("Bob")));

        scope.pop_scope();
        assert_eq!(scope.get("name"), Some(&Value::string("Alice")));
    }

    #[test]
    fn test_set_binds_in_innermost_frame() {
        let mut scope = create_test_scope();
        scope.push_scope(Object::new());
        scope.set("item", Value::Number(1.0));
        assert!(scope.get("item").is_some());
        scope.pop_scope();
        assert!(scope.get("item").is_none());
    }

    #[test]
    fn test_root_frame_is_never_popped() {
        let mut scope = create_test_scope();
        scope.pop_scope();
        scope.pop_scope();
        assert_eq!(scope.depth(), 1);
        assert!(scope.get("user").is_some());
    }

    #[test]
    fn test_flatten_and_names() {
        let mut scope = create_test_scope();
        scope.push_scope(Object::new());
        scope.set("name", Value::string("Bob"));
        assert_eq!(scope.flatten().get("name"), Some(&Value::string("Bob")));
        assert_eq!(scope.names(), vec!["name", "user"]);
    }
}
