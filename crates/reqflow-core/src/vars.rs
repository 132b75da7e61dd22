//! Variables and `${name}` substitution.
//!
//! A [`VarMap`] is built by layering global environment, selected
//! environment and flow variables (later layers win). At run time it seeds a
//! [`VariableScope`], which nodes extend with their results (a request node
//! stores `{request, response}` under its name). Each loop iteration runs in
//! a child scope holding `item`/`index`; lookups fall through to the parent
//! and the child is dropped when the iteration ends.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use reqflow_types::error::ErrorKind;
use reqflow_types::flow::FlowVariable;
use reqflow_types::workspace::Variable;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VarError {
    #[error("variable '{name}' not found")]
    NotFound { name: String },
}

impl VarError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::NotFound
    }
}

// ---------------------------------------------------------------------------
// VarMap
// ---------------------------------------------------------------------------

/// Name to value, merged last-writer-wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarMap {
    values: HashMap<String, String>,
}

impl VarMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer enabled environment variables on top.
    pub fn with_environment(mut self, vars: &[Variable]) -> Self {
        for v in vars.iter().filter(|v| v.enabled) {
            self.values.insert(v.name.clone(), v.value.clone());
        }
        self
    }

    /// Layer enabled flow variables on top.
    pub fn with_flow_variables(mut self, vars: &[FlowVariable]) -> Self {
        for v in vars.iter().filter(|v| v.enabled) {
            self.values.insert(v.name.clone(), v.value.clone());
        }
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }
}

// ---------------------------------------------------------------------------
// VariableScope
// ---------------------------------------------------------------------------

/// Run-time variable scope of one flow run or one loop iteration.
#[derive(Debug, Default)]
pub struct VariableScope {
    values: DashMap<String, Value>,
    parent: Option<Arc<VariableScope>>,
}

impl VariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty layer on top of `parent`. Writes stay in the child.
    pub fn child(parent: &Arc<VariableScope>) -> Self {
        Self {
            values: DashMap::new(),
            parent: Some(Arc::clone(parent)),
        }
    }

    pub fn from_var_map(vars: &VarMap) -> Self {
        let scope = Self::new();
        for (k, v) in vars.iter() {
            scope.set(k.clone(), Value::String(v.clone()));
        }
        scope
    }

    pub fn set(&self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Look a name up: the exact key first, then a dotted path into a stored
    /// value, then the same in the parent layer.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.get_local(name)
            .or_else(|| self.parent.as_ref().and_then(|p| p.get(name)))
    }

    fn get_local(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.values.get(name) {
            return Some(v.clone());
        }
        let mut parts = name.split('.');
        let root = parts.next()?;
        let mut current = self.values.get(root)?.clone();
        for part in parts {
            current = match current {
                Value::Object(mut map) => map.remove(part)?,
                Value::Array(mut items) => {
                    let idx: usize = part.parse().ok()?;
                    if idx >= items.len() {
                        return None;
                    }
                    items.swap_remove(idx)
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Replace every `${name}` in `template`.
    pub fn substitute(&self, template: &str) -> Result<String, VarError> {
        substitute(template, |name| self.get(name).map(|v| value_to_string(&v)))
    }

    /// The whole scope as a JSON object, for expression evaluation. Child
    /// entries shadow parent entries of the same name.
    pub fn snapshot(&self) -> Value {
        let mut map = match self.parent.as_ref().map(|p| p.snapshot()) {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        for entry in self.values.iter() {
            map.insert(entry.key().clone(), entry.value().clone());
        }
        Value::Object(map)
    }
}

/// Replace every `${name}` using `lookup`. A `${` with no closing brace is
/// left as literal text.
pub fn substitute(
    template: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String, VarError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = rest[start + 2..start + 2 + len].trim();
        let value = lookup(name).ok_or_else(|| VarError::NotFound {
            name: name.to_string(),
        })?;
        out.push_str(&value);
        rest = &rest[start + 2 + len + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Convert a JSON value to the text substituted into a template.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // For objects/arrays, return compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use reqflow_types::id::Id;
    use serde_json::json;

    fn env_var(name: &str, value: &str, enabled: bool) -> Variable {
        Variable {
            id: Id::new(),
            env_id: Id::new(),
            name: name.into(),
            value: value.into(),
            enabled,
            description: String::new(),
            prev: None,
            next: None,
        }
    }

    #[test]
    fn test_layers_later_wins_and_disabled_skipped() {
        let global = vec![env_var("host", "global.test", true), env_var("token", "g", true)];
        let active = vec![env_var("host", "staging.test", true), env_var("token", "x", false)];
        let flow = vec![FlowVariable {
            id: Id::new(),
            flow_id: Id::new(),
            name: "user".into(),
            value: "42".into(),
            enabled: true,
            description: String::new(),
            prev: None,
            next: None,
        }];

        let vars = VarMap::new()
            .with_environment(&global)
            .with_environment(&active)
            .with_flow_variables(&flow);
        assert_eq!(vars.get("host"), Some("staging.test"));
        assert_eq!(vars.get("token"), Some("g"));
        assert_eq!(vars.get("user"), Some("42"));
    }

    #[test]
    fn test_substitute_resolves_all_references() {
        let scope = VariableScope::new();
        scope.set("host", json!("api.test"));
        scope.set("id", json!(7));
        let out = scope.substitute("https://${host}/users/${ id }?x=${id}").unwrap();
        assert_eq!(out, "https://api.test/users/7?x=7");
    }

    #[test]
    fn test_unresolved_reference_names_the_variable() {
        let scope = VariableScope::new();
        let err = scope.substitute("Bearer ${token}").unwrap_err();
        assert_eq!(err, VarError::NotFound { name: "token".into() });
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_unterminated_reference_is_literal() {
        let scope = VariableScope::new();
        assert_eq!(scope.substitute("cost: ${").unwrap(), "cost: ${");
    }

    #[test]
    fn test_dotted_lookup_into_node_results() {
        let scope = VariableScope::new();
        scope.set(
            "login",
            json!({"response": {"status": 200, "body": {"token": "abc", "roles": ["r0", "r1"]}}}),
        );
        assert_eq!(scope.get("login.response.body.token"), Some(json!("abc")));
        assert_eq!(scope.get("login.response.body.roles.1"), Some(json!("r1")));
        assert_eq!(scope.get("login.response.missing"), None);
        assert_eq!(
            scope.substitute("${login.response.status}").unwrap(),
            "200"
        );
    }

    #[test]
    fn test_exact_key_wins_over_path() {
        let scope = VariableScope::new();
        scope.set("a.b", json!("flat"));
        scope.set("a", json!({"b": "nested"}));
        assert_eq!(scope.get("a.b"), Some(json!("flat")));
    }

    #[test]
    fn test_child_shadows_and_falls_through() {
        let root = Arc::new(VariableScope::new());
        root.set("host", json!("api.test"));
        root.set("item", json!("outer"));

        let child = Arc::new(VariableScope::child(&root));
        child.set("item", json!("inner"));
        child.set("step", json!({"n": 1}));
        assert_eq!(child.get("item"), Some(json!("inner")));
        assert_eq!(child.get("host"), Some(json!("api.test")));
        assert_eq!(child.get("step.n"), Some(json!(1)));
        assert_eq!(child.substitute("${host}/${item}").unwrap(), "api.test/inner");

        let snapshot = child.snapshot();
        assert_eq!(snapshot["item"], json!("inner"));
        assert_eq!(snapshot["host"], json!("api.test"));

        drop(child);
        assert_eq!(root.get("item"), Some(json!("outer")));
        assert_eq!(root.get("step"), None);
    }
}
