//! JEXL expression evaluator for assertions, IF predicates and FOR_EACH sequences.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered standard transforms.
//! Payloads are always passed as context objects, never interpolated into
//! expression strings.

use reqflow_types::error::ErrorKind;
use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression '{expression}' failed: {message}")]
    EvalFailed { expression: String, message: String },

    #[error("expression '{expression}' is not iterable: got {result}")]
    NotIterable { expression: String, result: Value },

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

impl ExpressionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

// ---------------------------------------------------------------------------
// FlowEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with string, boolean and length transforms registered.
pub struct FlowEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl FlowEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("split", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = s.split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!value_to_bool(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                let found = match (args.first(), args.get(1)) {
                    (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle.as_str()),
                    (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                    (Some(Value::Object(map)), Some(Value::String(key))) => map.contains_key(key),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            .with_transform("header", |args: &[Value]| {
                // response.headers|header('content-type'), case-insensitive
                let name = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                let found = args
                    .first()
                    .and_then(|v| v.as_object())
                    .and_then(|m| {
                        m.iter()
                            .find(|(k, _)| k.eq_ignore_ascii_case(name))
                            .map(|(_, v)| v.clone())
                    })
                    .unwrap_or(Value::Null);
                Ok(found)
            });

        Self { evaluator }
    }

    /// Evaluate to a boolean using JavaScript-like truthiness.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        let result = self.evaluate_value(expression, context)?;
        Ok(value_to_bool(&result))
    }

    /// Evaluate and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }
        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed {
                expression: expression.to_string(),
                message: e.to_string(),
            })
    }

    /// Evaluate to a sequence of `(index, item)` pairs.
    ///
    /// Arrays yield their elements with numeric indexes, objects their
    /// values keyed by property name, and a non-negative integer `n` yields
    /// `0..n`.
    pub fn evaluate_sequence(
        &self,
        expression: &str,
        context: &Value,
    ) -> Result<Vec<(Value, Value)>, ExpressionError> {
        match self.evaluate_value(expression, context)? {
            Value::Array(items) => Ok(items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (json!(i), v))
                .collect()),
            Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (json!(k), v)).collect()),
            // JEXL numbers are floats; accept any non-negative whole number.
            Value::Number(n) if n.as_f64().is_some_and(|f| f >= 0.0 && f.fract() == 0.0) => {
                let count = n.as_f64().unwrap_or(0.0) as u64;
                Ok((0..count).map(|i| (json!(i), json!(i))).collect())
            }
            Value::Null => Ok(Vec::new()),
            other => Err(ExpressionError::NotIterable {
                expression: expression.to_string(),
                result: other,
            }),
        }
    }
}

impl Default for FlowEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
pub fn value_to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> FlowEvaluator {
        FlowEvaluator::new()
    }

    #[test]
    fn test_status_assertion() {
        let ctx = json!({"response": {"status": 200, "body": {"ok": true}}});
        assert!(evaluator().evaluate_bool("response.status == 200", &ctx).unwrap());
        assert!(!evaluator().evaluate_bool("response.status == 304", &ctx).unwrap());
        assert!(evaluator().evaluate_bool("response.body.ok", &ctx).unwrap());
    }

    #[test]
    fn test_variables_sit_beside_response() {
        let ctx = json!({"response": {"status": 201}, "expected": 201});
        assert!(evaluator().evaluate_bool("response.status == expected", &ctx).unwrap());
    }

    #[test]
    fn test_truthiness() {
        assert!(!value_to_bool(&json!(null)));
        assert!(!value_to_bool(&json!(0)));
        assert!(!value_to_bool(&json!("")));
        assert!(value_to_bool(&json!([])));
        assert!(value_to_bool(&json!("x")));
    }

    #[test]
    fn test_transforms() {
        let ctx = json!({"name": "  Alice ", "tags": ["a", "b"], "headers": {"Content-Type": "application/json"}});
        let eval = evaluator();
        assert_eq!(eval.evaluate_value("name|trim|lower", &ctx).unwrap(), json!("alice"));
        assert!(eval.evaluate_bool("tags|length == 2", &ctx).unwrap());
        assert!(eval.evaluate_bool("tags|contains('b')", &ctx).unwrap());
        assert_eq!(
            eval.evaluate_value("headers|header('content-type')", &ctx).unwrap(),
            json!("application/json")
        );
    }

    #[test]
    fn test_sequence_shapes() {
        let eval = evaluator();
        let ctx = json!({"items": ["x", "y"], "n": 3, "s": "text"});
        let seq = eval.evaluate_sequence("items", &ctx).unwrap();
        assert_eq!(seq, vec![(json!(0), json!("x")), (json!(1), json!("y"))]);
        assert_eq!(eval.evaluate_sequence("n", &ctx).unwrap().len(), 3);
        assert!(matches!(
            eval.evaluate_sequence("s", &ctx),
            Err(ExpressionError::NotIterable { .. })
        ));
    }

    #[test]
    fn test_non_object_context_rejected() {
        assert!(matches!(
            evaluator().evaluate_bool("true", &json!([1])),
            Err(ExpressionError::InvalidContext(_))
        ));
    }

    #[test]
    fn test_syntax_error_reports_expression() {
        let err = evaluator().evaluate_bool("response.status ==", &json!({})).unwrap_err();
        assert!(err.to_string().contains("response.status =="));
    }
}
