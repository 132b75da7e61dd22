//! Turning a resolved request into an HTTP exchange and checking its assertions.
//!
//! Shared by the flow engine's request node and the ad-hoc example runner.

use reqflow_types::error::ErrorKind;
use reqflow_types::request::{Assertion, BodyKind, KeyValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::codec::{self, CodecError};
use crate::delta::resolver::ResolvedRequest;
use crate::expression::FlowEvaluator;
use crate::http::{HttpBody, HttpRequest, HttpResponse};
use crate::vars::{VarError, VariableScope};

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Var(#[from] VarError),

    #[error("raw body: {0}")]
    Codec(#[from] CodecError),
}

impl ExchangeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExchangeError::Var(e) => e.kind(),
            ExchangeError::Codec(e) => e.kind(),
        }
    }
}

/// Outcome of one assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub expression: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Request preparation
// ---------------------------------------------------------------------------

/// Substitute variables into the URL, enabled header and query values, and
/// the body selected by the endpoint's body kind.
pub fn prepare(resolved: &ResolvedRequest, scope: &VariableScope) -> Result<HttpRequest, ExchangeError> {
    let endpoint = &resolved.endpoint;
    let url = scope.substitute(&endpoint.url)?;
    let headers = substitute_pairs(&resolved.headers, scope)?;
    let query = substitute_pairs(&resolved.search_params, scope)?;

    let body = match endpoint.body_kind {
        BodyKind::None => HttpBody::Empty,
        BodyKind::FormData => HttpBody::Form(substitute_pairs(&resolved.body_form, scope)?),
        BodyKind::Urlencoded => HttpBody::Urlencoded(substitute_pairs(&resolved.body_urlencoded, scope)?),
        BodyKind::Raw => match &resolved.body_raw {
            Some(raw) => {
                let bytes = codec::decode(&raw.data, raw.compression)?;
                // Only textual bodies carry ${} references.
                let bytes = match String::from_utf8(bytes) {
                    Ok(text) => scope.substitute(&text)?.into_bytes(),
                    Err(e) => e.into_bytes(),
                };
                HttpBody::Raw {
                    bytes,
                    content_type: raw.content_type.clone(),
                }
            }
            None => HttpBody::Empty,
        },
    };

    Ok(HttpRequest {
        method: endpoint.method.to_uppercase(),
        url,
        headers,
        query,
        body,
    })
}

fn substitute_pairs(rows: &[KeyValue], scope: &VariableScope) -> Result<Vec<(String, String)>, VarError> {
    rows.iter()
        .filter(|kv| kv.enabled)
        .map(|kv| Ok((kv.key.clone(), scope.substitute(&kv.value)?)))
        .collect()
}

// ---------------------------------------------------------------------------
// JSON views
// ---------------------------------------------------------------------------

/// JSON view of a sent request, as stored in node output.
pub fn request_json(request: &HttpRequest) -> Value {
    let body = match &request.body {
        HttpBody::Empty => Value::Null,
        HttpBody::Raw { bytes, .. } => body_value(bytes),
        HttpBody::Form(pairs) | HttpBody::Urlencoded(pairs) => pairs_object(pairs),
    };
    json!({
        "method": request.method,
        "url": request.url,
        "headers": pairs_object(&request.headers),
        "query": pairs_object(&request.query),
        "body": body,
    })
}

/// JSON view of a response: `{status, headers, body, duration_ms}`.
///
/// The body is parsed as JSON when possible, otherwise kept as text.
pub fn response_json(response: &HttpResponse) -> Value {
    json!({
        "status": response.status,
        "headers": pairs_object(&response.headers),
        "body": body_value(&response.body),
        "duration_ms": response.duration_ms,
    })
}

/// Assertion context: every scope variable plus `response`.
pub fn assertion_context(response: &HttpResponse, scope: &VariableScope) -> Value {
    let mut ctx = match scope.snapshot() {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ctx.insert("response".to_string(), response_json(response));
    Value::Object(ctx)
}

fn body_value(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn pairs_object(pairs: &[(String, String)]) -> Value {
    let map: Map<String, Value> = pairs
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    Value::Object(map)
}

// ---------------------------------------------------------------------------
// Assertions
// ---------------------------------------------------------------------------

/// Evaluate every enabled assertion. An evaluation error counts as a failure.
pub fn evaluate_assertions(
    evaluator: &FlowEvaluator,
    assertions: &[Assertion],
    context: &Value,
) -> Vec<AssertionResult> {
    assertions
        .iter()
        .filter(|a| a.enabled && !a.expression.trim().is_empty())
        .map(|a| match evaluator.evaluate_bool(&a.expression, context) {
            Ok(passed) => AssertionResult {
                expression: a.expression.clone(),
                passed,
                error: None,
            },
            Err(e) => AssertionResult {
                expression: a.expression.clone(),
                passed: false,
                error: Some(e.to_string()),
            },
        })
        .collect()
}

/// Summary of failed assertions, or `None` when all passed.
pub fn failure_summary(results: &[AssertionResult]) -> Option<String> {
    let failed: Vec<&str> = results
        .iter()
        .filter(|r| !r.passed)
        .map(|r| r.expression.as_str())
        .collect();
    if failed.is_empty() {
        None
    } else {
        Some(format!("assertion failed: {}", failed.join("; ")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
