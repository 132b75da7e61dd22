//! HTTP client port.
//!
//! The engine sends requests through [`HttpClient`]; reqflow-infra provides
//! the reqwest-backed implementation and tests use in-memory mocks.

use std::future::Future;
use std::pin::Pin;

use reqflow_types::error::ErrorKind;
use serde::{Deserialize, Serialize};

/// A request after variable substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub body: HttpBody,
}

/// Request body in one of the supported shapes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum HttpBody {
    #[default]
    Empty,
    Raw {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
    Form(Vec<(String, String)>),
    Urlencoded(Vec<(String, String)>),
}

/// The response as seen by assertions and downstream nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Vec<u8>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum HttpError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),
}

impl HttpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HttpError::InvalidRequest(_) => ErrorKind::InvalidArgument,
            HttpError::Timeout(_) => ErrorKind::DeadlineExceeded,
            HttpError::Transport(_) => ErrorKind::Internal,
        }
    }
}

/// Sends one HTTP request.
///
/// Uses `Pin<Box<dyn Future>>` so the client can be held as
/// `Arc<dyn HttpClient>` and shared across node tasks.
pub trait HttpClient: Send + Sync {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + '_>>;
}
