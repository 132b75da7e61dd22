//! reqwest-backed [`HttpClient`].

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use reqflow_core::http::{HttpBody, HttpClient, HttpError, HttpRequest, HttpResponse};

const USER_AGENT: &str = concat!("reqflow/", env!("CARGO_PKG_VERSION"));

/// Sends request-node traffic through a shared reqwest connection pool.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestHttpClient {
    pub fn new(timeout_secs: u64) -> Result<Self, HttpError> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HttpError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    fn build(&self, request: HttpRequest) -> Result<reqwest::Request, HttpError> {
        let method: reqwest::Method = request.method.to_uppercase().parse().map_err(|_| {
            HttpError::InvalidRequest(format!("invalid HTTP method: {}", request.method))
        })?;

        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let has_content_type = request
            .headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));

        builder = match request.body {
            HttpBody::Empty => builder,
            HttpBody::Raw {
                bytes,
                content_type,
            } => {
                if let Some(ct) = content_type.filter(|_| !has_content_type) {
                    builder = builder.header(reqwest::header::CONTENT_TYPE, ct);
                }
                builder.body(bytes)
            }
            HttpBody::Form(fields) => {
                let form = fields
                    .into_iter()
                    .fold(reqwest::multipart::Form::new(), |form, (k, v)| form.text(k, v));
                builder.multipart(form)
            }
            HttpBody::Urlencoded(fields) => builder.form(&fields),
        };

        builder
            .build()
            .map_err(|e| HttpError::InvalidRequest(e.to_string()))
    }

    fn map_error(&self, e: reqwest::Error) -> HttpError {
        if e.is_timeout() {
            HttpError::Timeout(self.timeout.as_millis() as u64)
        } else if e.is_builder() {
            HttpError::InvalidRequest(e.to_string())
        } else {
            HttpError::Transport(e.to_string())
        }
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send(
        &self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + '_>> {
        Box::pin(async move {
            let url = request.url.clone();
            let built = self.build(request)?;
            let started = Instant::now();

            let response = self
                .client
                .execute(built)
                .await
                .map_err(|e| self.map_error(e))?;
            let status = response.status().as_u16();
            let headers: Vec<(String, String)> = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let body = response.bytes().await.map_err(|e| self.map_error(e))?;
            let duration_ms = started.elapsed().as_millis() as u64;

            tracing::debug!(
                url = url.as_str(),
                status,
                duration_ms,
                body_len = body.len(),
                "HTTP request completed"
            );

            Ok(HttpResponse {
                status,
                headers,
                body: body.to_vec(),
                duration_ms,
            })
        })
    }
}
