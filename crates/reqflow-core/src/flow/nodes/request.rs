//! REQUEST node: sends a resolved example and checks its assertions.
//!
//! The result is stored in the scope under the node name as
//! `{request, response}`, so later nodes can reference
//! `${login.response.body.token}`.
//!
//! The outcome carries a fresh `response_id`; the journal stores the
//! response view under that id when it promotes the node's row.

use std::sync::Arc;

use reqflow_types::flow::NodeKind;
use reqflow_types::id::Id;
use serde_json::{Value, json};

use crate::delta::resolver::ResolvedRequest;
use crate::exchange;
use crate::flow::node::{FlowNode, NodeContext, NodeError, NodeFuture, NodeOutcome};
use crate::http::HttpClient;
use crate::vars::VariableScope;

pub struct RequestNode {
    id: Id,
    name: String,
    resolved: ResolvedRequest,
    client: Arc<dyn HttpClient>,
}

impl RequestNode {
    pub fn new(
        id: Id,
        name: impl Into<String>,
        resolved: ResolvedRequest,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            resolved,
            client,
        }
    }
}

impl FlowNode for RequestNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Request
    }

    fn input(&self, _scope: &VariableScope) -> Option<Value> {
        Some(json!({
            "example_id": self.resolved.example_id,
            "delta_example_id": self.resolved.delta_example_id,
            "method": self.resolved.endpoint.method,
            "url": self.resolved.endpoint.url,
        }))
    }

    fn run(&self, ctx: NodeContext) -> NodeFuture<'_> {
        Box::pin(async move {
            let request = exchange::prepare(&self.resolved, &ctx.scope)?;
            let request_view = exchange::request_json(&request);
            tracing::debug!(
                node = self.name.as_str(),
                method = request.method.as_str(),
                url = request.url.as_str(),
                "sending request"
            );

            let response = self.client.send(request).await?;
            let response_view = exchange::response_json(&response);
            ctx.scope.set(
                self.name.clone(),
                json!({ "request": request_view, "response": response_view }),
            );

            let context = exchange::assertion_context(&response, &ctx.scope);
            let results =
                exchange::evaluate_assertions(ctx.evaluator(), &self.resolved.assertions, &context);
            let output = json!({
                "request": request_view,
                "response": response_view,
                "assertions": results,
            });

            if let Some(summary) = exchange::failure_summary(&results) {
                return Err(NodeError::AssertionFailed { summary, output });
            }

            Ok(NodeOutcome {
                handle: Default::default(),
                output: Some(output),
                response_id: Some(Id::new()),
            })
        })
    }
}
