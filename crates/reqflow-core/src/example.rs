//! Ad-hoc example runs.
//!
//! Resolves an example through an optional delta, substitutes environment
//! variables, sends it and checks its assertions. Nothing is journaled.

use std::sync::Arc;

use reqflow_types::id::Id;
use reqflow_types::request::Example;
use serde::Serialize;

use crate::delta::loader::load_resolved;
use crate::delta::resolver::ResolvedRequest;
use crate::exchange::{self, AssertionResult};
use crate::expression::FlowEvaluator;
use crate::http::{HttpClient, HttpRequest, HttpResponse};
use crate::repository::request::RequestRepository;
use crate::repository::workspace::WorkspaceRepository;
use crate::service::{ServiceError, environment_vars};
use crate::vars::VariableScope;

/// What an example run sent and received.
#[derive(Debug, Clone, Serialize)]
pub struct ExampleRunResult {
    pub request: HttpRequest,
    pub response: HttpResponse,
    pub assertions: Vec<AssertionResult>,
}

impl ExampleRunResult {
    pub fn passed(&self) -> bool {
        self.assertions.iter().all(|a| a.passed)
    }
}

pub struct ExampleService<Q: RequestRepository, W: WorkspaceRepository> {
    requests: Q,
    workspaces: W,
    client: Arc<dyn HttpClient>,
    evaluator: FlowEvaluator,
}

impl<Q: RequestRepository, W: WorkspaceRepository> ExampleService<Q, W> {
    pub fn new(requests: Q, workspaces: W, client: Arc<dyn HttpClient>) -> Self {
        Self {
            requests,
            workspaces,
            client,
            evaluator: FlowEvaluator::new(),
        }
    }

    /// The merged runtime view of an example, without sending it.
    pub async fn resolve(
        &self,
        example_id: &Id,
        delta_example_id: Option<&Id>,
    ) -> Result<ResolvedRequest, ServiceError> {
        Ok(load_resolved(&self.requests, example_id, delta_example_id, None).await?)
    }

    pub async fn run(
        &self,
        example_id: &Id,
        delta_example_id: Option<&Id>,
        environment_id: Option<&Id>,
    ) -> Result<ExampleRunResult, ServiceError> {
        let resolved = self.resolve(example_id, delta_example_id).await?;
        let collection = self
            .workspaces
            .get_collection(&resolved.endpoint.collection_id)
            .await?
            .ok_or(ServiceError::NotFound {
                entity: "collection",
                id: resolved.endpoint.collection_id,
            })?;
        let vars = environment_vars(&self.workspaces, &collection.workspace_id, environment_id).await?;
        let scope = VariableScope::from_var_map(&vars);

        let request = exchange::prepare(&resolved, &scope)?;
        tracing::info!(
            example_id = %example_id,
            delta = ?delta_example_id,
            method = request.method.as_str(),
            url = request.url.as_str(),
            "running example"
        );
        let response = self.client.send(request.clone()).await?;

        let context = exchange::assertion_context(&response, &scope);
        let assertions = exchange::evaluate_assertions(&self.evaluator, &resolved.assertions, &context);
        tracing::debug!(
            example_id = %example_id,
            status = response.status,
            failed = assertions.iter().filter(|a| !a.passed).count(),
            "example finished"
        );

        Ok(ExampleRunResult {
            request,
            response,
            assertions,
        })
    }

    /// Copy an example's header row under a new name. Attached key/values,
    /// body and assertions are not copied.
    pub async fn duplicate(&self, example_id: &Id, name: &str) -> Result<Example, ServiceError> {
        Ok(self.requests.duplicate_example(example_id, name).await?)
    }
}
