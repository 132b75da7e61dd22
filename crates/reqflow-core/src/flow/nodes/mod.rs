//! Concrete node kinds.

pub mod branch;
pub mod iteration;
pub mod noop;
pub mod request;

use std::sync::Arc;

use reqflow_types::flow::{FlowNodeDef, NodePayload};

use super::node::FlowNode;
use super::runner::RunnerError;
use crate::delta::resolver::ResolvedRequest;
use crate::http::HttpClient;

/// Build the executable node for a stored definition.
///
/// Request nodes need their example already resolved.
pub fn build(
    def: &FlowNodeDef,
    resolved: Option<ResolvedRequest>,
    client: &Arc<dyn HttpClient>,
) -> Result<Arc<dyn FlowNode>, RunnerError> {
    let node: Arc<dyn FlowNode> = match &def.payload {
        NodePayload::Noop { .. } => Arc::new(noop::NoopNode::new(def.id, def.name.clone())),
        NodePayload::Request(_) => {
            let resolved = resolved.ok_or(RunnerError::UnresolvedRequest(def.id))?;
            Arc::new(request::RequestNode::new(
                def.id,
                def.name.clone(),
                resolved,
                Arc::clone(client),
            ))
        }
        NodePayload::For {
            iterations,
            error_policy,
        } => Arc::new(iteration::ForNode::new(
            def.id,
            def.name.clone(),
            *iterations,
            *error_policy,
        )),
        NodePayload::ForEach {
            expression,
            error_policy,
        } => Arc::new(iteration::ForEachNode::new(
            def.id,
            def.name.clone(),
            expression.clone(),
            *error_policy,
        )),
        NodePayload::If { condition } => {
            Arc::new(branch::IfNode::new(def.id, def.name.clone(), condition.clone()))
        }
    };
    Ok(node)
}
