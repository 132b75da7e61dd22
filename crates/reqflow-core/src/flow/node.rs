//! The node interface the runner drives.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqflow_types::error::ErrorKind;
use reqflow_types::execution::{ExecutionState, NodeStatusEvent};
use reqflow_types::flow::{Handle, NodeKind};
use reqflow_types::id::Id;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::runner::Engine;
use crate::exchange::ExchangeError;
use crate::expression::{ExpressionError, FlowEvaluator};
use crate::http::HttpError;
use crate::vars::VariableScope;

pub type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<NodeOutcome, NodeError>> + Send + 'a>>;

// ---------------------------------------------------------------------------
// Outcome and error
// ---------------------------------------------------------------------------

/// What a node produced on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutcome {
    /// Outgoing handle to follow.
    pub handle: Handle,
    pub output: Option<Value>,
    pub response_id: Option<Id>,
}

impl NodeOutcome {
    pub fn then(output: Option<Value>) -> Self {
        Self {
            handle: Handle::Then,
            output,
            response_id: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Expression(#[from] ExpressionError),

    #[error("{summary}")]
    AssertionFailed { summary: String, output: Value },

    #[error("iteration {index} failed: {message}")]
    Iteration { index: usize, message: String },

    #[error("{0}")]
    Failed(String),

    #[error("canceled")]
    Canceled,
}

impl NodeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NodeError::Exchange(e) => e.kind(),
            NodeError::Http(e) => e.kind(),
            NodeError::Expression(e) => e.kind(),
            NodeError::AssertionFailed { .. } | NodeError::Iteration { .. } => {
                ErrorKind::FailedPrecondition
            }
            NodeError::Failed(_) => ErrorKind::Internal,
            NodeError::Canceled => ErrorKind::Canceled,
        }
    }

    /// Output recorded alongside the failure.
    pub fn output(&self) -> Option<Value> {
        match self {
            NodeError::AssertionFailed { output, .. } => Some(output.clone()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// FlowNode trait
// ---------------------------------------------------------------------------

/// One executable node of a flow.
///
/// `run` returns a boxed future so nodes of different kinds can be held as
/// `Arc<dyn FlowNode>`.
pub trait FlowNode: Send + Sync {
    fn id(&self) -> Id;

    fn name(&self) -> &str;

    fn kind(&self) -> NodeKind;

    /// Input recorded with the `Running` event.
    fn input(&self, _scope: &VariableScope) -> Option<Value> {
        None
    }

    fn run(&self, ctx: NodeContext) -> NodeFuture<'_>;
}

// ---------------------------------------------------------------------------
// NodeContext
// ---------------------------------------------------------------------------

/// Why a loop body iteration did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyError {
    Failed(String),
    Canceled,
}

/// Per-invocation handle given to a running node.
pub struct NodeContext {
    pub(crate) engine: Arc<Engine>,
    pub node_id: Id,
    pub execution_id: Id,
    pub scope: Arc<VariableScope>,
    pub token: CancellationToken,
}

impl NodeContext {
    pub fn evaluator(&self) -> &FlowEvaluator {
        self.engine.evaluator()
    }

    /// Run the node's loop body once in a child scope holding `bindings`.
    ///
    /// Nodes without a body succeed immediately.
    pub async fn run_body(&self, bindings: &[(String, Value)]) -> Result<(), BodyError> {
        let Some(region) = self.engine.graph().body_region(&self.node_id) else {
            return Ok(());
        };
        let scope = Arc::new(VariableScope::child(&self.scope));
        for (name, value) in bindings {
            scope.set(name.clone(), value.clone());
        }
        let outcome = Arc::clone(&self.engine)
            .run_region(region, scope, self.token.clone())
            .await;
        match outcome.failure {
            Some(message) => Err(BodyError::Failed(message)),
            None if outcome.canceled => Err(BodyError::Canceled),
            None => Ok(()),
        }
    }

    /// Emit a status event for one iteration of this node.
    pub async fn emit_iteration(
        &self,
        execution_id: Id,
        index: usize,
        state: ExecutionState,
        output: Option<Value>,
        error: Option<String>,
    ) {
        let name = self.engine.graph().name(&self.node_id).to_string();
        let mut event = NodeStatusEvent::new(execution_id, self.node_id, name, state);
        event.iteration = Some(index);
        event.output = output;
        event.error = error;
        self.engine.emitter().node(event).await;
    }
}
