//! FOR and FOR_EACH nodes.
//!
//! Both re-enter their loop body once per iteration and emit a status event
//! pair per iteration under the node's own id, with `{"index": i}` (plus
//! `item` for FOR_EACH) as output. A failed iteration is handled by the
//! node's [`IterationErrorPolicy`]. The bindings live in a per-iteration
//! child scope, so nested and parallel loops never see each other's `item`.

use reqflow_types::execution::ExecutionState;
use reqflow_types::flow::{IterationErrorPolicy, NodeKind};
use reqflow_types::id::Id;
use serde_json::{Value, json};

use crate::flow::node::{BodyError, FlowNode, NodeContext, NodeError, NodeFuture, NodeOutcome};
use crate::vars::VariableScope;

pub struct ForNode {
    id: Id,
    name: String,
    iterations: u32,
    policy: IterationErrorPolicy,
}

impl ForNode {
    pub fn new(id: Id, name: impl Into<String>, iterations: u32, policy: IterationErrorPolicy) -> Self {
        Self {
            id,
            name: name.into(),
            iterations,
            policy,
        }
    }
}

impl FlowNode for ForNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::For
    }

    fn input(&self, _scope: &VariableScope) -> Option<Value> {
        Some(json!({ "iterations": self.iterations }))
    }

    fn run(&self, ctx: NodeContext) -> NodeFuture<'_> {
        Box::pin(async move {
            let items = (0..self.iterations).map(|i| (json!(i), None)).collect();
            iterate(&ctx, &self.name, items, self.policy).await
        })
    }
}

pub struct ForEachNode {
    id: Id,
    name: String,
    expression: String,
    policy: IterationErrorPolicy,
}

impl ForEachNode {
    pub fn new(
        id: Id,
        name: impl Into<String>,
        expression: impl Into<String>,
        policy: IterationErrorPolicy,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            expression: expression.into(),
            policy,
        }
    }
}

impl FlowNode for ForEachNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::ForEach
    }

    fn input(&self, _scope: &VariableScope) -> Option<Value> {
        Some(json!({ "expression": self.expression }))
    }

    fn run(&self, ctx: NodeContext) -> NodeFuture<'_> {
        Box::pin(async move {
            let items = ctx
                .evaluator()
                .evaluate_sequence(&self.expression, &ctx.scope.snapshot())?
                .into_iter()
                .map(|(index, item)| (index, Some(item)))
                .collect();
            iterate(&ctx, &self.name, items, self.policy).await
        })
    }
}

async fn iterate(
    ctx: &NodeContext,
    name: &str,
    items: Vec<(Value, Option<Value>)>,
    policy: IterationErrorPolicy,
) -> Result<NodeOutcome, NodeError> {
    let total = items.len();
    let mut completed = 0usize;
    let mut failed = 0usize;

    for (i, (index, item)) in items.into_iter().enumerate() {
        if ctx.token.is_cancelled() {
            return Err(NodeError::Canceled);
        }

        let execution_id = Id::new();
        let mut output = json!({ "index": index });
        let mut bindings = vec![("index".to_string(), index)];
        if let Some(item) = item {
            output["item"] = item.clone();
            bindings.push(("item".to_string(), item));
        }
        bindings.push((name.to_string(), output.clone()));

        ctx.emit_iteration(execution_id, i, ExecutionState::Running, None, None)
            .await;

        match ctx.run_body(&bindings).await {
            Ok(()) => {
                completed += 1;
                ctx.emit_iteration(execution_id, i, ExecutionState::Success, Some(output), None)
                    .await;
            }
            Err(BodyError::Canceled) => {
                ctx.emit_iteration(execution_id, i, ExecutionState::Canceled, Some(output), None)
                    .await;
                return Err(NodeError::Canceled);
            }
            Err(BodyError::Failed(message)) => {
                failed += 1;
                ctx.emit_iteration(
                    execution_id,
                    i,
                    ExecutionState::Failure,
                    Some(output),
                    Some(message.clone()),
                )
                .await;
                tracing::debug!(node = name, iteration = i, policy = ?policy, "iteration failed");
                match policy {
                    IterationErrorPolicy::Continue => {}
                    IterationErrorPolicy::Break => break,
                    IterationErrorPolicy::Stop => {
                        return Err(NodeError::Iteration { index: i, message });
                    }
                }
            }
        }
    }

    Ok(NodeOutcome::then(Some(json!({
        "iterations": total,
        "completed": completed,
        "failed": failed,
    }))))
}
