//! IF node: follows `Then` when the condition holds, `Else` otherwise.

use reqflow_types::flow::{Handle, NodeKind};
use reqflow_types::id::Id;
use serde_json::{Value, json};

use crate::flow::node::{FlowNode, NodeContext, NodeFuture, NodeOutcome};
use crate::vars::VariableScope;

pub struct IfNode {
    id: Id,
    name: String,
    condition: String,
}

impl IfNode {
    pub fn new(id: Id, name: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            condition: condition.into(),
        }
    }
}

impl FlowNode for IfNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::If
    }

    fn input(&self, _scope: &VariableScope) -> Option<Value> {
        Some(json!({ "condition": self.condition }))
    }

    fn run(&self, ctx: NodeContext) -> NodeFuture<'_> {
        Box::pin(async move {
            let result = ctx
                .evaluator()
                .evaluate_bool(&self.condition, &ctx.scope.snapshot())?;
            ctx.scope.set(self.name.clone(), json!({ "result": result }));
            tracing::debug!(node = self.name.as_str(), result, "condition evaluated");
            Ok(NodeOutcome {
                handle: if result { Handle::Then } else { Handle::Else },
                output: Some(json!({ "condition": self.condition, "result": result })),
                response_id: None,
            })
        })
    }
}
