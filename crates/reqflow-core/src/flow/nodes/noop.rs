use reqflow_types::flow::NodeKind;
use reqflow_types::id::Id;

use crate::flow::node::{FlowNode, NodeContext, NodeFuture, NodeOutcome};

/// Start and join marker.
pub struct NoopNode {
    id: Id,
    name: String,
}

impl NoopNode {
    pub fn new(id: Id, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl FlowNode for NoopNode {
    fn id(&self) -> Id {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Noop
    }

    fn run(&self, _ctx: NodeContext) -> NodeFuture<'_> {
        Box::pin(async { Ok(NodeOutcome::then(None)) })
    }
}
