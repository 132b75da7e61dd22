//! Flow graph domain types.
//!
//! A flow owns typed nodes, handle-labelled edges and an ordered list of flow
//! variables. The graph is a DAG along `Then`/`Else` edges; iteration nodes
//! reach their body sub-graph through `Loop` edges and re-enter it per
//! iteration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::Id;

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// A named flow inside a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: Id,
    pub workspace_id: Id,
    pub name: String,
    /// Per-flow timeout override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    pub fn new(workspace_id: Id, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Id::new(),
            workspace_id,
            name: name.into(),
            timeout_ms: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One flow-scoped variable. Ordered inside its flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowVariable {
    pub id: Id,
    pub flow_id: Id,
    pub name: String,
    pub value: String,
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prev: Option<Id>,
    #[serde(default)]
    pub next: Option<Id>,
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// The kind of a flow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Noop,
    Request,
    For,
    ForEach,
    If,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Noop => "noop",
            NodeKind::Request => "request",
            NodeKind::For => "for",
            NodeKind::ForEach => "for_each",
            NodeKind::If => "if",
        }
    }
}

/// What an iteration node does when one iteration of its body fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationErrorPolicy {
    /// Record the failure and run the next iteration.
    #[default]
    Continue,
    /// Stop iterating; the node still succeeds.
    Break,
    /// Stop iterating and fail the node.
    Stop,
}

/// Which example a request node sends, optionally through a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRef {
    pub endpoint_id: Id,
    pub example_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_endpoint_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_example_id: Option<Id>,
}

/// Kind-specific node configuration, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodePayload {
    /// Start or join marker. Exactly one node in a flow is the start.
    Noop {
        #[serde(default)]
        start: bool,
    },
    Request(RequestRef),
    For {
        iterations: u32,
        #[serde(default)]
        error_policy: IterationErrorPolicy,
    },
    ForEach {
        /// JEXL expression producing the sequence to iterate.
        expression: String,
        #[serde(default)]
        error_policy: IterationErrorPolicy,
    },
    If {
        /// JEXL predicate selecting the `Then` or `Else` handle.
        condition: String,
    },
}

impl NodePayload {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodePayload::Noop { .. } => NodeKind::Noop,
            NodePayload::Request(_) => NodeKind::Request,
            NodePayload::For { .. } => NodeKind::For,
            NodePayload::ForEach { .. } => NodeKind::ForEach,
            NodePayload::If { .. } => NodeKind::If,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, NodePayload::Noop { start: true })
    }
}

/// A stored flow node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowNodeDef {
    pub id: Id,
    pub flow_id: Id,
    pub name: String,
    pub payload: NodePayload,
}

impl FlowNodeDef {
    pub fn new(flow_id: Id, name: impl Into<String>, payload: NodePayload) -> Self {
        Self {
            id: Id::new(),
            flow_id,
            name: name.into(),
            payload,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.payload.kind()
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// A labelled outgoing port on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handle {
    #[default]
    Then,
    Else,
    /// Into the body of an iteration node.
    Loop,
}

impl Handle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Handle::Then => "then",
            Handle::Else => "else",
            Handle::Loop => "loop",
        }
    }
}

impl std::str::FromStr for Handle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "then" => Ok(Handle::Then),
            "else" => Ok(Handle::Else),
            "loop" => Ok(Handle::Loop),
            other => Err(format!("unknown handle '{other}'")),
        }
    }
}

/// A directed edge between two nodes of one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEdge {
    pub id: Id,
    pub flow_id: Id,
    pub source: Id,
    pub target: Id,
    #[serde(default)]
    pub handle: Handle,
}

impl FlowEdge {
    pub fn new(flow_id: Id, source: Id, target: Id, handle: Handle) -> Self {
        Self {
            id: Id::new(),
            flow_id,
            source,
            target,
            handle,
        }
    }
}

// ---------------------------------------------------------------------------
// Execution mode
// ---------------------------------------------------------------------------

/// How the engine schedules nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// `Single` for small flows, `Multi` otherwise.
    #[default]
    Auto,
    /// One node at a time, in topological order.
    Single,
    /// Independent branches in parallel.
    Multi,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(ExecutionMode::Auto),
            "single" => Ok(ExecutionMode::Single),
            "multi" => Ok(ExecutionMode::Multi),
            other => Err(format!("unknown execution mode '{other}'")),
        }
    }
}
