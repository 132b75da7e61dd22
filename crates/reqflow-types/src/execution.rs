//! Node execution records and the status events the engine streams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::Id;

// ---------------------------------------------------------------------------
// Compression tag
// ---------------------------------------------------------------------------

/// Codec applied to a stored payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionKind {
    #[default]
    None,
    Gzip,
}

impl CompressionKind {
    /// Numeric code used in storage.
    pub fn code(&self) -> i64 {
        match self {
            CompressionKind::None => 0,
            CompressionKind::Gzip => 1,
        }
    }

    /// `None` for codes that name no known codec.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(CompressionKind::None),
            1 => Some(CompressionKind::Gzip),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionKind::None => "none",
            CompressionKind::Gzip => "gzip",
        }
    }
}

impl std::str::FromStr for CompressionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CompressionKind::None),
            "gzip" => Ok(CompressionKind::Gzip),
            other => Err(format!("invalid compression name '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// State of one node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Running,
    Success,
    Failure,
    Canceled,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Running => "RUNNING",
            ExecutionState::Success => "SUCCESS",
            ExecutionState::Failure => "FAILURE",
            ExecutionState::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(ExecutionState::Running),
            "SUCCESS" => Ok(ExecutionState::Success),
            "FAILURE" => Ok(ExecutionState::Failure),
            "CANCELED" => Ok(ExecutionState::Canceled),
            other => Err(format!("unknown execution state '{other}'")),
        }
    }
}

/// State of a whole flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    Running,
    Success,
    Failure,
    Timeout,
    Canceled,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FlowState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::Running => "RUNNING",
            FlowState::Success => "SUCCESS",
            FlowState::Failure => "FAILURE",
            FlowState::Timeout => "TIMEOUT",
            FlowState::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for FlowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Journal row
// ---------------------------------------------------------------------------

/// One journal row: a single run (or iteration) of a node.
///
/// Rows are creation-ordered by `id`. Only `Running` rows may be promoted;
/// terminal rows are immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: Id,
    pub node_id: Id,
    pub name: String,
    pub state: ExecutionState,
    /// Encoded per `input_compression`.
    #[serde(default)]
    pub input_data: Vec<u8>,
    /// Encoded per `output_compression`.
    #[serde(default)]
    pub output_data: Vec<u8>,
    #[serde(default)]
    pub input_compression: CompressionKind,
    #[serde(default)]
    pub output_compression: CompressionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// The mutable part of a journal row, applied when a node completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeExecutionUpdate {
    pub state: ExecutionState,
    pub output_data: Vec<u8>,
    pub output_compression: CompressionKind,
    pub error: Option<String>,
    pub response_id: Option<Id>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A response received by a request node, stored with the journal row that
/// references it through `response_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResponse {
    pub id: Id,
    pub execution_id: Id,
    pub status: u16,
    /// Header name to value.
    pub headers: serde_json::Value,
    /// Parsed JSON when possible, otherwise text.
    pub body: serde_json::Value,
    pub duration_ms: u64,
    pub received_at: DateTime<Utc>,
}

impl NodeResponse {
    /// Build from the `{status, headers, body, duration_ms}` view a request
    /// node records as `response` in its output.
    pub fn from_view(id: Id, execution_id: Id, view: &serde_json::Value) -> Option<Self> {
        let status = view.get("status")?.as_u64().and_then(|s| u16::try_from(s).ok())?;
        Some(Self {
            id,
            execution_id,
            status,
            headers: view.get("headers").cloned().unwrap_or_default(),
            body: view.get("body").cloned().unwrap_or_default(),
            duration_ms: view.get("duration_ms").and_then(|d| d.as_u64()).unwrap_or(0),
            received_at: Utc::now(),
        })
    }
}

// ---------------------------------------------------------------------------
// Status events
// ---------------------------------------------------------------------------

/// Per-node status event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatusEvent {
    /// Journal row this event belongs to. Iterations get their own id.
    pub execution_id: Id,
    pub node_id: Id,
    pub name: String,
    pub state: ExecutionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<Id>,
    /// Set on per-iteration events of FOR / FOR_EACH nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,
    pub timestamp_ms: i64,
}

impl NodeStatusEvent {
    pub fn new(execution_id: Id, node_id: Id, name: impl Into<String>, state: ExecutionState) -> Self {
        Self {
            execution_id,
            node_id,
            name: name.into(),
            state,
            input: None,
            output: None,
            error: None,
            response_id: None,
            iteration: None,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Per-flow status event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStatusEvent {
    pub flow_id: Id,
    pub state: FlowState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp_ms: i64,
}

impl FlowStatusEvent {
    pub fn new(flow_id: Id, state: FlowState, error: Option<String>) -> Self {
        Self {
            flow_id,
            state,
            error,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_codes() {
        assert_eq!(CompressionKind::from_code(1), Some(CompressionKind::Gzip));
        assert_eq!(CompressionKind::from_code(7), None);
        assert_eq!(CompressionKind::Gzip.code(), 1);
        assert!("zstd".parse::<CompressionKind>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!ExecutionState::Running.is_terminal());
        assert!(ExecutionState::Canceled.is_terminal());
        assert!(FlowState::Timeout.is_terminal());
        assert_eq!(
            "FAILURE".parse::<ExecutionState>().unwrap(),
            ExecutionState::Failure
        );
    }

    #[test]
    fn response_from_node_output_view() {
        let view = serde_json::json!({
            "status": 201,
            "headers": {"content-type": "application/json"},
            "body": {"id": 9},
            "duration_ms": 12,
        });
        let r = NodeResponse::from_view(Id::new(), Id::new(), &view).unwrap();
        assert_eq!(r.status, 201);
        assert_eq!(r.body["id"], 9);
        assert_eq!(r.duration_ms, 12);

        assert!(NodeResponse::from_view(Id::new(), Id::new(), &serde_json::json!({})).is_none());
        let bad = serde_json::json!({"status": 70000});
        assert!(NodeResponse::from_view(Id::new(), Id::new(), &bad).is_none());
    }

    #[test]
    fn status_event_serializes_state_in_caps() {
        let ev = NodeStatusEvent::new(Id::new(), Id::new(), "req1", ExecutionState::Success);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["state"], "SUCCESS");
        assert!(json.get("iteration").is_none());
    }
}
