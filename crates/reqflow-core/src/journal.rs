//! Node execution journal.
//!
//! Turns the engine's status events into journal rows: a `Running` event
//! creates a row, a terminal event promotes it. Nodes skipped without ever
//! starting get a single terminal row. Payloads are JSON; input and output
//! are each gzip-compressed when larger than the configured threshold. A
//! terminal event carrying a `response_id` stores the response from its
//! output in the same write that promotes the row.

use chrono::Utc;
use reqflow_types::error::{ErrorKind, RepositoryError};
use reqflow_types::execution::{
    CompressionKind, ExecutionState, NodeExecution, NodeExecutionUpdate, NodeResponse,
    NodeStatusEvent,
};
use reqflow_types::id::Id;
use serde_json::Value;

use crate::codec::{self, CodecError};
use crate::repository::execution::NodeExecutionRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl JournalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JournalError::Repository(e) => e.kind(),
            _ => ErrorKind::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// NodeJournal
// ---------------------------------------------------------------------------

/// Decoded view of a journal row's payloads.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub input: Option<Value>,
    pub output: Option<Value>,
}

pub struct NodeJournal<R: NodeExecutionRepository> {
    repo: R,
    compression_threshold: usize,
}

impl<R: NodeExecutionRepository> NodeJournal<R> {
    pub fn new(repo: R, compression_threshold: usize) -> Self {
        Self {
            repo,
            compression_threshold,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Persist one status event.
    pub async fn record(&self, event: &NodeStatusEvent) -> Result<(), JournalError> {
        if event.state == ExecutionState::Running {
            let (input_data, input_compression) = self.encode(event.input.as_ref())?;
            let (output_data, output_compression) = self.encode(event.output.as_ref())?;
            let row = NodeExecution {
                id: event.execution_id,
                node_id: event.node_id,
                name: event.name.clone(),
                state: ExecutionState::Running,
                input_data,
                output_data,
                input_compression,
                output_compression,
                error: None,
                response_id: None,
                completed_at: None,
            };
            self.repo.create(&row).await?;
            return Ok(());
        }

        let (output_data, output_compression) = self.encode(event.output.as_ref())?;
        if self.repo.get(&event.execution_id).await?.is_some() {
            let response = event.response_id.and_then(|id| {
                let view = event.output.as_ref()?.get("response")?;
                NodeResponse::from_view(id, event.execution_id, view)
            });
            let update = NodeExecutionUpdate {
                state: event.state,
                output_data,
                output_compression,
                error: event.error.clone(),
                response_id: response.as_ref().map(|r| r.id),
                completed_at: Some(Utc::now()),
            };
            match &response {
                Some(response) => {
                    self.repo
                        .update_with_response(&event.execution_id, &update, response)
                        .await?
                }
                None => self.repo.update(&event.execution_id, &update).await?,
            }
            return Ok(());
        }

        // Never started: one terminal row, with no response to point at.
        let (input_data, input_compression) = self.encode(event.input.as_ref())?;
        let row = NodeExecution {
            id: event.execution_id,
            node_id: event.node_id,
            name: event.name.clone(),
            state: event.state,
            input_data,
            output_data,
            input_compression,
            output_compression,
            error: event.error.clone(),
            response_id: None,
            completed_at: Some(Utc::now()),
        };
        self.repo.create(&row).await?;
        Ok(())
    }

    /// The response a journal row points at.
    pub async fn response(&self, id: &Id) -> Result<Option<NodeResponse>, JournalError> {
        Ok(self.repo.get_response(id).await?)
    }

    /// Decode a row's input and output payloads.
    pub fn decode(&self, row: &NodeExecution) -> Result<DecodedPayload, JournalError> {
        Ok(DecodedPayload {
            input: decode_json(&row.input_data, row.input_compression)?,
            output: decode_json(&row.output_data, row.output_compression)?,
        })
    }

    /// Rows for a node, newest first.
    pub async fn history(
        &self,
        node_id: &Id,
        limit: Option<u32>,
    ) -> Result<Vec<NodeExecution>, JournalError> {
        Ok(self.repo.list_by_node(node_id, limit).await?)
    }

    pub async fn latest(&self, node_id: &Id) -> Result<Option<NodeExecution>, JournalError> {
        Ok(self.repo.latest_for_node(node_id).await?)
    }

    pub async fn clear(&self, node_ids: &[Id]) -> Result<u64, JournalError> {
        Ok(self.repo.bulk_delete_by_nodes(node_ids).await?)
    }

    /// Serialize a payload, compressing it above the threshold.
    fn encode(&self, value: Option<&Value>) -> Result<(Vec<u8>, CompressionKind), JournalError> {
        let bytes = encode_json(value)?;
        if bytes.len() > self.compression_threshold {
            Ok((codec::compress(&bytes)?, CompressionKind::Gzip))
        } else {
            Ok((bytes, CompressionKind::None))
        }
    }
}

fn encode_json(value: Option<&Value>) -> Result<Vec<u8>, JournalError> {
    match value {
        Some(v) => Ok(serde_json::to_vec(v)?),
        None => Ok(Vec::new()),
    }
}

fn decode_json(data: &[u8], kind: CompressionKind) -> Result<Option<Value>, JournalError> {
    if data.is_empty() {
        return Ok(None);
    }
    let bytes = codec::decode(data, kind)?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}
