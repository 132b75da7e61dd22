//! Status event delivery.
//!
//! Non-terminal events go out with `try_send` and are dropped when the
//! consumer's buffer is full; terminal events are always delivered.

use std::sync::atomic::{AtomicU64, Ordering};

use reqflow_types::execution::{FlowStatusEvent, NodeStatusEvent};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub struct StatusEmitter {
    node_tx: mpsc::Sender<NodeStatusEvent>,
    flow_tx: mpsc::Sender<FlowStatusEvent>,
    dropped: AtomicU64,
}

impl StatusEmitter {
    pub fn new(node_tx: mpsc::Sender<NodeStatusEvent>, flow_tx: mpsc::Sender<FlowStatusEvent>) -> Self {
        Self {
            node_tx,
            flow_tx,
            dropped: AtomicU64::new(0),
        }
    }

    pub async fn node(&self, event: NodeStatusEvent) {
        if event.state.is_terminal() {
            if self.node_tx.send(event).await.is_err() {
                tracing::debug!("node status receiver closed");
            }
            return;
        }
        match self.node_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    node = event.name.as_str(),
                    state = %event.state,
                    "status buffer full, dropping event"
                );
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("node status receiver closed");
            }
        }
    }

    pub async fn flow(&self, event: FlowStatusEvent) {
        if event.state.is_terminal() {
            if self.flow_tx.send(event).await.is_err() {
                tracing::debug!("flow status receiver closed");
            }
        } else if let Err(TrySendError::Full(_)) = self.flow_tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("flow status buffer full, dropping event");
        }
    }

    /// Non-terminal events dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
