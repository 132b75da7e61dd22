//! Flow service: runs stored flows and journals every node event.
//!
//! Generic over the repository traits so it works with any storage backend.

use std::sync::Arc;
use std::time::Duration;

use reqflow_types::config::GlobalConfig;
use reqflow_types::execution::{FlowStatusEvent, NodeExecution, NodeResponse, NodeStatusEvent};
use reqflow_types::flow::{ExecutionMode, Flow, NodePayload};
use reqflow_types::id::Id;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::graph::FlowGraph;
use super::nodes;
use super::runner::{FlowRunner, RunOutcome, RunnerConfig};
use crate::delta::loader::load_for_ref;
use crate::expression::FlowEvaluator;
use crate::http::HttpClient;
use crate::journal::{DecodedPayload, NodeJournal};
use crate::repository::execution::NodeExecutionRepository;
use crate::repository::flow::FlowRepository;
use crate::repository::request::RequestRepository;
use crate::repository::workspace::WorkspaceRepository;
use crate::service::{ServiceError, environment_vars};
use crate::vars::VarMap;

/// Capacity of the internal flow status channel.
const FLOW_STATUS_BUFFER: usize = 8;

/// Per-run options chosen by the caller.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub environment_id: Option<Id>,
    pub mode: ExecutionMode,
    /// Capped by the flow's configured timeout.
    pub timeout: Option<Duration>,
}

pub struct FlowService<F, Q, W, E>
where
    F: FlowRepository,
    Q: RequestRepository,
    W: WorkspaceRepository,
    E: NodeExecutionRepository,
{
    flows: F,
    requests: Q,
    workspaces: W,
    journal: NodeJournal<E>,
    client: Arc<dyn HttpClient>,
    evaluator: Arc<FlowEvaluator>,
    config: GlobalConfig,
}

impl<F, Q, W, E> FlowService<F, Q, W, E>
where
    F: FlowRepository,
    Q: RequestRepository,
    W: WorkspaceRepository,
    E: NodeExecutionRepository,
{
    pub fn new(
        flows: F,
        requests: Q,
        workspaces: W,
        executions: E,
        client: Arc<dyn HttpClient>,
        config: GlobalConfig,
    ) -> Self {
        Self {
            flows,
            requests,
            workspaces,
            journal: NodeJournal::new(executions, config.compression_threshold_bytes),
            client,
            evaluator: Arc::new(FlowEvaluator::new()),
            config,
        }
    }

    pub fn journal(&self) -> &NodeJournal<E> {
        &self.journal
    }

    pub async fn list_flows(&self, workspace_id: &Id) -> Result<Vec<Flow>, ServiceError> {
        Ok(self.flows.list_flows(workspace_id).await?)
    }

    /// Load, validate and resolve a flow without running it.
    pub async fn prepare(
        &self,
        flow_id: &Id,
        options: &RunOptions,
    ) -> Result<(FlowRunner, VarMap), ServiceError> {
        let snapshot = self
            .flows
            .load_snapshot(flow_id)
            .await?
            .ok_or(ServiceError::NotFound {
                entity: "flow",
                id: *flow_id,
            })?;
        let graph = FlowGraph::build(&snapshot.nodes, &snapshot.edges)?;

        let vars = environment_vars(
            &self.workspaces,
            &snapshot.flow.workspace_id,
            options.environment_id.as_ref(),
        )
        .await?
        .with_flow_variables(&snapshot.variables);

        let mut built = Vec::with_capacity(snapshot.nodes.len());
        for def in &snapshot.nodes {
            let resolved = match &def.payload {
                NodePayload::Request(request_ref) => {
                    Some(load_for_ref(&self.requests, request_ref).await?)
                }
                _ => None,
            };
            built.push(nodes::build(def, resolved, &self.client)?);
        }

        let configured = snapshot
            .flow
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_secs(self.config.flow_timeout_secs));
        let config = RunnerConfig {
            mode: options.mode,
            timeout: options.timeout.map_or(configured, |t| t.min(configured)),
            ..RunnerConfig::from_global(&self.config)
        };

        let runner = FlowRunner::new(snapshot.flow.id, graph, built, config)?
            .with_evaluator(Arc::clone(&self.evaluator));
        Ok((runner, vars))
    }

    /// Run a stored flow.
    ///
    /// Every node event is journaled, then forwarded to `node_out` if given;
    /// flow events go to `flow_out`. Both are closed when the run ends.
    pub async fn run(
        &self,
        flow_id: &Id,
        options: &RunOptions,
        cancel: &CancellationToken,
        node_out: Option<mpsc::Sender<NodeStatusEvent>>,
        flow_out: Option<mpsc::Sender<FlowStatusEvent>>,
    ) -> Result<RunOutcome, ServiceError> {
        let (runner, vars) = self.prepare(flow_id, options).await?;
        tracing::info!(
            flow_id = %flow_id,
            mode = ?runner.selected_mode(),
            variables = vars.len(),
            "running flow"
        );

        let (node_tx, node_rx) = mpsc::channel(self.config.status_capacity(runner.graph().len()));
        let (flow_tx, flow_rx) = mpsc::channel(FLOW_STATUS_BUFFER);

        let (outcome, ()) = tokio::join!(
            runner.run(cancel, &vars, node_tx, flow_tx),
            self.forward(node_rx, flow_rx, node_out, flow_out),
        );
        Ok(outcome)
    }

    /// Journal rows for a node, newest first, with decoded payloads.
    pub async fn history(
        &self,
        node_id: &Id,
        limit: Option<u32>,
    ) -> Result<Vec<(NodeExecution, DecodedPayload)>, ServiceError> {
        let rows = self.journal.history(node_id, limit).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let payload = self.journal.decode(&row)?;
            out.push((row, payload));
        }
        Ok(out)
    }

    /// Stored response of a request node execution.
    pub async fn response(&self, id: &Id) -> Result<Option<NodeResponse>, ServiceError> {
        Ok(self.journal.response(id).await?)
    }

    /// Delete every journal row of a flow's nodes.
    pub async fn clear_history(&self, flow_id: &Id) -> Result<u64, ServiceError> {
        let nodes = self.flows.list_nodes(flow_id).await?;
        let ids: Vec<Id> = nodes.iter().map(|n| n.id).collect();
        Ok(self.journal.clear(&ids).await?)
    }

    async fn forward(
        &self,
        mut node_rx: mpsc::Receiver<NodeStatusEvent>,
        mut flow_rx: mpsc::Receiver<FlowStatusEvent>,
        mut node_out: Option<mpsc::Sender<NodeStatusEvent>>,
        mut flow_out: Option<mpsc::Sender<FlowStatusEvent>>,
    ) {
        let mut nodes_open = true;
        let mut flows_open = true;
        while nodes_open || flows_open {
            tokio::select! {
                biased;
                event = node_rx.recv(), if nodes_open => match event {
                    Some(event) => {
                        if let Err(e) = self.journal.record(&event).await {
                            tracing::warn!(
                                node = event.name.as_str(),
                                state = %event.state,
                                error = %e,
                                "failed to journal node event"
                            );
                        }
                        if let Some(tx) = &node_out {
                            if tx.send(event).await.is_err() {
                                tracing::debug!("node event receiver dropped, no longer forwarding");
                                node_out = None;
                            }
                        }
                    }
                    None => nodes_open = false,
                },
                event = flow_rx.recv(), if flows_open => match event {
                    Some(event) => {
                        if let Some(tx) = &flow_out {
                            if tx.send(event).await.is_err() {
                                tracing::debug!("flow event receiver dropped, no longer forwarding");
                                flow_out = None;
                            }
                        }
                    }
                    None => flows_open = false,
                },
            }
        }
    }
}
