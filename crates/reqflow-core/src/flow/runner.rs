//! Flow runner: dependency-driven execution of a validated flow graph.
//!
//! A region (the main path or one loop body) is scheduled by counting
//! unresolved incoming edges per node. A node becomes eligible when all of
//! its in-region predecessors have settled and at least one of them followed
//! the edge leading to it; when every incoming edge was left untaken (the
//! other side of an IF, or downstream of a failure) the node is skipped and
//! reported `Canceled`.
//!
//! `Single` mode runs one eligible node at a time in topological order.
//! `Multi` mode spawns eligible nodes onto a `JoinSet` bounded by the worker
//! count. Both modes share the same bookkeeping, so their per-node outcomes
//! are identical.
//!
//! Every node runs under a token derived from the caller's token. A watchdog
//! cancels it when the flow timeout elapses; a node failure cancels only the
//! region it occurred in.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqflow_types::config::GlobalConfig;
use reqflow_types::error::ErrorKind;
use reqflow_types::execution::{
    ExecutionState, FlowState, FlowStatusEvent, NodeStatusEvent,
};
use reqflow_types::flow::{ExecutionMode, Handle, NodeKind};
use reqflow_types::id::Id;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::graph::{FlowGraph, Region};
use super::node::{FlowNode, NodeContext, NodeError};
use super::status::StatusEmitter;
use crate::expression::FlowEvaluator;
use crate::vars::{VarMap, VariableScope};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    #[error("node {0} has no implementation")]
    MissingNode(Id),

    #[error("node {0} is not part of the flow graph")]
    UnknownNode(Id),

    #[error("request node {0} has no resolved example")]
    UnresolvedRequest(Id),
}

impl RunnerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RunnerError::UnresolvedRequest(_) => ErrorKind::FailedPrecondition,
            _ => ErrorKind::InvalidArgument,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration and result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    pub mode: ExecutionMode,
    pub timeout: Duration,
    /// `Auto` picks `Single` at or below this many non-noop nodes.
    pub small_flow_threshold: usize,
    pub max_workers: usize,
}

impl RunnerConfig {
    pub fn from_global(config: &GlobalConfig) -> Self {
        Self {
            mode: ExecutionMode::Auto,
            timeout: Duration::from_secs(config.flow_timeout_secs),
            small_flow_threshold: config.small_flow_threshold,
            max_workers: config.workers(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from_global(&GlobalConfig::default())
    }
}

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub state: FlowState,
    pub error: Option<String>,
    /// Non-terminal status events dropped because a buffer was full.
    pub dropped_events: u64,
}

// ---------------------------------------------------------------------------
// FlowRunner
// ---------------------------------------------------------------------------

pub struct FlowRunner {
    flow_id: Id,
    graph: Arc<FlowGraph>,
    nodes: Arc<HashMap<Id, Arc<dyn FlowNode>>>,
    evaluator: Arc<FlowEvaluator>,
    config: RunnerConfig,
}

impl FlowRunner {
    /// Pair a validated graph with one implementation per graph node.
    pub fn new(
        flow_id: Id,
        graph: FlowGraph,
        nodes: Vec<Arc<dyn FlowNode>>,
        config: RunnerConfig,
    ) -> Result<Self, RunnerError> {
        let mut by_id = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if !graph.contains(&node.id()) {
                return Err(RunnerError::UnknownNode(node.id()));
            }
            by_id.insert(node.id(), node);
        }
        if let Some(missing) = graph.node_ids().find(|id| !by_id.contains_key(id)) {
            return Err(RunnerError::MissingNode(missing));
        }

        Ok(Self {
            flow_id,
            graph: Arc::new(graph),
            nodes: Arc::new(by_id),
            evaluator: Arc::new(FlowEvaluator::new()),
            config,
        })
    }

    /// Share an evaluator across runners.
    pub fn with_evaluator(mut self, evaluator: Arc<FlowEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The concrete mode a run will use.
    pub fn selected_mode(&self) -> ExecutionMode {
        match self.config.mode {
            ExecutionMode::Auto => {
                if self.graph.work_node_count() <= self.config.small_flow_threshold {
                    ExecutionMode::Single
                } else {
                    ExecutionMode::Multi
                }
            }
            mode => mode,
        }
    }

    /// Run the flow to a terminal state.
    ///
    /// Status events go to `node_tx` and `flow_tx`; both senders are dropped
    /// after the terminal flow event, closing the channels.
    pub async fn run(
        &self,
        parent: &CancellationToken,
        vars: &VarMap,
        node_tx: mpsc::Sender<NodeStatusEvent>,
        flow_tx: mpsc::Sender<FlowStatusEvent>,
    ) -> RunOutcome {
        let mode = self.selected_mode();
        let engine = Arc::new(Engine {
            flow_id: self.flow_id,
            graph: Arc::clone(&self.graph),
            nodes: Arc::clone(&self.nodes),
            evaluator: Arc::clone(&self.evaluator),
            emitter: StatusEmitter::new(node_tx, flow_tx),
            mode,
            max_workers: self.config.max_workers.max(1),
        });

        engine
            .emitter
            .flow(FlowStatusEvent::new(self.flow_id, FlowState::Running, None))
            .await;
        tracing::info!(
            flow_id = %self.flow_id,
            mode = ?mode,
            nodes = self.graph.len(),
            timeout_ms = self.config.timeout.as_millis() as u64,
            "flow started"
        );

        let root = parent.child_token();
        let scope = Arc::new(VariableScope::from_var_map(vars));
        let mut region = Arc::clone(&engine).run_region(self.graph.main_region(), scope, root.clone());

        let mut timed_out = false;
        let outcome = match tokio::time::timeout(self.config.timeout, &mut region).await {
            Ok(outcome) => outcome,
            Err(_) => {
                timed_out = true;
                root.cancel();
                (&mut region).await
            }
        };
        drop(region);

        let (state, error) = if timed_out {
            (
                FlowState::Timeout,
                Some(format!(
                    "flow timed out after {} ms",
                    self.config.timeout.as_millis()
                )),
            )
        } else if let Some(message) = outcome.failure {
            (FlowState::Failure, Some(message))
        } else if outcome.canceled {
            (FlowState::Canceled, Some("flow canceled".to_string()))
        } else {
            (FlowState::Success, None)
        };

        engine
            .emitter
            .flow(FlowStatusEvent::new(self.flow_id, state, error.clone()))
            .await;
        let dropped_events = engine.emitter.dropped();
        tracing::info!(flow_id = %self.flow_id, state = %state, dropped_events, "flow finished");

        RunOutcome {
            state,
            error,
            dropped_events,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub(crate) type RegionFuture = Pin<Box<dyn Future<Output = RegionOutcome> + Send>>;

#[derive(Debug, Default)]
pub(crate) struct RegionOutcome {
    /// First failure, formatted as `node: error`.
    pub failure: Option<String>,
    /// The token handed to the region was cancelled.
    pub canceled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeResult {
    Success(Handle),
    Failure(String),
    Canceled,
}

/// Shared state of one run.
pub(crate) struct Engine {
    flow_id: Id,
    graph: Arc<FlowGraph>,
    nodes: Arc<HashMap<Id, Arc<dyn FlowNode>>>,
    evaluator: Arc<FlowEvaluator>,
    emitter: StatusEmitter,
    mode: ExecutionMode,
    max_workers: usize,
}

impl Engine {
    pub(crate) fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    pub(crate) fn evaluator(&self) -> &FlowEvaluator {
        &self.evaluator
    }

    pub(crate) fn emitter(&self) -> &StatusEmitter {
        &self.emitter
    }

    /// Drive every member of `region` to a terminal state.
    pub(crate) fn run_region(
        self: Arc<Self>,
        region: Arc<Region>,
        scope: Arc<VariableScope>,
        token: CancellationToken,
    ) -> RegionFuture {
        Box::pin(async move {
            let local = token.child_token();
            let mut frontier = Frontier::new(&self.graph, &region);
            let mut failure: Option<String> = None;
            let mut join_set: JoinSet<(Id, NodeResult)> = JoinSet::new();

            loop {
                let (id, result) = if self.mode == ExecutionMode::Multi {
                    while !local.is_cancelled() && join_set.len() < self.max_workers {
                        let Some(id) = frontier.next_ready() else {
                            break;
                        };
                        join_set.spawn(Arc::clone(&self).execute_node(
                            id,
                            Arc::clone(&scope),
                            local.clone(),
                        ));
                    }
                    match join_set.join_next().await {
                        None => break,
                        Some(Ok(done)) => done,
                        Some(Err(e)) => {
                            tracing::error!(flow_id = %self.flow_id, error = %e, "node task aborted");
                            failure.get_or_insert_with(|| format!("node task aborted: {e}"));
                            local.cancel();
                            continue;
                        }
                    }
                } else {
                    if local.is_cancelled() {
                        break;
                    }
                    let Some(id) = frontier.next_ready() else {
                        break;
                    };
                    Arc::clone(&self)
                        .execute_node(id, Arc::clone(&scope), local.clone())
                        .await
                };

                let taken = match result {
                    NodeResult::Success(handle) => Some(handle),
                    NodeResult::Failure(message) => {
                        failure.get_or_insert_with(|| format!("{}: {message}", self.graph.name(&id)));
                        local.cancel();
                        None
                    }
                    NodeResult::Canceled => None,
                };
                for skipped in frontier.complete(id, taken) {
                    // Branch not taken.
                    self.emit_canceled(skipped, None).await;
                }
            }

            for id in frontier.unsettled() {
                self.emit_canceled(id, Some("canceled".to_string())).await;
            }

            RegionOutcome {
                failure,
                canceled: token.is_cancelled(),
            }
        })
    }

    async fn execute_node(
        self: Arc<Self>,
        id: Id,
        scope: Arc<VariableScope>,
        token: CancellationToken,
    ) -> (Id, NodeResult) {
        let Some(node) = self.nodes.get(&id).cloned() else {
            return (id, NodeResult::Failure("node has no implementation".to_string()));
        };
        let name = node.name().to_string();
        let execution_id = Id::new();

        let mut running = NodeStatusEvent::new(execution_id, id, name.clone(), ExecutionState::Running);
        running.input = node.input(&scope);
        self.emitter.node(running).await;
        tracing::debug!(flow_id = %self.flow_id, node = name.as_str(), "node running");

        let ctx = NodeContext {
            engine: Arc::clone(&self),
            node_id: id,
            execution_id,
            scope,
            token: token.clone(),
        };

        // Iteration nodes watch the token themselves so their bodies can
        // report terminal states before the node returns.
        let result = if matches!(node.kind(), NodeKind::For | NodeKind::ForEach) {
            node.run(ctx).await
        } else {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(NodeError::Canceled),
                r = node.run(ctx) => r,
            }
        };

        match result {
            Ok(outcome) => {
                let mut event = NodeStatusEvent::new(execution_id, id, name.clone(), ExecutionState::Success);
                event.output = outcome.output;
                event.response_id = outcome.response_id;
                self.emitter.node(event).await;
                tracing::debug!(flow_id = %self.flow_id, node = name.as_str(), handle = outcome.handle.as_str(), "node succeeded");
                (id, NodeResult::Success(outcome.handle))
            }
            Err(NodeError::Canceled) => {
                let mut event = NodeStatusEvent::new(execution_id, id, name.clone(), ExecutionState::Canceled);
                event.error = Some("canceled".to_string());
                self.emitter.node(event).await;
                tracing::debug!(flow_id = %self.flow_id, node = name.as_str(), "node canceled");
                (id, NodeResult::Canceled)
            }
            Err(e) => {
                let message = e.to_string();
                let mut event = NodeStatusEvent::new(execution_id, id, name.clone(), ExecutionState::Failure);
                event.output = e.output();
                if matches!(e, NodeError::AssertionFailed { .. }) {
                    event.response_id = Some(Id::new());
                }
                event.error = Some(message.clone());
                self.emitter.node(event).await;
                tracing::warn!(
                    flow_id = %self.flow_id,
                    node = name.as_str(),
                    kind = %e.kind(),
                    error = %message,
                    "node failed"
                );
                (id, NodeResult::Failure(message))
            }
        }
    }

    /// Terminal event for a node that never started.
    async fn emit_canceled(&self, id: Id, error: Option<String>) {
        let mut event = NodeStatusEvent::new(
            Id::new(),
            id,
            self.graph.name(&id).to_string(),
            ExecutionState::Canceled,
        );
        event.error = error;
        self.emitter.node(event).await;
    }
}

// ---------------------------------------------------------------------------
// Frontier
// ---------------------------------------------------------------------------

/// Readiness bookkeeping for one region.
struct Frontier<'a> {
    graph: &'a FlowGraph,
    region: &'a Region,
    pending: HashMap<Id, usize>,
    activated: HashSet<Id>,
    ready: BTreeSet<(usize, Id)>,
    settled: HashSet<Id>,
}

impl<'a> Frontier<'a> {
    fn new(graph: &'a FlowGraph, region: &'a Region) -> Self {
        let pending: HashMap<Id, usize> = region
            .members
            .iter()
            .map(|id| {
                let count = graph
                    .backward_edges(id)
                    .filter(|(_, source)| region.contains(source))
                    .count();
                (*id, count)
            })
            .collect();
        let activated: HashSet<Id> = region.entries.iter().copied().collect();
        let ready = region
            .entries
            .iter()
            .filter(|id| pending.get(id) == Some(&0))
            .map(|id| (graph.topo_index(id), *id))
            .collect();

        Self {
            graph,
            region,
            pending,
            activated,
            ready,
            settled: HashSet::new(),
        }
    }

    fn next_ready(&mut self) -> Option<Id> {
        self.ready.pop_first().map(|(_, id)| id)
    }

    /// Settle `id`, following the `taken` handle. Returns the nodes that
    /// became unreachable as a result.
    fn complete(&mut self, id: Id, taken: Option<Handle>) -> Vec<Id> {
        self.settled.insert(id);
        let mut skipped = Vec::new();
        let mut queue = vec![(id, taken)];

        while let Some((source, taken)) = queue.pop() {
            for (handle, target) in self.graph.forward_edges(&source) {
                if !self.region.contains(&target) {
                    continue;
                }
                if taken == Some(handle) {
                    self.activated.insert(target);
                }
                let Some(count) = self.pending.get_mut(&target) else {
                    continue;
                };
                *count = count.saturating_sub(1);
                if *count > 0 {
                    continue;
                }
                if self.activated.contains(&target) {
                    self.ready.insert((self.graph.topo_index(&target), target));
                } else if self.settled.insert(target) {
                    skipped.push(target);
                    queue.push((target, None));
                }
            }
        }
        skipped
    }

    /// Members that never reached a terminal state, in topological order.
    fn unsettled(&self) -> Vec<Id> {
        self.graph
            .ordered(self.region)
            .into_iter()
            .filter(|id| !self.settled.contains(id))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use reqflow_types::flow::{FlowEdge, FlowNodeDef, IterationErrorPolicy, NodePayload, RequestRef};
    use serde_json::{Value, json};

    use super::*;
    use crate::flow::node::{NodeFuture, NodeOutcome};
    use crate::flow::nodes::branch::IfNode;
    use crate::flow::nodes::iteration::{ForEachNode, ForNode};
    use crate::flow::nodes::noop::NoopNode;

    struct MockNode {
        id: Id,
        name: String,
        delay: Duration,
        fail: bool,
        runs: Arc<AtomicUsize>,
        set: Option<(String, Value)>,
    }

    impl FlowNode for MockNode {
        fn id(&self) -> Id {
            self.id
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> NodeKind {
            NodeKind::Request
        }

        fn run(&self, ctx: NodeContext) -> NodeFuture<'_> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.runs.fetch_add(1, Ordering::SeqCst);
                if let Some((k, v)) = &self.set {
                    ctx.scope.set(k.clone(), v.clone());
                }
                if self.fail {
                    Err(NodeError::Failed("boom".into()))
                } else {
                    Ok(NodeOutcome::then(Some(json!({ "node": self.name }))))
                }
            })
        }
    }

    type Seen = Arc<Mutex<Vec<Option<Value>>>>;

    /// Records what `key` resolves to on every run.
    struct RecorderNode {
        id: Id,
        name: String,
        key: String,
        delay: Duration,
        seen: Seen,
    }

    impl FlowNode for RecorderNode {
        fn id(&self) -> Id {
            self.id
        }

        fn name(&self) -> &str {
            &self.name
        }

        fn kind(&self) -> NodeKind {
            NodeKind::Request
        }

        fn run(&self, ctx: NodeContext) -> NodeFuture<'_> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.seen.lock().unwrap().push(ctx.scope.get(&self.key));
                Ok(NodeOutcome::then(None))
            })
        }
    }

    struct Harness {
        flow_id: Id,
        start: Id,
        defs: Vec<FlowNodeDef>,
        edges: Vec<FlowEdge>,
        nodes: Vec<Arc<dyn FlowNode>>,
    }

    struct Collected {
        outcome: RunOutcome,
        nodes: Vec<NodeStatusEvent>,
        flows: Vec<FlowStatusEvent>,
    }

    impl Collected {
        fn terminal(&self, id: Id) -> Vec<ExecutionState> {
            self.nodes
                .iter()
                .filter(|e| e.node_id == id && e.iteration.is_none() && e.state.is_terminal())
                .map(|e| e.state)
                .collect()
        }

        fn last(&self, id: Id) -> Option<ExecutionState> {
            self.terminal(id).last().copied()
        }

        fn iterations(&self, id: Id) -> Vec<&NodeStatusEvent> {
            self.nodes
                .iter()
                .filter(|e| e.node_id == id && e.iteration.is_some() && e.state.is_terminal())
                .collect()
        }
    }

    impl Harness {
        fn new() -> Self {
            let flow_id = Id::new();
            let def = FlowNodeDef::new(flow_id, "start", NodePayload::Noop { start: true });
            let start = def.id;
            Self {
                flow_id,
                start,
                nodes: vec![Arc::new(NoopNode::new(def.id, "start")) as Arc<dyn FlowNode>],
                defs: vec![def],
                edges: Vec::new(),
            }
        }

        fn request_payload() -> NodePayload {
            NodePayload::Request(RequestRef {
                endpoint_id: Id::new(),
                example_id: Id::new(),
                delta_endpoint_id: None,
                delta_example_id: None,
            })
        }

        fn mock(&mut self, name: &str, delay_ms: u64, fail: bool) -> (Id, Arc<AtomicUsize>) {
            self.mock_with(name, delay_ms, fail, None)
        }

        fn mock_with(
            &mut self,
            name: &str,
            delay_ms: u64,
            fail: bool,
            set: Option<(String, Value)>,
        ) -> (Id, Arc<AtomicUsize>) {
            let def = FlowNodeDef::new(self.flow_id, name, Self::request_payload());
            let runs = Arc::new(AtomicUsize::new(0));
            self.nodes.push(Arc::new(MockNode {
                id: def.id,
                name: name.to_string(),
                delay: Duration::from_millis(delay_ms),
                fail,
                runs: Arc::clone(&runs),
                set,
            }));
            let id = def.id;
            self.defs.push(def);
            (id, runs)
        }

        fn recorder(&mut self, name: &str, key: &str, delay_ms: u64) -> (Id, Seen) {
            let def = FlowNodeDef::new(self.flow_id, name, Self::request_payload());
            let seen: Seen = Arc::default();
            self.nodes.push(Arc::new(RecorderNode {
                id: def.id,
                name: name.to_string(),
                key: key.to_string(),
                delay: Duration::from_millis(delay_ms),
                seen: Arc::clone(&seen),
            }));
            let id = def.id;
            self.defs.push(def);
            (id, seen)
        }

        fn for_each(&mut self, name: &str, expression: &str) -> Id {
            let policy = IterationErrorPolicy::Stop;
            let def = self.def(
                name,
                NodePayload::ForEach { expression: expression.into(), error_policy: policy },
            );
            self.add(def.clone(), Arc::new(ForEachNode::new(def.id, name, expression, policy)))
        }

        fn add(&mut self, def: FlowNodeDef, node: Arc<dyn FlowNode>) -> Id {
            let id = def.id;
            self.defs.push(def);
            self.nodes.push(node);
            id
        }

        fn def(&self, name: &str, payload: NodePayload) -> FlowNodeDef {
            FlowNodeDef::new(self.flow_id, name, payload)
        }

        fn edge(&mut self, from: Id, to: Id, handle: Handle) {
            self.edges.push(FlowEdge::new(self.flow_id, from, to, handle));
        }

        fn chain(&mut self, ids: &[Id]) {
            for pair in ids.windows(2) {
                self.edge(pair[0], pair[1], Handle::Then);
            }
        }

        fn runner(&self, mode: ExecutionMode, timeout_ms: u64) -> FlowRunner {
            let graph = FlowGraph::build(&self.defs, &self.edges).unwrap();
            let config = RunnerConfig {
                mode,
                timeout: Duration::from_millis(timeout_ms),
                small_flow_threshold: 8,
                max_workers: 4,
            };
            FlowRunner::new(self.flow_id, graph, self.nodes.clone(), config).unwrap()
        }

        async fn run(&self, mode: ExecutionMode, timeout_ms: u64, vars: VarMap) -> Collected {
            let runner = self.runner(mode, timeout_ms);
            run_collect(&runner, &CancellationToken::new(), vars).await
        }
    }

    async fn run_collect(runner: &FlowRunner, token: &CancellationToken, vars: VarMap) -> Collected {
        let (node_tx, mut node_rx) = mpsc::channel(1024);
        let (flow_tx, mut flow_rx) = mpsc::channel(16);
        let outcome = runner.run(token, &vars, node_tx, flow_tx).await;
        let mut nodes = Vec::new();
        while let Some(e) = node_rx.recv().await {
            nodes.push(e);
        }
        let mut flows = Vec::new();
        while let Some(e) = flow_rx.recv().await {
            flows.push(e);
        }
        Collected { outcome, nodes, flows }
    }

    #[tokio::test]
    async fn test_start_only_flow_succeeds() {
        let h = Harness::new();
        let c = h.run(ExecutionMode::Auto, 1000, VarMap::new()).await;
        assert_eq!(c.outcome.state, FlowState::Success);
        assert_eq!(c.terminal(h.start), vec![ExecutionState::Success]);
        assert_eq!(
            c.flows.iter().map(|f| f.state).collect::<Vec<_>>(),
            vec![FlowState::Running, FlowState::Success]
        );
    }

    #[tokio::test]
    async fn test_timeout_cancels_in_flight_nodes() {
        let mut h = Harness::new();
        let (r1, _) = h.mock("req1", 200, false);
        let (r2, _) = h.mock("req2", 200, false);
        let (r3, _) = h.mock("req3", 200, false);
        h.chain(&[h.start, r1, r2, r3]);

        let c = h.run(ExecutionMode::Auto, 100, VarMap::new()).await;
        assert_eq!(c.outcome.state, FlowState::Timeout);
        let states: Vec<_> = [r1, r2, r3].iter().map(|id| c.last(*id)).collect();
        assert!(states.contains(&Some(ExecutionState::Canceled)));
        assert!(!states.iter().all(|s| *s == Some(ExecutionState::Success)));
        assert_eq!(c.flows.last().map(|f| f.state), Some(FlowState::Timeout));
        for id in [r1, r2, r3] {
            assert_eq!(c.terminal(id).len(), 1, "one terminal per node");
        }
    }

    #[tokio::test]
    async fn test_single_and_multi_agree() {
        let mut h = Harness::new();
        let mut ids = vec![h.start];
        for i in 0..10 {
            ids.push(h.mock(&format!("n{i}"), 1, false).0);
        }
        h.chain(&ids);

        for mode in [ExecutionMode::Single, ExecutionMode::Multi] {
            let c = h.run(mode, 5000, VarMap::new()).await;
            assert_eq!(c.outcome.state, FlowState::Success);
            for id in &ids {
                assert_eq!(c.last(*id), Some(ExecutionState::Success));
            }
        }
    }

    #[tokio::test]
    async fn test_auto_mode_selection() {
        let mut small = Harness::new();
        for i in 0..3 {
            small.mock(&format!("n{i}"), 0, false);
        }
        assert_eq!(small.runner(ExecutionMode::Auto, 1000).selected_mode(), ExecutionMode::Single);

        let mut large = Harness::new();
        for i in 0..20 {
            large.mock(&format!("n{i}"), 0, false);
        }
        assert_eq!(large.runner(ExecutionMode::Auto, 1000).selected_mode(), ExecutionMode::Multi);
        assert_eq!(large.runner(ExecutionMode::Single, 1000).selected_mode(), ExecutionMode::Single);
    }

    #[tokio::test]
    async fn test_running_precedes_terminal_per_node() {
        let mut h = Harness::new();
        let (a, _) = h.mock("a", 1, false);
        let (b, _) = h.mock("b", 1, false);
        h.edge(h.start, a, Handle::Then);
        h.edge(h.start, b, Handle::Then);

        let c = h.run(ExecutionMode::Multi, 1000, VarMap::new()).await;
        for id in [h.start, a, b] {
            let states: Vec<_> = c.nodes.iter().filter(|e| e.node_id == id).map(|e| e.state).collect();
            assert_eq!(states, vec![ExecutionState::Running, ExecutionState::Success]);
        }
    }

    #[tokio::test]
    async fn test_failure_fails_flow_and_cancels_rest() {
        for mode in [ExecutionMode::Single, ExecutionMode::Multi] {
            let mut h = Harness::new();
            let (bad, _) = h.mock("bad", 1, true);
            let (after, after_runs) = h.mock("after", 0, false);
            let (slow, _) = h.mock("slow", 300, false);
            h.chain(&[h.start, bad, after]);
            h.edge(h.start, slow, Handle::Then);

            let c = h.run(mode, 5000, VarMap::new()).await;
            assert_eq!(c.outcome.state, FlowState::Failure);
            assert!(c.outcome.error.as_deref().unwrap().contains("bad: boom"));
            assert_eq!(c.last(bad), Some(ExecutionState::Failure));
            assert_eq!(c.last(after), Some(ExecutionState::Canceled));
            assert_eq!(after_runs.load(Ordering::SeqCst), 0);
            if mode == ExecutionMode::Multi {
                assert_eq!(c.last(slow), Some(ExecutionState::Canceled));
            }
        }
    }

    #[tokio::test]
    async fn test_if_skips_other_branch() {
        let mut h = Harness::new();
        let def = h.def("check", NodePayload::If { condition: "flag == 'yes'".into() });
        let check = h.add(def.clone(), Arc::new(IfNode::new(def.id, "check", "flag == 'yes'")));
        let (yes, _) = h.mock("yes", 0, false);
        let (no, no_runs) = h.mock("no", 0, false);
        let (no_next, _) = h.mock("no_next", 0, false);
        let (join, join_runs) = h.mock("join", 0, false);
        h.edge(h.start, check, Handle::Then);
        h.edge(check, yes, Handle::Then);
        h.edge(check, no, Handle::Else);
        h.edge(no, no_next, Handle::Then);
        h.edge(yes, join, Handle::Then);
        h.edge(no_next, join, Handle::Then);

        let mut vars = VarMap::new();
        vars.insert("flag", "yes");
        let c = h.run(ExecutionMode::Single, 1000, vars).await;
        assert_eq!(c.outcome.state, FlowState::Success);
        assert_eq!(c.last(yes), Some(ExecutionState::Success));
        assert_eq!(c.last(no), Some(ExecutionState::Canceled));
        assert_eq!(c.last(no_next), Some(ExecutionState::Canceled));
        assert_eq!(c.last(join), Some(ExecutionState::Success));
        assert_eq!(no_runs.load(Ordering::SeqCst), 0);
        assert_eq!(join_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_for_zero_iterations() {
        let mut h = Harness::new();
        let def = h.def(
            "loop",
            NodePayload::For { iterations: 0, error_policy: IterationErrorPolicy::Continue },
        );
        let lp = h.add(def.clone(), Arc::new(ForNode::new(def.id, "loop", 0, IterationErrorPolicy::Continue)));
        let (body, body_runs) = h.mock("body", 0, false);
        h.edge(h.start, lp, Handle::Then);
        h.edge(lp, body, Handle::Loop);

        let c = h.run(ExecutionMode::Auto, 1000, VarMap::new()).await;
        assert_eq!(c.outcome.state, FlowState::Success);
        assert_eq!(c.last(lp), Some(ExecutionState::Success));
        assert!(c.iterations(lp).is_empty());
        assert_eq!(body_runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_for_runs_body_per_iteration() {
        for mode in [ExecutionMode::Single, ExecutionMode::Multi] {
            let mut h = Harness::new();
            let def = h.def(
                "loop",
                NodePayload::For { iterations: 3, error_policy: IterationErrorPolicy::Continue },
            );
            let lp = h.add(def.clone(), Arc::new(ForNode::new(def.id, "loop", 3, IterationErrorPolicy::Continue)));
            let (body, body_runs) = h.mock("body", 0, false);
            let (after, _) = h.mock("after", 0, false);
            h.edge(h.start, lp, Handle::Then);
            h.edge(lp, body, Handle::Loop);
            h.edge(lp, after, Handle::Then);

            let c = h.run(mode, 1000, VarMap::new()).await;
            assert_eq!(c.outcome.state, FlowState::Success);
            assert_eq!(body_runs.load(Ordering::SeqCst), 3);
            let iterations = c.iterations(lp);
            assert_eq!(iterations.len(), 3);
            for (i, ev) in iterations.iter().enumerate() {
                assert_eq!(ev.iteration, Some(i));
                assert_eq!(ev.output, Some(json!({ "index": i })));
                assert_eq!(ev.state, ExecutionState::Success);
            }
            assert_eq!(c.last(after), Some(ExecutionState::Success));
        }
    }

    #[tokio::test]
    async fn test_iteration_policies() {
        let cases = [
            (IterationErrorPolicy::Continue, FlowState::Success, 3),
            (IterationErrorPolicy::Break, FlowState::Success, 1),
            (IterationErrorPolicy::Stop, FlowState::Failure, 1),
        ];
        for (policy, expected, runs) in cases {
            let mut h = Harness::new();
            let def = h.def("loop", NodePayload::For { iterations: 3, error_policy: policy });
            let lp = h.add(def.clone(), Arc::new(ForNode::new(def.id, "loop", 3, policy)));
            let (body, body_runs) = h.mock("body", 0, true);
            h.edge(h.start, lp, Handle::Then);
            h.edge(lp, body, Handle::Loop);

            let c = h.run(ExecutionMode::Single, 1000, VarMap::new()).await;
            assert_eq!(c.outcome.state, expected, "{policy:?}");
            assert_eq!(body_runs.load(Ordering::SeqCst), runs, "{policy:?}");
            assert!(c.iterations(lp).iter().all(|e| e.state == ExecutionState::Failure));
        }
    }

    #[tokio::test]
    async fn test_for_each_binds_item() {
        let mut h = Harness::new();
        let (seed, _) = h.mock_with("seed", 0, false, Some(("items".into(), json!(["a", "b"]))));
        let def = h.def(
            "each",
            NodePayload::ForEach { expression: "items".into(), error_policy: IterationErrorPolicy::Continue },
        );
        let each = h.add(
            def.clone(),
            Arc::new(ForEachNode::new(def.id, "each", "items", IterationErrorPolicy::Continue)),
        );
        let cond = h.def("is_b", NodePayload::If { condition: "item == 'b'".into() });
        let is_b = h.add(cond.clone(), Arc::new(IfNode::new(cond.id, "is_b", "item == 'b'")));
        h.chain(&[h.start, seed, each]);
        h.edge(each, is_b, Handle::Loop);

        let c = h.run(ExecutionMode::Single, 1000, VarMap::new()).await;
        assert_eq!(c.outcome.state, FlowState::Success);
        let outputs: Vec<_> = c.iterations(each).iter().map(|e| e.output.clone()).collect();
        assert_eq!(
            outputs,
            vec![Some(json!({"index": 0, "item": "a"})), Some(json!({"index": 1, "item": "b"}))]
        );
        let results: Vec<_> = c
            .nodes
            .iter()
            .filter(|e| e.node_id == is_b && e.state == ExecutionState::Success)
            .map(|e| e.output.as_ref().unwrap()["result"].clone())
            .collect();
        assert_eq!(results, vec![json!(false), json!(true)]);
    }

    fn seen(values: &Seen) -> Vec<Option<Value>> {
        values.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_nested_loops_keep_outer_bindings() {
        for mode in [ExecutionMode::Single, ExecutionMode::Multi] {
            let mut h = Harness::new();
            let (seed, _) = h.mock_with("seed", 0, false, Some(("items".into(), json!(["a", "b"]))));
            let outer = h.for_each("outer", "items");
            let def = h.def(
                "inner",
                NodePayload::For { iterations: 2, error_policy: IterationErrorPolicy::Stop },
            );
            let inner = h.add(def.clone(), Arc::new(ForNode::new(def.id, "inner", 2, IterationErrorPolicy::Stop)));
            let (deep_item, deep_items) = h.recorder("deep_item", "item", 0);
            let (deep_index, deep_indexes) = h.recorder("deep_index", "index", 0);
            let (after_inner, after_items) = h.recorder("after_inner", "item", 0);
            let (tail, tail_items) = h.recorder("tail", "item", 0);
            h.chain(&[h.start, seed, outer, tail]);
            h.edge(outer, inner, Handle::Loop);
            h.edge(inner, deep_item, Handle::Loop);
            h.edge(inner, deep_index, Handle::Loop);
            h.edge(inner, after_inner, Handle::Then);

            let c = h.run(mode, 2000, VarMap::new()).await;
            assert_eq!(c.outcome.state, FlowState::Success, "{mode:?}");
            let (a, b) = (Some(json!("a")), Some(json!("b")));
            assert_eq!(seen(&deep_items), vec![a.clone(), a.clone(), b.clone(), b.clone()]);
            assert_eq!(
                seen(&deep_indexes),
                vec![Some(json!(0)), Some(json!(1)), Some(json!(0)), Some(json!(1))]
            );
            assert_eq!(seen(&after_items), vec![a, b]);
            assert_eq!(seen(&tail_items), vec![None]);
            assert_eq!(c.last(after_inner), Some(ExecutionState::Success));
        }
    }

    #[tokio::test]
    async fn test_parallel_loops_do_not_share_bindings() {
        let mut h = Harness::new();
        let (seed_x, _) = h.mock_with("seed_x", 0, false, Some(("xs".into(), json!(["x1", "x2", "x3"]))));
        let (seed_y, _) = h.mock_with("seed_y", 0, false, Some(("ys".into(), json!(["y1", "y2", "y3"]))));
        let left = h.for_each("left", "xs");
        let right = h.for_each("right", "ys");
        let (left_body, left_seen) = h.recorder("left_body", "item", 15);
        let (right_body, right_seen) = h.recorder("right_body", "item", 10);
        h.chain(&[h.start, seed_x, seed_y]);
        h.edge(seed_y, left, Handle::Then);
        h.edge(seed_y, right, Handle::Then);
        h.edge(left, left_body, Handle::Loop);
        h.edge(right, right_body, Handle::Loop);

        let c = h.run(ExecutionMode::Multi, 2000, VarMap::new()).await;
        assert_eq!(c.outcome.state, FlowState::Success);
        assert_eq!(
            seen(&left_seen),
            vec![Some(json!("x1")), Some(json!("x2")), Some(json!("x3"))]
        );
        assert_eq!(
            seen(&right_seen),
            vec![Some(json!("y1")), Some(json!("y2")), Some(json!("y3"))]
        );
    }

    #[tokio::test]
    async fn test_parent_cancel_yields_canceled_flow() {
        let mut h = Harness::new();
        let (slow, _) = h.mock("slow", 500, false);
        h.chain(&[h.start, slow]);
        let runner = h.runner(ExecutionMode::Multi, 5000);

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let c = run_collect(&runner, &token, VarMap::new()).await;
        assert_eq!(c.outcome.state, FlowState::Canceled);
        assert_eq!(c.last(slow), Some(ExecutionState::Canceled));
    }

    #[test]
    fn test_runner_requires_every_node() {
        let h = Harness::new();
        let graph = FlowGraph::build(&h.defs, &h.edges).unwrap();
        let err = FlowRunner::new(h.flow_id, graph, Vec::new(), RunnerConfig::default()).err();
        assert_eq!(err, Some(RunnerError::MissingNode(h.start)));
    }
}
