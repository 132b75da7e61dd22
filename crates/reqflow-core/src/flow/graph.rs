//! Flow graph validation and region computation.
//!
//! Uses `petgraph` to reject cycles over every edge. Nodes reachable from the
//! start node along `Then`/`Else` edges form the main region; the targets of
//! an iteration node's `Loop` edges, closed over `Then`/`Else`, form that
//! node's body region. Body regions are re-entered once per iteration, so the
//! graph as a whole stays acyclic.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use reqflow_types::error::ErrorKind;
use reqflow_types::flow::{FlowEdge, FlowNodeDef, Handle, NodeKind};
use reqflow_types::id::Id;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("flow has no start node")]
    NoStart,

    #[error("flow has {0} start nodes, expected exactly one")]
    MultipleStarts(usize),

    #[error("edge {edge} references unknown node {node}")]
    UnknownNode { edge: Id, node: Id },

    #[error("duplicate node id {0}")]
    DuplicateNode(Id),

    #[error("cycle detected involving node '{0}'")]
    Cycle(String),

    #[error("node '{0}' is both in the main path and inside a loop body")]
    SharedBody(String),

    #[error("loop edge from '{0}', which is not an iteration node")]
    LoopFromNonIteration(String),
}

impl GraphError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

// ---------------------------------------------------------------------------
// Region
// ---------------------------------------------------------------------------

/// A set of nodes scheduled together: the main path or one loop body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Nodes that start activated.
    pub entries: Vec<Id>,
    pub members: HashSet<Id>,
}

impl Region {
    pub fn contains(&self, id: &Id) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

// ---------------------------------------------------------------------------
// FlowGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct NodeMeta {
    name: String,
    kind: NodeKind,
    topo_index: usize,
}

/// Validated flow topology.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    start: Id,
    nodes: HashMap<Id, NodeMeta>,
    outgoing: HashMap<Id, Vec<(Handle, Id)>>,
    incoming: HashMap<Id, Vec<(Handle, Id)>>,
    main: Arc<Region>,
    bodies: HashMap<Id, Arc<Region>>,
}

impl FlowGraph {
    /// Validate nodes and edges and compute regions.
    pub fn build(nodes: &[FlowNodeDef], edges: &[FlowEdge]) -> Result<Self, GraphError> {
        let starts: Vec<&FlowNodeDef> = nodes.iter().filter(|n| n.payload.is_start()).collect();
        let start = match starts.as_slice() {
            [] => return Err(GraphError::NoStart),
            [only] => only.id,
            many => return Err(GraphError::MultipleStarts(many.len())),
        };

        let mut graph = DiGraph::<Id, ()>::new();
        let mut index = HashMap::new();
        for node in nodes {
            if index.insert(node.id, graph.add_node(node.id)).is_some() {
                return Err(GraphError::DuplicateNode(node.id));
            }
        }

        let mut outgoing: HashMap<Id, Vec<(Handle, Id)>> = HashMap::new();
        let mut incoming: HashMap<Id, Vec<(Handle, Id)>> = HashMap::new();
        for edge in edges {
            let from = *index.get(&edge.source).ok_or(GraphError::UnknownNode {
                edge: edge.id,
                node: edge.source,
            })?;
            let to = *index.get(&edge.target).ok_or(GraphError::UnknownNode {
                edge: edge.id,
                node: edge.target,
            })?;
            graph.add_edge(from, to, ());
            outgoing.entry(edge.source).or_default().push((edge.handle, edge.target));
            incoming.entry(edge.target).or_default().push((edge.handle, edge.source));
        }

        let names: HashMap<Id, &str> = nodes.iter().map(|n| (n.id, n.name.as_str())).collect();
        let sorted = toposort(&graph, None).map_err(|cycle| {
            let id = graph[cycle.node_id()];
            GraphError::Cycle(names.get(&id).copied().unwrap_or_default().to_string())
        })?;

        let topo: HashMap<Id, usize> = sorted
            .iter()
            .enumerate()
            .map(|(i, idx)| (graph[*idx], i))
            .collect();
        let metas: HashMap<Id, NodeMeta> = nodes
            .iter()
            .map(|n| {
                let meta = NodeMeta {
                    name: n.name.clone(),
                    kind: n.kind(),
                    topo_index: topo.get(&n.id).copied().unwrap_or(usize::MAX),
                };
                (n.id, meta)
            })
            .collect();

        let main_members = closure(&outgoing, &[start]);
        let main = Region {
            entries: vec![start],
            members: main_members,
        };

        let mut bodies = HashMap::new();
        for (source, targets) in &outgoing {
            let loop_targets: Vec<Id> = targets
                .iter()
                .filter(|(h, _)| *h == Handle::Loop)
                .map(|(_, t)| *t)
                .collect();
            if loop_targets.is_empty() {
                continue;
            }
            let meta = &metas[source];
            if !matches!(meta.kind, NodeKind::For | NodeKind::ForEach) {
                return Err(GraphError::LoopFromNonIteration(meta.name.clone()));
            }
            let members = closure(&outgoing, &loop_targets);
            if let Some(shared) = members.iter().find(|id| main.members.contains(id)) {
                return Err(GraphError::SharedBody(metas[shared].name.clone()));
            }
            bodies.insert(
                *source,
                Arc::new(Region {
                    entries: loop_targets,
                    members,
                }),
            );
        }

        Ok(Self {
            start,
            nodes: metas,
            outgoing,
            incoming,
            main: Arc::new(main),
            bodies,
        })
    }

    pub fn start(&self) -> Id {
        self.start
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.nodes.keys().copied()
    }

    pub fn name(&self, id: &Id) -> &str {
        self.nodes.get(id).map(|m| m.name.as_str()).unwrap_or_default()
    }

    pub fn kind(&self, id: &Id) -> Option<NodeKind> {
        self.nodes.get(id).map(|m| m.kind)
    }

    /// Position in a topological order of the whole graph.
    pub fn topo_index(&self, id: &Id) -> usize {
        self.nodes.get(id).map(|m| m.topo_index).unwrap_or(usize::MAX)
    }

    /// Nodes other than no-ops, used for automatic mode selection.
    pub fn work_node_count(&self) -> usize {
        self.nodes.values().filter(|m| m.kind != NodeKind::Noop).count()
    }

    /// Outgoing `(handle, target)` pairs, excluding `Loop` edges.
    pub fn forward_edges(&self, id: &Id) -> impl Iterator<Item = (Handle, Id)> + '_ {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .filter(|(h, _)| *h != Handle::Loop)
            .copied()
    }

    /// Incoming `(handle, source)` pairs, excluding `Loop` edges.
    pub fn backward_edges(&self, id: &Id) -> impl Iterator<Item = (Handle, Id)> + '_ {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .filter(|(h, _)| *h != Handle::Loop)
            .copied()
    }

    pub fn main_region(&self) -> Arc<Region> {
        Arc::clone(&self.main)
    }

    /// The body of an iteration node, if it has any `Loop` edges.
    pub fn body_region(&self, id: &Id) -> Option<Arc<Region>> {
        self.bodies.get(id).cloned()
    }

    /// Region members sorted topologically.
    pub fn ordered(&self, region: &Region) -> Vec<Id> {
        let mut ids: Vec<Id> = region.members.iter().copied().collect();
        ids.sort_by_key(|id| (self.topo_index(id), *id));
        ids
    }
}

/// Nodes reachable from `entries` along `Then`/`Else` edges.
fn closure(outgoing: &HashMap<Id, Vec<(Handle, Id)>>, entries: &[Id]) -> HashSet<Id> {
    let mut seen: HashSet<Id> = entries.iter().copied().collect();
    let mut stack: Vec<Id> = entries.to_vec();
    while let Some(current) = stack.pop() {
        for (handle, target) in outgoing.get(&current).into_iter().flatten() {
            if *handle != Handle::Loop && seen.insert(*target) {
                stack.push(*target);
            }
        }
    }
    seen
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
