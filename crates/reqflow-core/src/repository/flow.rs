//! Flow repository trait definition.
//!
//! Defines the storage interface for flows, their nodes and edges, and the
//! ordered flow variable list.

use reqflow_types::error::RepositoryError;
use reqflow_types::flow::{Flow, FlowEdge, FlowNodeDef, FlowVariable};
use reqflow_types::id::Id;

/// A flow with everything needed to run it.
#[derive(Debug, Clone)]
pub struct FlowSnapshot {
    pub flow: Flow,
    pub nodes: Vec<FlowNodeDef>,
    pub edges: Vec<FlowEdge>,
    /// Head to tail.
    pub variables: Vec<FlowVariable>,
}

pub trait FlowRepository: Send + Sync {
    fn create_flow(
        &self,
        flow: &Flow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_flow(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<Flow>, RepositoryError>> + Send;

    fn list_flows(
        &self,
        workspace_id: &Id,
    ) -> impl std::future::Future<Output = Result<Vec<Flow>, RepositoryError>> + Send;

    /// Delete a flow with its nodes, edges and variables. Returns `true` if it existed.
    fn delete_flow(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    fn create_node(
        &self,
        node: &FlowNodeDef,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_nodes(
        &self,
        flow_id: &Id,
    ) -> impl std::future::Future<Output = Result<Vec<FlowNodeDef>, RepositoryError>> + Send;

    fn create_edge(
        &self,
        edge: &FlowEdge,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_edges(
        &self,
        flow_id: &Id,
    ) -> impl std::future::Future<Output = Result<Vec<FlowEdge>, RepositoryError>> + Send;

    fn create_variable(
        &self,
        variable: &FlowVariable,
        position: Option<usize>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Flow variables head to tail.
    fn list_variables(
        &self,
        flow_id: &Id,
    ) -> impl std::future::Future<Output = Result<Vec<FlowVariable>, RepositoryError>> + Send;

    /// Load flow, nodes, edges and variables in one call.
    fn load_snapshot(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<FlowSnapshot>, RepositoryError>> + Send;
}
