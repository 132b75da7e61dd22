//! Node execution repository trait definition.

use reqflow_types::error::RepositoryError;
use reqflow_types::execution::{NodeExecution, NodeExecutionUpdate, NodeResponse};
use reqflow_types::id::Id;

/// Storage for the node execution journal.
///
/// Rows are keyed by their creation-ordered id, so "latest" means "largest
/// id". Only rows in `Running` state may be changed; updating a terminal row
/// fails with `FailedPrecondition`.
pub trait NodeExecutionRepository: Send + Sync {
    fn create(
        &self,
        execution: &NodeExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Promote a running row. Input data is never rewritten.
    fn update(
        &self,
        id: &Id,
        update: &NodeExecutionUpdate,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Store `response` and promote the running row that references it, in
    /// one transaction.
    fn update_with_response(
        &self,
        id: &Id,
        update: &NodeExecutionUpdate,
        response: &NodeResponse,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_response(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<NodeResponse>, RepositoryError>> + Send;

    /// Insert, or overwrite an existing row that is still running.
    fn upsert(
        &self,
        execution: &NodeExecution,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<NodeExecution>, RepositoryError>> + Send;

    /// Rows for a node, newest first.
    fn list_by_node(
        &self,
        node_id: &Id,
        limit: Option<u32>,
    ) -> impl std::future::Future<Output = Result<Vec<NodeExecution>, RepositoryError>> + Send;

    fn latest_for_node(
        &self,
        node_id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<NodeExecution>, RepositoryError>> + Send;

    /// Delete every row of the given nodes. Returns the number deleted.
    fn bulk_delete_by_nodes(
        &self,
        node_ids: &[Id],
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
