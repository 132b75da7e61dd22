//! Workspace repository trait definition.

use reqflow_types::error::RepositoryError;
use reqflow_types::id::Id;
use reqflow_types::workspace::{Collection, Environment, Variable, Workspace};

/// Repository trait for workspaces, their collections and environments.
///
/// Collections and environment variables are ordered lists; `create_*`
/// appends (or inserts at `position`) and `delete_*` unlinks, each inside one
/// transaction.
pub trait WorkspaceRepository: Send + Sync {
    fn create_workspace(
        &self,
        workspace: &Workspace,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_workspace(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<Workspace>, RepositoryError>> + Send;

    fn list_workspaces(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Workspace>, RepositoryError>> + Send;

    /// Point the workspace at its global environment.
    fn set_global_environment(
        &self,
        workspace_id: &Id,
        env_id: &Id,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Collections
    // -----------------------------------------------------------------------

    fn create_collection(
        &self,
        collection: &Collection,
        position: Option<usize>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_collection(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<Collection>, RepositoryError>> + Send;

    /// Collections of a workspace, head to tail.
    fn list_collections(
        &self,
        workspace_id: &Id,
    ) -> impl std::future::Future<Output = Result<Vec<Collection>, RepositoryError>> + Send;

    /// Delete a collection. Returns `true` if it existed.
    fn delete_collection(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Environments
    // -----------------------------------------------------------------------

    fn create_environment(
        &self,
        env: &Environment,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_environment(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<Environment>, RepositoryError>> + Send;

    fn list_environments(
        &self,
        workspace_id: &Id,
    ) -> impl std::future::Future<Output = Result<Vec<Environment>, RepositoryError>> + Send;

    fn create_variable(
        &self,
        variable: &Variable,
        position: Option<usize>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Variables of an environment, head to tail.
    fn list_variables(
        &self,
        env_id: &Id,
    ) -> impl std::future::Future<Output = Result<Vec<Variable>, RepositoryError>> + Send;

    fn delete_variable(
        &self,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
