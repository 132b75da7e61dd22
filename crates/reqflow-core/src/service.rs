//! Errors and helpers shared by the flow and example services.

use reqflow_types::error::{ErrorKind, RepositoryError};
use reqflow_types::id::Id;

use crate::delta::DeltaError;
use crate::exchange::ExchangeError;
use crate::flow::graph::GraphError;
use crate::flow::runner::RunnerError;
use crate::http::HttpError;
use crate::journal::JournalError;
use crate::overlay::OverlayError;
use crate::repository::workspace::WorkspaceRepository;
use crate::vars::VarMap;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Id },

    #[error("environment {environment} does not belong to workspace {workspace}")]
    ForeignEnvironment { environment: Id, workspace: Id },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Delta(#[from] DeltaError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Overlay(#[from] OverlayError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::NotFound { .. } => ErrorKind::NotFound,
            ServiceError::ForeignEnvironment { .. } => ErrorKind::InvalidArgument,
            ServiceError::Graph(e) => e.kind(),
            ServiceError::Runner(e) => e.kind(),
            ServiceError::Delta(e) => e.kind(),
            ServiceError::Exchange(e) => e.kind(),
            ServiceError::Http(e) => e.kind(),
            ServiceError::Journal(e) => e.kind(),
            ServiceError::Overlay(e) => e.kind(),
            ServiceError::Repository(e) => e.kind(),
        }
    }
}

/// Variables of the workspace's global environment, then of `environment_id`.
pub async fn environment_vars<W: WorkspaceRepository>(
    workspaces: &W,
    workspace_id: &Id,
    environment_id: Option<&Id>,
) -> Result<VarMap, ServiceError> {
    let workspace = workspaces
        .get_workspace(workspace_id)
        .await?
        .ok_or(ServiceError::NotFound {
            entity: "workspace",
            id: *workspace_id,
        })?;

    let mut vars = VarMap::new();
    if let Some(global) = workspace.global_env_id {
        vars = vars.with_environment(&workspaces.list_variables(&global).await?);
    }

    if let Some(env_id) = environment_id {
        let env = workspaces
            .get_environment(env_id)
            .await?
            .ok_or(ServiceError::NotFound {
                entity: "environment",
                id: *env_id,
            })?;
        if env.workspace_id != workspace.id {
            return Err(ServiceError::ForeignEnvironment {
                environment: *env_id,
                workspace: workspace.id,
            });
        }
        if Some(env.id) != workspace.global_env_id {
            vars = vars.with_environment(&workspaces.list_variables(env_id).await?);
        }
    }

    Ok(vars)
}
