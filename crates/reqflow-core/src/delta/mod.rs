//! Delta resolution: merging a base example with its delta variant.
//!
//! - `resolver` -- pure merge of scalars, key/value families, raw body and
//!   assertions into a runtime-ready [`resolver::ResolvedRequest`]
//! - `loader` -- reads base and delta content from a [`RequestRepository`]
//!   and runs the resolver
//! - `assertion` -- the assertion-delta service, which writes origin edits
//!   through to every delta copy
//!
//! [`RequestRepository`]: crate::repository::request::RequestRepository

pub mod assertion;
pub mod loader;
pub mod resolver;

use reqflow_types::error::{ErrorKind, RepositoryError};
use reqflow_types::id::Id;

use crate::ordering::ListError;

/// Errors from delta resolution and the assertion-delta service.
#[derive(Debug, thiserror::Error)]
pub enum DeltaError {
    #[error("assertion {assertion_id} does not belong to example {example_id}")]
    OriginMismatch { assertion_id: Id, example_id: Id },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Id },

    #[error("example {delta} does not belong to endpoint {endpoint}")]
    ForeignExample { delta: Id, endpoint: Id },

    #[error(transparent)]
    List(#[from] ListError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl DeltaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeltaError::OriginMismatch { .. } => ErrorKind::FailedPrecondition,
            DeltaError::NotFound { .. } => ErrorKind::NotFound,
            DeltaError::ForeignExample { .. } => ErrorKind::InvalidArgument,
            DeltaError::List(e) => e.kind(),
            DeltaError::Repository(e) => e.kind(),
        }
    }
}
