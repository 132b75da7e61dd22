use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fmt;

/// Stable error taxonomy shared by every boundary of the system.
///
/// Module-level error enums map onto one of these kinds via their `kind()`
/// method. Only `Internal` is redacted when crossing a user-facing boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    PermissionDenied,
    FailedPrecondition,
    Canceled,
    DeadlineExceeded,
    Internal,
}

impl ErrorKind {
    /// Whether error detail must be kept out of user-visible messages.
    pub fn is_redacted(&self) -> bool {
        matches!(self, ErrorKind::Internal)
    }

    /// Message to show instead of the underlying detail.
    pub fn public_message(&self, detail: &str) -> String {
        if self.is_redacted() {
            "internal error".to_string()
        } else {
            detail.to_string()
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::FailedPrecondition => "failed_precondition",
            ErrorKind::Canceled => "canceled",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Errors from repository operations (used by trait definitions in reqflow-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
}

impl RepositoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::Connection | RepositoryError::Query(_) => ErrorKind::Internal,
            RepositoryError::NotFound => ErrorKind::NotFound,
            RepositoryError::Conflict(_) | RepositoryError::FailedPrecondition(_) => {
                ErrorKind::FailedPrecondition
            }
            RepositoryError::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_internal_is_redacted() {
        assert_eq!(
            ErrorKind::Internal.public_message("disk I/O error at /var/db"),
            "internal error"
        );
        assert_eq!(
            ErrorKind::NotFound.public_message("flow not found"),
            "flow not found"
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::DeadlineExceeded.to_string(), "deadline_exceeded");
        assert_eq!(
            RepositoryError::Conflict("x".into()).kind(),
            ErrorKind::FailedPrecondition
        );
    }
}
