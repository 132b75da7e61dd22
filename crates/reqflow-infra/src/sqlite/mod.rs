//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools. Ordered-list writes share the helpers in
//! [`links`].

mod links;

pub mod flow;
pub mod list;
pub mod node_execution;
pub mod overlay;
pub mod pool;
pub mod request;
pub mod workspace;

use chrono::{DateTime, Utc};
use reqflow_types::error::RepositoryError;
use reqflow_types::id::Id;

fn parse_id(s: &str) -> Result<Id, RepositoryError> {
    s.parse::<Id>()
        .map_err(|e| RepositoryError::Query(format!("invalid id: {e}")))
}

fn parse_opt_id(s: Option<String>) -> Result<Option<Id>, RepositoryError> {
    s.as_deref().map(parse_id).transpose()
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}
