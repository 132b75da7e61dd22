//! Connection pools for the reqflow store.
//!
//! Every write goes through one writer connection: journal promotions,
//! overlay reorders and list moves run as transactions on it, one at a time.
//! Queries run on a read-only pool so history and listing calls keep going
//! while a flow is writing journal rows.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::resolve_data_dir;

/// Read-only connections opened alongside the writer.
const READER_CONNECTIONS: u32 = 8;

/// Writer and reader pools over one SQLite file.
///
/// - `writer`: the only connection that may write; owns the schema migrations.
/// - `reader`: read-only connections for repository lookups and listings.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open the store at `database_url`, migrating it to the current schema.
    ///
    /// WAL mode lets readers see committed rows while the writer holds a
    /// transaction. Foreign keys are on, so deleting a workspace or a
    /// journal row cascades to everything stored under it.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base_opts)
            .await?;

        // Readers open after migration so they never see a partial schema.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(read_opts)
            .await?;

        tracing::debug!(url = database_url, readers = READER_CONNECTIONS, "database pool ready");
        Ok(Self { reader, writer })
    }
}

/// Returns the default database URL: `reqflow.db` inside the data directory.
pub fn default_database_url() -> String {
    format!("sqlite://{}/reqflow.db", resolve_data_dir().display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_creates_tables() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = DatabasePool::new(&url).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in [
            "workspaces",
            "collections",
            "example_key_values",
            "assertions",
            "overlay_order",
            "flow_nodes",
            "node_executions",
            "node_responses",
        ] {
            assert!(table_names.contains(&expected), "{expected} table missing");
        }
    }

    #[tokio::test]
    async fn test_pool_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test_wal.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = DatabasePool::new(&url).await.unwrap();

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();

        assert_eq!(result.0.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_pool_foreign_keys_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test_fk.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = DatabasePool::new(&url).await.unwrap();

        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool.writer)
            .await
            .unwrap();

        assert_eq!(result.0, 1, "foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_reader_pool_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test_ro.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = DatabasePool::new(&url).await.unwrap();

        let err = sqlx::query("DELETE FROM workspaces")
            .execute(&pool.reader)
            .await;
        assert!(err.is_err(), "reader connections must be read-only");
        sqlx::query("DELETE FROM workspaces")
            .execute(&pool.writer)
            .await
            .unwrap();
    }

    #[test]
    fn test_default_database_url() {
        let url = default_database_url();
        assert!(url.starts_with("sqlite://"));
        assert!(url.ends_with("reqflow.db"));
    }
}
