//! SQLite implementation of NodeExecutionRepository.

use reqflow_core::repository::execution::NodeExecutionRepository;
use reqflow_types::error::RepositoryError;
use reqflow_types::execution::{
    CompressionKind, ExecutionState, NodeExecution, NodeExecutionUpdate, NodeResponse,
};
use reqflow_types::id::Id;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_id, parse_opt_id, query_err};

pub struct SqliteNodeExecutionRepository {
    pool: DatabasePool,
}

impl SqliteNodeExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Distinguish a missing row from a terminal one after a guarded write
    /// touched nothing.
    async fn guard_failure(&self, id: &Id) -> RepositoryError {
        let state = sqlx::query("SELECT state FROM node_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.writer)
            .await;
        match state {
            Ok(Some(row)) => {
                let state: String = row.try_get("state").unwrap_or_default();
                RepositoryError::FailedPrecondition(format!(
                    "node execution {id} is {state}, only RUNNING rows may change"
                ))
            }
            Ok(None) => RepositoryError::NotFound,
            Err(e) => query_err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Row type
// ---------------------------------------------------------------------------

struct NodeExecutionRow {
    id: String,
    node_id: String,
    name: String,
    state: String,
    input_data: Vec<u8>,
    output_data: Vec<u8>,
    input_compression: i64,
    output_compression: i64,
    error: Option<String>,
    response_id: Option<String>,
    completed_at: Option<String>,
}

impl NodeExecutionRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            node_id: row.try_get("node_id")?,
            name: row.try_get("name")?,
            state: row.try_get("state")?,
            input_data: row.try_get("input_data")?,
            output_data: row.try_get("output_data")?,
            input_compression: row.try_get("input_compression")?,
            output_compression: row.try_get("output_compression")?,
            error: row.try_get("error")?,
            response_id: row.try_get("response_id")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn into_execution(self) -> Result<NodeExecution, RepositoryError> {
        let state = self
            .state
            .parse::<ExecutionState>()
            .map_err(RepositoryError::Query)?;
        let input_compression = compression_kind(self.input_compression)?;
        let output_compression = compression_kind(self.output_compression)?;
        let completed_at = self
            .completed_at
            .as_deref()
            .map(parse_datetime)
            .transpose()?;

        Ok(NodeExecution {
            id: parse_id(&self.id)?,
            node_id: parse_id(&self.node_id)?,
            name: self.name,
            state,
            input_data: self.input_data,
            output_data: self.output_data,
            input_compression,
            output_compression,
            error: self.error,
            response_id: parse_opt_id(self.response_id)?,
            completed_at,
        })
    }
}

fn compression_kind(code: i64) -> Result<CompressionKind, RepositoryError> {
    CompressionKind::from_code(code)
        .ok_or_else(|| RepositoryError::Query(format!("unknown compression code {code}")))
}

fn response_from_row(row: &SqliteRow) -> Result<NodeResponse, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let execution_id: String = row.try_get("execution_id").map_err(query_err)?;
    let status: i64 = row.try_get("status").map_err(query_err)?;
    let headers: String = row.try_get("headers").map_err(query_err)?;
    let body: String = row.try_get("body").map_err(query_err)?;
    let duration_ms: i64 = row.try_get("duration_ms").map_err(query_err)?;
    let received_at: String = row.try_get("received_at").map_err(query_err)?;
    let json = |s: &str| {
        serde_json::from_str(s)
            .map_err(|e| RepositoryError::Query(format!("invalid response json: {e}")))
    };

    Ok(NodeResponse {
        id: parse_id(&id)?,
        execution_id: parse_id(&execution_id)?,
        status: u16::try_from(status)
            .map_err(|_| RepositoryError::Query(format!("invalid status {status}")))?,
        headers: json(&headers)?,
        body: json(&body)?,
        duration_ms: u64::try_from(duration_ms).unwrap_or(0),
        received_at: parse_datetime(&received_at)?,
    })
}

const PROMOTE: &str = "UPDATE node_executions
     SET state = ?, output_data = ?, output_compression = ?, error = ?,
         response_id = ?, completed_at = ?
     WHERE id = ? AND state = 'RUNNING'";

async fn promote_on(
    conn: &mut sqlx::SqliteConnection,
    id: &Id,
    update: &NodeExecutionUpdate,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(PROMOTE)
        .bind(update.state.as_str())
        .bind(&update.output_data)
        .bind(update.output_compression.code())
        .bind(&update.error)
        .bind(update.response_id.map(|id| id.to_string()))
        .bind(update.completed_at.as_ref().map(format_datetime))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(query_err)?;
    Ok(result.rows_affected())
}

fn map_rows(rows: &[SqliteRow]) -> Result<Vec<NodeExecution>, RepositoryError> {
    rows.iter()
        .map(|row| {
            NodeExecutionRow::from_row(row)
                .map_err(query_err)?
                .into_execution()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// NodeExecutionRepository impl
// ---------------------------------------------------------------------------

impl NodeExecutionRepository for SqliteNodeExecutionRepository {
    async fn create(&self, execution: &NodeExecution) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO node_executions
                (id, node_id, name, state, input_data, output_data, input_compression,
                 output_compression, error, response_id, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(execution.id.to_string())
        .bind(execution.node_id.to_string())
        .bind(&execution.name)
        .bind(execution.state.as_str())
        .bind(&execution.input_data)
        .bind(&execution.output_data)
        .bind(execution.input_compression.code())
        .bind(execution.output_compression.code())
        .bind(&execution.error)
        .bind(execution.response_id.map(|id| id.to_string()))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.message().contains("UNIQUE") {
                    return RepositoryError::Conflict(format!(
                        "node execution {} already exists",
                        execution.id
                    ));
                }
            }
            query_err(e)
        })?;

        Ok(())
    }

    async fn update(&self, id: &Id, update: &NodeExecutionUpdate) -> Result<(), RepositoryError> {
        let mut conn = self.pool.writer.acquire().await.map_err(query_err)?;
        if promote_on(&mut *conn, id, update).await? == 0 {
            drop(conn);
            return Err(self.guard_failure(id).await);
        }
        Ok(())
    }

    async fn update_with_response(
        &self,
        id: &Id,
        update: &NodeExecutionUpdate,
        response: &NodeResponse,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            "INSERT INTO node_responses
                (id, execution_id, status, headers, body, duration_ms, received_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(response.id.to_string())
        .bind(response.execution_id.to_string())
        .bind(i64::from(response.status))
        .bind(response.headers.to_string())
        .bind(response.body.to_string())
        .bind(i64::try_from(response.duration_ms).unwrap_or(i64::MAX))
        .bind(format_datetime(&response.received_at))
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        if promote_on(&mut *tx, id, update).await? == 0 {
            tx.rollback().await.map_err(query_err)?;
            return Err(self.guard_failure(id).await);
        }
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_response(&self, id: &Id) -> Result<Option<NodeResponse>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM node_responses WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.as_ref().map(response_from_row).transpose()
    }

    async fn upsert(&self, execution: &NodeExecution) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO node_executions
                (id, node_id, name, state, input_data, output_data, input_compression,
                 output_compression, error, response_id, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                state = excluded.state,
                input_data = excluded.input_data,
                output_data = excluded.output_data,
                input_compression = excluded.input_compression,
                output_compression = excluded.output_compression,
                error = excluded.error,
                response_id = excluded.response_id,
                completed_at = excluded.completed_at
             WHERE node_executions.state = 'RUNNING'",
        )
        .bind(execution.id.to_string())
        .bind(execution.node_id.to_string())
        .bind(&execution.name)
        .bind(execution.state.as_str())
        .bind(&execution.input_data)
        .bind(&execution.output_data)
        .bind(execution.input_compression.code())
        .bind(execution.output_compression.code())
        .bind(&execution.error)
        .bind(execution.response_id.map(|id| id.to_string()))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(self.guard_failure(&execution.id).await);
        }
        Ok(())
    }

    async fn get(&self, id: &Id) -> Result<Option<NodeExecution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM node_executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = NodeExecutionRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_execution()?))
            }
            None => Ok(None),
        }
    }

    async fn list_by_node(
        &self,
        node_id: &Id,
        limit: Option<u32>,
    ) -> Result<Vec<NodeExecution>, RepositoryError> {
        // LIMIT -1 means no limit in SQLite.
        let limit = limit.map(i64::from).unwrap_or(-1);
        let rows = sqlx::query(
            "SELECT * FROM node_executions WHERE node_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(node_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        map_rows(&rows)
    }

    async fn latest_for_node(&self, node_id: &Id) -> Result<Option<NodeExecution>, RepositoryError> {
        Ok(self.list_by_node(node_id, Some(1)).await?.into_iter().next())
    }

    async fn bulk_delete_by_nodes(&self, node_ids: &[Id]) -> Result<u64, RepositoryError> {
        if node_ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; node_ids.len()].join(", ");
        let sql = format!("DELETE FROM node_executions WHERE node_id IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for id in node_ids {
            query = query.bind(id.to_string());
        }
        let result = query.execute(&self.pool.writer).await.map_err(query_err)?;

        tracing::debug!(
            nodes = node_ids.len(),
            deleted = result.rows_affected(),
            "node executions cleared"
        );
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reqflow_core::journal::NodeJournal;
    use reqflow_types::execution::NodeStatusEvent;
    use serde_json::json;

    async fn test_pool() -> (DatabasePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (pool, dir)
    }

    fn running(node_id: Id, name: &str) -> NodeExecution {
        NodeExecution {
            id: Id::new(),
            node_id,
            name: name.into(),
            state: ExecutionState::Running,
            input_data: b"{\"a\":1}".to_vec(),
            output_data: Vec::new(),
            input_compression: CompressionKind::None,
            output_compression: CompressionKind::None,
            error: None,
            response_id: None,
            completed_at: None,
        }
    }

    fn finished(state: ExecutionState) -> NodeExecutionUpdate {
        NodeExecutionUpdate {
            state,
            output_data: b"{\"ok\":true}".to_vec(),
            output_compression: CompressionKind::None,
            error: None,
            response_id: Some(Id::new()),
            completed_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn create_update_get() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteNodeExecutionRepository::new(pool);

        let row = running(Id::new(), "req");
        repo.create(&row).await.unwrap();
        assert_eq!(repo.get(&row.id).await.unwrap().unwrap(), row);

        let dup = repo.create(&row).await.unwrap_err();
        assert!(matches!(dup, RepositoryError::Conflict(_)));

        let update = finished(ExecutionState::Success);
        repo.update(&row.id, &update).await.unwrap();
        let stored = repo.get(&row.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ExecutionState::Success);
        assert_eq!(stored.input_data, row.input_data);
        assert_eq!(stored.output_data, update.output_data);
        assert_eq!(stored.response_id, update.response_id);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn terminal_rows_are_immutable() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteNodeExecutionRepository::new(pool);

        let row = running(Id::new(), "req");
        repo.create(&row).await.unwrap();
        repo.update(&row.id, &finished(ExecutionState::Failure)).await.unwrap();

        let err = repo
            .update(&row.id, &finished(ExecutionState::Success))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::FailedPrecondition(_)));

        let err = repo.upsert(&row).await.unwrap_err();
        assert!(matches!(err, RepositoryError::FailedPrecondition(_)));
        assert_eq!(
            repo.get(&row.id).await.unwrap().unwrap().state,
            ExecutionState::Failure
        );

        let err = repo
            .update(&Id::new(), &finished(ExecutionState::Success))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn upsert_inserts_then_overwrites_running() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteNodeExecutionRepository::new(pool);

        let mut row = running(Id::new(), "loop");
        repo.upsert(&row).await.unwrap();

        row.state = ExecutionState::Canceled;
        row.error = Some("flow canceled".into());
        repo.upsert(&row).await.unwrap();
        let stored = repo.get(&row.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ExecutionState::Canceled);
        assert_eq!(stored.error.as_deref(), Some("flow canceled"));
    }

    #[tokio::test]
    async fn history_is_newest_first_and_clearable() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteNodeExecutionRepository::new(pool);

        let node = Id::new();
        let other = Id::new();
        let rows: Vec<NodeExecution> = (0..3).map(|_| running(node, "each")).collect();
        for row in &rows {
            repo.create(row).await.unwrap();
        }
        repo.create(&running(other, "other")).await.unwrap();

        let history = repo.list_by_node(&node, None).await.unwrap();
        let ids: Vec<Id> = history.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![rows[2].id, rows[1].id, rows[0].id]);
        assert_eq!(repo.list_by_node(&node, Some(2)).await.unwrap().len(), 2);
        assert_eq!(
            repo.latest_for_node(&node).await.unwrap().unwrap().id,
            rows[2].id
        );

        assert_eq!(repo.bulk_delete_by_nodes(&[node]).await.unwrap(), 3);
        assert_eq!(repo.bulk_delete_by_nodes(&[]).await.unwrap(), 0);
        assert!(repo.latest_for_node(&node).await.unwrap().is_none());
        assert_eq!(repo.list_by_node(&other, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn journal_compresses_large_payloads() {
        let (pool, _dir) = test_pool().await;
        let journal = NodeJournal::new(SqliteNodeExecutionRepository::new(pool), 64);

        let node = Id::new();
        let big = json!({ "body": "x".repeat(500) });
        let mut event = NodeStatusEvent::new(Id::new(), node, "req", ExecutionState::Running);
        event.input = Some(big.clone());
        journal.record(&event).await.unwrap();

        let mut done = NodeStatusEvent::new(event.execution_id, node, "req", ExecutionState::Success);
        done.output = Some(json!({ "status": 200 }));
        journal.record(&done).await.unwrap();

        let row = journal.latest(&node).await.unwrap().unwrap();
        assert_eq!(row.state, ExecutionState::Success);
        assert_eq!(row.input_compression, CompressionKind::Gzip);
        assert_eq!(row.output_compression, CompressionKind::None);
        assert!(row.input_data.len() < 500);

        let decoded = journal.decode(&row).unwrap();
        assert_eq!(decoded.input, Some(big));
        assert_eq!(decoded.output, Some(json!({ "status": 200 })));
    }

    #[tokio::test]
    async fn journal_keeps_small_payloads_plain() {
        let (pool, _dir) = test_pool().await;
        let journal = NodeJournal::new(SqliteNodeExecutionRepository::new(pool), 1024);

        let node = Id::new();
        let mut skipped = NodeStatusEvent::new(Id::new(), node, "else", ExecutionState::Canceled);
        skipped.error = Some("branch not taken".into());
        journal.record(&skipped).await.unwrap();

        let history = journal.history(&node, None).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].input_compression, CompressionKind::None);
        assert_eq!(history[0].output_compression, CompressionKind::None);
        assert_eq!(history[0].state, ExecutionState::Canceled);
        assert!(history[0].completed_at.is_some());
        assert_eq!(journal.clear(&[node]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn journal_compresses_output_on_promotion_only() {
        let (pool, _dir) = test_pool().await;
        let journal = NodeJournal::new(SqliteNodeExecutionRepository::new(pool), 64);

        let node = Id::new();
        let mut event = NodeStatusEvent::new(Id::new(), node, "req", ExecutionState::Running);
        event.input = Some(json!({ "url": "/a" }));
        journal.record(&event).await.unwrap();

        let big = json!({ "body": "y".repeat(500) });
        let mut done = NodeStatusEvent::new(event.execution_id, node, "req", ExecutionState::Success);
        done.output = Some(big.clone());
        journal.record(&done).await.unwrap();

        let row = journal.latest(&node).await.unwrap().unwrap();
        assert_eq!(row.input_compression, CompressionKind::None);
        assert_eq!(row.output_compression, CompressionKind::Gzip);
        assert_eq!(row.input_data, b"{\"url\":\"/a\"}".to_vec());

        let decoded = journal.decode(&row).unwrap();
        assert_eq!(decoded.input, Some(json!({ "url": "/a" })));
        assert_eq!(decoded.output, Some(big));
    }

    #[tokio::test]
    async fn journal_stores_response_with_promotion() {
        let (pool, _dir) = test_pool().await;
        let journal = NodeJournal::new(SqliteNodeExecutionRepository::new(pool), 1024);

        let node = Id::new();
        let event = NodeStatusEvent::new(Id::new(), node, "req", ExecutionState::Running);
        journal.record(&event).await.unwrap();

        let response_id = Id::new();
        let mut done = NodeStatusEvent::new(event.execution_id, node, "req", ExecutionState::Success);
        done.response_id = Some(response_id);
        done.output = Some(json!({
            "request": { "method": "GET" },
            "response": {
                "status": 201,
                "headers": { "x-id": "7" },
                "body": { "ok": true },
                "duration_ms": 12
            }
        }));
        journal.record(&done).await.unwrap();

        let row = journal.latest(&node).await.unwrap().unwrap();
        assert_eq!(row.response_id, Some(response_id));
        let response = journal.response(&response_id).await.unwrap().unwrap();
        assert_eq!(response.execution_id, event.execution_id);
        assert_eq!(response.status, 201);
        assert_eq!(response.headers["x-id"], "7");
        assert_eq!(response.body, json!({ "ok": true }));
        assert_eq!(response.duration_ms, 12);

        // Clearing history removes the response with its row.
        assert_eq!(journal.clear(&[node]).await.unwrap(), 1);
        assert!(journal.response(&response_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn response_id_without_response_view_is_dropped() {
        let (pool, _dir) = test_pool().await;
        let journal = NodeJournal::new(SqliteNodeExecutionRepository::new(pool), 1024);

        let node = Id::new();
        let event = NodeStatusEvent::new(Id::new(), node, "req", ExecutionState::Running);
        journal.record(&event).await.unwrap();

        let mut failed = NodeStatusEvent::new(event.execution_id, node, "req", ExecutionState::Failure);
        failed.response_id = Some(Id::new());
        failed.error = Some("connection refused".into());
        journal.record(&failed).await.unwrap();

        let row = journal.latest(&node).await.unwrap().unwrap();
        assert_eq!(row.state, ExecutionState::Failure);
        assert!(row.response_id.is_none());
    }

    #[tokio::test]
    async fn response_write_is_undone_when_row_is_terminal() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteNodeExecutionRepository::new(pool);

        let row = running(Id::new(), "req");
        repo.create(&row).await.unwrap();
        repo.update(&row.id, &finished(ExecutionState::Success)).await.unwrap();

        let response = NodeResponse {
            id: Id::new(),
            execution_id: row.id,
            status: 200,
            headers: json!({}),
            body: json!(null),
            duration_ms: 1,
            received_at: Utc::now(),
        };
        let err = repo
            .update_with_response(&row.id, &finished(ExecutionState::Success), &response)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::FailedPrecondition(_)));
        assert!(repo.get_response(&response.id).await.unwrap().is_none());
    }
}
