//! SQLite implementation of FlowRepository.
//!
//! Node payloads are stored as JSON text tagged by kind. Flow variables are
//! an ordered list per flow.

use reqflow_core::ordering::sort_linked;
use reqflow_core::repository::flow::{FlowRepository, FlowSnapshot};
use reqflow_types::error::RepositoryError;
use reqflow_types::flow::{Flow, FlowEdge, FlowNodeDef, FlowVariable, Handle, NodePayload};
use reqflow_types::id::Id;
use reqflow_types::list::{LinkNode, ListFamily, ListScope};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::pool::DatabasePool;
use super::{format_datetime, links, parse_datetime, parse_id, parse_opt_id, query_err};

pub struct SqliteFlowRepository {
    pool: DatabasePool,
}

impl SqliteFlowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

struct FlowRow {
    id: String,
    workspace_id: String,
    name: String,
    timeout_ms: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl FlowRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            name: row.try_get("name")?,
            timeout_ms: row.try_get("timeout_ms")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_flow(self) -> Result<Flow, RepositoryError> {
        Ok(Flow {
            id: parse_id(&self.id)?,
            workspace_id: parse_id(&self.workspace_id)?,
            name: self.name,
            timeout_ms: self.timeout_ms.map(|ms| ms.max(0) as u64),
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

struct NodeRow {
    id: String,
    flow_id: String,
    name: String,
    payload: String,
}

impl NodeRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            flow_id: row.try_get("flow_id")?,
            name: row.try_get("name")?,
            payload: row.try_get("payload")?,
        })
    }

    fn into_node(self) -> Result<FlowNodeDef, RepositoryError> {
        let payload: NodePayload = serde_json::from_str(&self.payload)
            .map_err(|e| RepositoryError::Query(format!("invalid node payload: {e}")))?;
        Ok(FlowNodeDef {
            id: parse_id(&self.id)?,
            flow_id: parse_id(&self.flow_id)?,
            name: self.name,
            payload,
        })
    }
}

fn edge_from_row(row: &SqliteRow) -> Result<FlowEdge, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let flow_id: String = row.try_get("flow_id").map_err(query_err)?;
    let source: String = row.try_get("source_id").map_err(query_err)?;
    let target: String = row.try_get("target_id").map_err(query_err)?;
    let handle: String = row.try_get("handle").map_err(query_err)?;
    Ok(FlowEdge {
        id: parse_id(&id)?,
        flow_id: parse_id(&flow_id)?,
        source: parse_id(&source)?,
        target: parse_id(&target)?,
        handle: handle.parse::<Handle>().map_err(RepositoryError::Query)?,
    })
}

fn variable_from_row(row: &SqliteRow) -> Result<FlowVariable, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let flow_id: String = row.try_get("flow_id").map_err(query_err)?;
    Ok(FlowVariable {
        id: parse_id(&id)?,
        flow_id: parse_id(&flow_id)?,
        name: row.try_get("name").map_err(query_err)?,
        value: row.try_get("value").map_err(query_err)?,
        enabled: row.try_get("enabled").map_err(query_err)?,
        description: row.try_get("description").map_err(query_err)?,
        prev: parse_opt_id(row.try_get("prev").map_err(query_err)?)?,
        next: parse_opt_id(row.try_get("next").map_err(query_err)?)?,
    })
}

// ---------------------------------------------------------------------------
// FlowRepository impl
// ---------------------------------------------------------------------------

impl FlowRepository for SqliteFlowRepository {
    async fn create_flow(&self, flow: &Flow) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO flows (id, workspace_id, name, timeout_ms, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(flow.id.to_string())
        .bind(flow.workspace_id.to_string())
        .bind(&flow.name)
        .bind(flow.timeout_ms.map(|ms| ms as i64))
        .bind(format_datetime(&flow.created_at))
        .bind(format_datetime(&flow.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_flow(&self, id: &Id) -> Result<Option<Flow>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM flows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = FlowRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_flow()?))
            }
            None => Ok(None),
        }
    }

    async fn list_flows(&self, workspace_id: &Id) -> Result<Vec<Flow>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM flows WHERE workspace_id = ? ORDER BY name ASC, id ASC")
            .bind(workspace_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut flows = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = FlowRow::from_row(row).map_err(query_err)?;
            flows.push(r.into_flow()?);
        }
        Ok(flows)
    }

    async fn delete_flow(&self, id: &Id) -> Result<bool, RepositoryError> {
        // Nodes, edges and variables cascade.
        let result = sqlx::query("DELETE FROM flows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_node(&self, node: &FlowNodeDef) -> Result<(), RepositoryError> {
        let payload = serde_json::to_string(&node.payload)
            .map_err(|e| RepositoryError::Query(format!("serialize payload: {e}")))?;

        sqlx::query("INSERT INTO flow_nodes (id, flow_id, name, kind, payload) VALUES (?, ?, ?, ?, ?)")
            .bind(node.id.to_string())
            .bind(node.flow_id.to_string())
            .bind(&node.name)
            .bind(node.kind().as_str())
            .bind(&payload)
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        Ok(())
    }

    async fn list_nodes(&self, flow_id: &Id) -> Result<Vec<FlowNodeDef>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM flow_nodes WHERE flow_id = ? ORDER BY id ASC")
            .bind(flow_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut nodes = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = NodeRow::from_row(row).map_err(query_err)?;
            nodes.push(r.into_node()?);
        }
        Ok(nodes)
    }

    async fn create_edge(&self, edge: &FlowEdge) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO flow_edges (id, flow_id, source_id, target_id, handle) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(edge.id.to_string())
        .bind(edge.flow_id.to_string())
        .bind(edge.source.to_string())
        .bind(edge.target.to_string())
        .bind(edge.handle.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.message().contains("FOREIGN KEY") {
                    return RepositoryError::InvalidArgument(format!(
                        "edge {} references an unknown node",
                        edge.id
                    ));
                }
            }
            query_err(e)
        })?;

        Ok(())
    }

    async fn list_edges(&self, flow_id: &Id) -> Result<Vec<FlowEdge>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM flow_edges WHERE flow_id = ? ORDER BY id ASC")
            .bind(flow_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter().map(edge_from_row).collect()
    }

    async fn create_variable(
        &self,
        variable: &FlowVariable,
        position: Option<usize>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            "INSERT INTO flow_variables (id, flow_id, name, value, enabled, description)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(variable.id.to_string())
        .bind(variable.flow_id.to_string())
        .bind(&variable.name)
        .bind(&variable.value)
        .bind(variable.enabled)
        .bind(&variable.description)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        let scope = ListScope::new(ListFamily::FlowVariable, variable.flow_id);
        links::link_new(&mut *tx, &scope, variable.id, position).await?;

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn list_variables(&self, flow_id: &Id) -> Result<Vec<FlowVariable>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM flow_variables WHERE flow_id = ?")
            .bind(flow_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let variables = rows
            .iter()
            .map(variable_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sort_linked(variables, |v| LinkNode {
            id: v.id,
            prev: v.prev,
            next: v.next,
        })?)
    }

    async fn load_snapshot(&self, id: &Id) -> Result<Option<FlowSnapshot>, RepositoryError> {
        let Some(flow) = self.get_flow(id).await? else {
            return Ok(None);
        };
        let nodes = self.list_nodes(id).await?;
        let edges = self.list_edges(id).await?;
        let variables = self.list_variables(id).await?;

        tracing::debug!(
            flow_id = %id,
            nodes = nodes.len(),
            edges = edges.len(),
            variables = variables.len(),
            "flow snapshot loaded"
        );
        Ok(Some(FlowSnapshot {
            flow,
            nodes,
            edges,
            variables,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::workspace::SqliteWorkspaceRepository;
    use reqflow_core::repository::workspace::WorkspaceRepository;
    use reqflow_types::flow::{IterationErrorPolicy, NodeKind};
    use reqflow_types::workspace::Workspace;

    async fn test_pool() -> (DatabasePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (pool, dir)
    }

    async fn workspace(pool: &DatabasePool) -> Workspace {
        let ws = Workspace::new("w");
        SqliteWorkspaceRepository::new(pool.clone())
            .create_workspace(&ws)
            .await
            .unwrap();
        ws
    }

    fn variable(flow_id: Id, name: &str, value: &str) -> FlowVariable {
        FlowVariable {
            id: Id::new(),
            flow_id,
            name: name.into(),
            value: value.into(),
            enabled: true,
            description: String::new(),
            prev: None,
            next: None,
        }
    }

    #[tokio::test]
    async fn snapshot_round_trip() {
        let (pool, _dir) = test_pool().await;
        let ws = workspace(&pool).await;
        let repo = SqliteFlowRepository::new(pool);

        let mut flow = Flow::new(ws.id, "smoke");
        flow.timeout_ms = Some(2_500);
        repo.create_flow(&flow).await.unwrap();

        let start = FlowNodeDef::new(flow.id, "start", NodePayload::Noop { start: true });
        let each = FlowNodeDef::new(
            flow.id,
            "each",
            NodePayload::For {
                iterations: 3,
                error_policy: IterationErrorPolicy::Break,
            },
        );
        repo.create_node(&start).await.unwrap();
        repo.create_node(&each).await.unwrap();
        let edge = FlowEdge::new(flow.id, start.id, each.id, Handle::Then);
        repo.create_edge(&edge).await.unwrap();

        repo.create_variable(&variable(flow.id, "b", "2"), None).await.unwrap();
        repo.create_variable(&variable(flow.id, "a", "1"), Some(0)).await.unwrap();

        let snapshot = repo.load_snapshot(&flow.id).await.unwrap().unwrap();
        assert_eq!(snapshot.flow.timeout_ms, Some(2_500));
        assert_eq!(snapshot.nodes.len(), 2);
        assert_eq!(snapshot.nodes[1].kind(), NodeKind::For);
        assert_eq!(snapshot.edges, vec![edge]);
        let names: Vec<&str> = snapshot.variables.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);

        assert!(repo.load_snapshot(&Id::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn edge_to_unknown_node_is_rejected() {
        let (pool, _dir) = test_pool().await;
        let ws = workspace(&pool).await;
        let repo = SqliteFlowRepository::new(pool);

        let flow = Flow::new(ws.id, "f");
        repo.create_flow(&flow).await.unwrap();
        let start = FlowNodeDef::new(flow.id, "start", NodePayload::Noop { start: true });
        repo.create_node(&start).await.unwrap();

        let err = repo
            .create_edge(&FlowEdge::new(flow.id, start.id, Id::new(), Handle::Then))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn delete_cascades() {
        let (pool, _dir) = test_pool().await;
        let ws = workspace(&pool).await;
        let repo = SqliteFlowRepository::new(pool);

        let flow = Flow::new(ws.id, "f");
        repo.create_flow(&flow).await.unwrap();
        repo.create_node(&FlowNodeDef::new(flow.id, "start", NodePayload::Noop { start: true }))
            .await
            .unwrap();
        repo.create_variable(&variable(flow.id, "x", "1"), None).await.unwrap();

        assert_eq!(repo.list_flows(&ws.id).await.unwrap().len(), 1);
        assert!(repo.delete_flow(&flow.id).await.unwrap());
        assert!(!repo.delete_flow(&flow.id).await.unwrap());
        assert!(repo.list_nodes(&flow.id).await.unwrap().is_empty());
        assert!(repo.list_variables(&flow.id).await.unwrap().is_empty());
    }
}
