//! SQLite implementation of WorkspaceRepository.
//!
//! Collections and environment variables are ordered lists; creates and
//! deletes relink them inside the same writer transaction.

use reqflow_core::ordering::sort_linked;
use reqflow_core::repository::workspace::WorkspaceRepository;
use reqflow_types::error::RepositoryError;
use reqflow_types::id::Id;
use reqflow_types::list::{LinkNode, ListFamily, ListScope};
use reqflow_types::workspace::{Collection, Environment, Variable, Workspace};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::pool::DatabasePool;
use super::{format_datetime, links, parse_datetime, parse_id, parse_opt_id, query_err};

pub struct SqliteWorkspaceRepository {
    pool: DatabasePool,
}

impl SqliteWorkspaceRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

struct WorkspaceRow {
    id: String,
    name: String,
    global_env_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl WorkspaceRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            global_env_id: row.try_get("global_env_id")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_workspace(self) -> Result<Workspace, RepositoryError> {
        Ok(Workspace {
            id: parse_id(&self.id)?,
            name: self.name,
            global_env_id: parse_opt_id(self.global_env_id)?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn collection_from_row(row: &SqliteRow) -> Result<Collection, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let workspace_id: String = row.try_get("workspace_id").map_err(query_err)?;
    Ok(Collection {
        id: parse_id(&id)?,
        workspace_id: parse_id(&workspace_id)?,
        name: row.try_get("name").map_err(query_err)?,
        prev: parse_opt_id(row.try_get("prev").map_err(query_err)?)?,
        next: parse_opt_id(row.try_get("next").map_err(query_err)?)?,
    })
}

fn environment_from_row(row: &SqliteRow) -> Result<Environment, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let workspace_id: String = row.try_get("workspace_id").map_err(query_err)?;
    Ok(Environment {
        id: parse_id(&id)?,
        workspace_id: parse_id(&workspace_id)?,
        name: row.try_get("name").map_err(query_err)?,
        description: row.try_get("description").map_err(query_err)?,
        is_global: row.try_get("is_global").map_err(query_err)?,
    })
}

fn variable_from_row(row: &SqliteRow) -> Result<Variable, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let env_id: String = row.try_get("env_id").map_err(query_err)?;
    Ok(Variable {
        id: parse_id(&id)?,
        env_id: parse_id(&env_id)?,
        name: row.try_get("name").map_err(query_err)?,
        value: row.try_get("value").map_err(query_err)?,
        enabled: row.try_get("enabled").map_err(query_err)?,
        description: row.try_get("description").map_err(query_err)?,
        prev: parse_opt_id(row.try_get("prev").map_err(query_err)?)?,
        next: parse_opt_id(row.try_get("next").map_err(query_err)?)?,
    })
}

// ---------------------------------------------------------------------------
// WorkspaceRepository impl
// ---------------------------------------------------------------------------

impl WorkspaceRepository for SqliteWorkspaceRepository {
    async fn create_workspace(&self, workspace: &Workspace) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO workspaces (id, name, global_env_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(workspace.id.to_string())
        .bind(&workspace.name)
        .bind(workspace.global_env_id.map(|id| id.to_string()))
        .bind(format_datetime(&workspace.created_at))
        .bind(format_datetime(&workspace.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.message().contains("UNIQUE") {
                    return RepositoryError::Conflict(format!(
                        "workspace {} already exists",
                        workspace.id
                    ));
                }
            }
            query_err(e)
        })?;

        Ok(())
    }

    async fn get_workspace(&self, id: &Id) -> Result<Option<Workspace>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workspaces WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = WorkspaceRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_workspace()?))
            }
            None => Ok(None),
        }
    }

    async fn list_workspaces(&self) -> Result<Vec<Workspace>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workspaces ORDER BY id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut workspaces = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = WorkspaceRow::from_row(row).map_err(query_err)?;
            workspaces.push(r.into_workspace()?);
        }
        Ok(workspaces)
    }

    async fn set_global_environment(
        &self,
        workspace_id: &Id,
        env_id: &Id,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE workspaces SET global_env_id = ?, updated_at = ?
             WHERE id = ? AND EXISTS (SELECT 1 FROM environments WHERE id = ? AND workspace_id = ?)",
        )
        .bind(env_id.to_string())
        .bind(format_datetime(&chrono::Utc::now()))
        .bind(workspace_id.to_string())
        .bind(env_id.to_string())
        .bind(workspace_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Collections
    // -----------------------------------------------------------------------

    async fn create_collection(
        &self,
        collection: &Collection,
        position: Option<usize>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query("INSERT INTO collections (id, workspace_id, name) VALUES (?, ?, ?)")
            .bind(collection.id.to_string())
            .bind(collection.workspace_id.to_string())
            .bind(&collection.name)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        let scope = ListScope::new(ListFamily::Collection, collection.workspace_id);
        links::link_new(&mut *tx, &scope, collection.id, position).await?;

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_collection(&self, id: &Id) -> Result<Option<Collection>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM collections WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.as_ref().map(collection_from_row).transpose()
    }

    async fn list_collections(&self, workspace_id: &Id) -> Result<Vec<Collection>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM collections WHERE workspace_id = ?")
            .bind(workspace_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let collections = rows
            .iter()
            .map(collection_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sort_linked(collections, |c| LinkNode {
            id: c.id,
            prev: c.prev,
            next: c.next,
        })?)
    }

    async fn delete_collection(&self, id: &Id) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let owner: Option<String> = sqlx::query("SELECT workspace_id FROM collections WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?
            .map(|row| row.try_get::<String, _>("workspace_id"))
            .transpose()
            .map_err(query_err)?;
        let Some(owner) = owner else {
            return Ok(false);
        };

        let scope = ListScope::new(ListFamily::Collection, parse_id(&owner)?);
        links::unlink(&mut *tx, &scope, *id).await?;

        sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Environments
    // -----------------------------------------------------------------------

    async fn create_environment(&self, env: &Environment) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO environments (id, workspace_id, name, description, is_global)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(env.id.to_string())
        .bind(env.workspace_id.to_string())
        .bind(&env.name)
        .bind(&env.description)
        .bind(env.is_global)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_environment(&self, id: &Id) -> Result<Option<Environment>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM environments WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.as_ref().map(environment_from_row).transpose()
    }

    async fn list_environments(&self, workspace_id: &Id) -> Result<Vec<Environment>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM environments WHERE workspace_id = ? ORDER BY is_global DESC, id ASC",
        )
        .bind(workspace_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(environment_from_row).collect()
    }

    async fn create_variable(
        &self,
        variable: &Variable,
        position: Option<usize>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            "INSERT INTO variables (id, env_id, name, value, enabled, description)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(variable.id.to_string())
        .bind(variable.env_id.to_string())
        .bind(&variable.name)
        .bind(&variable.value)
        .bind(variable.enabled)
        .bind(&variable.description)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        let scope = ListScope::new(ListFamily::EnvironmentVariable, variable.env_id);
        links::link_new(&mut *tx, &scope, variable.id, position).await?;

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn list_variables(&self, env_id: &Id) -> Result<Vec<Variable>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM variables WHERE env_id = ?")
            .bind(env_id.to_string())
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

    async fn delete_variable(&self, id: &Id) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let owner: Option<String> = sqlx::query("SELECT env_id FROM variables WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(query_err)?
            .map(|row| row.try_get::<String, _>("env_id"))
            .transpose()
            .map_err(query_err)?;
        let Some(owner) = owner else {
            return Ok(false);
        };

        let scope = ListScope::new(ListFamily::EnvironmentVariable, parse_id(&owner)?);
        links::unlink(&mut *tx, &scope, *id).await?;

        sqlx::query("DELETE FROM variables WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> (DatabasePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (pool, dir)
    }

    fn environment(workspace_id: Id, name: &str, is_global: bool) -> Environment {
        Environment {
            id: Id::new(),
            workspace_id,
            name: name.to_string(),
            description: String::new(),
            is_global,
        }
    }

    fn variable(env_id: Id, name: &str, value: &str) -> Variable {
        Variable {
            id: Id::new(),
            env_id,
            name: name.to_string(),
            value: value.to_string(),
            enabled: true,
            description: String::new(),
            prev: None,
            next: None,
        }
    }

    #[tokio::test]
    async fn workspace_round_trip() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkspaceRepository::new(pool);

        let ws = Workspace::new("main");
        repo.create_workspace(&ws).await.unwrap();
        let loaded = repo.get_workspace(&ws.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "main");
        assert!(loaded.global_env_id.is_none());

        let err = repo.create_workspace(&ws).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert!(repo.get_workspace(&Id::new()).await.unwrap().is_none());
        assert_eq!(repo.list_workspaces().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn global_environment_must_belong_to_workspace() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkspaceRepository::new(pool);

        let ws = Workspace::new("a");
        let other = Workspace::new("b");
        repo.create_workspace(&ws).await.unwrap();
        repo.create_workspace(&other).await.unwrap();
        let global = environment(ws.id, "global", true);
        let foreign = environment(other.id, "foreign", true);
        repo.create_environment(&global).await.unwrap();
        repo.create_environment(&foreign).await.unwrap();

        repo.set_global_environment(&ws.id, &global.id).await.unwrap();
        let err = repo
            .set_global_environment(&ws.id, &foreign.id)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));

        let loaded = repo.get_workspace(&ws.id).await.unwrap().unwrap();
        assert_eq!(loaded.global_env_id, Some(global.id));
        assert_eq!(repo.list_environments(&ws.id).await.unwrap(), vec![global]);
    }

    #[tokio::test]
    async fn variables_keep_list_order() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkspaceRepository::new(pool);

        let ws = Workspace::new("w");
        repo.create_workspace(&ws).await.unwrap();
        let env = environment(ws.id, "dev", false);
        repo.create_environment(&env).await.unwrap();

        let host = variable(env.id, "host", "localhost");
        let port = variable(env.id, "port", "8080");
        let scheme = variable(env.id, "scheme", "http");
        repo.create_variable(&host, None).await.unwrap();
        repo.create_variable(&port, None).await.unwrap();
        repo.create_variable(&scheme, Some(0)).await.unwrap();

        let names: Vec<String> = repo
            .list_variables(&env.id)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, ["scheme", "host", "port"]);

        assert!(repo.delete_variable(&host.id).await.unwrap());
        let listed = repo.list_variables(&env.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].next, Some(port.id));
        assert_eq!(listed[1].prev, Some(scheme.id));
    }
}
