//! SQLite implementation of the generic list reordering port.

use reqflow_core::ordering::order_chain;
use reqflow_core::repository::list::ListRepository;
use reqflow_types::error::RepositoryError;
use reqflow_types::id::Id;
use reqflow_types::list::{ListScope, MovePosition};

use super::links;
use super::pool::DatabasePool;
use super::query_err;

/// Reorders any ordered family, one writer transaction per call.
pub struct SqliteListRepository {
    pool: DatabasePool,
}

impl SqliteListRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl ListRepository for SqliteListRepository {
    async fn ordered_ids(&self, scope: &ListScope) -> Result<Vec<Id>, RepositoryError> {
        let mut conn = self.pool.reader.acquire().await.map_err(query_err)?;
        let rows = links::load_links(&mut *conn, scope).await?;
        Ok(order_chain(&rows)?)
    }

    async fn move_to(
        &self,
        scope: &ListScope,
        item: &Id,
        position: usize,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let moved = links::edit(&mut *tx, scope, |planner| Ok(planner.move_to(*item, position)?))
            .await?;
        tx.commit().await.map_err(query_err)?;

        tracing::debug!(
            family = scope.family.as_str(),
            owner = %scope.owner_id,
            item = %item,
            position,
            moved,
            "list move_to"
        );
        Ok(())
    }

    async fn move_relative(
        &self,
        scope: &ListScope,
        item: &Id,
        target: &Id,
        position: MovePosition,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let moved = links::edit(&mut *tx, scope, |planner| {
            Ok(planner.move_relative(*item, *target, position)?)
        })
        .await?;
        tx.commit().await.map_err(query_err)?;

        tracing::debug!(
            family = scope.family.as_str(),
            owner = %scope.owner_id,
            item = %item,
            target = %target,
            ?position,
            moved,
            "list move_relative"
        );
        Ok(())
    }

    async fn reorder(
        &self,
        scope: &ListScope,
        placements: &[(Id, usize)],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        links::edit(&mut *tx, scope, |planner| Ok(planner.reorder(placements)?)).await?;
        tx.commit().await.map_err(query_err)?;

        tracing::debug!(
            family = scope.family.as_str(),
            owner = %scope.owner_id,
            items = placements.len(),
            "list reordered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::workspace::SqliteWorkspaceRepository;
    use reqflow_core::repository::workspace::WorkspaceRepository;
    use reqflow_types::list::ListFamily;
    use reqflow_types::workspace::{Collection, Workspace};

    async fn test_pool() -> (DatabasePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (pool, dir)
    }

    fn collection(workspace_id: Id, name: &str) -> Collection {
        Collection {
            id: Id::new(),
            workspace_id,
            name: name.to_string(),
            prev: None,
            next: None,
        }
    }

    async fn names(repo: &SqliteWorkspaceRepository, ws: &Id) -> Vec<String> {
        repo.list_collections(ws)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect()
    }

    #[tokio::test]
    async fn create_list_move_collections() {
        let (pool, _dir) = test_pool().await;
        let workspaces = SqliteWorkspaceRepository::new(pool.clone());
        let lists = SqliteListRepository::new(pool);

        let ws = Workspace::new("W");
        workspaces.create_workspace(&ws).await.unwrap();
        let a = collection(ws.id, "A");
        let b = collection(ws.id, "B");
        let c = collection(ws.id, "C");
        for col in [&a, &b, &c] {
            workspaces.create_collection(col, None).await.unwrap();
        }
        assert_eq!(names(&workspaces, &ws.id).await, ["A", "B", "C"]);

        let scope = ListScope::new(ListFamily::Collection, ws.id);
        lists
            .move_relative(&scope, &a.id, &b.id, MovePosition::After)
            .await
            .unwrap();
        assert_eq!(names(&workspaces, &ws.id).await, ["B", "A", "C"]);

        lists
            .move_relative(&scope, &c.id, &b.id, MovePosition::Before)
            .await
            .unwrap();
        assert_eq!(names(&workspaces, &ws.id).await, ["C", "B", "A"]);
        assert_eq!(lists.ordered_ids(&scope).await.unwrap(), vec![c.id, b.id, a.id]);
    }

    #[tokio::test]
    async fn single_item_moves() {
        let (pool, _dir) = test_pool().await;
        let workspaces = SqliteWorkspaceRepository::new(pool.clone());
        let lists = SqliteListRepository::new(pool);

        let ws = Workspace::new("W");
        workspaces.create_workspace(&ws).await.unwrap();
        let only = collection(ws.id, "only");
        workspaces.create_collection(&only, None).await.unwrap();

        let scope = ListScope::new(ListFamily::Collection, ws.id);
        lists.move_to(&scope, &only.id, 0).await.unwrap();
        let err = lists.move_to(&scope, &only.id, 1).await.unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidArgument(_)));
        assert_eq!(lists.ordered_ids(&scope).await.unwrap(), vec![only.id]);
    }

    #[tokio::test]
    async fn self_move_and_cross_owner_move_are_rejected() {
        let (pool, _dir) = test_pool().await;
        let workspaces = SqliteWorkspaceRepository::new(pool.clone());
        let lists = SqliteListRepository::new(pool);

        let w1 = Workspace::new("W1");
        let w2 = Workspace::new("W2");
        workspaces.create_workspace(&w1).await.unwrap();
        workspaces.create_workspace(&w2).await.unwrap();
        let a = collection(w1.id, "A");
        let b = collection(w1.id, "B");
        let foreign = collection(w2.id, "X");
        workspaces.create_collection(&a, None).await.unwrap();
        workspaces.create_collection(&b, None).await.unwrap();
        workspaces.create_collection(&foreign, None).await.unwrap();

        let scope = ListScope::new(ListFamily::Collection, w1.id);
        let err = lists
            .move_relative(&scope, &a.id, &a.id, MovePosition::After)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidArgument(_)));

        let err = lists
            .move_relative(&scope, &foreign.id, &a.id, MovePosition::After)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
        assert_eq!(names(&workspaces, &w1.id).await, ["A", "B"]);
        assert_eq!(names(&workspaces, &w2.id).await, ["X"]);
    }

    #[tokio::test]
    async fn reorder_and_delete_keep_membership() {
        let (pool, _dir) = test_pool().await;
        let workspaces = SqliteWorkspaceRepository::new(pool.clone());
        let lists = SqliteListRepository::new(pool);

        let ws = Workspace::new("W");
        workspaces.create_workspace(&ws).await.unwrap();
        let cols: Vec<Collection> = ["A", "B", "C", "D"]
            .iter()
            .map(|n| collection(ws.id, n))
            .collect();
        for col in &cols {
            workspaces.create_collection(col, None).await.unwrap();
        }

        let scope = ListScope::new(ListFamily::Collection, ws.id);
        let placements: Vec<(Id, usize)> = cols
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, cols.len() - 1 - i))
            .collect();
        lists.reorder(&scope, &placements).await.unwrap();
        assert_eq!(names(&workspaces, &ws.id).await, ["D", "C", "B", "A"]);

        // Head and tail removal hand their role to the neighbour.
        assert!(workspaces.delete_collection(&cols[3].id).await.unwrap());
        assert!(workspaces.delete_collection(&cols[0].id).await.unwrap());
        assert_eq!(names(&workspaces, &ws.id).await, ["C", "B"]);
        assert!(!workspaces.delete_collection(&cols[0].id).await.unwrap());

        let inserted = collection(ws.id, "E");
        workspaces.create_collection(&inserted, Some(1)).await.unwrap();
        assert_eq!(names(&workspaces, &ws.id).await, ["C", "E", "B"]);
    }
}
