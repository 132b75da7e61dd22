//! Pointer bookkeeping for every ordered family.
//!
//! Each helper runs on a caller-provided connection so it can join the
//! caller's transaction: read the chain, plan the writes with
//! [`ListPlanner`], apply them.

use reqflow_core::ordering::ListPlanner;
use reqflow_types::error::RepositoryError;
use reqflow_types::id::Id;
use reqflow_types::list::{LinkNode, ListFamily, ListScope};
use sqlx::{Row, SqliteConnection};

use super::{parse_id, parse_opt_id, query_err};

/// Where one family's rows live.
struct ListTable {
    table: &'static str,
    owner_column: &'static str,
    /// Discriminator for families sharing a table.
    family: Option<&'static str>,
}

fn table_for(family: ListFamily) -> ListTable {
    let kv = |name| ListTable {
        table: "example_key_values",
        owner_column: "example_id",
        family: Some(name),
    };
    match family {
        ListFamily::Header
        | ListFamily::SearchParam
        | ListFamily::BodyForm
        | ListFamily::BodyUrlencoded => kv(family.as_str()),
        ListFamily::Assertion => ListTable {
            table: "assertions",
            owner_column: "example_id",
            family: None,
        },
        ListFamily::Collection => ListTable {
            table: "collections",
            owner_column: "workspace_id",
            family: None,
        },
        ListFamily::FlowVariable => ListTable {
            table: "flow_variables",
            owner_column: "flow_id",
            family: None,
        },
        ListFamily::EnvironmentVariable => ListTable {
            table: "variables",
            owner_column: "env_id",
            family: None,
        },
    }
}

/// Link rows of one list, unordered.
pub(super) async fn load_links(
    conn: &mut SqliteConnection,
    scope: &ListScope,
) -> Result<Vec<LinkNode>, RepositoryError> {
    let t = table_for(scope.family);
    let sql = match t.family {
        Some(_) => format!(
            "SELECT id, prev, next FROM {} WHERE {} = ? AND family = ?",
            t.table, t.owner_column
        ),
        None => format!("SELECT id, prev, next FROM {} WHERE {} = ?", t.table, t.owner_column),
    };

    let mut query = sqlx::query(&sql).bind(scope.owner_id.to_string());
    if let Some(family) = t.family {
        query = query.bind(family);
    }
    let rows = query.fetch_all(&mut *conn).await.map_err(query_err)?;

    let mut links = Vec::with_capacity(rows.len());
    for row in &rows {
        let id: String = row.try_get("id").map_err(query_err)?;
        let prev: Option<String> = row.try_get("prev").map_err(query_err)?;
        let next: Option<String> = row.try_get("next").map_err(query_err)?;
        links.push(LinkNode {
            id: parse_id(&id)?,
            prev: parse_opt_id(prev)?,
            next: parse_opt_id(next)?,
        });
    }
    Ok(links)
}

/// Apply a planner's pointer writes.
pub(super) async fn write_plan(
    conn: &mut SqliteConnection,
    scope: &ListScope,
    plan: &[LinkNode],
) -> Result<(), RepositoryError> {
    let t = table_for(scope.family);
    let sql = format!("UPDATE {} SET prev = ?, next = ? WHERE id = ?", t.table);
    for link in plan {
        let result = sqlx::query(&sql)
            .bind(link.prev.map(|p| p.to_string()))
            .bind(link.next.map(|n| n.to_string()))
            .bind(link.id.to_string())
            .execute(&mut *conn)
            .await
            .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::FailedPrecondition(format!(
                "{} row {} vanished during relink",
                scope.family.as_str(),
                link.id
            )));
        }
    }
    tracing::trace!(
        family = scope.family.as_str(),
        owner = %scope.owner_id,
        writes = plan.len(),
        "list relinked"
    );
    Ok(())
}

/// Plan and write edits to one list in a single pass.
pub(super) async fn edit<T>(
    conn: &mut SqliteConnection,
    scope: &ListScope,
    f: impl FnOnce(&mut ListPlanner) -> Result<T, RepositoryError>,
) -> Result<T, RepositoryError> {
    let links = load_links(conn, scope).await?;
    let mut planner = ListPlanner::from_links(&links)?;
    let out = f(&mut planner)?;
    write_plan(conn, scope, &planner.plan()).await?;
    Ok(out)
}

/// Link a freshly inserted row (stored with null pointers) at `position`,
/// or after the tail.
pub(super) async fn link_new(
    conn: &mut SqliteConnection,
    scope: &ListScope,
    id: Id,
    position: Option<usize>,
) -> Result<(), RepositoryError> {
    let links: Vec<LinkNode> = load_links(conn, scope)
        .await?
        .into_iter()
        .filter(|l| l.id != id)
        .collect();
    let mut planner = ListPlanner::from_links(&links)?;
    match position {
        Some(p) => planner.insert_at(id, p)?,
        None => planner.append(id)?,
    }
    write_plan(conn, scope, &planner.plan()).await
}

/// Unlink a row before it is deleted. Returns `false` if it is not in the list.
pub(super) async fn unlink(
    conn: &mut SqliteConnection,
    scope: &ListScope,
    id: Id,
) -> Result<bool, RepositoryError> {
    let links = load_links(conn, scope).await?;
    if !links.iter().any(|l| l.id == id) {
        return Ok(false);
    }
    let mut planner = ListPlanner::from_links(&links)?;
    planner.remove(id)?;
    write_plan(conn, scope, &planner.plan()).await?;
    Ok(true)
}
