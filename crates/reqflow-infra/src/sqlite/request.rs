//! SQLite implementation of RequestRepository.
//!
//! Headers, search params, form and urlencoded bodies live in one
//! `example_key_values` table keyed by family. Each (example, family) pair
//! and each example's assertions form an ordered list.

use chrono::Utc;
use reqflow_core::ordering::sort_linked;
use reqflow_core::repository::request::RequestRepository;
use reqflow_types::error::RepositoryError;
use reqflow_types::execution::CompressionKind;
use reqflow_types::id::Id;
use reqflow_types::list::{LinkNode, ListFamily, ListScope};
use reqflow_types::request::{
    Assertion, AssertionCascade, BodyKind, BodyRaw, Endpoint, EndpointOverrides, Example, KeyValue,
    KeyValueOverrides, KvFamily,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::pool::DatabasePool;
use super::{format_datetime, links, parse_datetime, parse_id, parse_opt_id, query_err};

pub struct SqliteRequestRepository {
    pool: DatabasePool,
}

impl SqliteRequestRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

struct EndpointRow {
    id: String,
    collection_id: String,
    name: String,
    url: String,
    method: String,
    description: String,
    body_kind: String,
    delta_parent_id: Option<String>,
    overrides: String,
}

impl EndpointRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            collection_id: row.try_get("collection_id")?,
            name: row.try_get("name")?,
            url: row.try_get("url")?,
            method: row.try_get("method")?,
            description: row.try_get("description")?,
            body_kind: row.try_get("body_kind")?,
            delta_parent_id: row.try_get("delta_parent_id")?,
            overrides: row.try_get("overrides")?,
        })
    }

    fn into_endpoint(self) -> Result<Endpoint, RepositoryError> {
        let body_kind = self
            .body_kind
            .parse::<BodyKind>()
            .map_err(RepositoryError::Query)?;
        let overrides: EndpointOverrides = serde_json::from_str(&self.overrides)
            .map_err(|e| RepositoryError::Query(format!("invalid endpoint overrides: {e}")))?;

        Ok(Endpoint {
            id: parse_id(&self.id)?,
            collection_id: parse_id(&self.collection_id)?,
            name: self.name,
            url: self.url,
            method: self.method,
            description: self.description,
            body_kind,
            delta_parent_id: parse_opt_id(self.delta_parent_id)?,
            overrides,
        })
    }
}

struct ExampleRow {
    id: String,
    endpoint_id: String,
    name: String,
    is_default: bool,
    version_parent: Option<String>,
    created_at: String,
}

impl ExampleRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            endpoint_id: row.try_get("endpoint_id")?,
            name: row.try_get("name")?,
            is_default: row.try_get("is_default")?,
            version_parent: row.try_get("version_parent")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_example(self) -> Result<Example, RepositoryError> {
        Ok(Example {
            id: parse_id(&self.id)?,
            endpoint_id: parse_id(&self.endpoint_id)?,
            name: self.name,
            is_default: self.is_default,
            version_parent: parse_opt_id(self.version_parent)?,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

struct KeyValueRow {
    id: String,
    example_id: String,
    family: String,
    key: String,
    value: String,
    description: String,
    enabled: bool,
    delta_parent_id: Option<String>,
    delta_key: Option<String>,
    delta_value: Option<String>,
    delta_description: Option<String>,
    delta_enabled: Option<bool>,
    prev: Option<String>,
    next: Option<String>,
}

impl KeyValueRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            example_id: row.try_get("example_id")?,
            family: row.try_get("family")?,
            key: row.try_get("key")?,
            value: row.try_get("value")?,
            description: row.try_get("description")?,
            enabled: row.try_get("enabled")?,
            delta_parent_id: row.try_get("delta_parent_id")?,
            delta_key: row.try_get("delta_key")?,
            delta_value: row.try_get("delta_value")?,
            delta_description: row.try_get("delta_description")?,
            delta_enabled: row.try_get("delta_enabled")?,
            prev: row.try_get("prev")?,
            next: row.try_get("next")?,
        })
    }

    fn into_key_value(self) -> Result<KeyValue, RepositoryError> {
        Ok(KeyValue {
            id: parse_id(&self.id)?,
            example_id: parse_id(&self.example_id)?,
            family: parse_family(&self.family)?,
            key: self.key,
            value: self.value,
            description: self.description,
            enabled: self.enabled,
            delta_parent_id: parse_opt_id(self.delta_parent_id)?,
            overrides: KeyValueOverrides {
                key: self.delta_key,
                value: self.delta_value,
                description: self.delta_description,
                enabled: self.delta_enabled,
            },
            prev: parse_opt_id(self.prev)?,
            next: parse_opt_id(self.next)?,
        })
    }
}

fn assertion_from_row(row: &SqliteRow) -> Result<Assertion, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    let example_id: String = row.try_get("example_id").map_err(query_err)?;
    Ok(Assertion {
        id: parse_id(&id)?,
        example_id: parse_id(&example_id)?,
        expression: row.try_get("expression").map_err(query_err)?,
        enabled: row.try_get("enabled").map_err(query_err)?,
        delta_parent_id: parse_opt_id(row.try_get("delta_parent_id").map_err(query_err)?)?,
        prev: parse_opt_id(row.try_get("prev").map_err(query_err)?)?,
        next: parse_opt_id(row.try_get("next").map_err(query_err)?)?,
    })
}

fn body_from_row(row: &SqliteRow) -> Result<BodyRaw, RepositoryError> {
    let example_id: String = row.try_get("example_id").map_err(query_err)?;
    let code: i64 = row.try_get("compression").map_err(query_err)?;
    let compression = CompressionKind::from_code(code)
        .ok_or_else(|| RepositoryError::Query(format!("unknown compression code {code}")))?;
    Ok(BodyRaw {
        example_id: parse_id(&example_id)?,
        data: row.try_get("data").map_err(query_err)?,
        content_type: row.try_get("content_type").map_err(query_err)?,
        compression,
        delta_compression: row.try_get("delta_compression").map_err(query_err)?,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_family(s: &str) -> Result<KvFamily, RepositoryError> {
    KvFamily::ALL
        .into_iter()
        .find(|f| f.as_str() == s)
        .ok_or_else(|| RepositoryError::Query(format!("unknown key/value family '{s}'")))
}

fn kv_link(kv: &KeyValue) -> LinkNode {
    LinkNode {
        id: kv.id,
        prev: kv.prev,
        next: kv.next,
    }
}

fn assertion_link(a: &Assertion) -> LinkNode {
    LinkNode {
        id: a.id,
        prev: a.prev,
        next: a.next,
    }
}

/// Owner and family of a stored key/value row.
async fn kv_scope(
    conn: &mut sqlx::SqliteConnection,
    id: &Id,
) -> Result<Option<ListScope>, RepositoryError> {
    let row = sqlx::query("SELECT example_id, family FROM example_key_values WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_err)?;
    let Some(row) = row else {
        return Ok(None);
    };
    let example_id: String = row.try_get("example_id").map_err(query_err)?;
    let family: String = row.try_get("family").map_err(query_err)?;
    Ok(Some(ListScope::new(
        parse_family(&family)?.list_family(),
        parse_id(&example_id)?,
    )))
}

async fn insert_assertion_on(
    conn: &mut sqlx::SqliteConnection,
    assertion: &Assertion,
    position: Option<usize>,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO assertions (id, example_id, expression, enabled, delta_parent_id)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(assertion.id.to_string())
    .bind(assertion.example_id.to_string())
    .bind(&assertion.expression)
    .bind(assertion.enabled)
    .bind(assertion.delta_parent_id.map(|id| id.to_string()))
    .execute(&mut *conn)
    .await
    .map_err(query_err)?;

    let scope = ListScope::new(ListFamily::Assertion, assertion.example_id);
    links::link_new(&mut *conn, &scope, assertion.id, position).await
}

async fn update_assertion_on(
    conn: &mut sqlx::SqliteConnection,
    assertion: &Assertion,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE assertions SET expression = ?, enabled = ?, delta_parent_id = ? WHERE id = ?",
    )
    .bind(&assertion.expression)
    .bind(assertion.enabled)
    .bind(assertion.delta_parent_id.map(|id| id.to_string()))
    .bind(assertion.id.to_string())
    .execute(&mut *conn)
    .await
    .map_err(query_err)?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}

/// Unlink and delete one assertion. `false` if it did not exist.
async fn delete_assertion_on(
    conn: &mut sqlx::SqliteConnection,
    id: &Id,
) -> Result<bool, RepositoryError> {
    let owner: Option<String> = sqlx::query("SELECT example_id FROM assertions WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await
        .map_err(query_err)?
        .map(|row| row.try_get::<String, _>("example_id"))
        .transpose()
        .map_err(query_err)?;
    let Some(owner) = owner else {
        return Ok(false);
    };

    let scope = ListScope::new(ListFamily::Assertion, parse_id(&owner)?);
    links::unlink(&mut *conn, &scope, *id).await?;

    sqlx::query("DELETE FROM assertions WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await
        .map_err(query_err)?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// RequestRepository impl
// ---------------------------------------------------------------------------

impl RequestRepository for SqliteRequestRepository {
    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<(), RepositoryError> {
        let overrides = serde_json::to_string(&endpoint.overrides)
            .map_err(|e| RepositoryError::Query(format!("serialize overrides: {e}")))?;

        sqlx::query(
            r#"INSERT INTO endpoints
               (id, collection_id, name, url, method, description, body_kind, delta_parent_id, overrides)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(endpoint.id.to_string())
        .bind(endpoint.collection_id.to_string())
        .bind(&endpoint.name)
        .bind(&endpoint.url)
        .bind(&endpoint.method)
        .bind(&endpoint.description)
        .bind(endpoint.body_kind.as_str())
        .bind(endpoint.delta_parent_id.map(|id| id.to_string()))
        .bind(&overrides)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_endpoint(&self, id: &Id) -> Result<Option<Endpoint>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM endpoints WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = EndpointRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_endpoint()?))
            }
            None => Ok(None),
        }
    }

    async fn list_endpoints(&self, collection_id: &Id) -> Result<Vec<Endpoint>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM endpoints WHERE collection_id = ? ORDER BY id ASC")
            .bind(collection_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut endpoints = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = EndpointRow::from_row(row).map_err(query_err)?;
            endpoints.push(r.into_endpoint()?);
        }
        Ok(endpoints)
    }

    async fn create_example(&self, example: &Example) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO examples (id, endpoint_id, name, is_default, version_parent, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(example.id.to_string())
        .bind(example.endpoint_id.to_string())
        .bind(&example.name)
        .bind(example.is_default)
        .bind(example.version_parent.map(|id| id.to_string()))
        .bind(format_datetime(&example.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn get_example(&self, id: &Id) -> Result<Option<Example>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM examples WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = ExampleRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_example()?))
            }
            None => Ok(None),
        }
    }

    async fn list_examples(&self, endpoint_id: &Id) -> Result<Vec<Example>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM examples WHERE endpoint_id = ? ORDER BY id ASC")
            .bind(endpoint_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut examples = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ExampleRow::from_row(row).map_err(query_err)?;
            examples.push(r.into_example()?);
        }
        Ok(examples)
    }

    async fn list_delta_examples(&self, origin_id: &Id) -> Result<Vec<Example>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM examples WHERE version_parent = ? ORDER BY id ASC")
            .bind(origin_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let mut examples = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ExampleRow::from_row(row).map_err(query_err)?;
            examples.push(r.into_example()?);
        }
        Ok(examples)
    }

    async fn duplicate_example(&self, id: &Id, name: &str) -> Result<Example, RepositoryError> {
        let source = self.get_example(id).await?.ok_or(RepositoryError::NotFound)?;
        let copy = Example {
            id: Id::new(),
            endpoint_id: source.endpoint_id,
            name: name.to_string(),
            is_default: false,
            version_parent: source.version_parent,
            created_at: Utc::now(),
        };
        self.create_example(&copy).await?;

        tracing::debug!(source = %id, copy = %copy.id, "example duplicated");
        Ok(copy)
    }

    // -----------------------------------------------------------------------
    // Key/value families
    // -----------------------------------------------------------------------

    async fn create_key_value(
        &self,
        row: &KeyValue,
        position: Option<usize>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            r#"INSERT INTO example_key_values
               (id, example_id, family, key, value, description, enabled, delta_parent_id,
                delta_key, delta_value, delta_description, delta_enabled)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(row.id.to_string())
        .bind(row.example_id.to_string())
        .bind(row.family.as_str())
        .bind(&row.key)
        .bind(&row.value)
        .bind(&row.description)
        .bind(row.enabled)
        .bind(row.delta_parent_id.map(|id| id.to_string()))
        .bind(&row.overrides.key)
        .bind(&row.overrides.value)
        .bind(&row.overrides.description)
        .bind(row.overrides.enabled)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        let scope = ListScope::new(row.family.list_family(), row.example_id);
        links::link_new(&mut *tx, &scope, row.id, position).await?;

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_key_value(&self, id: &Id) -> Result<Option<KeyValue>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM example_key_values WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let r = KeyValueRow::from_row(&row).map_err(query_err)?;
                Ok(Some(r.into_key_value()?))
            }
            None => Ok(None),
        }
    }

    async fn list_key_values(
        &self,
        example_id: &Id,
        family: KvFamily,
    ) -> Result<Vec<KeyValue>, RepositoryError> {
        let rows =
            sqlx::query("SELECT * FROM example_key_values WHERE example_id = ? AND family = ?")
                .bind(example_id.to_string())
                .bind(family.as_str())
                .fetch_all(&self.pool.reader)
                .await
                .map_err(query_err)?;

        let mut items = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = KeyValueRow::from_row(row).map_err(query_err)?;
            items.push(r.into_key_value()?);
        }
        Ok(sort_linked(items, kv_link)?)
    }

    async fn update_key_value(&self, row: &KeyValue) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE example_key_values SET
                 key = ?, value = ?, description = ?, enabled = ?, delta_parent_id = ?,
                 delta_key = ?, delta_value = ?, delta_description = ?, delta_enabled = ?
               WHERE id = ?"#,
        )
        .bind(&row.key)
        .bind(&row.value)
        .bind(&row.description)
        .bind(row.enabled)
        .bind(row.delta_parent_id.map(|id| id.to_string()))
        .bind(&row.overrides.key)
        .bind(&row.overrides.value)
        .bind(&row.overrides.description)
        .bind(row.overrides.enabled)
        .bind(row.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_key_value(&self, id: &Id) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let Some(scope) = kv_scope(&mut *tx, id).await? else {
            return Ok(false);
        };
        links::unlink(&mut *tx, &scope, *id).await?;

        sqlx::query("DELETE FROM example_key_values WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Raw body
    // -----------------------------------------------------------------------

    async fn get_body_raw(&self, example_id: &Id) -> Result<Option<BodyRaw>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM body_raws WHERE example_id = ?")
            .bind(example_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.as_ref().map(body_from_row).transpose()
    }

    async fn upsert_body_raw(&self, body: &BodyRaw) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO body_raws (example_id, data, content_type, compression, delta_compression)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(example_id) DO UPDATE SET
                 data = excluded.data,
                 content_type = excluded.content_type,
                 compression = excluded.compression,
                 delta_compression = excluded.delta_compression"#,
        )
        .bind(body.example_id.to_string())
        .bind(&body.data)
        .bind(&body.content_type)
        .bind(body.compression.code())
        .bind(body.delta_compression)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Assertions
    // -----------------------------------------------------------------------

    async fn create_assertion(
        &self,
        assertion: &Assertion,
        position: Option<usize>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        insert_assertion_on(&mut *tx, assertion, position).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn get_assertion(&self, id: &Id) -> Result<Option<Assertion>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM assertions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.as_ref().map(assertion_from_row).transpose()
    }

    async fn list_assertions(&self, example_id: &Id) -> Result<Vec<Assertion>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM assertions WHERE example_id = ?")
            .bind(example_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        let items = rows
            .iter()
            .map(assertion_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sort_linked(items, assertion_link)?)
    }

    async fn list_assertions_by_parent(
        &self,
        parent_id: &Id,
    ) -> Result<Vec<Assertion>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM assertions WHERE delta_parent_id = ? ORDER BY id ASC")
            .bind(parent_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter().map(assertion_from_row).collect()
    }

    async fn update_assertion(&self, assertion: &Assertion) -> Result<(), RepositoryError> {
        let mut conn = self.pool.writer.acquire().await.map_err(query_err)?;
        update_assertion_on(&mut *conn, assertion).await
    }

    async fn delete_assertion(&self, id: &Id) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let existed = delete_assertion_on(&mut *tx, id).await?;
        tx.commit().await.map_err(query_err)?;
        Ok(existed)
    }

    async fn apply_assertion_cascade(
        &self,
        cascade: &AssertionCascade,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        match cascade {
            AssertionCascade::Update {
                base,
                copies,
                created,
            } => {
                update_assertion_on(&mut *tx, base).await?;
                for copy in copies {
                    update_assertion_on(&mut *tx, copy).await?;
                }
                for copy in created {
                    insert_assertion_on(&mut *tx, copy, None).await?;
                }
            }
            AssertionCascade::Delete { base, copies } => {
                for id in copies {
                    delete_assertion_on(&mut *tx, id).await?;
                }
                if !delete_assertion_on(&mut *tx, base).await? {
                    return Err(RepositoryError::NotFound);
                }
            }
        }
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::workspace::SqliteWorkspaceRepository;
    use reqflow_core::delta::assertion::AssertionDeltaService;
    use reqflow_core::delta::loader::load_resolved;
    use reqflow_core::repository::workspace::WorkspaceRepository;
    use reqflow_types::request::KeyValueFields;
    use reqflow_types::workspace::{Collection, Workspace};

    async fn test_pool() -> (DatabasePool, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (pool, dir)
    }

    /// Workspace, collection and endpoint; returns the endpoint.
    async fn seed_endpoint(pool: &DatabasePool) -> Endpoint {
        let workspaces = SqliteWorkspaceRepository::new(pool.clone());
        let ws = Workspace::new("w");
        workspaces.create_workspace(&ws).await.unwrap();
        let col = Collection {
            id: Id::new(),
            workspace_id: ws.id,
            name: "api".into(),
            prev: None,
            next: None,
        };
        workspaces.create_collection(&col, None).await.unwrap();

        let endpoint = Endpoint {
            id: Id::new(),
            collection_id: col.id,
            name: "get user".into(),
            url: "https://example.test/users/1".into(),
            method: "GET".into(),
            description: String::new(),
            body_kind: BodyKind::Raw,
            delta_parent_id: None,
            overrides: EndpointOverrides::default(),
        };
        SqliteRequestRepository::new(pool.clone())
            .create_endpoint(&endpoint)
            .await
            .unwrap();
        endpoint
    }

    fn example(endpoint_id: Id, name: &str, version_parent: Option<Id>) -> Example {
        Example {
            id: Id::new(),
            endpoint_id,
            name: name.into(),
            is_default: version_parent.is_none(),
            version_parent,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn endpoint_and_example_round_trip() {
        let (pool, _dir) = test_pool().await;
        let endpoint = seed_endpoint(&pool).await;
        let repo = SqliteRequestRepository::new(pool);

        let loaded = repo.get_endpoint(&endpoint.id).await.unwrap().unwrap();
        assert_eq!(loaded, endpoint);

        let origin = example(endpoint.id, "default", None);
        let delta = example(endpoint.id, "variant", Some(origin.id));
        repo.create_example(&origin).await.unwrap();
        repo.create_example(&delta).await.unwrap();

        assert_eq!(repo.list_examples(&endpoint.id).await.unwrap().len(), 2);
        let deltas = repo.list_delta_examples(&origin.id).await.unwrap();
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].id, delta.id);

        let copy = repo.duplicate_example(&origin.id, "copy").await.unwrap();
        assert_ne!(copy.id, origin.id);
        assert_eq!(copy.name, "copy");
        assert!(!copy.is_default);
        assert!(matches!(
            repo.duplicate_example(&Id::new(), "x").await.unwrap_err(),
            RepositoryError::NotFound
        ));
    }

    #[tokio::test]
    async fn key_values_are_ordered_per_family() {
        let (pool, _dir) = test_pool().await;
        let endpoint = seed_endpoint(&pool).await;
        let repo = SqliteRequestRepository::new(pool);
        let ex = example(endpoint.id, "default", None);
        repo.create_example(&ex).await.unwrap();

        let h1 = KeyValue::new(ex.id, KvFamily::Header, KeyValueFields::new("H1", "ct/json"));
        let h2 = KeyValue::new(ex.id, KvFamily::Header, KeyValueFields::new("H2", "auth"));
        let q1 = KeyValue::new(ex.id, KvFamily::SearchParam, KeyValueFields::new("page", "1"));
        repo.create_key_value(&h1, None).await.unwrap();
        repo.create_key_value(&q1, None).await.unwrap();
        repo.create_key_value(&h2, Some(0)).await.unwrap();

        let headers = repo.list_key_values(&ex.id, KvFamily::Header).await.unwrap();
        let keys: Vec<&str> = headers.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, ["H2", "H1"]);
        let params = repo.list_key_values(&ex.id, KvFamily::SearchParam).await.unwrap();
        assert_eq!(params.len(), 1);
        assert!(params[0].prev.is_none() && params[0].next.is_none());

        let mut updated = headers[1].clone();
        updated.overrides.value = Some("ct/xml".into());
        repo.update_key_value(&updated).await.unwrap();
        let loaded = repo.get_key_value(&h1.id).await.unwrap().unwrap();
        assert_eq!(loaded.effective().value, "ct/xml");
        assert_eq!(loaded.value, "ct/json");

        assert!(repo.delete_key_value(&h2.id).await.unwrap());
        assert!(!repo.delete_key_value(&h2.id).await.unwrap());
        let headers = repo.list_key_values(&ex.id, KvFamily::Header).await.unwrap();
        assert_eq!(headers.len(), 1);
        assert!(headers[0].prev.is_none());
    }

    #[tokio::test]
    async fn body_raw_upserts() {
        let (pool, _dir) = test_pool().await;
        let endpoint = seed_endpoint(&pool).await;
        let repo = SqliteRequestRepository::new(pool);
        let ex = example(endpoint.id, "default", None);
        repo.create_example(&ex).await.unwrap();

        assert!(repo.get_body_raw(&ex.id).await.unwrap().is_none());
        let mut body = BodyRaw::new(ex.id, br#"{"a":1}"#.to_vec());
        body.content_type = Some("application/json".into());
        repo.upsert_body_raw(&body).await.unwrap();
        body.data = b"changed".to_vec();
        body.delta_compression = Some(1);
        repo.upsert_body_raw(&body).await.unwrap();

        assert_eq!(repo.get_body_raw(&ex.id).await.unwrap(), Some(body));
    }

    #[tokio::test]
    async fn assertion_propagation_scenario() {
        let (pool, _dir) = test_pool().await;
        let endpoint = seed_endpoint(&pool).await;
        let repo = SqliteRequestRepository::new(pool.clone());

        let origin = example(endpoint.id, "origin", None);
        let d1 = example(endpoint.id, "default delta", None);
        let d2 = example(endpoint.id, "version delta", Some(origin.id));
        for ex in [&origin, &d1, &d2] {
            repo.create_example(ex).await.unwrap();
        }

        let a0 = Assertion::new(origin.id, "response.status == 304", true);
        repo.create_assertion(&a0, None).await.unwrap();
        let a0_copy = Assertion::new(d1.id, "response.status == 304", true);
        repo.create_assertion(&a0_copy, None).await.unwrap();

        let service = AssertionDeltaService::new(SqliteRequestRepository::new(pool));
        service
            .apply_update(&origin.id, &[d1.id, d2.id], &a0.id, "response.status == 200", true)
            .await
            .unwrap();

        let a0_after = repo.get_assertion(&a0.id).await.unwrap().unwrap();
        assert_eq!(a0_after.expression, "response.status == 200");
        let copy_after = repo.get_assertion(&a0_copy.id).await.unwrap().unwrap();
        assert_eq!(copy_after.expression, "response.status == 200");

        let d2_rows = repo.list_assertions(&d2.id).await.unwrap();
        assert_eq!(d2_rows.len(), 1);
        assert_eq!(d2_rows[0].delta_parent_id, Some(a0.id));
        assert_eq!(d2_rows[0].expression, "response.status == 200");
        assert_eq!(repo.list_assertions_by_parent(&a0.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn assertion_delete_removes_every_copy() {
        let (pool, _dir) = test_pool().await;
        let endpoint = seed_endpoint(&pool).await;
        let repo = SqliteRequestRepository::new(pool.clone());

        let origin = example(endpoint.id, "origin", None);
        let d1 = example(endpoint.id, "default delta", None);
        let d2 = example(endpoint.id, "version delta", Some(origin.id));
        let other = example(endpoint.id, "unlisted", Some(origin.id));
        for ex in [&origin, &d1, &d2, &other] {
            repo.create_example(ex).await.unwrap();
        }

        let a0 = Assertion::new(origin.id, "response.status == 200", true);
        repo.create_assertion(&a0, None).await.unwrap();
        let legacy = Assertion::new(d1.id, "response.status == 200", true);
        repo.create_assertion(&legacy, None).await.unwrap();
        let mut linked = Assertion::new(d2.id, "response.status == 201", true);
        linked.delta_parent_id = Some(a0.id);
        repo.create_assertion(&linked, None).await.unwrap();
        let own = Assertion::new(d2.id, "response.body.ok", true);
        repo.create_assertion(&own, None).await.unwrap();
        let mut stray = Assertion::new(other.id, "response.status == 200", false);
        stray.delta_parent_id = Some(a0.id);
        repo.create_assertion(&stray, None).await.unwrap();

        let service = AssertionDeltaService::new(SqliteRequestRepository::new(pool));
        service
            .apply_delete(&origin.id, &[d1.id, d2.id], &a0.id)
            .await
            .unwrap();

        assert!(repo.get_assertion(&a0.id).await.unwrap().is_none());
        for id in [legacy.id, linked.id, stray.id] {
            assert!(repo.get_assertion(&id).await.unwrap().is_none());
        }
        assert!(repo.list_assertions(&origin.id).await.unwrap().is_empty());
        assert!(repo.list_assertions(&d1.id).await.unwrap().is_empty());

        // The delta's own row is relinked as the only element.
        let remaining = repo.list_assertions(&d2.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, own.id);
        assert_eq!(remaining[0].prev, None);
        assert_eq!(remaining[0].next, None);
    }

    #[tokio::test]
    async fn divergent_default_copies_are_left_untouched() {
        let (pool, _dir) = test_pool().await;
        let endpoint = seed_endpoint(&pool).await;
        let repo = SqliteRequestRepository::new(pool.clone());

        let origin = example(endpoint.id, "origin", None);
        let d1 = example(endpoint.id, "default delta", None);
        repo.create_example(&origin).await.unwrap();
        repo.create_example(&d1).await.unwrap();

        let a0 = Assertion::new(origin.id, "response.status == 304", true);
        repo.create_assertion(&a0, None).await.unwrap();
        let edited = Assertion::new(d1.id, "response.status == 418", true);
        repo.create_assertion(&edited, None).await.unwrap();

        let service = AssertionDeltaService::new(SqliteRequestRepository::new(pool));
        service
            .apply_update(&origin.id, &[d1.id], &a0.id, "response.status == 200", false)
            .await
            .unwrap();
        let after = repo.get_assertion(&edited.id).await.unwrap().unwrap();
        assert_eq!(after, edited);

        service.apply_delete(&origin.id, &[d1.id], &a0.id).await.unwrap();
        assert_eq!(repo.get_assertion(&edited.id).await.unwrap(), Some(edited));
    }

    #[tokio::test]
    async fn failed_cascade_leaves_the_origin_unchanged() {
        let (pool, _dir) = test_pool().await;
        let endpoint = seed_endpoint(&pool).await;
        let repo = SqliteRequestRepository::new(pool);

        let origin = example(endpoint.id, "origin", None);
        repo.create_example(&origin).await.unwrap();
        let a0 = Assertion::new(origin.id, "response.status == 200", true);
        repo.create_assertion(&a0, None).await.unwrap();

        let mut base = a0.clone();
        base.expression = "response.status == 500".into();
        let missing = Assertion::new(origin.id, "gone", true);
        let err = repo
            .apply_assertion_cascade(&AssertionCascade::Update {
                base,
                copies: vec![missing],
                created: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
        assert_eq!(repo.get_assertion(&a0.id).await.unwrap(), Some(a0));
    }

    #[tokio::test]
    async fn resolved_view_merges_delta_headers() {
        let (pool, _dir) = test_pool().await;
        let endpoint = seed_endpoint(&pool).await;
        let repo = SqliteRequestRepository::new(pool);

        let origin = example(endpoint.id, "origin", None);
        let delta = example(endpoint.id, "delta", Some(origin.id));
        repo.create_example(&origin).await.unwrap();
        repo.create_example(&delta).await.unwrap();

        let h1 = KeyValue::new(origin.id, KvFamily::Header, KeyValueFields::new("H1", "ct/json"));
        repo.create_key_value(&h1, None).await.unwrap();
        let mut overlay = KeyValue::new(delta.id, KvFamily::Header, KeyValueFields::new("H1", "ct/json"));
        overlay.delta_parent_id = Some(h1.id);
        overlay.overrides.value = Some("ct/xml".into());
        repo.create_key_value(&overlay, None).await.unwrap();

        let resolved = load_resolved(&repo, &origin.id, Some(&delta.id), None)
            .await
            .unwrap();
        let headers = resolved.family(KvFamily::Header);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].value, "ct/xml");

        let plain = load_resolved(&repo, &origin.id, None, None).await.unwrap();
        assert_eq!(plain.family(KvFamily::Header)[0].value, "ct/json");
    }
}
