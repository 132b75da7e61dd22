//! SQLite implementation of OverlayRepository.
//!
//! Order, state and delta tables are all keyed by `(example_id, family)`.

use reqflow_core::repository::overlay::OverlayRepository;
use reqflow_types::error::RepositoryError;
use reqflow_types::id::Id;
use reqflow_types::overlay::{OverlayDeltaRow, OverlayOrderRow, OverlayScope, OverlayState, RefKind};
use reqflow_types::rank::Rank;
use reqflow_types::request::{KeyValueFields, KeyValueOverrides};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::pool::DatabasePool;
use super::{parse_id, query_err};

pub struct SqliteOverlayRepository {
    pool: DatabasePool,
}

impl SqliteOverlayRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn order_from_row(row: &SqliteRow) -> Result<OverlayOrderRow, RepositoryError> {
    let ref_kind: String = row.try_get("ref_kind").map_err(query_err)?;
    let ref_id: String = row.try_get("ref_id").map_err(query_err)?;
    let rank: String = row.try_get("rank").map_err(query_err)?;
    Ok(OverlayOrderRow {
        ref_kind: ref_kind.parse::<RefKind>().map_err(RepositoryError::Query)?,
        ref_id: parse_id(&ref_id)?,
        rank: Rank::parse(&rank).map_err(|e| RepositoryError::Query(format!("invalid rank: {e}")))?,
        revision: row.try_get("revision").map_err(query_err)?,
    })
}

fn state_from_row(row: &SqliteRow) -> Result<OverlayState, RepositoryError> {
    let origin_id: String = row.try_get("origin_id").map_err(query_err)?;
    Ok(OverlayState {
        origin_id: parse_id(&origin_id)?,
        suppressed: row.try_get("suppressed").map_err(query_err)?,
        overrides: KeyValueOverrides {
            key: row.try_get("delta_key").map_err(query_err)?,
            value: row.try_get("delta_value").map_err(query_err)?,
            description: row.try_get("delta_description").map_err(query_err)?,
            enabled: row.try_get("delta_enabled").map_err(query_err)?,
        },
    })
}

fn delta_from_row(row: &SqliteRow) -> Result<OverlayDeltaRow, RepositoryError> {
    let id: String = row.try_get("id").map_err(query_err)?;
    Ok(OverlayDeltaRow {
        id: parse_id(&id)?,
        fields: KeyValueFields {
            key: row.try_get("key").map_err(query_err)?,
            value: row.try_get("value").map_err(query_err)?,
            description: row.try_get("description").map_err(query_err)?,
            enabled: row.try_get("enabled").map_err(query_err)?,
        },
    })
}

const UPSERT_ORDER: &str = r#"INSERT INTO overlay_order (example_id, family, ref_kind, ref_id, rank, revision)
   VALUES (?, ?, ?, ?, ?, ?)
   ON CONFLICT(example_id, family, ref_kind, ref_id) DO UPDATE SET
     rank = excluded.rank,
     revision = excluded.revision
   WHERE excluded.revision > overlay_order.revision"#;

async fn upsert_order_on(
    conn: &mut sqlx::SqliteConnection,
    scope: &OverlayScope,
    row: &OverlayOrderRow,
) -> Result<u64, RepositoryError> {
    let result = sqlx::query(UPSERT_ORDER)
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .bind(row.ref_kind.as_str())
        .bind(row.ref_id.to_string())
        .bind(row.rank.as_str())
        .bind(row.revision)
        .execute(&mut *conn)
        .await
        .map_err(query_err)?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// OverlayRepository impl
// ---------------------------------------------------------------------------

impl OverlayRepository for SqliteOverlayRepository {
    async fn seed(
        &self,
        scope: &OverlayScope,
        rows: &[OverlayOrderRow],
    ) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let existing: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM overlay_order WHERE example_id = ? AND family = ?",
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(query_err)?
        .try_get("n")
        .map_err(query_err)?;
        if existing > 0 {
            return Ok(false);
        }

        for row in rows {
            upsert_order_on(&mut *tx, scope, row).await?;
        }
        tx.commit().await.map_err(query_err)?;
        Ok(true)
    }

    async fn list_order(&self, scope: &OverlayScope) -> Result<Vec<OverlayOrderRow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM overlay_order WHERE example_id = ? AND family = ?
             ORDER BY rank ASC, revision DESC, ref_id ASC",
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(order_from_row).collect()
    }

    async fn max_revision(&self, scope: &OverlayScope) -> Result<i64, RepositoryError> {
        sqlx::query(
            "SELECT COALESCE(MAX(revision), 0) AS rev FROM overlay_order WHERE example_id = ? AND family = ?",
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?
        .try_get("rev")
        .map_err(query_err)
    }

    async fn upsert_order(
        &self,
        scope: &OverlayScope,
        row: &OverlayOrderRow,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.pool.writer.acquire().await.map_err(query_err)?;
        let written = upsert_order_on(&mut *conn, scope, row).await?;
        if written == 0 {
            tracing::debug!(
                example_id = %scope.example_id,
                ref_id = %row.ref_id,
                revision = row.revision,
                "stale overlay order write ignored"
            );
        }
        Ok(())
    }

    async fn append_orders(
        &self,
        scope: &OverlayScope,
        rows: &[OverlayOrderRow],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        for row in rows {
            upsert_order_on(&mut *tx, scope, row).await?;
        }
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn list_states(&self, scope: &OverlayScope) -> Result<Vec<OverlayState>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM overlay_state WHERE example_id = ? AND family = ?")
            .bind(scope.example_id.to_string())
            .bind(scope.family.as_str())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter().map(state_from_row).collect()
    }

    async fn get_state(
        &self,
        scope: &OverlayScope,
        origin_id: &Id,
    ) -> Result<Option<OverlayState>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM overlay_state WHERE example_id = ? AND family = ? AND origin_id = ?",
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .bind(origin_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.as_ref().map(state_from_row).transpose()
    }

    async fn upsert_state(
        &self,
        scope: &OverlayScope,
        state: &OverlayState,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO overlay_state
               (example_id, family, origin_id, suppressed, delta_key, delta_value, delta_description, delta_enabled)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(example_id, family, origin_id) DO UPDATE SET
                 suppressed = excluded.suppressed,
                 delta_key = excluded.delta_key,
                 delta_value = excluded.delta_value,
                 delta_description = excluded.delta_description,
                 delta_enabled = excluded.delta_enabled"#,
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .bind(state.origin_id.to_string())
        .bind(state.suppressed)
        .bind(&state.overrides.key)
        .bind(&state.overrides.value)
        .bind(&state.overrides.description)
        .bind(state.overrides.enabled)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn list_deltas(&self, scope: &OverlayScope) -> Result<Vec<OverlayDeltaRow>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM overlay_delta WHERE example_id = ? AND family = ? ORDER BY id ASC",
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(delta_from_row).collect()
    }

    async fn get_delta(
        &self,
        scope: &OverlayScope,
        id: &Id,
    ) -> Result<Option<OverlayDeltaRow>, RepositoryError> {
        let row = sqlx::query(
            "SELECT * FROM overlay_delta WHERE example_id = ? AND family = ? AND id = ?",
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .bind(id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.as_ref().map(delta_from_row).transpose()
    }

    async fn insert_delta(
        &self,
        scope: &OverlayScope,
        row: &OverlayDeltaRow,
        order: &OverlayOrderRow,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            "INSERT INTO overlay_delta (example_id, family, id, key, value, description, enabled)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .bind(row.id.to_string())
        .bind(&row.fields.key)
        .bind(&row.fields.value)
        .bind(&row.fields.description)
        .bind(row.fields.enabled)
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        upsert_order_on(&mut *tx, scope, order).await?;

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn update_delta(
        &self,
        scope: &OverlayScope,
        row: &OverlayDeltaRow,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE overlay_delta SET key = ?, value = ?, description = ?, enabled = ?
             WHERE example_id = ? AND family = ? AND id = ?",
        )
        .bind(&row.fields.key)
        .bind(&row.fields.value)
        .bind(&row.fields.description)
        .bind(row.fields.enabled)
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .bind(row.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_delta(&self, scope: &OverlayScope, id: &Id) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        let result = sqlx::query(
            "DELETE FROM overlay_delta WHERE example_id = ? AND family = ? AND id = ?",
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        sqlx::query(
            "DELETE FROM overlay_order WHERE example_id = ? AND family = ? AND ref_kind = 'DELTA' AND ref_id = ?",
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .bind(id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn suppress_origin(&self, scope: &OverlayScope, origin_id: &Id) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            "DELETE FROM overlay_order WHERE example_id = ? AND family = ? AND ref_kind = 'ORIGIN' AND ref_id = ?",
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .bind(origin_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        sqlx::query(
            r#"INSERT INTO overlay_state (example_id, family, origin_id, suppressed)
               VALUES (?, ?, ?, 1)
               ON CONFLICT(example_id, family, origin_id) DO UPDATE SET suppressed = 1"#,
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .bind(origin_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn restore_origin(
        &self,
        scope: &OverlayScope,
        origin_id: &Id,
        order: Option<&OverlayOrderRow>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;

        sqlx::query(
            "UPDATE overlay_state SET suppressed = 0 WHERE example_id = ? AND family = ? AND origin_id = ?",
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .bind(origin_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(query_err)?;

        if let Some(order) = order {
            upsert_order_on(&mut *tx, scope, order).await?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn has_order(
        &self,
        scope: &OverlayScope,
        ref_kind: RefKind,
        ref_id: &Id,
    ) -> Result<bool, RepositoryError> {
        let row = sqlx::query(
            "SELECT 1 FROM overlay_order WHERE example_id = ? AND family = ? AND ref_kind = ? AND ref_id = ?",
        )
        .bind(scope.example_id.to_string())
        .bind(scope.family.as_str())
        .bind(ref_kind.as_str())
        .bind(ref_id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        Ok(row.is_some())
    }
}
