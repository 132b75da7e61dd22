//! Rank-ordered overlay of a delta example over its origin's list.
//!
//! The overlay never rewrites origin rows. It keeps, per delta example and
//! family, an order table of rank keys pointing at origin rows or
//! delta-only rows, a state table of per-origin overrides with a tombstone
//! flag, and a table of delta-only rows. [`OverlayService::list`] joins the
//! three into the merged view and classifies each row as ORIGIN, MIXED or
//! DELTA. Origin rows added after the overlay was seeded are placed at the
//! tail, in origin order, the next time the overlay is read or reordered.

use std::collections::{HashMap, HashSet};

use reqflow_types::error::{ErrorKind, RepositoryError};
use reqflow_types::id::Id;
use reqflow_types::list::MovePosition;
use reqflow_types::overlay::{
    ItemSource, MergedItem, OverlayDeltaRow, OverlayOrderRow, OverlayScope, OverlayState, RefKind,
};
use reqflow_types::rank::{Rank, RankError};
use reqflow_types::request::{KeyValue, KeyValueFields, KeyValueOverrides};

use crate::repository::overlay::OverlayRepository;
use crate::repository::request::RequestRepository;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("example {0} not found")]
    ExampleNotFound(Id),

    #[error("example {0} has no origin to overlay")]
    NoOrigin(Id),

    #[error("item {0} is not part of this overlay")]
    ItemNotFound(Id),

    #[error("cannot move an item relative to itself")]
    SelfMove,

    #[error("rank error: {0}")]
    Rank(#[from] RankError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl OverlayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OverlayError::ExampleNotFound(_) | OverlayError::ItemNotFound(_) => {
                ErrorKind::NotFound
            }
            OverlayError::NoOrigin(_) => ErrorKind::FailedPrecondition,
            OverlayError::SelfMove => ErrorKind::InvalidArgument,
            OverlayError::Rank(_) => ErrorKind::FailedPrecondition,
            OverlayError::Repository(e) => e.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// OverlayService
// ---------------------------------------------------------------------------

/// What an id refers to inside one overlay.
enum Target {
    Delta(OverlayDeltaRow),
    Origin,
}

/// Overlay operations over any key/value family.
pub struct OverlayService<O: OverlayRepository, Q: RequestRepository> {
    overlay: O,
    requests: Q,
}

impl<O: OverlayRepository, Q: RequestRepository> OverlayService<O, Q> {
    pub fn new(overlay: O, requests: Q) -> Self {
        Self { overlay, requests }
    }

    /// Populate the order table from the origin's list, once.
    ///
    /// Returns `true` when rows were inserted.
    pub async fn seed(&self, scope: &OverlayScope, origin_id: &Id) -> Result<bool, OverlayError> {
        if !self.overlay.list_order(scope).await?.is_empty() {
            return Ok(false);
        }
        let origin = self.requests.list_key_values(origin_id, scope.family).await?;
        let rows: Vec<OverlayOrderRow> = origin
            .iter()
            .zip(Rank::sequence(origin.len()))
            .map(|(kv, rank)| OverlayOrderRow {
                ref_kind: RefKind::Origin,
                ref_id: kv.id,
                rank,
                revision: 1,
            })
            .collect();
        let seeded = self.overlay.seed(scope, &rows).await?;
        tracing::debug!(
            example_id = %scope.example_id,
            family = scope.family.as_str(),
            rows = rows.len(),
            seeded,
            "overlay seed"
        );
        Ok(seeded)
    }

    /// The merged view in rank order.
    pub async fn list(&self, scope: &OverlayScope) -> Result<Vec<MergedItem>, OverlayError> {
        let origin_id = self.origin_of(scope).await?;
        let origin = self.requests.list_key_values(&origin_id, scope.family).await?;
        self.place_unordered(scope, &origin).await?;
        let origin: HashMap<Id, KeyValue> = origin.into_iter().map(|kv| (kv.id, kv)).collect();
        let states: HashMap<Id, OverlayState> = self
            .overlay
            .list_states(scope)
            .await?
            .into_iter()
            .map(|s| (s.origin_id, s))
            .collect();
        let deltas: HashMap<Id, OverlayDeltaRow> = self
            .overlay
            .list_deltas(scope)
            .await?
            .into_iter()
            .map(|d| (d.id, d))
            .collect();

        let mut items = Vec::new();
        for row in sorted(self.overlay.list_order(scope).await?) {
            match row.ref_kind {
                RefKind::Origin => {
                    let state = states.get(&row.ref_id);
                    if state.is_some_and(|s| s.suppressed) {
                        continue;
                    }
                    let Some(kv) = origin.get(&row.ref_id) else {
                        tracing::debug!(origin_id = %row.ref_id, "origin row gone, skipping");
                        continue;
                    };
                    let base = kv.fields();
                    let overrides = state.map(|s| s.overrides.clone()).unwrap_or_default();
                    items.push(MergedItem {
                        id: kv.id,
                        fields: overrides.apply(&base),
                        source: if overrides.matches(&base) {
                            ItemSource::Origin
                        } else {
                            ItemSource::Mixed
                        },
                        origin: Some(base),
                    });
                }
                RefKind::Delta => {
                    if let Some(d) = deltas.get(&row.ref_id) {
                        items.push(MergedItem {
                            id: d.id,
                            fields: d.fields.clone(),
                            source: ItemSource::Delta,
                            origin: None,
                        });
                    }
                }
            }
        }
        Ok(items)
    }

    /// Create an empty delta-only row at the tail.
    pub async fn create_delta(&self, scope: &OverlayScope) -> Result<Id, OverlayError> {
        let row = OverlayDeltaRow {
            id: Id::new(),
            fields: KeyValueFields::blank(),
        };
        let order = self.tail_row(scope, RefKind::Delta, row.id).await?;
        self.overlay.insert_delta(scope, &row, &order).await?;
        tracing::debug!(example_id = %scope.example_id, id = %row.id, "overlay delta row created");
        Ok(row.id)
    }

    /// Update an item. Delta-only rows take the present fields; origin rows
    /// store `values` as their override set, where `None` resets a field.
    pub async fn update(
        &self,
        scope: &OverlayScope,
        id: &Id,
        values: &KeyValueOverrides,
    ) -> Result<(), OverlayError> {
        match self.target(scope, id).await? {
            Target::Delta(mut row) => {
                row.fields = values.apply(&row.fields);
                self.overlay.update_delta(scope, &row).await?;
            }
            Target::Origin => {
                let mut state = self
                    .overlay
                    .get_state(scope, id)
                    .await?
                    .unwrap_or_else(|| OverlayState::new(*id));
                state.overrides = values.clone();
                self.overlay.upsert_state(scope, &state).await?;
            }
        }
        Ok(())
    }

    /// Place `id` immediately before or after `target` in rank order.
    pub async fn move_item(
        &self,
        scope: &OverlayScope,
        id: &Id,
        target: &Id,
        position: MovePosition,
    ) -> Result<(), OverlayError> {
        if id == target {
            return Err(OverlayError::SelfMove);
        }
        self.ensure_placed(scope).await?;
        let order = sorted(self.overlay.list_order(scope).await?);
        let item = order
            .iter()
            .find(|r| r.ref_id == *id)
            .cloned()
            .ok_or(OverlayError::ItemNotFound(*id))?;

        let rest: Vec<&OverlayOrderRow> = order.iter().filter(|r| r.ref_id != *id).collect();
        let t = rest
            .iter()
            .position(|r| r.ref_id == *target)
            .ok_or(OverlayError::ItemNotFound(*target))?;
        let (left, right) = match position {
            MovePosition::Before => (t.checked_sub(1).map(|i| &rest[i].rank), Some(&rest[t].rank)),
            MovePosition::After => (Some(&rest[t].rank), rest.get(t + 1).map(|r| &r.rank)),
        };

        let rank = Rank::between(left, right)?;
        let revision = self.overlay.max_revision(scope).await? + 1;
        self.overlay
            .upsert_order(
                scope,
                &OverlayOrderRow {
                    ref_kind: item.ref_kind,
                    ref_id: *id,
                    rank,
                    revision,
                },
            )
            .await?;
        tracing::debug!(
            example_id = %scope.example_id,
            id = %id,
            target = %target,
            ?position,
            revision,
            "overlay item moved"
        );
        Ok(())
    }

    /// Drop a row's edits: delta rows become blank, origin rows lose their overrides.
    pub async fn reset(&self, scope: &OverlayScope, id: &Id) -> Result<(), OverlayError> {
        match self.target(scope, id).await? {
            Target::Delta(mut row) => {
                row.fields = KeyValueFields::blank();
                self.overlay.update_delta(scope, &row).await?;
            }
            Target::Origin => {
                if let Some(mut state) = self.overlay.get_state(scope, id).await? {
                    state.overrides = KeyValueOverrides::default();
                    self.overlay.upsert_state(scope, &state).await?;
                }
            }
        }
        Ok(())
    }

    /// Remove a delta-only row, or tombstone an origin row.
    pub async fn delete(&self, scope: &OverlayScope, id: &Id) -> Result<(), OverlayError> {
        match self.target(scope, id).await? {
            Target::Delta(_) => {
                self.overlay.delete_delta(scope, id).await?;
            }
            Target::Origin => {
                self.overlay.suppress_origin(scope, id).await?;
            }
        }
        Ok(())
    }

    /// Clear an origin row's tombstone. A row with no order entry returns at the tail.
    pub async fn undelete(&self, scope: &OverlayScope, id: &Id) -> Result<(), OverlayError> {
        if !matches!(self.target(scope, id).await?, Target::Origin) {
            return Ok(());
        }
        let order = if self.overlay.has_order(scope, RefKind::Origin, id).await? {
            None
        } else {
            Some(self.tail_row(scope, RefKind::Origin, *id).await?)
        };
        self.overlay.restore_origin(scope, id, order.as_ref()).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn origin_of(&self, scope: &OverlayScope) -> Result<Id, OverlayError> {
        let example = self
            .requests
            .get_example(&scope.example_id)
            .await?
            .ok_or(OverlayError::ExampleNotFound(scope.example_id))?;
        example
            .version_parent
            .ok_or(OverlayError::NoOrigin(scope.example_id))
    }

    async fn target(&self, scope: &OverlayScope, id: &Id) -> Result<Target, OverlayError> {
        if let Some(row) = self.overlay.get_delta(scope, id).await? {
            return Ok(Target::Delta(row));
        }
        let origin_id = self.origin_of(scope).await?;
        match self.requests.get_key_value(id).await? {
            Some(kv) if kv.example_id == origin_id && kv.family == scope.family => {
                Ok(Target::Origin)
            }
            _ => Err(OverlayError::ItemNotFound(*id)),
        }
    }

    async fn ensure_placed(&self, scope: &OverlayScope) -> Result<usize, OverlayError> {
        let origin_id = self.origin_of(scope).await?;
        let origin = self.requests.list_key_values(&origin_id, scope.family).await?;
        self.place_unordered(scope, &origin).await
    }

    /// Give every origin row that has neither an order row nor a tombstone
    /// a place at the tail, keeping origin order. Returns how many were placed.
    async fn place_unordered(
        &self,
        scope: &OverlayScope,
        origin: &[KeyValue],
    ) -> Result<usize, OverlayError> {
        let order = sorted(self.overlay.list_order(scope).await?);
        let placed: HashSet<Id> = order
            .iter()
            .filter(|r| r.ref_kind == RefKind::Origin)
            .map(|r| r.ref_id)
            .collect();
        let tombstoned: HashSet<Id> = self
            .overlay
            .list_states(scope)
            .await?
            .into_iter()
            .filter(|s| s.suppressed)
            .map(|s| s.origin_id)
            .collect();

        let missing: Vec<Id> = origin
            .iter()
            .map(|kv| kv.id)
            .filter(|id| !placed.contains(id) && !tombstoned.contains(id))
            .collect();
        if missing.is_empty() {
            return Ok(0);
        }

        let revision = self.overlay.max_revision(scope).await? + 1;
        let mut last = order.last().map(|r| r.rank.clone());
        let mut rows = Vec::with_capacity(missing.len());
        for ref_id in missing {
            let rank = Rank::after(last.as_ref());
            last = Some(rank.clone());
            rows.push(OverlayOrderRow {
                ref_kind: RefKind::Origin,
                ref_id,
                rank,
                revision,
            });
        }
        self.overlay.append_orders(scope, &rows).await?;
        tracing::debug!(
            example_id = %scope.example_id,
            family = scope.family.as_str(),
            rows = rows.len(),
            "origin rows placed at overlay tail"
        );
        Ok(rows.len())
    }

    async fn tail_row(
        &self,
        scope: &OverlayScope,
        ref_kind: RefKind,
        ref_id: Id,
    ) -> Result<OverlayOrderRow, OverlayError> {
        self.ensure_placed(scope).await?;
        let order = sorted(self.overlay.list_order(scope).await?);
        let last = order.last().map(|r| &r.rank);
        Ok(OverlayOrderRow {
            ref_kind,
            ref_id,
            rank: Rank::after(last),
            revision: self.overlay.max_revision(scope).await? + 1,
        })
    }
}

/// Rank ascending; ties broken by the newer revision first, then id.
fn sorted(mut rows: Vec<OverlayOrderRow>) -> Vec<OverlayOrderRow> {
    rows.sort_by(|a, b| {
        a.rank
            .cmp(&b.rank)
            .then(b.revision.cmp(&a.revision))
            .then(a.ref_id.cmp(&b.ref_id))
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(rank: &str, revision: i64) -> OverlayOrderRow {
        OverlayOrderRow {
            ref_kind: RefKind::Origin,
            ref_id: Id::new(),
            rank: Rank::parse(rank).unwrap(),
            revision,
        }
    }

    #[test]
    fn test_sorted_by_rank_then_revision() {
        let a = row("V", 1);
        let b = row("F", 1);
        let c = row("V", 3);
        let out = sorted(vec![a.clone(), b.clone(), c.clone()]);
        assert_eq!(out[0].ref_id, b.ref_id);
        assert_eq!(out[1].ref_id, c.ref_id);
        assert_eq!(out[2].ref_id, a.ref_id);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(OverlayError::SelfMove.kind(), ErrorKind::InvalidArgument);
        assert_eq!(OverlayError::ItemNotFound(Id::new()).kind(), ErrorKind::NotFound);
        assert_eq!(
            OverlayError::NoOrigin(Id::new()).kind(),
            ErrorKind::FailedPrecondition
        );
    }
}
