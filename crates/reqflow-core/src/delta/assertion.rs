//! Assertion-delta service.
//!
//! Edits to an origin assertion are written through to every delta copy so
//! a running variant sees the new expression. Two kinds of copy exist:
//!
//! - version-parent deltas link their copy with `delta_parent_id`;
//! - "default" deltas hold legacy copies with no pointer, found by
//!   structural sameness (expression, enabled flag, neighbour ids).
//!
//! Each edit is planned from a read of the current rows, then written as
//! one [`AssertionCascade`] so the origin and its copies change together.

use std::collections::{HashMap, HashSet};

use reqflow_types::id::Id;
use reqflow_types::overlay::{ItemSource, MergedAssertion};
use reqflow_types::request::{Assertion, AssertionCascade};

use super::DeltaError;
use super::resolver::assertion_link;
use crate::ordering::sort_linked;
use crate::repository::request::RequestRepository;

/// Service that keeps delta assertions consistent with their origin.
pub struct AssertionDeltaService<R: RequestRepository> {
    repo: R,
}

impl<R: RequestRepository> AssertionDeltaService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Merge the origin's assertions with a delta's, classifying each row.
    pub async fn load_effective(
        &self,
        origin_id: &Id,
        delta_id: Option<&Id>,
    ) -> Result<Vec<MergedAssertion>, DeltaError> {
        let origin = sort_linked(self.repo.list_assertions(origin_id).await?, assertion_link)?;
        let delta = match delta_id {
            Some(id) => sort_linked(self.repo.list_assertions(id).await?, assertion_link)?,
            None => Vec::new(),
        };

        let mut overrides: HashMap<Id, &Assertion> = HashMap::new();
        let mut additions = Vec::new();
        for row in &delta {
            match row.delta_parent_id {
                Some(parent) => {
                    overrides.insert(parent, row);
                }
                None => additions.push(row),
            }
        }

        let mut merged: Vec<MergedAssertion> = origin
            .iter()
            .map(|o| match overrides.get(&o.id) {
                Some(d) => {
                    let touched = d.expression != o.expression || d.enabled != o.enabled;
                    MergedAssertion {
                        id: o.id,
                        expression: d.expression.clone(),
                        enabled: d.enabled,
                        source: if touched {
                            ItemSource::Mixed
                        } else {
                            ItemSource::Origin
                        },
                    }
                }
                None => MergedAssertion {
                    id: o.id,
                    expression: o.expression.clone(),
                    enabled: o.enabled,
                    source: ItemSource::Origin,
                },
            })
            .collect();

        merged.extend(additions.into_iter().map(|a| MergedAssertion {
            id: a.id,
            expression: a.expression.clone(),
            enabled: a.enabled,
            source: ItemSource::Delta,
        }));
        Ok(merged)
    }

    /// Version-parent deltas of `origin_id`.
    pub async fn version_deltas(&self, origin_id: &Id) -> Result<Vec<Id>, DeltaError> {
        let deltas = self.repo.list_delta_examples(origin_id).await?;
        Ok(deltas.into_iter().map(|e| e.id).collect())
    }

    /// Update an origin assertion and cascade the change to its copies.
    ///
    /// Returns the updated origin row.
    pub async fn apply_update(
        &self,
        origin_id: &Id,
        delta_ids: &[Id],
        assertion_id: &Id,
        expression: &str,
        enabled: bool,
    ) -> Result<Assertion, DeltaError> {
        let (updated, cascade) = self
            .plan_update(origin_id, delta_ids, assertion_id, expression, enabled)
            .await?;
        self.repo.apply_assertion_cascade(&cascade).await?;

        tracing::info!(
            assertion_id = %assertion_id,
            copies = cascade.copy_count(),
            "assertion update propagated"
        );
        Ok(updated)
    }

    /// Delete an origin assertion together with all of its copies.
    pub async fn apply_delete(
        &self,
        origin_id: &Id,
        delta_ids: &[Id],
        assertion_id: &Id,
    ) -> Result<(), DeltaError> {
        let cascade = self.plan_delete(origin_id, delta_ids, assertion_id).await?;
        self.repo.apply_assertion_cascade(&cascade).await?;
        tracing::info!(
            assertion_id = %assertion_id,
            copies = cascade.copy_count(),
            "assertion deleted"
        );
        Ok(())
    }

    async fn plan_update(
        &self,
        origin_id: &Id,
        delta_ids: &[Id],
        assertion_id: &Id,
        expression: &str,
        enabled: bool,
    ) -> Result<(Assertion, AssertionCascade), DeltaError> {
        let before = self.origin_row(origin_id, assertion_id).await?;
        let rewrite = |row: &Assertion| Assertion {
            expression: expression.to_string(),
            enabled,
            ..row.clone()
        };

        let mut visited: HashSet<Id> = HashSet::new();
        let mut copies = Vec::new();
        let mut created = Vec::new();
        for delta_id in delta_ids {
            let example = self
                .repo
                .get_example(delta_id)
                .await?
                .ok_or(DeltaError::NotFound {
                    entity: "example",
                    id: *delta_id,
                })?;
            let rows = self.repo.list_assertions(delta_id).await?;

            if example.is_version_delta() {
                let linked: Vec<&Assertion> = rows
                    .iter()
                    .filter(|r| r.delta_parent_id == Some(*assertion_id))
                    .collect();
                if linked.is_empty() {
                    let mut copy = Assertion::new(*delta_id, expression, enabled);
                    copy.delta_parent_id = Some(*assertion_id);
                    visited.insert(copy.id);
                    tracing::debug!(
                        delta_id = %delta_id,
                        assertion_id = %copy.id,
                        "planning delta copy of origin assertion"
                    );
                    created.push(copy);
                } else {
                    for row in linked {
                        if visited.insert(row.id) {
                            copies.push(rewrite(row));
                        }
                    }
                }
            } else {
                for row in rows.iter().filter(|r| r.is_same_as(&before)) {
                    if visited.insert(row.id) {
                        copies.push(rewrite(row));
                    }
                }
            }
        }

        // Linked copies in examples not listed.
        for row in self.repo.list_assertions_by_parent(assertion_id).await? {
            if visited.insert(row.id) {
                copies.push(rewrite(&row));
            }
        }

        let updated = rewrite(&before);
        let cascade = AssertionCascade::Update {
            base: updated.clone(),
            copies,
            created,
        };
        Ok((updated, cascade))
    }

    async fn plan_delete(
        &self,
        origin_id: &Id,
        delta_ids: &[Id],
        assertion_id: &Id,
    ) -> Result<AssertionCascade, DeltaError> {
        let before = self.origin_row(origin_id, assertion_id).await?;

        let mut seen: HashSet<Id> = HashSet::new();
        let mut copies = Vec::new();
        for delta_id in delta_ids {
            let example = self.repo.get_example(delta_id).await?;
            let is_default = example.as_ref().is_some_and(|e| !e.is_version_delta());
            for row in self.repo.list_assertions(delta_id).await? {
                let linked = row.delta_parent_id == Some(*assertion_id);
                if (linked || (is_default && row.is_same_as(&before))) && seen.insert(row.id) {
                    copies.push(row.id);
                }
            }
        }
        for row in self.repo.list_assertions_by_parent(assertion_id).await? {
            if seen.insert(row.id) {
                copies.push(row.id);
            }
        }

        Ok(AssertionCascade::Delete {
            base: *assertion_id,
            copies,
        })
    }

    async fn origin_row(&self, origin_id: &Id, assertion_id: &Id) -> Result<Assertion, DeltaError> {
        let row = self
            .repo
            .get_assertion(assertion_id)
            .await?
            .ok_or(DeltaError::NotFound {
                entity: "assertion",
                id: *assertion_id,
            })?;
        if row.example_id != *origin_id {
            return Err(DeltaError::OriginMismatch {
                assertion_id: *assertion_id,
                example_id: *origin_id,
            });
        }
        Ok(row)
    }
}
