//! Overlay repository trait definition.
//!
//! Three tables per [`OverlayScope`]: order, state and delta. Methods that
//! touch more than one table run in one transaction.

use reqflow_types::error::RepositoryError;
use reqflow_types::id::Id;
use reqflow_types::overlay::{
    OverlayDeltaRow, OverlayOrderRow, OverlayScope, OverlayState, RefKind,
};

pub trait OverlayRepository: Send + Sync {
    /// Insert `rows` only if the order table for `scope` is empty.
    ///
    /// Returns `true` when the rows were inserted.
    fn seed(
        &self,
        scope: &OverlayScope,
        rows: &[OverlayOrderRow],
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Order rows by rank ascending.
    fn list_order(
        &self,
        scope: &OverlayScope,
    ) -> impl std::future::Future<Output = Result<Vec<OverlayOrderRow>, RepositoryError>> + Send;

    /// Highest revision in the order table (0 when empty).
    fn max_revision(
        &self,
        scope: &OverlayScope,
    ) -> impl std::future::Future<Output = Result<i64, RepositoryError>> + Send;

    /// Insert or re-rank an order row. A write with a revision not above the
    /// stored one for the same ref is ignored.
    fn upsert_order(
        &self,
        scope: &OverlayScope,
        row: &OverlayOrderRow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Insert or re-rank several order rows in one transaction.
    fn append_orders(
        &self,
        scope: &OverlayScope,
        rows: &[OverlayOrderRow],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_states(
        &self,
        scope: &OverlayScope,
    ) -> impl std::future::Future<Output = Result<Vec<OverlayState>, RepositoryError>> + Send;

    fn get_state(
        &self,
        scope: &OverlayScope,
        origin_id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<OverlayState>, RepositoryError>> + Send;

    fn upsert_state(
        &self,
        scope: &OverlayScope,
        state: &OverlayState,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn list_deltas(
        &self,
        scope: &OverlayScope,
    ) -> impl std::future::Future<Output = Result<Vec<OverlayDeltaRow>, RepositoryError>> + Send;

    fn get_delta(
        &self,
        scope: &OverlayScope,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<Option<OverlayDeltaRow>, RepositoryError>> + Send;

    /// Insert a delta-only row together with its order row.
    fn insert_delta(
        &self,
        scope: &OverlayScope,
        row: &OverlayDeltaRow,
        order: &OverlayOrderRow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn update_delta(
        &self,
        scope: &OverlayScope,
        row: &OverlayDeltaRow,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Remove a delta-only row and its order row.
    fn delete_delta(
        &self,
        scope: &OverlayScope,
        id: &Id,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Remove an origin ref from the order table and tombstone it.
    fn suppress_origin(
        &self,
        scope: &OverlayScope,
        origin_id: &Id,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Clear the tombstone of an origin ref, inserting `order` if given.
    fn restore_origin(
        &self,
        scope: &OverlayScope,
        origin_id: &Id,
        order: Option<&OverlayOrderRow>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Whether an order row exists for the ref.
    fn has_order(
        &self,
        scope: &OverlayScope,
        ref_kind: RefKind,
        ref_id: &Id,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
