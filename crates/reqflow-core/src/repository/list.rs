//! Generic reordering of linked-list families.

use reqflow_types::error::RepositoryError;
use reqflow_types::id::Id;
use reqflow_types::list::{ListScope, MovePosition};

/// Positional moves over any ordered family.
///
/// Each method reads the list, plans the pointer writes with
/// [`crate::ordering::ListPlanner`] and applies them in a single
/// transaction. Items outside `scope` are rejected, which also rejects
/// cross-owner moves.
pub trait ListRepository: Send + Sync {
    /// Item ids head to tail.
    fn ordered_ids(
        &self,
        scope: &ListScope,
    ) -> impl std::future::Future<Output = Result<Vec<Id>, RepositoryError>> + Send;

    /// Move `item` to index `position` of the resulting list.
    fn move_to(
        &self,
        scope: &ListScope,
        item: &Id,
        position: usize,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Place `item` immediately before or after `target`.
    fn move_relative(
        &self,
        scope: &ListScope,
        item: &Id,
        target: &Id,
        position: MovePosition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Re-link the whole list into the order given by `(item, position)` pairs.
    fn reorder(
        &self,
        scope: &ListScope,
        placements: &[(Id, usize)],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
