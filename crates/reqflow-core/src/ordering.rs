//! Linked-list planner for every ordered family.
//!
//! Storage keeps order as `prev`/`next` pointers on the rows themselves. The
//! planner reads a list's current links, applies positional operations to
//! the logical sequence and then reports only the rows whose pointers
//! changed. Adapters write that plan inside one transaction, so readers
//! never observe a half-linked list.
//!
//! Invariants checked on load:
//! 1. exactly one head (`prev == None`) and one tail (`next == None`);
//! 2. following `next` from the head visits every row exactly once;
//! 3. `a.next == b` implies `b.prev == a`.

use std::collections::{HashMap, HashSet};

use reqflow_types::error::{ErrorKind, RepositoryError};
use reqflow_types::id::Id;
use reqflow_types::list::{LinkNode, MovePosition};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ListError {
    /// Stored links violate the list invariants.
    #[error("list is corrupt: {0}")]
    Corrupt(String),

    #[error("item {0} is not in this list")]
    NotInList(Id),

    #[error("item {0} is already in this list")]
    AlreadyInList(Id),

    #[error("position {position} is outside [0, {max}]")]
    PositionOutOfRange { position: usize, max: usize },

    #[error("cannot move an item relative to itself")]
    SelfMove,

    #[error("batch order is not a permutation of the list: {0}")]
    NotPermutation(String),
}

impl ListError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ListError::Corrupt(_) => ErrorKind::FailedPrecondition,
            ListError::NotInList(_) => ErrorKind::NotFound,
            ListError::AlreadyInList(_)
            | ListError::PositionOutOfRange { .. }
            | ListError::SelfMove
            | ListError::NotPermutation(_) => ErrorKind::InvalidArgument,
        }
    }
}

impl From<ListError> for RepositoryError {
    fn from(err: ListError) -> Self {
        match err.kind() {
            ErrorKind::NotFound => RepositoryError::NotFound,
            ErrorKind::InvalidArgument => RepositoryError::InvalidArgument(err.to_string()),
            _ => RepositoryError::FailedPrecondition(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Chain ordering
// ---------------------------------------------------------------------------

/// Order link rows head to tail, validating the list invariants.
pub fn order_chain(nodes: &[LinkNode]) -> Result<Vec<Id>, ListError> {
    if nodes.is_empty() {
        return Ok(Vec::new());
    }

    let by_id: HashMap<Id, &LinkNode> = nodes.iter().map(|n| (n.id, n)).collect();
    if by_id.len() != nodes.len() {
        return Err(ListError::Corrupt("duplicate row id".to_string()));
    }

    let mut heads = nodes.iter().filter(|n| n.prev.is_none());
    let head = heads
        .next()
        .ok_or_else(|| ListError::Corrupt("no head".to_string()))?;
    if heads.next().is_some() {
        return Err(ListError::Corrupt("more than one head".to_string()));
    }

    let mut order = Vec::with_capacity(nodes.len());
    let mut seen = HashSet::with_capacity(nodes.len());
    let mut current = Some(head);
    let mut prev: Option<Id> = None;

    while let Some(node) = current {
        if !seen.insert(node.id) {
            return Err(ListError::Corrupt(format!("cycle at {}", node.id)));
        }
        if node.prev != prev {
            return Err(ListError::Corrupt(format!(
                "back pointer of {} does not match its predecessor",
                node.id
            )));
        }
        order.push(node.id);
        prev = Some(node.id);
        current = match node.next {
            Some(next) => Some(by_id.get(&next).copied().ok_or_else(|| {
                ListError::Corrupt(format!("{} points at missing row {}", node.id, next))
            })?),
            None => None,
        };
    }

    if order.len() != nodes.len() {
        return Err(ListError::Corrupt(format!(
            "{} of {} rows reachable from head",
            order.len(),
            nodes.len()
        )));
    }
    Ok(order)
}

/// Sort arbitrary rows by their links.
pub fn sort_linked<T>(rows: Vec<T>, link: impl Fn(&T) -> LinkNode) -> Result<Vec<T>, ListError> {
    let links: Vec<LinkNode> = rows.iter().map(&link).collect();
    let order = order_chain(&links)?;
    let mut by_id: HashMap<Id, T> = rows.into_iter().map(|r| (link(&r).id, r)).collect();
    Ok(order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect())
}

// ---------------------------------------------------------------------------
// ListPlanner
// ---------------------------------------------------------------------------

/// Positional edits over one list, yielding the minimal set of link writes.
#[derive(Debug, Clone)]
pub struct ListPlanner {
    original: HashMap<Id, (Option<Id>, Option<Id>)>,
    order: Vec<Id>,
    removed: Vec<Id>,
}

impl ListPlanner {
    /// Load a list from its stored links.
    pub fn from_links(nodes: &[LinkNode]) -> Result<Self, ListError> {
        let order = order_chain(nodes)?;
        let original = nodes.iter().map(|n| (n.id, (n.prev, n.next))).collect();
        Ok(Self {
            original,
            order,
            removed: Vec::new(),
        })
    }

    /// The logical sequence after the edits so far.
    pub fn order(&self) -> &[Id] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn position(&self, id: Id) -> Option<usize> {
        self.order.iter().position(|x| *x == id)
    }

    fn require(&self, id: Id) -> Result<usize, ListError> {
        self.position(id).ok_or(ListError::NotInList(id))
    }

    /// Link a new item after the current tail.
    pub fn append(&mut self, id: Id) -> Result<(), ListError> {
        let len = self.order.len();
        self.insert_at(id, len)
    }

    /// Link a new item at `position` in `[0, len]`.
    pub fn insert_at(&mut self, id: Id, position: usize) -> Result<(), ListError> {
        if self.position(id).is_some() {
            return Err(ListError::AlreadyInList(id));
        }
        if position > self.order.len() {
            return Err(ListError::PositionOutOfRange {
                position,
                max: self.order.len(),
            });
        }
        self.order.insert(position, id);
        self.removed.retain(|r| *r != id);
        Ok(())
    }

    /// Unlink an item, handing head/tail roles to its neighbours.
    pub fn remove(&mut self, id: Id) -> Result<(), ListError> {
        let idx = self.require(id)?;
        self.order.remove(idx);
        self.removed.push(id);
        Ok(())
    }

    /// Move an item so it ends up at index `position` of the resulting list.
    ///
    /// Returns `false` when the item is already there.
    pub fn move_to(&mut self, id: Id, position: usize) -> Result<bool, ListError> {
        let idx = self.require(id)?;
        let max = self.order.len() - 1;
        if position > max {
            return Err(ListError::PositionOutOfRange { position, max });
        }
        if idx == position {
            return Ok(false);
        }
        self.order.remove(idx);
        self.order.insert(position, id);
        Ok(true)
    }

    /// Make `id` the immediate predecessor or successor of `target`.
    pub fn move_relative(
        &mut self,
        id: Id,
        target: Id,
        position: MovePosition,
    ) -> Result<bool, ListError> {
        if id == target {
            return Err(ListError::SelfMove);
        }
        let idx = self.require(id)?;
        self.require(target)?;

        let before = self.order.clone();
        self.order.remove(idx);
        // Target index after the removal.
        let t = self
            .order
            .iter()
            .position(|x| *x == target)
            .ok_or(ListError::NotInList(target))?;
        let at = match position {
            MovePosition::Before => t,
            MovePosition::After => t + 1,
        };
        self.order.insert(at, id);
        Ok(self.order != before)
    }

    /// Re-link the whole list into the order given by `(item, position)` pairs.
    ///
    /// Every current item must appear exactly once and the positions must be
    /// a permutation of `0..len`.
    pub fn reorder(&mut self, placements: &[(Id, usize)]) -> Result<(), ListError> {
        let len = self.order.len();
        if placements.len() != len {
            return Err(ListError::NotPermutation(format!(
                "{} placements for {} items",
                placements.len(),
                len
            )));
        }
        let members: HashSet<Id> = self.order.iter().copied().collect();
        let mut slots: Vec<Option<Id>> = vec![None; len];
        for (id, pos) in placements {
            if !members.contains(id) {
                return Err(ListError::NotInList(*id));
            }
            let slot = slots.get_mut(*pos).ok_or_else(|| {
                ListError::NotPermutation(format!("position {pos} out of range"))
            })?;
            if slot.is_some() {
                return Err(ListError::NotPermutation(format!(
                    "position {pos} used twice"
                )));
            }
            *slot = Some(*id);
        }
        let order: Vec<Id> = slots.into_iter().flatten().collect();
        let distinct: HashSet<&Id> = order.iter().collect();
        if distinct.len() != len {
            return Err(ListError::NotPermutation("item placed twice".to_string()));
        }
        self.order = order;
        Ok(())
    }

    /// The link rows that differ from storage, including unlinked removals.
    pub fn plan(&self) -> Vec<LinkNode> {
        let mut updates = Vec::new();
        for (i, id) in self.order.iter().enumerate() {
            let prev = if i == 0 { None } else { Some(self.order[i - 1]) };
            let next = self.order.get(i + 1).copied();
            if self.original.get(id) != Some(&(prev, next)) {
                updates.push(LinkNode { id: *id, prev, next });
            }
        }
        for id in &self.removed {
            if self.original.get(id) != Some(&(None, None)) {
                updates.push(LinkNode {
                    id: *id,
                    prev: None,
                    next: None,
                });
            }
        }
        updates
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(ids: &[Id]) -> Vec<LinkNode> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| LinkNode {
                id: *id,
                prev: if i == 0 { None } else { Some(ids[i - 1]) },
                next: ids.get(i + 1).copied(),
            })
            .collect()
    }

    fn ids(n: usize) -> Vec<Id> {
        (0..n).map(|_| Id::new()).collect()
    }

    /// Apply a plan to a link set, as an adapter would.
    fn apply(mut nodes: Vec<LinkNode>, plan: &[LinkNode]) -> Vec<LinkNode> {
        for update in plan {
            match nodes.iter_mut().find(|n| n.id == update.id) {
                Some(n) => *n = *update,
                None => nodes.push(*update),
            }
        }
        nodes
    }

    #[test]
    fn test_order_chain_from_shuffled_rows() {
        let ids = ids(4);
        let mut nodes = chain(&ids);
        nodes.reverse();
        assert_eq!(order_chain(&nodes).unwrap(), ids);
        assert!(order_chain(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_order_chain_rejects_two_heads() {
        let ids = ids(2);
        let nodes = vec![
            LinkNode { id: ids[0], prev: None, next: None },
            LinkNode { id: ids[1], prev: None, next: None },
        ];
        assert!(matches!(order_chain(&nodes), Err(ListError::Corrupt(_))));
    }

    #[test]
    fn test_order_chain_rejects_unreachable_rows() {
        let ids = ids(3);
        let nodes = vec![
            LinkNode { id: ids[0], prev: None, next: None },
            LinkNode { id: ids[1], prev: Some(ids[2]), next: Some(ids[2]) },
            LinkNode { id: ids[2], prev: Some(ids[1]), next: Some(ids[1]) },
        ];
        let err = order_chain(&nodes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedPrecondition);
    }

    #[test]
    fn test_append_to_empty_list() {
        let id = Id::new();
        let mut planner = ListPlanner::from_links(&[]).unwrap();
        planner.append(id).unwrap();
        assert_eq!(
            planner.plan(),
            vec![LinkNode { id, prev: None, next: None }]
        );
    }

    #[test]
    fn test_append_touches_only_old_tail_and_new_item() {
        let ids = ids(3);
        let new = Id::new();
        let mut planner = ListPlanner::from_links(&chain(&ids)).unwrap();
        planner.append(new).unwrap();
        let plan = planner.plan();
        assert_eq!(plan.len(), 2);
        assert!(plan.contains(&LinkNode { id: ids[2], prev: Some(ids[1]), next: Some(new) }));
        assert!(plan.contains(&LinkNode { id: new, prev: Some(ids[2]), next: None }));
    }

    #[test]
    fn test_insert_in_middle_writes_at_most_four_rows() {
        let ids = ids(5);
        let new = Id::new();
        let mut planner = ListPlanner::from_links(&chain(&ids)).unwrap();
        planner.insert_at(new, 2).unwrap();
        assert!(planner.plan().len() <= 4);
        let after = apply(chain(&ids), &planner.plan());
        assert_eq!(
            order_chain(&after).unwrap(),
            vec![ids[0], ids[1], new, ids[2], ids[3], ids[4]]
        );
    }

    #[test]
    fn test_insert_out_of_range_is_invalid() {
        let ids = ids(2);
        let mut planner = ListPlanner::from_links(&chain(&ids)).unwrap();
        let err = planner.insert_at(Id::new(), 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_remove_head_transfers_role() {
        let ids = ids(3);
        let mut planner = ListPlanner::from_links(&chain(&ids)).unwrap();
        planner.remove(ids[0]).unwrap();
        let plan = planner.plan();
        assert!(plan.contains(&LinkNode { id: ids[1], prev: None, next: Some(ids[2]) }));
        assert!(plan.contains(&LinkNode { id: ids[0], prev: None, next: None }));

        let remaining: Vec<LinkNode> = apply(chain(&ids), &plan)
            .into_iter()
            .filter(|n| n.id != ids[0])
            .collect();
        assert_eq!(order_chain(&remaining).unwrap(), vec![ids[1], ids[2]]);
    }

    #[test]
    fn test_single_element_move_bounds() {
        let id = Id::new();
        let mut planner = ListPlanner::from_links(&chain(&[id])).unwrap();
        assert!(!planner.move_to(id, 0).unwrap());
        assert!(planner.plan().is_empty());
        assert!(matches!(
            planner.move_to(id, 1),
            Err(ListError::PositionOutOfRange { position: 1, max: 0 })
        ));
    }

    #[test]
    fn test_move_to_preserves_membership() {
        let ids = ids(4);
        let mut planner = ListPlanner::from_links(&chain(&ids)).unwrap();
        assert!(planner.move_to(ids[0], 3).unwrap());
        let after = apply(chain(&ids), &planner.plan());
        assert_eq!(
            order_chain(&after).unwrap(),
            vec![ids[1], ids[2], ids[3], ids[0]]
        );
    }

    #[test]
    fn test_move_relative_before_and_after() {
        let ids = ids(3);
        let (a, b, c) = (ids[0], ids[1], ids[2]);
        let mut planner = ListPlanner::from_links(&chain(&ids)).unwrap();
        planner.move_relative(a, b, MovePosition::After).unwrap();
        assert_eq!(planner.order(), &[b, a, c]);
        planner.move_relative(c, b, MovePosition::Before).unwrap();
        assert_eq!(planner.order(), &[c, b, a]);

        let after = apply(chain(&ids), &planner.plan());
        assert_eq!(order_chain(&after).unwrap(), vec![c, b, a]);
    }

    #[test]
    fn test_move_relative_rejects_self_and_missing() {
        let ids = ids(2);
        let mut planner = ListPlanner::from_links(&chain(&ids)).unwrap();
        assert!(matches!(
            planner.move_relative(ids[0], ids[0], MovePosition::After),
            Err(ListError::SelfMove)
        ));
        assert!(matches!(
            planner.move_relative(ids[0], Id::new(), MovePosition::After),
            Err(ListError::NotInList(_))
        ));
        assert_eq!(planner.order(), ids.as_slice());
    }

    #[test]
    fn test_move_then_restore_returns_original_order() {
        let ids = ids(3);
        let mut planner = ListPlanner::from_links(&chain(&ids)).unwrap();
        planner.move_relative(ids[0], ids[2], MovePosition::After).unwrap();
        planner.move_relative(ids[0], ids[1], MovePosition::Before).unwrap();
        assert_eq!(planner.order(), ids.as_slice());
        assert!(planner.plan().is_empty());
    }

    #[test]
    fn test_reorder_requires_permutation() {
        let ids = ids(3);
        let mut planner = ListPlanner::from_links(&chain(&ids)).unwrap();
        let dup = [(ids[0], 0), (ids[1], 0), (ids[2], 2)];
        assert!(matches!(planner.reorder(&dup), Err(ListError::NotPermutation(_))));
        let foreign = [(ids[0], 0), (ids[1], 1), (Id::new(), 2)];
        assert!(matches!(planner.reorder(&foreign), Err(ListError::NotInList(_))));

        planner
            .reorder(&[(ids[2], 0), (ids[0], 1), (ids[1], 2)])
            .unwrap();
        assert_eq!(planner.order(), &[ids[2], ids[0], ids[1]]);
    }

    #[test]
    fn test_sort_linked_orders_rows() {
        let ids = ids(3);
        let mut rows: Vec<(LinkNode, &str)> = chain(&ids)
            .into_iter()
            .zip(["a", "b", "c"])
            .collect();
        rows.swap(0, 2);
        let sorted = sort_linked(rows, |r| r.0).unwrap();
        let names: Vec<&str> = sorted.iter().map(|r| r.1).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
