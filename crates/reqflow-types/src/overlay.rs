//! Rank-ordered overlay rows layered over an origin example's list.
//!
//! Per delta example and family, three tables cooperate:
//! - the order table ([`OverlayOrderRow`]) places origin refs and delta-only
//!   rows by [`Rank`];
//! - the state table ([`OverlayState`]) carries per-origin overrides and the
//!   suppressed tombstone;
//! - the delta table ([`OverlayDeltaRow`]) holds rows that exist only in the
//!   delta.

use serde::{Deserialize, Serialize};

use crate::id::Id;
use crate::rank::Rank;
use crate::request::{KeyValueFields, KeyValueOverrides, KvFamily};

/// What an order row points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RefKind {
    Origin,
    Delta,
}

impl RefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Origin => "ORIGIN",
            RefKind::Delta => "DELTA",
        }
    }
}

impl std::str::FromStr for RefKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ORIGIN" => Ok(RefKind::Origin),
            "DELTA" => Ok(RefKind::Delta),
            other => Err(format!("unknown ref kind '{other}'")),
        }
    }
}

/// Identifies one overlay: a delta example plus the family it reorders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OverlayScope {
    pub example_id: Id,
    pub family: KvFamily,
}

impl OverlayScope {
    pub fn new(example_id: Id, family: KvFamily) -> Self {
        Self { example_id, family }
    }
}

/// One row of the order table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayOrderRow {
    pub ref_kind: RefKind,
    pub ref_id: Id,
    pub rank: Rank,
    /// Monotonic per overlay; the higher revision wins for the same ref.
    pub revision: i64,
}

/// Per-origin override state. `suppressed` is the tombstone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayState {
    pub origin_id: Id,
    pub suppressed: bool,
    #[serde(default)]
    pub overrides: KeyValueOverrides,
}

impl OverlayState {
    pub fn new(origin_id: Id) -> Self {
        Self {
            origin_id,
            suppressed: false,
            overrides: KeyValueOverrides::default(),
        }
    }
}

/// A row that exists only in the delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayDeltaRow {
    pub id: Id,
    pub fields: KeyValueFields,
}

/// Where a merged row's values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemSource {
    /// Origin row, untouched (every present override equals the origin value).
    Origin,
    /// Origin row with at least one effective override.
    Mixed,
    /// Row that exists only in the delta.
    Delta,
}

impl ItemSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemSource::Origin => "ORIGIN",
            ItemSource::Mixed => "MIXED",
            ItemSource::Delta => "DELTA",
        }
    }
}

/// One row of a merged overlay view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedItem {
    pub id: Id,
    pub fields: KeyValueFields,
    pub source: ItemSource,
    /// The untouched origin values, for origin-backed rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<KeyValueFields>,
}

/// The merged assertion view, classified the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedAssertion {
    pub id: Id,
    pub expression: String,
    pub enabled: bool,
    pub source: ItemSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_kind_round_trips_through_text() {
        for kind in [RefKind::Origin, RefKind::Delta] {
            assert_eq!(kind.as_str().parse::<RefKind>().unwrap(), kind);
        }
        assert!("origin".parse::<RefKind>().is_err());
    }

    #[test]
    fn merged_item_serializes_source_in_caps() {
        let item = MergedItem {
            id: Id::new(),
            fields: KeyValueFields::new("H1", "ct/xml"),
            source: ItemSource::Mixed,
            origin: None,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["source"], "MIXED");
        assert!(json.get("origin").is_none());
    }
}
