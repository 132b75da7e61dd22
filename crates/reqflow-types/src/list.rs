//! Ordered-list addressing shared by every linked-list family.
//!
//! Rows of an ordered family carry `prev`/`next` pointers inside their owner.
//! A [`ListScope`] names one such list: the family plus the owning entity.

use serde::{Deserialize, Serialize};

use crate::id::Id;

/// Every family of rows kept as a doubly linked list inside an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListFamily {
    /// Request headers, owned by an example.
    Header,
    /// URL search params, owned by an example.
    SearchParam,
    /// Multipart form fields, owned by an example.
    BodyForm,
    /// URL-encoded body fields, owned by an example.
    BodyUrlencoded,
    /// Assertions, owned by an example.
    Assertion,
    /// Collections, owned by a workspace.
    Collection,
    /// Flow variables, owned by a flow.
    FlowVariable,
    /// Environment variables, owned by an environment.
    EnvironmentVariable,
}

impl ListFamily {
    pub const ALL: [ListFamily; 8] = [
        ListFamily::Header,
        ListFamily::SearchParam,
        ListFamily::BodyForm,
        ListFamily::BodyUrlencoded,
        ListFamily::Assertion,
        ListFamily::Collection,
        ListFamily::FlowVariable,
        ListFamily::EnvironmentVariable,
    ];

    /// Human-readable name used in log fields and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ListFamily::Header => "header",
            ListFamily::SearchParam => "search_param",
            ListFamily::BodyForm => "body_form",
            ListFamily::BodyUrlencoded => "body_urlencoded",
            ListFamily::Assertion => "assertion",
            ListFamily::Collection => "collection",
            ListFamily::FlowVariable => "flow_variable",
            ListFamily::EnvironmentVariable => "environment_variable",
        }
    }
}

/// One concrete list: a family inside one owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListScope {
    pub family: ListFamily,
    pub owner_id: Id,
}

impl ListScope {
    pub fn new(family: ListFamily, owner_id: Id) -> Self {
        Self { family, owner_id }
    }
}

/// The link fields of one list row, as read from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkNode {
    pub id: Id,
    pub prev: Option<Id>,
    pub next: Option<Id>,
}

/// Relative placement for a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovePosition {
    Before,
    After,
}

impl std::str::FromStr for MovePosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before" => Ok(MovePosition::Before),
            "after" => Ok(MovePosition::After),
            other => Err(format!("invalid position '{other}', expected before or after")),
        }
    }
}
