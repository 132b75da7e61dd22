//! Workspace-level grouping: workspaces, collections and environments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::Id;

/// Top-level container owning collections, environments and flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Id,
    pub name: String,
    /// The environment whose variables apply to every run in this workspace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_env_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Id::new(),
            name: name.into(),
            global_env_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A named, ordered group of endpoints inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: Id,
    pub workspace_id: Id,
    pub name: String,
    #[serde(default)]
    pub prev: Option<Id>,
    #[serde(default)]
    pub next: Option<Id>,
}

/// A set of variables selectable at run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub id: Id,
    pub workspace_id: Id,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// The workspace-wide environment applied beneath any selected one.
    pub is_global: bool,
}

/// One environment variable. Ordered inside its environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub id: Id,
    pub env_id: Id,
    pub name: String,
    pub value: String,
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prev: Option<Id>,
    #[serde(default)]
    pub next: Option<Id>,
}
