//! Request templates and their content families.
//!
//! An [`Endpoint`] is the HTTP request template; an [`Example`] is a concrete
//! parametrised variant of it. Examples own the content families: key/value
//! rows (headers, search params, form and urlencoded body fields), a raw body
//! and assertions. A delta example varies another example (its version
//! parent) through override fields and `delta_parent_id` pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::CompressionKind;
use crate::id::Id;
use crate::list::ListFamily;

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

/// Which body representation a request sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyKind {
    #[default]
    None,
    Raw,
    FormData,
    Urlencoded,
}

impl BodyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyKind::None => "none",
            BodyKind::Raw => "raw",
            BodyKind::FormData => "form_data",
            BodyKind::Urlencoded => "urlencoded",
        }
    }
}

impl std::str::FromStr for BodyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(BodyKind::None),
            "raw" => Ok(BodyKind::Raw),
            "form_data" => Ok(BodyKind::FormData),
            "urlencoded" => Ok(BodyKind::Urlencoded),
            other => Err(format!("unknown body kind '{other}'")),
        }
    }
}

/// Per-field scalar overrides carried by a delta endpoint. `None` = inherit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_kind: Option<BodyKind>,
}

impl EndpointOverrides {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.url.is_none()
            && self.method.is_none()
            && self.description.is_none()
            && self.body_kind.is_none()
    }
}

/// An HTTP request template inside a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: Id,
    pub collection_id: Id,
    pub name: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub body_kind: BodyKind,
    /// Set on delta endpoints: the endpoint this one overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_parent_id: Option<Id>,
    #[serde(default)]
    pub overrides: EndpointOverrides,
}

impl Endpoint {
    pub fn is_delta(&self) -> bool {
        self.delta_parent_id.is_some()
    }
}

// ---------------------------------------------------------------------------
// Example
// ---------------------------------------------------------------------------

/// A concrete variant of an endpoint holding the request content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub id: Id,
    pub endpoint_id: Id,
    pub name: String,
    /// The endpoint's default example. Legacy default copies are matched
    /// structurally rather than through `delta_parent_id`.
    pub is_default: bool,
    /// Set on delta variants: the example this one varies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_parent: Option<Id>,
    pub created_at: DateTime<Utc>,
}

impl Example {
    /// Whether this example is a version-parent delta (linked by pointer).
    pub fn is_version_delta(&self) -> bool {
        self.version_parent.is_some()
    }
}

// ---------------------------------------------------------------------------
// Key/value families
// ---------------------------------------------------------------------------

/// The four key/value content families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KvFamily {
    Header,
    SearchParam,
    BodyForm,
    BodyUrlencoded,
}

impl KvFamily {
    pub const ALL: [KvFamily; 4] = [
        KvFamily::Header,
        KvFamily::SearchParam,
        KvFamily::BodyForm,
        KvFamily::BodyUrlencoded,
    ];

    pub fn list_family(&self) -> ListFamily {
        match self {
            KvFamily::Header => ListFamily::Header,
            KvFamily::SearchParam => ListFamily::SearchParam,
            KvFamily::BodyForm => ListFamily::BodyForm,
            KvFamily::BodyUrlencoded => ListFamily::BodyUrlencoded,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.list_family().as_str()
    }
}

impl std::str::FromStr for KvFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KvFamily::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown key/value family '{s}'"))
    }
}

/// Plain values of a key/value row, without identity or links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueFields {
    pub key: String,
    pub value: String,
    pub description: String,
    pub enabled: bool,
}

impl KeyValueFields {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            description: String::new(),
            enabled: true,
        }
    }

    /// Empty, enabled values (used when resetting a row).
    pub fn blank() -> Self {
        Self::new("", "")
    }
}

/// Nullable override fields on a delta row. `None` = track the origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl KeyValueOverrides {
    pub fn is_empty(&self) -> bool {
        self.key.is_none()
            && self.value.is_none()
            && self.description.is_none()
            && self.enabled.is_none()
    }

    /// Apply every present override onto `base`.
    pub fn apply(&self, base: &KeyValueFields) -> KeyValueFields {
        KeyValueFields {
            key: self.key.clone().unwrap_or_else(|| base.key.clone()),
            value: self.value.clone().unwrap_or_else(|| base.value.clone()),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| base.description.clone()),
            enabled: self.enabled.unwrap_or(base.enabled),
        }
    }

    /// Whether every present override equals the corresponding base value.
    pub fn matches(&self, base: &KeyValueFields) -> bool {
        self.key.as_ref().is_none_or(|k| *k == base.key)
            && self.value.as_ref().is_none_or(|v| *v == base.value)
            && self
                .description
                .as_ref()
                .is_none_or(|d| *d == base.description)
            && self.enabled.is_none_or(|e| e == base.enabled)
    }
}

/// One row of a key/value family (header, search param, form or urlencoded field).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub id: Id,
    pub example_id: Id,
    pub family: KvFamily,
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub description: String,
    pub enabled: bool,
    /// On delta rows: the base row this row overrides.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_parent_id: Option<Id>,
    #[serde(default)]
    pub overrides: KeyValueOverrides,
    #[serde(default)]
    pub prev: Option<Id>,
    #[serde(default)]
    pub next: Option<Id>,
}

impl KeyValue {
    /// A fresh, unlinked row with the given values.
    pub fn new(example_id: Id, family: KvFamily, fields: KeyValueFields) -> Self {
        Self {
            id: Id::new(),
            example_id,
            family,
            key: fields.key,
            value: fields.value,
            description: fields.description,
            enabled: fields.enabled,
            delta_parent_id: None,
            overrides: KeyValueOverrides::default(),
            prev: None,
            next: None,
        }
    }

    pub fn fields(&self) -> KeyValueFields {
        KeyValueFields {
            key: self.key.clone(),
            value: self.value.clone(),
            description: self.description.clone(),
            enabled: self.enabled,
        }
    }

    /// The row's own values with its override fields applied.
    pub fn effective(&self) -> KeyValueFields {
        self.overrides.apply(&self.fields())
    }
}

// ---------------------------------------------------------------------------
// Raw body
// ---------------------------------------------------------------------------

/// The singleton raw body of an example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyRaw {
    pub example_id: Id,
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub compression: CompressionKind,
    /// On delta rows: raw codec code overriding the base compression.
    /// Codes that do not name a known codec are ignored at resolution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_compression: Option<i64>,
}

impl BodyRaw {
    pub fn new(example_id: Id, data: impl Into<Vec<u8>>) -> Self {
        Self {
            example_id,
            data: data.into(),
            content_type: None,
            compression: CompressionKind::None,
            delta_compression: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Assertions
// ---------------------------------------------------------------------------

/// A boolean expression checked against the response of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    pub id: Id,
    pub example_id: Id,
    pub expression: String,
    pub enabled: bool,
    /// On delta rows: the origin assertion this row tracks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_parent_id: Option<Id>,
    #[serde(default)]
    pub prev: Option<Id>,
    #[serde(default)]
    pub next: Option<Id>,
}

impl Assertion {
    pub fn new(example_id: Id, expression: impl Into<String>, enabled: bool) -> Self {
        Self {
            id: Id::new(),
            example_id,
            expression: expression.into(),
            enabled,
            delta_parent_id: None,
            prev: None,
            next: None,
        }
    }

    /// Structural sameness used to find legacy default copies of an origin row:
    /// same expression, enable flag and neighbour ids.
    pub fn is_same_as(&self, other: &Assertion) -> bool {
        self.expression == other.expression
            && self.enabled == other.enabled
            && self.prev == other.prev
            && self.next == other.next
    }
}

/// Every row touched by one origin assertion edit, applied as a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum AssertionCascade {
    /// Write the base row, rewrite existing copies and insert new linked
    /// copies at the tail of their example.
    Update {
        base: Assertion,
        copies: Vec<Assertion>,
        created: Vec<Assertion>,
    },
    /// Delete the copies, then the base row.
    Delete { base: Id, copies: Vec<Id> },
}

impl AssertionCascade {
    /// Number of delta rows the cascade writes besides the base.
    pub fn copy_count(&self) -> usize {
        match self {
            AssertionCascade::Update { copies, created, .. } => copies.len() + created.len(),
            AssertionCascade::Delete { copies, .. } => copies.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_names_parse() {
        for family in KvFamily::ALL {
            assert_eq!(family.as_str().parse::<KvFamily>(), Ok(family));
        }
        assert!("assertion".parse::<KvFamily>().is_err());
    }

    #[test]
    fn overrides_apply_only_present_fields() {
        let base = KeyValueFields::new("Content-Type", "application/json");
        let ov = KeyValueOverrides {
            value: Some("application/xml".into()),
            ..Default::default()
        };
        let merged = ov.apply(&base);
        assert_eq!(merged.key, "Content-Type");
        assert_eq!(merged.value, "application/xml");
        assert!(merged.enabled);
        assert!(!ov.matches(&base));
    }

    #[test]
    fn overrides_equal_to_base_match() {
        let base = KeyValueFields::new("a", "1");
        let ov = KeyValueOverrides {
            key: Some("a".into()),
            enabled: Some(true),
            ..Default::default()
        };
        assert!(ov.matches(&base));
        assert!(KeyValueOverrides::default().is_empty());
        assert!(!ov.is_empty());
    }

    #[test]
    fn body_kind_parses() {
        assert_eq!("raw".parse::<BodyKind>().unwrap(), BodyKind::Raw);
        assert!("xml".parse::<BodyKind>().is_err());
        assert_eq!(BodyKind::FormData.as_str(), "form_data");
    }

    #[test]
    fn assertion_sameness_includes_neighbours() {
        let ex = Id::new();
        let a = Assertion::new(ex, "response.status == 200", true);
        let mut b = Assertion::new(Id::new(), "response.status == 200", true);
        assert!(a.is_same_as(&b));
        b.prev = Some(Id::new());
        assert!(!a.is_same_as(&b));
    }
}
