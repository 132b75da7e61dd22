//! Pure merge of a base example with its delta.
//!
//! Nothing here touches storage. Given the content of a base example and,
//! optionally, the content of a delta example, [`resolve`] produces the
//! runtime view a request node sends:
//!
//! - scalars: each present endpoint override replaces the base field;
//! - key/value families: delta rows with a `delta_parent_id` override the
//!   matching base row in place (unmatched overrides are ignored), rows
//!   without one are appended in delta order;
//! - raw body: non-empty delta bytes, content type and compression win;
//! - assertions: both sides are put in linked-list order first, then merged
//!   the same way as key/value rows.

use std::collections::HashMap;

use reqflow_types::execution::CompressionKind;
use reqflow_types::id::Id;
use reqflow_types::list::LinkNode;
use reqflow_types::request::{
    Assertion, BodyRaw, Endpoint, EndpointOverrides, Example, KeyValue, KeyValueOverrides,
    KvFamily,
};
use serde::{Deserialize, Serialize};

use crate::ordering::{ListError, sort_linked};

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// Everything stored for one example.
#[derive(Debug, Clone)]
pub struct ExampleContent {
    pub endpoint: Endpoint,
    pub example: Example,
    /// All key/value families, each in list order.
    pub key_values: Vec<KeyValue>,
    pub body_raw: Option<BodyRaw>,
    /// Any order; the resolver sorts by links.
    pub assertions: Vec<Assertion>,
}

impl ExampleContent {
    pub fn family(&self, family: KvFamily) -> Vec<KeyValue> {
        self.key_values
            .iter()
            .filter(|kv| kv.family == family)
            .cloned()
            .collect()
    }
}

/// A fully materialised request, ready for variable substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRequest {
    pub endpoint: Endpoint,
    pub example_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta_example_id: Option<Id>,
    pub headers: Vec<KeyValue>,
    pub search_params: Vec<KeyValue>,
    pub body_form: Vec<KeyValue>,
    pub body_urlencoded: Vec<KeyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_raw: Option<BodyRaw>,
    pub assertions: Vec<Assertion>,
}

impl ResolvedRequest {
    pub fn family(&self, family: KvFamily) -> &[KeyValue] {
        match family {
            KvFamily::Header => &self.headers,
            KvFamily::SearchParam => &self.search_params,
            KvFamily::BodyForm => &self.body_form,
            KvFamily::BodyUrlencoded => &self.body_urlencoded,
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Merge `base` with an optional `delta`.
pub fn resolve(
    base: ExampleContent,
    delta: Option<ExampleContent>,
) -> Result<ResolvedRequest, ListError> {
    let empty = Vec::new();
    let family = |f: KvFamily| -> (Vec<KeyValue>, Vec<KeyValue>) {
        (
            base.family(f),
            delta.as_ref().map(|d| d.family(f)).unwrap_or_else(|| empty.clone()),
        )
    };

    let (h_base, h_delta) = family(KvFamily::Header);
    let (q_base, q_delta) = family(KvFamily::SearchParam);
    let (f_base, f_delta) = family(KvFamily::BodyForm);
    let (u_base, u_delta) = family(KvFamily::BodyUrlencoded);

    let assertions = resolve_assertions(
        base.assertions.clone(),
        delta
            .as_ref()
            .map(|d| d.assertions.clone())
            .unwrap_or_default(),
    )?;

    Ok(ResolvedRequest {
        endpoint: resolve_scalar(&base.endpoint, delta.as_ref().map(|d| &d.endpoint)),
        example_id: base.example.id,
        delta_example_id: delta.as_ref().map(|d| d.example.id),
        headers: resolve_collection(&h_base, &h_delta),
        search_params: resolve_collection(&q_base, &q_delta),
        body_form: resolve_collection(&f_base, &f_delta),
        body_urlencoded: resolve_collection(&u_base, &u_delta),
        body_raw: resolve_raw(
            base.body_raw.as_ref(),
            delta.as_ref().and_then(|d| d.body_raw.as_ref()),
        ),
        assertions,
    })
}

/// Apply the delta endpoint's present overrides to the base endpoint.
pub fn resolve_scalar(base: &Endpoint, delta: Option<&Endpoint>) -> Endpoint {
    let mut out = base.clone();
    if let Some(d) = delta {
        let ov = &d.overrides;
        if let Some(name) = &ov.name {
            out.name = name.clone();
        }
        if let Some(url) = &ov.url {
            out.url = url.clone();
        }
        if let Some(method) = &ov.method {
            out.method = method.clone();
        }
        if let Some(description) = &ov.description {
            out.description = description.clone();
        }
        if let Some(kind) = ov.body_kind {
            out.body_kind = kind;
        }
    }
    out.overrides = EndpointOverrides::default();
    out.delta_parent_id = None;
    out
}

/// Merge one key/value family. `base` and `delta` must be in list order.
pub fn resolve_collection(base: &[KeyValue], delta: &[KeyValue]) -> Vec<KeyValue> {
    let mut overrides: HashMap<Id, &KeyValue> = HashMap::new();
    let mut additions = Vec::new();
    for row in delta {
        match row.delta_parent_id {
            Some(parent) => {
                overrides.insert(parent, row);
            }
            None => additions.push(row),
        }
    }

    let mut out: Vec<KeyValue> = base
        .iter()
        .map(|b| {
            let mut merged = b.clone();
            if let Some(o) = overrides.get(&b.id) {
                let fields = o.overrides.apply(&b.fields());
                merged.key = fields.key;
                merged.value = fields.value;
                merged.description = fields.description;
                merged.enabled = fields.enabled;
            }
            merged.overrides = KeyValueOverrides::default();
            merged.delta_parent_id = None;
            merged
        })
        .collect();

    out.extend(additions.into_iter().map(|a| {
        let mut added = a.clone();
        added.overrides = KeyValueOverrides::default();
        added
    }));
    relink(&mut out, |kv| (&mut kv.prev, &mut kv.next), |kv| kv.id);
    out
}

/// Overlay non-empty delta bytes, content type and compression on the base body.
pub fn resolve_raw(base: Option<&BodyRaw>, delta: Option<&BodyRaw>) -> Option<BodyRaw> {
    let mut out = match (base, delta) {
        (Some(b), _) => b.clone(),
        (None, Some(d)) => BodyRaw::new(d.example_id, Vec::new()),
        (None, None) => return None,
    };

    if let Some(d) = delta {
        if !d.data.is_empty() {
            out.data = d.data.clone();
            out.compression = d.compression;
        }
        if let Some(ct) = &d.content_type {
            out.content_type = Some(ct.clone());
        }
        if let Some(code) = d.delta_compression {
            match CompressionKind::from_code(code) {
                Some(kind) => out.compression = kind,
                None => tracing::warn!(
                    example_id = %d.example_id,
                    code,
                    "ignoring unsupported compression override"
                ),
            }
        }
    }
    out.delta_compression = None;
    Some(out)
}

/// Merge assertions after putting both sides in linked-list order.
pub fn resolve_assertions(
    base: Vec<Assertion>,
    delta: Vec<Assertion>,
) -> Result<Vec<Assertion>, ListError> {
    let base = sort_linked(base, assertion_link)?;
    let delta = sort_linked(delta, assertion_link)?;

    let mut overrides: HashMap<Id, Assertion> = HashMap::new();
    let mut additions = Vec::new();
    for row in delta {
        match row.delta_parent_id {
            Some(parent) => {
                overrides.insert(parent, row);
            }
            None => additions.push(row),
        }
    }

    let mut out: Vec<Assertion> = base
        .into_iter()
        .map(|mut b| {
            if let Some(o) = overrides.get(&b.id) {
                b.expression = o.expression.clone();
                b.enabled = o.enabled;
            }
            b.delta_parent_id = None;
            b
        })
        .collect();
    out.extend(additions);
    relink(&mut out, |a| (&mut a.prev, &mut a.next), |a| a.id);
    Ok(out)
}

pub(crate) fn assertion_link(a: &Assertion) -> LinkNode {
    LinkNode {
        id: a.id,
        prev: a.prev,
        next: a.next,
    }
}

/// Rewrite prev/next so they describe the merged order.
fn relink<T>(
    rows: &mut [T],
    links: impl Fn(&mut T) -> (&mut Option<Id>, &mut Option<Id>),
    id: impl Fn(&T) -> Id,
) {
    let ids: Vec<Id> = rows.iter().map(&id).collect();
    for (i, row) in rows.iter_mut().enumerate() {
        let (prev, next) = links(row);
        *prev = if i == 0 { None } else { Some(ids[i - 1]) };
        *next = ids.get(i + 1).copied();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
