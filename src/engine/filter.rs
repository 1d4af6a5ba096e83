use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::context::RequestContext;
use crate::errors::AclResult;
use crate::policy::{Access, PolicySchema};

/// What a policy's base filter says about one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Restriction {
    Unrestricted,
    Deny,
    Filter(Value),
}

impl From<Value> for Restriction {
    fn from(value: Value) -> Self {
        match value {
            Value::Bool(false) => Restriction::Deny,
            Value::Bool(true) => Restriction::Unrestricted,
            value if is_empty_filter(&value) => Restriction::Unrestricted,
            value => Restriction::Filter(value),
        }
    }
}

/// Result of composing the base filter with the caller's filter.
#[derive(Debug, Clone, PartialEq)]
pub enum ComposedFilter {
    /// Nothing may be touched.
    Deny,
    Filter(Value),
}

impl ComposedFilter {
    pub fn is_deny(&self) -> bool {
        matches!(self, ComposedFilter::Deny)
    }

    pub fn into_filter(self) -> Option<Value> {
        match self {
            ComposedFilter::Deny => None,
            ComposedFilter::Filter(filter) => Some(filter),
        }
    }

    /// Narrow further, e.g. to a single record.
    pub fn and(self, extra: Value) -> ComposedFilter {
        match self {
            ComposedFilter::Deny => ComposedFilter::Deny,
            ComposedFilter::Filter(filter) if is_empty_filter(&filter) => ComposedFilter::Filter(extra),
            ComposedFilter::Filter(filter) => ComposedFilter::Filter(conjoin(filter, extra)),
        }
    }
}

pub fn is_empty_filter(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

pub fn conjoin(left: Value, right: Value) -> Value {
    json!({ "and": [left, right] })
}

/// Per-request memo of base-filter results, keyed `entity:access`.
///
/// Only the policy's own restriction is stored, never a filter already
/// combined with caller input, so repeated compositions with different
/// caller filters stay independent.
#[derive(Debug, Default)]
pub struct RequestFilterCache {
    entries: Mutex<HashMap<String, Restriction>>,
}

impl RequestFilterCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(entity: &str, access: Access) -> String {
        format!("{entity}:{access}")
    }

    pub fn get(&self, entity: &str, access: Access) -> Option<Restriction> {
        self.entries.lock().get(&Self::key(entity, access)).cloned()
    }

    pub fn insert(&self, entity: &str, access: Access, restriction: Restriction) {
        self.entries.lock().insert(Self::key(entity, access), restriction);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Evaluate (or recall) the base filter of `schema` for `access`.
pub async fn base_restriction(
    ctx: &RequestContext,
    schema: &PolicySchema,
    access: Access,
) -> AclResult<Restriction> {
    let Some(base_filter) = schema.base_filter(access) else {
        return Ok(Restriction::Unrestricted);
    };

    if let Some(cached) = ctx.filter_cache().get(schema.name(), access) {
        tracing::debug!(entity = %schema.name(), access = %access, "base filter cache hit");
        return Ok(cached);
    }

    let restriction = Restriction::from(base_filter.base_filter(ctx.permissions()).await?);
    ctx.filter_cache().insert(schema.name(), access, restriction.clone());
    Ok(restriction)
}

/// Combine the policy's base filter for `access` with the caller's filter.
pub async fn compose_filter(
    ctx: &RequestContext,
    entity: &str,
    access: Access,
    caller_filter: Option<Value>,
) -> AclResult<ComposedFilter> {
    let schema = ctx.schema(entity)?;

    let caller_filter = match schema.override_filter(access) {
        Some(hook) => hook.override_filter(caller_filter, ctx.permissions()).await?,
        None => caller_filter,
    };
    let caller_filter = caller_filter.filter(|filter| !is_empty_filter(filter));

    let composed = match base_restriction(ctx, schema, access).await? {
        Restriction::Deny => {
            tracing::debug!(entity = %entity, access = %access, "base filter denies all");
            ComposedFilter::Deny
        }
        Restriction::Unrestricted => ComposedFilter::Filter(caller_filter.unwrap_or_else(|| json!({}))),
        Restriction::Filter(base) => match caller_filter {
            Some(caller) => ComposedFilter::Filter(conjoin(base, caller)),
            None => ComposedFilter::Filter(base),
        },
    };

    Ok(composed)
}

/// Filter matching the record addressed by `id`.
pub fn identifier_filter(schema: &PolicySchema, id: &str) -> Value {
    schema.identifier().filter(id)
}

/// Filter matching `doc` itself, from its identifier field.
///
/// A resolver identifier cannot be inverted from a record, so those entities
/// are matched on `_id`, which every stored record carries.
pub fn doc_filter(schema: &PolicySchema, doc: &Value) -> Option<Value> {
    let field = schema.identifier().field().unwrap_or("_id");
    let id = doc.get(field)?.clone();
    let mut map = serde_json::Map::new();
    map.insert(field.to_string(), id);
    Some(Value::Object(map))
}
