use async_recursion::async_recursion;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::filter::{compose_filter, is_empty_filter, ComposedFilter};
use super::projection::Projection;
use super::select::select_fields;
use crate::context::RequestContext;
use crate::errors::{AclError, AclResult};
use crate::policy::Access;

/// One requested join before policy resolution.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct PopulateEntry {
    pub path: String,
    #[serde(default)]
    pub select: Option<Value>,
    #[serde(default)]
    pub access: Option<Access>,
    #[serde(default)]
    pub populate: Option<Value>,
}

impl PopulateEntry {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }
}

/// A join the storage collaborator may perform, already narrowed to what the
/// caller may see of the referenced entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PopulateDescriptor {
    pub path: String,
    /// Referenced entity.
    pub model: String,
    pub access: Access,
    pub select: Vec<String>,
    /// Condition joined records must satisfy; `None` means unrestricted.
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_filter: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub populate: Vec<PopulateDescriptor>,
}

/// Normalise `"a b"`, `["a", {"path": "b"}]` or `{"path": "a"}`.
pub fn parse_populate(spec: &Value) -> AclResult<Vec<PopulateEntry>> {
    match spec {
        Value::Null => Ok(Vec::new()),
        Value::String(paths) => Ok(paths.split_whitespace().map(PopulateEntry::path).collect()),
        Value::Array(items) => {
            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                entries.extend(parse_populate(item)?);
            }
            Ok(entries)
        }
        Value::Object(_) => {
            let entry: PopulateEntry = serde_json::from_value(spec.clone())
                .map_err(|err| AclError::bad_request(format!("invalid populate entry: {err}")))?;
            Ok(vec![entry])
        }
        _ => Err(AclError::bad_request("populate must be a string, array or object")),
    }
}

/// Expand `spec` against `entity`'s relations, re-applying the referenced
/// entity's own field rules and base filter to every join.
///
/// Entries without a declared relation, or whose target is entirely denied,
/// are dropped.
#[async_recursion]
pub async fn resolve_populate<'a>(
    ctx: &'a RequestContext,
    entity: &'a str,
    access: Access,
    spec: Option<&'a Value>,
) -> AclResult<Vec<PopulateDescriptor>> {
    let Some(spec) = spec else {
        return Ok(Vec::new());
    };
    let schema = ctx.schema(entity)?;
    let mut descriptors = Vec::new();

    for entry in parse_populate(spec)? {
        let Some(model) = schema.relation(&entry.path) else {
            tracing::debug!(entity = %entity, path = %entry.path, "populate dropped: no relation");
            continue;
        };
        let access = entry.access.unwrap_or(access);

        let projection = entry.select.as_ref().map(Projection::parse).transpose()?.flatten();
        let select = select_fields(ctx, model, access, projection.as_ref(), None, None).await?;

        let match_filter = match compose_filter(ctx, model, access, None).await? {
            ComposedFilter::Deny => {
                tracing::debug!(entity = %entity, path = %entry.path, model = %model, "populate dropped: target denied");
                continue;
            }
            ComposedFilter::Filter(filter) if is_empty_filter(&filter) => None,
            ComposedFilter::Filter(filter) => Some(filter),
        };

        let nested = resolve_populate(ctx, model, access, entry.populate.as_ref()).await?;

        descriptors.push(PopulateDescriptor {
            path: entry.path,
            model: model.to_string(),
            access,
            populate: retain_selected(nested, &select),
            select,
            match_filter,
        });
    }

    Ok(descriptors)
}

/// Drop joins on fields that are not part of `selection`.
pub fn retain_selected(descriptors: Vec<PopulateDescriptor>, selection: &[String]) -> Vec<PopulateDescriptor> {
    descriptors
        .into_iter()
        .filter(|descriptor| {
            let head = descriptor.path.split('.').next().unwrap_or(&descriptor.path);
            selection
                .iter()
                .any(|field| field.split('.').next() == Some(head))
        })
        .collect()
}
