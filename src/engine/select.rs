use serde_json::{Map, Value};

use super::projection::Projection;
use crate::authz::{evaluate, evaluate_static, RuleScope};
use crate::context::RequestContext;
use crate::errors::{AclError, AclResult};
use crate::policy::{Access, PolicySchema};

/// Fields of `schema` the caller may touch under `access`.
///
/// Name-only rules are decided first; function rules are awaited one after
/// another in field order.
pub async fn allowed_fields(
    ctx: &RequestContext,
    schema: &PolicySchema,
    access: Access,
    doc_permissions: Option<&Value>,
) -> Vec<String> {
    let scope = RuleScope::global(ctx.permissions()).with_doc(doc_permissions, schema.doc_permission_prefix());
    let rules = schema.field_rules();
    let index = schema.field_index();
    let mut fields = Vec::with_capacity(rules.len());

    for field in &index.static_fields {
        let allowed = rules
            .get(field)
            .and_then(|rule| rule.resolve(access))
            .and_then(|rule| evaluate_static(rule, &scope))
            .unwrap_or(false);
        if allowed {
            fields.push(field.clone());
        }
    }

    for field in &index.dynamic_fields {
        let Some(rule) = rules.get(field).and_then(|rule| rule.resolve(access)) else {
            continue;
        };
        if evaluate(rule, &scope).await {
            fields.push(field.clone());
        }
    }

    fields.sort_unstable();
    tracing::debug!(
        entity = %schema.name(),
        access = %access,
        allowed = fields.len(),
        "field rules evaluated"
    );
    fields
}

fn target_schema<'a>(
    ctx: &'a RequestContext,
    entity: &str,
    sub_path: Option<&str>,
) -> AclResult<(&'a PolicySchema, &'a PolicySchema)> {
    let schema = ctx.schema(entity)?;
    let target = schema
        .resolve_path(sub_path)
        .ok_or_else(|| AclError::not_found(format!("`{entity}` has no sub-collection `{}`", sub_path.unwrap_or(""))))?;
    Ok((schema, target))
}

/// The projection handed to storage for `entity` under `access`.
///
/// The caller's projection can only narrow the policy allow-list. Mandatory
/// fields are appended for top-level selections.
pub async fn select_fields(
    ctx: &RequestContext,
    entity: &str,
    access: Access,
    projection: Option<&Projection>,
    sub_path: Option<&str>,
    doc_permissions: Option<&Value>,
) -> AclResult<Vec<String>> {
    let (schema, target) = target_schema(ctx, entity, sub_path)?;
    let allowed = allowed_fields(ctx, target, access, doc_permissions).await;

    let mut selected = match projection {
        Some(projection) => projection.reconcile(allowed),
        None => allowed,
    };

    if sub_path.is_none() {
        for field in schema.mandatory_fields(access) {
            if !selected.contains(field) {
                selected.push(field.clone());
            }
        }
    }

    Ok(selected)
}

/// Storage projection for a read or list, fixed before any record's doc
/// permissions are known: the declared fields the projection keeps, plus
/// mandatory fields. Each fetched record is narrowed with [`select_fields`]
/// once its doc permissions are computed.
pub fn fetch_fields(
    ctx: &RequestContext,
    entity: &str,
    access: Access,
    projection: Option<&Projection>,
) -> AclResult<Vec<String>> {
    let schema = ctx.schema(entity)?;
    let declared: Vec<String> = schema.field_rules().keys().cloned().collect();

    let mut fields = match projection {
        Some(projection) => projection.reconcile(declared),
        None => declared,
    };
    for field in schema.mandatory_fields(access) {
        if !fields.contains(field) {
            fields.push(field.clone());
        }
    }
    Ok(fields)
}

/// Every field a write under `access` may carry.
pub async fn gen_allowed_fields(
    ctx: &RequestContext,
    entity: &str,
    access: Access,
    doc_permissions: Option<&Value>,
    sub_path: Option<&str>,
) -> AclResult<Vec<String>> {
    let (_, target) = target_schema(ctx, entity, sub_path)?;
    Ok(allowed_fields(ctx, target, access, doc_permissions).await)
}

/// Keep only the top-level keys of `data` named in `fields`.
pub fn pick_allowed(data: &Value, fields: &[String]) -> Value {
    let Value::Object(map) = data else {
        return Value::Object(Map::new());
    };

    Value::Object(
        map.iter()
            .filter(|(key, _)| fields.iter().any(|field| field == *key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    )
}
