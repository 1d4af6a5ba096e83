use serde_json::{json, Map, Value};

use super::filter::{compose_filter, conjoin, doc_filter, is_empty_filter, ComposedFilter};
use super::select::{gen_allowed_fields, select_fields};
use crate::context::{MiddlewareContext, RequestContext};
use crate::errors::AclResult;
use crate::policy::{Access, PolicySchema};
use crate::store::Store;

pub const VIEW_KEY: &str = "_view";
pub const EDIT_KEY: &str = "_edit";

/// Placeholder written when permission computation is skipped on purpose.
/// Clients tell it apart from `{}`, which means nothing is granted.
pub fn empty_permissions() -> Value {
    json!({ VIEW_KEY: { "$": "_" }, EDIT_KEY: { "$": "_" } })
}

fn set_field(doc: &mut Value, field: &str, value: Value) {
    if let Value::Object(map) = doc {
        map.insert(field.to_string(), value);
    }
}

fn field_map(fields: &[String]) -> Value {
    Value::Object(fields.iter().map(|field| (field.clone(), Value::Bool(true))).collect())
}

/// Run the schema's docPermissions hook for `access`.
///
/// Hook failures and non-object results count as "no permissions".
pub async fn compute_doc_permissions(
    ctx: &RequestContext,
    schema: &PolicySchema,
    doc: &Value,
    access: Access,
    mctx: &mut MiddlewareContext,
) -> Value {
    let Some(hook) = schema.doc_permissions_hook(access) else {
        return Value::Object(Map::new());
    };

    match hook.call(doc.clone(), ctx.permissions(), mctx).await {
        Ok(value @ Value::Object(_)) => value,
        Ok(_) => Value::Object(Map::new()),
        Err(err) => {
            tracing::warn!(
                entity = %schema.name(),
                access = %access,
                error = %err,
                "doc permissions hook failed; treating as none"
            );
            Value::Object(Map::new())
        }
    }
}

/// Attach the doc-level permission object at the schema's permission field.
pub async fn annotate_doc(
    ctx: &RequestContext,
    entity: &str,
    mut doc: Value,
    access: Access,
    mctx: &mut MiddlewareContext,
) -> AclResult<Value> {
    let schema = ctx.schema(entity)?;
    let permissions = compute_doc_permissions(ctx, schema, &doc, access, mctx).await;
    mctx.doc_permissions = permissions.clone();
    set_field(&mut doc, ctx.permission_field(schema), permissions);
    Ok(doc)
}

async fn reachable(
    ctx: &RequestContext,
    store: &dyn Store,
    schema: &PolicySchema,
    doc: &Value,
    access: Access,
    op: Access,
) -> AclResult<bool> {
    if access == op {
        return Ok(true);
    }

    match compose_filter(ctx, schema.name(), op, None).await? {
        ComposedFilter::Deny => Ok(false),
        ComposedFilter::Filter(filter) if is_empty_filter(&filter) => Ok(true),
        ComposedFilter::Filter(filter) => {
            let Some(this_doc) = doc_filter(schema, doc) else {
                return Ok(false);
            };
            Ok(store.exists(schema.name(), &conjoin(filter, this_doc)).await?)
        }
    }
}

/// Add `_view` / `_edit` field maps to the doc's permission object.
///
/// A map stays empty when the record is not reachable under that operation.
pub async fn annotate_field_permissions(
    ctx: &RequestContext,
    store: &dyn Store,
    entity: &str,
    mut doc: Value,
    access: Access,
    mctx: &MiddlewareContext,
) -> AclResult<Value> {
    let schema = ctx.schema(entity)?;
    let permission_field = ctx.permission_field(schema);

    let doc_permissions = match doc.get(permission_field) {
        Some(value @ Value::Object(_)) => value.clone(),
        _ => mctx.doc_permissions.clone(),
    };

    let (can_read, can_update) = tokio::try_join!(
        reachable(ctx, store, schema, &doc, access, Access::Read),
        reachable(ctx, store, schema, &doc, access, Access::Update),
    )?;

    let view = if can_read {
        select_fields(ctx, entity, Access::Read, None, None, Some(&doc_permissions)).await?
    } else {
        Vec::new()
    };
    let edit = if can_update {
        gen_allowed_fields(ctx, entity, Access::Update, Some(&doc_permissions), None).await?
    } else {
        Vec::new()
    };

    let mut permissions = match doc_permissions {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    permissions.insert(VIEW_KEY.to_string(), field_map(&view));
    permissions.insert(EDIT_KEY.to_string(), field_map(&edit));
    set_field(&mut doc, permission_field, Value::Object(permissions));
    Ok(doc)
}

/// Write the sentinel instead of computing anything.
pub fn add_empty_permissions(ctx: &RequestContext, schema: &PolicySchema, doc: &mut Value) {
    set_field(doc, ctx.permission_field(schema), empty_permissions());
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::authz::{Caller, PermissionSet};
    use crate::config::EngineConfig;
    use crate::policy::{base_filter, hook, FieldRule, PolicyRegistry};
    use crate::store::MemoryStore;

    fn context(grants: &[&str]) -> RequestContext {
        let notes = PolicySchema::new("notes")
            .with_field("title", true)
            .with_field("body", FieldRule::new().on(Access::Read, true).on(Access::Update, "isEditor"))
            .with_field("owner", FieldRule::new().on(Access::Read, true))
            .with_doc_permission_prefix("doc:")
            .with_field("pinned", FieldRule::new().on(Access::Update, "doc:isOwner"))
            .with_doc_permissions(
                Access::Read,
                hook(|doc, perms, _| {
                    let me = perms.granted().join(",");
                    Ok(json!({ "isOwner": doc["owner"] == json!(me) }))
                }),
            )
            .with_doc_permissions(Access::List, hook(|_, _, _| anyhow::bail!("directory offline")))
            .with_base_filter(
                Access::Update,
                base_filter(|perms| {
                    if perms.has("isEditor") {
                        json!(true)
                    } else {
                        json!({ "locked": false })
                    }
                }),
            );
        let registry = PolicyRegistry::new().with(notes).unwrap();

        RequestContext::new(
            Arc::new(registry),
            Arc::new(EngineConfig::default()),
            Caller::new(PermissionSet::from_names(grants.iter().copied())),
        )
    }

    #[tokio::test]
    async fn test_doc_permission_hook_error_is_swallowed() {
        let ctx = context(&[]);
        let mut mctx = MiddlewareContext::new("notes", Access::List);
        let doc = annotate_doc(&ctx, "notes", json!({ "_id": "1" }), Access::List, &mut mctx)
            .await
            .unwrap();

        assert_eq!(doc["_permissions"], json!({}));
        assert_eq!(mctx.doc_permissions, json!({}));
    }

    #[tokio::test]
    async fn test_no_update_rights_yields_empty_edit_map() {
        let ctx = context(&[]);
        let store = MemoryStore::new();
        let doc = store
            .create("notes", json!({ "title": "t", "locked": true, "owner": "bob" }))
            .await
            .unwrap();

        let mut mctx = MiddlewareContext::new("notes", Access::Read);
        let doc = annotate_doc(&ctx, "notes", doc, Access::Read, &mut mctx).await.unwrap();
        let doc = annotate_field_permissions(&ctx, &store, "notes", doc, Access::Read, &mctx)
            .await
            .unwrap();

        let permissions = &doc["_permissions"];
        assert_eq!(permissions[EDIT_KEY], json!({}));
        assert_eq!(permissions[VIEW_KEY], json!({ "body": true, "owner": true, "title": true }));
        assert_eq!(permissions["isOwner"], json!(false));
    }

    #[tokio::test]
    async fn test_edit_map_uses_doc_permissions() {
        let ctx = context(&["bob"]);
        let store = MemoryStore::new();
        let doc = store
            .create("notes", json!({ "title": "t", "locked": false, "owner": "bob" }))
            .await
            .unwrap();

        let mut mctx = MiddlewareContext::new("notes", Access::Read);
        let doc = annotate_doc(&ctx, "notes", doc, Access::Read, &mut mctx).await.unwrap();
        let doc = annotate_field_permissions(&ctx, &store, "notes", doc, Access::Read, &mctx)
            .await
            .unwrap();

        assert_eq!(doc["_permissions"][EDIT_KEY], json!({ "pinned": true, "title": true }));
    }

    #[test]
    fn test_sentinel_is_exact() {
        let ctx = context(&[]);
        let schema = ctx.schema("notes").unwrap();
        let mut doc = json!({ "_id": "1" });
        add_empty_permissions(&ctx, schema, &mut doc);

        assert_eq!(
            doc["_permissions"],
            json!({ "_view": { "$": "_" }, "_edit": { "$": "_" } })
        );
        assert_ne!(doc["_permissions"], json!({}));
    }
}
