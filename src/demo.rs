//! Sample policies and records served by the binaries.
//!
//! - `users`: email visible to admins and to the user themself, role admin-only
//! - `posts`: drafts hidden from non-admins, editors may publish, comments
//!   as a sub-collection
//! - `audits`: admin-only, referenced from posts

use std::sync::Arc;

use serde_json::{json, Value};

use crate::authz::AccessRule;
use crate::errors::AclResult;
use crate::policy::{
    base_filter, hook, validator, Access, BaseFilterFn, FieldRule, Hook, PolicyRegistry, PolicySchema, Validation,
};
use crate::store::{MemoryStore, StoreError};

fn is_self() -> Arc<dyn Hook> {
    hook(|doc, _, mctx| {
        let me = mctx.caller_record.as_ref().and_then(|record| record.get("_id"));
        Ok(json!({ "isSelf": me.is_some() && me == doc.get("_id") }))
    })
}

fn is_author() -> Arc<dyn Hook> {
    hook(|doc, _, mctx| {
        let me = mctx.caller_record.as_ref().and_then(|record| record.get("_id"));
        Ok(json!({ "isAuthor": me.is_some() && me == doc.get("author") }))
    })
}

fn users() -> PolicySchema {
    PolicySchema::new("users")
        .with_doc_permission_prefix("doc:")
        .with_field("name", true)
        .with_field(
            "email",
            FieldRule::new()
                .on(Access::Create, true)
                .on(Access::Read, AccessRule::any(["isAdmin", "doc:isSelf"]))
                .on(Access::List, AccessRule::any(["isAdmin", "doc:isSelf"]))
                .on(Access::Update, "doc:isSelf"),
        )
        .with_field("role", "isAdmin")
        .with_route_guard(Access::Create, "isAdmin")
        .with_base_filter(Access::Delete, base_filter(|perms| json!(perms.has("isAdmin"))))
        .with_doc_permissions(Access::Read, is_self())
        .with_doc_permissions(Access::List, is_self())
        .with_doc_permissions(Access::Update, is_self())
}

fn comments() -> PolicySchema {
    PolicySchema::new("comments")
        .with_field("text", true)
        .with_field("author", FieldRule::new().on(Access::Read, true).on(Access::Create, true))
        .with_field("flagged", FieldRule::new().on(Access::Read, "isAdmin").on(Access::Update, "isAdmin"))
        .with_validate(
            Access::Create,
            validator(|data, _, _| {
                let blank = data.get("text").and_then(Value::as_str).map_or(true, |text| text.trim().is_empty());
                Validation::from(!blank)
            }),
        )
}

fn visible_posts() -> Arc<dyn BaseFilterFn> {
    base_filter(|perms| {
        if perms.has("isAdmin") {
            json!(true)
        } else {
            json!({ "published": true })
        }
    })
}

fn posts() -> PolicySchema {
    PolicySchema::new("posts")
        .with_doc_permission_prefix("doc:")
        .with_field("title", true)
        .with_field(
            "body",
            FieldRule::all(true).on(Access::Update, AccessRule::any(["isEditor", "doc:isAuthor"])),
        )
        .with_field("author", FieldRule::new().on(Access::Read, true).on(Access::List, true).on(Access::Create, true))
        .with_field(
            "published",
            FieldRule::all("isEditor|isAdmin").on(Access::Read, true).on(Access::List, true),
        )
        .with_field("audit", FieldRule::new().on(Access::Read, "isAdmin").on(Access::Create, "isAdmin"))
        .with_field("tags", true)
        .with_field(
            "comments",
            FieldRule::new().on(Access::Read, true).on(Access::Update, true),
        )
        .with_relation("author", "users")
        .with_relation("audit", "audits")
        .with_sub_collection("comments", comments())
        .with_base_filter(Access::Read, visible_posts())
        .with_base_filter(Access::List, visible_posts())
        .with_base_filter(Access::Count, visible_posts())
        .with_base_filter(Access::Distinct, visible_posts())
        .with_base_filter(
            Access::Update,
            base_filter(|perms| {
                if perms.has_any(["isAdmin", "isEditor"]) {
                    json!(true)
                } else {
                    json!({ "published": true })
                }
            }),
        )
        .with_base_filter(Access::Delete, base_filter(|perms| json!(perms.has("isAdmin"))))
        .with_doc_permissions(Access::Read, is_author())
        .with_doc_permissions(Access::List, is_author())
        .with_doc_permissions(Access::Update, is_author())
        .with_validate(
            Access::Create,
            validator(|data, _, _| match data.get("title").and_then(Value::as_str) {
                Some(title) if !title.trim().is_empty() => Validation::Valid,
                _ => Validation::Invalid(vec![json!({ "field": "title", "message": "title is required" })]),
            }),
        )
        .with_prepare(
            Access::Create,
            hook(|mut data, _, _| {
                if data.get("published").is_none() {
                    data["published"] = json!(false);
                }
                Ok(data)
            }),
        )
        .with_decorate(
            Access::Read,
            hook(|mut doc, _, _| {
                let words = doc.get("body").and_then(Value::as_str).map_or(0, |body| body.split_whitespace().count());
                doc["wordCount"] = json!(words);
                Ok(doc)
            }),
        )
        .with_mandatory_fields(Access::List, ["published"])
        .with_max_limit(50)
}

fn audits() -> PolicySchema {
    PolicySchema::new("audits")
        .with_field("note", true)
        .with_base_filter(Access::Read, base_filter(|perms| json!(perms.has("isAdmin"))))
        .with_base_filter(Access::List, base_filter(|perms| json!(perms.has("isAdmin"))))
}

pub fn registry() -> AclResult<PolicyRegistry> {
    PolicyRegistry::new()
        .with(users())?
        .with(posts())?
        .with(audits())
}

/// Load a small fixed data set with stable identifiers.
pub async fn seed(store: &MemoryStore) -> Result<(), StoreError> {
    store
        .insert_many(
            "users",
            vec![
                json!({ "_id": "u-ada", "name": "Ada", "email": "ada@example.com", "role": "admin" }),
                json!({ "_id": "u-bob", "name": "Bob", "email": "bob@example.com", "role": "writer" }),
            ],
        )
        .await?;
    store
        .insert_many("audits", vec![json!({ "_id": "a-1", "note": "imported from legacy system" })])
        .await?;
    store
        .insert_many(
            "posts",
            vec![
                json!({
                    "_id": "p-1",
                    "title": "Hello",
                    "body": "first post here",
                    "author": "u-ada",
                    "published": true,
                    "audit": "a-1",
                    "tags": ["intro"],
                    "comments": [
                        { "_id": "c-1", "text": "welcome", "author": "u-bob", "flagged": false }
                    ]
                }),
                json!({
                    "_id": "p-2",
                    "title": "Draft",
                    "body": "not yet",
                    "author": "u-bob",
                    "published": false,
                    "tags": ["wip"],
                    "comments": []
                }),
            ],
        )
        .await?;
    Ok(())
}
