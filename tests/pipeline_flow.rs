use std::sync::Arc;

use anyhow::Result;
use serde_json::{json, Value};

use fieldguard::authz::{Caller, PermissionSet};
use fieldguard::config::EngineConfig;
use fieldguard::engine::{empty_permissions, resolve_populate, OperationPipeline, PageRequest, QueryOptions};
use fieldguard::policy::Access;
use fieldguard::store::{MemoryStore, Store};
use fieldguard::{demo, AclError};

async fn setup() -> Result<(OperationPipeline, MemoryStore)> {
    let store = MemoryStore::new();
    demo::seed(&store).await?;
    let pipeline = OperationPipeline::new(
        Arc::new(demo::registry()?),
        Arc::new(store.clone()),
        Arc::new(EngineConfig::default()),
    );
    Ok((pipeline, store))
}

fn anonymous() -> Caller {
    Caller::anonymous()
}

fn admin() -> Caller {
    Caller::new(PermissionSet::from_names(["isAdmin"])).with_record(json!({ "_id": "u-ada" }))
}

fn author(id: &str) -> Caller {
    Caller::anonymous().with_record(json!({ "_id": id }))
}

fn titles(rows: &[Value]) -> Vec<&str> {
    rows.iter().filter_map(|row| row["title"].as_str()).collect()
}

#[tokio::test]
async fn test_batch_create_rejects_whole_batch() -> Result<()> {
    let (pipeline, store) = setup().await?;
    let ctx = pipeline.context(anonymous());

    let err = pipeline
        .create(&ctx, "posts", json!([{ "title": "one" }, { "body": "no title" }, { "title": "three" }]))
        .await
        .unwrap_err();

    match err {
        AclError::BadRequest { errors, .. } => {
            assert_eq!(
                errors,
                vec![json!({
                    "index": 1,
                    "errors": [{ "field": "title", "message": "title is required" }]
                })]
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.all("posts").await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_batch_create_preserves_order() -> Result<()> {
    let (pipeline, store) = setup().await?;
    let ctx = pipeline.context(anonymous());

    let created = pipeline
        .create(&ctx, "posts", json!([{ "title": "one", "published": true }, { "title": "two" }]))
        .await?;
    let rows = created.as_array().cloned().unwrap_or_default();

    assert_eq!(titles(&rows), vec!["one", "two"]);
    // `published` needs isEditor on create; prepare defaults it.
    assert_eq!(rows[0]["published"], json!(false));
    assert!(rows[0].get("audit").is_none());
    assert_eq!(store.all("posts").await.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_list_applies_base_filter_and_annotates() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(anonymous());

    let result = pipeline.list(&ctx, "posts", &QueryOptions::new()).await?;
    assert_eq!(titles(&result.rows), vec!["Hello"]);

    let permissions = &result.rows[0]["_permissions"];
    assert_eq!(permissions["isAuthor"], json!(false));
    assert_eq!(
        permissions["_view"],
        json!({ "author": true, "body": true, "comments": true, "published": true, "tags": true, "title": true })
    );
    assert_eq!(permissions["_edit"], json!({ "comments": true, "tags": true, "title": true }));
    Ok(())
}

#[tokio::test]
async fn test_list_admin_sees_drafts_with_count_and_paging() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(admin());

    let options = QueryOptions::new().with_count().with_page(PageRequest::new().with_limit(1).with_page(2));
    let result = pipeline.list(&ctx, "posts", &options).await?;

    assert_eq!(result.count, Some(2));
    assert_eq!(result.rows.len(), 1);
    assert_eq!((result.skip, result.limit), (1, 1));
    Ok(())
}

#[tokio::test]
async fn test_list_limit_clamped_to_entity_maximum() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(admin());

    let options = QueryOptions::new().with_page(PageRequest::new().with_limit(500));
    let result = pipeline.list(&ctx, "posts", &options).await?;
    assert_eq!(result.limit, 50);
    Ok(())
}

#[tokio::test]
async fn test_list_without_permissions_writes_sentinel() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(anonymous());

    let result = pipeline.list(&ctx, "posts", &QueryOptions::new().without_permissions()).await?;
    assert_eq!(result.rows[0]["_permissions"], empty_permissions());
    assert_eq!(
        result.rows[0]["_permissions"],
        json!({ "_view": { "$": "_" }, "_edit": { "$": "_" } })
    );
    Ok(())
}

#[tokio::test]
async fn test_caller_filter_is_conjoined() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(anonymous());

    let options = QueryOptions::new().with_filter(json!({ "title": "Draft" }));
    let result = pipeline.list(&ctx, "posts", &options).await?;
    assert!(result.rows.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_populate_to_denied_entity_is_dropped() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(anonymous());

    let descriptors = resolve_populate(&ctx, "posts", Access::Read, Some(&json!("audit author"))).await?;
    let paths: Vec<&str> = descriptors.iter().map(|d| d.path.as_str()).collect();
    assert_eq!(paths, vec!["author"]);

    let admin_ctx = pipeline.context(admin());
    let descriptors = resolve_populate(&admin_ctx, "posts", Access::Read, Some(&json!("audit author"))).await?;
    assert_eq!(descriptors.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_read_populates_with_target_policy_and_decorates() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(anonymous());

    let options = QueryOptions::new().with_populate(json!("author"));
    let record = pipeline.read(&ctx, "posts", "p-1", &options).await?;

    assert_eq!(record["author"], json!({ "_id": "u-ada", "name": "Ada" }));
    assert_eq!(record["wordCount"], json!(3));
    assert!(record.get("audit").is_none());
    Ok(())
}

#[tokio::test]
async fn test_read_runs_copy_and_depopulate() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(anonymous());

    let options = QueryOptions::new()
        .with_populate(json!("author"))
        .with_tasks(json!([{ "type": "COPY_AND_DEPOPULATE", "args": { "src": "author", "dst": "authorData" } }]));
    let record = pipeline.read(&ctx, "posts", "p-1", &options).await?;

    assert_eq!(record["author"], json!("u-ada"));
    assert_eq!(record["authorData"]["name"], json!("Ada"));
    Ok(())
}

#[tokio::test]
async fn test_read_hidden_draft_is_not_found() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(anonymous());

    let err = pipeline.read(&ctx, "posts", "p-2", &QueryOptions::new()).await.unwrap_err();
    assert!(matches!(err, AclError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn test_author_updates_body_but_not_published() -> Result<()> {
    let (pipeline, store) = setup().await?;
    let ctx = pipeline.context(author("u-ada"));

    let updated = pipeline
        .update(&ctx, "posts", "p-1", json!({ "body": "rewritten", "published": false }))
        .await?;
    assert_eq!(updated["body"], json!("rewritten"));
    assert_eq!(updated["published"], json!(true));
    assert_eq!(updated["_permissions"]["isAuthor"], json!(true));

    let stored = store.find_one("posts", &json!({ "_id": "p-1" }), None, &[]).await?;
    assert_eq!(stored.map(|doc| doc["body"].clone()), Some(json!("rewritten")));
    Ok(())
}

#[tokio::test]
async fn test_non_author_cannot_change_body() -> Result<()> {
    let (pipeline, store) = setup().await?;
    let ctx = pipeline.context(author("u-bob"));

    pipeline.update(&ctx, "posts", "p-1", json!({ "body": "hijacked" })).await?;

    let stored = store.find_one("posts", &json!({ "_id": "p-1" }), None, &[]).await?;
    assert_eq!(stored.map(|doc| doc["body"].clone()), Some(json!("first post here")));
    Ok(())
}

#[tokio::test]
async fn test_update_outside_filter_is_not_found() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(author("u-bob"));

    let err = pipeline.update(&ctx, "posts", "p-2", json!({ "title": "x" })).await.unwrap_err();
    assert!(matches!(err, AclError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn test_delete_requires_admin() -> Result<()> {
    let (pipeline, store) = setup().await?;

    let ctx = pipeline.context(anonymous());
    let err = pipeline.delete(&ctx, "posts", "p-1").await.unwrap_err();
    assert!(matches!(err, AclError::Forbidden(_)));

    let ctx = pipeline.context(admin());
    assert_eq!(pipeline.delete(&ctx, "posts", "p-1").await?, "p-1");
    assert_eq!(store.all("posts").await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_count_and_distinct() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(anonymous());

    assert_eq!(pipeline.count(&ctx, "posts", None).await?, 1);
    assert_eq!(pipeline.distinct(&ctx, "posts", "tags", None).await?, vec![json!("intro")]);

    let err = pipeline.distinct(&ctx, "posts", "audit", None).await.unwrap_err();
    assert!(matches!(err, AclError::Forbidden(_)));
    Ok(())
}

#[tokio::test]
async fn test_route_guard_blocks_user_creation() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(anonymous());

    let err = pipeline.create(&ctx, "users", json!({ "name": "Eve" })).await.unwrap_err();
    assert!(matches!(err, AclError::Forbidden(_)));
    Ok(())
}

#[tokio::test]
async fn test_users_email_visible_to_self_only() -> Result<()> {
    let (pipeline, _) = setup().await?;

    let ctx = pipeline.context(author("u-bob"));
    let result = pipeline.list(&ctx, "users", &QueryOptions::new()).await?;
    let bob = result.rows.iter().find(|row| row["_id"] == json!("u-bob")).cloned().unwrap_or_default();
    let ada = result.rows.iter().find(|row| row["_id"] == json!("u-ada")).cloned().unwrap_or_default();

    assert_eq!(bob["email"], json!("bob@example.com"));
    assert_eq!(bob["_permissions"]["_view"]["email"], json!(true));
    assert!(ada.get("email").is_none());
    assert!(ada["_permissions"]["_view"].get("email").is_none());
    assert!(bob.get("role").is_none());
    Ok(())
}

#[tokio::test]
async fn test_user_reads_own_email() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(author("u-bob"));

    let me = pipeline.read(&ctx, "users", "u-bob", &QueryOptions::new()).await?;
    assert_eq!(me["email"], json!("bob@example.com"));
    assert_eq!(me["_permissions"]["isSelf"], json!(true));
    assert_eq!(me["_permissions"]["_view"], json!({ "email": true, "name": true }));

    let other = pipeline.read(&ctx, "users", "u-ada", &QueryOptions::new()).await?;
    assert!(other.get("email").is_none());
    assert_eq!(other["name"], json!("Ada"));
    Ok(())
}

#[tokio::test]
async fn test_own_email_survives_projection_without_permissions() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(author("u-bob"));

    let options = QueryOptions::new().with_select("email role").without_permissions();
    let me = pipeline.read(&ctx, "users", "u-bob", &options).await?;
    assert_eq!(me["email"], json!("bob@example.com"));
    assert!(me.get("role").is_none());
    assert!(me.get("name").is_none());
    assert_eq!(me["_permissions"], empty_permissions());
    Ok(())
}

#[tokio::test]
async fn test_sub_collection_lifecycle() -> Result<()> {
    let (pipeline, store) = setup().await?;
    let ctx = pipeline.context(anonymous());

    let comments = pipeline.list_sub(&ctx, "posts", "p-1", "comments", None).await?;
    assert_eq!(comments, vec![json!({ "_id": "c-1", "text": "welcome", "author": "u-bob" })]);

    let created = pipeline
        .create_sub(&ctx, "posts", "p-1", "comments", json!({ "text": "nice", "flagged": true }))
        .await?;
    assert_eq!(created["text"], json!("nice"));
    assert!(created.get("flagged").is_none());
    let new_id = created["_id"].as_str().unwrap_or_default().to_string();
    assert!(!new_id.is_empty());

    let err = pipeline
        .create_sub(&ctx, "posts", "p-1", "comments", json!({ "text": "  " }))
        .await
        .unwrap_err();
    assert!(matches!(err, AclError::BadRequest { .. }));

    let admin_ctx = pipeline.context(admin());
    let flagged = pipeline
        .update_sub(&admin_ctx, "posts", "p-1", "comments", &new_id, json!({ "flagged": true }))
        .await?;
    assert_eq!(flagged["flagged"], json!(true));

    let read = pipeline.read_sub(&ctx, "posts", "p-1", "comments", &new_id, None).await?;
    assert!(read.get("flagged").is_none());

    assert_eq!(pipeline.delete_sub(&ctx, "posts", "p-1", "comments", "c-1").await?, "c-1");
    let err = pipeline.delete_sub(&ctx, "posts", "p-1", "comments", "c-1").await.unwrap_err();
    assert!(matches!(err, AclError::NotFound(_)));

    let parent = store.find_one("posts", &json!({ "_id": "p-1" }), None, &[]).await?.unwrap_or_default();
    assert_eq!(parent["comments"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_unknown_sub_collection_is_not_found() -> Result<()> {
    let (pipeline, _) = setup().await?;
    let ctx = pipeline.context(anonymous());

    let err = pipeline.list_sub(&ctx, "posts", "p-1", "likes", None).await.unwrap_err();
    assert!(matches!(err, AclError::NotFound(_)));
    Ok(())
}
