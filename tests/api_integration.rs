use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

use fieldguard::config::EngineConfig;
use fieldguard::engine::OperationPipeline;
use fieldguard::jwt::JwtConfig;
use fieldguard::store::MemoryStore;
use fieldguard::{create_app, demo, AppState};

const SECRET: &str = "test-secret";

async fn app() -> Result<Router> {
    let store = MemoryStore::new();
    demo::seed(&store).await?;
    let pipeline = OperationPipeline::new(
        Arc::new(demo::registry()?),
        Arc::new(store),
        Arc::new(EngineConfig::default()),
    );
    Ok(create_app(AppState::new(pipeline, JwtConfig::new(SECRET, 1))))
}

fn admin_token() -> Result<String> {
    Ok(JwtConfig::new(SECRET, 1).encode("u-ada", &["isAdmin".to_string()])?)
}

async fn send(app: &Router, req: Request<Body>) -> Result<(StatusCode, Value)> {
    let resp = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, body))
}

fn get(uri: &str, token: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    Ok(builder.body(Body::empty())?)
}

fn with_json(method: &str, uri: &str, payload: Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))?)
}

#[tokio::test]
async fn test_health_lists_entities() -> Result<()> {
    let app = app().await?;
    let (status, body) = send(&app, get("/api/health", None)?).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok", "entities": ["audits", "posts", "users"] }));
    Ok(())
}

#[tokio::test]
async fn test_anonymous_list_sees_published_only() -> Result<()> {
    let app = app().await?;
    let (status, body) = send(&app, get("/api/posts", None)?).await?;

    assert_eq!(status, StatusCode::OK);
    let rows = body["rows"].as_array().cloned().unwrap_or_default();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["title"], json!("Hello"));
    assert!(body.get("count").is_none());
    Ok(())
}

#[tokio::test]
async fn test_admin_list_with_count() -> Result<()> {
    let app = app().await?;
    let token = admin_token()?;
    let (status, body) = send(&app, get("/api/posts?includeCount=true&limit=1", Some(&token))?).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(2));
    assert_eq!(body["rows"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_filter_and_select_from_query_string() -> Result<()> {
    let app = app().await?;
    let token = admin_token()?;
    let uri = "/api/posts?filter=%7B%22title%22%3A%22Draft%22%7D&select=title&includePermissions=false";
    let (status, body) = send(&app, get(uri, Some(&token))?).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["rows"],
        json!([{
            "_id": "p-2",
            "title": "Draft",
            "published": false,
            "_permissions": { "_view": { "$": "_" }, "_edit": { "$": "_" } }
        }])
    );
    Ok(())
}

#[tokio::test]
async fn test_query_endpoint_takes_body_options() -> Result<()> {
    let app = app().await?;
    let req = with_json("POST", "/api/posts/__query", json!({ "select": ["title"], "limit": 10 }))?;
    let (status, body) = send(&app, req).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["limit"], json!(10));
    assert_eq!(body["rows"][0]["title"], json!("Hello"));
    Ok(())
}

#[tokio::test]
async fn test_malformed_filter_is_bad_request() -> Result<()> {
    let app = app().await?;
    let (status, body) = send(&app, get("/api/posts?filter=%7Boops", None)?).await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("bad_request"));
    Ok(())
}

#[tokio::test]
async fn test_bad_token_is_unauthorized() -> Result<()> {
    let app = app().await?;
    let (status, _) = send(&app, get("/api/posts", Some("not-a-jwt"))?).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn test_unknown_entity_is_not_found() -> Result<()> {
    let app = app().await?;
    let (status, _) = send(&app, get("/api/widgets", None)?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_read_hidden_and_visible_records() -> Result<()> {
    let app = app().await?;

    let (status, _) = send(&app, get("/api/posts/p-2", None)?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, get("/api/posts/p-1?populate=author", None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["author"], json!({ "_id": "u-ada", "name": "Ada" }));
    Ok(())
}

#[tokio::test]
async fn test_batch_create_reports_failing_index() -> Result<()> {
    let app = app().await?;
    let req = with_json("POST", "/api/posts", json!([{ "title": "ok" }, { "body": "missing title" }]))?;
    let (status, body) = send(&app, req).await?;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["index"], json!(1));

    let (_, body) = send(&app, get("/api/posts/__count", None)?).await?;
    assert_eq!(body, json!({ "count": 1 }));
    Ok(())
}

#[tokio::test]
async fn test_create_returns_created() -> Result<()> {
    let app = app().await?;
    let req = with_json("POST", "/api/posts", json!({ "title": "fresh", "body": "a b" }))?;
    let (status, body) = send(&app, req).await?;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["title"], json!("fresh"));
    assert_eq!(body["published"], json!(false));
    Ok(())
}

#[tokio::test]
async fn test_delete_forbidden_then_allowed() -> Result<()> {
    let app = app().await?;

    let req = Request::builder().method("DELETE").uri("/api/posts/p-1").body(Body::empty())?;
    let (status, _) = send(&app, req).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = Request::builder()
        .method("DELETE")
        .uri("/api/posts/p-1")
        .header("authorization", format!("Bearer {}", admin_token()?))
        .body(Body::empty())?;
    let (status, body) = send(&app, req).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "deleted": "p-1" }));
    Ok(())
}

#[tokio::test]
async fn test_distinct_route() -> Result<()> {
    let app = app().await?;
    let (status, body) = send(&app, get("/api/posts/__distinct/title", None)?).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(["Hello"]));
    Ok(())
}

#[tokio::test]
async fn test_sub_collection_routes() -> Result<()> {
    let app = app().await?;

    let (status, body) = send(&app, get("/api/posts/p-1/comments", None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{ "_id": "c-1", "text": "welcome", "author": "u-bob" }]));

    let req = with_json("POST", "/api/posts/p-1/comments", json!({ "text": "hi" }))?;
    let (status, created) = send(&app, req).await?;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["_id"].as_str().unwrap_or_default().to_string();

    let (status, body) = send(&app, get(&format!("/api/posts/p-1/comments/{id}"), None)?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], json!("hi"));

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/api/posts/p-1/comments/{id}"))
        .body(Body::empty())?;
    let (status, _) = send(&app, req).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}
