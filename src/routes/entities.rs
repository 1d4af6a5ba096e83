//! Generic handlers mapping HTTP verbs onto pipeline operations.
//!
//! Query strings carry `filter` as JSON; `select`, `populate`, `sort` and
//! `tasks` may be JSON or plain strings.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::authz::Caller;
use crate::config::parse_flag;
use crate::engine::{ListResult, PageRequest, QueryOptions};
use crate::errors::{AclError, AclResult};

type Params = HashMap<String, String>;

fn json_param(params: &Params, key: &str) -> AclResult<Option<Value>> {
    params
        .get(key)
        .map(|raw| {
            serde_json::from_str(raw).map_err(|err| AclError::bad_request(format!("`{key}` must be JSON: {err}")))
        })
        .transpose()
}

fn loose_param(params: &Params, key: &str) -> Option<Value> {
    params
        .get(key)
        .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())))
}

fn flag_param(params: &Params, key: &str) -> AclResult<Option<bool>> {
    params
        .get(key)
        .map(|raw| parse_flag(raw).ok_or_else(|| AclError::bad_request(format!("`{key}` must be true or false"))))
        .transpose()
}

pub(crate) fn query_options(params: &Params) -> AclResult<QueryOptions> {
    let text = |key: &str| params.get(key).map(|raw| Value::String(raw.clone()));

    Ok(QueryOptions {
        filter: json_param(params, "filter")?,
        select: loose_param(params, "select"),
        populate: loose_param(params, "populate"),
        sort: loose_param(params, "sort"),
        tasks: loose_param(params, "tasks"),
        page: PageRequest {
            skip: text("skip"),
            limit: text("limit"),
            page: text("page"),
            page_size: text("pageSize"),
        },
        include_count: flag_param(params, "includeCount")?.unwrap_or(false),
        include_permissions: flag_param(params, "includePermissions")?,
    })
}

pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
    Path(entity): Path<String>,
    Query(params): Query<Params>,
) -> AclResult<Json<ListResult>> {
    let options = query_options(&params)?;
    let ctx = state.pipeline.context(caller);
    let result = state.pipeline.list(&ctx, &entity, &options).await?;
    Ok(Json(result))
}

/// List with the options in the body, for filters too large for a URL.
pub async fn query(
    State(state): State<AppState>,
    caller: Caller,
    Path(entity): Path<String>,
    Json(options): Json<QueryOptions>,
) -> AclResult<Json<ListResult>> {
    let ctx = state.pipeline.context(caller);
    let result = state.pipeline.list(&ctx, &entity, &options).await?;
    Ok(Json(result))
}

pub async fn count(
    State(state): State<AppState>,
    caller: Caller,
    Path(entity): Path<String>,
    Query(params): Query<Params>,
) -> AclResult<Json<Value>> {
    let filter = json_param(&params, "filter")?;
    let ctx = state.pipeline.context(caller);
    let count = state.pipeline.count(&ctx, &entity, filter).await?;
    Ok(Json(json!({ "count": count })))
}

pub async fn distinct(
    State(state): State<AppState>,
    caller: Caller,
    Path((entity, field)): Path<(String, String)>,
    Query(params): Query<Params>,
) -> AclResult<Json<Vec<Value>>> {
    let filter = json_param(&params, "filter")?;
    let ctx = state.pipeline.context(caller);
    let values = state.pipeline.distinct(&ctx, &entity, &field, filter).await?;
    Ok(Json(values))
}

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    Path(entity): Path<String>,
    Json(payload): Json<Value>,
) -> AclResult<(StatusCode, Json<Value>)> {
    let ctx = state.pipeline.context(caller);
    let created = state.pipeline.create(&ctx, &entity, payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn read(
    State(state): State<AppState>,
    caller: Caller,
    Path((entity, id)): Path<(String, String)>,
    Query(params): Query<Params>,
) -> AclResult<Json<Value>> {
    let options = query_options(&params)?;
    let ctx = state.pipeline.context(caller);
    let record = state.pipeline.read(&ctx, &entity, &id, &options).await?;
    Ok(Json(record))
}

pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    Path((entity, id)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> AclResult<Json<Value>> {
    let ctx = state.pipeline.context(caller);
    let updated = state.pipeline.update(&ctx, &entity, &id, payload).await?;
    Ok(Json(updated))
}

pub async fn delete(
    State(state): State<AppState>,
    caller: Caller,
    Path((entity, id)): Path<(String, String)>,
) -> AclResult<Json<Value>> {
    let ctx = state.pipeline.context(caller);
    let id = state.pipeline.delete(&ctx, &entity, &id).await?;
    Ok(Json(json!({ "deleted": id })))
}

pub async fn list_sub(
    State(state): State<AppState>,
    caller: Caller,
    Path((entity, id, sub)): Path<(String, String, String)>,
    Query(params): Query<Params>,
) -> AclResult<Json<Vec<Value>>> {
    let select = loose_param(&params, "select");
    let ctx = state.pipeline.context(caller);
    let items = state
        .pipeline
        .list_sub(&ctx, &entity, &id, &sub, select.as_ref())
        .await?;
    Ok(Json(items))
}

pub async fn create_sub(
    State(state): State<AppState>,
    caller: Caller,
    Path((entity, id, sub)): Path<(String, String, String)>,
    Json(payload): Json<Value>,
) -> AclResult<(StatusCode, Json<Value>)> {
    let ctx = state.pipeline.context(caller);
    let item = state.pipeline.create_sub(&ctx, &entity, &id, &sub, payload).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn read_sub(
    State(state): State<AppState>,
    caller: Caller,
    Path((entity, id, sub, sub_id)): Path<(String, String, String, String)>,
    Query(params): Query<Params>,
) -> AclResult<Json<Value>> {
    let select = loose_param(&params, "select");
    let ctx = state.pipeline.context(caller);
    let item = state
        .pipeline
        .read_sub(&ctx, &entity, &id, &sub, &sub_id, select.as_ref())
        .await?;
    Ok(Json(item))
}

pub async fn update_sub(
    State(state): State<AppState>,
    caller: Caller,
    Path((entity, id, sub, sub_id)): Path<(String, String, String, String)>,
    Json(payload): Json<Value>,
) -> AclResult<Json<Value>> {
    let ctx = state.pipeline.context(caller);
    let item = state
        .pipeline
        .update_sub(&ctx, &entity, &id, &sub, &sub_id, payload)
        .await?;
    Ok(Json(item))
}

pub async fn delete_sub(
    State(state): State<AppState>,
    caller: Caller,
    Path((entity, id, sub, sub_id)): Path<(String, String, String, String)>,
) -> AclResult<Json<Value>> {
    let ctx = state.pipeline.context(caller);
    let sub_id = state.pipeline.delete_sub(&ctx, &entity, &id, &sub, &sub_id).await?;
    Ok(Json(json!({ "deleted": sub_id })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_query_options_parse_json_and_plain_values() {
        let options = query_options(&params(&[
            ("filter", r#"{"published":true}"#),
            ("select", "title body"),
            ("populate", r#"["author"]"#),
            ("limit", "5"),
            ("includeCount", "true"),
        ]))
        .unwrap();

        assert_eq!(options.filter, Some(json!({ "published": true })));
        assert_eq!(options.select, Some(json!("title body")));
        assert_eq!(options.populate, Some(json!(["author"])));
        assert_eq!(options.page.limit, Some(json!("5")));
        assert!(options.include_count);
        assert_eq!(options.include_permissions, None);
    }

    #[test]
    fn test_malformed_filter_is_bad_request() {
        let err = query_options(&params(&[("filter", "{oops")])).unwrap_err();
        assert!(matches!(err, AclError::BadRequest { .. }));
    }
}
