//! Orchestration of every operation against one entity.
//!
//! Mutations run: filter -> allowed fields -> validate -> prepare -> apply
//! -> transform -> persist -> re-annotate -> field-pick -> decorate.
//! Reads run: filter + populate -> fetch -> annotate -> field-pick with the
//! record's doc permissions -> decorate (-> decorateAll and tasks for lists).

use std::sync::Arc;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::annotate::{add_empty_permissions, annotate_doc, annotate_field_permissions, compute_doc_permissions};
use super::filter::{compose_filter, conjoin, identifier_filter, is_empty_filter, ComposedFilter};
use super::pagination::PageRequest;
use super::populate::{resolve_populate, retain_selected};
use super::projection::Projection;
use super::select::{fetch_fields, gen_allowed_fields, pick_allowed, select_fields};
use super::tasks::{apply_tasks, Task};
use crate::authz::{evaluate, Caller, PermissionSet, RuleScope};
use crate::config::EngineConfig;
use crate::context::{MiddlewareContext, RequestContext};
use crate::errors::{AclError, AclResult};
use crate::policy::{Access, Hook, PolicyRegistry, PolicySchema, Validation, Validator};
use crate::store::{FindQuery, Store};

/// Caller-supplied shaping of a read or list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(default)]
    pub filter: Option<Value>,
    #[serde(default)]
    pub select: Option<Value>,
    #[serde(default)]
    pub populate: Option<Value>,
    #[serde(default)]
    pub sort: Option<Value>,
    #[serde(default)]
    pub tasks: Option<Value>,
    #[serde(flatten)]
    pub page: PageRequest,
    #[serde(default)]
    pub include_count: bool,
    /// Falls back to [`EngineConfig::include_permissions`].
    #[serde(default)]
    pub include_permissions: Option<bool>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_select(mut self, select: impl Into<Value>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn with_populate(mut self, populate: Value) -> Self {
        self.populate = Some(populate);
        self
    }

    pub fn with_tasks(mut self, tasks: Value) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_page(mut self, page: PageRequest) -> Self {
        self.page = page;
        self
    }

    pub fn with_count(mut self) -> Self {
        self.include_count = true;
        self
    }

    pub fn without_permissions(mut self) -> Self {
        self.include_permissions = Some(false);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub rows: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    pub skip: usize,
    pub limit: usize,
}

enum Staged {
    Ready(Value, MiddlewareContext),
    Rejected(Vec<Value>),
}

#[derive(Clone)]
pub struct OperationPipeline {
    registry: Arc<PolicyRegistry>,
    store: Arc<dyn Store>,
    config: Arc<EngineConfig>,
}

impl OperationPipeline {
    pub fn new(registry: Arc<PolicyRegistry>, store: Arc<dyn Store>, config: Arc<EngineConfig>) -> Self {
        Self { registry, store, config }
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fresh per-request state for `caller`.
    pub fn context(&self, caller: Caller) -> RequestContext {
        RequestContext::new(self.registry.clone(), self.config.clone(), caller)
    }

    pub async fn create(&self, ctx: &RequestContext, entity: &str, data: Value) -> AclResult<Value> {
        let schema = ctx.schema(entity)?;
        guard(ctx, schema, Access::Create).await?;

        let (items, batch) = match data {
            Value::Array(items) => (items, true),
            item => (vec![item], false),
        };

        let staged = try_join_all(items.into_iter().map(|item| self.stage_create(ctx, schema, item))).await?;

        let mut ready = Vec::with_capacity(staged.len());
        let mut failures = Vec::new();
        for (index, outcome) in staged.into_iter().enumerate() {
            match outcome {
                Staged::Ready(data, mctx) => ready.push((data, mctx)),
                Staged::Rejected(errors) if batch => {
                    failures.push(serde_json::json!({ "index": index, "errors": errors }));
                }
                Staged::Rejected(errors) => return Err(AclError::invalid("validation failed", errors)),
            }
        }
        if !failures.is_empty() {
            return Err(AclError::invalid("validation failed", failures));
        }

        let mut created = Vec::with_capacity(ready.len());
        for (data, mctx) in ready {
            let record = self.store.create(entity, data).await?;
            tracing::info!(entity = %entity, id = %record_id(schema, &record), "record created");
            created.push((record, mctx));
        }

        let include = self.config.include_permissions;
        let mut output = try_join_all(created.into_iter().map(|(record, mut mctx)| async move {
            mctx.final_doc_object = Some(record.clone());
            self.present(ctx, entity, record, Access::Create, None, include, &mut mctx).await
        }))
        .await?;

        if batch {
            Ok(Value::Array(output))
        } else {
            Ok(output.pop().unwrap_or(Value::Null))
        }
    }

    async fn stage_create(&self, ctx: &RequestContext, schema: &PolicySchema, item: Value) -> AclResult<Staged> {
        if !item.is_object() {
            return Err(AclError::bad_request("create payload must be an object"));
        }

        let mut mctx = MiddlewareContext::for_request(ctx, schema.name(), Access::Create);
        mctx.original_data = Some(item.clone());
        mctx.doc_permissions = compute_doc_permissions(ctx, schema, &item, Access::Create, &mut mctx).await;

        let allowed = gen_allowed_fields(ctx, schema.name(), Access::Create, Some(&mctx.doc_permissions), None).await?;
        let data = pick_allowed(&item, &allowed);

        if let Validation::Invalid(errors) =
            run_validators(schema.validators(Access::Create), &data, ctx.permissions(), &mctx).await?
        {
            return Ok(Staged::Rejected(errors));
        }

        let prepared = run_chain(schema.prepare_hooks(Access::Create), data, ctx.permissions(), &mut mctx).await?;
        mctx.modified_paths = diff_paths(&Value::Object(Map::new()), &prepared);
        mctx.prepared_data = Some(prepared.clone());
        mctx.current_doc = Some(prepared.clone());
        Ok(Staged::Ready(prepared, mctx))
    }

    pub async fn update(&self, ctx: &RequestContext, entity: &str, id: &str, data: Value) -> AclResult<Value> {
        let schema = ctx.schema(entity)?;
        guard(ctx, schema, Access::Update).await?;

        let filter = narrow(restricted(ctx, entity, Access::Update, None).await?, identifier_filter(schema, id));
        let original = self
            .store
            .find_one(entity, &filter, None, &[])
            .await?
            .ok_or_else(|| AclError::not_found(format!("`{entity}` record `{id}` not found")))?;

        let mut mctx = MiddlewareContext::for_request(ctx, entity, Access::Update).with_doc(&original);
        mctx.original_data = Some(data.clone());
        mctx.doc_permissions = compute_doc_permissions(ctx, schema, &original, Access::Update, &mut mctx).await;

        let allowed = gen_allowed_fields(ctx, entity, Access::Update, Some(&mctx.doc_permissions), None).await?;
        let data = pick_allowed(&data, &allowed);

        if let Validation::Invalid(errors) =
            run_validators(schema.validators(Access::Update), &data, ctx.permissions(), &mctx).await?
        {
            return Err(AclError::invalid("validation failed", errors));
        }

        let prepared = run_chain(schema.prepare_hooks(Access::Update), data, ctx.permissions(), &mut mctx).await?;
        mctx.prepared_data = Some(prepared.clone());

        let mut doc = original.clone();
        apply_changes(&mut doc, &prepared);
        mctx.modified_paths = diff_paths(&original, &doc);
        mctx.current_doc = Some(doc.clone());

        let doc = run_chain(schema.transform_hooks(Access::Update), doc, ctx.permissions(), &mut mctx).await?;
        mctx.modified_paths = diff_paths(&original, &doc);

        let saved = self.store.save(entity, doc).await?;
        tracing::info!(
            entity = %entity,
            id = %id,
            modified = ?mctx.modified_paths,
            "record updated"
        );
        mctx.final_doc_object = Some(saved.clone());

        let include = self.config.include_permissions;
        self.present(ctx, entity, saved, Access::Update, None, include, &mut mctx).await
    }

    pub async fn read(&self, ctx: &RequestContext, entity: &str, id: &str, options: &QueryOptions) -> AclResult<Value> {
        let schema = ctx.schema(entity)?;
        guard(ctx, schema, Access::Read).await?;

        let projection = options.select.as_ref().map(Projection::parse).transpose()?.flatten();
        let (filter, populate) = tokio::try_join!(
            restricted(ctx, entity, Access::Read, None),
            resolve_populate(ctx, entity, Access::Read, options.populate.as_ref()),
        )?;
        let fetch = fetch_fields(ctx, entity, Access::Read, projection.as_ref())?;
        let populate = retain_selected(populate, &fetch);

        let filter = narrow(filter, identifier_filter(schema, id));
        let record = self
            .store
            .find_one(entity, &filter, Some(fetch.as_slice()), &populate)
            .await?
            .ok_or_else(|| AclError::not_found(format!("`{entity}` record `{id}` not found")))?;

        let include = options.include_permissions.unwrap_or(self.config.include_permissions);
        let mut mctx = MiddlewareContext::for_request(ctx, entity, Access::Read).with_doc(&record);
        let mut record = self
            .present(ctx, entity, record, Access::Read, projection.as_ref(), include, &mut mctx)
            .await?;

        apply_tasks(&Task::parse_list(options.tasks.as_ref()), &mut record);
        Ok(record)
    }

    pub async fn list(&self, ctx: &RequestContext, entity: &str, options: &QueryOptions) -> AclResult<ListResult> {
        let schema = ctx.schema(entity)?;
        guard(ctx, schema, Access::List).await?;

        let projection = options.select.as_ref().map(Projection::parse).transpose()?.flatten();
        let (filter, populate) = tokio::try_join!(
            restricted(ctx, entity, Access::List, options.filter.clone()),
            resolve_populate(ctx, entity, Access::Read, options.populate.as_ref()),
        )?;
        let fetch = fetch_fields(ctx, entity, Access::List, projection.as_ref())?;
        let populate = retain_selected(populate, &fetch);

        let page = options
            .page
            .resolve(schema.max_limit().unwrap_or(self.config.max_limit));
        let query = FindQuery {
            filter: filter.clone(),
            select: Some(fetch),
            sort: options.sort.clone(),
            populate,
            skip: page.skip,
            limit: Some(page.limit),
        };

        let count = async {
            if options.include_count {
                self.store.count_documents(entity, &filter).await.map(Some)
            } else {
                Ok(None)
            }
        };
        let (records, count) = tokio::try_join!(self.store.find(entity, query), count)?;
        tracing::debug!(entity = %entity, rows = records.len(), skip = page.skip, limit = page.limit, "list fetched");

        let include = options.include_permissions.unwrap_or(self.config.include_permissions);
        let projection = projection.as_ref();
        let rows = try_join_all(records.into_iter().map(|record| async move {
            let mut mctx = MiddlewareContext::for_request(ctx, entity, Access::List).with_doc(&record);
            self.present(ctx, entity, record, Access::List, projection, include, &mut mctx)
                .await
        }))
        .await?;

        let mut mctx = MiddlewareContext::for_request(ctx, entity, Access::List);
        let rows = run_chain(
            schema.decorate_all_hooks(Access::List),
            Value::Array(rows),
            ctx.permissions(),
            &mut mctx,
        )
        .await?;
        let mut rows = match rows {
            Value::Array(rows) => rows,
            _ => return Err(AclError::internal("decorateAll must return an array")),
        };

        let tasks = Task::parse_list(options.tasks.as_ref());
        for row in &mut rows {
            apply_tasks(&tasks, row);
        }

        Ok(ListResult {
            rows,
            count,
            skip: page.skip,
            limit: page.limit,
        })
    }

    /// Remove one record; returns its identifier.
    pub async fn delete(&self, ctx: &RequestContext, entity: &str, id: &str) -> AclResult<String> {
        let schema = ctx.schema(entity)?;
        guard(ctx, schema, Access::Delete).await?;

        let filter = narrow(restricted(ctx, entity, Access::Delete, None).await?, identifier_filter(schema, id));
        let record = self
            .store
            .find_one(entity, &filter, None, &[])
            .await?
            .ok_or_else(|| AclError::not_found(format!("`{entity}` record `{id}` not found")))?;

        self.store.delete_one(entity, &record).await?;
        tracing::info!(entity = %entity, id = %id, "record deleted");
        Ok(id.to_string())
    }

    pub async fn count(&self, ctx: &RequestContext, entity: &str, filter: Option<Value>) -> AclResult<u64> {
        let schema = ctx.schema(entity)?;
        guard(ctx, schema, Access::Count).await?;

        let filter = restricted(ctx, entity, Access::Count, filter).await?;
        Ok(self.store.count_documents(entity, &filter).await?)
    }

    pub async fn distinct(
        &self,
        ctx: &RequestContext,
        entity: &str,
        field: &str,
        filter: Option<Value>,
    ) -> AclResult<Vec<Value>> {
        let schema = ctx.schema(entity)?;
        guard(ctx, schema, Access::Distinct).await?;

        let allowed = gen_allowed_fields(ctx, entity, Access::Distinct, None, None).await?;
        if !allowed.iter().any(|name| name == field) {
            return Err(AclError::forbidden(format!("distinct on `{entity}.{field}` is not permitted")));
        }

        let filter = restricted(ctx, entity, Access::Distinct, filter).await?;
        Ok(self.store.distinct(entity, field, &filter).await?)
    }

    pub async fn list_sub(
        &self,
        ctx: &RequestContext,
        entity: &str,
        id: &str,
        sub: &str,
        select: Option<&Value>,
    ) -> AclResult<Vec<Value>> {
        let (parent, mctx) = self.load_parent(ctx, entity, id, sub, Access::List).await?;
        let fields = sub_fields(ctx, entity, sub, select, &mctx).await?;

        let items = parent.get(sub).and_then(Value::as_array).cloned().unwrap_or_default();
        Ok(items.iter().map(|item| pick_allowed(item, &fields)).collect())
    }

    pub async fn read_sub(
        &self,
        ctx: &RequestContext,
        entity: &str,
        id: &str,
        sub: &str,
        sub_id: &str,
        select: Option<&Value>,
    ) -> AclResult<Value> {
        let (parent, mctx) = self.load_parent(ctx, entity, id, sub, Access::Read).await?;
        let fields = sub_fields(ctx, entity, sub, select, &mctx).await?;

        let items = parent.get(sub).and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
        let item = element_position(items, sub_id)
            .map(|index| &items[index])
            .ok_or_else(|| AclError::not_found(format!("`{entity}.{sub}` element `{sub_id}` not found")))?;
        Ok(pick_allowed(item, &fields))
    }

    pub async fn create_sub(
        &self,
        ctx: &RequestContext,
        entity: &str,
        id: &str,
        sub: &str,
        data: Value,
    ) -> AclResult<Value> {
        let (mut parent, mut mctx) = self.load_parent(ctx, entity, id, sub, Access::Create).await?;
        let element = self
            .stage_sub(ctx, entity, sub, Access::Create, data, &mut mctx)
            .await?;
        let mut element = match element {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        element
            .entry("_id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        let element = Value::Object(element);

        sub_items(&mut parent, sub)?.push(element.clone());
        self.store.save(entity, parent).await?;
        tracing::info!(entity = %entity, id = %id, sub = %sub, "sub-collection element created");

        let fields = sub_fields(ctx, entity, sub, None, &mctx).await?;
        Ok(pick_allowed(&element, &fields))
    }

    pub async fn update_sub(
        &self,
        ctx: &RequestContext,
        entity: &str,
        id: &str,
        sub: &str,
        sub_id: &str,
        data: Value,
    ) -> AclResult<Value> {
        let (mut parent, mut mctx) = self.load_parent(ctx, entity, id, sub, Access::Update).await?;
        let changes = self
            .stage_sub(ctx, entity, sub, Access::Update, data, &mut mctx)
            .await?;

        let element = {
            let items = sub_items(&mut parent, sub)?;
            let index = element_position(items, sub_id)
                .ok_or_else(|| AclError::not_found(format!("`{entity}.{sub}` element `{sub_id}` not found")))?;
            apply_changes(&mut items[index], &changes);
            items[index].clone()
        };
        self.store.save(entity, parent).await?;
        tracing::info!(entity = %entity, id = %id, sub = %sub, sub_id = %sub_id, "sub-collection element updated");

        let fields = sub_fields(ctx, entity, sub, None, &mctx).await?;
        Ok(pick_allowed(&element, &fields))
    }

    pub async fn delete_sub(
        &self,
        ctx: &RequestContext,
        entity: &str,
        id: &str,
        sub: &str,
        sub_id: &str,
    ) -> AclResult<String> {
        let (mut parent, _) = self.load_parent(ctx, entity, id, sub, Access::Delete).await?;
        {
            let items = sub_items(&mut parent, sub)?;
            let index = element_position(items, sub_id)
                .ok_or_else(|| AclError::not_found(format!("`{entity}.{sub}` element `{sub_id}` not found")))?;
            items.remove(index);
        }
        self.store.save(entity, parent).await?;
        tracing::info!(entity = %entity, id = %id, sub = %sub, sub_id = %sub_id, "sub-collection element deleted");
        Ok(sub_id.to_string())
    }

    /// Fetch the parent of a sub-collection for element operation `op`.
    ///
    /// The parent's `sub` guard and the sub schema's guard for `op` run
    /// first. The parent must then be reachable under `read` (for `list` and
    /// `read`) or `update` (for writes), and its `sub` field rule must hold
    /// against the parent's doc permissions.
    async fn load_parent(
        &self,
        ctx: &RequestContext,
        entity: &str,
        id: &str,
        sub: &str,
        op: Access,
    ) -> AclResult<(Value, MiddlewareContext)> {
        let schema = ctx.schema(entity)?;
        let sub_schema = schema
            .sub_schema(sub)
            .ok_or_else(|| AclError::not_found(format!("`{entity}` has no sub-collection `{sub}`")))?;
        guard(ctx, schema, Access::Sub).await?;
        guard(ctx, sub_schema, op).await?;

        let access = match op {
            Access::List | Access::Read => Access::Read,
            _ => Access::Update,
        };
        let filter = narrow(restricted(ctx, entity, access, None).await?, identifier_filter(schema, id));
        let parent = self
            .store
            .find_one(entity, &filter, None, &[])
            .await?
            .ok_or_else(|| AclError::not_found(format!("`{entity}` record `{id}` not found")))?;

        let mut mctx = MiddlewareContext::for_request(ctx, entity, access).with_doc(&parent);
        mctx.doc_permissions = compute_doc_permissions(ctx, schema, &parent, access, &mut mctx).await;

        let scope = RuleScope::global(ctx.permissions())
            .with_doc(Some(&mctx.doc_permissions), schema.doc_permission_prefix());
        let reachable = match schema.field_rules().get(sub).and_then(|rule| rule.resolve_sub(access)) {
            Some(rule) => evaluate(rule, &scope).await,
            None => false,
        };
        if !reachable {
            return Err(AclError::forbidden(format!("{op} on `{entity}.{sub}` is not permitted")));
        }
        Ok((parent, mctx))
    }

    /// Allowed-field pick, validate and prepare for a sub-collection write.
    async fn stage_sub(
        &self,
        ctx: &RequestContext,
        entity: &str,
        sub: &str,
        access: Access,
        data: Value,
        mctx: &mut MiddlewareContext,
    ) -> AclResult<Value> {
        let schema = ctx.schema(entity)?;
        let sub_schema = schema
            .sub_schema(sub)
            .ok_or_else(|| AclError::not_found(format!("`{entity}` has no sub-collection `{sub}`")))?;

        mctx.original_data = Some(data.clone());
        let allowed = gen_allowed_fields(ctx, entity, access, Some(&mctx.doc_permissions), Some(sub)).await?;
        let data = pick_allowed(&data, &allowed);

        if let Validation::Invalid(errors) =
            run_validators(sub_schema.validators(access), &data, ctx.permissions(), mctx).await?
        {
            return Err(AclError::invalid("validation failed", errors));
        }

        let prepared = run_chain(sub_schema.prepare_hooks(access), data, ctx.permissions(), mctx).await?;
        mctx.prepared_data = Some(prepared.clone());
        mctx.modified_paths = diff_paths(&Value::Object(Map::new()), &prepared)
            .into_iter()
            .map(|path| format!("{sub}.{path}"))
            .collect();
        Ok(prepared)
    }

    /// Annotate, field-pick and decorate one outgoing record.
    ///
    /// Doc permissions are always computed, since they decide which fields
    /// leave; `include_permissions` only chooses between the computed maps
    /// and the sentinel.
    #[allow(clippy::too_many_arguments)]
    async fn present(
        &self,
        ctx: &RequestContext,
        entity: &str,
        record: Value,
        access: Access,
        projection: Option<&Projection>,
        include_permissions: bool,
        mctx: &mut MiddlewareContext,
    ) -> AclResult<Value> {
        let schema = ctx.schema(entity)?;
        let annotate_as = match access {
            Access::List => Access::List,
            _ => Access::Read,
        };

        let mut record = annotate_doc(ctx, entity, record, annotate_as, mctx).await?;
        let fields = select_fields(ctx, entity, annotate_as, projection, None, Some(&mctx.doc_permissions)).await?;

        if include_permissions {
            record = annotate_field_permissions(ctx, self.store.as_ref(), entity, record, annotate_as, mctx).await?;
        } else {
            add_empty_permissions(ctx, schema, &mut record);
        }

        let record = pick_allowed(&record, &outgoing_fields(schema, &fields, ctx.permission_field(schema)));
        run_chain(schema.decorate_hooks(access), record, ctx.permissions(), mctx).await
    }
}

async fn guard(ctx: &RequestContext, schema: &PolicySchema, access: Access) -> AclResult<()> {
    let Some(rule) = schema.route_guard(access) else {
        return Ok(());
    };
    let scope = RuleScope::global(ctx.permissions());
    if evaluate(rule, &scope).await {
        Ok(())
    } else {
        tracing::debug!(entity = %schema.name(), access = %access, "route guard rejected");
        Err(AclError::forbidden(format!("{access} on `{}` is not permitted", schema.name())))
    }
}

/// Composed filter, with a deny surfaced as `Forbidden`.
async fn restricted(
    ctx: &RequestContext,
    entity: &str,
    access: Access,
    caller_filter: Option<Value>,
) -> AclResult<Value> {
    match compose_filter(ctx, entity, access, caller_filter).await? {
        ComposedFilter::Deny => Err(AclError::forbidden(format!("{access} on `{entity}` is not permitted"))),
        ComposedFilter::Filter(filter) => Ok(filter),
    }
}

fn narrow(filter: Value, extra: Value) -> Value {
    if is_empty_filter(&filter) {
        extra
    } else {
        conjoin(filter, extra)
    }
}

async fn run_chain(
    hooks: &[Arc<dyn Hook>],
    mut value: Value,
    permissions: &PermissionSet,
    mctx: &mut MiddlewareContext,
) -> AclResult<Value> {
    for hook in hooks {
        value = hook.call(value, permissions, mctx).await?;
    }
    Ok(value)
}

async fn run_validators(
    validators: &[Arc<dyn Validator>],
    data: &Value,
    permissions: &PermissionSet,
    mctx: &MiddlewareContext,
) -> AclResult<Validation> {
    let mut invalid = false;
    let mut errors = Vec::new();
    for validator in validators {
        if let Validation::Invalid(found) = validator.validate(data, permissions, mctx).await? {
            invalid = true;
            errors.extend(found);
        }
    }
    Ok(if invalid { Validation::Invalid(errors) } else { Validation::Valid })
}

async fn sub_fields(
    ctx: &RequestContext,
    entity: &str,
    sub: &str,
    select: Option<&Value>,
    mctx: &MiddlewareContext,
) -> AclResult<Vec<String>> {
    let projection = select.map(Projection::parse).transpose()?.flatten();
    let mut fields = select_fields(
        ctx,
        entity,
        Access::Read,
        projection.as_ref(),
        Some(sub),
        Some(&mctx.doc_permissions),
    )
    .await?;
    fields.push("_id".to_string());
    Ok(fields)
}

fn sub_items<'a>(parent: &'a mut Value, sub: &str) -> AclResult<&'a mut Vec<Value>> {
    let Value::Object(map) = parent else {
        return Err(AclError::internal("parent record is not an object"));
    };
    let slot = map.entry(sub.to_string()).or_insert_with(|| Value::Array(Vec::new()));
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut()
        .ok_or_else(|| AclError::bad_request(format!("`{sub}` is not a list")))
}

fn element_position(items: &[Value], sub_id: &str) -> Option<usize> {
    items
        .iter()
        .position(|item| item.get("_id").and_then(Value::as_str) == Some(sub_id))
}

fn apply_changes(doc: &mut Value, changes: &Value) {
    if let (Value::Object(target), Value::Object(changes)) = (doc, changes) {
        for (key, value) in changes {
            target.insert(key.clone(), value.clone());
        }
    }
}

/// Top-level keys that differ between `before` and `after`.
fn diff_paths(before: &Value, after: &Value) -> Vec<String> {
    let empty = Map::new();
    let before = before.as_object().unwrap_or(&empty);
    let after = after.as_object().unwrap_or(&empty);

    let mut paths: Vec<String> = after
        .iter()
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, _)| key.clone())
        .chain(before.keys().filter(|key| !after.contains_key(*key)).cloned())
        .collect();
    paths.sort_unstable();
    paths
}

/// Top-level keys an outgoing record keeps: the selection heads, the
/// identifier (unless excluded) and the permission field.
fn outgoing_fields(schema: &PolicySchema, selection: &[String], permission_field: &str) -> Vec<String> {
    let mut fields: Vec<String> = selection
        .iter()
        .filter(|field| !field.starts_with('-'))
        .map(|field| field.split('.').next().unwrap_or(field).to_string())
        .collect();
    if !selection.iter().any(|field| field == "-_id") {
        fields.push(schema.identifier().field().unwrap_or("_id").to_string());
    }
    fields.push(permission_field.to_string());
    fields
}

fn record_id(schema: &PolicySchema, record: &Value) -> String {
    let field = schema.identifier().field().unwrap_or("_id");
    match record.get(field) {
        Some(Value::String(id)) => id.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
