use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::authz::{Caller, PermissionSet};
use crate::config::EngineConfig;
use crate::engine::filter::RequestFilterCache;
use crate::errors::AclResult;
use crate::policy::{Access, PolicyRegistry, PolicySchema};

/// Everything one request needs, built once and passed by reference.
///
/// The registry and config are shared across requests; the caller and the
/// filter cache belong to this request alone.
pub struct RequestContext {
    registry: Arc<PolicyRegistry>,
    config: Arc<EngineConfig>,
    caller: Caller,
    filter_cache: RequestFilterCache,
}

impl RequestContext {
    pub fn new(registry: Arc<PolicyRegistry>, config: Arc<EngineConfig>, caller: Caller) -> Self {
        Self {
            registry,
            config,
            caller,
            filter_cache: RequestFilterCache::new(),
        }
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.caller.permissions
    }

    pub fn caller(&self) -> &Caller {
        &self.caller
    }

    pub fn registry(&self) -> &PolicyRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn filter_cache(&self) -> &RequestFilterCache {
        &self.filter_cache
    }

    pub fn schema(&self, entity: &str) -> AclResult<&PolicySchema> {
        self.registry.require(entity)
    }

    /// Where doc permissions live on records of `schema`.
    pub fn permission_field<'a>(&'a self, schema: &'a PolicySchema) -> &'a str {
        schema
            .permission_field()
            .unwrap_or(self.config.permission_field.as_str())
    }
}

/// State shared by the hooks of one mutating (or decorated) operation.
///
/// Stages fill it in as they run; each hook sees what earlier stages wrote.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewareContext {
    pub entity: String,
    pub access: Access,
    pub original_data: Option<Value>,
    pub original_doc_object: Option<Value>,
    pub current_doc: Option<Value>,
    pub prepared_data: Option<Value>,
    pub modified_paths: Vec<String>,
    pub doc_permissions: Value,
    pub final_doc_object: Option<Value>,
    #[serde(skip)]
    pub caller_record: Option<Value>,
}

impl MiddlewareContext {
    pub fn new(entity: impl Into<String>, access: Access) -> Self {
        Self {
            entity: entity.into(),
            access,
            original_data: None,
            original_doc_object: None,
            current_doc: None,
            prepared_data: None,
            modified_paths: Vec::new(),
            doc_permissions: Value::Object(Map::new()),
            final_doc_object: None,
            caller_record: None,
        }
    }

    pub fn for_request(ctx: &RequestContext, entity: &str, access: Access) -> Self {
        let mut mctx = Self::new(entity, access);
        mctx.caller_record = ctx.caller().record.clone();
        mctx
    }

    /// Start from an existing record, as update and sub-collection stages do.
    pub fn with_doc(mut self, doc: &Value) -> Self {
        self.original_doc_object = Some(doc.clone());
        self.current_doc = Some(doc.clone());
        self
    }
}
