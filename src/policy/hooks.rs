//! Hook slots of a policy schema.
//!
//! Every hook has a fixed signature. Async implementations implement the
//! trait directly; plain closures go through the adapters at the bottom.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::authz::PermissionSet;
use crate::context::MiddlewareContext;

/// `(value, permissions, context) -> value`, used for prepare, transform,
/// decorate, decorateAll and docPermissions.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn call(
        &self,
        value: Value,
        permissions: &PermissionSet,
        ctx: &mut MiddlewareContext,
    ) -> anyhow::Result<Value>;
}

/// Outcome of a validate hook.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid,
    Invalid(Vec<Value>),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }
}

impl From<bool> for Validation {
    fn from(value: bool) -> Self {
        if value {
            Validation::Valid
        } else {
            Validation::Invalid(Vec::new())
        }
    }
}

impl From<Vec<Value>> for Validation {
    fn from(errors: Vec<Value>) -> Self {
        if errors.is_empty() {
            Validation::Valid
        } else {
            Validation::Invalid(errors)
        }
    }
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        data: &Value,
        permissions: &PermissionSet,
        ctx: &MiddlewareContext,
    ) -> anyhow::Result<Validation>;
}

/// Produces the policy's own restriction for an operation.
///
/// `false` denies everything, `true`, `null` or `{}` restrict nothing, any
/// other value is a filter fragment.
#[async_trait]
pub trait BaseFilterFn: Send + Sync {
    async fn base_filter(&self, permissions: &PermissionSet) -> anyhow::Result<Value>;
}

/// Rewrites the caller-supplied filter before composition.
#[async_trait]
pub trait OverrideFilterFn: Send + Sync {
    async fn override_filter(
        &self,
        filter: Option<Value>,
        permissions: &PermissionSet,
    ) -> anyhow::Result<Option<Value>>;
}

/// How a route identifier becomes a filter.
#[derive(Clone)]
pub enum Identifier {
    Field(String),
    Resolver(Arc<dyn Fn(&str) -> Value + Send + Sync>),
}

impl Identifier {
    pub fn filter(&self, id: &str) -> Value {
        match self {
            Identifier::Field(field) => {
                let mut map = serde_json::Map::new();
                map.insert(field.clone(), Value::String(id.to_string()));
                Value::Object(map)
            }
            Identifier::Resolver(resolve) => resolve(id),
        }
    }

    /// The record field carrying the identifier, when it is a plain field.
    pub fn field(&self) -> Option<&str> {
        match self {
            Identifier::Field(field) => Some(field),
            Identifier::Resolver(_) => None,
        }
    }
}

impl Default for Identifier {
    fn default() -> Self {
        Identifier::Field("_id".to_string())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Field(field) => f.debug_tuple("Field").field(field).finish(),
            Identifier::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

struct FnHook<F>(F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(Value, &PermissionSet, &mut MiddlewareContext) -> anyhow::Result<Value> + Send + Sync,
{
    async fn call(
        &self,
        value: Value,
        permissions: &PermissionSet,
        ctx: &mut MiddlewareContext,
    ) -> anyhow::Result<Value> {
        (self.0)(value, permissions, ctx)
    }
}

pub fn hook<F>(f: F) -> Arc<dyn Hook>
where
    F: Fn(Value, &PermissionSet, &mut MiddlewareContext) -> anyhow::Result<Value>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHook(f))
}

struct FnValidator<F>(F);

#[async_trait]
impl<F> Validator for FnValidator<F>
where
    F: Fn(&Value, &PermissionSet, &MiddlewareContext) -> Validation + Send + Sync,
{
    async fn validate(
        &self,
        data: &Value,
        permissions: &PermissionSet,
        ctx: &MiddlewareContext,
    ) -> anyhow::Result<Validation> {
        Ok((self.0)(data, permissions, ctx))
    }
}

pub fn validator<F>(f: F) -> Arc<dyn Validator>
where
    F: Fn(&Value, &PermissionSet, &MiddlewareContext) -> Validation + Send + Sync + 'static,
{
    Arc::new(FnValidator(f))
}

struct FnBaseFilter<F>(F);

#[async_trait]
impl<F> BaseFilterFn for FnBaseFilter<F>
where
    F: Fn(&PermissionSet) -> Value + Send + Sync,
{
    async fn base_filter(&self, permissions: &PermissionSet) -> anyhow::Result<Value> {
        Ok((self.0)(permissions))
    }
}

pub fn base_filter<F>(f: F) -> Arc<dyn BaseFilterFn>
where
    F: Fn(&PermissionSet) -> Value + Send + Sync + 'static,
{
    Arc::new(FnBaseFilter(f))
}

struct FnOverrideFilter<F>(F);

#[async_trait]
impl<F> OverrideFilterFn for FnOverrideFilter<F>
where
    F: Fn(Option<Value>, &PermissionSet) -> Option<Value> + Send + Sync,
{
    async fn override_filter(
        &self,
        filter: Option<Value>,
        permissions: &PermissionSet,
    ) -> anyhow::Result<Option<Value>> {
        Ok((self.0)(filter, permissions))
    }
}

pub fn override_filter<F>(f: F) -> Arc<dyn OverrideFilterFn>
where
    F: Fn(Option<Value>, &PermissionSet) -> Option<Value> + Send + Sync + 'static,
{
    Arc::new(FnOverrideFilter(f))
}
