use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::request::Parts;
use serde_json::Value;

use crate::errors::AclResult;

/// The caller's resolved grants, captured once per request.
///
/// Cloning is cheap and never copies the underlying map; there is no way to
/// mutate a set after construction.
#[derive(Debug, Clone, Default)]
pub struct PermissionSet {
    grants: Arc<HashMap<String, bool>>,
}

impl PermissionSet {
    pub fn new(grants: HashMap<String, bool>) -> Self {
        Self {
            grants: Arc::new(grants),
        }
    }

    /// An anonymous caller: nothing granted.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from a list of granted names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(|name| (name.into(), true)).collect())
    }

    pub fn has(&self, name: &str) -> bool {
        self.grants.get(name).copied().unwrap_or(false)
    }

    pub fn has_any<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        names.into_iter().any(|name| self.has(name))
    }

    pub fn has_all<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        names.into_iter().all(|name| self.has(name))
    }

    /// Names currently granted, sorted.
    pub fn granted(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .grants
            .iter()
            .filter(|(_, granted)| **granted)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// What the session layer knows about the caller of one request.
#[derive(Debug, Clone, Default)]
pub struct Caller {
    pub permissions: PermissionSet,
    /// Reference to the caller's own record, when authenticated.
    pub record: Option<Value>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn new(permissions: PermissionSet) -> Self {
        Self {
            permissions,
            record: None,
        }
    }

    pub fn with_record(mut self, record: Value) -> Self {
        self.record = Some(record);
        self
    }
}

/// Session collaborator: turns the raw request into a [`Caller`].
#[async_trait]
pub trait PermissionResolver: Send + Sync {
    async fn resolve(&self, parts: &Parts) -> AclResult<Caller>;
}
