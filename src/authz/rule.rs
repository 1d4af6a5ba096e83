use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::permissions::PermissionSet;

/// Escape hatch for rules that cannot be written as permission names.
#[async_trait]
pub trait RuleFn: Send + Sync {
    async fn check(&self, permissions: &PermissionSet, doc_permissions: Option<&Value>) -> bool;
}

struct SyncRule<F>(F);

#[async_trait]
impl<F> RuleFn for SyncRule<F>
where
    F: Fn(&PermissionSet, Option<&Value>) -> bool + Send + Sync,
{
    async fn check(&self, permissions: &PermissionSet, doc_permissions: Option<&Value>) -> bool {
        (self.0)(permissions, doc_permissions)
    }
}

/// A single access rule.
///
/// `Expr` is a space-separated list of terms that must all hold; each term
/// may offer `|`-separated alternatives. `List` holds when any element holds.
#[derive(Clone)]
pub enum AccessRule {
    Bool(bool),
    Expr(String),
    List(Vec<AccessRule>),
    Fn(Arc<dyn RuleFn>),
}

impl AccessRule {
    pub fn allow() -> Self {
        Self::Bool(true)
    }

    pub fn deny() -> Self {
        Self::Bool(false)
    }

    pub fn expr(expr: impl Into<String>) -> Self {
        Self::Expr(expr.into())
    }

    pub fn any<I, R>(rules: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<AccessRule>,
    {
        Self::List(rules.into_iter().map(Into::into).collect())
    }

    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&PermissionSet, Option<&Value>) -> bool + Send + Sync + 'static,
    {
        Self::Fn(Arc::new(SyncRule(f)))
    }

    pub fn from_fn(f: impl RuleFn + 'static) -> Self {
        Self::Fn(Arc::new(f))
    }

    /// True when evaluation may need to await a function rule.
    pub fn is_dynamic(&self) -> bool {
        match self {
            AccessRule::Fn(_) => true,
            AccessRule::List(items) => items.iter().any(AccessRule::is_dynamic),
            AccessRule::Bool(_) | AccessRule::Expr(_) => false,
        }
    }
}

impl fmt::Debug for AccessRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessRule::Bool(value) => f.debug_tuple("Bool").field(value).finish(),
            AccessRule::Expr(expr) => f.debug_tuple("Expr").field(expr).finish(),
            AccessRule::List(items) => f.debug_tuple("List").field(items).finish(),
            AccessRule::Fn(_) => f.write_str("Fn(..)"),
        }
    }
}

impl From<bool> for AccessRule {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for AccessRule {
    fn from(value: &str) -> Self {
        Self::Expr(value.to_string())
    }
}

impl From<String> for AccessRule {
    fn from(value: String) -> Self {
        Self::Expr(value)
    }
}

impl<R: Into<AccessRule>> From<Vec<R>> for AccessRule {
    fn from(value: Vec<R>) -> Self {
        Self::any(value)
    }
}
