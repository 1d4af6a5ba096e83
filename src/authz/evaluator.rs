use async_recursion::async_recursion;
use serde_json::Value;

use super::permissions::PermissionSet;
use super::rule::AccessRule;

/// Name lookup used while evaluating a rule.
///
/// A name holds when the caller's global set grants it, or, when a
/// doc-permission map is present, when that map grants the name with the
/// entity's prefix stripped.
#[derive(Debug, Clone, Copy)]
pub struct RuleScope<'a> {
    pub permissions: &'a PermissionSet,
    pub doc_permissions: Option<&'a Value>,
    pub prefix: Option<&'a str>,
}

impl<'a> RuleScope<'a> {
    pub fn global(permissions: &'a PermissionSet) -> Self {
        Self {
            permissions,
            doc_permissions: None,
            prefix: None,
        }
    }

    pub fn with_doc(mut self, doc_permissions: Option<&'a Value>, prefix: Option<&'a str>) -> Self {
        self.doc_permissions = doc_permissions;
        self.prefix = prefix;
        self
    }

    pub fn has(&self, name: &str) -> bool {
        if self.permissions.has(name) {
            return true;
        }

        let Some(doc) = self.doc_permissions else {
            return false;
        };

        let key = match self.prefix {
            Some(prefix) => match name.strip_prefix(prefix) {
                Some(stripped) => stripped,
                None => return false,
            },
            None => name,
        };

        doc.get(key).map(is_truthy).unwrap_or(false)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// AND over whitespace-separated terms, OR over `|` alternatives in a term.
pub fn evaluate_expr(expr: &str, has: impl Fn(&str) -> bool) -> bool {
    let mut terms = expr.split_whitespace().peekable();
    if terms.peek().is_none() {
        return false;
    }

    terms.all(|term| term.split('|').filter(|alt| !alt.is_empty()).any(|alt| has(alt)))
}

/// Decide a rule without awaiting. Returns `None` when a function rule is
/// reachable and the outcome depends on it.
pub fn evaluate_static(rule: &AccessRule, scope: &RuleScope<'_>) -> Option<bool> {
    match rule {
        AccessRule::Bool(value) => Some(*value),
        AccessRule::Expr(expr) => Some(evaluate_expr(expr, |name| scope.has(name))),
        AccessRule::List(items) => {
            let mut pending = false;
            for item in items {
                match evaluate_static(item, scope) {
                    Some(true) => return Some(true),
                    Some(false) => {}
                    None => pending = true,
                }
            }
            if pending {
                None
            } else {
                Some(false)
            }
        }
        AccessRule::Fn(_) => None,
    }
}

/// Evaluate any rule, awaiting function rules in declaration order.
#[async_recursion]
pub async fn evaluate<'a>(rule: &'a AccessRule, scope: &'a RuleScope<'a>) -> bool {
    match rule {
        AccessRule::Fn(f) => f.check(scope.permissions, scope.doc_permissions).await,
        AccessRule::List(items) => {
            for item in items {
                if evaluate(item, scope).await {
                    return true;
                }
            }
            false
        }
        other => evaluate_static(other, scope).unwrap_or(false),
    }
}
