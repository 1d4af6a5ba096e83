use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::authz::AccessRule;
use crate::errors::AclError;

/// The operation a rule, hook or filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Create,
    Read,
    Update,
    List,
    Delete,
    Distinct,
    Count,
    /// Reaching into a sub-collection field.
    Sub,
}

impl Access {
    pub const ALL: [Access; 8] = [
        Access::Create,
        Access::Read,
        Access::Update,
        Access::List,
        Access::Delete,
        Access::Distinct,
        Access::Count,
        Access::Sub,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Create => "create",
            Access::Read => "read",
            Access::Update => "update",
            Access::List => "list",
            Access::Delete => "delete",
            Access::Distinct => "distinct",
            Access::Count => "count",
            Access::Sub => "sub",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Access {
    type Err = AclError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Access::ALL
            .into_iter()
            .find(|access| access.as_str() == s)
            .ok_or_else(|| AclError::bad_request(format!("unknown access `{s}`")))
    }
}

/// Per-field rule: an operation-specific branch, falling back to a blanket rule.
#[derive(Debug, Clone, Default)]
pub struct FieldRule {
    blanket: Option<AccessRule>,
    per_access: HashMap<Access, AccessRule>,
}

impl FieldRule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same rule for every operation.
    pub fn all(rule: impl Into<AccessRule>) -> Self {
        Self {
            blanket: Some(rule.into()),
            per_access: HashMap::new(),
        }
    }

    pub fn on(mut self, access: Access, rule: impl Into<AccessRule>) -> Self {
        self.per_access.insert(access, rule.into());
        self
    }

    pub fn resolve(&self, access: Access) -> Option<&AccessRule> {
        self.per_access.get(&access).or(self.blanket.as_ref())
    }

    /// Rule for reaching into this field as a sub-collection during
    /// `access`: the `sub` branch when declared, else [`Self::resolve`].
    pub fn resolve_sub(&self, access: Access) -> Option<&AccessRule> {
        self.per_access.get(&Access::Sub).or_else(|| self.resolve(access))
    }

    pub fn is_dynamic(&self) -> bool {
        self.blanket.iter().chain(self.per_access.values()).any(AccessRule::is_dynamic)
    }
}

impl From<AccessRule> for FieldRule {
    fn from(rule: AccessRule) -> Self {
        Self::all(rule)
    }
}

impl From<bool> for FieldRule {
    fn from(value: bool) -> Self {
        Self::all(value)
    }
}

impl From<&str> for FieldRule {
    fn from(value: &str) -> Self {
        Self::all(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_round_trips_through_str() {
        for access in Access::ALL {
            assert_eq!(access.as_str().parse::<Access>().unwrap(), access);
        }
        assert!("subs".parse::<Access>().is_err());
    }

    #[test]
    fn test_field_rule_prefers_operation_branch() {
        let rule = FieldRule::all("isStaff").on(Access::Read, true);

        assert!(matches!(rule.resolve(Access::Read), Some(AccessRule::Bool(true))));
        assert!(matches!(rule.resolve(Access::Update), Some(AccessRule::Expr(e)) if e == "isStaff"));
        assert!(FieldRule::new().on(Access::Read, true).resolve(Access::List).is_none());
    }

    #[test]
    fn test_sub_branch_overrides_operation_rule() {
        let rule = FieldRule::new().on(Access::Read, true).on(Access::Sub, false);
        assert!(matches!(rule.resolve_sub(Access::Read), Some(AccessRule::Bool(false))));

        let rule = FieldRule::new().on(Access::Read, true);
        assert!(matches!(rule.resolve_sub(Access::Read), Some(AccessRule::Bool(true))));
        assert!(rule.resolve_sub(Access::Update).is_none());

        let rule = FieldRule::all("isStaff");
        assert!(matches!(rule.resolve_sub(Access::Update), Some(AccessRule::Expr(e)) if e == "isStaff"));
    }
}
