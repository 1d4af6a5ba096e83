//! Authorization primitives: the caller's permission set and access rules.
//!
//! Rules come in four shapes:
//! - `Bool` for fixed outcomes
//! - `Expr` for AND-of-OR permission names (`"isAdmin|isStaff isActive"`)
//! - `List` for OR over nested rules
//! - `Fn` for anything the names cannot express

mod evaluator;
mod permissions;
mod rule;

pub use evaluator::{evaluate, evaluate_expr, evaluate_static, RuleScope};
pub use permissions::{Caller, PermissionResolver, PermissionSet};
pub use rule::{AccessRule, RuleFn};
