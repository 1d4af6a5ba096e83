//! Per-entity policy declarations and the registry that holds them.

mod access;
mod hooks;
mod registry;
mod schema;

pub use access::{Access, FieldRule};
pub use hooks::{
    base_filter, hook, override_filter, validator, BaseFilterFn, Hook, Identifier, OverrideFilterFn,
    Validation, Validator,
};
pub use registry::PolicyRegistry;
pub use schema::PolicySchema;
