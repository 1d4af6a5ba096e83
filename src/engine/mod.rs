//! Per-request resolution: which fields, which records, which joins, and
//! what permission metadata goes back with each record.

pub mod annotate;
pub mod filter;
pub mod pagination;
pub mod pipeline;
pub mod populate;
pub mod projection;
pub mod select;
pub mod tasks;

pub use annotate::{add_empty_permissions, annotate_doc, annotate_field_permissions, empty_permissions};
pub use filter::{compose_filter, ComposedFilter, RequestFilterCache, Restriction};
pub use pagination::{Page, PageRequest};
pub use pipeline::{ListResult, OperationPipeline, QueryOptions};
pub use populate::{resolve_populate, retain_selected, PopulateDescriptor, PopulateEntry};
pub use projection::Projection;
pub use select::{fetch_fields, gen_allowed_fields, pick_allowed, select_fields};
pub use tasks::Task;
