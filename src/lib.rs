pub mod app;
pub mod authz;
pub mod config;
pub mod context;
pub mod demo;
pub mod engine;
pub mod errors;
pub mod jwt;
pub mod policy;
pub mod routes;
pub mod store;

pub use app::{create_app, AppState};
pub use context::{MiddlewareContext, RequestContext};
pub use engine::OperationPipeline;
pub use errors::{AclError, AclResult};
