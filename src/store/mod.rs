//! Storage collaborator interface.
//!
//! The engine never interprets filters beyond `{"and": [...]}`; whatever
//! implements [`Store`] owns query semantics.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::engine::populate::PopulateDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found in `{0}`")]
    Missing(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Arguments of a `find` call.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub filter: Value,
    /// `None` returns whole records. `Some` keeps the named fields plus the
    /// identifier, unless the list carries the `-_id` marker.
    pub select: Option<Vec<String>>,
    pub sort: Option<Value>,
    pub populate: Vec<PopulateDescriptor>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindQuery {
    pub fn new(filter: Value) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find(&self, entity: &str, query: FindQuery) -> Result<Vec<Value>, StoreError>;

    async fn find_one(
        &self,
        entity: &str,
        filter: &Value,
        select: Option<&[String]>,
        populate: &[PopulateDescriptor],
    ) -> Result<Option<Value>, StoreError>;

    async fn create(&self, entity: &str, data: Value) -> Result<Value, StoreError>;

    async fn save(&self, entity: &str, record: Value) -> Result<Value, StoreError>;

    async fn delete_one(&self, entity: &str, record: &Value) -> Result<(), StoreError>;

    async fn count_documents(&self, entity: &str, filter: &Value) -> Result<u64, StoreError>;

    async fn distinct(&self, entity: &str, field: &str, filter: &Value) -> Result<Vec<Value>, StoreError>;

    async fn exists(&self, entity: &str, filter: &Value) -> Result<bool, StoreError>;
}
