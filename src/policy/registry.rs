use std::collections::HashMap;

use super::schema::PolicySchema;
use crate::errors::{AclError, AclResult};

/// All entity policies known to the engine.
///
/// Populated during startup and then shared read-only behind an `Arc`;
/// tests build their own isolated registries.
#[derive(Default, Clone)]
pub struct PolicyRegistry {
    schemas: HashMap<String, PolicySchema>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema. Each entity may be registered once.
    pub fn register(&mut self, schema: PolicySchema) -> AclResult<()> {
        let name = schema.name().to_string();
        if self.schemas.contains_key(&name) {
            return Err(AclError::configuration(format!(
                "policy for `{name}` already registered"
            )));
        }

        tracing::debug!(entity = %name, fields = schema.field_rules().len(), "policy registered");
        self.schemas.insert(name, schema);
        Ok(())
    }

    pub fn with(mut self, schema: PolicySchema) -> AclResult<Self> {
        self.register(schema)?;
        Ok(self)
    }

    pub fn get(&self, entity: &str) -> Option<&PolicySchema> {
        self.schemas.get(entity)
    }

    pub fn require(&self, entity: &str) -> AclResult<&PolicySchema> {
        self.get(entity)
            .ok_or_else(|| AclError::not_found(format!("unknown entity `{entity}`")))
    }

    pub fn entities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
