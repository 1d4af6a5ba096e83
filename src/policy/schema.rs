use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::access::{Access, FieldRule};
use super::hooks::{BaseFilterFn, Hook, Identifier, OverrideFilterFn, Validator};
use crate::authz::AccessRule;

/// Field names split by how their rules evaluate.
#[derive(Debug, Clone, Default)]
pub(crate) struct FieldIndex {
    /// Rules decidable from permission names alone.
    pub(crate) static_fields: Vec<String>,
    /// Rules that reach a function somewhere.
    pub(crate) dynamic_fields: Vec<String>,
}

impl FieldIndex {
    fn build(rules: &BTreeMap<String, FieldRule>) -> Self {
        let (dynamic, fixed): (Vec<_>, Vec<_>) = rules.iter().partition(|(_, rule)| rule.is_dynamic());
        Self {
            static_fields: fixed.into_iter().map(|(name, _)| name.clone()).collect(),
            dynamic_fields: dynamic.into_iter().map(|(name, _)| name.clone()).collect(),
        }
    }
}

/// Declarative policy for one entity type.
///
/// Built once at startup through the `with_*` builders, then only read.
#[derive(Default, Clone)]
pub struct PolicySchema {
    name: String,
    field_rules: BTreeMap<String, FieldRule>,
    field_index: FieldIndex,
    base_filters: HashMap<Access, Arc<dyn BaseFilterFn>>,
    override_filters: HashMap<Access, Arc<dyn OverrideFilterFn>>,
    route_guards: HashMap<Access, AccessRule>,
    doc_permissions: HashMap<Access, Arc<dyn Hook>>,
    validators: HashMap<Access, Vec<Arc<dyn Validator>>>,
    prepare: HashMap<Access, Vec<Arc<dyn Hook>>>,
    transform: HashMap<Access, Vec<Arc<dyn Hook>>>,
    decorate: HashMap<Access, Vec<Arc<dyn Hook>>>,
    decorate_all: HashMap<Access, Vec<Arc<dyn Hook>>>,
    mandatory_fields: HashMap<Access, Vec<String>>,
    identifier: Identifier,
    permission_field: Option<String>,
    doc_permission_prefix: Option<String>,
    relations: BTreeMap<String, String>,
    sub_schemas: BTreeMap<String, PolicySchema>,
    max_limit: Option<usize>,
}

impl PolicySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace every field rule; the derived index is rebuilt in the same step.
    pub fn set_field_rules(&mut self, rules: BTreeMap<String, FieldRule>) {
        let index = FieldIndex::build(&rules);
        self.field_rules = rules;
        self.field_index = index;
    }

    pub fn with_field(mut self, field: impl Into<String>, rule: impl Into<FieldRule>) -> Self {
        let mut rules = std::mem::take(&mut self.field_rules);
        rules.insert(field.into(), rule.into());
        self.set_field_rules(rules);
        self
    }

    pub fn with_base_filter(mut self, access: Access, filter: Arc<dyn BaseFilterFn>) -> Self {
        self.base_filters.insert(access, filter);
        self
    }

    pub fn with_override_filter(mut self, access: Access, filter: Arc<dyn OverrideFilterFn>) -> Self {
        self.override_filters.insert(access, filter);
        self
    }

    pub fn with_route_guard(mut self, access: Access, rule: impl Into<AccessRule>) -> Self {
        self.route_guards.insert(access, rule.into());
        self
    }

    pub fn with_doc_permissions(mut self, access: Access, hook: Arc<dyn Hook>) -> Self {
        self.doc_permissions.insert(access, hook);
        self
    }

    pub fn with_validate(mut self, access: Access, validator: Arc<dyn Validator>) -> Self {
        self.validators.entry(access).or_default().push(validator);
        self
    }

    pub fn with_prepare(mut self, access: Access, hook: Arc<dyn Hook>) -> Self {
        self.prepare.entry(access).or_default().push(hook);
        self
    }

    pub fn with_transform(mut self, access: Access, hook: Arc<dyn Hook>) -> Self {
        self.transform.entry(access).or_default().push(hook);
        self
    }

    pub fn with_decorate(mut self, access: Access, hook: Arc<dyn Hook>) -> Self {
        self.decorate.entry(access).or_default().push(hook);
        self
    }

    pub fn with_decorate_all(mut self, access: Access, hook: Arc<dyn Hook>) -> Self {
        self.decorate_all.entry(access).or_default().push(hook);
        self
    }

    pub fn with_mandatory_fields<I, S>(mut self, access: Access, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mandatory_fields
            .insert(access, fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_identifier(mut self, identifier: Identifier) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn with_permission_field(mut self, field: impl Into<String>) -> Self {
        self.permission_field = Some(field.into());
        self
    }

    pub fn with_doc_permission_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.doc_permission_prefix = Some(prefix.into());
        self
    }

    pub fn with_relation(mut self, field: impl Into<String>, entity: impl Into<String>) -> Self {
        self.relations.insert(field.into(), entity.into());
        self
    }

    /// Declare `field` as an array of sub-documents governed by `schema`.
    pub fn with_sub_collection(mut self, field: impl Into<String>, schema: PolicySchema) -> Self {
        self.sub_schemas.insert(field.into(), schema);
        self
    }

    pub fn with_max_limit(mut self, limit: usize) -> Self {
        self.max_limit = Some(limit);
        self
    }

    pub fn field_rules(&self) -> &BTreeMap<String, FieldRule> {
        &self.field_rules
    }

    pub(crate) fn field_index(&self) -> &FieldIndex {
        &self.field_index
    }

    pub fn base_filter(&self, access: Access) -> Option<&Arc<dyn BaseFilterFn>> {
        self.base_filters.get(&access)
    }

    pub fn override_filter(&self, access: Access) -> Option<&Arc<dyn OverrideFilterFn>> {
        self.override_filters.get(&access)
    }

    pub fn route_guard(&self, access: Access) -> Option<&AccessRule> {
        self.route_guards.get(&access)
    }

    pub fn doc_permissions_hook(&self, access: Access) -> Option<&Arc<dyn Hook>> {
        self.doc_permissions.get(&access)
    }

    pub fn validators(&self, access: Access) -> &[Arc<dyn Validator>] {
        self.validators.get(&access).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn prepare_hooks(&self, access: Access) -> &[Arc<dyn Hook>] {
        self.prepare.get(&access).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn transform_hooks(&self, access: Access) -> &[Arc<dyn Hook>] {
        self.transform.get(&access).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn decorate_hooks(&self, access: Access) -> &[Arc<dyn Hook>] {
        self.decorate.get(&access).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn decorate_all_hooks(&self, access: Access) -> &[Arc<dyn Hook>] {
        self.decorate_all.get(&access).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn mandatory_fields(&self, access: Access) -> &[String] {
        self.mandatory_fields.get(&access).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn permission_field(&self) -> Option<&str> {
        self.permission_field.as_deref()
    }

    pub fn doc_permission_prefix(&self) -> Option<&str> {
        self.doc_permission_prefix.as_deref()
    }

    pub fn relation(&self, field: &str) -> Option<&str> {
        self.relations.get(field).map(String::as_str)
    }

    pub fn sub_collections(&self) -> impl Iterator<Item = &str> {
        self.sub_schemas.keys().map(String::as_str)
    }

    pub fn sub_schema(&self, field: &str) -> Option<&PolicySchema> {
        self.sub_schemas.get(field)
    }

    /// Walk a dotted sub-collection path (`"comments.replies"`).
    pub fn resolve_path(&self, path: Option<&str>) -> Option<&PolicySchema> {
        match path {
            None => Some(self),
            Some(path) => path
                .split('.')
                .try_fold(self, |schema, segment| schema.sub_schema(segment)),
        }
    }

    pub fn max_limit(&self) -> Option<usize> {
        self.max_limit
    }
}
