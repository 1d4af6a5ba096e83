use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{FindQuery, Store, StoreError};
use crate::engine::populate::PopulateDescriptor;

const ID_FIELD: &str = "_id";

/// In-process document store used by tests and the demo server.
///
/// Understands equality, `{"in": [...]}`, and `and`/`or` conjunctions; a
/// record field holding an array matches when any element is equal.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<HashMap<String, Vec<Value>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed records verbatim, assigning identifiers where missing.
    pub async fn insert_many(&self, entity: &str, records: Vec<Value>) -> Result<Vec<Value>, StoreError> {
        let mut state = self.state.lock().await;
        let collection = state.entry(entity.to_string()).or_default();
        let mut inserted = Vec::with_capacity(records.len());
        for record in records {
            let record = with_id(record)?;
            collection.push(record.clone());
            inserted.push(record);
        }
        Ok(inserted)
    }

    /// Every record of `entity`, unfiltered.
    pub async fn all(&self, entity: &str) -> Vec<Value> {
        let state = self.state.lock().await;
        state.get(entity).cloned().unwrap_or_default()
    }
}

fn with_id(record: Value) -> Result<Value, StoreError> {
    let Value::Object(mut map) = record else {
        return Err(StoreError::InvalidRecord("records must be objects".to_string()));
    };
    if !map.contains_key(ID_FIELD) {
        map.insert(ID_FIELD.to_string(), Value::String(Uuid::new_v4().to_string()));
    }
    Ok(Value::Object(map))
}

fn record_id(record: &Value) -> Result<&Value, StoreError> {
    record
        .get(ID_FIELD)
        .ok_or_else(|| StoreError::InvalidRecord("record has no `_id`".to_string()))
}

fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(record, |value, segment| value.get(segment))
}

pub(crate) fn matches(filter: &Value, record: &Value) -> bool {
    let Value::Object(conditions) = filter else {
        return filter.is_null();
    };

    conditions.iter().all(|(key, expected)| match key.as_str() {
        "and" => expected
            .as_array()
            .map(|items| items.iter().all(|item| matches(item, record)))
            .unwrap_or(false),
        "or" => expected
            .as_array()
            .map(|items| items.iter().any(|item| matches(item, record)))
            .unwrap_or(false),
        path => field_matches(lookup(record, path), expected),
    })
}

fn field_matches(actual: Option<&Value>, expected: &Value) -> bool {
    if let Some(options) = expected.get("in").and_then(Value::as_array) {
        return options.iter().any(|option| field_matches(actual, option));
    }

    match actual {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => items.iter().any(|item| item == expected),
        Some(value) => value == expected,
    }
}

fn project(record: &Value, select: Option<&[String]>) -> Value {
    let (Some(select), Value::Object(map)) = (select, record) else {
        return record.clone();
    };

    let keep_id = !select.iter().any(|name| name == "-_id");
    let mut out = Map::new();
    for (key, value) in map {
        let wanted = (keep_id && key == ID_FIELD)
            || select
                .iter()
                .any(|name| name == key || name.split('.').next() == Some(key.as_str()));
        if wanted {
            out.insert(key.clone(), value.clone());
        }
    }
    Value::Object(out)
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None, Some(_)) | (Some(Value::Null), Some(_)) => Ordering::Less,
        (Some(_), None) | (Some(_), Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn sort_records(records: &mut [Value], sort: &Value) {
    let keys: Vec<(String, bool)> = match sort {
        Value::Object(map) => map
            .iter()
            .map(|(key, dir)| {
                let descending = dir.as_i64() == Some(-1) || dir.as_str() == Some("desc");
                (key.clone(), descending)
            })
            .collect(),
        Value::String(spec) => spec
            .split_whitespace()
            .map(|key| match key.strip_prefix('-') {
                Some(key) => (key.to_string(), true),
                None => (key.to_string(), false),
            })
            .collect(),
        _ => return,
    };

    records.sort_by(|a, b| {
        keys.iter()
            .map(|(key, descending)| {
                let ord = compare(lookup(a, key), lookup(b, key));
                if *descending {
                    ord.reverse()
                } else {
                    ord
                }
            })
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

fn populate(state: &HashMap<String, Vec<Value>>, record: &mut Value, descriptors: &[PopulateDescriptor]) {
    for descriptor in descriptors {
        let Some(slot) = record.get_mut(&descriptor.path) else {
            continue;
        };
        let targets = state.get(&descriptor.model);
        let resolve = |id: &Value| -> Option<Value> {
            let found = targets?.iter().find(|candidate| {
                candidate.get(ID_FIELD) == Some(id)
                    && descriptor
                        .match_filter
                        .as_ref()
                        .map(|filter| matches(filter, candidate))
                        .unwrap_or(true)
            })?;
            let mut found = project(found, Some(descriptor.select.as_slice()));
            populate(state, &mut found, &descriptor.populate);
            Some(found)
        };

        let replacement = match &*slot {
            Value::Array(ids) => Value::Array(ids.iter().filter_map(|id| resolve(id)).collect()),
            Value::Null => Value::Null,
            id => resolve(id).unwrap_or(Value::Null),
        };
        *slot = replacement;
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find(&self, entity: &str, query: FindQuery) -> Result<Vec<Value>, StoreError> {
        let state = self.state.lock().await;
        let mut records: Vec<Value> = state
            .get(entity)
            .map(|records| {
                records
                    .iter()
                    .filter(|record| matches(&query.filter, record))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(sort) = &query.sort {
            sort_records(&mut records, sort);
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(records
            .into_iter()
            .skip(query.skip)
            .take(limit)
            .map(|record| {
                let mut record = project(&record, query.select.as_deref());
                populate(&state, &mut record, &query.populate);
                record
            })
            .collect())
    }

    async fn find_one(
        &self,
        entity: &str,
        filter: &Value,
        select: Option<&[String]>,
        descriptors: &[PopulateDescriptor],
    ) -> Result<Option<Value>, StoreError> {
        let state = self.state.lock().await;
        let found = state
            .get(entity)
            .and_then(|records| records.iter().find(|record| matches(filter, record)));

        Ok(found.map(|record| {
            let mut record = project(record, select);
            populate(&state, &mut record, descriptors);
            record
        }))
    }

    async fn create(&self, entity: &str, data: Value) -> Result<Value, StoreError> {
        let record = with_id(data)?;
        let mut state = self.state.lock().await;
        state.entry(entity.to_string()).or_default().push(record.clone());
        Ok(record)
    }

    async fn save(&self, entity: &str, record: Value) -> Result<Value, StoreError> {
        let id = record_id(&record)?.clone();
        let mut state = self.state.lock().await;
        let slot = state
            .get_mut(entity)
            .and_then(|records| records.iter_mut().find(|r| r.get(ID_FIELD) == Some(&id)))
            .ok_or_else(|| StoreError::Missing(entity.to_string()))?;
        *slot = record.clone();
        Ok(record)
    }

    async fn delete_one(&self, entity: &str, record: &Value) -> Result<(), StoreError> {
        let id = record_id(record)?;
        let mut state = self.state.lock().await;
        let records = state
            .get_mut(entity)
            .ok_or_else(|| StoreError::Missing(entity.to_string()))?;
        let before = records.len();
        records.retain(|r| r.get(ID_FIELD) != Some(id));
        if records.len() == before {
            return Err(StoreError::Missing(entity.to_string()));
        }
        Ok(())
    }

    async fn count_documents(&self, entity: &str, filter: &Value) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        let count = state
            .get(entity)
            .map(|records| records.iter().filter(|record| matches(filter, record)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn distinct(&self, entity: &str, field: &str, filter: &Value) -> Result<Vec<Value>, StoreError> {
        let state = self.state.lock().await;
        let mut values: Vec<Value> = Vec::new();
        let matching = state
            .get(entity)
            .into_iter()
            .flatten()
            .filter(|record| matches(filter, record));

        for record in matching {
            let found = match lookup(record, field) {
                Some(Value::Array(items)) => items.clone(),
                Some(value) => vec![value.clone()],
                None => continue,
            };
            for value in found {
                if !values.contains(&value) {
                    values.push(value);
                }
            }
        }
        Ok(values)
    }

    async fn exists(&self, entity: &str, filter: &Value) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .get(entity)
            .map(|records| records.iter().any(|record| matches(filter, record)))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_matches_conjunctions() {
        let record = json!({ "name": "x", "public": true, "tags": ["a", "b"] });

        assert!(matches(&json!({}), &record));
        assert!(matches(&json!({ "and": [{ "public": true }, { "name": "x" }] }), &record));
        assert!(!matches(&json!({ "and": [{ "public": false }, { "name": "x" }] }), &record));
        assert!(matches(&json!({ "or": [{ "public": false }, { "name": "x" }] }), &record));
        assert!(matches(&json!({ "tags": "b" }), &record));
        assert!(matches(&json!({ "name": { "in": ["y", "x"] } }), &record));
    }

    #[test]
    fn test_project_keeps_id_unless_excluded() {
        let record = json!({ "_id": "1", "a": 1, "b": 2 });
        let select = vec!["a".to_string()];
        assert_eq!(project(&record, Some(select.as_slice())), json!({ "_id": "1", "a": 1 }));

        let select = vec!["a".to_string(), "-_id".to_string()];
        assert_eq!(project(&record, Some(select.as_slice())), json!({ "a": 1 }));
    }

    #[tokio::test]
    async fn test_find_sorts_and_pages() {
        let store = MemoryStore::new();
        store
            .insert_many("items", vec![json!({ "n": 3 }), json!({ "n": 1 }), json!({ "n": 2 })])
            .await
            .unwrap();

        let query = FindQuery {
            filter: json!({}),
            sort: Some(json!({ "n": -1 })),
            skip: 1,
            limit: Some(1),
            ..FindQuery::default()
        };
        let found = store.find("items", query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["n"], 2);
    }

    #[tokio::test]
    async fn test_save_and_delete_require_existing_record() {
        let store = MemoryStore::new();
        let created = store.create("items", json!({ "n": 1 })).await.unwrap();

        let mut updated = created.clone();
        updated["n"] = json!(5);
        store.save("items", updated.clone()).await.unwrap();
        assert_eq!(store.all("items").await, vec![updated.clone()]);

        store.delete_one("items", &updated).await.unwrap();
        assert!(matches!(
            store.delete_one("items", &updated).await,
            Err(StoreError::Missing(_))
        ));
    }
}
