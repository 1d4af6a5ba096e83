use serde_json::Value;

use crate::errors::{AclError, AclResult};

const ID_EXCLUSION: &str = "-_id";

/// A caller-requested projection, normalised to names where a leading `-`
/// marks an exclusion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Projection {
    names: Vec<String>,
}

impl Projection {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names
                .into_iter()
                .map(Into::into)
                .filter(|name: &String| !name.is_empty() && name != "-")
                .collect(),
        }
    }

    /// Accepts `"a -b"`, `["a", "-b"]` or `{"a": 1, "b": -1}`; `null` and
    /// empty forms mean no projection.
    pub fn parse(value: &Value) -> AclResult<Option<Self>> {
        let projection = match value {
            Value::Null => return Ok(None),
            Value::String(s) => Self::from_names(s.split_whitespace()),
            Value::Array(items) => {
                let mut names = Vec::with_capacity(items.len());
                for item in items {
                    let name = item
                        .as_str()
                        .ok_or_else(|| AclError::bad_request("select entries must be strings"))?;
                    names.extend(name.split_whitespace().map(str::to_string));
                }
                Self::from_names(names)
            }
            Value::Object(map) => Self::from_names(map.iter().map(|(name, flag)| {
                if is_exclusion_flag(flag) {
                    format!("-{name}")
                } else {
                    name.clone()
                }
            })),
            _ => return Err(AclError::bad_request("select must be a string, array or object")),
        };

        if projection.names.is_empty() {
            Ok(None)
        } else {
            Ok(Some(projection))
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_exclusion_only(&self) -> bool {
        self.names.iter().all(|name| name.starts_with('-'))
    }

    fn excludes_id(&self) -> bool {
        self.names.iter().any(|name| name == ID_EXCLUSION)
    }

    /// Narrow a policy allow-list by this projection. The result never holds
    /// a field absent from `allowed`, apart from the `-_id` marker.
    pub fn reconcile(&self, allowed: Vec<String>) -> Vec<String> {
        let mut selected: Vec<String> = if self.is_exclusion_only() {
            let excluded: Vec<&str> = self.names.iter().map(|name| &name[1..]).collect();
            allowed
                .into_iter()
                .filter(|field| !excluded.contains(&field.as_str()))
                .collect()
        } else {
            let included: Vec<&str> = self
                .names
                .iter()
                .filter(|name| !name.starts_with('-'))
                .map(String::as_str)
                .collect();

            let mut selected: Vec<String> = allowed
                .iter()
                .filter(|field| included.contains(&field.as_str()))
                .cloned()
                .collect();

            // Dotted requests reach into an allowed parent field.
            for name in &included {
                if let Some((head, _)) = name.split_once('.') {
                    if allowed.iter().any(|field| field == head) && !selected.iter().any(|s| s == name) {
                        selected.push(name.to_string());
                    }
                }
            }
            selected
        };

        if self.excludes_id() {
            selected.push(ID_EXCLUSION.to_string());
        }
        selected
    }
}

fn is_exclusion_flag(flag: &Value) -> bool {
    match flag {
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().map(|v| v <= 0.0).unwrap_or(false),
        Value::String(s) => matches!(s.as_str(), "0" | "-1" | "false"),
        Value::Null => true,
        _ => false,
    }
}
