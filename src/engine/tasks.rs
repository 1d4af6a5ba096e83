use serde_json::Value;

/// Post-processing applied to an outgoing record after decoration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Copy the populated `src` to `dst`, then collapse `src` back to identifiers.
    CopyAndDepopulate { src: String, dst: String },
    /// Unrecognised kinds are carried along and ignored.
    Unknown(String),
}

impl Task {
    pub fn parse(value: &Value) -> Task {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_uppercase()
            .replace('-', "_");
        let arg = |name: &str| {
            value
                .get("args")
                .and_then(|args| args.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        match (kind.as_str(), arg("src"), arg("dst")) {
            ("COPY_AND_DEPOPULATE", Some(src), Some(dst)) => Task::CopyAndDepopulate { src, dst },
            _ => Task::Unknown(kind),
        }
    }

    /// One task object or an array of them.
    pub fn parse_list(value: Option<&Value>) -> Vec<Task> {
        match value {
            Some(Value::Array(items)) => items.iter().map(Task::parse).collect(),
            Some(value @ Value::Object(_)) => vec![Task::parse(value)],
            _ => Vec::new(),
        }
    }

    pub fn apply(&self, record: &mut Value) {
        match self {
            Task::CopyAndDepopulate { src, dst } => {
                let Some(populated) = record.get(src).cloned() else {
                    return;
                };
                let collapsed = depopulate(&populated);
                if let Value::Object(map) = record {
                    map.insert(dst.clone(), populated);
                    map.insert(src.clone(), collapsed);
                }
            }
            Task::Unknown(kind) => {
                tracing::debug!(task = %kind, "unknown task ignored");
            }
        }
    }
}

fn depopulate(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(depopulate).collect()),
        Value::Object(map) => map.get("_id").cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}

pub fn apply_tasks(tasks: &[Task], record: &mut Value) {
    for task in tasks {
        task.apply(record);
    }
}
