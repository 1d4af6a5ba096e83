use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw paging input: numbers or numeric strings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageRequest {
    pub skip: Option<Value>,
    pub limit: Option<Value>,
    pub page: Option<Value>,
    pub page_size: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub skip: usize,
    pub limit: usize,
}

fn parse_count(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    }
}

impl PageRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: impl Into<Value>) -> Self {
        self.limit = Some(limit.into());
        self
    }

    pub fn with_skip(mut self, skip: impl Into<Value>) -> Self {
        self.skip = Some(skip.into());
        self
    }

    pub fn with_page(mut self, page: impl Into<Value>) -> Self {
        self.page = Some(page.into());
        self
    }

    /// Clamp to `max_limit`. Anything unusable for the limit falls back to
    /// the maximum; `page` (1-based) only applies when `skip` is absent.
    pub fn resolve(&self, max_limit: usize) -> Page {
        let limit = self
            .limit
            .as_ref()
            .or(self.page_size.as_ref())
            .and_then(parse_count)
            .filter(|limit| *limit > 0 && *limit <= max_limit)
            .unwrap_or(max_limit);

        let skip = match (&self.skip, &self.page) {
            (Some(skip), _) => parse_count(skip).unwrap_or(0),
            (None, Some(page)) => parse_count(page)
                .filter(|page| *page >= 1)
                .map(|page| (page - 1).saturating_mul(limit))
                .unwrap_or(0),
            (None, None) => 0,
        };

        Page { skip, limit }
    }
}
