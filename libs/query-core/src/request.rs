use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{QueryError, Result};
use crate::grammar::SEPARATOR;
use crate::signature::SignatureGuard;

pub const DEFAULT_LIMIT: u64 = 50;

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

/// A filter/sort/paging request in its transport form.
///
/// Conditions keep insertion order; that order feeds the signature and the
/// generated SQL text.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[serde(alias = "targetEntityName", alias = "cls")]
    pub entity: String,
    #[serde(default, deserialize_with = "scalar_map")]
    pub conditions: IndexMap<String, String>,
    #[serde(default)]
    pub sort: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Accept JSON scalars as condition values (`{"age__eq": 30}`).
fn scalar_map<'de, D>(de: D) -> std::result::Result<IndexMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    let raw = IndexMap::<String, serde_json::Value>::deserialize(de)?;
    raw.into_iter()
        .map(|(k, v)| {
            let s = match v {
                serde_json::Value::String(s) => s,
                serde_json::Value::Null => String::new(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(D::Error::custom(format!(
                        "condition '{k}' must be a scalar, got {other}"
                    )))
                }
            };
            Ok((k, s))
        })
        .collect()
}

impl QueryRequest {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            conditions: IndexMap::new(),
            sort: String::new(),
            offset: 0,
            limit: DEFAULT_LIMIT,
            signature: None,
        }
    }

    /// Add a condition; a repeated key replaces the previous value in place.
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.insert(key.into(), value.into());
        self
    }

    pub fn asc(self, field: &str) -> Self {
        self.push_sort(field, "asc")
    }

    pub fn desc(self, field: &str) -> Self {
        self.push_sort(field, "desc")
    }

    fn push_sort(mut self, field: &str, dir: &str) -> Self {
        if !self.sort.is_empty() {
            self.sort.push(',');
        }
        self.sort.push_str(field);
        self.sort.push_str(SEPARATOR);
        self.sort.push_str(dir);
        self
    }

    /// 1-based page index; index 0 is treated as the first page.
    pub fn page(mut self, page_index: u64, page_size: u64) -> Self {
        self.offset = page_index.saturating_sub(1) * page_size;
        self.limit = page_size;
        self
    }

    pub fn with_offset(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// Attach the signature computed by `guard`.
    pub fn signed(mut self, guard: &SignatureGuard) -> Self {
        self.signature = Some(guard.sign(&self));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.entity.trim().is_empty() {
            return Err(QueryError::InvalidRequest("target entity is required".into()));
        }
        if self.limit == 0 {
            return Err(QueryError::InvalidRequest("limit must be positive".into()));
        }
        Ok(())
    }

    /// Parse a request from JSON and verify its signature unless `guard` is
    /// in development mode.
    pub fn from_json(json: &str, guard: &SignatureGuard) -> Result<Self> {
        let req: QueryRequest = serde_json::from_str(json)
            .map_err(|e| QueryError::InvalidRequest(format!("malformed request: {e}")))?;
        req.validate()?;
        guard.check(&req)?;
        Ok(req)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| QueryError::InvalidRequest(e.to_string()))
    }
}
