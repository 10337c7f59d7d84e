use std::fmt;

use crate::error::{QueryError, Result};
use crate::grammar::{FieldPath, SEPARATOR};

/// One `field[__asc|__desc]` token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey {
    pub path: FieldPath,
    pub ascending: bool,
}

/// Ordered sort keys; empty means no explicit ordering.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortSpec(pub Vec<SortKey>);

impl SortSpec {
    /// Parse a comma-separated sort string such as `name__desc,id`.
    ///
    /// The direction is matched case-insensitively; anything other than
    /// `desc` sorts ascending. Nested fields are written dotted
    /// (`dept.name__desc`).
    pub fn parse(s: &str) -> Result<Self> {
        let mut keys = Vec::new();
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let mut parts = token.split(SEPARATOR);
            let field = parts.next().unwrap_or_default();
            let direction = parts.next();
            if parts.next().is_some() {
                return Err(QueryError::MalformedSort {
                    token: token.to_owned(),
                });
            }
            let path = FieldPath::parse(field).map_err(|e| match e {
                QueryError::PathTooDeep { .. } => e,
                _ => QueryError::MalformedSort {
                    token: token.to_owned(),
                },
            })?;
            let ascending = !direction.is_some_and(|d| d.trim().eq_ignore_ascii_case("desc"));
            keys.push(SortKey { path, ascending });
        }
        Ok(Self(keys))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SortKey> {
        self.0.iter()
    }

    /// `a ASC, b DESC`; empty when there are no keys.
    pub fn to_order_clause(&self) -> String {
        self.0
            .iter()
            .map(|k| format!("{} {}", k.path, if k.ascending { "ASC" } else { "DESC" }))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Renders back to the wire form, always spelling the direction.
impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, k) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            let dir = if k.ascending { "asc" } else { "desc" };
            write!(f, "{}{SEPARATOR}{dir}", k.path)?;
        }
        Ok(())
    }
}
