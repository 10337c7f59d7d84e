use thiserror::Error;

/// Errors raised while parsing, compiling or verifying a query request.
///
/// Every variant is terminal for the request that produced it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("malformed condition key '{key}': {reason}")]
    MalformedKey { key: String, reason: &'static str },

    #[error("condition key '{key}' has more than two path segments")]
    PathTooDeep { key: String },

    #[error("unknown operator '{op}' in condition key '{key}'")]
    UnknownOperator { key: String, op: String },

    #[error("malformed sort token '{token}'")]
    MalformedSort { token: String },

    #[error("field '{field}' not found on entity '{entity}'")]
    FieldNotFound { entity: String, field: String },

    #[error("cannot convert '{raw}' to {declared} for field '{entity}.{field}'")]
    Coercion {
        entity: String,
        field: String,
        declared: String,
        raw: String,
    },

    /// Deliberately opaque: never carries the expected digest or the salt.
    #[error("request rejected")]
    SignatureMismatch,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("condition handler for '{field}' failed: {reason}")]
    Handler { field: String, reason: String },
}

impl QueryError {
    /// Errors caused by a field that cannot be used, as opposed to a request
    /// that is malformed. Only these are tolerated inside a disjunction.
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            QueryError::FieldNotFound { .. } | QueryError::Coercion { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
