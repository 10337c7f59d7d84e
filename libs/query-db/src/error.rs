//! Errors raised while loading, rendering and executing SQL statements.

use query_core::QueryError;
use thiserror::Error;

pub type SqlResult<T> = std::result::Result<T, SqlError>;

/// Statement-level failures.
///
/// `Execution` carries only the statement id; the rendered SQL text is
/// emitted at debug level where the failure happens and is never part of
/// the message.
#[derive(Debug, Error)]
pub enum SqlError {
    #[error("sql template not found: {id}")]
    TemplateNotFound { id: String },

    #[error("cannot render sql template '{id}': {reason}")]
    TemplateRender { id: String, reason: String },

    #[error("unsupported database product: {product}")]
    UnsupportedDialect { product: String },

    #[error("cannot bind parameter '{param}' as {declared}: {reason}")]
    Binding {
        param: String,
        declared: String,
        reason: String,
    },

    #[error("statement '{statement}' failed")]
    Execution {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("row mapping failed for '{statement}': {reason}")]
    RowMapping { statement: String, reason: String },

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl SqlError {
    pub(crate) fn render(id: &str, reason: impl Into<String>) -> Self {
        SqlError::TemplateRender {
            id: id.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn binding(param: &str, declared: impl ToString, reason: impl Into<String>) -> Self {
        SqlError::Binding {
            param: param.to_owned(),
            declared: declared.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn execution(statement: &str, source: sqlx::Error) -> Self {
        SqlError::Execution {
            statement: statement.to_owned(),
            source,
        }
    }
}
