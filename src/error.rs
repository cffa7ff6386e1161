use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid field: `{0}`")]
    InvalidField(String),

    #[error("Invalid operator: `{0}`")]
    InvalidOperator(String),

    #[error("Invalid operator arity: `{0}`")]
    InvalidOperatorArity(String),

    #[error("Invalid slice: {0}")]
    InvalidSlice(String),

    #[error("Limit out of range: {0}")]
    LimitOutOfRange(i64),

    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid schema: `{0}`")]
    InvalidSchema(String),

    #[error("Invalid search query: `{0}`")]
    InvalidSearchTerm(String),

    #[error("Invalid aggregation: `{0}`")]
    InvalidAggregation(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl QueryError {
    pub(crate) fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the error stems from rejected request input (4xx class)
    /// rather than from the storage layer.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            QueryError::InvalidField(_)
                | QueryError::InvalidOperator(_)
                | QueryError::InvalidOperatorArity(_)
                | QueryError::InvalidSlice(_)
                | QueryError::LimitOutOfRange(_)
                | QueryError::InvalidValue { .. }
                | QueryError::InvalidSchema(_)
                | QueryError::InvalidSearchTerm(_)
                | QueryError::InvalidAggregation(_)
        )
    }
}
