use thiserror::Error;

#[derive(Debug, Error)]
pub enum FakeError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("Duplicate entry for key '{constraint}'")]
    UniqueKeyViolation { constraint: String },

    #[error("replica read of rows written earlier in this request: {query}")]
    ReplicaAfterWrite { query: String },

    #[error("Schema coercion failed: {0}")]
    SchemaCoercion(String),
}
