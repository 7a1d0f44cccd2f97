#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A required setting or parameter is missing or out of range.
    /// Rejected before any network I/O and never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a [`CoreError::Configuration`] built from anything
    /// string-like.
    pub fn config(msg: impl Into<String>) -> Self {
        CoreError::Configuration(msg.into())
    }
}
