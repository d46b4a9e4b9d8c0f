use thiserror::Error;

/// Domain-level validation errors, raised while constructing or mutating
/// the value types that cross the task submission boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("{0}")]
    ValidationError(String),

    #[error("unknown task kind: {0}")]
    UnknownTaskKind(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for DomainError {
    fn from(e: serde_json::Error) -> Self {
        DomainError::SerializationError(e.to_string())
    }
}
