use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid property type: {0:?}")]
    InvalidPropertyType(String),

    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Opaque failure reported by a storage backend.
///
/// The engine never inspects backend errors; it surfaces them unchanged to
/// the caller of the operation that triggered the backend call.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl BackendError {
    /// Create a backend error from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create a backend error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Result alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
