/// Configuration errors raised while deriving class schemas.
///
/// All of these are fatal: they describe a class definition the engine
/// cannot persist, and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid class {class_name}: {reason}")]
    InvalidClass { class_name: String, reason: String },

    #[error("invalid value object {class_name}: {reason}")]
    InvalidValueObject { class_name: String, reason: String },

    #[error("invalid declared type {declared:?} for property {class_name}.{property}")]
    InvalidPropertyType {
        class_name: String,
        property: String,
        declared: String,
    },
}

/// Result alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;
