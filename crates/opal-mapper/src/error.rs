use opal_session::SessionError;
use opal_types::{BackendError, ObjectRef};

/// Errors produced while mapping records to objects or objects to records.
///
/// Every variant is fatal for the record it concerns only; batch mapping
/// keeps going with the remaining records.
#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    #[error("invalid record {identifier:?}: {reason}")]
    InvalidRecord { identifier: String, reason: String },

    #[error("record {identifier} of {class_name} has no properties but the class is not lazy-loadable")]
    NotLazyLoadable {
        class_name: String,
        identifier: String,
    },

    #[error("no persistable class {0}")]
    UnknownClass(String),

    #[error("{class_name}.{property} of record {identifier}: expected {expected}, record holds {found}")]
    TypeMismatch {
        class_name: String,
        identifier: String,
        property: String,
        expected: String,
        found: String,
    },

    #[error("record {identifier} is no longer available from the source")]
    RecordNotFound { identifier: String },

    #[error("{class_name} {object} is referenced but has no identifier")]
    UnidentifiedReference {
        object: ObjectRef,
        class_name: String,
    },

    #[error("record source error: {0}")]
    Source(#[from] BackendError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Result alias for mapper operations.
pub type MapperResult<T> = Result<T, MapperError>;
