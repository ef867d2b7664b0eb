use opal_mapper::MapperError;
use opal_schema::SchemaError;
use opal_session::SessionError;
use opal_types::{BackendError, Identifier, ObjectRef, TypeError};

/// Errors from the unit of work.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Mapper(#[from] MapperError),

    #[error(transparent)]
    Type(#[from] TypeError),

    /// Opaque failure reported by the storage backend.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("{class_name} {object} has no value for its identity property {property}")]
    MissingIdentity {
        class_name: String,
        object: ObjectRef,
        property: String,
    },

    #[error("{class_name}.{property} cannot identify an object: {found} values are not supported")]
    InvalidIdentity {
        class_name: String,
        property: String,
        found: String,
    },

    #[error("identifier {identifier} is claimed by more than one object")]
    DuplicateIdentifier { identifier: Identifier },

    #[error("object {0} was passed to update but has never been persisted")]
    NotPersisted(ObjectRef),

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result alias for unit-of-work operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;
