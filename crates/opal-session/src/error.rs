use opal_types::{Identifier, ObjectRef, ProxyId};

use crate::lazy::PopulationError;

/// Errors from session bookkeeping.
///
/// Identity errors indicate a programming or data error in the caller and
/// are always surfaced, never swallowed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("identifier {identifier} is already in use by another object")]
    IdentifierAlreadyInUse { identifier: Identifier },

    #[error("object {object} is already registered as {identifier}")]
    ObjectAlreadyRegistered {
        object: ObjectRef,
        identifier: Identifier,
    },

    /// The object has no identifier in this session.
    #[error("object {0} is not registered in this session")]
    UnknownObject(ObjectRef),

    /// The handle does not address any object in this session's arena.
    #[error("no object {0} in this session")]
    NoSuchObject(ObjectRef),

    #[error("unknown lazy-loading proxy {0}")]
    UnknownProxy(ProxyId),

    #[error("populating {target} failed: {source}")]
    Population {
        target: String,
        source: PopulationError,
    },

    #[error("{class_name}.{property} holds a lazy-loading proxy, which is not serializable")]
    NotSerializable {
        class_name: String,
        property: String,
    },

    #[error("value object {class_name} {object} is immutable once identified")]
    ImmutableValueObject {
        class_name: String,
        object: ObjectRef,
    },

    #[error("value object {0} contains itself")]
    CyclicValueObject(ObjectRef),

    #[error("object {0} is referenced but has no identifier")]
    UnidentifiedReference(ObjectRef),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
