//! Foundation types for the opal persistence engine.
//!
//! This crate provides the identity, value, and record types shared by every
//! other opal crate. It performs no I/O and holds no session state.
//!
//! # Key Types
//!
//! - [`Identifier`]: Opaque, session-unique name of one logical object
//! - [`ObjectRef`]: Arena handle addressing a live object inside a session
//! - [`ModelKind`]: Entity, value object, or repository
//! - [`PropertyType`]: Coarse declared type of a persisted property
//! - [`Value`]: Live property value (may reference other objects)
//! - [`RawRecord`]: Unit exchanged with a storage backend
//! - [`ContentHasher`]: Domain-separated BLAKE3 digests for value objects

pub mod error;
pub mod hash;
pub mod identifier;
pub mod model;
pub mod record;
pub mod value;

pub use error::{BackendError, BackendResult, TypeError};
pub use hash::ContentHasher;
pub use identifier::{Identifier, ObjectRef, ProxyId};
pub use model::{ModelKind, PropertyType};
pub use record::{RawRecord, RecordTag, RecordValue};
pub use value::Value;
