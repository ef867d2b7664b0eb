//! Turns raw records into live object graphs inside a [`Session`], and
//! live objects back into records.
//!
//! The mapper never creates a second live object for an identifier the
//! session already knows; new objects are registered before their
//! properties are thawed, so cyclic references resolve to the instance
//! being built. Records without properties become lazy placeholders that
//! re-fetch themselves from a [`RecordSource`] on first access.
//!
//! [`Session`]: opal_session::Session

pub mod error;
pub mod factory;
pub mod freeze;
pub mod mapper;
pub mod source;

pub use error::{MapperError, MapperResult};
pub use factory::{ObjectFactory, SchemaObjectFactory};
pub use freeze::IdentifierLookup;
pub use mapper::DataMapper;
pub use source::RecordSource;
