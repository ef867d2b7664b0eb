//! The unit of work.
//!
//! [`PersistenceManager::persist_all`] walks every object reachable from
//! the repositories' added objects and the session's reconstituted
//! objects, classifies each one as new, dirty or unchanged, and hands the
//! result to a [`Backend`] in a single [`ChangeSet`]. Session bookkeeping
//! is only updated once the backend accepted the commit, so a failed
//! commit can simply be retried.

pub mod backend;
pub mod change;
pub mod config;
pub mod error;
pub mod manager;
pub mod memory;
pub mod query;
pub mod repository;

pub use backend::Backend;
pub use change::{ChangeSet, CommitReport, ObjectChange};
pub use config::{IdentifierStrategy, PersistenceConfig};
pub use error::{PersistenceError, PersistenceResult};
pub use manager::PersistenceManager;
pub use memory::InMemoryBackend;
pub use query::{Constraint, Query};
pub use repository::{ObjectRepository, Repository};
