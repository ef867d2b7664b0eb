//! The per-unit-of-work session: the single authority on which live objects
//! exist and which identifier each of them carries.
//!
//! Live objects are stored in an arena and addressed by [`ObjectRef`]
//! handles, so arbitrarily cyclic object graphs need no shared ownership.
//! On top of the arena the [`Session`] keeps
//!
//! - the identity map (`Identifier` ⇄ `ObjectRef`, at most one object per
//!   identifier),
//! - the reconstituted set with each object's clean snapshot, used for
//!   shallow-field dirty detection,
//! - the outstanding [`LazyLoadingProxy`]s.
//!
//! Every accessor that observes an object ([`Session::load`],
//! [`Session::property`], [`Session::set_property`], ...) first drives any
//! pending lazy population to completion. The `peek` family does not.
//!
//! [`ObjectRef`]: opal_types::ObjectRef

pub mod error;
pub mod lazy;
pub mod object;
pub mod session;

pub use error::{SessionError, SessionResult};
pub use lazy::{Handle, LazyLoadingProxy, ObjectPopulation, PopulationError, ValuePopulation};
pub use object::ManagedObject;
pub use session::{Checkpoint, Session};
