//! Class-schema derivation for the opal persistence engine.
//!
//! A [`ClassSchema`] describes how one persisted class maps onto records:
//! its model kind, its persisted properties with coarse types and laziness
//! flags, and (for entities) the property holding its identity.
//!
//! Schemas are derived from an external [`Introspector`] by the
//! [`SchemaBuilder`] and cached process-wide by the [`SchemaRegistry`],
//! which hands out immutable, versioned snapshots.
//!
//! # Modules
//!
//! - [`introspect`]: The [`Introspector`] seam and an in-memory implementation
//! - [`schema`]: [`ClassSchema`], [`PropertySchema`], [`SchemaSet`]
//! - [`builder`]: [`SchemaBuilder`]
//! - [`registry`]: [`SchemaRegistry`] and [`SchemaSnapshot`]

pub mod builder;
pub mod error;
pub mod introspect;
pub mod registry;
pub mod schema;

pub use builder::{SchemaBuilder, DEFAULT_IDENTITY_PROPERTY};
pub use error::{SchemaError, SchemaResult};
pub use introspect::{ClassDefinition, InMemoryIntrospector, Introspector, PropertyDeclaration};
pub use registry::{SchemaRegistry, SchemaSnapshot};
pub use schema::{ClassSchema, PropertySchema, SchemaSet};
