//! Process-wide schema cache with explicit versioning.
//!
//! The registry never mutates a published [`SchemaSet`]. Every rebuild
//! produces a complete new set which is swapped in atomically together
//! with a bumped version, so readers holding a [`SchemaSnapshot`] never
//! observe a half-built mapping.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::builder::{SchemaBuilder, DEFAULT_IDENTITY_PROPERTY};
use crate::error::SchemaResult;
use crate::introspect::Introspector;
use crate::schema::{ClassSchema, SchemaSet};

/// An immutable, versioned view of the schema mapping.
#[derive(Clone, Debug)]
pub struct SchemaSnapshot {
    pub version: u64,
    pub schemas: Arc<SchemaSet>,
}

impl SchemaSnapshot {
    pub fn get(&self, class_name: &str) -> Option<&ClassSchema> {
        self.schemas.get(class_name)
    }
}

struct RegistryState {
    version: u64,
    requested: BTreeSet<String>,
    schemas: Arc<SchemaSet>,
}

/// Shared cache of class schemas.
pub struct SchemaRegistry {
    introspector: Arc<dyn Introspector>,
    identity_property: String,
    state: RwLock<RegistryState>,
}

impl SchemaRegistry {
    /// Create an empty registry (version 0, no schemas).
    pub fn new(introspector: Arc<dyn Introspector>) -> Self {
        Self {
            introspector,
            identity_property: DEFAULT_IDENTITY_PROPERTY.to_string(),
            state: RwLock::new(RegistryState {
                version: 0,
                requested: BTreeSet::new(),
                schemas: Arc::new(SchemaSet::new()),
            }),
        }
    }

    /// Override the synthetic identity property name used for every build.
    pub fn with_identity_property(mut self, name: impl Into<String>) -> Self {
        self.identity_property = name.into();
        self
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> SchemaSnapshot {
        let state = self.state.read().expect("lock poisoned");
        SchemaSnapshot {
            version: state.version,
            schemas: Arc::clone(&state.schemas),
        }
    }

    pub fn version(&self) -> u64 {
        self.state.read().expect("lock poisoned").version
    }

    /// Make sure schemas for `class_names` are built.
    ///
    /// Returns the current snapshot unchanged when every class has been
    /// requested before; otherwise rebuilds and publishes a new version.
    pub fn ensure<I, S>(&self, class_names: I) -> SchemaResult<SchemaSnapshot>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let wanted: BTreeSet<String> = class_names
            .into_iter()
            .map(|n| n.as_ref().to_string())
            .collect();
        {
            let state = self.state.read().expect("lock poisoned");
            if wanted.is_subset(&state.requested) {
                return Ok(SchemaSnapshot {
                    version: state.version,
                    schemas: Arc::clone(&state.schemas),
                });
            }
        }
        self.rebuild(wanted)
    }

    /// Build schemas for every class the introspector knows about.
    pub fn ensure_all(&self) -> SchemaResult<SchemaSnapshot> {
        self.ensure(self.introspector.known_classes())
    }

    /// Rebuild after the named classes changed.
    ///
    /// The whole mapping is rebuilt from the introspector and replaces the
    /// previous one. On error the previous snapshot stays published.
    pub fn invalidate<I, S>(&self, class_names: I) -> SchemaResult<SchemaSnapshot>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let changed: BTreeSet<String> = class_names
            .into_iter()
            .map(|n| n.as_ref().to_string())
            .collect();
        self.rebuild(changed)
    }

    fn rebuild(&self, additional: BTreeSet<String>) -> SchemaResult<SchemaSnapshot> {
        let mut state = self.state.write().expect("lock poisoned");
        let requested: BTreeSet<String> =
            state.requested.union(&additional).cloned().collect();

        let schemas = SchemaBuilder::new(self.introspector.as_ref())
            .with_identity_property(self.identity_property.clone())
            .build(&requested)?;

        state.version += 1;
        state.requested = requested;
        state.schemas = Arc::new(schemas);
        info!(
            version = state.version,
            classes = state.schemas.len(),
            "schema set published"
        );

        Ok(SchemaSnapshot {
            version: state.version,
            schemas: Arc::clone(&state.schemas),
        })
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("SchemaRegistry")
            .field("version", &state.version)
            .field("classes", &state.schemas.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SchemaError;
    use crate::introspect::{ClassDefinition, InMemoryIntrospector};

    fn registry() -> (Arc<InMemoryIntrospector>, SchemaRegistry) {
        let introspector = Arc::new(InMemoryIntrospector::from_definitions([
            ClassDefinition::entity("Order").property("total", "int"),
            ClassDefinition::entity("Customer").property("name", "string"),
        ]));
        let registry = SchemaRegistry::new(introspector.clone());
        (introspector, registry)
    }

    #[test]
    fn starts_empty() {
        let (_, registry) = registry();
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.schemas.is_empty());
    }

    #[test]
    fn ensure_builds_once() {
        let (_, registry) = registry();
        let first = registry.ensure(["Order"]).unwrap();
        assert_eq!(first.version, 1);
        assert!(first.get("Order").is_some());

        let again = registry.ensure(["Order"]).unwrap();
        assert_eq!(again.version, 1);
        assert!(Arc::ptr_eq(&first.schemas, &again.schemas));
    }

    #[test]
    fn ensure_new_class_extends_set() {
        let (_, registry) = registry();
        registry.ensure(["Order"]).unwrap();
        let snapshot = registry.ensure(["Customer"]).unwrap();
        assert_eq!(snapshot.version, 2);
        assert!(snapshot.get("Order").is_some());
        assert!(snapshot.get("Customer").is_some());
    }

    #[test]
    fn invalidate_replaces_whole_set() {
        let (introspector, registry) = registry();
        let before = registry.ensure_all().unwrap();
        assert_eq!(before.get("Order").unwrap().properties().len(), 2);

        introspector.define(
            ClassDefinition::entity("Order")
                .property("total", "int")
                .property("note", "string"),
        );
        let after = registry.invalidate(["Order"]).unwrap();

        assert_eq!(after.version, before.version + 1);
        assert_eq!(after.get("Order").unwrap().properties().len(), 3);
        // Snapshots handed out earlier are untouched.
        assert_eq!(before.get("Order").unwrap().properties().len(), 2);
        assert!(!Arc::ptr_eq(&before.schemas, &after.schemas));
    }

    #[test]
    fn failed_rebuild_keeps_previous_snapshot() {
        let (introspector, registry) = registry();
        registry.ensure_all().unwrap();
        introspector.remove("Customer");

        let err = registry.invalidate(["Customer"]).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidClass { .. }));
        assert_eq!(registry.version(), 1);
        assert!(registry.snapshot().get("Customer").is_some());
    }

    #[test]
    fn custom_identity_property_applies() {
        let (introspector, _) = registry();
        let registry = SchemaRegistry::new(introspector).with_identity_property("oid");
        let snapshot = registry.ensure(["Order"]).unwrap();
        assert_eq!(snapshot.get("Order").unwrap().identity_property(), Some("oid"));
    }

    #[test]
    fn snapshots_are_shareable_across_threads() {
        let (_, registry) = registry();
        let registry = Arc::new(registry);
        registry.ensure_all().unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.snapshot().schemas.len())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().expect("thread should not panic"), 2);
        }
    }
}
