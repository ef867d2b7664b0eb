//! The [`Introspector`] seam.
//!
//! The engine never inspects domain types itself. Everything it knows about
//! a class (tags, declared properties, constructor and mutators) comes from
//! an introspection service implementing this trait.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// One declared property as reported by the introspection service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDeclaration {
    pub name: String,
    /// The declared type string; properties without one are not persisted.
    #[serde(default, rename = "type")]
    pub declared_type: Option<String>,
    #[serde(default)]
    pub lazy: bool,
    #[serde(default)]
    pub transient: bool,
    /// Marks the natural identity of an entity.
    #[serde(default)]
    pub identity: bool,
}

impl PropertyDeclaration {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: Some(declared_type.into()),
            lazy: false,
            transient: false,
            identity: false,
        }
    }

    /// A property with no declared type.
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: None,
            lazy: false,
            transient: false,
            identity: false,
        }
    }
}

/// Per-class metadata source consumed by the schema builder.
///
/// Implementations must be thread-safe (`Send + Sync`); a registry shares
/// one introspector across every session in the process.
pub trait Introspector: Send + Sync {
    /// Whether the named class exists at all.
    fn class_exists(&self, class_name: &str) -> bool;

    fn is_tagged_entity(&self, class_name: &str) -> bool;

    fn is_tagged_value_object(&self, class_name: &str) -> bool;

    /// Whether the class implements the repository capability.
    fn implements_repository(&self, class_name: &str) -> bool;

    /// Whether instances may be reconstituted from empty (unloaded) records.
    fn is_tagged_lazy(&self, class_name: &str) -> bool;

    /// Declared properties in declaration order.
    fn declared_properties(&self, class_name: &str) -> Vec<PropertyDeclaration>;

    fn has_constructor(&self, class_name: &str) -> bool;

    fn method_names(&self, class_name: &str) -> Vec<String>;

    /// The aggregate root class a repository manages, if declared explicitly.
    ///
    /// Returning `None` lets the builder fall back to the naming convention.
    fn managed_class_of(&self, _repository_class: &str) -> Option<String> {
        None
    }

    /// Every class this introspector can describe.
    fn known_classes(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Serializable description of one class, used by [`InMemoryIntrospector`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDefinition {
    pub name: String,
    #[serde(default)]
    pub entity: bool,
    #[serde(default)]
    pub value_object: bool,
    #[serde(default)]
    pub repository: bool,
    #[serde(default)]
    pub lazy: bool,
    #[serde(default = "default_true")]
    pub constructor: bool,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub properties: Vec<PropertyDeclaration>,
    #[serde(default)]
    pub managed_class: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ClassDefinition {
    fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: false,
            value_object: false,
            repository: false,
            lazy: false,
            constructor: true,
            methods: Vec::new(),
            properties: Vec::new(),
            managed_class: None,
        }
    }

    pub fn entity(name: impl Into<String>) -> Self {
        Self {
            entity: true,
            ..Self::bare(name)
        }
    }

    pub fn value_object(name: impl Into<String>) -> Self {
        Self {
            value_object: true,
            ..Self::bare(name)
        }
    }

    pub fn repository(name: impl Into<String>) -> Self {
        Self {
            repository: true,
            ..Self::bare(name)
        }
    }

    /// A class carrying no persistence tag.
    pub fn plain(name: impl Into<String>) -> Self {
        Self::bare(name)
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn without_constructor(mut self) -> Self {
        self.constructor = false;
        self
    }

    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.methods.push(name.into());
        self
    }

    pub fn managing(mut self, class_name: impl Into<String>) -> Self {
        self.managed_class = Some(class_name.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        self.properties.push(PropertyDeclaration::new(name, declared_type));
        self
    }

    pub fn lazy_property(
        mut self,
        name: impl Into<String>,
        declared_type: impl Into<String>,
    ) -> Self {
        let mut decl = PropertyDeclaration::new(name, declared_type);
        decl.lazy = true;
        self.properties.push(decl);
        self
    }

    pub fn transient_property(
        mut self,
        name: impl Into<String>,
        declared_type: impl Into<String>,
    ) -> Self {
        let mut decl = PropertyDeclaration::new(name, declared_type);
        decl.transient = true;
        self.properties.push(decl);
        self
    }

    pub fn identity_property(
        mut self,
        name: impl Into<String>,
        declared_type: impl Into<String>,
    ) -> Self {
        let mut decl = PropertyDeclaration::new(name, declared_type);
        decl.identity = true;
        self.properties.push(decl);
        self
    }

    pub fn untyped_property(mut self, name: impl Into<String>) -> Self {
        self.properties.push(PropertyDeclaration::untyped(name));
        self
    }
}

/// Introspector backed by a map of [`ClassDefinition`]s.
///
/// Intended for tests, embedding, and model files loaded by the CLI.
/// Definitions may be replaced at runtime to simulate class changes.
pub struct InMemoryIntrospector {
    classes: RwLock<BTreeMap<String, ClassDefinition>>,
}

impl InMemoryIntrospector {
    /// Create an empty introspector.
    pub fn new() -> Self {
        Self {
            classes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn from_definitions(definitions: impl IntoIterator<Item = ClassDefinition>) -> Self {
        let introspector = Self::new();
        for definition in definitions {
            introspector.define(definition);
        }
        introspector
    }

    /// Add or replace a class definition.
    pub fn define(&self, definition: ClassDefinition) {
        self.classes
            .write()
            .expect("lock poisoned")
            .insert(definition.name.clone(), definition);
    }

    /// Remove a class definition. Returns `true` if it existed.
    pub fn remove(&self, class_name: &str) -> bool {
        self.classes
            .write()
            .expect("lock poisoned")
            .remove(class_name)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.classes.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.read().expect("lock poisoned").is_empty()
    }

    fn with_class<T>(&self, class_name: &str, f: impl FnOnce(&ClassDefinition) -> T) -> Option<T> {
        self.classes
            .read()
            .expect("lock poisoned")
            .get(class_name)
            .map(f)
    }
}

impl Default for InMemoryIntrospector {
    fn default() -> Self {
        Self::new()
    }
}

impl Introspector for InMemoryIntrospector {
    fn class_exists(&self, class_name: &str) -> bool {
        self.with_class(class_name, |_| ()).is_some()
    }

    fn is_tagged_entity(&self, class_name: &str) -> bool {
        self.with_class(class_name, |c| c.entity).unwrap_or(false)
    }

    fn is_tagged_value_object(&self, class_name: &str) -> bool {
        self.with_class(class_name, |c| c.value_object).unwrap_or(false)
    }

    fn implements_repository(&self, class_name: &str) -> bool {
        self.with_class(class_name, |c| c.repository).unwrap_or(false)
    }

    fn is_tagged_lazy(&self, class_name: &str) -> bool {
        self.with_class(class_name, |c| c.lazy).unwrap_or(false)
    }

    fn declared_properties(&self, class_name: &str) -> Vec<PropertyDeclaration> {
        self.with_class(class_name, |c| c.properties.clone())
            .unwrap_or_default()
    }

    fn has_constructor(&self, class_name: &str) -> bool {
        self.with_class(class_name, |c| c.constructor).unwrap_or(false)
    }

    fn method_names(&self, class_name: &str) -> Vec<String> {
        self.with_class(class_name, |c| c.methods.clone())
            .unwrap_or_default()
    }

    fn managed_class_of(&self, repository_class: &str) -> Option<String> {
        self.with_class(repository_class, |c| c.managed_class.clone())
            .flatten()
    }

    fn known_classes(&self) -> Vec<String> {
        self.classes
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for InMemoryIntrospector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryIntrospector")
            .field("class_count", &self.len())
            .finish()
    }
}
