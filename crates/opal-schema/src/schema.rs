use std::collections::BTreeMap;

use serde::Serialize;

use opal_types::{ModelKind, PropertyType};

/// Schema of one persisted property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PropertySchema {
    pub name: String,
    pub declared_type: PropertyType,
    pub lazy: bool,
}

/// Immutable description of one persisted class.
///
/// Built once by the [`SchemaBuilder`](crate::SchemaBuilder); nothing outside
/// this crate can alter it afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClassSchema {
    class_name: String,
    model_kind: ModelKind,
    properties: Vec<PropertySchema>,
    identity_property: Option<String>,
    natural_identity: bool,
    repository_class_name: Option<String>,
    lazy_loadable: bool,
}

impl ClassSchema {
    pub(crate) fn new(class_name: impl Into<String>, model_kind: ModelKind) -> Self {
        Self {
            class_name: class_name.into(),
            model_kind,
            properties: Vec::new(),
            identity_property: None,
            natural_identity: false,
            repository_class_name: None,
            lazy_loadable: false,
        }
    }

    pub(crate) fn push_property(&mut self, property: PropertySchema) {
        self.properties.push(property);
    }

    pub(crate) fn set_identity(&mut self, name: impl Into<String>, natural: bool) {
        self.identity_property = Some(name.into());
        self.natural_identity = natural;
    }

    pub(crate) fn set_repository_class_name(&mut self, name: impl Into<String>) {
        self.repository_class_name = Some(name.into());
    }

    pub(crate) fn set_lazy_loadable(&mut self, lazy: bool) {
        self.lazy_loadable = lazy;
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn model_kind(&self) -> ModelKind {
        self.model_kind
    }

    /// Persisted properties in declaration order.
    pub fn properties(&self) -> &[PropertySchema] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// The property holding an entity's identity (natural or synthetic).
    pub fn identity_property(&self) -> Option<&str> {
        self.identity_property.as_deref()
    }

    /// Returns `true` if the identity is a user-declared property whose
    /// value serves as the identifier.
    pub fn has_natural_identity(&self) -> bool {
        self.natural_identity
    }

    pub fn repository_class_name(&self) -> Option<&str> {
        self.repository_class_name.as_deref()
    }

    /// An entity with an owning repository.
    pub fn is_aggregate_root(&self) -> bool {
        self.model_kind == ModelKind::Entity && self.repository_class_name.is_some()
    }

    /// Whether instances may be reconstituted from records without data.
    pub fn is_lazy_loadable(&self) -> bool {
        self.lazy_loadable
    }

    pub fn is_entity(&self) -> bool {
        self.model_kind == ModelKind::Entity
    }

    pub fn is_value_object(&self) -> bool {
        self.model_kind == ModelKind::ValueObject
    }
}

/// Mapping from class name to [`ClassSchema`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SchemaSet {
    schemas: BTreeMap<String, ClassSchema>,
}

impl SchemaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, schema: ClassSchema) {
        self.schemas.insert(schema.class_name.clone(), schema);
    }

    pub(crate) fn get_mut(&mut self, class_name: &str) -> Option<&mut ClassSchema> {
        self.schemas.get_mut(class_name)
    }

    pub fn get(&self, class_name: &str) -> Option<&ClassSchema> {
        self.schemas.get(class_name)
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.schemas.contains_key(class_name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Schemas sorted by class name.
    pub fn iter(&self) -> impl Iterator<Item = &ClassSchema> {
        self.schemas.values()
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Entity schemas that have an owning repository.
    pub fn aggregate_roots(&self) -> impl Iterator<Item = &ClassSchema> {
        self.schemas.values().filter(|s| s.is_aggregate_root())
    }
}
