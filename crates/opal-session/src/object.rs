use std::collections::BTreeMap;

use opal_types::{Identifier, ModelKind, Value};

use crate::lazy::Handle;

/// A live object owned by a [`Session`](crate::Session).
///
/// Holds the class it was instantiated from, its property slots, and its
/// population state. Reading through the object directly never triggers
/// population; use the session accessors for that.
#[derive(Debug)]
pub struct ManagedObject {
    class_name: String,
    model_kind: ModelKind,
    properties: BTreeMap<String, Value>,
    value_hash: Option<Identifier>,
    pub(crate) handle: Handle,
}

impl ManagedObject {
    pub fn new(class_name: impl Into<String>, model_kind: ModelKind) -> Self {
        Self {
            class_name: class_name.into(),
            model_kind,
            properties: BTreeMap::new(),
            value_hash: None,
            handle: Handle::Real,
        }
    }

    pub fn entity(class_name: impl Into<String>) -> Self {
        Self::new(class_name, ModelKind::Entity)
    }

    pub fn value_object(class_name: impl Into<String>) -> Self {
        Self::new(class_name, ModelKind::ValueObject)
    }

    /// Builder-style property assignment.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn model_kind(&self) -> ModelKind {
        self.model_kind
    }

    pub fn is_entity(&self) -> bool {
        self.model_kind == ModelKind::Entity
    }

    pub fn is_value_object(&self) -> bool {
        self.model_kind == ModelKind::ValueObject
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Writes a property slot, returning the previous value.
    ///
    /// This bypasses session bookkeeping; prefer
    /// [`Session::set_property`](crate::Session::set_property) on objects
    /// that are already in a session.
    pub fn set(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.properties.insert(name.into(), value)
    }

    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    pub(crate) fn properties_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.properties
    }

    /// The content digest, for value objects that have been identified.
    pub fn value_hash(&self) -> Option<&Identifier> {
        self.value_hash.as_ref()
    }

    pub fn set_value_hash(&mut self, hash: Identifier) {
        self.value_hash = Some(hash);
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.is_real()
    }
}
