use std::sync::Arc;

use opal_schema::SchemaSet;
use opal_session::ManagedObject;
use opal_types::ModelKind;

use crate::error::{MapperError, MapperResult};

/// Creates empty instances of persisted classes.
pub trait ObjectFactory: Send + Sync {
    /// A fresh instance of `class_name` with no data loaded.
    fn instantiate_empty(&self, class_name: &str) -> MapperResult<ManagedObject>;
}

/// Instantiates objects from their class schema, with every declared
/// property set to its empty default.
#[derive(Debug, Clone)]
pub struct SchemaObjectFactory {
    schemas: Arc<SchemaSet>,
}

impl SchemaObjectFactory {
    pub fn new(schemas: Arc<SchemaSet>) -> Self {
        Self { schemas }
    }
}

impl ObjectFactory for SchemaObjectFactory {
    fn instantiate_empty(&self, class_name: &str) -> MapperResult<ManagedObject> {
        let schema = self
            .schemas
            .get(class_name)
            .filter(|s| s.model_kind() != ModelKind::Repository)
            .ok_or_else(|| MapperError::UnknownClass(class_name.to_string()))?;

        let mut object = ManagedObject::new(class_name, schema.model_kind());
        for property in schema.properties() {
            object.set(property.name.as_str(), property.declared_type.empty_value());
        }
        Ok(object)
    }
}
