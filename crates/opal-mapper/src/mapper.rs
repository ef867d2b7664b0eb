use std::fmt;
use std::sync::Arc;

use opal_schema::{ClassSchema, PropertySchema, SchemaSet};
use opal_session::{Session, ValuePopulation};
use opal_types::{Identifier, ObjectRef, PropertyType, RawRecord, RecordValue, Value};
use tracing::{debug, warn};

use crate::error::{MapperError, MapperResult};
use crate::factory::{ObjectFactory, SchemaObjectFactory};
use crate::source::RecordSource;

/// Maps raw records to live objects in a session.
///
/// Cheap to clone; lazy population callbacks carry their own clone.
#[derive(Clone)]
pub struct DataMapper {
    schemas: Arc<SchemaSet>,
    factory: Arc<dyn ObjectFactory>,
    source: Arc<dyn RecordSource>,
    lazy_loading: bool,
}

/// A thawed property: either the value itself or a deferred one.
enum Thawed {
    Value(Value),
    Lazy(ValuePopulation),
}

impl DataMapper {
    pub fn new(schemas: Arc<SchemaSet>, source: Arc<dyn RecordSource>) -> Self {
        let factory = Arc::new(SchemaObjectFactory::new(schemas.clone()));
        Self {
            schemas,
            factory,
            source,
            lazy_loading: true,
        }
    }

    pub fn with_factory(mut self, factory: Arc<dyn ObjectFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// With lazy loading disabled, lazy flags are ignored: placeholders are
    /// fetched right away and lazy properties are mapped eagerly.
    pub fn with_lazy_loading(mut self, enabled: bool) -> Self {
        self.lazy_loading = enabled;
        self
    }

    pub fn schemas(&self) -> &Arc<SchemaSet> {
        &self.schemas
    }

    pub fn lazy_loading(&self) -> bool {
        self.lazy_loading
    }

    pub(crate) fn schema(&self, class_name: &str) -> MapperResult<&ClassSchema> {
        self.schemas
            .get(class_name)
            .ok_or_else(|| MapperError::UnknownClass(class_name.to_string()))
    }

    /// Maps one record to a live object.
    ///
    /// Returns the session's existing object if the identifier is already
    /// known. Otherwise a fresh instance is registered under the identifier
    /// before any property is thawed. A record without properties yields a
    /// lazy placeholder, which requires a lazy-loadable class.
    pub fn map_to_object(&self, session: &mut Session, record: &RawRecord) -> MapperResult<ObjectRef> {
        if record.is_empty() {
            return Err(MapperError::InvalidRecord {
                identifier: String::new(),
                reason: "record is empty".into(),
            });
        }
        let identifier =
            Identifier::new(record.identifier.clone()).map_err(|_| MapperError::InvalidRecord {
                identifier: record.identifier.clone(),
                reason: format!("{} record has no identifier", record.class_name),
            })?;
        if record.class_name.is_empty() {
            return Err(MapperError::InvalidRecord {
                identifier: record.identifier.clone(),
                reason: "record has no class name".into(),
            });
        }

        if let Some(existing) = session.object_by_identifier(&identifier) {
            return Ok(existing);
        }

        let schema = self.schema(&record.class_name)?;
        let placeholder = record.properties.is_empty();
        if placeholder && !schema.is_lazy_loadable() {
            return Err(MapperError::NotLazyLoadable {
                class_name: record.class_name.clone(),
                identifier: record.identifier.clone(),
            });
        }

        let object = self.factory.instantiate_empty(&record.class_name)?;
        let checkpoint = session.checkpoint();
        let r = session.insert(object);
        let mapped = self.register_mapped(session, r, schema, &identifier, record, placeholder);
        if let Err(error) = mapped {
            let discarded = session.rollback(checkpoint);
            debug!(identifier = %identifier, discarded, "mapping rolled back");
            return Err(error);
        }
        Ok(r)
    }

    /// Registers a freshly inserted instance and fills it in. On error the
    /// caller rolls the session back, taking along any nested objects
    /// mapped on the way.
    fn register_mapped(
        &self,
        session: &mut Session,
        r: ObjectRef,
        schema: &ClassSchema,
        identifier: &Identifier,
        record: &RawRecord,
        placeholder: bool,
    ) -> MapperResult<()> {
        session.register_object(r, identifier.clone())?;
        self.populate_mapped(session, r, identifier, record, placeholder)?;
        if schema.is_entity() {
            session.register_reconstituted_entity(r, record)?;
        }
        Ok(())
    }

    fn populate_mapped(
        &self,
        session: &mut Session,
        r: ObjectRef,
        identifier: &Identifier,
        record: &RawRecord,
        placeholder: bool,
    ) -> MapperResult<()> {
        if !placeholder {
            return self.thaw_properties(session, r, identifier, record);
        }
        if !self.lazy_loading {
            let full = self.fetch(identifier)?;
            return self.thaw_properties(session, r, identifier, &full);
        }

        debug!(identifier = %identifier, class = %record.class_name, "mapped lazy placeholder");
        let mapper = self.clone();
        let identifier = identifier.clone();
        session.set_pending(
            r,
            Box::new(move |session, r| {
                let full = mapper.fetch(&identifier)?;
                mapper.thaw_properties(session, r, &identifier, &full)?;
                Ok(())
            }),
        )?;
        Ok(())
    }

    /// Maps a batch of records. A failing record is logged and reported in
    /// its slot; the remaining records are still mapped.
    pub fn map_to_objects(
        &self,
        session: &mut Session,
        records: &[RawRecord],
    ) -> Vec<MapperResult<ObjectRef>> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let result = self.map_to_object(session, record);
            if let Err(error) = &result {
                warn!(
                    identifier = %record.identifier,
                    class = %record.class_name,
                    %error,
                    "record not mapped"
                );
            }
            results.push(result);
        }
        results
    }

    /// Fills an object's declared properties from a record.
    ///
    /// Properties missing from the record are left as they are; `null`
    /// resets a property to its empty default. Afterwards the identity
    /// slot is set: the synthetic identity property for entities without a
    /// natural one, the content hash for value objects.
    pub fn thaw_properties(
        &self,
        session: &mut Session,
        r: ObjectRef,
        identifier: &Identifier,
        record: &RawRecord,
    ) -> MapperResult<()> {
        let schema = self.schema(&record.class_name)?;
        for (name, raw) in &record.properties {
            let Some(property) = schema.property(name) else {
                debug!(class = %record.class_name, property = %name, "ignoring undeclared property");
                continue;
            };
            match self.thaw_value(session, schema, identifier, property, raw)? {
                Thawed::Value(value) => {
                    session.peek_mut(r)?.set(name.as_str(), value);
                }
                Thawed::Lazy(populate) => {
                    session.install_proxy(r, name, populate)?;
                }
            }
        }

        if schema.is_value_object() {
            session.peek_mut(r)?.set_value_hash(identifier.clone());
        } else if !schema.has_natural_identity() {
            if let Some(slot) = schema.identity_property() {
                session
                    .peek_mut(r)?
                    .set(slot, Value::string(identifier.as_str()));
            }
        }
        Ok(())
    }

    fn thaw_value(
        &self,
        session: &mut Session,
        schema: &ClassSchema,
        identifier: &Identifier,
        property: &PropertySchema,
        raw: &RecordValue,
    ) -> MapperResult<Thawed> {
        let declared = &property.declared_type;
        if matches!(raw, RecordValue::Null) {
            return Ok(Thawed::Value(declared.empty_value()));
        }
        check_type(schema.class_name(), identifier, &property.name, declared, raw)?;

        let lazy = property.lazy && self.lazy_loading;
        let value = match raw {
            RecordValue::Object(nested) if lazy => return Ok(self.lazy_object(session, nested)),
            RecordValue::ObjectSet(members) if lazy => {
                return Ok(Thawed::Lazy(self.lazy_object_set(members)))
            }
            RecordValue::Collection(items) => {
                let element = match declared {
                    PropertyType::Collection(element) => element.as_deref(),
                    _ => None,
                };
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(element) = element {
                        check_type(schema.class_name(), identifier, &property.name, element, item)?;
                    }
                    values.push(self.thaw_element(session, element, item)?);
                }
                Value::Collection(values)
            }
            other => self.thaw_element(session, Some(declared), other)?,
        };
        Ok(Thawed::Value(value))
    }

    fn thaw_element(
        &self,
        session: &mut Session,
        declared: Option<&PropertyType>,
        raw: &RecordValue,
    ) -> MapperResult<Value> {
        Ok(match raw {
            RecordValue::Null => Value::Null,
            RecordValue::Integer(v) if declared == Some(&PropertyType::Float) => Value::Float(*v as f64),
            RecordValue::Integer(v) => Value::Integer(*v),
            RecordValue::Float(v) => Value::Float(*v),
            RecordValue::Boolean(v) => Value::Boolean(*v),
            RecordValue::String(v) => Value::String(v.clone()),
            RecordValue::DateTime(v) => Value::DateTime(*v),
            RecordValue::Collection(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.thaw_element(session, None, item)?);
                }
                Value::Collection(values)
            }
            RecordValue::ObjectSet(records) => {
                let mut members = Vec::with_capacity(records.len());
                for record in records {
                    let member = self.map_to_object(session, record)?;
                    if !members.contains(&member) {
                        members.push(member);
                    }
                }
                Value::ObjectSet(members)
            }
            RecordValue::Object(record) => Value::Object(self.map_to_object(session, record)?),
        })
    }

    fn lazy_object(&self, session: &Session, nested: &RawRecord) -> Thawed {
        if let Ok(identifier) = Identifier::new(nested.identifier.clone()) {
            if let Some(existing) = session.object_by_identifier(&identifier) {
                return Thawed::Value(Value::Object(existing));
            }
        }
        let mapper = self.clone();
        let nested = nested.clone();
        Thawed::Lazy(Box::new(move |session| {
            Ok(Value::Object(mapper.map_to_object(session, &nested)?))
        }))
    }

    /// A deferred object set backed by its member identifiers. Members the
    /// source does not return are left out.
    fn lazy_object_set(&self, members: &[RawRecord]) -> ValuePopulation {
        let identifiers: Vec<String> = members.iter().map(|m| m.identifier.clone()).collect();
        let mapper = self.clone();
        Box::new(move |session| {
            let mut refs = Vec::with_capacity(identifiers.len());
            for raw in &identifiers {
                let identifier = Identifier::new(raw.clone())?;
                let member = match session.object_by_identifier(&identifier) {
                    Some(member) => member,
                    None => match mapper.source.record_by_identifier(&identifier)? {
                        Some(record) => mapper.map_to_object(session, &record)?,
                        None => {
                            debug!(identifier = %identifier, "object set member unavailable, skipped");
                            continue;
                        }
                    },
                };
                if !refs.contains(&member) {
                    refs.push(member);
                }
            }
            Ok(Value::ObjectSet(refs))
        })
    }

    fn fetch(&self, identifier: &Identifier) -> MapperResult<RawRecord> {
        self.source
            .record_by_identifier(identifier)?
            .ok_or_else(|| MapperError::RecordNotFound {
                identifier: identifier.to_string(),
            })
    }
}

fn check_type(
    class_name: &str,
    identifier: &Identifier,
    property: &str,
    declared: &PropertyType,
    raw: &RecordValue,
) -> MapperResult<()> {
    if declared.accepts(raw) {
        return Ok(());
    }
    Err(MapperError::TypeMismatch {
        class_name: class_name.to_string(),
        identifier: identifier.to_string(),
        property: property.to_string(),
        expected: declared.to_string(),
        found: raw.tag().to_string(),
    })
}

impl fmt::Debug for DataMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataMapper")
            .field("classes", &self.schemas.len())
            .field("lazy_loading", &self.lazy_loading)
            .finish()
    }
}
