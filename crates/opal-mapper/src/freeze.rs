//! Live object → raw record.

use opal_session::Session;
use opal_types::{Identifier, ObjectRef, RawRecord, RecordValue, Value};

use crate::error::{MapperError, MapperResult};
use crate::mapper::DataMapper;

/// Looks up identifiers not yet registered in the session, such as the
/// ones a unit of work has planned for new objects.
pub type IdentifierLookup<'a> = &'a dyn Fn(ObjectRef) -> Option<Identifier>;

impl DataMapper {
    /// Converts a live object into a record, using the session's
    /// identifiers.
    pub fn freeze_object(&self, session: &Session, r: ObjectRef) -> MapperResult<RawRecord> {
        self.freeze_object_with(session, r, &|_| None)
    }

    /// Converts a live object into a record.
    ///
    /// References become stubs carrying only identifier and class.
    /// Unresolved proxies are left out, as is the synthetic identity
    /// property (the record's identifier already carries it). A pending
    /// object freezes to a stub.
    pub fn freeze_object_with(
        &self,
        session: &Session,
        r: ObjectRef,
        lookup: IdentifierLookup<'_>,
    ) -> MapperResult<RawRecord> {
        let object = session.peek(r)?;
        let identifier = identify(session, r, lookup)?;
        let mut record = RawRecord::new(identifier.as_str(), object.class_name());
        if !object.is_loaded() {
            return Ok(record);
        }

        let schema = self.schema(object.class_name())?;
        let synthetic = if schema.is_entity() && !schema.has_natural_identity() {
            schema.identity_property()
        } else {
            None
        };
        for property in schema.properties() {
            if synthetic == Some(property.name.as_str()) {
                continue;
            }
            let Some(value) = object.get(&property.name) else {
                continue;
            };
            if let Some(frozen) = freeze_value(session, value, lookup)? {
                record.properties.insert(property.name.clone(), frozen);
            }
        }
        Ok(record)
    }
}

fn identify(session: &Session, r: ObjectRef, lookup: IdentifierLookup<'_>) -> MapperResult<Identifier> {
    if let Some(identifier) = lookup(r).or_else(|| session.identifier_by_object(r).cloned()) {
        return Ok(identifier);
    }
    Err(MapperError::UnidentifiedReference {
        object: r,
        class_name: session.peek(r)?.class_name().to_string(),
    })
}

fn stub(session: &Session, r: ObjectRef, lookup: IdentifierLookup<'_>) -> MapperResult<RawRecord> {
    let identifier = identify(session, r, lookup)?;
    Ok(RawRecord::new(identifier.as_str(), session.peek(r)?.class_name()))
}

fn freeze_value(
    session: &Session,
    value: &Value,
    lookup: IdentifierLookup<'_>,
) -> MapperResult<Option<RecordValue>> {
    Ok(Some(match value {
        Value::Proxy(_) => return Ok(None),
        Value::Null => RecordValue::Null,
        Value::Integer(v) => RecordValue::Integer(*v),
        Value::Float(v) => RecordValue::Float(*v),
        Value::Boolean(v) => RecordValue::Boolean(*v),
        Value::String(v) => RecordValue::String(v.clone()),
        Value::DateTime(v) => RecordValue::DateTime(*v),
        Value::Collection(items) => {
            let mut frozen = Vec::with_capacity(items.len());
            for item in items {
                if let Some(item) = freeze_value(session, item, lookup)? {
                    frozen.push(item);
                }
            }
            RecordValue::Collection(frozen)
        }
        Value::ObjectSet(members) => RecordValue::ObjectSet(
            members
                .iter()
                .map(|m| stub(session, *m, lookup))
                .collect::<MapperResult<_>>()?,
        ),
        Value::Object(target) => RecordValue::Object(stub(session, *target, lookup)?),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use opal_schema::{ClassDefinition, InMemoryIntrospector, SchemaBuilder, DEFAULT_IDENTITY_PROPERTY};
    use opal_session::ManagedObject;
    use opal_types::BackendResult;

    use super::*;
    use crate::source::RecordSource;

    struct NoRecords;

    impl RecordSource for NoRecords {
        fn record_by_identifier(&self, _identifier: &Identifier) -> BackendResult<Option<RawRecord>> {
            Ok(None)
        }
    }

    fn mapper() -> DataMapper {
        let introspector = InMemoryIntrospector::from_definitions([
            ClassDefinition::entity("Order")
                .property("total", "int")
                .property("customer", "Customer")
                .property("lines", "objectset<Line>")
                .lazy_property("notes", "array"),
            ClassDefinition::entity("Customer").identity_property("email", "string"),
            ClassDefinition::entity("Line").property("quantity", "int"),
        ]);
        let schemas = SchemaBuilder::new(&introspector)
            .build(["Order", "Customer", "Line"])
            .unwrap();
        DataMapper::new(Arc::new(schemas), Arc::new(NoRecords))
    }

    fn id(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    #[test]
    fn references_become_stubs() {
        let mapper = mapper();
        let mut session = Session::new();
        let customer = session.insert(ManagedObject::entity("Customer").with("email", "a@b.c"));
        let line = session.insert(ManagedObject::entity("Line").with("quantity", 2i64));
        let order = session.insert(
            ManagedObject::entity("Order")
                .with("total", 42i64)
                .with("customer", customer)
                .with("lines", Value::ObjectSet(vec![line]))
                .with(DEFAULT_IDENTITY_PROPERTY, "E1"),
        );
        session.register_object(order, id("E1")).unwrap();
        session.register_object(customer, id("a@b.c")).unwrap();
        session.register_object(line, id("L1")).unwrap();

        let record = mapper.freeze_object(&session, order).unwrap();
        assert_eq!(record.identifier, "E1");
        assert_eq!(record.class_name, "Order");
        assert_eq!(record.get("total"), Some(&RecordValue::Integer(42)));
        assert_eq!(
            record.get("customer"),
            Some(&RecordValue::Object(RawRecord::new("a@b.c", "Customer")))
        );
        assert_eq!(
            record.get("lines"),
            Some(&RecordValue::ObjectSet(vec![RawRecord::new("L1", "Line")]))
        );
        assert!(record.get(DEFAULT_IDENTITY_PROPERTY).is_none());
    }

    #[test]
    fn unresolved_proxies_are_omitted() {
        let mapper = mapper();
        let mut session = Session::new();
        let order = session.insert(ManagedObject::entity("Order").with("total", 1i64));
        session.register_object(order, id("E1")).unwrap();
        session
            .install_proxy(order, "notes", Box::new(|_s: &mut Session| Ok(Value::Null)))
            .unwrap();

        let record = mapper.freeze_object(&session, order).unwrap();
        assert!(record.get("notes").is_none());
        assert!(record.get("total").is_some());
    }

    #[test]
    fn planned_identifiers_are_used() {
        let mapper = mapper();
        let mut session = Session::new();
        let customer = session.insert(ManagedObject::entity("Customer").with("email", "a@b.c"));
        let order = session.insert(ManagedObject::entity("Order").with("customer", customer));

        let err = mapper.freeze_object(&session, order).unwrap_err();
        assert!(matches!(err, MapperError::UnidentifiedReference { object, .. } if object == order));

        let record = mapper
            .freeze_object_with(&session, order, &|r| {
                if r == order {
                    Some(id("E9"))
                } else if r == customer {
                    Some(id("a@b.c"))
                } else {
                    None
                }
            })
            .unwrap();
        assert_eq!(record.identifier, "E9");
        assert_eq!(
            record.get("customer"),
            Some(&RecordValue::Object(RawRecord::new("a@b.c", "Customer")))
        );
    }

    #[test]
    fn natural_identity_is_kept_as_data() {
        let mapper = mapper();
        let mut session = Session::new();
        let customer = session.insert(ManagedObject::entity("Customer").with("email", "a@b.c"));
        session.register_object(customer, id("a@b.c")).unwrap();
        let record = mapper.freeze_object(&session, customer).unwrap();
        assert_eq!(record.get("email"), Some(&RecordValue::string("a@b.c")));
    }
}
