//! Derives [`ClassSchema`]s from an [`Introspector`].

use std::collections::BTreeSet;

use tracing::{debug, trace};

use opal_types::{ModelKind, PropertyType};

use crate::error::{SchemaError, SchemaResult};
use crate::introspect::Introspector;
use crate::schema::{ClassSchema, PropertySchema, SchemaSet};

/// Name of the property that stores engine-assigned entity identifiers.
pub const DEFAULT_IDENTITY_PROPERTY: &str = "persistence_object_identifier";

/// Builds a [`SchemaSet`] for a set of classes.
///
/// The builder only reads from the introspector; it never touches a backend
/// or a session.
pub struct SchemaBuilder<'a> {
    introspector: &'a dyn Introspector,
    identity_property: String,
}

impl<'a> SchemaBuilder<'a> {
    pub fn new(introspector: &'a dyn Introspector) -> Self {
        Self {
            introspector,
            identity_property: DEFAULT_IDENTITY_PROPERTY.to_string(),
        }
    }

    /// Override the name of the synthetic identity property.
    pub fn with_identity_property(mut self, name: impl Into<String>) -> Self {
        self.identity_property = name.into();
        self
    }

    /// Build schemas for every persisted class among `class_names`.
    ///
    /// Classes tagged neither entity, value object, nor repository are
    /// skipped. Repositories are linked to the entity they manage when that
    /// entity is part of the same build.
    pub fn build<I, S>(&self, class_names: I) -> SchemaResult<SchemaSet>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: BTreeSet<String> = class_names
            .into_iter()
            .map(|n| n.as_ref().to_string())
            .collect();

        let mut set = SchemaSet::new();
        let mut repositories = Vec::new();

        for name in &names {
            let Some(schema) = self.build_class(name)? else {
                debug!(class = %name, "class carries no persistence tag; skipped");
                continue;
            };
            if schema.model_kind() == ModelKind::Repository {
                repositories.push(name.clone());
            }
            set.insert(schema);
        }

        for repository in repositories {
            let Some(managed) = self
                .introspector
                .managed_class_of(&repository)
                .or_else(|| conventional_managed_class(&repository))
            else {
                continue;
            };
            match set.get_mut(&managed) {
                Some(schema) if schema.model_kind() == ModelKind::Entity => {
                    schema.set_repository_class_name(&repository);
                    debug!(class = %managed, %repository, "linked aggregate root");
                }
                Some(_) => {
                    return Err(SchemaError::InvalidClass {
                        class_name: repository,
                        reason: format!("manages {managed}, which is not an entity"),
                    });
                }
                None => trace!(%repository, %managed, "managed class not part of this build"),
            }
        }

        debug!(classes = set.len(), "schema set built");
        Ok(set)
    }

    /// Build the schema of a single class.
    ///
    /// Returns `Ok(None)` for classes that are not persisted.
    pub fn build_class(&self, class_name: &str) -> SchemaResult<Option<ClassSchema>> {
        let introspector = self.introspector;
        if !introspector.class_exists(class_name) {
            return Err(SchemaError::InvalidClass {
                class_name: class_name.to_string(),
                reason: "class does not exist".into(),
            });
        }

        let entity = introspector.is_tagged_entity(class_name);
        let value_object = introspector.is_tagged_value_object(class_name);
        if entity && value_object {
            return Err(SchemaError::InvalidClass {
                class_name: class_name.to_string(),
                reason: "tagged both entity and value object".into(),
            });
        }

        let kind = if introspector.implements_repository(class_name) {
            ModelKind::Repository
        } else if entity {
            ModelKind::Entity
        } else if value_object {
            ModelKind::ValueObject
        } else {
            return Ok(None);
        };

        let mut schema = ClassSchema::new(class_name, kind);
        if kind == ModelKind::Repository {
            return Ok(Some(schema));
        }

        if kind == ModelKind::ValueObject {
            self.validate_value_object(class_name)?;
        }
        schema.set_lazy_loadable(introspector.is_tagged_lazy(class_name));

        let mut natural_identity = None;
        for decl in introspector.declared_properties(class_name) {
            if decl.transient {
                trace!(class = %class_name, property = %decl.name, "transient property skipped");
                continue;
            }
            let Some(declared) = decl.declared_type.as_deref().filter(|t| !t.trim().is_empty())
            else {
                trace!(class = %class_name, property = %decl.name, "untyped property skipped");
                continue;
            };
            let declared_type =
                PropertyType::parse(declared).map_err(|_| SchemaError::InvalidPropertyType {
                    class_name: class_name.to_string(),
                    property: decl.name.clone(),
                    declared: declared.to_string(),
                })?;

            if decl.identity {
                if kind == ModelKind::ValueObject {
                    return Err(SchemaError::InvalidValueObject {
                        class_name: class_name.to_string(),
                        reason: format!("declares identity property {}", decl.name),
                    });
                }
                if let Some(existing) = natural_identity.replace(decl.name.clone()) {
                    return Err(SchemaError::InvalidClass {
                        class_name: class_name.to_string(),
                        reason: format!(
                            "multiple identity properties ({existing}, {})",
                            decl.name
                        ),
                    });
                }
            }

            schema.push_property(PropertySchema {
                name: decl.name,
                declared_type,
                lazy: decl.lazy,
            });
        }

        if kind == ModelKind::Entity {
            match natural_identity {
                Some(name) => schema.set_identity(name, true),
                None => {
                    if schema.has_property(&self.identity_property) {
                        return Err(SchemaError::InvalidClass {
                            class_name: class_name.to_string(),
                            reason: format!(
                                "property {} is reserved for the engine-assigned identifier",
                                self.identity_property
                            ),
                        });
                    }
                    schema.push_property(PropertySchema {
                        name: self.identity_property.clone(),
                        declared_type: PropertyType::String,
                        lazy: false,
                    });
                    schema.set_identity(self.identity_property.clone(), false);
                }
            }
        }

        Ok(Some(schema))
    }

    fn validate_value_object(&self, class_name: &str) -> SchemaResult<()> {
        if !self.introspector.has_constructor(class_name) {
            return Err(SchemaError::InvalidValueObject {
                class_name: class_name.to_string(),
                reason: "no constructor".into(),
            });
        }
        let setters: Vec<String> = self
            .introspector
            .method_names(class_name)
            .into_iter()
            .filter(|m| is_setter(m))
            .collect();
        if !setters.is_empty() {
            return Err(SchemaError::InvalidValueObject {
                class_name: class_name.to_string(),
                reason: format!("exposes setter methods: {}", setters.join(", ")),
            });
        }
        Ok(())
    }
}

/// `setFoo` and `set_foo` are setters; `settle` and `set` are not.
fn is_setter(method: &str) -> bool {
    let Some(rest) = method.strip_prefix("set") else {
        return false;
    };
    match rest.chars().next() {
        Some('_') => rest.len() > 1,
        Some(c) => c.is_uppercase(),
        None => false,
    }
}

/// `Shop::Repository::OrderRepository` manages `Shop::Model::Order`;
/// a bare `OrderRepository` manages `Order`.
fn conventional_managed_class(repository: &str) -> Option<String> {
    let base = repository.strip_suffix("Repository")?;
    if base.is_empty() || base.ends_with(':') || base.ends_with('\\') {
        return None;
    }
    Some(
        base.replace("::Repository::", "::Model::")
            .replace("\\Repository\\", "\\Model\\"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::{ClassDefinition, InMemoryIntrospector};

    fn shop() -> InMemoryIntrospector {
        InMemoryIntrospector::from_definitions([
            ClassDefinition::entity("Shop::Model::Order")
                .property("total", "int")
                .property("customer", "Shop::Model::Customer")
                .lazy_property("lines", "objectset<Shop::Model::Line>")
                .transient_property("cache", "array")
                .untyped_property("scratch"),
            ClassDefinition::entity("Shop::Model::Customer")
                .identity_property("email", "string")
                .property("name", "string")
                .lazy(),
            ClassDefinition::entity("Shop::Model::Line").property("quantity", "int"),
            ClassDefinition::value_object("Shop::Model::Money")
                .property("amount", "int")
                .property("currency", "string")
                .method("getAmount")
                .method("settle"),
            ClassDefinition::repository("Shop::Repository::OrderRepository"),
            ClassDefinition::plain("Shop::Service::Mailer"),
        ])
    }

    // -----------------------------------------------------------------------
    // Property inclusion
    // -----------------------------------------------------------------------

    #[test]
    fn includes_only_typed_non_transient_properties() {
        let introspector = shop();
        let schema = SchemaBuilder::new(&introspector)
            .build_class("Shop::Model::Order")
            .unwrap()
            .unwrap();

        let names: Vec<_> = schema.properties().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["total", "customer", "lines", DEFAULT_IDENTITY_PROPERTY]
        );
        assert!(schema.property("lines").unwrap().lazy);
        assert_eq!(
            schema.property("customer").unwrap().declared_type,
            PropertyType::Object("Shop::Model::Customer".into())
        );
    }

    #[test]
    fn invalid_declared_type_is_reported_with_location() {
        let introspector = InMemoryIntrospector::from_definitions([
            ClassDefinition::entity("Order").property("total", "9bad")
        ]);
        let err = SchemaBuilder::new(&introspector)
            .build(["Order"])
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::InvalidPropertyType {
                class_name: "Order".into(),
                property: "total".into(),
                declared: "9bad".into(),
            }
        );
        assert!(err.to_string().contains("Order.total"));
    }

    // -----------------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------------

    #[test]
    fn entities_get_synthetic_identity() {
        let introspector = shop();
        let schema = SchemaBuilder::new(&introspector)
            .build_class("Shop::Model::Line")
            .unwrap()
            .unwrap();
        assert_eq!(schema.identity_property(), Some(DEFAULT_IDENTITY_PROPERTY));
        assert!(!schema.has_natural_identity());
        assert_eq!(
            schema.property(DEFAULT_IDENTITY_PROPERTY).unwrap().declared_type,
            PropertyType::String
        );
    }

    #[test]
    fn natural_identity_is_kept() {
        let introspector = shop();
        let schema = SchemaBuilder::new(&introspector)
            .build_class("Shop::Model::Customer")
            .unwrap()
            .unwrap();
        assert_eq!(schema.identity_property(), Some("email"));
        assert!(schema.has_natural_identity());
        assert!(!schema.has_property(DEFAULT_IDENTITY_PROPERTY));
        assert!(schema.is_lazy_loadable());
    }

    #[test]
    fn custom_identity_property_name() {
        let introspector = shop();
        let schema = SchemaBuilder::new(&introspector)
            .with_identity_property("oid")
            .build_class("Shop::Model::Line")
            .unwrap()
            .unwrap();
        assert_eq!(schema.identity_property(), Some("oid"));
    }

    #[test]
    fn reserved_identity_name_conflict() {
        let introspector = InMemoryIntrospector::from_definitions([ClassDefinition::entity(
            "Order",
        )
        .property(DEFAULT_IDENTITY_PROPERTY, "int")]);
        let err = SchemaBuilder::new(&introspector).build(["Order"]).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidClass { .. }));
    }

    #[test]
    fn multiple_identity_properties_rejected() {
        let introspector = InMemoryIntrospector::from_definitions([ClassDefinition::entity(
            "Account",
        )
        .identity_property("iban", "string")
        .identity_property("bic", "string")]);
        let err = SchemaBuilder::new(&introspector).build(["Account"]).unwrap_err();
        assert!(err.to_string().contains("multiple identity properties"));
    }

    // -----------------------------------------------------------------------
    // Value objects
    // -----------------------------------------------------------------------

    #[test]
    fn value_object_without_constructor_is_invalid() {
        let introspector = InMemoryIntrospector::from_definitions([
            ClassDefinition::value_object("Money")
                .property("amount", "int")
                .without_constructor(),
        ]);
        let err = SchemaBuilder::new(&introspector).build(["Money"]).unwrap_err();
        assert_eq!(
            err,
            SchemaError::InvalidValueObject {
                class_name: "Money".into(),
                reason: "no constructor".into(),
            }
        );
    }

    #[test]
    fn value_object_with_setter_is_invalid() {
        let introspector = InMemoryIntrospector::from_definitions([
            ClassDefinition::value_object("Money").method("setAmount"),
            ClassDefinition::value_object("Weight").method("set_grams"),
        ]);
        let builder = SchemaBuilder::new(&introspector);
        for class in ["Money", "Weight"] {
            let err = builder.build([class]).unwrap_err();
            assert!(matches!(err, SchemaError::InvalidValueObject { .. }), "{class}");
            assert!(err.to_string().contains(class));
        }
    }

    #[test]
    fn value_object_with_identity_is_invalid() {
        let introspector = InMemoryIntrospector::from_definitions([
            ClassDefinition::value_object("Money").identity_property("amount", "int")
        ]);
        let err = SchemaBuilder::new(&introspector).build(["Money"]).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidValueObject { .. }));
    }

    #[test]
    fn valid_value_object_has_no_identity_slot() {
        let introspector = shop();
        let schema = SchemaBuilder::new(&introspector)
            .build_class("Shop::Model::Money")
            .unwrap()
            .unwrap();
        assert_eq!(schema.model_kind(), ModelKind::ValueObject);
        assert_eq!(schema.identity_property(), None);
        assert_eq!(schema.properties().len(), 2);
    }

    #[test]
    fn setter_detection() {
        assert!(is_setter("setAmount"));
        assert!(is_setter("set_amount"));
        assert!(!is_setter("set"));
        assert!(!is_setter("set_"));
        assert!(!is_setter("settle"));
        assert!(!is_setter("reset"));
    }

    // -----------------------------------------------------------------------
    // Classes and repositories
    // -----------------------------------------------------------------------

    #[test]
    fn unknown_class_is_invalid() {
        let introspector = shop();
        let err = SchemaBuilder::new(&introspector).build(["Nope"]).unwrap_err();
        assert!(matches!(err, SchemaError::InvalidClass { ref class_name, .. } if class_name == "Nope"));
    }

    #[test]
    fn conflicting_tags_are_invalid() {
        let mut def = ClassDefinition::entity("Both");
        def.value_object = true;
        let introspector = InMemoryIntrospector::from_definitions([def]);
        assert!(SchemaBuilder::new(&introspector).build(["Both"]).is_err());
    }

    #[test]
    fn untagged_classes_are_skipped() {
        let introspector = shop();
        let set = SchemaBuilder::new(&introspector)
            .build(["Shop::Service::Mailer", "Shop::Model::Line"])
            .unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains("Shop::Model::Line"));
    }

    #[test]
    fn repository_links_by_convention() {
        let introspector = shop();
        let set = SchemaBuilder::new(&introspector)
            .build(introspector.known_classes())
            .unwrap();
        let order = set.get("Shop::Model::Order").unwrap();
        assert_eq!(
            order.repository_class_name(),
            Some("Shop::Repository::OrderRepository")
        );
        assert!(order.is_aggregate_root());
        assert_eq!(
            set.get("Shop::Repository::OrderRepository").unwrap().model_kind(),
            ModelKind::Repository
        );
        assert!(set.get("Shop::Model::Line").unwrap().repository_class_name().is_none());
    }

    #[test]
    fn repository_links_explicit_managed_class() {
        let introspector = InMemoryIntrospector::from_definitions([
            ClassDefinition::entity("Invoice"),
            ClassDefinition::repository("Billing").managing("Invoice"),
        ]);
        let set = SchemaBuilder::new(&introspector)
            .build(["Invoice", "Billing"])
            .unwrap();
        assert_eq!(set.get("Invoice").unwrap().repository_class_name(), Some("Billing"));
    }

    #[test]
    fn repository_for_value_object_is_invalid() {
        let introspector = InMemoryIntrospector::from_definitions([
            ClassDefinition::value_object("Money"),
            ClassDefinition::repository("MoneyRepository"),
        ]);
        let err = SchemaBuilder::new(&introspector)
            .build(["Money", "MoneyRepository"])
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidClass { .. }));
    }

    #[test]
    fn naming_convention() {
        assert_eq!(
            conventional_managed_class("Shop::Repository::OrderRepository").as_deref(),
            Some("Shop::Model::Order")
        );
        assert_eq!(
            conventional_managed_class("Acme\\Repository\\UserRepository").as_deref(),
            Some("Acme\\Model\\User")
        );
        assert_eq!(conventional_managed_class("OrderRepository").as_deref(), Some("Order"));
        assert_eq!(conventional_managed_class("Repository"), None);
        assert_eq!(conventional_managed_class("Billing"), None);
    }
}
