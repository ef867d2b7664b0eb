use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::record::{RecordTag, RecordValue};
use crate::value::Value;

/// How a persisted class participates in the object model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Identity independent of field values.
    Entity,
    /// Identity fully determined by content; immutable once constructed.
    ValueObject,
    /// Persists instances of an aggregate root.
    Repository,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity => write!(f, "entity"),
            Self::ValueObject => write!(f, "value object"),
            Self::Repository => write!(f, "repository"),
        }
    }
}

/// Coarse declared type of a persisted property.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Integer,
    Float,
    Boolean,
    String,
    DateTime,
    /// Ordered collection, optionally with a declared element type.
    Collection(Option<Box<PropertyType>>),
    /// Set of objects, optionally restricted to one class.
    ObjectSet(Option<String>),
    /// Reference to a single object of the named class.
    Object(String),
}

impl PropertyType {
    /// Parse a declared type string.
    ///
    /// Accepts the primitive names (`int`, `integer`, `float`, `double`,
    /// `bool`, `boolean`, `string`, `datetime`), collections (`array`,
    /// `collection`, `array<T>`, `collection<T>`, `T[]`), object sets
    /// (`objectset`, `objectset<Class>`, `SplObjectStorage`) and class names.
    pub fn parse(declared: &str) -> Result<Self, TypeError> {
        let declared = declared.trim();
        let invalid = || TypeError::InvalidPropertyType(declared.to_string());
        if declared.is_empty() {
            return Err(invalid());
        }

        if let Some(element) = declared.strip_suffix("[]") {
            return Ok(Self::Collection(Some(Box::new(Self::parse(element)?))));
        }

        if let Some((outer, inner)) = split_generic(declared) {
            let inner = inner.trim();
            return match outer.to_ascii_lowercase().as_str() {
                "array" | "collection" => Ok(Self::Collection(Some(Box::new(Self::parse(inner)?)))),
                "objectset" | "splobjectstorage" => {
                    if is_class_name(inner) {
                        Ok(Self::ObjectSet(Some(inner.trim_start_matches('\\').to_string())))
                    } else {
                        Err(invalid())
                    }
                }
                _ => Err(invalid()),
            };
        }

        let parsed = match declared.to_ascii_lowercase().trim_start_matches('\\') {
            "int" | "integer" => Self::Integer,
            "float" | "double" => Self::Float,
            "bool" | "boolean" => Self::Boolean,
            "string" => Self::String,
            "datetime" | "datetimeinterface" | "datetimeimmutable" => Self::DateTime,
            "array" | "collection" => Self::Collection(None),
            "objectset" | "splobjectstorage" => Self::ObjectSet(None),
            _ if is_class_name(declared) => {
                Self::Object(declared.trim_start_matches('\\').to_string())
            }
            _ => return Err(invalid()),
        };
        Ok(parsed)
    }

    /// The value a property is cleared to when a record marks it absent.
    pub fn empty_value(&self) -> Value {
        match self {
            Self::Collection(_) => Value::Collection(Vec::new()),
            Self::ObjectSet(_) => Value::ObjectSet(Vec::new()),
            _ => Value::Null,
        }
    }

    /// Returns `true` if values of this type can reference other objects.
    pub fn may_reference_objects(&self) -> bool {
        match self {
            Self::Object(_) | Self::ObjectSet(_) => true,
            Self::Collection(None) => true,
            Self::Collection(Some(element)) => element.may_reference_objects(),
            _ => false,
        }
    }

    /// Returns `true` if a record value with this tag can populate the type.
    ///
    /// `null` is accepted everywhere; integers widen to floats.
    pub fn accepts(&self, value: &RecordValue) -> bool {
        matches!(
            (self, value.tag()),
            (_, RecordTag::Null)
                | (Self::Integer, RecordTag::Integer)
                | (Self::Float, RecordTag::Float | RecordTag::Integer)
                | (Self::Boolean, RecordTag::Boolean)
                | (Self::String, RecordTag::String)
                | (Self::DateTime, RecordTag::DateTime)
                | (Self::Collection(_), RecordTag::Collection)
                | (Self::ObjectSet(_), RecordTag::ObjectSet)
                | (Self::Object(_), RecordTag::Object)
        )
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Float => write!(f, "float"),
            Self::Boolean => write!(f, "boolean"),
            Self::String => write!(f, "string"),
            Self::DateTime => write!(f, "datetime"),
            Self::Collection(None) => write!(f, "collection"),
            Self::Collection(Some(element)) => write!(f, "collection<{element}>"),
            Self::ObjectSet(None) => write!(f, "objectset"),
            Self::ObjectSet(Some(class)) => write!(f, "objectset<{class}>"),
            Self::Object(class) => write!(f, "{class}"),
        }
    }
}

impl FromStr for PropertyType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn split_generic(declared: &str) -> Option<(&str, &str)> {
    let open = declared.find('<')?;
    let inner = declared.strip_suffix('>')?;
    Some((&declared[..open], &inner[open + 1..]))
}

fn is_class_name(name: &str) -> bool {
    let name = name.trim_start_matches('\\');
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '\\'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primitives() {
        assert_eq!(PropertyType::parse("int").unwrap(), PropertyType::Integer);
        assert_eq!(PropertyType::parse("integer").unwrap(), PropertyType::Integer);
        assert_eq!(PropertyType::parse("double").unwrap(), PropertyType::Float);
        assert_eq!(PropertyType::parse("bool").unwrap(), PropertyType::Boolean);
        assert_eq!(PropertyType::parse(" string ").unwrap(), PropertyType::String);
        assert_eq!(PropertyType::parse("\\DateTime").unwrap(), PropertyType::DateTime);
    }

    #[test]
    fn parses_collections() {
        assert_eq!(
            PropertyType::parse("array").unwrap(),
            PropertyType::Collection(None)
        );
        assert_eq!(
            PropertyType::parse("array<int>").unwrap(),
            PropertyType::Collection(Some(Box::new(PropertyType::Integer)))
        );
        assert_eq!(
            PropertyType::parse("Shop::Model::Line[]").unwrap(),
            PropertyType::Collection(Some(Box::new(PropertyType::Object(
                "Shop::Model::Line".into()
            ))))
        );
    }

    #[test]
    fn parses_object_sets() {
        assert_eq!(
            PropertyType::parse("SplObjectStorage").unwrap(),
            PropertyType::ObjectSet(None)
        );
        assert_eq!(
            PropertyType::parse("objectset<Tag>").unwrap(),
            PropertyType::ObjectSet(Some("Tag".into()))
        );
        assert!(PropertyType::parse("objectset<int[]>").is_err());
    }

    #[test]
    fn parses_class_names() {
        assert_eq!(
            PropertyType::parse("\\Acme\\Model\\Customer").unwrap(),
            PropertyType::Object("Acme\\Model\\Customer".into())
        );
        assert_eq!(
            PropertyType::parse("Order").unwrap(),
            PropertyType::Object("Order".into())
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(PropertyType::parse("").is_err());
        assert!(PropertyType::parse("9lives").is_err());
        assert!(PropertyType::parse("map<string>").is_err());
        assert!(PropertyType::parse("has space").is_err());
    }

    #[test]
    fn display_parses_back() {
        for declared in ["integer", "collection<string>", "objectset<Tag>", "Order"] {
            let parsed = PropertyType::parse(declared).unwrap();
            assert_eq!(parsed.to_string(), declared);
        }
    }

    #[test]
    fn empty_values() {
        assert_eq!(
            PropertyType::Collection(None).empty_value(),
            Value::Collection(vec![])
        );
        assert_eq!(
            PropertyType::ObjectSet(None).empty_value(),
            Value::ObjectSet(vec![])
        );
        assert_eq!(PropertyType::String.empty_value(), Value::Null);
    }

    #[test]
    fn accepts_matching_tags() {
        assert!(PropertyType::Float.accepts(&RecordValue::Integer(3)));
        assert!(!PropertyType::Integer.accepts(&RecordValue::Float(3.5)));
        assert!(PropertyType::String.accepts(&RecordValue::Null));
        assert!(!PropertyType::Object("Order".into()).accepts(&RecordValue::String("x".into())));
    }

    #[test]
    fn object_reference_detection() {
        assert!(PropertyType::Object("A".into()).may_reference_objects());
        assert!(PropertyType::Collection(None).may_reference_objects());
        assert!(!PropertyType::Collection(Some(Box::new(PropertyType::Integer))).may_reference_objects());
        assert!(!PropertyType::DateTime.may_reference_objects());
    }
}
