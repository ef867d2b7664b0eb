//! Raw records: the unit exchanged between the engine and a backend.
//!
//! A record carries an identifier, a class name and a property map whose
//! entries are tagged `{type, value}` pairs. An empty property map is the
//! "not yet loaded" sentinel used for lazy placeholders and for references
//! to objects the reader has already seen.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record as stored by, or fetched from, a backend.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default)]
    pub identifier: String,
    #[serde(default, alias = "classname")]
    pub class_name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, RecordValue>,
}

impl RawRecord {
    /// Create a record with no properties.
    pub fn new(identifier: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            class_name: class_name.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style property setter.
    pub fn with(mut self, name: impl Into<String>, value: RecordValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Returns `true` if the record carries nothing at all.
    pub fn is_empty(&self) -> bool {
        self.identifier.is_empty() && self.class_name.is_empty() && self.properties.is_empty()
    }

    /// Returns `true` if the record names an object but carries no data.
    pub fn is_stub(&self) -> bool {
        !self.identifier.is_empty() && !self.class_name.is_empty() && self.properties.is_empty()
    }

    /// Reference-only copy of this record (identifier and class, no data).
    pub fn to_stub(&self) -> Self {
        Self::new(self.identifier.clone(), self.class_name.clone())
    }

    pub fn get(&self, name: &str) -> Option<&RecordValue> {
        self.properties.get(name)
    }
}

/// A tagged property value inside a [`RawRecord`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum RecordValue {
    /// Explicitly absent: clears the property to its empty default.
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    DateTime(DateTime<Utc>),
    Collection(Vec<RecordValue>),
    ObjectSet(Vec<RawRecord>),
    Object(RawRecord),
}

impl RecordValue {
    /// The primitive tag of this value.
    pub fn tag(&self) -> RecordTag {
        match self {
            Self::Null => RecordTag::Null,
            Self::Integer(_) => RecordTag::Integer,
            Self::Float(_) => RecordTag::Float,
            Self::Boolean(_) => RecordTag::Boolean,
            Self::String(_) => RecordTag::String,
            Self::DateTime(_) => RecordTag::DateTime,
            Self::Collection(_) => RecordTag::Collection,
            Self::ObjectSet(_) => RecordTag::ObjectSet,
            Self::Object(_) => RecordTag::Object,
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    /// Nested object records reachable from this value (one level deep).
    pub fn nested_records(&self) -> Vec<&RawRecord> {
        match self {
            Self::Object(record) => vec![record],
            Self::ObjectSet(records) => records.iter().collect(),
            Self::Collection(items) => items.iter().flat_map(Self::nested_records).collect(),
            _ => Vec::new(),
        }
    }

    /// Mutable counterpart of [`nested_records`](Self::nested_records).
    pub fn nested_records_mut(&mut self) -> Vec<&mut RawRecord> {
        match self {
            Self::Object(record) => vec![record],
            Self::ObjectSet(records) => records.iter_mut().collect(),
            Self::Collection(items) => items
                .iter_mut()
                .flat_map(Self::nested_records_mut)
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Primitive tag of a [`RecordValue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordTag {
    Null,
    Integer,
    Float,
    Boolean,
    String,
    DateTime,
    Collection,
    ObjectSet,
    Object,
}

impl fmt::Display for RecordTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Null => "null",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::DateTime => "datetime",
            Self::Collection => "collection",
            Self::ObjectSet => "objectset",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_and_stub_detection() {
        assert!(RawRecord::default().is_empty());
        let stub = RawRecord::new("E1", "Order");
        assert!(!stub.is_empty());
        assert!(stub.is_stub());
        let full = stub.clone().with("total", RecordValue::Integer(42));
        assert!(!full.is_stub());
        assert_eq!(full.to_stub(), stub);
    }

    #[test]
    fn deserializes_tagged_properties() {
        let record: RawRecord = serde_json::from_value(json!({
            "identifier": "E1",
            "class_name": "Order",
            "properties": {
                "total": { "type": "integer", "value": 42 },
                "note": { "type": "null" },
                "customer": {
                    "type": "object",
                    "value": { "identifier": "C1", "classname": "Customer" }
                },
                "tags": {
                    "type": "collection",
                    "value": [ { "type": "string", "value": "rush" } ]
                }
            }
        }))
        .unwrap();

        assert_eq!(record.get("total"), Some(&RecordValue::Integer(42)));
        assert_eq!(record.get("note"), Some(&RecordValue::Null));
        match record.get("customer") {
            Some(RecordValue::Object(customer)) => assert!(customer.is_stub()),
            other => panic!("unexpected customer value: {other:?}"),
        }
        assert_eq!(record.get("tags").unwrap().tag(), RecordTag::Collection);
    }

    #[test]
    fn datetime_serializes_as_rfc3339() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let json = serde_json::to_value(RecordValue::DateTime(at)).unwrap();
        assert_eq!(json, json!({ "type": "datetime", "value": "2024-05-01T12:00:00Z" }));
    }

    #[test]
    fn nested_records_walks_collections() {
        let value = RecordValue::Collection(vec![
            RecordValue::Object(RawRecord::new("A", "Line")),
            RecordValue::Integer(1),
            RecordValue::Collection(vec![RecordValue::Object(RawRecord::new("B", "Line"))]),
        ]);
        let ids: Vec<_> = value
            .nested_records()
            .iter()
            .map(|r| r.identifier.as_str())
            .collect();
        assert_eq!(ids, vec!["A", "B"]);
    }
}
