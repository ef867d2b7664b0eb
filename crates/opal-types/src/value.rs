use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::identifier::{ObjectRef, ProxyId};

/// A live property value.
///
/// Object references are arena handles ([`ObjectRef`]). A [`Value::Proxy`]
/// stands in for a value that has not been loaded yet; it is a transient
/// runtime artifact and refuses to serialize.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    DateTime(DateTime<Utc>),
    Collection(Vec<Value>),
    ObjectSet(Vec<ObjectRef>),
    Object(ObjectRef),
    #[serde(serialize_with = "reject_proxy")]
    Proxy(ProxyId),
}

impl Value {
    pub fn string(value: impl Into<String>) -> Self {
        Self::String(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, Self::Proxy(_))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Self::Object(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_object_set(&self) -> Option<&[ObjectRef]> {
        match self {
            Self::ObjectSet(members) => Some(members),
            _ => None,
        }
    }

    /// Every object directly or transitively (through collections)
    /// referenced by this value, in declaration order.
    pub fn referenced_objects(&self) -> Vec<ObjectRef> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<ObjectRef>) {
        match self {
            Self::Object(r) => out.push(*r),
            Self::ObjectSet(members) => out.extend(members.iter().copied()),
            Self::Collection(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            _ => {}
        }
    }

    /// Re-points every reference to `from` at `to`, including references
    /// nested in collections. An object set keeps one entry per member.
    /// Returns whether anything changed.
    pub fn replace_reference(&mut self, from: ObjectRef, to: ObjectRef) -> bool {
        match self {
            Self::Object(r) if *r == from => {
                *r = to;
                true
            }
            Self::ObjectSet(members) if members.contains(&from) => {
                let mut seen = Vec::with_capacity(members.len());
                for member in members.iter() {
                    let member = if *member == from { to } else { *member };
                    if !seen.contains(&member) {
                        seen.push(member);
                    }
                }
                *members = seen;
                true
            }
            Self::Collection(items) => items
                .iter_mut()
                .fold(false, |changed, item| item.replace_reference(from, to) || changed),
            _ => false,
        }
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::Boolean(_) => "boolean",
            Self::String(_) => "string",
            Self::DateTime(_) => "datetime",
            Self::Collection(_) => "collection",
            Self::ObjectSet(_) => "objectset",
            Self::Object(_) => "object",
            Self::Proxy(_) => "proxy",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(r: ObjectRef) -> Self {
        Self::Object(r)
    }
}

fn reject_proxy<S: Serializer>(proxy: &ProxyId, _serializer: S) -> Result<S::Ok, S::Error> {
    Err(serde::ser::Error::custom(format!(
        "lazy-loading proxy {proxy} is not serializable"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn referenced_objects_flattens_collections() {
        let a = ObjectRef::from_raw(1);
        let b = ObjectRef::from_raw(2);
        let c = ObjectRef::from_raw(3);
        let value = Value::Collection(vec![
            Value::Object(a),
            Value::Integer(5),
            Value::Collection(vec![Value::ObjectSet(vec![b, c])]),
        ]);
        assert_eq!(value.referenced_objects(), vec![a, b, c]);
        assert!(Value::string("x").referenced_objects().is_empty());
    }

    #[test]
    fn replace_reference_repoints_nested_members() {
        let a = ObjectRef::from_raw(1);
        let b = ObjectRef::from_raw(2);
        let c = ObjectRef::from_raw(3);
        let mut value = Value::Collection(vec![
            Value::Object(a),
            Value::ObjectSet(vec![a, b, c]),
        ]);
        assert!(value.replace_reference(a, b));
        assert_eq!(
            value,
            Value::Collection(vec![Value::Object(b), Value::ObjectSet(vec![b, c])])
        );
        assert!(!value.replace_reference(a, c));
        assert!(!Value::Integer(1).replace_reference(a, b));
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from(42).as_integer(), Some(42));
        assert_eq!(Value::from(2).as_float(), Some(2.0));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert!(Value::Null.is_null());
        assert_eq!(Value::Null.as_object(), None);
    }

    #[test]
    fn serializes_tagged() {
        let json = serde_json::to_value(Value::Integer(7)).unwrap();
        assert_eq!(json, json!({ "type": "integer", "value": 7 }));
    }

    #[test]
    fn proxy_is_not_serializable() {
        let err = serde_json::to_string(&Value::Proxy(ProxyId::from_raw(3))).unwrap_err();
        assert!(err.to_string().contains("not serializable"));

        let nested = Value::Collection(vec![Value::Proxy(ProxyId::from_raw(4))]);
        assert!(serde_json::to_string(&nested).is_err());
    }
}
