use opal_types::{RawRecord, RecordValue};
use serde::{Deserialize, Serialize};

/// A property-equality constraint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub property: String,
    pub value: RecordValue,
}

/// Selects stored records of one class by property equality.
///
/// ```
/// use opal_persistence::Query;
/// use opal_types::RecordValue;
///
/// let query = Query::new("Order")
///     .equals("status", RecordValue::string("open"))
///     .limit(10);
/// assert_eq!(query.constraints().len(), 1);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Query {
    class_name: String,
    #[serde(default)]
    constraints: Vec<Constraint>,
    #[serde(default)]
    limit: Option<usize>,
}

impl Query {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            constraints: Vec::new(),
            limit: None,
        }
    }

    /// Requires `property` to equal `value`. References compare by
    /// identifier.
    pub fn equals(mut self, property: impl Into<String>, value: RecordValue) -> Self {
        self.constraints.push(Constraint {
            property: property.into(),
            value,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    /// Whether a stored record satisfies the query. A missing property
    /// only matches a `null` constraint.
    pub fn matches(&self, record: &RawRecord) -> bool {
        record.class_name == self.class_name
            && self.constraints.iter().all(|c| match record.get(&c.property) {
                Some(value) => same_value(value, &c.value),
                None => c.value == RecordValue::Null,
            })
    }
}

fn same_value(stored: &RecordValue, wanted: &RecordValue) -> bool {
    match (stored, wanted) {
        (RecordValue::Object(a), RecordValue::Object(b)) => a.identifier == b.identifier,
        (RecordValue::ObjectSet(a), RecordValue::ObjectSet(b)) => {
            let mut a: Vec<&str> = a.iter().map(|r| r.identifier.as_str()).collect();
            let mut b: Vec<&str> = b.iter().map(|r| r.identifier.as_str()).collect();
            a.sort_unstable();
            b.sort_unstable();
            a == b
        }
        _ => stored == wanted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(identifier: &str, status: &str) -> RawRecord {
        RawRecord::new(identifier, "Order")
            .with("status", RecordValue::string(status))
            .with("customer", RecordValue::Object(RawRecord::new("C1", "Customer")))
    }

    #[test]
    fn matches_class_and_constraints() {
        let query = Query::new("Order").equals("status", RecordValue::string("open"));
        assert!(query.matches(&order("E1", "open")));
        assert!(!query.matches(&order("E2", "closed")));
        assert!(!query.matches(&RawRecord::new("E3", "Invoice").with("status", RecordValue::string("open"))));
    }

    #[test]
    fn references_compare_by_identifier() {
        let full = RawRecord::new("C1", "Customer").with("name", RecordValue::string("Ada"));
        let query = Query::new("Order").equals("customer", RecordValue::Object(full));
        assert!(query.matches(&order("E1", "open")));
    }

    #[test]
    fn missing_property_matches_null_only() {
        let record = RawRecord::new("E1", "Order");
        assert!(Query::new("Order").equals("note", RecordValue::Null).matches(&record));
        assert!(!Query::new("Order")
            .equals("note", RecordValue::string("x"))
            .matches(&record));
    }

    #[test]
    fn unconstrained_query_matches_whole_class() {
        let query = Query::new("Order").limit(1);
        assert!(query.matches(&order("E1", "open")));
        assert_eq!(query.max_results(), Some(1));
    }
}
