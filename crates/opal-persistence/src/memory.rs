use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::RwLock;

use opal_mapper::RecordSource;
use opal_schema::SchemaSet;
use opal_types::{BackendError, BackendResult, Identifier, RawRecord, RecordValue};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::change::ChangeSet;
use crate::query::Query;

#[derive(Default)]
struct BackendState {
    records: BTreeMap<String, RawRecord>,
    hidden: BTreeSet<String>,
    classes: Option<Vec<String>>,
    fail_next_commit: Option<String>,
    commits: usize,
    last_commit: Option<ChangeSet>,
}

/// In-memory record store.
///
/// Intended for tests and embedding. Records are kept flat, with every
/// reference stored as an identifier/class stub, and expanded into nested
/// records on read. A reference back to a record already being expanded
/// stays a stub, so cyclic data reads back finitely.
///
/// Identifiers can be hidden to simulate an access policy: hidden records
/// read as absent, drop out of object sets, and single references to them
/// read as `null`.
pub struct InMemoryBackend {
    state: RwLock<BackendState>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(BackendState::default()),
        }
    }

    /// A backend pre-loaded with records.
    pub fn with_records(records: impl IntoIterator<Item = RawRecord>) -> Self {
        let backend = Self::new();
        for record in records {
            backend.insert(record);
        }
        backend
    }

    /// Stores a record as given, replacing any previous one.
    pub fn insert(&self, record: RawRecord) {
        let mut state = self.state.write().expect("lock poisoned");
        state.records.insert(record.identifier.clone(), record);
    }

    /// The stored record without expansion, ignoring visibility.
    pub fn stored(&self, identifier: &str) -> Option<RawRecord> {
        self.state
            .read()
            .expect("lock poisoned")
            .records
            .get(identifier)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().expect("lock poisoned").records.is_empty()
    }

    /// Sorted identifiers of all stored records.
    pub fn identifiers(&self) -> Vec<String> {
        self.state
            .read()
            .expect("lock poisoned")
            .records
            .keys()
            .cloned()
            .collect()
    }

    pub fn hide(&self, identifier: impl Into<String>) {
        self.state
            .write()
            .expect("lock poisoned")
            .hidden
            .insert(identifier.into());
    }

    pub fn reveal(&self, identifier: &str) {
        self.state
            .write()
            .expect("lock poisoned")
            .hidden
            .remove(identifier);
    }

    /// Makes the next commit fail with `message` without storing anything.
    pub fn fail_next_commit(&self, message: impl Into<String>) {
        self.state.write().expect("lock poisoned").fail_next_commit = Some(message.into());
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> usize {
        self.state.read().expect("lock poisoned").commits
    }

    /// The change set of the last successful commit.
    pub fn last_commit(&self) -> Option<ChangeSet> {
        self.state.read().expect("lock poisoned").last_commit.clone()
    }

    /// Class names passed to the last `initialize`, if any.
    pub fn initialized_classes(&self) -> Option<Vec<String>> {
        self.state.read().expect("lock poisoned").classes.clone()
    }
}

impl BackendState {
    fn is_visible(&self, identifier: &str) -> bool {
        !self.hidden.contains(identifier)
    }

    fn expand(&self, identifier: &str, ancestors: &mut Vec<String>) -> Option<RawRecord> {
        if !self.is_visible(identifier) {
            return None;
        }
        let record = self.records.get(identifier)?;
        if ancestors.iter().any(|a| a == identifier) {
            return Some(record.to_stub());
        }
        let mut record = record.clone();
        ancestors.push(identifier.to_string());
        for value in record.properties.values_mut() {
            self.expand_value(value, ancestors);
        }
        ancestors.pop();
        Some(record)
    }

    fn expand_value(&self, value: &mut RecordValue, ancestors: &mut Vec<String>) {
        if matches!(value, RecordValue::Object(nested) if !self.is_visible(&nested.identifier)) {
            *value = RecordValue::Null;
            return;
        }
        match value {
            RecordValue::Object(nested) => {
                if let Some(full) = self.expand(&nested.identifier, ancestors) {
                    *nested = full;
                }
            }
            RecordValue::ObjectSet(members) => {
                members.retain(|m| self.is_visible(&m.identifier));
                for member in members.iter_mut() {
                    if let Some(full) = self.expand(&member.identifier, ancestors) {
                        *member = full;
                    }
                }
            }
            RecordValue::Collection(items) => {
                for item in items.iter_mut() {
                    self.expand_value(item, ancestors);
                }
            }
            _ => {}
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        f.debug_struct("InMemoryBackend")
            .field("records", &state.records.len())
            .field("hidden", &state.hidden.len())
            .field("commits", &state.commits)
            .finish()
    }
}

impl RecordSource for InMemoryBackend {
    fn record_by_identifier(&self, identifier: &Identifier) -> BackendResult<Option<RawRecord>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.expand(identifier.as_str(), &mut Vec::new()))
    }
}

impl Backend for InMemoryBackend {
    fn initialize(&self, schemas: &SchemaSet) -> BackendResult<()> {
        let classes: Vec<String> = schemas.class_names().map(str::to_string).collect();
        info!(classes = classes.len(), "in-memory backend initialized");
        self.state.write().expect("lock poisoned").classes = Some(classes);
        Ok(())
    }

    fn commit(&self, changes: &ChangeSet) -> BackendResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        if let Some(message) = state.fail_next_commit.take() {
            return Err(BackendError::new(message));
        }

        for change in &changes.new {
            state
                .records
                .insert(change.record.identifier.clone(), change.record.clone());
        }
        for change in &changes.dirty {
            let stored = state
                .records
                .entry(change.record.identifier.clone())
                .or_insert_with(|| change.record.to_stub());
            stored.properties.extend(
                change
                    .record
                    .properties
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
        for change in &changes.removed {
            state.records.remove(&change.record.identifier);
        }

        state.commits += 1;
        state.last_commit = Some(changes.clone());
        debug!(
            new = changes.new.len(),
            dirty = changes.dirty.len(),
            removed = changes.removed.len(),
            "in-memory commit applied"
        );
        Ok(())
    }

    fn records_by_query(&self, query: &Query) -> BackendResult<Vec<RawRecord>> {
        let state = self.state.read().expect("lock poisoned");
        let limit = query.max_results().unwrap_or(usize::MAX);
        Ok(state
            .records
            .values()
            .filter(|r| state.is_visible(&r.identifier) && query.matches(r))
            .take(limit)
            .filter_map(|r| state.expand(&r.identifier, &mut Vec::new()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use opal_types::ObjectRef;

    use super::*;
    use crate::change::ObjectChange;

    fn id(s: &str) -> Identifier {
        Identifier::new(s).unwrap()
    }

    fn stub(identifier: &str, class_name: &str) -> RecordValue {
        RecordValue::Object(RawRecord::new(identifier, class_name))
    }

    fn change(record: RawRecord) -> ObjectChange {
        ObjectChange {
            object: ObjectRef::from_raw(1),
            record,
            aggregate_root: true,
        }
    }

    // ---- reads ----

    #[test]
    fn expands_references() {
        let backend = InMemoryBackend::with_records([
            RawRecord::new("E1", "Order").with("customer", stub("C1", "Customer")),
            RawRecord::new("C1", "Customer").with("name", RecordValue::string("Ada")),
        ]);

        let order = backend.record_by_identifier(&id("E1")).unwrap().unwrap();
        let Some(RecordValue::Object(customer)) = order.get("customer") else {
            panic!("customer not expanded");
        };
        assert_eq!(customer.get("name"), Some(&RecordValue::string("Ada")));
    }

    #[test]
    fn cycles_end_in_stubs() {
        let backend = InMemoryBackend::with_records([
            RawRecord::new("A", "Node").with("next", stub("B", "Node")),
            RawRecord::new("B", "Node").with("next", stub("A", "Node")),
        ]);

        let a = backend.record_by_identifier(&id("A")).unwrap().unwrap();
        let Some(RecordValue::Object(b)) = a.get("next") else {
            panic!("B not expanded");
        };
        assert!(!b.is_stub());
        assert_eq!(b.get("next"), Some(&stub("A", "Node")));
    }

    #[test]
    fn hidden_records_disappear() {
        let backend = InMemoryBackend::with_records([
            RawRecord::new("E1", "Order")
                .with("customer", stub("C1", "Customer"))
                .with(
                    "lines",
                    RecordValue::ObjectSet(vec![
                        RawRecord::new("L1", "Line"),
                        RawRecord::new("L2", "Line"),
                    ]),
                ),
            RawRecord::new("C1", "Customer"),
            RawRecord::new("L1", "Line").with("quantity", RecordValue::Integer(1)),
            RawRecord::new("L2", "Line").with("quantity", RecordValue::Integer(2)),
        ]);
        backend.hide("C1");
        backend.hide("L2");

        assert!(backend.record_by_identifier(&id("C1")).unwrap().is_none());
        let order = backend.record_by_identifier(&id("E1")).unwrap().unwrap();
        assert_eq!(order.get("customer"), Some(&RecordValue::Null));
        let Some(RecordValue::ObjectSet(lines)) = order.get("lines") else {
            panic!("lines missing");
        };
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].identifier, "L1");

        backend.reveal("C1");
        assert!(backend.record_by_identifier(&id("C1")).unwrap().is_some());
    }

    #[test]
    fn query_filters_and_limits() {
        let backend = InMemoryBackend::with_records([
            RawRecord::new("E1", "Order").with("status", RecordValue::string("open")),
            RawRecord::new("E2", "Order").with("status", RecordValue::string("closed")),
            RawRecord::new("E3", "Order").with("status", RecordValue::string("open")),
        ]);

        let open = Query::new("Order").equals("status", RecordValue::string("open"));
        let found = backend.records_by_query(&open).unwrap();
        let ids: Vec<&str> = found.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, ["E1", "E3"]);

        assert_eq!(backend.records_by_query(&open.limit(1)).unwrap().len(), 1);
    }

    // ---- commits ----

    #[test]
    fn commit_inserts_merges_and_removes() {
        let backend = InMemoryBackend::with_records([
            RawRecord::new("E1", "Order")
                .with("total", RecordValue::Integer(1))
                .with("note", RecordValue::string("keep")),
            RawRecord::new("E2", "Order"),
        ]);

        let changes = ChangeSet {
            new: vec![change(RawRecord::new("E3", "Order"))],
            dirty: vec![change(RawRecord::new("E1", "Order").with("total", RecordValue::Integer(2)))],
            removed: vec![change(RawRecord::new("E2", "Order"))],
        };
        backend.commit(&changes).unwrap();

        let e1 = backend.stored("E1").unwrap();
        assert_eq!(e1.get("total"), Some(&RecordValue::Integer(2)));
        assert_eq!(e1.get("note"), Some(&RecordValue::string("keep")));
        assert!(backend.stored("E2").is_none());
        assert!(backend.stored("E3").is_some());
        assert_eq!(backend.commit_count(), 1);
        assert_eq!(backend.last_commit(), Some(changes));
    }

    #[test]
    fn failed_commit_stores_nothing() {
        let backend = InMemoryBackend::new();
        backend.fail_next_commit("disk full");
        let changes = ChangeSet {
            new: vec![change(RawRecord::new("E1", "Order"))],
            ..Default::default()
        };

        let err = backend.commit(&changes).unwrap_err();
        assert_eq!(err.message(), "disk full");
        assert!(backend.is_empty());
        assert_eq!(backend.commit_count(), 0);

        backend.commit(&changes).unwrap();
        assert_eq!(backend.identifiers(), ["E1"]);
    }

    #[test]
    fn initialize_records_classes() {
        let backend = InMemoryBackend::new();
        assert!(backend.initialized_classes().is_none());
        backend.initialize(&SchemaSet::new()).unwrap();
        assert_eq!(backend.initialized_classes(), Some(vec![]));
    }
}
