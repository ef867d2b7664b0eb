use opal_types::{Identifier, ObjectRef, RawRecord};
use serde::Serialize;

/// One classified object in a commit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObjectChange {
    /// The live object the record was frozen from.
    pub object: ObjectRef,
    /// The frozen state. References are identifier/class stubs; removed
    /// objects carry a stub only.
    pub record: RawRecord,
    /// Added to a repository, or an entity whose class has a repository.
    pub aggregate_root: bool,
}

impl ObjectChange {
    pub fn identifier(&self) -> &str {
        &self.record.identifier
    }

    pub fn class_name(&self) -> &str {
        &self.record.class_name
    }
}

/// Everything one `persist_all` call hands to the backend.
///
/// `new` and `dirty` hold every new or modified object reachable in the
/// unit of work, in traversal order. `removed` holds only the objects that
/// were explicitly removed from a repository; cleaning up sub-objects they
/// owned is the backend's business.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    pub new: Vec<ObjectChange>,
    pub dirty: Vec<ObjectChange>,
    pub removed: Vec<ObjectChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.dirty.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.dirty.len() + self.removed.len()
    }

    /// New and dirty aggregate roots, for backends that persist whole
    /// aggregates rather than individual records.
    pub fn roots(&self) -> impl Iterator<Item = &ObjectChange> {
        self.new
            .iter()
            .chain(self.dirty.iter())
            .filter(|c| c.aggregate_root)
    }
}

/// Outcome of a successful `persist_all`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub new: Vec<Identifier>,
    pub dirty: Vec<Identifier>,
    pub removed: Vec<Identifier>,
    /// New value objects whose content is already stored under the same
    /// digest.
    pub deduplicated: usize,
}

impl CommitReport {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.dirty.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(identifier: &str, root: bool) -> ObjectChange {
        ObjectChange {
            object: ObjectRef::from_raw(1),
            record: RawRecord::new(identifier, "Order"),
            aggregate_root: root,
        }
    }

    #[test]
    fn roots_filters_new_and_dirty() {
        let changes = ChangeSet {
            new: vec![change("a", true), change("b", false)],
            dirty: vec![change("c", true)],
            removed: vec![change("d", true)],
        };
        let roots: Vec<&str> = changes.roots().map(ObjectChange::identifier).collect();
        assert_eq!(roots, ["a", "c"]);
        assert_eq!(changes.len(), 4);
        assert!(!changes.is_empty());
        assert!(ChangeSet::default().is_empty());
    }
}
