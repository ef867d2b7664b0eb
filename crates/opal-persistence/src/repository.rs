use std::fmt;
use std::sync::RwLock;

use opal_types::ObjectRef;

use crate::query::Query;

/// Tracks explicit lifecycle requests for the aggregate roots of one
/// class. The unit of work reads the tracked objects on commit and clears
/// them once the commit succeeded.
pub trait Repository: Send + Sync {
    fn entity_class_name(&self) -> &str;

    /// Objects added since the last successful commit.
    fn added_objects(&self) -> Vec<ObjectRef>;

    /// Objects removed since the last successful commit.
    fn removed_objects(&self) -> Vec<ObjectRef>;

    /// Objects passed to `update`; each must already be persisted.
    fn updated_objects(&self) -> Vec<ObjectRef> {
        Vec::new()
    }

    fn clear_tracking(&self);
}

#[derive(Debug, Default)]
struct Tracking {
    added: Vec<ObjectRef>,
    removed: Vec<ObjectRef>,
    updated: Vec<ObjectRef>,
}

/// Default repository: records add/remove/update requests in order.
pub struct ObjectRepository {
    entity_class_name: String,
    tracking: RwLock<Tracking>,
}

impl ObjectRepository {
    pub fn new(entity_class_name: impl Into<String>) -> Self {
        Self {
            entity_class_name: entity_class_name.into(),
            tracking: RwLock::new(Tracking::default()),
        }
    }

    /// Schedules an object for insertion.
    pub fn add(&self, object: ObjectRef) {
        let mut tracking = self.tracking.write().expect("lock poisoned");
        tracking.removed.retain(|r| *r != object);
        if !tracking.added.contains(&object) {
            tracking.added.push(object);
        }
    }

    /// Schedules an object for removal. Removing an object that was added
    /// in this unit of work just cancels the add.
    pub fn remove(&self, object: ObjectRef) {
        let mut tracking = self.tracking.write().expect("lock poisoned");
        if let Some(pos) = tracking.added.iter().position(|r| *r == object) {
            tracking.added.remove(pos);
            return;
        }
        tracking.updated.retain(|r| *r != object);
        if !tracking.removed.contains(&object) {
            tracking.removed.push(object);
        }
    }

    /// Declares that a persisted object was changed. Commit fails if the
    /// object was never persisted.
    pub fn update(&self, object: ObjectRef) {
        let mut tracking = self.tracking.write().expect("lock poisoned");
        if !tracking.updated.contains(&object) {
            tracking.updated.push(object);
        }
    }

    /// A query over this repository's class, for
    /// [`PersistenceManager::find`](crate::PersistenceManager::find).
    pub fn query(&self) -> Query {
        Query::new(self.entity_class_name.as_str())
    }

    /// Whether an add or remove is pending for the object.
    pub fn is_tracked(&self, object: ObjectRef) -> bool {
        let tracking = self.tracking.read().expect("lock poisoned");
        tracking.added.contains(&object) || tracking.removed.contains(&object)
    }
}

impl Repository for ObjectRepository {
    fn entity_class_name(&self) -> &str {
        &self.entity_class_name
    }

    fn added_objects(&self) -> Vec<ObjectRef> {
        self.tracking.read().expect("lock poisoned").added.clone()
    }

    fn removed_objects(&self) -> Vec<ObjectRef> {
        self.tracking.read().expect("lock poisoned").removed.clone()
    }

    fn updated_objects(&self) -> Vec<ObjectRef> {
        self.tracking.read().expect("lock poisoned").updated.clone()
    }

    fn clear_tracking(&self) {
        *self.tracking.write().expect("lock poisoned") = Tracking::default();
    }
}

impl fmt::Debug for ObjectRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracking = self.tracking.read().expect("lock poisoned");
        f.debug_struct("ObjectRepository")
            .field("entity_class_name", &self.entity_class_name)
            .field("added", &tracking.added.len())
            .field("removed", &tracking.removed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(n: u64) -> ObjectRef {
        ObjectRef::from_raw(n)
    }

    #[test]
    fn add_and_remove_are_tracked() {
        let repo = ObjectRepository::new("Order");
        repo.add(r(1));
        repo.add(r(1));
        repo.remove(r(2));

        assert_eq!(repo.entity_class_name(), "Order");
        assert_eq!(repo.added_objects(), vec![r(1)]);
        assert_eq!(repo.removed_objects(), vec![r(2)]);
        assert!(repo.is_tracked(r(1)));
        assert!(repo.is_tracked(r(2)));
        assert!(!repo.is_tracked(r(3)));
    }

    #[test]
    fn removing_an_added_object_cancels_the_add() {
        let repo = ObjectRepository::new("Order");
        repo.add(r(1));
        repo.remove(r(1));
        assert!(repo.added_objects().is_empty());
        assert!(repo.removed_objects().is_empty());
        assert!(!repo.is_tracked(r(1)));
    }

    #[test]
    fn re_adding_a_removed_object_cancels_the_removal() {
        let repo = ObjectRepository::new("Order");
        repo.remove(r(1));
        repo.add(r(1));
        assert!(repo.removed_objects().is_empty());
        assert_eq!(repo.added_objects(), vec![r(1)]);
    }

    #[test]
    fn query_targets_managed_class() {
        let repo = ObjectRepository::new("Order");
        let query = repo.query().limit(3);
        assert_eq!(query.class_name(), "Order");
        assert_eq!(query.max_results(), Some(3));
    }

    #[test]
    fn clear_tracking_forgets_everything() {
        let repo = ObjectRepository::new("Order");
        repo.add(r(1));
        repo.remove(r(2));
        repo.update(r(3));
        repo.clear_tracking();
        assert!(repo.added_objects().is_empty());
        assert!(repo.removed_objects().is_empty());
        assert!(repo.updated_objects().is_empty());
    }
}
