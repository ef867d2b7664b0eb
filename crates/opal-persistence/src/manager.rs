use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use opal_mapper::{DataMapper, MapperError, RecordSource};
use opal_schema::{ClassSchema, Introspector, SchemaRegistry, SchemaSet};
use opal_session::{ManagedObject, Session, SessionError};
use opal_types::{ContentHasher, Identifier, ObjectRef, RawRecord, Value};
use serde_json::json;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::change::{ChangeSet, CommitReport, ObjectChange};
use crate::config::PersistenceConfig;
use crate::error::{PersistenceError, PersistenceResult};
use crate::query::Query;
use crate::repository::Repository;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Classification {
    New,
    Dirty,
}

/// One object the commit will send, with the identifier it is sent under.
struct Planned {
    object: ObjectRef,
    identifier: Identifier,
    classification: Classification,
    aggregate_root: bool,
}

/// Result of classification: what to send, and how to name every object
/// a frozen record may reference.
#[derive(Default)]
struct Plan {
    changes: Vec<Planned>,
    identifiers: HashMap<ObjectRef, Identifier>,
    deduplicated: usize,
}

/// The unit of work: a session, a mapper over the backend, and the
/// registered repositories.
pub struct PersistenceManager {
    session: Session,
    mapper: DataMapper,
    backend: Arc<dyn Backend>,
    config: PersistenceConfig,
    repositories: Vec<Arc<dyn Repository>>,
    backend_initialized: bool,
}

impl PersistenceManager {
    pub fn new<B: Backend + 'static>(
        schemas: Arc<SchemaSet>,
        backend: Arc<B>,
        config: PersistenceConfig,
    ) -> Self {
        let source: Arc<dyn RecordSource> = backend.clone();
        let mapper = DataMapper::new(schemas, source).with_lazy_loading(config.lazy_loading);
        Self {
            session: Session::new(),
            mapper,
            backend,
            config,
            repositories: Vec::new(),
            backend_initialized: false,
        }
    }

    /// Builds schemas for every class the introspector knows, using the
    /// configured synthetic identity property.
    pub fn from_introspector<B: Backend + 'static>(
        introspector: Arc<dyn Introspector>,
        backend: Arc<B>,
        config: PersistenceConfig,
    ) -> PersistenceResult<Self> {
        let registry = SchemaRegistry::new(introspector)
            .with_identity_property(config.synthetic_identity_property.clone());
        let snapshot = registry.ensure_all()?;
        Ok(Self::new(snapshot.schemas, backend, config))
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn mapper(&self) -> &DataMapper {
        &self.mapper
    }

    pub fn schemas(&self) -> &SchemaSet {
        self.mapper.schemas()
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn register_repository(&mut self, repository: Arc<dyn Repository>) {
        debug!(class = repository.entity_class_name(), "repository registered");
        self.repositories.push(repository);
    }

    pub fn repository(&self, entity_class_name: &str) -> Option<&Arc<dyn Repository>> {
        self.repositories
            .iter()
            .find(|r| r.entity_class_name() == entity_class_name)
    }

    /// Moves a new object into the session.
    pub fn insert(&mut self, object: ManagedObject) -> ObjectRef {
        self.session.insert(object)
    }

    /// The live object for an identifier, mapping it from the backend if
    /// the session does not know it yet.
    pub fn object_by_identifier(
        &mut self,
        identifier: &Identifier,
    ) -> PersistenceResult<Option<ObjectRef>> {
        if let Some(r) = self.session.object_by_identifier(identifier) {
            return Ok(Some(r));
        }
        let Some(record) = self.backend.record_by_identifier(identifier)? else {
            return Ok(None);
        };
        Ok(Some(self.mapper.map_to_object(&mut self.session, &record)?))
    }

    pub fn identifier_by_object(&self, r: ObjectRef) -> Option<&Identifier> {
        self.session.identifier_by_object(r)
    }

    /// Whether the next commit would send the object as new.
    pub fn is_new_object(&self, r: ObjectRef) -> PersistenceResult<bool> {
        let object = self.session.peek(r)?;
        Ok(if object.is_value_object() {
            !self.session.has_object(r)
        } else {
            !self.session.is_reconstituted(r)
        })
    }

    /// Runs a query against the backend and maps the results. Records that
    /// fail to map are logged and left out.
    pub fn find(&mut self, query: &Query) -> PersistenceResult<Vec<ObjectRef>> {
        let records = self.backend.records_by_query(query)?;
        Ok(self
            .mapper
            .map_to_objects(&mut self.session, &records)
            .into_iter()
            .filter_map(Result::ok)
            .collect())
    }

    /// Forgets all objects and pending repository requests.
    pub fn clear_state(&mut self) {
        self.session.clear();
        for repository in &self.repositories {
            repository.clear_tracking();
        }
    }

    /// Commits the unit of work.
    ///
    /// Classifies every reachable object and sends the result to the
    /// backend in one commit. Session and repository bookkeeping change only
    /// after the backend accepted the commit.
    pub fn persist_all(&mut self) -> PersistenceResult<CommitReport> {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut updated = Vec::new();
        for repository in &self.repositories {
            added.extend(repository.added_objects());
            removed.extend(repository.removed_objects());
            updated.extend(repository.updated_objects());
        }
        dedup_in_place(&mut added);
        dedup_in_place(&mut removed);

        if let Some(r) = updated
            .iter()
            .find(|r| !self.session.is_reconstituted(**r))
        {
            return Err(PersistenceError::NotPersisted(*r));
        }

        let removed: Vec<ObjectRef> = removed
            .into_iter()
            .filter(|r| self.session.is_reconstituted(*r))
            .collect();
        let excluded: HashSet<ObjectRef> = removed.iter().copied().collect();
        let added_set: HashSet<ObjectRef> = added.iter().copied().collect();

        let mut roots = added;
        roots.extend(self.session.reconstituted_objects());
        let order = self.traverse(&roots, &excluded)?;
        let plan = self.classify(&order, &added_set)?;
        let changes = self.change_set(&plan, &removed)?;

        if !self.backend_initialized {
            self.backend.initialize(self.mapper.schemas())?;
            self.backend_initialized = true;
        }
        self.backend.commit(&changes)?;

        let report = self.apply(&plan, &changes, &removed)?;
        for repository in &self.repositories {
            repository.clear_tracking();
        }
        info!(
            new = report.new.len(),
            dirty = report.dirty.len(),
            removed = report.removed.len(),
            deduplicated = report.deduplicated,
            "unit of work committed"
        );
        Ok(report)
    }

    fn schema_for(&self, object: &ManagedObject) -> PersistenceResult<&ClassSchema> {
        self.mapper
            .schemas()
            .get(object.class_name())
            .ok_or_else(|| MapperError::UnknownClass(object.class_name().to_string()).into())
    }

    /// Depth-first, pre-order walk over declared properties. Pending
    /// objects are visited but not followed; proxies are not followed.
    fn traverse(
        &self,
        roots: &[ObjectRef],
        excluded: &HashSet<ObjectRef>,
    ) -> PersistenceResult<Vec<ObjectRef>> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack: Vec<ObjectRef> = roots.iter().rev().copied().collect();

        while let Some(r) = stack.pop() {
            if excluded.contains(&r) || !visited.insert(r) {
                continue;
            }
            order.push(r);
            let object = self.session.peek(r)?;
            if !object.is_loaded() {
                continue;
            }
            let schema = self.schema_for(object)?;
            let mut children = Vec::new();
            for property in schema.properties() {
                if let Some(value) = object.get(&property.name) {
                    children.extend(value.referenced_objects());
                }
            }
            for child in children.into_iter().rev() {
                if !visited.contains(&child) {
                    stack.push(child);
                }
            }
        }
        Ok(order)
    }

    fn classify(
        &self,
        order: &[ObjectRef],
        added: &HashSet<ObjectRef>,
    ) -> PersistenceResult<Plan> {
        let mut plan = Plan::default();
        let mut claimed: HashMap<Identifier, ObjectRef> = HashMap::new();

        // Entities first: value-object digests include their identifiers.
        for &r in order {
            let object = self.session.peek(r)?;
            if !object.is_loaded() || !object.is_entity() {
                continue;
            }
            let schema = self.schema_for(object)?;
            let aggregate_root = added.contains(&r) || schema.is_aggregate_root();

            if self.session.is_reconstituted(r) {
                if let Some(identifier) = self.session.identifier_by_object(r) {
                    plan.identifiers.insert(r, identifier.clone());
                    if self.session.is_dirty(r)? {
                        plan.changes.push(Planned {
                            object: r,
                            identifier: identifier.clone(),
                            classification: Classification::Dirty,
                            aggregate_root,
                        });
                    }
                }
                continue;
            }

            let identifier = match self.session.identifier_by_object(r) {
                Some(identifier) => identifier.clone(),
                None => self.entity_identifier(schema, object, r)?,
            };
            if let Some(owner) = self.session.object_by_identifier(&identifier) {
                if owner != r {
                    return Err(SessionError::IdentifierAlreadyInUse { identifier }.into());
                }
            }
            if claimed.insert(identifier.clone(), r).is_some() {
                return Err(PersistenceError::DuplicateIdentifier { identifier });
            }
            plan.identifiers.insert(r, identifier.clone());
            plan.changes.push(Planned {
                object: r,
                identifier,
                classification: Classification::New,
                aggregate_root,
            });
        }

        for &r in order {
            let object = self.session.peek(r)?;
            if !object.is_loaded() || !object.is_value_object() {
                continue;
            }
            if let Some(identifier) = self.session.identifier_by_object(r) {
                plan.identifiers.insert(r, identifier.clone());
                continue;
            }
            let digest = {
                let known = &plan.identifiers;
                self.session
                    .content_identifier_with(r, &|x| known.get(&x).cloned())?
            };
            plan.identifiers.insert(r, digest.clone());
            let stored = self.session.has_identifier(&digest) || claimed.contains_key(&digest);
            if stored {
                debug!(object = %r, digest = %digest.short_id(), "value object already stored");
                plan.deduplicated += 1;
                continue;
            }
            claimed.insert(digest.clone(), r);
            plan.changes.push(Planned {
                object: r,
                identifier: digest,
                classification: Classification::New,
                aggregate_root: added.contains(&r),
            });
        }

        // Keep the combined list in traversal order.
        let position: HashMap<ObjectRef, usize> =
            order.iter().enumerate().map(|(i, r)| (*r, i)).collect();
        plan.changes.sort_by_key(|p| position.get(&p.object).copied());
        Ok(plan)
    }

    /// Identifier for a new entity: its natural identity if the class
    /// declares one, a generated one otherwise.
    fn entity_identifier(
        &self,
        schema: &ClassSchema,
        object: &ManagedObject,
        r: ObjectRef,
    ) -> PersistenceResult<Identifier> {
        if !schema.has_natural_identity() {
            return Ok(self.config.identifier_strategy.generate());
        }
        let property = schema.identity_property().unwrap_or_default();
        let invalid = |found: &str| PersistenceError::InvalidIdentity {
            class_name: schema.class_name().to_string(),
            property: property.to_string(),
            found: found.to_string(),
        };
        let text = match object.get(property).unwrap_or(&Value::Null) {
            Value::Null => {
                return Err(PersistenceError::MissingIdentity {
                    class_name: schema.class_name().to_string(),
                    object: r,
                    property: property.to_string(),
                })
            }
            Value::String(v) => v.clone(),
            Value::Integer(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Boolean(v) => v.to_string(),
            Value::DateTime(v) => v.to_rfc3339(),
            Value::Collection(items) => {
                let mut parts = Vec::with_capacity(items.len());
                for item in items {
                    parts.push(match item {
                        Value::String(v) => json!(v),
                        Value::Integer(v) => json!(v),
                        Value::Boolean(v) => json!(v),
                        other => return Err(invalid(other.type_name())),
                    });
                }
                let key = json!({ "class": schema.class_name(), "key": parts });
                return Ok(ContentHasher::NATURAL_KEY.identifier(&key)?);
            }
            other => return Err(invalid(other.type_name())),
        };
        Ok(Identifier::new(text)?)
    }

    fn change_set(&self, plan: &Plan, removed: &[ObjectRef]) -> PersistenceResult<ChangeSet> {
        let lookup = |r: ObjectRef| plan.identifiers.get(&r).cloned();
        let mut changes = ChangeSet::default();
        for planned in &plan.changes {
            let record = self
                .mapper
                .freeze_object_with(&self.session, planned.object, &lookup)?;
            let change = ObjectChange {
                object: planned.object,
                record,
                aggregate_root: planned.aggregate_root,
            };
            match planned.classification {
                Classification::New => changes.new.push(change),
                Classification::Dirty => changes.dirty.push(change),
            }
        }
        for &r in removed {
            let object = self.session.peek(r)?;
            let identifier = self
                .session
                .identifier_by_object(r)
                .ok_or(SessionError::UnknownObject(r))?;
            changes.removed.push(ObjectChange {
                object: r,
                record: RawRecord::new(identifier.as_str(), object.class_name()),
                aggregate_root: true,
            });
        }
        Ok(changes)
    }

    /// Post-commit bookkeeping.
    fn apply(
        &mut self,
        plan: &Plan,
        changes: &ChangeSet,
        removed: &[ObjectRef],
    ) -> PersistenceResult<CommitReport> {
        let mut report = CommitReport {
            deduplicated: plan.deduplicated,
            ..Default::default()
        };
        let records: HashMap<ObjectRef, &RawRecord> = changes
            .new
            .iter()
            .map(|c| (c.object, &c.record))
            .collect();

        for planned in &plan.changes {
            let r = planned.object;
            match planned.classification {
                Classification::New => {
                    self.session.register_object(r, planned.identifier.clone())?;
                    let (value_object, synthetic_slot) = {
                        let schema = self.schema_for(self.session.peek(r)?)?;
                        let slot = if schema.has_natural_identity() {
                            None
                        } else {
                            schema.identity_property().map(str::to_string)
                        };
                        (schema.is_value_object(), slot)
                    };
                    let object = self.session.peek_mut(r)?;
                    if value_object {
                        object.set_value_hash(planned.identifier.clone());
                    } else {
                        if let Some(slot) = synthetic_slot {
                            object.set(slot, Value::string(planned.identifier.as_str()));
                        }
                        if let Some(record) = records.get(&r) {
                            self.session.register_reconstituted_entity(r, record)?;
                        }
                    }
                    report.new.push(planned.identifier.clone());
                }
                Classification::Dirty => {
                    self.session.mark_clean(r);
                    report.dirty.push(planned.identifier.clone());
                }
            }
        }

        for &r in removed {
            self.session.unregister_reconstituted_entity(r);
            if let Some(identifier) = self.session.unregister_object(r) {
                report.removed.push(identifier);
            }
        }
        Ok(report)
    }
}

fn dedup_in_place(objects: &mut Vec<ObjectRef>) {
    let mut seen = HashSet::new();
    objects.retain(|r| seen.insert(*r));
}

impl fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("session", &self.session)
            .field("repositories", &self.repositories.len())
            .field("backend_initialized", &self.backend_initialized)
            .field("config", &self.config)
            .finish()
    }
}
