use std::collections::{BTreeMap, HashMap};
use std::fmt;

use opal_types::{ContentHasher, Identifier, ObjectRef, ProxyId, RawRecord, Value};
use serde_json::json;
use tracing::{debug, trace};

use crate::error::{SessionError, SessionResult};
use crate::lazy::{Handle, LazyLoadingProxy, ObjectPopulation, ProxyState, ValuePopulation};
use crate::object::ManagedObject;

type CleanState = BTreeMap<String, Value>;

/// Position in a session's history that [`Session::rollback`] can return
/// to. Only objects and proxies created after the checkpoint are undone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    next_object: u64,
    next_proxy: u64,
}

/// The unit-of-work session.
///
/// Owns every live object of one unit of work and the bookkeeping around
/// them. Created per unit of work; the caller is responsible for not
/// sharing a session across threads without external synchronization.
pub struct Session {
    objects: BTreeMap<ObjectRef, ManagedObject>,
    next_object: u64,
    identifiers: HashMap<Identifier, ObjectRef>,
    object_identifiers: HashMap<ObjectRef, Identifier>,
    reconstituted: BTreeMap<ObjectRef, CleanState>,
    proxies: HashMap<ProxyId, LazyLoadingProxy>,
    next_proxy: u64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::new(),
            next_object: 1,
            identifiers: HashMap::new(),
            object_identifiers: HashMap::new(),
            reconstituted: BTreeMap::new(),
            proxies: HashMap::new(),
            next_proxy: 1,
        }
    }

    // ---- arena ----

    /// Moves an object into the session and returns its handle.
    ///
    /// The object is neither identified nor reconstituted yet.
    pub fn insert(&mut self, object: ManagedObject) -> ObjectRef {
        let r = ObjectRef::from_raw(self.next_object);
        self.next_object += 1;
        trace!(object = %r, class = object.class_name(), "object inserted");
        self.objects.insert(r, object);
        r
    }

    /// Whether the arena holds `r`, identified or not.
    pub fn contains(&self, r: ObjectRef) -> bool {
        self.objects.contains_key(&r)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All handles in the arena, in allocation order.
    pub fn iter_refs(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.objects.keys().copied()
    }

    /// The object as it stands, without triggering population.
    pub fn peek(&self, r: ObjectRef) -> SessionResult<&ManagedObject> {
        self.objects.get(&r).ok_or(SessionError::NoSuchObject(r))
    }

    /// Mutable access without triggering population or any bookkeeping.
    pub fn peek_mut(&mut self, r: ObjectRef) -> SessionResult<&mut ManagedObject> {
        self.objects.get_mut(&r).ok_or(SessionError::NoSuchObject(r))
    }

    /// The fully populated object.
    pub fn load(&mut self, r: ObjectRef) -> SessionResult<&ManagedObject> {
        self.populate(r)?;
        self.peek(r)
    }

    /// The fully populated object, for direct mutation.
    ///
    /// Writes through this reference skip the value-object immutability
    /// check and proxy retirement done by [`Session::set_property`].
    pub fn load_mut(&mut self, r: ObjectRef) -> SessionResult<&mut ManagedObject> {
        self.populate(r)?;
        self.peek_mut(r)
    }

    /// Reads one property, populating the object and any proxy in the
    /// slot first. Missing properties read as `Null`.
    pub fn property(&mut self, r: ObjectRef, name: &str) -> SessionResult<Value> {
        self.populate(r)?;
        let value = self.peek(r)?.get(name).cloned().unwrap_or(Value::Null);
        match value {
            Value::Proxy(id) => self.resolve_proxy(id),
            other => Ok(other),
        }
    }

    /// Writes one property and returns the previous value.
    ///
    /// Overwriting a proxy retires it without running its callback.
    /// Identified value objects are immutable.
    pub fn set_property(
        &mut self,
        r: ObjectRef,
        name: &str,
        value: Value,
    ) -> SessionResult<Option<Value>> {
        self.populate(r)?;
        let identified = self.object_identifiers.contains_key(&r);
        let object = self.peek_mut(r)?;
        if object.is_value_object() && identified {
            return Err(SessionError::ImmutableValueObject {
                class_name: object.class_name().to_string(),
                object: r,
            });
        }
        let previous = object.set(name, value);
        if let Some(Value::Proxy(id)) = previous {
            if let Some(proxy) = self.proxies.get_mut(&id) {
                proxy.state = ProxyState::Replaced;
            }
        }
        Ok(previous)
    }

    // ---- lazy population ----

    /// Puts an object into the pending state with the given callback.
    pub fn set_pending(&mut self, r: ObjectRef, populate: ObjectPopulation) -> SessionResult<()> {
        self.peek_mut(r)?.handle = Handle::Pending(populate);
        Ok(())
    }

    pub fn is_loaded(&self, r: ObjectRef) -> bool {
        self.objects.get(&r).is_some_and(ManagedObject::is_loaded)
    }

    /// Runs the object's pending population callback, if any.
    ///
    /// A trigger while population is already in progress returns without
    /// doing anything, so the in-flight callback sees the partially
    /// populated object. A failed callback leaves the object pending so
    /// the next access retries it.
    pub fn populate(&mut self, r: ObjectRef) -> SessionResult<()> {
        let object = self.peek_mut(r)?;
        let mut populate = match std::mem::replace(&mut object.handle, Handle::Populating) {
            Handle::Pending(populate) => populate,
            other => {
                object.handle = other;
                return Ok(());
            }
        };
        let target = format!("{} {}", object.class_name(), r);
        let before = object.properties().clone();
        let checkpoint = self.checkpoint();
        debug!(object = %target, "populating lazy object");

        match populate(self, r) {
            Ok(()) => {
                self.peek_mut(r)?.handle = Handle::Real;
                self.mark_clean(r);
                Ok(())
            }
            Err(source) => {
                self.rollback(checkpoint);
                if let Some(object) = self.objects.get_mut(&r) {
                    *object.properties_mut() = before;
                    object.handle = Handle::Pending(populate);
                }
                Err(SessionError::Population { target, source })
            }
        }
    }

    /// Places a proxy in `owner.property`. The callback runs on first
    /// access and its result replaces the proxy in the owner's slot.
    pub fn install_proxy(
        &mut self,
        owner: ObjectRef,
        property: &str,
        populate: ValuePopulation,
    ) -> SessionResult<ProxyId> {
        let id = ProxyId::from_raw(self.next_proxy);
        self.peek_mut(owner)?.set(property, Value::Proxy(id));
        self.next_proxy += 1;
        self.proxies
            .insert(id, LazyLoadingProxy::new(owner, property, populate));
        trace!(proxy = %id, owner = %owner, property, "proxy installed");
        Ok(id)
    }

    pub fn proxy(&self, id: ProxyId) -> Option<&LazyLoadingProxy> {
        self.proxies.get(&id)
    }

    /// Number of proxies whose owner slot has not been replaced yet.
    pub fn pending_proxies(&self) -> usize {
        self.proxies.values().filter(|p| !p.is_replaced()).count()
    }

    /// The real value behind a proxy.
    ///
    /// The first call runs the callback and installs the value into the
    /// owner's slot (and into its clean snapshot, so loading is not a
    /// modification). Later calls, including calls through a stale copy of
    /// `Value::Proxy(id)`, read the owner's slot.
    pub fn resolve_proxy(&mut self, id: ProxyId) -> SessionResult<Value> {
        let proxy = self
            .proxies
            .get_mut(&id)
            .ok_or(SessionError::UnknownProxy(id))?;
        let owner = proxy.owner();
        let property = proxy.property().to_string();

        let mut populate = match std::mem::replace(&mut proxy.state, ProxyState::Populating) {
            ProxyState::Pending(populate) => populate,
            ProxyState::Populating => return Ok(Value::Proxy(id)),
            ProxyState::Replaced => {
                proxy.state = ProxyState::Replaced;
                return Ok(self
                    .peek(owner)?
                    .get(&property)
                    .cloned()
                    .unwrap_or(Value::Null));
            }
        };

        let checkpoint = self.checkpoint();
        debug!(proxy = %id, owner = %owner, property = %property, "populating lazy property");
        match populate(self) {
            Ok(value) => {
                let slot = Value::Proxy(id);
                if let Some(object) = self.objects.get_mut(&owner) {
                    if object.get(&property) == Some(&slot) {
                        object.set(property.as_str(), value.clone());
                    }
                }
                if let Some(clean) = self.reconstituted.get_mut(&owner) {
                    if clean.get(&property) == Some(&slot) {
                        clean.insert(property.clone(), value.clone());
                    }
                }
                if let Some(proxy) = self.proxies.get_mut(&id) {
                    proxy.state = ProxyState::Replaced;
                }
                Ok(value)
            }
            Err(source) => {
                self.rollback(checkpoint);
                if let Some(proxy) = self.proxies.get_mut(&id) {
                    proxy.state = ProxyState::Pending(populate);
                }
                Err(SessionError::Population {
                    target: format!("{owner}.{property}"),
                    source,
                })
            }
        }
    }

    // ---- checkpoints ----

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            next_object: self.next_object,
            next_proxy: self.next_proxy,
        }
    }

    /// Discards every object and proxy created since `checkpoint`, along
    /// with their identifiers and clean snapshots. Returns the number of
    /// objects discarded.
    ///
    /// Objects that existed at the checkpoint are left as they are.
    pub fn rollback(&mut self, checkpoint: Checkpoint) -> usize {
        let discarded = self
            .objects
            .split_off(&ObjectRef::from_raw(checkpoint.next_object));
        for r in discarded.keys() {
            self.unregister_object(*r);
            self.reconstituted.remove(r);
        }
        self.proxies.retain(|id, proxy| {
            id.index() < checkpoint.next_proxy && !discarded.contains_key(&proxy.owner())
        });
        if !discarded.is_empty() {
            debug!(objects = discarded.len(), "session rolled back");
        }
        discarded.len()
    }

    // ---- identity map ----

    /// Associates an identifier with an object.
    ///
    /// Registering the same pair again is a no-op. Either side already
    /// being paired with something else is an error.
    pub fn register_object(&mut self, r: ObjectRef, identifier: Identifier) -> SessionResult<()> {
        if !self.objects.contains_key(&r) {
            return Err(SessionError::NoSuchObject(r));
        }
        if let Some(existing) = self.identifiers.get(&identifier) {
            if *existing == r {
                return Ok(());
            }
            return Err(SessionError::IdentifierAlreadyInUse { identifier });
        }
        if let Some(current) = self.object_identifiers.get(&r) {
            return Err(SessionError::ObjectAlreadyRegistered {
                object: r,
                identifier: current.clone(),
            });
        }
        trace!(object = %r, identifier = %identifier, "object registered");
        self.identifiers.insert(identifier.clone(), r);
        self.object_identifiers.insert(r, identifier);
        Ok(())
    }

    /// Removes the object from the identity map, returning its identifier.
    pub fn unregister_object(&mut self, r: ObjectRef) -> Option<Identifier> {
        let identifier = self.object_identifiers.remove(&r)?;
        self.identifiers.remove(&identifier);
        Some(identifier)
    }

    /// Whether the object has an identifier in this session.
    pub fn has_object(&self, r: ObjectRef) -> bool {
        self.object_identifiers.contains_key(&r)
    }

    pub fn has_identifier(&self, identifier: &Identifier) -> bool {
        self.identifiers.contains_key(identifier)
    }

    pub fn object_by_identifier(&self, identifier: &Identifier) -> Option<ObjectRef> {
        self.identifiers.get(identifier).copied()
    }

    pub fn identifier_by_object(&self, r: ObjectRef) -> Option<&Identifier> {
        self.object_identifiers.get(&r)
    }

    /// Substitutes `replacement` for `existing`.
    ///
    /// The identifier and reconstituted status (with its clean snapshot)
    /// move to `replacement`, and every reference to `existing` held by
    /// another object is re-pointed at it. `existing` is then dropped from
    /// the session together with its outstanding proxies.
    pub fn replace_object(&mut self, existing: ObjectRef, replacement: ObjectRef) -> SessionResult<()> {
        let identifier = self
            .object_identifiers
            .get(&existing)
            .cloned()
            .ok_or(SessionError::UnknownObject(existing))?;
        if !self.objects.contains_key(&replacement) {
            return Err(SessionError::NoSuchObject(replacement));
        }
        if let Some(current) = self.object_identifiers.get(&replacement) {
            if replacement != existing {
                return Err(SessionError::ObjectAlreadyRegistered {
                    object: replacement,
                    identifier: current.clone(),
                });
            }
            return Ok(());
        }

        self.object_identifiers.remove(&existing);
        self.object_identifiers
            .insert(replacement, identifier.clone());
        self.identifiers.insert(identifier.clone(), replacement);
        if let Some(clean) = self.reconstituted.remove(&existing) {
            self.reconstituted.insert(replacement, clean);
        }

        self.objects.remove(&existing);
        self.proxies.retain(|_, proxy| proxy.owner() != existing);
        for object in self.objects.values_mut() {
            for value in object.properties_mut().values_mut() {
                value.replace_reference(existing, replacement);
            }
        }
        for clean in self.reconstituted.values_mut() {
            for value in clean.values_mut() {
                value.replace_reference(existing, replacement);
            }
        }
        debug!(existing = %existing, replacement = %replacement, identifier = %identifier, "object replaced");
        Ok(())
    }

    // ---- reconstitution and dirty tracking ----

    /// Marks an object as reconstituted from `record` and snapshots its
    /// current properties as the clean state.
    pub fn register_reconstituted_entity(
        &mut self,
        r: ObjectRef,
        record: &RawRecord,
    ) -> SessionResult<()> {
        let clean = self.peek(r)?.properties().clone();
        trace!(object = %r, identifier = %record.identifier, class = %record.class_name, "reconstituted");
        self.reconstituted.insert(r, clean);
        Ok(())
    }

    pub fn unregister_reconstituted_entity(&mut self, r: ObjectRef) -> bool {
        self.reconstituted.remove(&r).is_some()
    }

    pub fn is_reconstituted(&self, r: ObjectRef) -> bool {
        self.reconstituted.contains_key(&r)
    }

    /// Reconstituted objects in allocation order.
    pub fn reconstituted_objects(&self) -> Vec<ObjectRef> {
        self.reconstituted.keys().copied().collect()
    }

    /// Whether a reconstituted entity differs from its clean snapshot.
    ///
    /// Comparison is shallow: a reference slot pointing at the same object
    /// is clean even if that object changed. Value objects, pending
    /// objects and objects that were never reconstituted are not dirty.
    pub fn is_dirty(&self, r: ObjectRef) -> SessionResult<bool> {
        let object = self.peek(r)?;
        if object.is_value_object() || !object.is_loaded() {
            return Ok(false);
        }
        Ok(self
            .reconstituted
            .get(&r)
            .is_some_and(|clean| clean != object.properties()))
    }

    pub fn is_property_dirty(&self, r: ObjectRef, name: &str) -> SessionResult<bool> {
        let object = self.peek(r)?;
        if object.is_value_object() || !object.is_loaded() {
            return Ok(false);
        }
        Ok(self
            .reconstituted
            .get(&r)
            .is_some_and(|clean| clean.get(name) != object.get(name)))
    }

    /// Takes a fresh clean snapshot of a reconstituted object. Returns
    /// `false` if the object is not reconstituted.
    pub fn mark_clean(&mut self, r: ObjectRef) -> bool {
        let Some(object) = self.objects.get(&r) else {
            return false;
        };
        match self.reconstituted.get_mut(&r) {
            Some(clean) => {
                *clean = object.properties().clone();
                true
            }
            None => false,
        }
    }

    /// Drops every object, identifier, snapshot and proxy.
    pub fn clear(&mut self) {
        debug!(objects = self.objects.len(), "session cleared");
        self.objects.clear();
        self.identifiers.clear();
        self.object_identifiers.clear();
        self.reconstituted.clear();
        self.proxies.clear();
    }

    // ---- content identity and export ----

    /// Content digest of a value object, using the session's identifiers
    /// for referenced entities.
    pub fn content_identifier(&self, r: ObjectRef) -> SessionResult<Identifier> {
        self.content_identifier_with(r, &|_| None)
    }

    /// Content digest of a value object.
    ///
    /// The digest covers the class name and every property. References to
    /// entities contribute the entity's identifier, looked up first through
    /// `resolve` and then in the identity map. References to other value
    /// objects contribute their own digest.
    pub fn content_identifier_with(
        &self,
        r: ObjectRef,
        resolve: &dyn Fn(ObjectRef) -> Option<Identifier>,
    ) -> SessionResult<Identifier> {
        let mut visiting = Vec::new();
        self.digest(r, resolve, &mut visiting)
    }

    fn digest(
        &self,
        r: ObjectRef,
        resolve: &dyn Fn(ObjectRef) -> Option<Identifier>,
        visiting: &mut Vec<ObjectRef>,
    ) -> SessionResult<Identifier> {
        if visiting.contains(&r) {
            return Err(SessionError::CyclicValueObject(r));
        }
        visiting.push(r);
        let object = self.peek(r)?;
        let mut properties = serde_json::Map::new();
        for (name, value) in object.properties() {
            let canonical = self.canonical(value, object.class_name(), name, resolve, visiting)?;
            properties.insert(name.clone(), canonical);
        }
        visiting.pop();

        let content = json!({
            "class": object.class_name(),
            "properties": properties,
        });
        ContentHasher::VALUE_OBJECT
            .identifier(&content)
            .map_err(|e| SessionError::Serialization(e.to_string()))
    }

    fn canonical(
        &self,
        value: &Value,
        class_name: &str,
        property: &str,
        resolve: &dyn Fn(ObjectRef) -> Option<Identifier>,
        visiting: &mut Vec<ObjectRef>,
    ) -> SessionResult<serde_json::Value> {
        Ok(match value {
            Value::Null => serde_json::Value::Null,
            Value::Integer(v) => json!({ "integer": v }),
            Value::Float(v) => json!({ "float": v }),
            Value::Boolean(v) => json!(v),
            Value::String(v) => json!(v),
            Value::DateTime(v) => json!({ "datetime": v.to_rfc3339() }),
            Value::Collection(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| self.canonical(item, class_name, property, resolve, visiting))
                    .collect::<SessionResult<_>>()?,
            ),
            Value::ObjectSet(members) => {
                let mut keys = members
                    .iter()
                    .map(|m| self.reference_key(*m, resolve, visiting))
                    .collect::<SessionResult<Vec<_>>>()?;
                keys.sort();
                keys.dedup();
                json!({ "set": keys })
            }
            Value::Object(target) => json!({ "ref": self.reference_key(*target, resolve, visiting)? }),
            Value::Proxy(_) => {
                return Err(SessionError::NotSerializable {
                    class_name: class_name.to_string(),
                    property: property.to_string(),
                })
            }
        })
    }

    fn reference_key(
        &self,
        r: ObjectRef,
        resolve: &dyn Fn(ObjectRef) -> Option<Identifier>,
        visiting: &mut Vec<ObjectRef>,
    ) -> SessionResult<String> {
        if let Some(identifier) = resolve(r).or_else(|| self.identifier_by_object(r).cloned()) {
            return Ok(identifier.to_string());
        }
        if self.peek(r)?.is_value_object() {
            return Ok(self.digest(r, resolve, visiting)?.to_string());
        }
        Err(SessionError::UnidentifiedReference(r))
    }

    /// JSON rendering of an object for display.
    ///
    /// References render as the target's identifier, or as the arena
    /// handle when the target is unidentified. Unresolved proxies cannot
    /// be rendered.
    pub fn export(&self, r: ObjectRef) -> SessionResult<serde_json::Value> {
        let object = self.peek(r)?;
        let mut properties = serde_json::Map::new();
        for (name, value) in object.properties() {
            properties.insert(name.clone(), self.export_value(value, object.class_name(), name)?);
        }
        Ok(json!({
            "class": object.class_name(),
            "identifier": self.identifier_by_object(r).map(Identifier::as_str),
            "properties": properties,
        }))
    }

    fn export_value(
        &self,
        value: &Value,
        class_name: &str,
        property: &str,
    ) -> SessionResult<serde_json::Value> {
        let reference = |r: &ObjectRef| match self.identifier_by_object(*r) {
            Some(identifier) => json!(identifier.as_str()),
            None => json!(r.to_string()),
        };
        Ok(match value {
            Value::Proxy(_) => {
                return Err(SessionError::NotSerializable {
                    class_name: class_name.to_string(),
                    property: property.to_string(),
                })
            }
            Value::Object(r) => reference(r),
            Value::ObjectSet(members) => serde_json::Value::Array(members.iter().map(reference).collect()),
            Value::Collection(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| self.export_value(item, class_name, property))
                    .collect::<SessionResult<_>>()?,
            ),
            Value::Null => serde_json::Value::Null,
            Value::Integer(v) => json!(v),
            Value::Float(v) => json!(v),
            Value::Boolean(v) => json!(v),
            Value::String(v) => json!(v),
            Value::DateTime(v) => json!(v.to_rfc3339()),
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("objects", &self.objects.len())
            .field("identified", &self.identifiers.len())
            .field("reconstituted", &self.reconstituted.len())
            .field("proxies", &self.proxies.len())
            .finish()
    }
}
