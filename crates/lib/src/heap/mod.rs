//! Local cache of tracked objects.
//!
//! The [`Heap`] owns every [`TrackedObject`] a process currently knows about,
//! keyed by [`ObjectId`]. Objects reference each other only by id, so the
//! graph may contain cycles without any shared ownership.
//!
//! An object is either *committed* (it exists in the document store at the
//! recorded revision) or *new* (created by the running transaction and not yet
//! persisted). Dead objects are evicted outright; a later access reloads them.

use std::collections::HashMap;

use tracing::trace;

use crate::codec::Resolver;
use crate::id::ObjectId;
use crate::shape::{Shape, ShapeRegistry};
use crate::tracker::TrackerError;
use crate::value::{Body, ObjectKind, Value};

/// A field or item together with its tracking state.
///
/// A *wrapped* slot routes writes through the change recorder. Slots created by
/// raw insertion start unwrapped and are discovered by the collect pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub(crate) value: Value,
    pub(crate) wrapped: bool,
}

impl Slot {
    pub(crate) fn tracked(value: Value) -> Self {
        Self {
            value,
            wrapped: true,
        }
    }

    pub(crate) fn raw(value: Value) -> Self {
        Self {
            value,
            wrapped: false,
        }
    }

    /// The stored value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Whether writes to this slot are recorded.
    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Fields {
    Map(Vec<(String, Slot)>),
    List(Vec<Slot>),
}

impl Fields {
    fn from_body(body: Body, wrap: bool) -> Self {
        let slot = |v| if wrap { Slot::tracked(v) } else { Slot::raw(v) };
        match body {
            Body::Map(fields) => Fields::Map(fields.into_iter().map(|(k, v)| (k, slot(v))).collect()),
            Body::List(items) => Fields::List(items.into_iter().map(slot).collect()),
        }
    }

    fn len(&self) -> usize {
        match self {
            Fields::Map(fields) => fields.len(),
            Fields::List(items) => items.len(),
        }
    }
}

/// One object of the shared graph as seen by this process.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub(crate) id: ObjectId,
    pub(crate) revision: u64,
    pub(crate) refcount: i64,
    /// Layout at the last commit or load.
    pub(crate) shape: Shape,
    pub(crate) fields: Fields,
    pub(crate) committed: bool,
    pub(crate) frozen: bool,
    /// Index of the newest changeset record for this object.
    pub(crate) last_change: Option<usize>,
    /// Persisted array length after the structural ops recorded so far.
    pub(crate) synced_len: usize,
    /// Set when the changes to this array can only be replayed as a rewrite.
    pub(crate) needs_reinit: bool,
}

impl TrackedObject {
    /// Object id.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Map or array.
    pub fn kind(&self) -> ObjectKind {
        match self.fields {
            Fields::Map(_) => ObjectKind::Object,
            Fields::List(_) => ObjectKind::Array,
        }
    }

    /// Revision this process last saw in the store.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Inbound reference count last seen in the store.
    pub fn refcount(&self) -> i64 {
        self.refcount
    }

    /// Layout at the last commit or load.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Returns true once the object exists in the store.
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Returns true if the object rejects new fields.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Number of fields or items.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the object has no fields or items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Field names, or indexes for arrays.
    pub fn keys(&self) -> Vec<String> {
        match &self.fields {
            Fields::Map(fields) => fields.iter().map(|(k, _)| k.clone()).collect(),
            Fields::List(items) => (0..items.len()).map(|i| i.to_string()).collect(),
        }
    }

    /// Slot addressed by a field name or a decimal index.
    pub fn slot(&self, prop: &str) -> Option<&Slot> {
        match &self.fields {
            Fields::Map(fields) => fields.iter().find(|(k, _)| k == prop).map(|(_, s)| s),
            Fields::List(items) => prop.parse::<usize>().ok().and_then(|i| items.get(i)),
        }
    }

    pub(crate) fn slot_mut(&mut self, prop: &str) -> Option<&mut Slot> {
        match &mut self.fields {
            Fields::Map(fields) => fields.iter_mut().find(|(k, _)| k == prop).map(|(_, s)| s),
            Fields::List(items) => prop.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
        }
    }

    pub(crate) fn items_mut(&mut self) -> Option<&mut Vec<Slot>> {
        match &mut self.fields {
            Fields::List(items) => Some(items),
            Fields::Map(_) => None,
        }
    }

    pub(crate) fn fields_mut(&mut self) -> Option<&mut Vec<(String, Slot)>> {
        match &mut self.fields {
            Fields::Map(fields) => Some(fields),
            Fields::List(_) => None,
        }
    }

    /// Value of a field without any bookkeeping. Missing fields read as
    /// [`Value::Undefined`].
    pub fn peek(&self, prop: &str) -> Value {
        self.slot(prop)
            .map(|s| s.value.clone())
            .unwrap_or(Value::Undefined)
    }

    /// Detached copy of the contents.
    pub fn body(&self) -> Body {
        match &self.fields {
            Fields::Map(fields) => Body::Map(
                fields
                    .iter()
                    .map(|(k, s)| (k.clone(), s.value.clone()))
                    .collect(),
            ),
            Fields::List(items) => Body::List(items.iter().map(|s| s.value.clone()).collect()),
        }
    }

    /// Names of slots that are not wrapped.
    pub(crate) fn unwrapped(&self) -> Vec<(String, Value)> {
        match &self.fields {
            Fields::Map(fields) => fields
                .iter()
                .filter(|(_, s)| !s.wrapped)
                .map(|(k, s)| (k.clone(), s.value.clone()))
                .collect(),
            Fields::List(items) => items
                .iter()
                .enumerate()
                .filter(|(_, s)| !s.wrapped)
                .map(|(i, s)| (i.to_string(), s.value.clone()))
                .collect(),
        }
    }

    pub(crate) fn wrap_all(&mut self) {
        match &mut self.fields {
            Fields::Map(fields) => fields.iter_mut().for_each(|(_, s)| s.wrapped = true),
            Fields::List(items) => items.iter_mut().for_each(|s| s.wrapped = true),
        }
    }

    /// Re-derive which array slots are wrapped by matching values.
    ///
    /// After a bulk reordering the position of a wrapped slot says nothing, so
    /// each wrapped value in `pool` marks the first unclaimed slot holding an
    /// equal value.
    pub(crate) fn rewrap_by_value(&mut self, mut pool: Vec<Value>) {
        if let Fields::List(items) = &mut self.fields {
            for slot in items.iter_mut() {
                match pool.iter().position(|v| *v == slot.value) {
                    Some(pos) => {
                        pool.swap_remove(pos);
                        slot.wrapped = true;
                    }
                    None => slot.wrapped = false,
                }
            }
        }
    }

    pub(crate) fn wrapped_values(&self) -> Vec<Value> {
        match &self.fields {
            Fields::Map(fields) => fields
                .iter()
                .filter(|(_, s)| s.wrapped)
                .map(|(_, s)| s.value.clone())
                .collect(),
            Fields::List(items) => items
                .iter()
                .filter(|s| s.wrapped)
                .map(|s| s.value.clone())
                .collect(),
        }
    }
}

/// Process-local object cache.
#[derive(Debug, Default)]
pub struct Heap {
    objects: HashMap<ObjectId, TrackedObject>,
    shapes: ShapeRegistry,
    evictions: u64,
}

impl Heap {
    /// Empty heap with its own shape registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty heap that interns shapes in `shapes`.
    pub fn with_registry(shapes: ShapeRegistry) -> Self {
        Self {
            objects: HashMap::new(),
            shapes,
            evictions: 0,
        }
    }

    /// Look up a cached object.
    pub fn get(&self, id: &ObjectId) -> Option<&TrackedObject> {
        self.objects.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &ObjectId) -> Option<&mut TrackedObject> {
        self.objects.get_mut(id)
    }

    /// Returns true if `id` is cached.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Ids of all cached objects.
    pub fn ids(&self) -> impl Iterator<Item = &ObjectId> {
        self.objects.keys()
    }

    /// Total number of evictions since the heap was created.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Interned shapes.
    pub fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    /// Install or replace an object with contents read from the store.
    ///
    /// Any local tracking state of a previous copy is discarded and every slot
    /// is wrapped.
    pub fn load(&mut self, id: ObjectId, revision: u64, refcount: i64, body: Body) {
        let shape = self.shape_of(&body);
        let synced_len = body_len(&body);
        trace!(%id, revision, refcount, "Loading object into heap");
        self.objects.insert(
            id,
            TrackedObject {
                id,
                revision,
                refcount,
                shape,
                fields: Fields::from_body(body, true),
                committed: true,
                frozen: false,
                last_change: None,
                synced_len,
                needs_reinit: false,
            },
        );
    }

    /// Install an object created by the running transaction.
    ///
    /// Its slots stay unwrapped and its shape is empty until it commits.
    pub(crate) fn insert_new(&mut self, id: ObjectId, body: Body) {
        let shape = match body.kind() {
            ObjectKind::Object => self.shapes.map_shape(std::iter::empty::<&str>()),
            ObjectKind::Array => self.shapes.list_shape(0),
        };
        self.objects.insert(
            id,
            TrackedObject {
                id,
                revision: 0,
                refcount: 0,
                shape,
                fields: Fields::from_body(body, false),
                committed: false,
                frozen: false,
                last_change: None,
                synced_len: 0,
                needs_reinit: false,
            },
        );
    }

    /// Drop an object from the cache.
    pub fn evict(&mut self, id: &ObjectId) -> Option<TrackedObject> {
        let removed = self.objects.remove(id);
        if removed.is_some() {
            self.evictions += 1;
            trace!(%id, "Evicted object");
        }
        removed
    }

    /// Record that `id` now exists in the store at `revision`.
    ///
    /// The current layout becomes the committed shape and all slots are wrapped.
    pub(crate) fn mark_committed(
        &mut self,
        id: &ObjectId,
        revision: u64,
        refcount: Option<i64>,
    ) -> Result<(), TrackerError> {
        let Some(obj) = self.objects.get(id) else {
            return Ok(());
        };
        let shape = match &obj.fields {
            Fields::Map(fields) => self.shapes.map_shape(fields.iter().map(|(k, _)| k.as_str())),
            Fields::List(items) => self.shapes.list_shape(items.len()),
        };
        if let Some(obj) = self.objects.get_mut(id) {
            obj.revision = revision;
            if let Some(refcount) = refcount {
                obj.refcount = refcount;
            }
            obj.shape = shape;
            obj.committed = true;
            obj.last_change = None;
            obj.synced_len = obj.fields.len();
            obj.needs_reinit = false;
            obj.retrack()?;
        }
        Ok(())
    }

    fn shape_of(&mut self, body: &Body) -> Shape {
        match body {
            Body::Map(fields) => self.shapes.map_shape(fields.iter().map(|(k, _)| k.as_str())),
            Body::List(items) => self.shapes.list_shape(items.len()),
        }
    }
}

fn body_len(body: &Body) -> usize {
    match body {
        Body::Map(fields) => fields.len(),
        Body::List(items) => items.len(),
    }
}

impl Resolver for Heap {
    fn resolve(&self, id: &ObjectId) -> Option<(u64, Body)> {
        self.objects.get(id).map(|obj| (obj.revision, obj.body()))
    }
}
