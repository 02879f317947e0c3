//! Tracked access to the heap from inside a request handler.
//!
//! A [`Txn`] is the only way a handler touches shared objects. Every accessor
//! adds the objects it reads to the readset, and writes to tracked slots are
//! recorded with their previous value. Raw operations (`push`, `pop`,
//! `remove`, and assignment to a new field) change the object without a
//! record; [`MtxBuilder::collect`] finds them once the handler returns.
//!
//! Reading a reference to an object that is not cached fails with
//! [`TrackerError::UnresolvedReference`]. The store loads the object and runs
//! the handler again, so handlers must not have side effects outside the heap.

pub mod errors;

use std::cmp::Ordering;

pub use errors::TrackerError;

use crate::constants::MAX_ARRAY_LEN;
use crate::heap::{Heap, Slot, TrackedObject};
use crate::id::ObjectId;
use crate::mtx::MtxBuilder;
use crate::value::{Body, Draft, ObjectKind, Value};

type Result<T> = std::result::Result<T, TrackerError>;

impl TrackedObject {
    /// Wrap every slot so later writes are recorded.
    ///
    /// Returns the number of slots that were not wrapped before.
    pub fn retrack(&mut self) -> Result<usize> {
        let pending = self.unwrapped();
        if self.frozen
            && let Some((prop, _)) = pending.first()
        {
            return Err(TrackerError::FieldNotTrackable {
                owner: self.id,
                prop: prop.clone(),
            });
        }
        self.wrap_all();
        Ok(pending.len())
    }
}

/// Handler view of the heap for one attempt.
pub struct Txn<'a> {
    heap: &'a mut Heap,
    builder: &'a mut MtxBuilder,
}

fn not_loaded(id: ObjectId) -> TrackerError {
    TrackerError::UnresolvedReference {
        owner: id,
        prop: String::new(),
        missing: id,
    }
}

fn expect_kind(obj: &TrackedObject, expected: ObjectKind) -> Result<()> {
    let found = obj.kind();
    if found != expected {
        return Err(TrackerError::KindMismatch {
            id: obj.id(),
            expected,
            found,
        });
    }
    Ok(())
}

fn writable(obj: &TrackedObject) -> Result<()> {
    if obj.is_frozen() {
        return Err(TrackerError::Frozen { id: obj.id() });
    }
    Ok(())
}

impl<'a> Txn<'a> {
    /// View over `heap` recording into `builder`.
    pub fn new(heap: &'a mut Heap, builder: &'a mut MtxBuilder) -> Self {
        Self { heap, builder }
    }

    /// Id of the root object.
    pub fn root(&self) -> ObjectId {
        ObjectId::ROOT
    }

    /// Read access to the underlying heap without any bookkeeping.
    pub fn heap(&self) -> &Heap {
        self.heap
    }

    fn read(&mut self, id: ObjectId) -> Result<&TrackedObject> {
        let obj = self.heap.get(&id).ok_or_else(|| not_loaded(id))?;
        self.builder.mark_read(obj);
        Ok(obj)
    }

    fn read_mut(&mut self, id: ObjectId) -> Result<&mut TrackedObject> {
        let obj = self.heap.get_mut(&id).ok_or_else(|| not_loaded(id))?;
        self.builder.mark_read(obj);
        Ok(obj)
    }

    /// Map or array.
    pub fn kind(&mut self, id: ObjectId) -> Result<ObjectKind> {
        Ok(self.read(id)?.kind())
    }

    /// Read a field, or an item by decimal index. Missing fields are
    /// [`Value::Undefined`].
    pub fn get(&mut self, id: ObjectId, prop: &str) -> Result<Value> {
        let value = self.read(id)?.peek(prop);
        if let Value::Ref(target) = &value
            && self.builder.is_recording()
        {
            match self.heap.get(target) {
                Some(child) => self.builder.mark_read(child),
                None => {
                    return Err(TrackerError::UnresolvedReference {
                        owner: id,
                        prop: prop.to_string(),
                        missing: *target,
                    });
                }
            }
        }
        Ok(value)
    }

    /// Read an array item.
    pub fn get_at(&mut self, id: ObjectId, index: usize) -> Result<Value> {
        self.get(id, &index.to_string())
    }

    /// Follow `path` from the root through references.
    ///
    /// Stops with [`Value::Undefined`] when an intermediate value is not a
    /// reference.
    pub fn get_path(&mut self, path: &[&str]) -> Result<Value> {
        let mut current = ObjectId::ROOT;
        let mut value = Value::Ref(current);
        for prop in path {
            let Value::Ref(id) = value else {
                return Ok(Value::Undefined);
            };
            current = id;
            value = self.get(current, prop)?;
        }
        Ok(value)
    }

    /// Returns true if the field or index exists.
    pub fn contains(&mut self, id: ObjectId, prop: &str) -> Result<bool> {
        Ok(self.read(id)?.slot(prop).is_some())
    }

    /// Field names, or indexes of an array.
    pub fn keys(&mut self, id: ObjectId) -> Result<Vec<String>> {
        Ok(self.read(id)?.keys())
    }

    /// Number of fields or items.
    pub fn len(&mut self, id: ObjectId) -> Result<usize> {
        Ok(self.read(id)?.len())
    }

    /// Assign a field, or an array item by decimal index.
    ///
    /// Maps and arrays inside `value` become new objects. Assigning to a
    /// tracked slot is recorded; creating a field is picked up by collect.
    pub fn set(&mut self, id: ObjectId, prop: &str, value: impl Into<Draft>) -> Result<()> {
        let value = self.materialize(value.into(), id, prop)?;
        let obj = self.heap.get_mut(&id).ok_or_else(|| not_loaded(id))?;
        self.builder.mark_read(obj);
        writable(obj)?;

        if obj.kind() == ObjectKind::Array {
            let index = prop
                .parse::<usize>()
                .ok()
                .filter(|index| *index < MAX_ARRAY_LEN)
                .ok_or_else(|| TrackerError::InvalidIndex {
                    id,
                    prop: prop.to_string(),
                })?;
            let len = obj.len();
            if index >= len {
                if let Some(items) = obj.items_mut() {
                    items.resize(index, Slot::raw(Value::Undefined));
                    items.push(Slot::raw(value));
                }
                return Ok(());
            }
        }

        match obj.slot_mut(prop) {
            Some(slot) if slot.wrapped => {
                let previous = std::mem::replace(&mut slot.value, value.clone());
                self.builder.add_write(obj, prop, value, Some(previous));
            }
            Some(slot) => slot.value = value,
            None => {
                if let Some(fields) = obj.fields_mut() {
                    fields.push((prop.to_string(), Slot::raw(value)));
                }
            }
        }
        Ok(())
    }

    /// Assign an array item.
    pub fn set_at(&mut self, id: ObjectId, index: usize, value: impl Into<Draft>) -> Result<()> {
        self.set(id, &index.to_string(), value)
    }

    /// Delete a map field and return its value.
    pub fn remove(&mut self, id: ObjectId, prop: &str) -> Result<Value> {
        let obj = self.read_mut(id)?;
        expect_kind(obj, ObjectKind::Object)?;
        writable(obj)?;
        let Some(fields) = obj.fields_mut() else {
            return Ok(Value::Undefined);
        };
        Ok(match fields.iter().position(|(k, _)| k == prop) {
            Some(pos) => fields.remove(pos).1.value,
            None => Value::Undefined,
        })
    }

    /// Append to an array and return the new length.
    pub fn push(&mut self, id: ObjectId, value: impl Into<Draft>) -> Result<usize> {
        let value = self.materialize(value.into(), id, "")?;
        let obj = self.read_mut(id)?;
        expect_kind(obj, ObjectKind::Array)?;
        writable(obj)?;
        let items = obj.items_mut().ok_or_else(|| not_loaded(id))?;
        items.push(Slot::raw(value));
        Ok(items.len())
    }

    /// Remove and return the last item.
    pub fn pop(&mut self, id: ObjectId) -> Result<Value> {
        let obj = self.read_mut(id)?;
        expect_kind(obj, ObjectKind::Array)?;
        writable(obj)?;
        Ok(obj
            .items_mut()
            .and_then(|items| items.pop())
            .map(|slot| slot.value)
            .unwrap_or(Value::Undefined))
    }

    /// Remove and return the first item.
    pub fn shift(&mut self, id: ObjectId) -> Result<Value> {
        let removed = self.splice(id, 0, 1, Vec::new())?;
        Ok(removed.into_iter().next().unwrap_or(Value::Undefined))
    }

    /// Insert items at the front and return the new length.
    pub fn unshift(&mut self, id: ObjectId, values: Vec<Draft>) -> Result<usize> {
        self.splice(id, 0, 0, values)?;
        self.len(id)
    }

    /// Remove `delete_count` items at `at`, insert `items` there, and return
    /// the removed items.
    ///
    /// Removal at either end and insertion anywhere are recorded as array
    /// ops. Removal from the middle, or any splice of an array that has
    /// untracked changes, makes the whole array be rewritten on commit.
    pub fn splice(
        &mut self,
        id: ObjectId,
        at: usize,
        delete_count: usize,
        items: Vec<Draft>,
    ) -> Result<Vec<Value>> {
        let values = items
            .into_iter()
            .map(|d| self.materialize(d, id, ""))
            .collect::<Result<Vec<_>>>()?;

        let obj = self.heap.get_mut(&id).ok_or_else(|| not_loaded(id))?;
        self.builder.mark_read(obj);
        expect_kind(obj, ObjectKind::Array)?;
        writable(obj)?;

        let len = obj.len();
        let at = at.min(len);
        let count = delete_count.min(len - at);
        let clean = obj.synced_len == len && obj.unwrapped().is_empty();
        let mut pool = obj.wrapped_values();

        self.builder.suspend();
        let removed: Vec<Value> = match obj.items_mut() {
            Some(slots) => {
                let removed: Vec<Value> = slots.drain(at..at + count).map(|s| s.value).collect();
                let tail = slots.split_off(at);
                slots.extend(values.iter().cloned().map(Slot::raw));
                slots.extend(tail);
                removed
            }
            None => Vec::new(),
        };
        self.builder.resume();

        for value in &removed {
            if let Some(pos) = pool.iter().position(|w| w == value) {
                pool.swap_remove(pos);
            }
        }
        pool.extend(values.iter().cloned());
        obj.rewrap_by_value(pool);

        let at_edge = at == 0 || at + count == len;
        if !clean || (count > 0 && !at_edge) {
            obj.needs_reinit = true;
        }
        if count > 0 {
            obj.synced_len = obj.synced_len.saturating_sub(count);
            self.builder.add_shift(obj, at, len, removed.clone());
        }
        if !values.is_empty() {
            obj.synced_len += values.len();
            self.builder.add_unshift(obj, at, values);
        }
        Ok(removed)
    }

    /// Reverse an array in place.
    pub fn reverse(&mut self, id: ObjectId) -> Result<()> {
        self.reorder(id, |items| items.reverse())?;
        if let Some(obj) = self.heap.get_mut(&id) {
            self.builder.add_reverse(obj);
        }
        Ok(())
    }

    /// Sort an array in place with `compare`.
    pub fn sort_by<F>(&mut self, id: ObjectId, mut compare: F) -> Result<()>
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        self.reorder(id, |items| items.sort_by(|a, b| compare(&a.value, &b.value)))?;
        if let Some(obj) = self.heap.get_mut(&id) {
            self.builder.add_sort(obj);
        }
        Ok(())
    }

    /// Sort an array by the encoded form of its items.
    pub fn sort(&mut self, id: ObjectId) -> Result<()> {
        self.sort_by(id, |a, b| a.to_string().cmp(&b.to_string()))
    }

    fn reorder(&mut self, id: ObjectId, apply: impl FnOnce(&mut Vec<Slot>)) -> Result<()> {
        let obj = self.heap.get_mut(&id).ok_or_else(|| not_loaded(id))?;
        self.builder.mark_read(obj);
        expect_kind(obj, ObjectKind::Array)?;
        writable(obj)?;

        let pool = obj.wrapped_values();
        self.builder.suspend();
        if let Some(items) = obj.items_mut() {
            apply(items);
        }
        self.builder.resume();
        obj.rewrap_by_value(pool);
        Ok(())
    }

    /// Create a detached object from a map or list draft and return its id.
    pub fn create(&mut self, draft: impl Into<Draft>) -> Result<ObjectId> {
        match draft.into() {
            Draft::Value(_) => Err(TrackerError::NotAnObject),
            draft => match self.materialize(draft, ObjectId::ROOT, "")? {
                Value::Ref(id) => Ok(id),
                _ => Err(TrackerError::NotAnObject),
            },
        }
    }

    /// Forbid further writes to an object.
    pub fn freeze(&mut self, id: ObjectId) -> Result<()> {
        self.read_mut(id)?.frozen = true;
        Ok(())
    }

    /// Returns true if the object is frozen.
    pub fn is_frozen(&mut self, id: ObjectId) -> Result<bool> {
        Ok(self.read(id)?.is_frozen())
    }

    /// Turn a draft into a value, installing new objects children first.
    fn materialize(&mut self, draft: Draft, owner: ObjectId, prop: &str) -> Result<Value> {
        match draft {
            // A linked object is a dependency: if it is collected elsewhere
            // before the commit, validation reports a conflict.
            Draft::Value(Value::Ref(target)) => match self.heap.get(&target) {
                Some(obj) => {
                    self.builder.mark_read(obj);
                    Ok(Value::Ref(target))
                }
                None => Err(TrackerError::UnresolvedReference {
                    owner,
                    prop: prop.to_string(),
                    missing: target,
                }),
            },
            Draft::Value(Value::Date(date)) => Ok(Value::date(date)),
            Draft::Value(value) => Ok(value),
            Draft::Map(fields) => {
                let mut body = Vec::with_capacity(fields.len());
                for (name, child) in fields {
                    let value = self.materialize(child, owner, prop)?;
                    body.push((name, value));
                }
                Ok(Value::Ref(self.install(Body::Map(body))))
            }
            Draft::List(items) => {
                let mut body = Vec::with_capacity(items.len());
                for child in items {
                    body.push(self.materialize(child, owner, prop)?);
                }
                Ok(Value::Ref(self.install(Body::List(body))))
            }
        }
    }

    fn install(&mut self, body: Body) -> ObjectId {
        let id = self.builder.next_id();
        self.heap.insert_new(id, body);
        self.builder.register_new(id);
        id
    }
}
