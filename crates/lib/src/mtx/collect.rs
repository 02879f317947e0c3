//! Discovery of untracked changes.
//!
//! Raw insertion and deletion bypass the recorder, so after a handler returns
//! every object in the readset is compared against its committed shape and
//! the differences become ops.

use std::collections::HashSet;

use tracing::debug;

use super::{MtxBuilder, NewObject, Op};
use crate::heap::{Heap, TrackedObject};
use crate::id::ObjectId;
use crate::tracker::TrackerError;
use crate::value::ObjectKind;

impl MtxBuilder {
    /// Turn untracked changes on every read object into ops and snapshot the
    /// newset.
    ///
    /// Maps emit a delete for each committed field that disappeared and a
    /// write for each unwrapped field. Arrays replay their structural ops
    /// against the committed length, then write unwrapped or appended items
    /// and delete trailing items from the end. An array that was sorted,
    /// reversed, or restructured around untracked items is rewritten whole.
    pub fn collect(&mut self, heap: &mut Heap) -> Result<(), TrackerError> {
        let ids: Vec<ObjectId> = self.mtx.readset.keys().copied().collect();
        for id in ids {
            let Some(obj) = heap.get_mut(&id) else {
                continue;
            };
            match obj.kind() {
                ObjectKind::Object => self.collect_map(obj)?,
                ObjectKind::Array => self.collect_array(obj)?,
            }
        }
        self.snapshot_newset(heap);
        Ok(())
    }

    fn collect_map(&mut self, obj: &mut TrackedObject) -> Result<(), TrackerError> {
        let current = obj.keys();
        let names: Vec<&str> = current.iter().map(String::as_str).collect();
        let diff = obj.shape().diff(&names);
        for name in diff.missing {
            self.add_delete(obj, name);
        }
        self.write_unwrapped(obj, |_| false)
    }

    fn collect_array(&mut self, obj: &mut TrackedObject) -> Result<(), TrackerError> {
        let chain = self.chain(obj);
        let reordered = chain.iter().any(|&i| {
            matches!(
                self.record(i).map(|r| &r.op),
                Some(Op::Sort { .. } | Op::Reverse { .. })
            )
        });

        if reordered || obj.needs_reinit {
            let untracked = obj.unwrapped().into_iter().next();
            if let (true, Some((prop, _))) = (obj.is_frozen(), untracked) {
                return Err(TrackerError::FieldNotTrackable {
                    owner: obj.id(),
                    prop,
                });
            }
            debug!(id = %obj.id(), ops = chain.len(), "Array changes fold into a rewrite");
            for index in chain {
                self.tombstone(index);
            }
            obj.last_change = None;
            let body = obj.body();
            self.add_reinit(obj, body);
            obj.wrap_all();
            return Ok(());
        }

        let mut expected = obj.shape().len();
        for index in chain {
            match self.record(index).map(|r| &r.op) {
                Some(Op::Shift { at, count, .. }) if *at < expected => {
                    expected -= (*count).min(expected - at);
                }
                Some(Op::Unshift { values, .. }) => expected += values.len(),
                _ => {}
            }
        }

        let current = obj.len();
        self.write_unwrapped(obj, |i| i >= expected)?;
        for i in (current..expected).rev() {
            self.add_delete(obj, i.to_string());
        }
        Ok(())
    }

    /// Record a write for every unwrapped slot, plus array items for which
    /// `force` holds, then wrap them.
    fn write_unwrapped(
        &mut self,
        obj: &mut TrackedObject,
        force: impl Fn(usize) -> bool,
    ) -> Result<(), TrackerError> {
        let pending: Vec<(String, crate::value::Value)> = match obj.kind() {
            ObjectKind::Object => obj.unwrapped(),
            ObjectKind::Array => obj
                .body()
                .values()
                .enumerate()
                .filter(|(i, _)| {
                    force(*i) || obj.slot(&i.to_string()).is_some_and(|s| !s.is_wrapped())
                })
                .map(|(i, v)| (i.to_string(), v.clone()))
                .collect(),
        };

        for (prop, value) in pending {
            if obj.is_frozen() {
                return Err(TrackerError::FieldNotTrackable {
                    owner: obj.id(),
                    prop,
                });
            }
            self.add_write(obj, prop.clone(), value, None);
            if let Some(slot) = obj.slot_mut(&prop) {
                slot.wrapped = true;
            }
        }
        Ok(())
    }

    /// Snapshot new objects, children before the objects that link to them.
    fn snapshot_newset(&mut self, heap: &Heap) {
        let pending: HashSet<ObjectId> = self.pending_new.iter().copied().collect();
        let mut visited = HashSet::new();
        let mut ordered = Vec::with_capacity(pending.len());
        for id in &self.pending_new {
            visit(heap, *id, &pending, &mut visited, &mut ordered);
        }
        self.mtx.newset = ordered
            .into_iter()
            .filter_map(|id| heap.get(&id).map(|obj| NewObject { id, body: obj.body() }))
            .collect();
    }
}

fn visit(
    heap: &Heap,
    id: ObjectId,
    pending: &HashSet<ObjectId>,
    visited: &mut HashSet<ObjectId>,
    ordered: &mut Vec<ObjectId>,
) {
    if !pending.contains(&id) || !visited.insert(id) {
        return;
    }
    if let Some(obj) = heap.get(&id) {
        for child in obj.body().references() {
            visit(heap, child, pending, visited, ordered);
        }
    }
    ordered.push(id);
}
