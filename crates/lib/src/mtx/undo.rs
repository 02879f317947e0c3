//! Reverting an abandoned attempt.

use std::collections::BTreeSet;

use tracing::debug;

use super::{MtxBuilder, Op};
use crate::heap::{Heap, Slot};
use crate::id::ObjectId;

impl MtxBuilder {
    /// Revert the heap to its state before the attempt and reset the builder.
    ///
    /// Ops are walked newest first. Writes with a known previous value are
    /// restored in place and array shifts and unshifts are inverted. An object
    /// with any other op is evicted so the next access reloads it. Objects
    /// created by the attempt are evicted as well.
    ///
    /// Returns the ids of evicted committed objects.
    pub fn undo(&mut self, heap: &mut Heap) -> BTreeSet<ObjectId> {
        let mut dead = BTreeSet::new();
        let mut touched = BTreeSet::new();

        for record in self.mtx.changeset.iter().rev().flatten() {
            let owner = record.op.owner();
            touched.insert(owner);
            if dead.contains(&owner) {
                continue;
            }
            let Some(obj) = heap.get_mut(&owner) else {
                continue;
            };
            let restored = match &record.op {
                Op::Write {
                    prop,
                    previous: Some(previous),
                    ..
                } => match obj.slot_mut(prop) {
                    Some(slot) => {
                        *slot = Slot::tracked(previous.clone());
                        true
                    }
                    None => false,
                },
                Op::Shift { at, removed, .. } => match obj.items_mut() {
                    Some(items) if *at <= items.len() => {
                        let tail = items.split_off(*at);
                        items.extend(removed.iter().cloned().map(Slot::tracked));
                        items.extend(tail);
                        obj.synced_len += removed.len();
                        true
                    }
                    _ => false,
                },
                Op::Unshift { at, values, .. } => match obj.items_mut() {
                    Some(items) if at + values.len() <= items.len() => {
                        items.drain(*at..at + values.len());
                        obj.synced_len = obj.synced_len.saturating_sub(values.len());
                        true
                    }
                    _ => false,
                },
                Op::Reverse { .. } => match obj.items_mut() {
                    Some(items) => {
                        items.reverse();
                        true
                    }
                    None => false,
                },
                _ => false,
            };
            if !restored {
                dead.insert(owner);
            }
        }

        for id in &touched {
            if let Some(obj) = heap.get_mut(id) {
                obj.last_change = None;
                obj.needs_reinit = false;
            }
        }
        for id in &dead {
            heap.evict(id);
        }
        let created = self.pending_new.len();
        for id in &self.pending_new {
            heap.evict(id);
        }

        debug!(
            ops = self.mtx.changeset.len(),
            evicted = dead.len(),
            created,
            "Undid attempt"
        );
        self.reset();
        dead
    }
}
