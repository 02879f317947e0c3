//! Mutation transactions.
//!
//! An [`Mtx`] is everything one handler run did to the shared heap:
//!
//! - the *readset*, `(id, revision)` for every committed object it depended on;
//! - the *newset*, snapshots of objects it created, children before parents;
//! - the *changeset*, an ordered op log. Each record points at the previous
//!   record for the same object, so per-object history can be walked without
//!   scanning the whole log. Superseded records become `None`.
//!
//! [`MtxBuilder`] accumulates an mtx while a handler runs. After the handler
//! returns, [`MtxBuilder::collect`] finds changes made without a tracked
//! accessor, and [`MtxBuilder::undo`] reverts the heap if the attempt is
//! abandoned.

mod collect;
pub mod errors;
mod undo;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

pub use errors::MtxError;

use crate::heap::{Heap, TrackedObject};
use crate::id::{IdGenerator, ObjectId};
use crate::value::{Body, Value};

/// One recorded change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Op {
    /// Assign a field or item. `previous` is the value before the write, when
    /// it was tracked.
    Write {
        owner: ObjectId,
        prop: String,
        value: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<Value>,
    },
    /// Remove a map field, or the last item of an array.
    Delete { owner: ObjectId, prop: String },
    /// Remove `count` items at `at` from an array that had `len` items.
    Shift {
        owner: ObjectId,
        at: usize,
        count: usize,
        len: usize,
        removed: Vec<Value>,
    },
    /// Insert `values` at `at`.
    Unshift {
        owner: ObjectId,
        at: usize,
        values: Vec<Value>,
    },
    /// Reverse an array in place.
    Reverse { owner: ObjectId },
    /// Sort an array in place.
    Sort { owner: ObjectId },
    /// Replace the whole contents.
    Reinit { owner: ObjectId, body: Body },
}

impl Op {
    /// Object the op applies to.
    pub fn owner(&self) -> ObjectId {
        match self {
            Op::Write { owner, .. }
            | Op::Delete { owner, .. }
            | Op::Shift { owner, .. }
            | Op::Unshift { owner, .. }
            | Op::Reverse { owner }
            | Op::Sort { owner }
            | Op::Reinit { owner, .. } => *owner,
        }
    }

    /// Short lowercase name.
    pub fn kind(&self) -> &'static str {
        match self {
            Op::Write { .. } => "write",
            Op::Delete { .. } => "delete",
            Op::Shift { .. } => "shift",
            Op::Unshift { .. } => "unshift",
            Op::Reverse { .. } => "reverse",
            Op::Sort { .. } => "sort",
            Op::Reinit { .. } => "reinit",
        }
    }

    /// Returns true for ops that move array items around.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Op::Shift { .. } | Op::Unshift { .. } | Op::Reverse { .. } | Op::Sort { .. }
        )
    }
}

/// A changeset entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpRecord {
    #[serde(flatten)]
    pub op: Op,
    /// Index of the previous record for the same owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_change: Option<usize>,
}

/// An object created by the transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewObject {
    pub id: ObjectId,
    pub body: Body,
}

/// A mutation transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mtx {
    pub readset: BTreeMap<ObjectId, u64>,
    pub newset: Vec<NewObject>,
    pub changeset: Vec<Option<OpRecord>>,
}

impl Mtx {
    /// Live ops in log order.
    pub fn ops(&self) -> impl Iterator<Item = &Op> {
        self.changeset.iter().flatten().map(|r| &r.op)
    }

    /// Returns true if the transaction writes nothing.
    pub fn is_read_only(&self) -> bool {
        self.newset.is_empty() && self.ops().next().is_none()
    }

    /// Owners of live ops.
    pub fn touched(&self) -> BTreeSet<ObjectId> {
        self.ops().map(Op::owner).collect()
    }

    /// Ids in the newset.
    pub fn new_ids(&self) -> HashSet<ObjectId> {
        self.newset.iter().map(|n| n.id).collect()
    }

    /// Check that every new object only links to new objects listed before it.
    pub fn check_newset(&self) -> Result<(), MtxError> {
        let all = self.new_ids();
        let mut created = HashSet::with_capacity(all.len());
        for entry in &self.newset {
            for target in entry.body.references() {
                if all.contains(&target) && !created.contains(&target) {
                    return Err(MtxError::ForwardReference {
                        owner: entry.id,
                        target,
                    });
                }
            }
            created.insert(entry.id);
        }
        Ok(())
    }
}

/// Accumulates an [`Mtx`] while a handler runs.
#[derive(Debug)]
pub struct MtxBuilder {
    mtx: Mtx,
    pending_new: Vec<ObjectId>,
    suspended: u32,
    ids: Arc<IdGenerator>,
}

impl MtxBuilder {
    /// Empty builder drawing new ids from `ids`.
    pub fn new(ids: Arc<IdGenerator>) -> Self {
        Self {
            mtx: Mtx::default(),
            pending_new: Vec::new(),
            suspended: 0,
            ids,
        }
    }

    /// The transaction so far.
    pub fn mtx(&self) -> &Mtx {
        &self.mtx
    }

    /// Objects created so far, in creation order.
    pub fn pending_new(&self) -> &[ObjectId] {
        &self.pending_new
    }

    /// Start a request: the root is always a dependency.
    pub fn begin(&mut self, heap: &Heap) -> Result<(), MtxError> {
        let root = heap.get(&ObjectId::ROOT).ok_or(MtxError::RootNotLoaded)?;
        self.mark_read(root);
        Ok(())
    }

    /// Whether accessors currently record.
    pub fn is_recording(&self) -> bool {
        self.suspended == 0
    }

    /// Stop recording while a structural op rearranges slots.
    pub(crate) fn suspend(&mut self) {
        self.suspended += 1;
    }

    pub(crate) fn resume(&mut self) {
        self.suspended = self.suspended.saturating_sub(1);
    }

    pub(crate) fn next_id(&self) -> ObjectId {
        self.ids.next_id()
    }

    /// Add a committed object to the readset at the revision it was loaded at.
    pub fn mark_read(&mut self, obj: &TrackedObject) {
        if self.is_recording() && obj.is_committed() {
            self.mtx.readset.entry(obj.id()).or_insert(obj.revision());
        }
    }

    pub(crate) fn register_new(&mut self, id: ObjectId) {
        self.pending_new.push(id);
    }

    fn push(&mut self, owner: &mut TrackedObject, op: Op) {
        // New objects travel whole in the newset.
        if !self.is_recording() || !owner.is_committed() {
            return;
        }
        trace!(owner = %owner.id(), op = op.kind(), "Recording op");
        let index = self.mtx.changeset.len();
        self.mtx.changeset.push(Some(OpRecord {
            op,
            last_change: owner.last_change,
        }));
        owner.last_change = Some(index);
    }

    /// Record a field write.
    pub fn add_write(
        &mut self,
        owner: &mut TrackedObject,
        prop: impl Into<String>,
        value: Value,
        previous: Option<Value>,
    ) {
        let op = Op::Write {
            owner: owner.id(),
            prop: prop.into(),
            value,
            previous,
        };
        self.push(owner, op);
    }

    /// Record a field removal.
    pub fn add_delete(&mut self, owner: &mut TrackedObject, prop: impl Into<String>) {
        let op = Op::Delete {
            owner: owner.id(),
            prop: prop.into(),
        };
        self.push(owner, op);
    }

    /// Record removal of `removed` at `at` from an array of `len` items.
    pub fn add_shift(&mut self, owner: &mut TrackedObject, at: usize, len: usize, removed: Vec<Value>) {
        let op = Op::Shift {
            owner: owner.id(),
            at,
            count: removed.len(),
            len,
            removed,
        };
        self.push(owner, op);
    }

    /// Record insertion of `values` at `at`.
    pub fn add_unshift(&mut self, owner: &mut TrackedObject, at: usize, values: Vec<Value>) {
        let op = Op::Unshift {
            owner: owner.id(),
            at,
            values,
        };
        self.push(owner, op);
    }

    /// Record an in-place reversal.
    pub fn add_reverse(&mut self, owner: &mut TrackedObject) {
        let op = Op::Reverse { owner: owner.id() };
        self.push(owner, op);
    }

    /// Record an in-place sort.
    pub fn add_sort(&mut self, owner: &mut TrackedObject) {
        let op = Op::Sort { owner: owner.id() };
        self.push(owner, op);
    }

    /// Record a full rewrite.
    pub fn add_reinit(&mut self, owner: &mut TrackedObject, body: Body) {
        let op = Op::Reinit {
            owner: owner.id(),
            body,
        };
        self.push(owner, op);
    }

    /// Ops recorded for `obj` since its last commit, oldest first.
    pub(crate) fn chain(&self, obj: &TrackedObject) -> Vec<usize> {
        let mut indexes = Vec::new();
        let mut next = obj.last_change;
        while let Some(index) = next {
            indexes.push(index);
            next = self
                .mtx
                .changeset
                .get(index)
                .and_then(|r| r.as_ref())
                .and_then(|r| r.last_change);
        }
        indexes.reverse();
        indexes
    }

    pub(crate) fn record(&self, index: usize) -> Option<&OpRecord> {
        self.mtx.changeset.get(index).and_then(|r| r.as_ref())
    }

    pub(crate) fn tombstone(&mut self, index: usize) {
        if let Some(slot) = self.mtx.changeset.get_mut(index) {
            *slot = None;
        }
    }

    /// Check the mtx is well formed and hand it out for commit.
    pub fn finish(&self) -> Result<&Mtx, MtxError> {
        if self.mtx.readset.is_empty() {
            return Err(MtxError::EmptyReadset);
        }
        self.mtx.check_newset()?;
        Ok(&self.mtx)
    }

    /// Accept the transaction: forget per-object op chains and start over.
    ///
    /// Calling it twice has no further effect.
    pub fn ok(&mut self, heap: &mut Heap) {
        for record in self.mtx.changeset.iter().flatten() {
            if let Some(obj) = heap.get_mut(&record.op.owner()) {
                obj.last_change = None;
            }
        }
        self.reset();
    }

    /// Discard everything recorded and return it.
    pub fn reset(&mut self) -> Mtx {
        self.pending_new.clear();
        self.suspended = 0;
        std::mem::take(&mut self.mtx)
    }
}
