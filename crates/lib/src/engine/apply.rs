//! Application of a validated mtx to the document store.
//!
//! Runs with the commit lock held. Linked objects are checked to exist
//! before anything is written. The newset is inserted first, then the
//! changeset is applied op by op while reference count deltas accumulate per
//! object. A final pass bumps the revision of every touched object once,
//! applies the deltas, and removes objects nobody references any more.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde_json::Value as Json;
use tracing::{debug, trace, warn};

use super::CommitReceipt;
use super::document::{ObjectDoc, cell_references};
use super::errors::EngineError;
use crate::Result;
use crate::backend::{Document, DocumentStore, FieldPath, FindAndModify, Filter, Update};
use crate::codec;
use crate::constants::{DATA, REF, REV, TYPE};
use crate::id::ObjectId;
use crate::mtx::{Mtx, MtxError, Op};
use crate::value::{Body, ObjectKind, Value};

pub(super) struct Apply<'s> {
    store: &'s dyn DocumentStore,
    deltas: BTreeMap<ObjectId, i64>,
    touched: BTreeSet<ObjectId>,
    rewrites: BTreeMap<ObjectId, Body>,
    kinds: HashMap<ObjectId, ObjectKind>,
    created: HashSet<ObjectId>,
    doomed: Vec<ObjectId>,
    receipt: CommitReceipt,
}

fn index(owner: ObjectId, prop: &str) -> Result<usize> {
    prop.parse::<usize>().map_err(|_| {
        MtxError::InvalidProperty {
            owner,
            prop: prop.to_string(),
        }
        .into()
    })
}

fn malformed(id: ObjectId, reason: impl Into<String>) -> crate::Error {
    EngineError::MalformedDocument {
        id: id.to_hex(),
        reason: reason.into(),
    }
    .into()
}

impl<'s> Apply<'s> {
    pub(super) fn new(store: &'s dyn DocumentStore) -> Self {
        Self {
            store,
            deltas: BTreeMap::new(),
            touched: BTreeSet::new(),
            rewrites: BTreeMap::new(),
            kinds: HashMap::new(),
            created: HashSet::new(),
            doomed: Vec::new(),
            receipt: CommitReceipt::default(),
        }
    }

    pub(super) async fn run(mut self, mtx: &Mtx) -> Result<CommitReceipt> {
        self.check_targets(mtx).await?;
        self.insert_newset(mtx).await?;
        for op in mtx.ops() {
            self.apply_op(op).await?;
        }
        self.settle().await?;
        self.collect_garbage().await?;
        debug!(
            written = self.receipt.revisions.len(),
            removed = self.receipt.removed.len(),
            "Applied mtx"
        );
        Ok(self.receipt)
    }

    /// Every object the mtx links to must exist or be created by it.
    async fn check_targets(&self, mtx: &Mtx) -> Result<()> {
        let created = mtx.new_ids();
        let mut targets = BTreeSet::new();
        for op in mtx.ops() {
            match op {
                Op::Write { value, .. } => targets.extend(value.as_ref_id()),
                Op::Unshift { values, .. } => {
                    targets.extend(values.iter().filter_map(Value::as_ref_id));
                }
                Op::Reinit { body, .. } => targets.extend(body.references()),
                _ => {}
            }
        }
        for entry in &mtx.newset {
            targets.extend(entry.body.references());
        }
        for id in targets.into_iter().filter(|id| !created.contains(id)) {
            if self.store.count(&Filter::by_id(id)).await? == 0 {
                return Err(EngineError::MissingDocument { id: id.to_hex() }.into());
            }
        }
        Ok(())
    }

    fn adjust(&mut self, id: ObjectId, by: i64) {
        *self.deltas.entry(id).or_default() += by;
    }

    fn adjust_value(&mut self, value: &Value, by: i64) {
        if let Value::Ref(id) = value {
            self.adjust(*id, by);
        }
    }

    fn adjust_cell(&mut self, cell: &Json, by: i64) {
        if let Some(id) = codec::cell_reference(cell) {
            self.adjust(id, by);
        }
    }

    async fn fetch(&self, id: ObjectId, projection: &[FieldPath]) -> Result<Document> {
        self.store
            .find_one(&Filter::by_id(id), Some(projection))
            .await?
            .ok_or_else(|| {
                EngineError::MissingDocument { id: id.to_hex() }.into()
            })
    }

    async fn kind(&mut self, id: ObjectId) -> Result<ObjectKind> {
        if let Some(kind) = self.kinds.get(&id) {
            return Ok(*kind);
        }
        let doc = self.fetch(id, &[FieldPath::field(TYPE)]).await?;
        let kind: ObjectKind = doc
            .get(TYPE)
            .cloned()
            .and_then(|t| serde_json::from_value(t).ok())
            .ok_or_else(|| malformed(id, "missing or unknown _type"))?;
        self.kinds.insert(id, kind);
        Ok(kind)
    }

    /// New objects start at revision 0 with a base count of 1 that is taken
    /// back immediately, so one that ends up unreferenced is collected.
    async fn insert_newset(&mut self, mtx: &Mtx) -> Result<()> {
        for entry in &mtx.newset {
            let doc = ObjectDoc::from_body(entry.id, 0, 1, &entry.body);
            self.store.insert(doc.to_document()?).await?;
            trace!(id = %entry.id, kind = %doc.kind, "Inserted new object");
            self.kinds.insert(entry.id, doc.kind);
            self.created.insert(entry.id);
            self.adjust(entry.id, -1);
            for child in entry.body.references() {
                self.adjust(child, 1);
            }
        }
        Ok(())
    }

    async fn apply_op(&mut self, op: &Op) -> Result<()> {
        let owner = op.owner();
        trace!(owner = %owner, op = op.kind(), "Applying op");
        match op {
            Op::Write { prop, value, .. } => {
                if self.kind(owner).await? == ObjectKind::Array {
                    index(owner, prop)?;
                }
                let path = FieldPath::new([DATA, prop.as_str()]);
                let doc = self.fetch(owner, std::slice::from_ref(&path)).await?;
                if let Some(old) = path.lookup(&doc) {
                    self.adjust_cell(old, -1);
                }
                self.adjust_value(value, 1);
                self.store
                    .update(
                        &Filter::by_id(owner),
                        &Update::new().set(path, codec::to_cell(value)),
                        false,
                    )
                    .await?;
            }
            Op::Delete { prop, .. } => {
                let kind = self.kind(owner).await?;
                let path = FieldPath::new([DATA, prop.as_str()]);
                let doc = self.fetch(owner, &[FieldPath::field(DATA)]).await?;
                let update = match kind {
                    ObjectKind::Object => Update::new().unset(path.clone()),
                    ObjectKind::Array => {
                        let at = index(owner, prop)?;
                        let len = doc
                            .get(DATA)
                            .and_then(Json::as_array)
                            .map_or(0, Vec::len);
                        if at + 1 != len {
                            return Err(MtxError::ShiftNotAtEdge { owner, at, count: 1 }.into());
                        }
                        Update::new().pop_last(DATA)
                    }
                };
                if let Some(old) = path.lookup(&doc) {
                    self.adjust_cell(old, -1);
                }
                self.store.update(&Filter::by_id(owner), &update, false).await?;
            }
            Op::Shift { at, count, .. } => {
                let (at, count) = (*at, *count);
                let doc = self.fetch(owner, &[FieldPath::field(DATA)]).await?;
                let items = doc
                    .get(DATA)
                    .and_then(Json::as_array)
                    .ok_or_else(|| malformed(owner, "_data is not an array"))?;
                let len = items.len();
                if at + count > len || (at != 0 && at + count != len) {
                    return Err(MtxError::ShiftNotAtEdge { owner, at, count }.into());
                }
                for cell in &items[at..at + count] {
                    self.adjust_cell(cell, -1);
                }
                let mut update = Update::new();
                for _ in 0..count {
                    update = if at == 0 {
                        update.pop_first(DATA)
                    } else {
                        update.pop_last(DATA)
                    };
                }
                self.store.update(&Filter::by_id(owner), &update, false).await?;
            }
            Op::Unshift { at, values, .. } => {
                for value in values {
                    self.adjust_value(value, 1);
                }
                let cells = values.iter().map(codec::to_cell).collect();
                self.store
                    .update(
                        &Filter::by_id(owner),
                        &Update::new().insert_at(DATA, *at, cells),
                        false,
                    )
                    .await?;
            }
            Op::Reverse { .. } | Op::Sort { .. } => {
                return Err(MtxError::UnexpectedOp {
                    kind: op.kind(),
                    owner,
                }
                .into());
            }
            Op::Reinit { body, .. } => {
                let old = match self.rewrites.get(&owner) {
                    Some(pending) => pending.references(),
                    None => {
                        let doc = self.fetch(owner, &[FieldPath::field(DATA)]).await?;
                        doc.get(DATA).map(cell_references).unwrap_or_default()
                    }
                };
                for id in old {
                    self.adjust(id, -1);
                }
                for id in body.references() {
                    self.adjust(id, 1);
                }
                self.kinds.insert(owner, body.kind());
                self.rewrites.insert(owner, body.clone());
            }
        }
        self.touched.insert(owner);
        Ok(())
    }

    fn record(&mut self, id: ObjectId, rev: u64, refs: i64) {
        self.receipt.revisions.insert(id, rev);
        self.receipt.refs.insert(id, refs);
        if refs <= 0 && !id.is_root() {
            self.doomed.push(id);
        }
    }

    /// One revision bump per touched object and one count update per
    /// object whose references changed.
    async fn settle(&mut self) -> Result<()> {
        let ids: BTreeSet<ObjectId> = self
            .deltas
            .keys()
            .chain(self.touched.iter())
            .copied()
            .collect();

        for id in ids {
            let delta = self.deltas.get(&id).copied().unwrap_or(0);
            let touched = self.touched.contains(&id);

            if let Some(body) = self.rewrites.remove(&id) {
                let doc = self
                    .fetch(id, &[FieldPath::field(REV), FieldPath::field(REF)])
                    .await?;
                let rev = doc.get(REV).and_then(Json::as_u64).unwrap_or(0) + 1;
                let refs = doc.get(REF).and_then(Json::as_i64).unwrap_or(0) + delta;
                let next = ObjectDoc::from_body(id, rev, refs, &body);
                self.store
                    .update(&Filter::by_id(id), &Update::replace(next.to_document()?), false)
                    .await?;
                trace!(id = %id, rev, refs, "Rewrote object");
                self.record(id, rev, refs);
                continue;
            }

            if !touched && delta == 0 {
                if self.created.contains(&id) {
                    self.record(id, 0, 1);
                }
                continue;
            }

            let mut update = Update::new();
            if touched {
                update = update.inc(REV, 1);
            }
            if delta != 0 {
                update = update.inc(REF, delta);
            }
            let updated = self
                .store
                .find_and_modify(&Filter::by_id(id), &update, FindAndModify::returning_new())
                .await?;
            let Some(doc) = updated else {
                if delta > 0 {
                    return Err(EngineError::MissingDocument { id: id.to_hex() }.into());
                }
                warn!(id = %id, delta, "Reference update for an object with no document");
                continue;
            };
            let rev = doc.get(REV).and_then(Json::as_u64).unwrap_or(0);
            let refs = doc.get(REF).and_then(Json::as_i64).unwrap_or(0);
            trace!(id = %id, rev, refs, "Updated ref/rev");
            self.record(id, rev, refs);
        }
        Ok(())
    }

    /// Remove unreferenced objects, then release everything they linked to.
    /// Cycles are never collected.
    async fn collect_garbage(&mut self) -> Result<()> {
        let mut stack = std::mem::take(&mut self.doomed);
        while let Some(id) = stack.pop() {
            let Some(doc) = self.store.find_one(&Filter::by_id(id), None).await? else {
                continue;
            };
            let obj = ObjectDoc::from_document(doc)?;
            if obj.refs > 0 {
                continue;
            }
            let filter = Filter::by_id(id).eq(REF, obj.refs);
            if self.store.remove(&filter).await? == 0 {
                continue;
            }
            debug!(id = %id, "Collected unreferenced object");
            self.receipt.revisions.remove(&id);
            self.receipt.refs.remove(&id);
            self.receipt.removed.push(id);

            for child in obj.references() {
                let released = self
                    .store
                    .find_and_modify(
                        &Filter::by_id(child),
                        &Update::new().inc(REF, -1),
                        FindAndModify::returning_new(),
                    )
                    .await?;
                let Some(doc) = released else {
                    continue;
                };
                let refs = doc.get(REF).and_then(Json::as_i64).unwrap_or(0);
                self.receipt.refs.insert(child, refs);
                if refs <= 0 && !child.is_root() {
                    stack.push(child);
                }
            }
        }
        Ok(())
    }
}
