//! Commit engine.
//!
//! The engine turns a finished [`Mtx`] into document store updates:
//!
//! 1. take the distributed mutex;
//! 2. check every readset entry still has the revision it was read at;
//! 3. on a mismatch, release the lock and report the stale objects together
//!    with their current documents, without writing anything;
//! 4. otherwise insert the newset, apply the changeset, maintain revisions
//!    and reference counts, and remove objects that dropped to zero
//!    references;
//! 5. release the mutex.
//!
//! A failure from the document store part way through step 4 leaves the
//! writes made so far in place. The lock is still released.

mod apply;
pub mod document;
pub mod errors;
pub mod lock;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use document::ObjectDoc;
pub use errors::EngineError;
pub use lock::{DistributedMutex, LockState, LockToken};

use crate::Result;
use crate::backend::{DocumentStore, Filter};
use crate::constants::REV;
use crate::id::ObjectId;
use crate::mtx::{Mtx, MtxError};
use crate::store::{StoreConfig, Upstream};
use crate::value::Body;

/// What a successful commit did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    /// Revision of every written or created object after the commit.
    pub revisions: BTreeMap<ObjectId, u64>,
    /// Reference count of every object whose count changed.
    pub refs: BTreeMap<ObjectId, i64>,
    /// Objects removed for having no references left.
    pub removed: Vec<ObjectId>,
}

/// Result of a commit attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(CommitReceipt),
    /// The readset was stale. Nothing was written. `updates` holds the
    /// current document of every stale object that still exists.
    Conflict {
        ids: Vec<ObjectId>,
        updates: Vec<ObjectDoc>,
    },
}

impl CommitOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, CommitOutcome::Conflict { .. })
    }
}

/// Commits transactions against a [`DocumentStore`].
#[derive(Clone)]
pub struct Engine {
    store: Arc<dyn DocumentStore>,
    mutex: DistributedMutex,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("store", &"<DocumentStore>")
            .field("mutex", &self.mutex)
            .finish()
    }
}

impl Engine {
    pub fn new(store: Arc<dyn DocumentStore>, config: &StoreConfig) -> Self {
        let mutex = DistributedMutex::new(Arc::clone(&store), config);
        Self { store, mutex }
    }

    /// The backing document store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn mutex(&self) -> &DistributedMutex {
        &self.mutex
    }

    /// Create the root object and the lock document if they do not exist.
    pub async fn prepare(&self) -> Result<()> {
        let root = ObjectDoc::from_body(ObjectId::ROOT, 0, 1, &Body::Map(Vec::new()));
        match self.store.insert(root.to_document()?).await {
            Ok(()) => info!("Created root object"),
            Err(crate::Error::Backend(e)) if e.is_duplicate_key() => {}
            Err(e) => return Err(e),
        }
        self.mutex.ensure().await
    }

    /// Current document of an object.
    pub async fn load(&self, id: ObjectId) -> Result<Option<ObjectDoc>> {
        match self.store.find_one(&Filter::by_id(id), None).await? {
            Some(doc) => ObjectDoc::from_document(doc).map(Some),
            None => Ok(None),
        }
    }

    /// Ids whose stored revision differs from the one in `readset`.
    pub async fn validate(&self, readset: &BTreeMap<ObjectId, u64>) -> Result<Vec<ObjectId>> {
        let mut stale = Vec::new();
        for (id, rev) in readset {
            let filter = Filter::by_id(*id).eq(REV, *rev);
            if self.store.count(&filter).await? == 0 {
                stale.push(*id);
            }
        }
        Ok(stale)
    }

    /// Commit `mtx` under the distributed mutex.
    pub async fn commit(&self, mtx: &Mtx) -> Result<CommitOutcome> {
        if mtx.readset.is_empty() {
            return Err(MtxError::EmptyReadset.into());
        }
        mtx.check_newset()?;

        self.mutex
            .with_lock(|| async {
                let stale = self.validate(&mtx.readset).await?;
                if !stale.is_empty() {
                    debug!(count = stale.len(), "Readset is stale");
                    let mut updates = Vec::with_capacity(stale.len());
                    for id in &stale {
                        if let Some(doc) = self.load(*id).await? {
                            updates.push(doc);
                        }
                    }
                    return Ok(CommitOutcome::Conflict { ids: stale, updates });
                }
                debug!(reads = mtx.readset.len(), "Readset validated");
                let receipt = apply::Apply::new(self.store.as_ref()).run(mtx).await?;
                Ok(CommitOutcome::Committed(receipt))
            })
            .await
    }

    /// Objects reachable from `id`, including `id`, that have documents.
    pub async fn reachable(&self, id: ObjectId) -> Result<Vec<ObjectDoc>> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![id];
        let mut docs = Vec::new();
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            if let Some(doc) = self.load(next).await? {
                stack.extend(doc.references());
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}

#[async_trait]
impl Upstream for Engine {
    async fn prepare(&self) -> Result<()> {
        Engine::prepare(self).await
    }

    async fn fetch(&self, id: ObjectId) -> Result<Option<ObjectDoc>> {
        self.load(id).await
    }

    async fn commit(&self, mtx: &Mtx) -> Result<CommitOutcome> {
        Engine::commit(self, mtx).await
    }
}
