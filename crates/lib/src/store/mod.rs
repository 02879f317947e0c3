//! Request processing.
//!
//! A [`Store`] owns a heap of cached objects and runs request handlers
//! against it one at a time, in arrival order. Each request goes through:
//!
//! - load the root if it is not cached;
//! - run the handler against a [`Txn`];
//! - collect untracked changes into the mtx;
//! - commit through the [`Upstream`], unless the handler only read;
//! - on a stale readset, undo, refresh the stale objects and run again;
//! - on a reference to an object that is not cached, undo, load it and run
//!   again. If it no longer exists the owner is reloaded instead, and a
//!   second miss on the same object fails the request.
//!
//! Any other handler error, and any commit failure, undoes the attempt and
//! is returned to the caller.
//!
//! ```
//! # use std::sync::Arc;
//! # use dsheap::{InMemoryStore, Store, StoreConfig, Value};
//! # #[tokio::main]
//! # async fn main() -> dsheap::Result<()> {
//! let store = Store::open(Arc::new(InMemoryStore::new()), StoreConfig::default()).await?;
//! store
//!     .transact(|txn| {
//!         let root = txn.root();
//!         txn.set(root, "greeting", "hello")?;
//!         Ok(())
//!     })
//!     .await?;
//! let greeting = store.transact(|txn| Ok(txn.get(txn.root(), "greeting")?)).await?;
//! assert_eq!(greeting, Value::from("hello"));
//! # Ok(())
//! # }
//! ```

mod config;
pub mod errors;
mod upstream;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use handle_trait::Handle;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, debug_span, info, warn};

pub use config::StoreConfig;
pub use errors::StoreError;
pub use upstream::Upstream;

use crate::Result;
use crate::backend::DocumentStore;
use crate::codec::ObjectWriter;
use crate::engine::{CommitOutcome, CommitReceipt, Engine, ObjectDoc};
use crate::heap::Heap;
use crate::id::{IdGenerator, ObjectId};
use crate::mtx::{Mtx, MtxBuilder};
use crate::tracker::Txn;

/// Counters describing a store's activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub cached_objects: usize,
    pub evictions: u64,
    pub requests: u64,
    pub commits: u64,
    pub conflicts: u64,
    /// Handler invocations beyond the first of each request.
    pub retries: u64,
    /// Objects loaded from upstream.
    pub reloads: u64,
}

struct Session {
    heap: Heap,
    builder: MtxBuilder,
}

struct StoreInner {
    upstream: Arc<dyn Upstream>,
    config: StoreConfig,
    /// Requests wait here in arrival order.
    session: Mutex<Session>,
    requests: AtomicU64,
    commits: AtomicU64,
    conflicts: AtomicU64,
    retries: AtomicU64,
    reloads: AtomicU64,
}

impl std::fmt::Debug for StoreInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreInner")
            .field("upstream", &"<Upstream>")
            .field("config", &self.config)
            .field("requests", &self.requests.load(Ordering::Relaxed))
            .finish()
    }
}

/// Undo an attempt whose changes could not all be collected. Objects it read
/// may still hold untracked edits, so they leave the cache too.
fn discard(heap: &mut Heap, builder: &mut MtxBuilder) {
    let read: Vec<ObjectId> = builder.mtx().readset.keys().copied().collect();
    builder.undo(heap);
    for id in &read {
        heap.evict(id);
    }
}

/// A shared heap backed by an [`Upstream`].
///
/// Cheap to clone; clones share the cache and the request queue.
#[derive(Clone, Debug, Handle)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    /// Store committing directly into `store`. Creates the root object and
    /// the lock document if needed.
    pub async fn open(store: Arc<dyn DocumentStore>, config: StoreConfig) -> Result<Self> {
        let engine = Engine::new(store, &config);
        Self::connect(Arc::new(engine), config).await
    }

    /// Store committing through `upstream`.
    pub async fn connect(upstream: Arc<dyn Upstream>, config: StoreConfig) -> Result<Self> {
        Self::connect_with_ids(upstream, config, Arc::new(IdGenerator::new())).await
    }

    /// Store committing through `upstream` and naming new objects with `ids`.
    pub async fn connect_with_ids(
        upstream: Arc<dyn Upstream>,
        config: StoreConfig,
        ids: Arc<IdGenerator>,
    ) -> Result<Self> {
        config.validate()?;
        upstream.prepare().await?;
        info!(owner = %config.owner, "Opened store");
        Ok(Self {
            inner: Arc::new(StoreInner {
                upstream,
                config,
                session: Mutex::new(Session {
                    heap: Heap::new(),
                    builder: MtxBuilder::new(ids),
                }),
                requests: AtomicU64::new(0),
                commits: AtomicU64::new(0),
                conflicts: AtomicU64::new(0),
                retries: AtomicU64::new(0),
                reloads: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Run `handler` as one transaction and return its result.
    ///
    /// The handler may run several times: after a conflict and after touching
    /// an object that was not cached. Only the heap should be changed from
    /// inside it.
    pub async fn transact<F, R>(&self, mut handler: F) -> Result<R>
    where
        F: FnMut(&mut Txn<'_>) -> Result<R> + Send,
        R: Send,
    {
        let request = self.inner.requests.fetch_add(1, Ordering::Relaxed) + 1;
        self.process(&mut handler)
            .instrument(debug_span!("request", id = request))
            .await
    }

    async fn process<F, R>(&self, handler: &mut F) -> Result<R>
    where
        F: FnMut(&mut Txn<'_>) -> Result<R> + Send,
        R: Send,
    {
        let mut session = self.inner.session.lock().await;
        let Session { heap, builder } = &mut *session;
        let max_attempts = self.inner.config.max_attempts;
        // Ids that failed to reload during this request.
        let mut vanished = HashSet::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.inner.retries.fetch_add(1, Ordering::Relaxed);
            }
            if !heap.contains(&ObjectId::ROOT) && !self.reload(heap, ObjectId::ROOT).await? {
                return Err(StoreError::RootMissing.into());
            }
            builder.begin(heap)?;

            let outcome = handler(&mut Txn::new(heap, builder));

            let value = match outcome {
                Ok(value) => value,
                Err(err) => {
                    let collected = builder.collect(heap);
                    if collected.is_ok() {
                        builder.undo(heap);
                    } else {
                        discard(heap, builder);
                    }
                    if let Some((owner, missing)) = err.unresolved_reference() {
                        collected?;
                        debug!(%owner, %missing, attempt, "Loading unresolved reference");
                        if !self.reload(heap, missing).await? {
                            // A second miss on the same id comes from the
                            // handler itself, not from a stale owner.
                            if owner == missing || !vanished.insert(missing) {
                                return Err(err);
                            }
                            heap.evict(&owner);
                        }
                        continue;
                    }
                    if let Err(e) = collected {
                        debug!(error = %e, "Collect failed after handler error");
                    }
                    return Err(err);
                }
            };

            if let Err(e) = builder.collect(heap) {
                discard(heap, builder);
                return Err(e.into());
            }
            let mtx = match builder.finish() {
                Ok(mtx) => mtx.clone(),
                Err(e) => {
                    builder.undo(heap);
                    return Err(e.into());
                }
            };
            if mtx.is_read_only() {
                builder.ok(heap);
                return Ok(value);
            }

            match self.inner.upstream.commit(&mtx).await {
                Ok(CommitOutcome::Committed(receipt)) => {
                    self.settle(heap, &mtx, &receipt)?;
                    builder.ok(heap);
                    self.inner.commits.fetch_add(1, Ordering::Relaxed);
                    debug!(attempt, written = receipt.revisions.len(), "Committed");
                    return Ok(value);
                }
                Ok(CommitOutcome::Conflict { ids, updates }) => {
                    self.inner.conflicts.fetch_add(1, Ordering::Relaxed);
                    debug!(attempt, stale = ids.len(), "Conflict, retrying");
                    builder.undo(heap);
                    self.refresh(heap, &ids, updates)?;
                }
                Err(e) => {
                    builder.undo(heap);
                    return Err(e);
                }
            }
        }

        warn!(attempts = max_attempts, "Giving up on request");
        Err(StoreError::RetriesExhausted {
            attempts: max_attempts,
        }
        .into())
    }

    /// Load the current copy of `id` into the heap. Returns false if it does
    /// not exist upstream.
    async fn reload(&self, heap: &mut Heap, id: ObjectId) -> Result<bool> {
        let Some(doc) = self.inner.upstream.fetch(id).await? else {
            return Ok(false);
        };
        self.install(heap, doc)?;
        Ok(true)
    }

    fn install(&self, heap: &mut Heap, doc: ObjectDoc) -> Result<()> {
        let body = doc.body()?;
        heap.load(doc.id, doc.rev, doc.refs, body);
        self.inner.reloads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Replace stale objects with the copies sent back with a conflict.
    fn refresh(&self, heap: &mut Heap, ids: &[ObjectId], updates: Vec<ObjectDoc>) -> Result<()> {
        let mut fresh: HashMap<ObjectId, ObjectDoc> =
            updates.into_iter().map(|doc| (doc.id, doc)).collect();
        for id in ids {
            match fresh.remove(id) {
                Some(doc) => self.install(heap, doc)?,
                None => {
                    heap.evict(id);
                }
            }
        }
        Ok(())
    }

    /// Bring cached objects in line with a successful commit.
    fn settle(&self, heap: &mut Heap, mtx: &Mtx, receipt: &CommitReceipt) -> Result<()> {
        let written = mtx
            .touched()
            .into_iter()
            .chain(mtx.newset.iter().map(|entry| entry.id));
        for id in written {
            match receipt.revisions.get(&id) {
                Some(rev) => heap.mark_committed(&id, *rev, receipt.refs.get(&id).copied())?,
                None => {
                    heap.evict(&id);
                }
            }
        }
        for (id, refs) in &receipt.refs {
            if let Some(obj) = heap.get_mut(id) {
                obj.refcount = *refs;
            }
        }
        for id in &receipt.removed {
            heap.evict(id);
        }
        Ok(())
    }

    /// Activity counters. Waits for the request in progress.
    pub async fn stats(&self) -> StoreStats {
        let session = self.inner.session.lock().await;
        StoreStats {
            cached_objects: session.heap.len(),
            evictions: session.heap.evictions(),
            requests: self.inner.requests.load(Ordering::Relaxed),
            commits: self.inner.commits.load(Ordering::Relaxed),
            conflicts: self.inner.conflicts.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            reloads: self.inner.reloads.load(Ordering::Relaxed),
        }
    }

    /// Render `id` and everything reachable from it, each object prefixed
    /// with its id and revision. Missing objects are loaded first.
    pub async fn snapshot(&self, id: ObjectId) -> Result<String> {
        let mut session = self.inner.session.lock().await;
        let heap = &mut session.heap;
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            if !heap.contains(&next) && !self.reload(heap, next).await? {
                continue;
            }
            if let Some(obj) = heap.get(&next) {
                stack.extend(obj.body().references());
            }
        }
        Ok(ObjectWriter::new(&*heap).with_metadata(true).write(&id))
    }

    /// Whether `id` is currently cached.
    pub async fn is_cached(&self, id: ObjectId) -> bool {
        self.inner.session.lock().await.heap.contains(&id)
    }

    /// Drop every cached object. Objects are loaded again when next used.
    pub async fn clear_cache(&self) {
        let mut session = self.inner.session.lock().await;
        let ids: Vec<ObjectId> = session.heap.ids().copied().collect();
        for id in ids {
            session.heap.evict(&id);
        }
    }
}
