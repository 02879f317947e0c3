//! Where a store loads objects from and sends transactions to.

use async_trait::async_trait;

use crate::Result;
use crate::engine::{CommitOutcome, ObjectDoc};
use crate::id::ObjectId;
use crate::mtx::Mtx;

/// The commit path of a [`Store`](super::Store).
///
/// [`Engine`](crate::engine::Engine) commits straight into a document store.
/// [`RemoteUpstream`](crate::protocol::RemoteUpstream) forwards to a primary
/// that owns the engine.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Make sure the root object exists.
    async fn prepare(&self) -> Result<()>;

    /// Current document of an object, or `None` if it does not exist.
    async fn fetch(&self, id: ObjectId) -> Result<Option<ObjectDoc>>;

    /// Commit a finished transaction.
    async fn commit(&self, mtx: &Mtx) -> Result<CommitOutcome>;
}
