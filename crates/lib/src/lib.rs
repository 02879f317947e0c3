//!
//! dsheap: a distributed shared heap with optimistic transactions.
//!
//! Application code reads and writes a graph of maps and arrays as if it were
//! local. Every access goes through a tracker that records what was read and
//! what changed; when the handler returns, the recorded transaction is
//! committed against a shared document store under a distributed lock, or
//! undone and retried if another process changed something it read.
//!
//! ## Core Concepts
//!
//! * **Objects (`heap::TrackedObject`)**: maps and arrays identified by an
//!   [`ObjectId`], linking to each other only by id. The [`heap::Heap`] caches them.
//! * **Values (`value::Value`)**: scalars, dates and references. Nested
//!   structures are written as [`Draft`]s and become new objects.
//! * **Txn (`tracker::Txn`)**: the accessor API a handler uses. Reads join the
//!   readset; writes are logged with their previous value.
//! * **Mtx (`mtx::Mtx`)**: one transaction's readset, newset and changeset.
//! * **Engine (`engine::Engine`)**: validates and applies an mtx, maintains
//!   revisions and reference counts, and removes unreferenced objects.
//! * **Store (`store::Store`)**: runs handlers one at a time and retries them on
//!   conflicts.
//! * **Backends (`backend::DocumentStore`)**: where object documents live.

pub mod backend;
pub mod clock;
pub mod codec;
pub mod constants;
pub mod engine;
pub mod heap;
pub mod id;
pub mod mtx;
pub mod protocol;
pub mod shape;
pub mod store;
pub mod tracker;
pub mod value;

pub use backend::{DocumentStore, InMemoryStore};
#[cfg(any(test, feature = "testing"))]
pub use clock::FixedClock;
pub use clock::{Clock, SystemClock};
pub use engine::{CommitOutcome, CommitReceipt, Engine};
pub use id::{IdGenerator, ObjectId};
pub use mtx::Mtx;
pub use store::{Store, StoreConfig, StoreStats, Upstream};
pub use tracker::Txn;
pub use value::{Body, Draft, ObjectKind, Value};

/// Result type used throughout dsheap.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for dsheap.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structured codec errors from the codec module
    #[error(transparent)]
    Codec(codec::CodecError),

    /// Structured tracking errors from the tracker module
    #[error(transparent)]
    Tracker(tracker::TrackerError),

    /// Structured transaction errors from the mtx module
    #[error(transparent)]
    Mtx(mtx::MtxError),

    /// Structured document store errors from the backend module
    #[error(transparent)]
    Backend(backend::BackendError),

    /// Structured commit errors from the engine module
    #[error(transparent)]
    Engine(engine::EngineError),

    /// Structured request errors from the store module
    #[error(transparent)]
    Store(store::StoreError),

    /// Structured link errors from the protocol module
    #[error(transparent)]
    Protocol(protocol::ProtocolError),

    /// An error raised by application handler code
    #[error("Handler failed: {0}")]
    Handler(String),
}

impl Error {
    /// Error for a handler to return to its caller.
    pub fn handler(message: impl Into<String>) -> Self {
        Error::Handler(message.into())
    }

    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Codec(_) => "codec",
            Error::Tracker(_) => "tracker",
            Error::Mtx(_) => "mtx",
            Error::Backend(_) => "backend",
            Error::Engine(_) => "engine",
            Error::Store(_) => "store",
            Error::Protocol(_) => "protocol",
            Error::Handler(_) => "handler",
        }
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        match self {
            Error::Backend(backend_err) => backend_err.is_io_error(),
            Error::Protocol(protocol_err) => protocol_err.is_link_error(),
            _ => false,
        }
    }

    /// Check if the document store or the link to it failed.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Error::Backend(_) | Error::Engine(_) | Error::Protocol(_)
        )
    }

    /// Check if this error means engine state is corrupt rather than a
    /// runtime condition.
    pub fn is_structural_violation(&self) -> bool {
        match self {
            Error::Mtx(_) => true,
            Error::Tracker(tracker_err) => tracker_err.is_structural_violation(),
            _ => false,
        }
    }

    /// `(owner, missing)` if a handler touched an object that is not cached.
    pub fn unresolved_reference(&self) -> Option<(ObjectId, ObjectId)> {
        match self {
            Error::Tracker(tracker_err) => tracker_err.unresolved(),
            _ => None,
        }
    }

    /// Check if this error came from application handler code.
    pub fn is_handler_error(&self) -> bool {
        matches!(self, Error::Handler(_))
    }
}
