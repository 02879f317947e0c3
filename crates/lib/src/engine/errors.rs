//! Commit engine error types.

use thiserror::Error;

/// Errors raised while committing against the document store.
///
/// All of them are store failures: the commit is abandoned, the lock is
/// released, and the request fails.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EngineError {
    /// A stored object document does not have the expected layout.
    #[error("Malformed object document {id}: {reason}")]
    MalformedDocument {
        /// Rendered `_id` of the document
        id: String,
        /// What was wrong with it
        reason: String,
    },

    /// An object that must exist has no document.
    #[error("Object document {id} is missing")]
    MissingDocument {
        /// Rendered `_id` of the document
        id: String,
    },

    /// The lock document vanished and could not be recreated.
    #[error("Lock document {lock_id} is unavailable")]
    LockUnavailable {
        /// Id of the lock document
        lock_id: String,
    },
}

impl EngineError {
    /// Check if stored data failed to parse.
    pub fn is_malformed(&self) -> bool {
        matches!(self, EngineError::MalformedDocument { .. })
    }

    /// Check if this error concerns the distributed mutex.
    pub fn is_lock_error(&self) -> bool {
        matches!(self, EngineError::LockUnavailable { .. })
    }
}

impl From<EngineError> for crate::Error {
    fn from(err: EngineError) -> Self {
        crate::Error::Engine(err)
    }
}
