//! Document store error types.
//!
//! Any of these reaching a request is a store failure: the attempt is undone
//! and the error is returned to the caller without a retry.

use thiserror::Error;

/// Errors raised by a [`DocumentStore`](super::DocumentStore).
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BackendError {
    /// Insert of a document whose `_id` already exists.
    #[error("Duplicate document id: {id}")]
    DuplicateKey {
        /// The rendered `_id`
        id: String,
    },

    /// A document without an `_id`.
    #[error("Document has no _id field")]
    MissingId,

    /// A path crosses a value that is neither an object nor an array.
    #[error("Invalid path {path}: {reason}")]
    InvalidPath {
        /// The offending path
        path: String,
        /// What was found instead
        reason: String,
    },

    /// An array operator applied to a non-array.
    #[error("Field {path} is not an array")]
    NotAnArray {
        /// The offending path
        path: String,
    },

    /// An increment applied to a non-integer.
    #[error("Field {path} is not an integer")]
    NotAnInteger {
        /// The offending path
        path: String,
    },

    /// The store cannot be reached or refused the operation.
    #[error("Document store unavailable: {reason}")]
    Unavailable {
        /// Description of the failure
        reason: String,
    },

    /// Serialization failed.
    #[error("Serialization failed")]
    SerializationFailed {
        /// The underlying serialization error
        #[source]
        source: serde_json::Error,
    },

    /// Deserialization failed.
    #[error("Deserialization failed")]
    DeserializationFailed {
        /// The underlying deserialization error
        #[source]
        source: serde_json::Error,
    },

    /// File I/O error.
    #[error("File I/O error")]
    FileIo {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl BackendError {
    /// Check if this error is a key collision.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, BackendError::DuplicateKey { .. })
    }

    /// Check if this error is related to I/O operations.
    pub fn is_io_error(&self) -> bool {
        matches!(
            self,
            BackendError::FileIo { .. }
                | BackendError::SerializationFailed { .. }
                | BackendError::DeserializationFailed { .. }
                | BackendError::Unavailable { .. }
        )
    }

    /// Check if an update did not fit the document it matched.
    pub fn is_update_error(&self) -> bool {
        matches!(
            self,
            BackendError::InvalidPath { .. }
                | BackendError::NotAnArray { .. }
                | BackendError::NotAnInteger { .. }
        )
    }
}

impl From<BackendError> for crate::Error {
    fn from(err: BackendError) -> Self {
        crate::Error::Backend(err)
    }
}
