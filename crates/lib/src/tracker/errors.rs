//! Errors raised by tracked accessors.

use thiserror::Error;

use crate::id::ObjectId;
use crate::value::ObjectKind;

/// Errors raised while a handler reads or writes tracked objects.
///
/// [`TrackerError::UnresolvedReference`] is recoverable: the store loads the
/// missing object and runs the handler again. The others reach the caller.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// A field links to an object that is not in the local cache.
    #[error("Reference from {owner}.{prop} to {missing} is not loaded")]
    UnresolvedReference {
        owner: ObjectId,
        prop: String,
        missing: ObjectId,
    },

    /// Operation needs the other object kind.
    #[error("Object {id} is {found}, expected {expected}")]
    KindMismatch {
        id: ObjectId,
        expected: ObjectKind,
        found: ObjectKind,
    },

    /// Array index past the end.
    #[error("Index {index} out of bounds for array {id} of length {len}")]
    IndexOutOfBounds { id: ObjectId, index: usize, len: usize },

    /// Property of an array that is not a decimal index below the maximum
    /// array length.
    #[error("Invalid array index {prop:?} on {id}")]
    InvalidIndex { id: ObjectId, prop: String },

    /// A new field on a frozen object cannot be tracked.
    #[error("Field {prop:?} of frozen object {owner} cannot be tracked")]
    FieldNotTrackable { owner: ObjectId, prop: String },

    /// Write to a frozen object.
    #[error("Object {id} is frozen")]
    Frozen { id: ObjectId },

    /// A value was supplied where a new map or array was required.
    #[error("Expected a map or array, got a plain value")]
    NotAnObject,
}

impl TrackerError {
    /// Check if the handler can be retried once the missing object is loaded.
    pub fn is_unresolved_reference(&self) -> bool {
        matches!(self, TrackerError::UnresolvedReference { .. })
    }

    /// Check if this error breaks a tracking invariant.
    pub fn is_structural_violation(&self) -> bool {
        matches!(self, TrackerError::FieldNotTrackable { .. })
    }

    /// `(owner, missing)` for an unresolved reference.
    pub fn unresolved(&self) -> Option<(ObjectId, ObjectId)> {
        match self {
            TrackerError::UnresolvedReference { owner, missing, .. } => Some((*owner, *missing)),
            _ => None,
        }
    }
}

impl From<TrackerError> for crate::Error {
    fn from(err: TrackerError) -> Self {
        crate::Error::Tracker(err)
    }
}
