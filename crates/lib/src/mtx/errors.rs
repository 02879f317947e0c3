//! Errors raised while building or applying a mutation transaction.

use thiserror::Error;

use crate::id::ObjectId;

/// Violations of the mutation transaction invariants.
///
/// These indicate a bug in the recorder or a corrupted mtx received from a
/// peer. They are never retried.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MtxError {
    /// A finished mtx must depend on at least the root.
    #[error("Mutation transaction has an empty readset")]
    EmptyReadset,

    /// The root object was not loaded when a request started.
    #[error("Root object is not loaded")]
    RootNotLoaded,

    /// An op that should have been folded into a rewrite reached the store.
    #[error("Unexpected {kind} op on {owner}")]
    UnexpectedOp { kind: &'static str, owner: ObjectId },

    /// A removal from the middle of an array reached the store.
    #[error("Shift of {count} at {at} on {owner} is not at either end")]
    ShiftNotAtEdge {
        owner: ObjectId,
        at: usize,
        count: usize,
    },

    /// A newset entry links to a new object listed after it. New objects that
    /// link to each other in a cycle cannot be created in one transaction.
    #[error("New object {owner} links to {target} before it is created")]
    ForwardReference { owner: ObjectId, target: ObjectId },

    /// An op names a property that is not a valid index.
    #[error("Invalid property {prop:?} on {owner}")]
    InvalidProperty { owner: ObjectId, prop: String },
}

impl MtxError {
    /// Check if the error came from the op log rather than the readset.
    pub fn is_op_error(&self) -> bool {
        matches!(
            self,
            MtxError::UnexpectedOp { .. }
                | MtxError::ShiftNotAtEdge { .. }
                | MtxError::InvalidProperty { .. }
        )
    }

    /// Object the error is about, if any.
    pub fn owner(&self) -> Option<ObjectId> {
        match self {
            MtxError::UnexpectedOp { owner, .. }
            | MtxError::ShiftNotAtEdge { owner, .. }
            | MtxError::InvalidProperty { owner, .. }
            | MtxError::ForwardReference { owner, .. } => Some(*owner),
            MtxError::RootNotLoaded => Some(ObjectId::ROOT),
            MtxError::EmptyReadset => None,
        }
    }
}

impl From<MtxError> for crate::Error {
    fn from(err: MtxError) -> Self {
        crate::Error::Mtx(err)
    }
}
