//! Errors on the path between a store and its primary.

use thiserror::Error;

/// Failures talking to a [`Primary`](super::Primary).
///
/// All of them are store failures: the attempt is undone and the request
/// fails without a retry.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The primary stopped or dropped the request.
    #[error("Link to primary is closed")]
    LinkClosed,

    /// The primary answered with the wrong kind of reply.
    #[error("Expected a {expected} reply, got {got}")]
    UnexpectedReply {
        expected: &'static str,
        got: String,
    },

    /// The primary failed to serve the request.
    #[error("Primary failed: {message}")]
    Remote { message: String },

    /// A message could not be encoded or decoded.
    #[error("Malformed message")]
    Encoding {
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Check if the link itself failed.
    pub fn is_link_error(&self) -> bool {
        matches!(self, ProtocolError::LinkClosed)
    }

    /// Check if the primary reported the error.
    pub fn is_remote(&self) -> bool {
        matches!(self, ProtocolError::Remote { .. })
    }
}

impl From<ProtocolError> for crate::Error {
    fn from(err: ProtocolError) -> Self {
        crate::Error::Protocol(err)
    }
}
