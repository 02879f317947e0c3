//! Codec error types.

use thiserror::Error;

/// Errors raised while decoding a token stream or a persisted cell.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// No token where one was required.
    #[error("Expected a value at position {position}")]
    EmptyInput { position: usize },

    /// Input at `position` matches no token pattern.
    #[error("Unexpected token at position {position}: {found:?}")]
    UnexpectedToken { position: usize, found: String },

    /// A quoted string runs to end of input.
    #[error("Unterminated string starting at position {position}")]
    UnterminatedString { position: usize },

    /// A quoted string contains a malformed escape.
    #[error("Invalid escape in string at position {position}: {reason}")]
    InvalidEscape { position: usize, reason: String },

    /// More tokens follow a single-value decode.
    #[error("Trailing input at position {position}")]
    TrailingInput { position: usize },

    /// A reference token or id string is not 24 hex digits.
    #[error("Invalid object reference: {text:?}")]
    InvalidReference { text: String },

    /// A date token is out of range.
    #[error("Invalid date: {millis}")]
    InvalidDate { millis: i64 },

    /// A persisted cell is neither a token string nor an `{_id}` link.
    #[error("Invalid persisted cell: {cell}")]
    InvalidCell { cell: String },
}

impl CodecError {
    /// Byte position of the failure, when it has one.
    pub fn position(&self) -> Option<usize> {
        match self {
            CodecError::EmptyInput { position }
            | CodecError::UnexpectedToken { position, .. }
            | CodecError::UnterminatedString { position }
            | CodecError::InvalidEscape { position, .. }
            | CodecError::TrailingInput { position } => Some(*position),
            _ => None,
        }
    }

    /// Check if this error came from a malformed reference.
    pub fn is_reference_error(&self) -> bool {
        matches!(self, CodecError::InvalidReference { .. })
    }
}

impl From<CodecError> for crate::Error {
    fn from(err: CodecError) -> Self {
        crate::Error::Codec(err)
    }
}
