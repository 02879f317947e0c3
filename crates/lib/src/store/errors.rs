//! Request processing error types.

use thiserror::Error;

/// Errors raised by [`Store`](super::Store) itself rather than by a handler
/// or the commit path.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The handler kept conflicting or hitting unloaded objects.
    #[error("Request gave up after {attempts} attempts")]
    RetriesExhausted {
        /// Number of handler invocations made
        attempts: u32,
    },

    /// The upstream has no root object. Call `prepare` first.
    #[error("Root object does not exist upstream")]
    RootMissing,

    /// The configuration is unusable.
    #[error("Invalid store configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with it
        reason: String,
    },
}

impl StoreError {
    /// Check if the request was abandoned after repeated retries.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, StoreError::RetriesExhausted { .. })
    }

    /// Check if this is a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(self, StoreError::InvalidConfig { .. })
    }
}

impl From<StoreError> for crate::Error {
    fn from(err: StoreError) -> Self {
        crate::Error::Store(err)
    }
}
