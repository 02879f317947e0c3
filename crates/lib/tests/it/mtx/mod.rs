//! Mtx integration tests
//!
//! Collecting untracked changes, finishing, accepting and undoing attempts
//! against a bare heap.
