//! Tracker integration tests
//!
//! Handler-side access to a bare heap: reads, tracked and untracked writes,
//! drafts and array operations, before anything is committed.

mod access;
mod arrays;
