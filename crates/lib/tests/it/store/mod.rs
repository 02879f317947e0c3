//! Store integration tests
//!
//! Request processing end to end: retries after conflicts and unloaded
//! references, read-only requests, handler errors, and the cache.

mod concurrency;
mod requests;
