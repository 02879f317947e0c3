//! Backend integration tests
//!
//! The in-memory document store through the `DocumentStore` trait, and
//! saving it to disk.

mod operations;
mod save_load;
