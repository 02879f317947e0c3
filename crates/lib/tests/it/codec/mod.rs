//! Codec integration tests
//!
//! Token encoding of every scalar kind, stream scanning and error positions,
//! and nested snapshot rendering.

mod scanner;
mod writer;
