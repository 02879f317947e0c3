//! Protocol integration tests
//!
//! Stores that commit through a primary over an in-process link.
