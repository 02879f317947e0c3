/*! Integration tests for dsheap.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - codec: token encoding, scanning and object rendering
 * - tracker: the handler accessor API on a bare heap
 * - mtx: transaction recording, collection and undo on a bare heap
 * - backend: the document store trait and the in-memory store
 * - engine: commit, conflicts, reference counting, GC and the lock
 * - store: request processing, retries and reloads
 * - protocol: stores reaching an engine through a primary
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dsheap=info".parse().unwrap()))
        .with_test_writer()
        .try_init();
}

mod backend;
mod codec;
mod mtx;
mod protocol;
mod store;
mod tracker;
