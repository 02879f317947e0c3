//! Field names and defaults shared by the engine and the document store.

/// Document id field.
pub const ID: &str = "_id";

/// Object revision field.
pub const REV: &str = "_rev";

/// Inbound reference count field.
pub const REF: &str = "_ref";

/// Object kind field (`"Object"` or `"Array"`).
pub const TYPE: &str = "_type";

/// Object contents field.
pub const DATA: &str = "_data";

/// Lock document: whether the mutex is held.
pub const LOCKED: &str = "locked";

/// Lock document: holder's name.
pub const OWNER: &str = "owner";

/// Lock document: holder's host.
pub const HOST: &str = "host";

/// Lock document: holder's process id.
pub const PID: &str = "pid";

/// Lock document: per-acquisition nonce.
pub const NONCE: &str = "rand";

/// Default id of the lock document.
pub const DEFAULT_LOCK_ID: &str = "mutex";

/// Arrays never grow past this many items through an indexed write.
pub const MAX_ARRAY_LEN: usize = 1 << 24;
