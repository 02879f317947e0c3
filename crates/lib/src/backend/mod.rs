//! Document store abstraction.
//!
//! The engine persists objects and the lock document in a store of JSON
//! documents keyed by `_id`. [`DocumentStore`] is the seam: it offers the
//! single-document atomic operations the engine needs (find, count, update,
//! find-and-modify, remove, insert) and nothing else.
//!
//! Filters are conjunctions of path equalities. Updates are either a list of
//! field operators applied in order or a whole-document replacement.

use std::any::Any;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value as Json;

use crate::Result;
use crate::constants::ID;

pub mod errors;
mod in_memory;

pub use errors::BackendError;
pub use in_memory::InMemoryStore;

/// A stored document.
pub type Document = serde_json::Map<String, Json>;

/// Dotted path into a document. Array items are addressed by decimal index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Path from its segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// A top-level field.
    pub fn field(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// This path extended by one segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// The segments in order.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Value at this path, if present.
    pub fn lookup<'d>(&self, doc: &'d Document) -> Option<&'d Json> {
        let (first, rest) = self.0.split_first()?;
        let mut current = doc.get(first)?;
        for segment in rest {
            current = match current {
                Json::Object(map) => map.get(segment)?,
                Json::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&str> for FieldPath {
    fn from(name: &str) -> Self {
        Self::field(name)
    }
}

/// Conjunction of path equalities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(FieldPath, Json)>,
}

impl Filter {
    /// Matches every document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches the document with this `_id`.
    pub fn by_id(id: impl Into<Json>) -> Self {
        Self::new().eq(ID, id)
    }

    /// Add an equality condition.
    pub fn eq(mut self, path: impl Into<FieldPath>, value: impl Into<Json>) -> Self {
        self.conditions.push((path.into(), value.into()));
        self
    }

    /// The conditions in order.
    pub fn conditions(&self) -> &[(FieldPath, Json)] {
        &self.conditions
    }

    /// The `_id` this filter pins, if any.
    pub fn id(&self) -> Option<&Json> {
        self.conditions
            .iter()
            .find(|(path, _)| path.segments() == [ID])
            .map(|(_, value)| value)
    }

    /// Returns true if every condition holds for `doc`.
    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(path, expected)| path.lookup(doc) == Some(expected))
    }
}

/// One field operator.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Assign, creating missing parents. Setting one past the end of an
    /// array appends.
    Set(FieldPath, Json),
    /// Remove a field. On an array item, replaces it with null.
    Unset(FieldPath),
    /// Add to an integer field, treating a missing field as zero.
    Inc(FieldPath, i64),
    /// Remove the first array item.
    PopFirst(FieldPath),
    /// Remove the last array item.
    PopLast(FieldPath),
    /// Insert items at a position of an array.
    InsertAt {
        path: FieldPath,
        at: usize,
        values: Vec<Json>,
    },
}

/// A modification of one document.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Field operators applied in order.
    Modify(Vec<UpdateOp>),
    /// Whole-document replacement; `_id` is kept.
    Replace(Document),
}

impl Default for Update {
    fn default() -> Self {
        Update::Modify(Vec::new())
    }
}

impl Update {
    /// An empty operator list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole document.
    pub fn replace(doc: Document) -> Self {
        Update::Replace(doc)
    }

    fn push(self, op: UpdateOp) -> Self {
        match self {
            Update::Modify(mut ops) => {
                ops.push(op);
                Update::Modify(ops)
            }
            Update::Replace(_) => Update::Modify(vec![op]),
        }
    }

    /// Add a `Set` operator.
    pub fn set(self, path: impl Into<FieldPath>, value: impl Into<Json>) -> Self {
        self.push(UpdateOp::Set(path.into(), value.into()))
    }

    /// Add an `Unset` operator.
    pub fn unset(self, path: impl Into<FieldPath>) -> Self {
        self.push(UpdateOp::Unset(path.into()))
    }

    /// Add an `Inc` operator.
    pub fn inc(self, path: impl Into<FieldPath>, by: i64) -> Self {
        self.push(UpdateOp::Inc(path.into(), by))
    }

    /// Add a `PopFirst` operator.
    pub fn pop_first(self, path: impl Into<FieldPath>) -> Self {
        self.push(UpdateOp::PopFirst(path.into()))
    }

    /// Add a `PopLast` operator.
    pub fn pop_last(self, path: impl Into<FieldPath>) -> Self {
        self.push(UpdateOp::PopLast(path.into()))
    }

    /// Add an `InsertAt` operator.
    pub fn insert_at(self, path: impl Into<FieldPath>, at: usize, values: Vec<Json>) -> Self {
        self.push(UpdateOp::InsertAt {
            path: path.into(),
            at,
            values,
        })
    }
}

/// Options for [`DocumentStore::find_and_modify`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindAndModify {
    /// Create the document from the filter when nothing matches.
    pub upsert: bool,
    /// Return the document after the update rather than before.
    pub return_new: bool,
}

impl FindAndModify {
    /// Return the updated document, no upsert.
    pub fn returning_new() -> Self {
        Self {
            upsert: false,
            return_new: true,
        }
    }
}

/// Storage of JSON documents keyed by `_id`.
///
/// Every method acts on at most one document atomically. Implementations
/// must be `Send` and `Sync` to be shared between tasks, and implement `Any`
/// so callers can downcast to a concrete store.
#[async_trait]
pub trait DocumentStore: Send + Sync + Any {
    /// First matching document, limited to `_id` and `projection` when given.
    async fn find_one(
        &self,
        filter: &Filter,
        projection: Option<&[FieldPath]>,
    ) -> Result<Option<Document>>;

    /// Number of matching documents.
    async fn count(&self, filter: &Filter) -> Result<u64>;

    /// Update the first matching document, or insert one built from the
    /// filter's conditions when `upsert` is set. Returns the number of
    /// documents written.
    async fn update(&self, filter: &Filter, update: &Update, upsert: bool) -> Result<u64>;

    /// Update the first matching document and return it.
    async fn find_and_modify(
        &self,
        filter: &Filter,
        update: &Update,
        options: FindAndModify,
    ) -> Result<Option<Document>>;

    /// Remove the first matching document. Returns the number removed.
    async fn remove(&self, filter: &Filter) -> Result<u64>;

    /// Insert a new document. Fails with [`BackendError::DuplicateKey`] if
    /// its `_id` exists.
    async fn insert(&self, doc: Document) -> Result<()>;

    /// Returns a reference to the store as a `dyn Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

/// Rendered `_id` used as a map key by stores.
pub(crate) fn id_key(id: &Json) -> String {
    match id {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}
