//! In-memory document store.
//!
//! Suitable for tests, single-process deployments, and as the primary's
//! storage when peers connect over a [`Link`](crate::protocol::Link). The
//! whole store can be saved to and loaded from a JSON file.

mod persistence;
mod storage;

use std::any::Any;
use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use super::errors::BackendError;
use super::{Document, DocumentStore, FieldPath, FindAndModify, Filter, Update, id_key};
use crate::Result;
use crate::constants::ID;

/// A document store kept in a `BTreeMap` keyed by rendered `_id`.
///
/// Each operation takes the map lock once, so every operation is atomic with
/// respect to the others.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    pub(crate) docs: RwLock<BTreeMap<String, Document>>,
}

fn find_key(docs: &BTreeMap<String, Document>, filter: &Filter) -> Option<String> {
    match filter.id() {
        Some(id) => {
            let key = id_key(id);
            docs.get(&key)
                .filter(|doc| filter.matches(doc))
                .map(|_| key)
        }
        None => docs
            .iter()
            .find(|(_, doc)| filter.matches(doc))
            .map(|(key, _)| key.clone()),
    }
}

impl InMemoryStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    /// Returns true if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    /// Copy of the document with this rendered `_id`.
    pub async fn get(&self, id: &str) -> Option<Document> {
        self.docs.read().await.get(id).cloned()
    }

    /// Copies of all documents ordered by `_id`.
    pub async fn documents(&self) -> Vec<Document> {
        self.docs.read().await.values().cloned().collect()
    }

    /// Saves every document to `path` as JSON.
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persistence::save_to_file(self, path).await
    }

    /// Loads a store from `path`. A missing file gives an empty store.
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        persistence::load_from_file(path).await
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn find_one(
        &self,
        filter: &Filter,
        projection: Option<&[FieldPath]>,
    ) -> Result<Option<Document>> {
        let docs = self.docs.read().await;
        Ok(find_key(&docs, filter)
            .and_then(|key| docs.get(&key))
            .map(|doc| storage::project(doc, projection)))
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let docs = self.docs.read().await;
        let count = match filter.id() {
            Some(_) => u64::from(find_key(&docs, filter).is_some()),
            None => docs.values().filter(|doc| filter.matches(doc)).count() as u64,
        };
        Ok(count)
    }

    async fn update(&self, filter: &Filter, update: &Update, upsert: bool) -> Result<u64> {
        let mut docs = self.docs.write().await;
        match find_key(&docs, filter) {
            Some(key) => {
                let Some(current) = docs.get(&key) else {
                    return Ok(0);
                };
                let mut next = current.clone();
                storage::apply(&mut next, update)?;
                docs.insert(key, next);
                Ok(1)
            }
            None if upsert => {
                let doc = storage::upsert_document(filter, update)?;
                let key = doc.get(ID).map(id_key).ok_or(BackendError::MissingId)?;
                trace!(id = %key, "Upserted document");
                docs.insert(key, doc);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find_and_modify(
        &self,
        filter: &Filter,
        update: &Update,
        options: FindAndModify,
    ) -> Result<Option<Document>> {
        let mut docs = self.docs.write().await;
        match find_key(&docs, filter) {
            Some(key) => {
                let Some(current) = docs.get(&key) else {
                    return Ok(None);
                };
                let before = current.clone();
                let mut next = before.clone();
                storage::apply(&mut next, update)?;
                docs.insert(key, next.clone());
                Ok(Some(if options.return_new { next } else { before }))
            }
            None if options.upsert => {
                let doc = storage::upsert_document(filter, update)?;
                let key = doc.get(ID).map(id_key).ok_or(BackendError::MissingId)?;
                docs.insert(key, doc.clone());
                Ok(options.return_new.then_some(doc))
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, filter: &Filter) -> Result<u64> {
        let mut docs = self.docs.write().await;
        match find_key(&docs, filter) {
            Some(key) => {
                docs.remove(&key);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn insert(&self, doc: Document) -> Result<()> {
        let key = doc.get(ID).map(id_key).ok_or(BackendError::MissingId)?;
        let mut docs = self.docs.write().await;
        if docs.contains_key(&key) {
            return Err(BackendError::DuplicateKey { id: key }.into());
        }
        docs.insert(key, doc);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
