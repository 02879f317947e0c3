//! Persistence operations for the in-memory store.
//!
//! The whole store is written as one JSON file holding a version marker and
//! the list of documents.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;

use super::InMemoryStore;
use crate::backend::errors::BackendError;
use crate::backend::{Document, id_key};
use crate::constants::ID;
use crate::{Error, Result};

/// The current persistence file format version.
/// v0 indicates this is an unstable format subject to breaking changes.
const PERSISTENCE_VERSION: u8 = 0;

fn is_v0(v: &u8) -> bool {
    *v == 0
}

fn validate_persistence_version<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u8::deserialize(deserializer)?;
    if version != PERSISTENCE_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported persistence version {version}; only version {PERSISTENCE_VERSION} is supported"
        )));
    }
    Ok(version)
}

#[derive(Serialize, Deserialize)]
struct SerializableStore {
    #[serde(
        rename = "_v",
        default,
        skip_serializing_if = "is_v0",
        deserialize_with = "validate_persistence_version"
    )]
    version: u8,
    documents: Vec<Document>,
}

pub(super) async fn save_to_file<P: AsRef<Path>>(store: &InMemoryStore, path: P) -> Result<()> {
    let documents = store.documents().await;
    let serializable = SerializableStore {
        version: PERSISTENCE_VERSION,
        documents,
    };

    let json = serde_json::to_string_pretty(&serializable)
        .map_err(|e| -> Error { BackendError::SerializationFailed { source: e }.into() })?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| -> Error { BackendError::FileIo { source: e }.into() })
}

pub(super) async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<InMemoryStore> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => {
            let serializable: SerializableStore = serde_json::from_str(&json).map_err(|e| -> Error {
                BackendError::DeserializationFailed { source: e }.into()
            })?;
            let mut docs = BTreeMap::new();
            for doc in serializable.documents {
                let key = doc.get(ID).map(id_key).ok_or(BackendError::MissingId)?;
                docs.insert(key, doc);
            }
            Ok(InMemoryStore {
                docs: RwLock::new(docs),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(InMemoryStore::new()),
        Err(e) => Err(BackendError::FileIo { source: e }.into()),
    }
}
