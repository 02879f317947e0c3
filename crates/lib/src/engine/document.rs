//! Stored form of a tracked object.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::errors::EngineError;
use crate::Result;
use crate::backend::Document;
use crate::codec;
use crate::id::ObjectId;
use crate::value::{Body, ObjectKind};

/// One object document: `{_id, _rev, _ref, _type, _data}`.
///
/// `_data` is a JSON object of cells for maps and a JSON array of cells for
/// arrays. A cell is either a token string or `{"_id": "<hex>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDoc {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(rename = "_rev")]
    pub rev: u64,
    #[serde(rename = "_ref")]
    pub refs: i64,
    #[serde(rename = "_type")]
    pub kind: ObjectKind,
    #[serde(rename = "_data")]
    pub data: Json,
}

/// Persistent cells of a body.
pub fn body_cells(body: &Body) -> Json {
    match body {
        Body::Map(fields) => Json::Object(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), codec::to_cell(value)))
                .collect(),
        ),
        Body::List(items) => Json::Array(items.iter().map(codec::to_cell).collect()),
    }
}

/// Ids linked from a `_data` value.
pub fn cell_references(data: &Json) -> Vec<ObjectId> {
    match data {
        Json::Object(map) => map.values().filter_map(codec::cell_reference).collect(),
        Json::Array(items) => items.iter().filter_map(codec::cell_reference).collect(),
        other => codec::cell_reference(other).into_iter().collect(),
    }
}

impl ObjectDoc {
    /// Document for `body` at the given revision and reference count.
    pub fn from_body(id: ObjectId, rev: u64, refs: i64, body: &Body) -> Self {
        Self {
            id,
            rev,
            refs,
            kind: body.kind(),
            data: body_cells(body),
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> EngineError {
        EngineError::MalformedDocument {
            id: self.id.to_hex(),
            reason: reason.into(),
        }
    }

    /// Decoded contents.
    pub fn body(&self) -> Result<Body> {
        match (self.kind, &self.data) {
            (ObjectKind::Object, Json::Object(map)) => {
                let mut fields = Vec::with_capacity(map.len());
                for (name, cell) in map {
                    fields.push((name.clone(), codec::from_cell(cell)?));
                }
                Ok(Body::Map(fields))
            }
            (ObjectKind::Array, Json::Array(items)) => {
                let values = items
                    .iter()
                    .map(codec::from_cell)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Body::List(values))
            }
            (kind, _) => Err(self.malformed(format!("_data does not match _type {kind}")).into()),
        }
    }

    /// Ids this object links to, with repeats.
    pub fn references(&self) -> Vec<ObjectId> {
        cell_references(&self.data)
    }

    /// As a store document.
    pub fn to_document(&self) -> Result<Document> {
        match serde_json::to_value(self) {
            Ok(Json::Object(doc)) => Ok(doc),
            Ok(_) => Err(self.malformed("did not serialize to an object").into()),
            Err(e) => Err(self.malformed(e.to_string()).into()),
        }
    }

    /// Parse a store document.
    pub fn from_document(doc: Document) -> Result<Self> {
        let id = doc
            .get(crate::constants::ID)
            .map(|v| v.to_string())
            .unwrap_or_default();
        serde_json::from_value(Json::Object(doc)).map_err(|e| {
            EngineError::MalformedDocument {
                id,
                reason: e.to_string(),
            }
            .into()
        })
    }
}
