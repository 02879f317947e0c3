//! Application of filters, projections and updates to JSON documents.

use serde_json::Value as Json;

use crate::backend::errors::BackendError;
use crate::backend::{Document, FieldPath, Filter, Update, UpdateOp};
use crate::constants::{ID, MAX_ARRAY_LEN};

type Result<T> = std::result::Result<T, BackendError>;

/// Apply `update` to `doc`. On error `doc` may be partially modified, so
/// callers work on a copy.
pub(super) fn apply(doc: &mut Document, update: &Update) -> Result<()> {
    match update {
        Update::Replace(next) => {
            let mut replaced = Document::new();
            if let Some(id) = doc.get(ID) {
                replaced.insert(ID.to_string(), id.clone());
            }
            for (key, value) in next {
                if key != ID {
                    replaced.insert(key.clone(), value.clone());
                }
            }
            *doc = replaced;
            Ok(())
        }
        Update::Modify(ops) => {
            let mut root = Json::Object(std::mem::take(doc));
            let result = ops.iter().try_for_each(|op| apply_op(&mut root, op));
            if let Json::Object(map) = root {
                *doc = map;
            }
            result
        }
    }
}

/// Document inserted by an upsert: the filter's equalities, then the update.
pub(super) fn upsert_document(filter: &Filter, update: &Update) -> Result<Document> {
    let mut root = Json::Object(Document::new());
    for (path, value) in filter.conditions() {
        apply_op(&mut root, &UpdateOp::Set(path.clone(), value.clone()))?;
    }
    let Json::Object(mut doc) = root else {
        return Err(BackendError::MissingId);
    };
    if !doc.contains_key(ID) {
        return Err(BackendError::MissingId);
    }
    apply(&mut doc, update)?;
    Ok(doc)
}

/// `_id` plus the requested paths.
pub(super) fn project(doc: &Document, projection: Option<&[FieldPath]>) -> Document {
    let Some(paths) = projection else {
        return doc.clone();
    };
    let mut root = Json::Object(Document::new());
    let id_path = FieldPath::field(ID);
    for path in std::iter::once(&id_path).chain(paths) {
        if let Some(value) = path.lookup(doc) {
            // Lookups succeeded on the source, so the target path only crosses objects.
            let _ = apply_op(&mut root, &UpdateOp::Set(path.clone(), value.clone()));
        }
    }
    match root {
        Json::Object(map) => map,
        _ => Document::new(),
    }
}

fn invalid(path: &FieldPath, reason: impl Into<String>) -> BackendError {
    BackendError::InvalidPath {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn parse_index(path: &FieldPath, segment: &str) -> Result<usize> {
    match segment.parse::<usize>() {
        Ok(index) if index < MAX_ARRAY_LEN => Ok(index),
        Ok(_) => Err(invalid(path, format!("index {segment} is out of range"))),
        Err(_) => Err(invalid(path, format!("{segment:?} is not an array index"))),
    }
}

/// Container holding the last segment of `path`.
///
/// Missing object parents are created when `create` is set; missing array
/// items never are.
fn parent_mut<'j, 'p>(
    root: &'j mut Json,
    path: &'p FieldPath,
    create: bool,
) -> Result<Option<(&'j mut Json, &'p str)>> {
    let Some((last, parents)) = path.segments().split_last() else {
        return Err(invalid(path, "empty path"));
    };
    let mut current = root;
    for segment in parents {
        current = match current {
            Json::Object(map) => {
                if !map.contains_key(segment) {
                    if !create {
                        return Ok(None);
                    }
                    map.insert(segment.clone(), Json::Object(Document::new()));
                }
                match map.get_mut(segment) {
                    Some(child) => child,
                    None => return Ok(None),
                }
            }
            Json::Array(items) => {
                let index = parse_index(path, segment)?;
                match items.get_mut(index) {
                    Some(child) => child,
                    None => return Ok(None),
                }
            }
            _ => return Err(invalid(path, format!("{segment:?} has a scalar parent"))),
        };
    }
    Ok(Some((current, last.as_str())))
}

fn child_mut<'j>(parent: &'j mut Json, path: &FieldPath, last: &str) -> Result<Option<&'j mut Json>> {
    match parent {
        Json::Object(map) => Ok(map.get_mut(last)),
        Json::Array(items) => Ok(items.get_mut(parse_index(path, last)?)),
        _ => Err(invalid(path, "parent is a scalar")),
    }
}

fn set_child(parent: &mut Json, path: &FieldPath, last: &str, value: Json) -> Result<()> {
    match parent {
        Json::Object(map) => {
            map.insert(last.to_string(), value);
            Ok(())
        }
        Json::Array(items) => {
            let index = parse_index(path, last)?;
            if index < items.len() {
                items[index] = value;
            } else {
                items.resize(index, Json::Null);
                items.push(value);
            }
            Ok(())
        }
        _ => Err(invalid(path, "parent is a scalar")),
    }
}

fn apply_op(root: &mut Json, op: &UpdateOp) -> Result<()> {
    match op {
        UpdateOp::Set(path, value) => {
            let (parent, last) = parent_mut(root, path, true)?
                .ok_or_else(|| invalid(path, "array item does not exist"))?;
            set_child(parent, path, last, value.clone())
        }
        UpdateOp::Unset(path) => {
            let Some((parent, last)) = parent_mut(root, path, false)? else {
                return Ok(());
            };
            match parent {
                Json::Object(map) => map.retain(|key, _| key != last),
                Json::Array(items) => {
                    if let Some(item) = items.get_mut(parse_index(path, last)?) {
                        *item = Json::Null;
                    }
                }
                _ => return Err(invalid(path, "parent is a scalar")),
            }
            Ok(())
        }
        UpdateOp::Inc(path, by) => {
            let (parent, last) = parent_mut(root, path, true)?
                .ok_or_else(|| invalid(path, "array item does not exist"))?;
            let current = match child_mut(parent, path, last)? {
                None => 0,
                Some(value) => value.as_i64().ok_or_else(|| BackendError::NotAnInteger {
                    path: path.to_string(),
                })?,
            };
            set_child(parent, path, last, Json::from(current + by))
        }
        UpdateOp::PopFirst(path) | UpdateOp::PopLast(path) => {
            let Some((parent, last)) = parent_mut(root, path, false)? else {
                return Ok(());
            };
            match child_mut(parent, path, last)? {
                None => Ok(()),
                Some(Json::Array(items)) => {
                    if !items.is_empty() {
                        if matches!(op, UpdateOp::PopFirst(_)) {
                            items.remove(0);
                        } else {
                            items.pop();
                        }
                    }
                    Ok(())
                }
                Some(_) => Err(BackendError::NotAnArray {
                    path: path.to_string(),
                }),
            }
        }
        UpdateOp::InsertAt { path, at, values } => {
            let (parent, last) = parent_mut(root, path, true)?
                .ok_or_else(|| invalid(path, "array item does not exist"))?;
            if child_mut(parent, path, last)?.is_none() {
                set_child(parent, path, last, Json::Array(Vec::new()))?;
            }
            match child_mut(parent, path, last)? {
                Some(Json::Array(items)) => {
                    let at = (*at).min(items.len());
                    let tail = items.split_off(at);
                    items.extend(values.iter().cloned());
                    items.extend(tail);
                    Ok(())
                }
                _ => Err(BackendError::NotAnArray {
                    path: path.to_string(),
                }),
            }
        }
    }
}
