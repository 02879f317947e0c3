//! Recursive rendering of an object and everything it links to.

use std::collections::{HashMap, HashSet};

use super::{encode, encode_reference, quote};
use crate::id::ObjectId;
use crate::value::{Body, Value};

/// Lookup of object contents by id.
pub trait Resolver {
    /// Revision and contents of `id`, or `None` if it is not available.
    fn resolve(&self, id: &ObjectId) -> Option<(u64, Body)>;
}

impl Resolver for HashMap<ObjectId, (u64, Body)> {
    fn resolve(&self, id: &ObjectId) -> Option<(u64, Body)> {
        self.get(id).cloned()
    }
}

/// Writes a full nested snapshot of an object.
///
/// Maps render as `{"name":value,...}` and arrays as `[value,...]`. With
/// metadata enabled every object is prefixed with `#<id>:<revision>`. An object
/// that cannot be resolved, or one already written higher up the same path,
/// is written as a plain reference token.
pub struct ObjectWriter<'r, R: Resolver + ?Sized> {
    resolver: &'r R,
    metadata: bool,
}

impl<'r, R: Resolver + ?Sized> ObjectWriter<'r, R> {
    /// Writer without metadata prefixes.
    pub fn new(resolver: &'r R) -> Self {
        Self {
            resolver,
            metadata: false,
        }
    }

    /// Enable or disable `#<id>:<revision>` prefixes.
    pub fn with_metadata(mut self, metadata: bool) -> Self {
        self.metadata = metadata;
        self
    }

    /// Render `id` and its descendants.
    pub fn write(&self, id: &ObjectId) -> String {
        let mut out = String::new();
        let mut path = HashSet::new();
        self.write_object(id, &mut out, &mut path);
        out
    }

    fn write_object(&self, id: &ObjectId, out: &mut String, path: &mut HashSet<ObjectId>) {
        let Some((revision, body)) = self.resolver.resolve(id) else {
            out.push_str(&encode_reference(id));
            return;
        };
        if !path.insert(*id) {
            out.push_str(&encode_reference(id));
            return;
        }

        if self.metadata {
            out.push('#');
            out.push_str(&id.to_hex());
            out.push(':');
            out.push_str(&revision.to_string());
        }

        match &body {
            Body::Map(fields) => {
                out.push('{');
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&quote(name));
                    out.push(':');
                    self.write_value(value, out, path);
                }
                out.push('}');
            }
            Body::List(items) => {
                out.push('[');
                for (i, value) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    self.write_value(value, out, path);
                }
                out.push(']');
            }
        }

        path.remove(id);
    }

    fn write_value(&self, value: &Value, out: &mut String, path: &mut HashSet<ObjectId>) {
        match value {
            Value::Ref(child) => self.write_object(child, out, path),
            other => out.push_str(&encode(other)),
        }
    }
}
