//! Ordered property-name signatures of tracked objects.
//!
//! Every tracked object remembers the shape it had when it was last
//! committed. Diffing the current field names against that shape finds fields
//! that were added or removed without going through a tracked accessor.
//!
//! Map shapes are interned in a [`ShapeRegistry`] keyed by the codec encoding
//! of their names, so objects with the same layout share one allocation and
//! compare cheaply.

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec;
use crate::value::Value;

/// Committed layout of an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// Field names of a map, in order.
    Map(Arc<[String]>),
    /// Length of an array.
    List(usize),
}

impl Shape {
    /// Number of properties in the shape.
    pub fn len(&self) -> usize {
        match self {
            Shape::Map(names) => names.len(),
            Shape::List(len) => *len,
        }
    }

    /// Returns true if the shape has no properties.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Property names; array indexes render as decimal strings.
    pub fn names(&self) -> Vec<String> {
        match self {
            Shape::Map(names) => names.to_vec(),
            Shape::List(len) => (0..*len).map(|i| i.to_string()).collect(),
        }
    }

    /// Compare map field names against this shape.
    pub fn diff(&self, current: &[&str]) -> ShapeDiff {
        let old = self.names();
        let missing = old
            .iter()
            .filter(|name| !current.contains(&name.as_str()))
            .cloned()
            .collect();
        let added = current
            .iter()
            .filter(|name| !old.iter().any(|o| o == *name))
            .map(|name| name.to_string())
            .collect();
        ShapeDiff { missing, added }
    }
}

/// Result of [`Shape::diff`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapeDiff {
    /// Names in the shape that are no longer present.
    pub missing: Vec<String>,
    /// Present names not in the shape.
    pub added: Vec<String>,
}

impl ShapeDiff {
    /// Returns true when nothing was added or removed.
    pub fn is_unchanged(&self) -> bool {
        self.missing.is_empty() && self.added.is_empty()
    }
}

/// Interning cache for map shapes.
#[derive(Debug, Default)]
pub struct ShapeRegistry {
    shapes: HashMap<String, Arc<[String]>>,
}

impl ShapeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signature of an ordered list of names.
    pub fn signature<'a, I>(names: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        codec::encode_all(
            names
                .into_iter()
                .map(|n| Value::Text(n.to_string()))
                .collect::<Vec<_>>()
                .iter(),
        )
    }

    /// Interned map shape for these names.
    pub fn map_shape<'a, I>(&mut self, names: I) -> Shape
    where
        I: IntoIterator<Item = &'a str> + Clone,
    {
        let signature = Self::signature(names.clone());
        let interned = self
            .shapes
            .entry(signature)
            .or_insert_with(|| names.into_iter().map(str::to_string).collect());
        Shape::Map(Arc::clone(interned))
    }

    /// Array shape of the given length.
    pub fn list_shape(&self, len: usize) -> Shape {
        Shape::List(len)
    }

    /// Number of distinct map shapes seen.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Returns true if no map shape has been interned.
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}
