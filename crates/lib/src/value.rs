//! Field values stored in tracked objects.
//!
//! A [`Value`] is either a scalar or a [`Value::Ref`] link to another tracked
//! object. Objects never nest inline: a field holding a map or array always
//! holds a reference to it.
//!
//! New nested structure is written as a [`Draft`]. When a draft is assigned to
//! a field, every map or list inside it becomes a tracked object with a fresh
//! id and the field receives a reference.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec;
use crate::id::ObjectId;

/// A scalar or a reference.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent value.
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean.
    Bool(bool),
    /// IEEE-754 double, including NaN and the infinities.
    Number(f64),
    /// UTF-8 text.
    Text(String),
    /// A point in time with millisecond precision.
    Date(DateTime<Utc>),
    /// Link to another tracked object.
    Ref(ObjectId),
    /// A host value with no persistent form (a callback, a pattern, an error).
    ///
    /// It is kept in memory for the lifetime of the object but encodes as
    /// `null`.
    Opaque(String),
}

impl Value {
    /// A date truncated to the millisecond precision it is stored with.
    pub fn date(d: DateTime<Utc>) -> Self {
        Value::Date(DateTime::from_timestamp_millis(d.timestamp_millis()).unwrap_or(d))
    }

    /// The referenced id, if this is a reference.
    pub fn as_ref_id(&self) -> Option<ObjectId> {
        match self {
            Value::Ref(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns true for [`Value::Ref`].
    pub fn is_ref(&self) -> bool {
        matches!(self, Value::Ref(_))
    }

    /// Returns true for [`Value::Undefined`].
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Numeric content, if any.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Text content, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean content, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            // NaN equals NaN and -0 differs from 0, so equality follows the encoding
            (Value::Number(a), Value::Number(b)) => {
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            }
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a.timestamp_millis() == b.timestamp_millis(),
            (Value::Ref(a), Value::Ref(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&codec::encode(self))
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&codec::encode(self))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        codec::decode(&token).map_err(serde::de::Error::custom)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::date(d)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Ref(id)
    }
}

impl PartialEq<f64> for Value {
    fn eq(&self, other: &f64) -> bool {
        *self == Value::Number(*other)
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl PartialEq<bool> for Value {
    fn eq(&self, other: &bool) -> bool {
        self.as_bool() == Some(*other)
    }
}

/// Whether a tracked object is a map or an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// String-keyed fields in insertion order.
    Object,
    /// Positional items.
    Array,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Object => f.write_str("Object"),
            ObjectKind::Array => f.write_str("Array"),
        }
    }
}

/// Plain contents of an object, detached from any tracking state.
///
/// Used for newset entries, full rewrites and snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Body {
    /// Ordered map fields.
    Map(Vec<(String, Value)>),
    /// Array items.
    List(Vec<Value>),
}

impl Body {
    /// Kind of object this body belongs to.
    pub fn kind(&self) -> ObjectKind {
        match self {
            Body::Map(_) => ObjectKind::Object,
            Body::List(_) => ObjectKind::Array,
        }
    }

    /// An empty body of the given kind.
    pub fn empty(kind: ObjectKind) -> Self {
        match kind {
            ObjectKind::Object => Body::Map(Vec::new()),
            ObjectKind::Array => Body::List(Vec::new()),
        }
    }

    /// All values in field or item order.
    pub fn values(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            Body::Map(fields) => Box::new(fields.iter().map(|(_, v)| v)),
            Body::List(items) => Box::new(items.iter()),
        }
    }

    /// Ids of every object this body links to, in order, with repeats.
    pub fn references(&self) -> Vec<ObjectId> {
        self.values().filter_map(Value::as_ref_id).collect()
    }
}

/// Input form of a value that may contain new, untracked structure.
#[derive(Debug, Clone, PartialEq)]
pub enum Draft {
    /// A plain value (possibly a reference to an existing object).
    Value(Value),
    /// A new map with ordered fields.
    Map(Vec<(String, Draft)>),
    /// A new array.
    List(Vec<Draft>),
}

impl Draft {
    /// A new map from `(name, value)` pairs.
    pub fn map<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Draft>,
        I: IntoIterator<Item = (K, V)>,
    {
        Draft::Map(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// A new array from its items.
    pub fn list<V, I>(items: I) -> Self
    where
        V: Into<Draft>,
        I: IntoIterator<Item = V>,
    {
        Draft::List(items.into_iter().map(Into::into).collect())
    }

    /// An empty map.
    pub fn empty_map() -> Self {
        Draft::Map(Vec::new())
    }

    /// An empty array.
    pub fn empty_list() -> Self {
        Draft::List(Vec::new())
    }
}

impl<T: Into<Value>> From<T> for Draft {
    fn from(v: T) -> Self {
        Draft::Value(v.into())
    }
}
