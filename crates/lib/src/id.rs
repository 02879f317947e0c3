//! Object identifiers.
//!
//! Every tracked object carries a globally unique [`ObjectId`]: 12 bytes,
//! rendered as 24 lowercase hex digits. Fresh ids come from an [`IdGenerator`],
//! which lays them out as a 4-byte timestamp, 5 bytes of per-generator
//! randomness and a 3-byte counter, so ids from different processes do not
//! collide and ids from one generator sort by creation order.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use rand::{Rng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::clock::{Clock, SystemClock};
use crate::codec::CodecError;

/// Number of bytes in an [`ObjectId`].
pub const ID_BYTES: usize = 12;

/// Number of hex digits in the textual form of an [`ObjectId`].
pub const ID_HEX_LEN: usize = ID_BYTES * 2;

/// Identifier of a tracked object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId([u8; ID_BYTES]);

impl ObjectId {
    /// The well-known id of the graph root.
    pub const ROOT: ObjectId = ObjectId([0; ID_BYTES]);

    /// Build an id from raw bytes.
    pub const fn from_bytes(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the id.
    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// Returns true for [`ObjectId::ROOT`].
    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse exactly 24 hex digits.
    pub fn parse(s: &str) -> Result<Self, CodecError> {
        if s.len() != ID_HEX_LEN {
            return Err(CodecError::InvalidReference {
                text: s.to_string(),
            });
        }
        let mut bytes = [0u8; ID_BYTES];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| CodecError::InvalidReference {
            text: s.to_string(),
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<ObjectId> for serde_json::Value {
    fn from(id: ObjectId) -> Self {
        serde_json::Value::String(id.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ObjectId {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Source of fresh [`ObjectId`]s.
#[derive(Debug)]
pub struct IdGenerator {
    clock: Arc<dyn Clock>,
    salt: [u8; 5],
    counter: AtomicU32,
}

impl IdGenerator {
    /// Generator stamping ids with system time.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Generator stamping ids with the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; 5];
        rng.fill_bytes(&mut salt);
        Self {
            clock,
            salt,
            counter: AtomicU32::new(rng.r#gen::<u32>() & 0x00ff_ffff),
        }
    }

    /// Produce the next id.
    pub fn next_id(&self) -> ObjectId {
        let secs = self.clock.now_secs() as u32;
        let count = self.counter.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

        let mut bytes = [0u8; ID_BYTES];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&self.salt);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);
        ObjectId(bytes)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
