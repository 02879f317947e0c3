//! Store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::StoreError;
use crate::Result;
use crate::constants::DEFAULT_LOCK_ID;

/// Settings for a [`Store`](super::Store) and its commit engine.
///
/// Every field has a default, so a config document only needs the fields
/// it changes. Durations are written as integer milliseconds.
///
/// ```
/// # use dsheap::StoreConfig;
/// let config = StoreConfig::from_json(r#"{"lock_max_wait": 500, "owner": "worker-1"}"#).unwrap();
/// assert_eq!(config.lock_max_wait.as_millis(), 500);
/// assert_eq!(config.lock_id, "mutex");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `_id` of the lock document.
    pub lock_id: String,
    /// First backoff delay while the lock is held elsewhere.
    #[serde(with = "millis")]
    pub lock_min_delay: Duration,
    /// Backoff delays double up to this value.
    #[serde(with = "millis")]
    pub lock_max_delay: Duration,
    /// A holder whose nonce stays unchanged this long is presumed dead.
    #[serde(with = "millis")]
    pub lock_max_wait: Duration,
    /// Handler invocations allowed per request.
    pub max_attempts: u32,
    /// Written to the lock document while held.
    pub owner: String,
    pub host: String,
    pub pid: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_id: DEFAULT_LOCK_ID.to_string(),
            lock_min_delay: Duration::from_millis(1),
            lock_max_delay: Duration::from_millis(256),
            lock_max_wait: Duration::from_secs(10),
            max_attempts: 64,
            owner: format!("dsheap-{:08x}", rand::random::<u32>()),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            pid: std::process::id(),
        }
    }
}

impl StoreConfig {
    /// Parse a JSON config document and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| StoreError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings are consistent.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| -> crate::Error {
            StoreError::InvalidConfig {
                reason: reason.to_string(),
            }
            .into()
        };
        if self.lock_id.is_empty() {
            return Err(invalid("lock_id is empty"));
        }
        if self.lock_min_delay.is_zero() {
            return Err(invalid("lock_min_delay must be positive"));
        }
        if self.lock_max_delay < self.lock_min_delay {
            return Err(invalid("lock_max_delay is below lock_min_delay"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be at least 1"));
        }
        Ok(())
    }

    pub fn with_lock_id(mut self, lock_id: impl Into<String>) -> Self {
        self.lock_id = lock_id.into();
        self
    }

    /// Set the backoff range.
    pub fn with_lock_delays(mut self, min: Duration, max: Duration) -> Self {
        self.lock_min_delay = min;
        self.lock_max_delay = max;
        self
    }

    pub fn with_lock_max_wait(mut self, max_wait: Duration) -> Self {
        self.lock_max_wait = max_wait;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
