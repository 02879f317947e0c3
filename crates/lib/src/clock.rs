//! Time source abstraction.
//!
//! Object ids embed a creation timestamp, so id generation reads time through
//! the [`Clock`] trait. Production code uses [`SystemClock`]; tests can inject a
//! [`FixedClock`] to get reproducible ids.
//!
//! ```
//! use dsheap::{Clock, SystemClock};
//!
//! let clock = SystemClock;
//! assert!(clock.now_secs() > 0);
//! ```

use std::fmt::Debug;
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(any(test, feature = "testing"))]
use std::sync::atomic::{AtomicU64, Ordering};

/// A time provider.
pub trait Clock: Send + Sync + Debug {
    /// Current time as milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;

    /// Current time as whole seconds since the Unix epoch.
    fn now_secs(&self) -> u64 {
        self.now_millis() / 1000
    }
}

/// Wall-clock time from [`std::time::SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A manually driven clock for tests.
///
/// Unlike [`SystemClock`] it never moves on its own; call [`FixedClock::advance`]
/// or [`FixedClock::set`] to change the reported time.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicU64,
}

#[cfg(any(test, feature = "testing"))]
impl FixedClock {
    /// Create a clock reporting `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Move the clock forward by `ms` milliseconds.
    pub fn advance(&self, ms: u64) {
        self.millis.fetch_add(ms, Ordering::SeqCst);
    }

    /// Set the clock to an absolute time.
    pub fn set(&self, ms: u64) {
        self.millis.store(ms, Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "testing"))]
impl Default for FixedClock {
    fn default() -> Self {
        // 2024-01-01 00:00:00 UTC
        Self::new(1_704_067_200_000)
    }
}

#[cfg(any(test, feature = "testing"))]
impl Clock for FixedClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}
