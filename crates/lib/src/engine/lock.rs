//! Distributed mutex on a single lock document.
//!
//! The lock document is `{_id, locked, owner, host, pid, rand}`. Taking the
//! lock is one conditional update from `locked: false` to `locked: true` that
//! also writes a fresh random nonce. A waiter watches the nonce: a holder that
//! keeps committing changes it on every acquisition, while a holder that died
//! leaves it unchanged. Once the nonce has been static for the configured
//! maximum wait the waiter clears the lock and takes it.
//!
//! This is a liveness heuristic. A holder that stalls longer than the maximum
//! wait and then resumes can overlap with the new holder; there is no fencing
//! token.
//!
//! [`DistributedMutex::with_lock`] also releases when its future is dropped
//! while holding the lock. The release then runs as a spawned task on the
//! current runtime; outside a runtime the lock is left to the takeover.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value as Json;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace, warn};

use super::errors::EngineError;
use crate::Result;
use crate::backend::{Document, DocumentStore, FindAndModify, Filter, Update};
use crate::constants::{HOST, ID, LOCKED, NONCE, OWNER, PID};
use crate::store::StoreConfig;

/// Attempts to recreate a vanished lock document before giving up.
const MAX_ENSURE: u32 = 3;

/// Contents of the lock document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LockState {
    pub locked: bool,
    pub owner: String,
    pub host: String,
    pub pid: u32,
    #[serde(rename = "rand")]
    pub nonce: String,
}

/// Proof of holding the lock, needed to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    nonce: String,
}

impl LockToken {
    /// Nonce written when the lock was taken.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }
}

/// Releases the lock from a spawned task unless disarmed first.
struct ReleaseOnDrop {
    mutex: Option<DistributedMutex>,
    token: LockToken,
}

impl ReleaseOnDrop {
    fn disarm(mut self) -> LockToken {
        self.mutex = None;
        self.token.clone()
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let Some(mutex) = self.mutex.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(lock_id = %mutex.lock_id, "Lock holder dropped outside a runtime");
            return;
        };
        let token = self.token.clone();
        debug!(lock_id = %mutex.lock_id, "Lock holder dropped, releasing");
        runtime.spawn(async move {
            if let Err(e) = mutex.release(&token).await {
                warn!(lock_id = %mutex.lock_id, error = %e, "Failed to release dropped lock");
            }
        });
    }
}

/// The store-wide commit lock.
#[derive(Clone)]
pub struct DistributedMutex {
    store: Arc<dyn DocumentStore>,
    lock_id: String,
    owner: String,
    host: String,
    pid: u32,
    min_delay: Duration,
    max_delay: Duration,
    max_wait: Duration,
}

impl std::fmt::Debug for DistributedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedMutex")
            .field("store", &"<DocumentStore>")
            .field("lock_id", &self.lock_id)
            .field("owner", &self.owner)
            .field("max_wait", &self.max_wait)
            .finish()
    }
}

impl DistributedMutex {
    pub fn new(store: Arc<dyn DocumentStore>, config: &StoreConfig) -> Self {
        Self {
            store,
            lock_id: config.lock_id.clone(),
            owner: config.owner.clone(),
            host: config.host.clone(),
            pid: config.pid,
            min_delay: config.lock_min_delay,
            max_delay: config.lock_max_delay,
            max_wait: config.lock_max_wait,
        }
    }

    pub fn lock_id(&self) -> &str {
        &self.lock_id
    }

    fn filter(&self) -> Filter {
        Filter::by_id(self.lock_id.as_str())
    }

    /// Create the lock document, unlocked, unless it exists.
    pub async fn ensure(&self) -> Result<()> {
        let mut doc = Document::new();
        doc.insert(ID.to_string(), Json::from(self.lock_id.as_str()));
        doc.insert(LOCKED.to_string(), Json::Bool(false));
        match self.store.insert(doc).await {
            Ok(()) => {
                debug!(lock_id = %self.lock_id, "Created lock document");
                Ok(())
            }
            Err(crate::Error::Backend(e)) if e.is_duplicate_key() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Current lock document, if it exists.
    pub async fn holder(&self) -> Result<Option<LockState>> {
        let Some(doc) = self.store.find_one(&self.filter(), None).await? else {
            return Ok(None);
        };
        serde_json::from_value(Json::Object(doc))
            .map(Some)
            .map_err(|e| {
                EngineError::MalformedDocument {
                    id: self.lock_id.clone(),
                    reason: e.to_string(),
                }
                .into()
            })
    }

    /// One attempt to take the lock.
    pub async fn try_acquire(&self) -> Result<Option<LockToken>> {
        let nonce = format!("{:016x}", rand::random::<u64>());
        let update = Update::new()
            .set(LOCKED, true)
            .set(OWNER, self.owner.as_str())
            .set(HOST, self.host.as_str())
            .set(PID, self.pid)
            .set(NONCE, nonce.as_str());
        let taken = self
            .store
            .find_and_modify(
                &self.filter().eq(LOCKED, false),
                &update,
                FindAndModify::default(),
            )
            .await?;
        Ok(taken.map(|_| LockToken { nonce }))
    }

    /// Take the lock, waiting with exponential backoff.
    ///
    /// A holder whose nonce stays unchanged for the maximum wait is cleared.
    pub async fn acquire(&self) -> Result<LockToken> {
        let mut delay = self.min_delay;
        let mut observed: Option<(String, Instant)> = None;
        let mut recreated = 0;

        loop {
            if let Some(token) = self.try_acquire().await? {
                debug!(lock_id = %self.lock_id, owner = %self.owner, "Acquired lock");
                return Ok(token);
            }

            let Some(state) = self.holder().await? else {
                recreated += 1;
                if recreated > MAX_ENSURE {
                    return Err(EngineError::LockUnavailable {
                        lock_id: self.lock_id.clone(),
                    }
                    .into());
                }
                self.ensure().await?;
                continue;
            };
            if !state.locked {
                continue;
            }

            let unchanged_since = match &observed {
                Some((nonce, since)) if *nonce == state.nonce => Some(*since),
                _ => None,
            };
            match unchanged_since {
                Some(since) if since.elapsed() >= self.max_wait => {
                    warn!(
                        lock_id = %self.lock_id,
                        holder = %state.owner,
                        host = %state.host,
                        pid = state.pid,
                        "Lock holder looks dead, taking over"
                    );
                    self.force_release(&state.nonce).await?;
                    observed = None;
                    delay = self.min_delay;
                    continue;
                }
                Some(_) => {}
                None => {
                    trace!(lock_id = %self.lock_id, holder = %state.owner, "Lock holder changed");
                    observed = Some((state.nonce, Instant::now()));
                    delay = self.min_delay;
                }
            }

            sleep(delay).await;
            delay = (delay * 2).min(self.max_delay);
        }
    }

    /// Clear the lock if it is still held with `nonce`.
    async fn force_release(&self, nonce: &str) -> Result<bool> {
        let filter = self.filter().eq(LOCKED, true).eq(NONCE, nonce);
        let cleared = self
            .store
            .update(&filter, &Update::new().set(LOCKED, false), false)
            .await?;
        Ok(cleared > 0)
    }

    /// Release the lock. Returns false if it had been taken over meanwhile.
    pub async fn release(&self, token: &LockToken) -> Result<bool> {
        let released = self.force_release(&token.nonce).await?;
        if released {
            debug!(lock_id = %self.lock_id, "Released lock");
        } else {
            warn!(lock_id = %self.lock_id, owner = %self.owner, "Lock was taken over before release");
        }
        Ok(released)
    }

    /// Run `f` holding the lock. The lock is released on every path, including
    /// cancellation; an error from `f` wins over an error from releasing.
    pub async fn with_lock<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = ReleaseOnDrop {
            mutex: Some(self.clone()),
            token: self.acquire().await?,
        };
        let result = f().await;
        let token = guard.disarm();
        let released = self.release(&token).await;
        match (result, released) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(value), Ok(_)) => Ok(value),
        }
    }
}
