//! Reaching a commit engine through a primary.
//!
//! Several stores can share one [`Engine`] by sending their loads and
//! transactions to a [`Primary`] instead of talking to the document store
//! themselves. Requests and replies are JSON objects tagged by `detail`:
//!
//! | request                 | reply                                   |
//! |-------------------------|-----------------------------------------|
//! | `{detail:"get", id}`    | `{detail:"update", id, object}`         |
//! | `{detail:"mtx", mtx}`   | `{detail:"ok", receipt}` or `{detail:"fail", ids, updates}` |
//!
//! Any request can also be answered with `{detail:"error", message}`.
//!
//! How messages travel is behind [`Link`]. [`ChannelLink`] moves the JSON text
//! over tokio channels to a primary task in the same process.

pub mod errors;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

pub use errors::ProtocolError;

use crate::Result;
use crate::engine::{CommitOutcome, CommitReceipt, Engine, ObjectDoc};
use crate::id::ObjectId;
use crate::mtx::Mtx;
use crate::store::{StoreError, Upstream};

/// A message to the primary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "detail", rename_all = "lowercase")]
pub enum Request {
    Get { id: ObjectId },
    Mtx { mtx: Mtx },
}

/// The primary's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "detail", rename_all = "lowercase")]
pub enum Reply {
    /// Current document of an object; `None` if it does not exist.
    Update {
        id: ObjectId,
        object: Option<ObjectDoc>,
    },
    Ok { receipt: CommitReceipt },
    /// Stale readset, with fresh documents for the stale objects.
    Fail {
        ids: Vec<ObjectId>,
        updates: Vec<ObjectDoc>,
    },
    Error { message: String },
}

impl Reply {
    /// The `detail` tag.
    pub fn detail(&self) -> &'static str {
        match self {
            Reply::Update { .. } => "update",
            Reply::Ok { .. } => "ok",
            Reply::Fail { .. } => "fail",
            Reply::Error { .. } => "error",
        }
    }

    fn unexpected(self, expected: &'static str) -> crate::Error {
        match self {
            Reply::Error { message } => ProtocolError::Remote { message }.into(),
            other => ProtocolError::UnexpectedReply {
                expected,
                got: other.detail().to_string(),
            }
            .into(),
        }
    }
}

/// Request/reply transport to a primary.
#[async_trait]
pub trait Link: Send + Sync {
    async fn call(&self, request: Request) -> Result<Reply>;
}

/// Serves [`Request`]s against an engine, one at a time.
#[derive(Debug, Clone)]
pub struct Primary {
    engine: Engine,
}

impl Primary {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Primary over `engine`, creating the root object if needed.
    pub async fn open(engine: Engine) -> Result<Self> {
        engine.prepare().await?;
        Ok(Self::new(engine))
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Answer one request. Failures become [`Reply::Error`].
    pub async fn handle(&self, request: Request) -> Reply {
        let result = match request {
            Request::Get { id } => self
                .engine
                .load(id)
                .await
                .map(|object| Reply::Update { id, object }),
            Request::Mtx { mtx } => self.engine.commit(&mtx).await.map(|outcome| match outcome {
                CommitOutcome::Committed(receipt) => Reply::Ok { receipt },
                CommitOutcome::Conflict { ids, updates } => Reply::Fail { ids, updates },
            }),
        };
        result.unwrap_or_else(|e| {
            warn!(error = %e, "Request failed on primary");
            Reply::Error {
                message: e.to_string(),
            }
        })
    }

    /// Answer one request given as JSON text.
    pub async fn handle_text(&self, text: &str) -> String {
        let reply = match serde_json::from_str::<Request>(text) {
            Ok(request) => self.handle(request).await,
            Err(e) => Reply::Error {
                message: format!("malformed request: {e}"),
            },
        };
        serde_json::to_string(&reply).unwrap_or_else(|e| {
            format!(
                r#"{{"detail":"error","message":{}}}"#,
                serde_json::Value::from(e.to_string())
            )
        })
    }

    /// Serve requests from a channel on a new task until every link is
    /// dropped.
    pub fn spawn(self, capacity: usize) -> (ChannelLink, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<(String, oneshot::Sender<String>)>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some((text, reply_to)) = rx.recv().await {
                let reply = self.handle_text(&text).await;
                if reply_to.send(reply).is_err() {
                    trace!("Requester went away before the reply");
                }
            }
            debug!("Primary stopped");
        });
        (ChannelLink { tx }, handle)
    }
}

/// In-process link to a spawned [`Primary`].
#[derive(Debug, Clone)]
pub struct ChannelLink {
    tx: mpsc::Sender<(String, oneshot::Sender<String>)>,
}

#[async_trait]
impl Link for ChannelLink {
    async fn call(&self, request: Request) -> Result<Reply> {
        let text = serde_json::to_string(&request)
            .map_err(|source| ProtocolError::Encoding { source })?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((text, reply_tx))
            .await
            .map_err(|_| ProtocolError::LinkClosed)?;
        let reply = reply_rx.await.map_err(|_| ProtocolError::LinkClosed)?;
        let reply =
            serde_json::from_str(&reply).map_err(|source| ProtocolError::Encoding { source })?;
        Ok(reply)
    }
}

/// [`Upstream`] that forwards to a primary over a [`Link`].
#[derive(Debug, Clone)]
pub struct RemoteUpstream<L> {
    link: L,
}

impl<L: Link> RemoteUpstream<L> {
    pub fn new(link: L) -> Self {
        Self { link }
    }
}

#[async_trait]
impl<L: Link> Upstream for RemoteUpstream<L> {
    async fn prepare(&self) -> Result<()> {
        match self.fetch(ObjectId::ROOT).await? {
            Some(_) => Ok(()),
            None => Err(StoreError::RootMissing.into()),
        }
    }

    async fn fetch(&self, id: ObjectId) -> Result<Option<ObjectDoc>> {
        match self.link.call(Request::Get { id }).await? {
            Reply::Update { object, .. } => Ok(object),
            other => Err(other.unexpected("update")),
        }
    }

    async fn commit(&self, mtx: &Mtx) -> Result<CommitOutcome> {
        let request = Request::Mtx { mtx: mtx.clone() };
        match self.link.call(request).await? {
            Reply::Ok { receipt } => Ok(CommitOutcome::Committed(receipt)),
            Reply::Fail { ids, updates } => Ok(CommitOutcome::Conflict { ids, updates }),
            other => Err(other.unexpected("ok")),
        }
    }
}
