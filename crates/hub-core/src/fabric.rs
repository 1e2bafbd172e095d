//! Contract of the actor-addressable messaging fabric.
//!
//! The gateway and channels only talk to the fabric through [`Fabric`].
//! [`crate::local::LocalFabric`] is the in-process implementation.

use crate::error::{FabricError, HubResult};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

/// Successful answer to a fabric request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Address that answered.
    pub from: String,
    pub content: Value,
}

pub type ReplyResult = Result<Response, FabricError>;

/// Single-use continuation answering one request.
///
/// Resolving consumes the reply, so a request is answered at most once.
/// Dropping an unresolved reply reports [`FabricError::Disconnected`] to the
/// requester.
#[derive(Debug)]
pub struct Reply {
    responder: String,
    tx: oneshot::Sender<ReplyResult>,
}

impl Reply {
    /// Create a reply answered on behalf of `responder`, plus the receiving end.
    pub fn new(responder: impl Into<String>) -> (Self, oneshot::Receiver<ReplyResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                responder: responder.into(),
                tx,
            },
            rx,
        )
    }

    pub fn responder(&self) -> &str {
        &self.responder
    }

    /// Whether the requester has stopped waiting.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    /// Answer with `content`. Returns `false` if the requester is gone.
    pub fn ok(self, content: Value) -> bool {
        let from = self.responder.clone();
        self.resolve(Ok(Response { from, content }))
    }

    /// Answer with an error. Returns `false` if the requester is gone.
    pub fn fail(self, err: FabricError) -> bool {
        self.resolve(Err(err))
    }

    pub fn resolve(self, outcome: ReplyResult) -> bool {
        self.tx.send(outcome).is_ok()
    }
}

/// A message delivered to an actor.
#[derive(Debug)]
pub struct Delivery {
    pub from: String,
    /// Address the message was routed to.
    pub to: String,
    pub content: Value,
    /// Present when the sender waits for an answer.
    pub reply: Option<Reply>,
}

/// Something reachable at a fabric address.
///
/// `receive` runs on the sender's task and must not block; actors that need
/// to do async work hand the delivery to their own task.
pub trait Actor: Send + Sync {
    fn receive(&self, delivery: Delivery);
}

impl<F> Actor for F
where
    F: Fn(Delivery) + Send + Sync,
{
    fn receive(&self, delivery: Delivery) {
        self(delivery)
    }
}

/// The actor-messaging fabric.
pub trait Fabric: Send + Sync {
    /// Bind `actor` to `address`.
    fn add_actor(&self, address: &str, actor: Arc<dyn Actor>) -> HubResult<()>;

    /// Unbind `address`. Returns whether it was registered; a removal is
    /// announced on [`Fabric::removals`].
    fn remove_actor(&self, address: &str) -> bool;

    /// Fire-and-forget delivery.
    fn send(&self, from: &str, to: &str, content: Value) -> HubResult<()>;

    /// Deliver and wait up to `timeout` for the answer.
    ///
    /// The message is dispatched before this returns; the future only waits
    /// for the answer, so requests issued in sequence arrive in sequence.
    fn request(
        &self,
        from: &str,
        to: &str,
        content: Value,
        timeout: Duration,
    ) -> BoxFuture<'static, ReplyResult>;

    /// Stream of addresses removed from the fabric.
    fn removals(&self) -> broadcast::Receiver<String>;

    fn contains(&self, address: &str) -> bool;
}
