//! A single pub/sub channel.
//!
//! Each channel is one task owning its [`SubscriberStore`]. Publishes,
//! subscription changes, and fabric removal notifications all go through the
//! task's mailbox, so the subscriber set has a single writer.

use crate::store::SubscriberStore;
use hub_core::address::{self, AddressMode};
use hub_core::{Fabric, FabricError, HubError, HubResult, Notifier, ObserverHandle, Reply};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Address suffix of the subscription entry point.
pub const SUBSCRIBE_SUFFIX: &str = "#subscribe";
/// Address suffix of the unsubscription entry point.
pub const UNSUBSCRIBE_SUFFIX: &str = "#unsubscribe";

/// A message published on a channel, as seen by `on_message` observers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub channel: String,
    pub from: String,
    pub content: Value,
}

pub(crate) enum Command {
    Publish {
        from: String,
        content: Value,
    },
    Subscribe {
        address: String,
        mode: AddressMode,
        reply: Option<Reply>,
    },
    Unsubscribe {
        address: String,
        mode: AddressMode,
        reply: Option<Reply>,
    },
    Subscribers(oneshot::Sender<Vec<String>>),
    Close,
}

/// Handle to a running channel.
#[derive(Clone)]
pub struct Channel {
    id: String,
    commands: mpsc::UnboundedSender<Command>,
    messages: Arc<Notifier<ChannelMessage>>,
}

impl Channel {
    pub(crate) fn spawn(
        id: String,
        fabric: Arc<dyn Fabric>,
        store: Box<dyn SubscriberStore>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let messages = Arc::new(Notifier::new());
        let task = ChannelTask {
            id: id.clone(),
            removals: fabric.removals(),
            fabric,
            store,
            messages: messages.clone(),
        };
        tokio::spawn(task.run(rx));
        Self {
            id,
            commands: tx,
            messages,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Address a client subscribes through.
    pub fn subscribe_address(&self) -> String {
        format!("{}{SUBSCRIBE_SUFFIX}", self.id)
    }

    pub fn unsubscribe_address(&self) -> String {
        format!("{}{UNSUBSCRIBE_SUFFIX}", self.id)
    }

    /// Register an observer for every message published on this channel.
    #[must_use = "dropping the handle unsubscribes the observer"]
    pub fn on_message<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        self.messages.subscribe(callback)
    }

    /// Publish `content` to every current subscriber.
    pub fn publish(&self, from: &str, content: Value) -> HubResult<()> {
        self.command(Command::Publish {
            from: from.to_string(),
            content,
        })
    }

    pub async fn subscribe(&self, address: &str, mode: AddressMode) -> HubResult<()> {
        let (reply, rx) = Reply::new(self.id.clone());
        self.command(Command::Subscribe {
            address: address.to_string(),
            mode,
            reply: Some(reply),
        })?;
        settle(rx).await
    }

    pub async fn unsubscribe(&self, address: &str, mode: AddressMode) -> HubResult<()> {
        let (reply, rx) = Reply::new(self.id.clone());
        self.command(Command::Unsubscribe {
            address: address.to_string(),
            mode,
            reply: Some(reply),
        })?;
        settle(rx).await
    }

    /// Snapshot of the subscriber set.
    pub async fn subscribers(&self) -> HubResult<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Subscribers(tx))?;
        rx.await.map_err(|_| closed(&self.id))
    }

    pub(crate) fn mailbox(&self) -> mpsc::UnboundedSender<Command> {
        self.commands.clone()
    }

    pub(crate) fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    fn command(&self, command: Command) -> HubResult<()> {
        self.commands.send(command).map_err(|_| closed(&self.id))
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}

async fn settle(rx: oneshot::Receiver<hub_core::ReplyResult>) -> HubResult<()> {
    match rx.await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(HubError::Other(e.to_string())),
        Err(_) => Err(HubError::Other("channel closed".into())),
    }
}

fn closed(id: &str) -> HubError {
    HubError::NotFound(format!("channel {id} is closed"))
}

/// Read the addressing mode from a subscription request's content.
///
/// Absent content or an absent `mode` means [`AddressMode::Full`].
pub(crate) fn mode_from_content(content: &Value) -> Result<AddressMode, String> {
    match content.get("mode") {
        None | Some(Value::Null) => Ok(AddressMode::Full),
        Some(mode) => serde_json::from_value(mode.clone())
            .map_err(|_| format!("unknown subscription mode: {mode}")),
    }
}

struct ChannelTask {
    id: String,
    fabric: Arc<dyn Fabric>,
    store: Box<dyn SubscriberStore>,
    removals: broadcast::Receiver<String>,
    messages: Arc<Notifier<ChannelMessage>>,
}

impl ChannelTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        let mut watching = true;
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Close) | None => break,
                    Some(command) => self.handle(command),
                },
                removed = self.removals.recv(), if watching => match removed {
                    Ok(address) => self.prune(&address),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(channel = %self.id, skipped, "missed actor removal notifications");
                        self.reconcile();
                    }
                    Err(RecvError::Closed) => watching = false,
                },
            }
        }
        debug!(channel = %self.id, "channel task stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Publish { from, content } => self.publish(from, content),
            Command::Subscribe {
                address,
                mode,
                reply,
            } => {
                let address = address::normalize(&address, mode);
                let outcome = self.store.subscribe(address.clone());
                if outcome.is_ok() {
                    info!(channel = %self.id, subscriber = %address, "subscribed");
                }
                answer(reply, outcome, json!({ "subscribed": address }));
            }
            Command::Unsubscribe {
                address,
                mode,
                reply,
            } => {
                let address = address::normalize(&address, mode);
                let outcome = self.store.unsubscribe(&address);
                if outcome.is_ok() {
                    info!(channel = %self.id, subscriber = %address, "unsubscribed");
                }
                answer(reply, outcome, json!({ "unsubscribed": address }));
            }
            Command::Subscribers(tx) => {
                let _ = tx.send(self.store.subscribers());
            }
            Command::Close => {}
        }
    }

    fn publish(&self, from: String, content: Value) {
        let subscribers = self.store.subscribers();
        trace!(channel = %self.id, from = %from, count = subscribers.len(), "publish");
        self.messages.emit(&ChannelMessage {
            channel: self.id.clone(),
            from,
            content: content.clone(),
        });
        for subscriber in subscribers {
            if let Err(e) = self.fabric.send(&self.id, &subscriber, content.clone()) {
                debug!(channel = %self.id, subscriber = %subscriber, error = %e, "fan-out delivery failed");
            }
        }
    }

    fn prune(&mut self, removed: &str) {
        if !self.store.subscribers().iter().any(|s| s == removed) {
            return;
        }
        match self.store.unsubscribe(removed) {
            Ok(()) => info!(channel = %self.id, subscriber = %removed, "pruned removed actor"),
            Err(e) => warn!(channel = %self.id, subscriber = %removed, error = %e, "failed to prune removed actor"),
        }
    }

    /// Drop full-address subscribers the fabric no longer knows. Runs after
    /// removal notifications were missed.
    fn reconcile(&mut self) {
        for subscriber in self.store.subscribers() {
            if address::is_full(&subscriber) && !self.fabric.contains(&subscriber) {
                self.prune(&subscriber);
            }
        }
    }
}

fn answer(reply: Option<Reply>, outcome: HubResult<()>, content: Value) {
    let Some(reply) = reply else { return };
    match outcome {
        Ok(()) => {
            reply.ok(content);
        }
        Err(e) => {
            reply.fail(FabricError::Rejected(Value::String(e.to_string())));
        }
    }
}
