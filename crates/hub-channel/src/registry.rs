//! Channel registry: creates channels and binds them to the fabric.
//!
//! Every channel `id` occupies three fabric addresses:
//! - `id`: publish target; anything sent there is fanned out
//! - `id#subscribe`: the sender subscribes itself
//! - `id#unsubscribe`: the sender unsubscribes itself
//!
//! Subscription requests may carry `{"mode": "bare" | "full"}` as content.

use crate::channel::{mode_from_content, Channel, Command, SUBSCRIBE_SUFFIX, UNSUBSCRIBE_SUFFIX};
use crate::store::{MemoryStore, SubscriberStore};
use dashmap::DashMap;
use hub_core::{Actor, Delivery, Fabric, FabricError, HubError, HubResult};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Owns every channel created on one fabric.
pub struct ChannelRegistry {
    fabric: Arc<dyn Fabric>,
    channels: DashMap<String, Channel>,
}

impl ChannelRegistry {
    pub fn new(fabric: Arc<dyn Fabric>) -> Self {
        Self {
            fabric,
            channels: DashMap::new(),
        }
    }

    /// Create channel `id`, backed by `store` or the in-memory default.
    ///
    /// Must be called from within a tokio runtime.
    pub fn create_channel(
        &self,
        id: &str,
        store: Option<Box<dyn SubscriberStore>>,
    ) -> HubResult<Channel> {
        if self.channels.contains_key(id) {
            return Err(HubError::AddressInUse(id.to_string()));
        }

        let store = match store {
            Some(store) => match store.check() {
                Ok(()) => store,
                Err(e) => {
                    warn!(channel = %id, error = %e, "invalid subscriber store, using in-memory default");
                    Box::new(MemoryStore::new())
                }
            },
            None => Box::new(MemoryStore::new()),
        };

        let channel = Channel::spawn(id.to_string(), self.fabric.clone(), store);
        if let Err(e) = self.bind(&channel) {
            channel.close();
            return Err(e);
        }

        self.channels.insert(id.to_string(), channel.clone());
        info!(channel = %id, "channel created");
        Ok(channel)
    }

    pub fn get(&self, id: &str) -> Option<Channel> {
        self.channels.get(id).map(|c| c.value().clone())
    }

    /// Ids of all live channels, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.iter().map(|c| c.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Stop channel `id` and release its fabric addresses.
    pub fn remove_channel(&self, id: &str) -> bool {
        let Some((_, channel)) = self.channels.remove(id) else {
            return false;
        };
        for address in [
            id.to_string(),
            channel.subscribe_address(),
            channel.unsubscribe_address(),
        ] {
            self.fabric.remove_actor(&address);
        }
        channel.close();
        info!(channel = %id, "channel removed");
        true
    }

    fn bind(&self, channel: &Channel) -> HubResult<()> {
        let entries: [(String, Arc<dyn Actor>); 3] = [
            (channel.id().to_string(), publish_actor(channel.mailbox())),
            (
                format!("{}{SUBSCRIBE_SUFFIX}", channel.id()),
                subscription_actor(channel.mailbox(), true),
            ),
            (
                format!("{}{UNSUBSCRIBE_SUFFIX}", channel.id()),
                subscription_actor(channel.mailbox(), false),
            ),
        ];

        let mut bound: Vec<String> = Vec::with_capacity(entries.len());
        for (address, actor) in entries {
            if let Err(e) = self.fabric.add_actor(&address, actor) {
                for added in &bound {
                    self.fabric.remove_actor(added);
                }
                return Err(e);
            }
            bound.push(address);
        }
        Ok(())
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        let ids: Vec<String> = self.channels.iter().map(|c| c.key().clone()).collect();
        for id in ids {
            self.remove_channel(&id);
        }
    }
}

fn publish_actor(mailbox: mpsc::UnboundedSender<Command>) -> Arc<dyn Actor> {
    Arc::new(move |delivery: Delivery| {
        let Delivery {
            from,
            content,
            reply,
            ..
        } = delivery;
        if mailbox.send(Command::Publish { from, content }).is_err() {
            if let Some(reply) = reply {
                reply.fail(FabricError::Disconnected);
            }
        } else if let Some(reply) = reply {
            // Publishing is not acknowledged per subscriber; the publisher
            // only learns the message was accepted.
            reply.ok(Value::Null);
        }
    })
}

fn subscription_actor(mailbox: mpsc::UnboundedSender<Command>, subscribe: bool) -> Arc<dyn Actor> {
    Arc::new(move |delivery: Delivery| {
        let Delivery {
            from,
            content,
            reply,
            ..
        } = delivery;
        let mode = match mode_from_content(&content) {
            Ok(mode) => mode,
            Err(reason) => {
                warn!(subscriber = %from, %reason, "rejected subscription request");
                if let Some(reply) = reply {
                    reply.fail(FabricError::Rejected(Value::String(reason)));
                }
                return;
            }
        };
        let command = if subscribe {
            Command::Subscribe {
                address: from,
                mode,
                reply,
            }
        } else {
            Command::Unsubscribe {
                address: from,
                mode,
                reply,
            }
        };
        // A closed mailbox drops the reply, which the requester sees as
        // a disconnect.
        let _ = mailbox.send(command);
    })
}
