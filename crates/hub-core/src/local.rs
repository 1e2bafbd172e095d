//! In-process fabric.
//!
//! Routes by exact address first. A bare destination with no exact match is
//! routed to one registered full address with the same bare form.

use crate::address;
use crate::error::{FabricError, HubError, HubResult};
use crate::fabric::{Actor, Delivery, Fabric, Reply, ReplyResult};
use dashmap::DashMap;
use futures_util::future::{self, BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace};

const REMOVAL_BUFFER: usize = 256;

/// Fabric keeping every actor in this process.
pub struct LocalFabric {
    actors: DashMap<String, Arc<dyn Actor>>,
    removed_tx: broadcast::Sender<String>,
}

impl LocalFabric {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            actors: DashMap::new(),
            removed_tx: broadcast::channel(REMOVAL_BUFFER).0,
        })
    }

    /// All registered addresses, sorted.
    pub fn addresses(&self) -> Vec<String> {
        let mut list: Vec<String> = self.actors.iter().map(|e| e.key().clone()).collect();
        list.sort();
        list
    }

    fn resolve(&self, to: &str) -> Option<(String, Arc<dyn Actor>)> {
        if let Some(actor) = self.actors.get(to) {
            return Some((to.to_string(), actor.value().clone()));
        }
        if address::is_full(to) {
            return None;
        }
        // Lowest matching full address keeps routing deterministic.
        self.actors
            .iter()
            .filter(|e| address::bare(e.key()) == to)
            .map(|e| (e.key().clone(), e.value().clone()))
            .min_by(|a, b| a.0.cmp(&b.0))
    }
}

impl Fabric for LocalFabric {
    fn add_actor(&self, address: &str, actor: Arc<dyn Actor>) -> HubResult<()> {
        use dashmap::mapref::entry::Entry;
        match self.actors.entry(address.to_string()) {
            Entry::Occupied(_) => Err(HubError::AddressInUse(address.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(actor);
                debug!(address, "actor added");
                Ok(())
            }
        }
    }

    fn remove_actor(&self, address: &str) -> bool {
        if self.actors.remove(address).is_none() {
            return false;
        }
        debug!(address, "actor removed");
        // No receivers is fine: nobody tracks this address.
        let _ = self.removed_tx.send(address.to_string());
        true
    }

    fn send(&self, from: &str, to: &str, content: Value) -> HubResult<()> {
        let (target, actor) = self
            .resolve(to)
            .ok_or_else(|| HubError::NotFound(to.to_string()))?;
        trace!(from, to = %target, "send");
        actor.receive(Delivery {
            from: from.to_string(),
            to: target,
            content,
            reply: None,
        });
        Ok(())
    }

    fn request(
        &self,
        from: &str,
        to: &str,
        content: Value,
        timeout: Duration,
    ) -> BoxFuture<'static, ReplyResult> {
        let Some((target, actor)) = self.resolve(to) else {
            return future::ready(Err(FabricError::NotFound(to.to_string()))).boxed();
        };
        trace!(from, to = %target, timeout_ms = timeout.as_millis() as u64, "request");

        let (reply, rx) = Reply::new(target.clone());
        actor.receive(Delivery {
            from: from.to_string(),
            to: target,
            content,
            reply: Some(reply),
        });

        async move {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(FabricError::Disconnected),
                Err(_) => Err(FabricError::Timeout),
            }
        }
        .boxed()
    }

    fn removals(&self) -> broadcast::Receiver<String> {
        self.removed_tx.subscribe()
    }

    fn contains(&self, address: &str) -> bool {
        self.actors.contains_key(address)
    }
}
