//! Subscriber storage behind a channel.

use hub_core::HubResult;

/// Ordered, duplicate-free set of subscriber addresses.
///
/// Addresses arrive already normalized. A store is owned by its channel task,
/// so implementations need no internal locking.
pub trait SubscriberStore: Send + 'static {
    /// Report whether the store is usable. A channel given a store that fails
    /// this check falls back to [`MemoryStore`].
    fn check(&self) -> HubResult<()> {
        Ok(())
    }

    /// Insert `address` if absent.
    fn subscribe(&mut self, address: String) -> HubResult<()>;

    /// Remove `address`; absent addresses are not an error.
    fn unsubscribe(&mut self, address: &str) -> HubResult<()>;

    /// Current subscribers in insertion order.
    fn subscribers(&self) -> Vec<String>;
}

/// Default in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    subscribers: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubscriberStore for MemoryStore {
    fn subscribe(&mut self, address: String) -> HubResult<()> {
        if !self.subscribers.contains(&address) {
            self.subscribers.push(address);
        }
        Ok(())
    }

    fn unsubscribe(&mut self, address: &str) -> HubResult<()> {
        self.subscribers.retain(|a| a != address);
        Ok(())
    }

    fn subscribers(&self) -> Vec<String> {
        self.subscribers.clone()
    }
}
