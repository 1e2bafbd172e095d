//! Observer registration for lifecycle and message notifications.
//!
//! Registering returns an [`ObserverHandle`]; the observer stays registered
//! until the handle is unsubscribed or dropped.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;
type Observers<E> = DashMap<u64, Callback<E>>;

/// A set of observers for events of type `E`.
pub struct Notifier<E> {
    observers: Arc<Observers<E>>,
    next_id: AtomicU64,
}

impl<E: 'static> Notifier<E> {
    pub fn new() -> Self {
        Self {
            observers: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an observer.
    #[must_use = "dropping the handle unsubscribes the observer"]
    pub fn subscribe<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.insert(id, Arc::new(callback));
        let observers: Weak<Observers<E>> = Arc::downgrade(&self.observers);
        ObserverHandle {
            remove: Some(Box::new(move || {
                if let Some(observers) = observers.upgrade() {
                    observers.remove(&id);
                }
            })),
        }
    }

    /// Deliver `event` to every registered observer.
    ///
    /// Callbacks run outside the map's locks, so an observer may unsubscribe
    /// itself or others while being notified.
    pub fn emit(&self, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .observers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }
}

impl<E: 'static> Default for Notifier<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps an observer registered while alive.
pub struct ObserverHandle {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ObserverHandle {
    /// Remove the observer now.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }

    /// Keep the observer registered for the lifetime of the notifier.
    pub fn detach(mut self) {
        self.remove = None;
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("active", &self.remove.is_some())
            .finish()
    }
}
