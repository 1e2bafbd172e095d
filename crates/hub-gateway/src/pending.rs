//! Requests forwarded to clients that still await an answer.
//!
//! When the fabric asks a client something, the session assigns a fresh
//! correlation id, parks the [`Reply`] here and writes the `req` envelope.
//! The client's `res` envelope with that id settles it. Entries are keyed by
//! connection so one client cannot answer another's requests.

use hub_core::{FabricError, Reply, ReplyResult};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Gateway-local connection number.
pub type ConnectionId = u64;

struct PendingEntry {
    reply: Reply,
    created_at: Instant,
}

/// Map of `(connection, correlation id)` to the waiting requester.
#[derive(Default)]
pub struct PendingRequestTable {
    entries: Mutex<HashMap<(ConnectionId, String), PendingEntry>>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `reply` under `(conn, id)`.
    ///
    /// An entry already under that key is failed with `Disconnected`.
    pub async fn insert(&self, conn: ConnectionId, id: String, reply: Reply) {
        let entry = PendingEntry {
            reply,
            created_at: Instant::now(),
        };
        let mut entries = self.entries.lock().await;
        if let Some(previous) = entries.insert((conn, id.clone()), entry) {
            warn!(conn_id = conn, id = %id, "replacing pending request with same id");
            previous.reply.fail(FabricError::Disconnected);
        }
    }

    /// Settle and remove the entry. Returns `false` if nothing was pending.
    pub async fn resolve(&self, conn: ConnectionId, id: &str, outcome: ReplyResult) -> bool {
        let entry = self.entries.lock().await.remove(&(conn, id.to_string()));
        match entry {
            Some(entry) => {
                if !entry.reply.resolve(outcome) {
                    debug!(conn_id = conn, id, "requester gone before response");
                }
                true
            }
            None => false,
        }
    }

    /// Fail every entry of a closed connection with `Disconnected`.
    pub async fn evict_connection(&self, conn: ConnectionId) -> usize {
        let evicted: Vec<PendingEntry> = {
            let mut entries = self.entries.lock().await;
            let keys: Vec<_> = entries.keys().filter(|(c, _)| *c == conn).cloned().collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };
        let count = evicted.len();
        for entry in evicted {
            entry.reply.fail(FabricError::Disconnected);
        }
        if count > 0 {
            debug!(conn_id = conn, count, "evicted pending requests");
        }
        count
    }

    /// Drop entries whose requester stopped waiting.
    ///
    /// Requesters own their deadline; age alone never removes an entry.
    pub async fn prune_abandoned(&self) -> usize {
        let abandoned: Vec<PendingEntry> = {
            let mut entries = self.entries.lock().await;
            let keys: Vec<_> = entries
                .iter()
                .filter(|(_, e)| e.reply.is_abandoned())
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| entries.remove(k)).collect()
        };
        for entry in &abandoned {
            trace!(
                responder = entry.reply.responder(),
                waited_ms = entry.created_at.elapsed().as_millis() as u64,
                "dropping abandoned request"
            );
        }
        let count = abandoned.len();
        if count > 0 {
            debug!(count, "pruned abandoned requests");
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
