//! In-process transport pair.
//!
//! Lets a session run without a socket: the [`MemoryPeer`] plays the client.
//! Used by tests and by embedders bridging their own connections.

use hub_core::{codec, Envelope, FrameTransport, HubError, HubResult};
use tokio::sync::mpsc;

/// Gateway side of an in-memory connection.
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

/// Client side of an in-memory connection.
///
/// Dropping the peer (or calling [`MemoryPeer::hang_up`]) closes the
/// connection from the client's end.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

/// Create a connected transport/peer pair.
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (client_tx, inbound) = mpsc::unbounded_channel();
    let (outbound, client_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport { inbound, outbound },
        MemoryPeer {
            tx: Some(client_tx),
            rx: client_rx,
        },
    )
}

impl FrameTransport for MemoryTransport {
    async fn recv_text(&mut self) -> HubResult<Option<String>> {
        Ok(self.inbound.recv().await)
    }

    async fn send_text(&mut self, text: &str) -> HubResult<()> {
        self.outbound
            .send(text.to_string())
            .map_err(|_| HubError::Transport("peer hung up".into()))
    }

    async fn close(&mut self) -> HubResult<()> {
        self.inbound.close();
        Ok(())
    }
}

impl MemoryPeer {
    /// Send a raw frame. Returns `false` once the gateway side is gone.
    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        match &self.tx {
            Some(tx) => tx.send(text.into()).is_ok(),
            None => false,
        }
    }

    pub fn send(&self, envelope: &Envelope) -> bool {
        match codec::encode(envelope) {
            Some(text) => self.send_raw(text),
            None => false,
        }
    }

    /// Next frame written by the gateway; `None` once it closed.
    pub async fn recv_raw(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Next decodable envelope written by the gateway.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let text = self.rx.recv().await?;
            if let Some(envelope) = codec::decode::<Envelope>(&text) {
                return Some(envelope);
            }
        }
    }

    /// Close the client end.
    pub fn hang_up(&mut self) {
        self.tx = None;
    }
}
