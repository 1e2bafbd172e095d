//! Abstract frame transport for gateway connections.
//!
//! The WebSocket listener and the in-memory test pipes both satisfy this trait.

use crate::error::HubResult;
use std::future::Future;

/// A bidirectional stream of text frames.
pub trait FrameTransport: Send {
    /// Receive the next text frame. `Ok(None)` means the peer closed.
    ///
    /// Must be cancel-safe: the session polls it inside `select!`.
    fn recv_text(&mut self) -> impl Future<Output = HubResult<Option<String>>> + Send;

    /// Write one text frame and flush it.
    fn send_text(&mut self, text: &str) -> impl Future<Output = HubResult<()>> + Send;

    /// Close the transport.
    fn close(&mut self) -> impl Future<Output = HubResult<()>> + Send;
}
