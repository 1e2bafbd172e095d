//! Lifecycle notifications published by the gateway.

use std::net::SocketAddr;

/// Event delivered to gateway observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// The listener is bound and accepting connections.
    Started { addr: SocketAddr },
    Stopped,
    /// A listener or handshake failure. Connection-local protocol errors are
    /// logged instead.
    Error { message: String },
    /// A connection authenticated and was bound to `identity`.
    Connected { identity: String },
    /// A connection closed. `identity` is `None` if it never authenticated.
    Disconnected { identity: Option<String> },
}
