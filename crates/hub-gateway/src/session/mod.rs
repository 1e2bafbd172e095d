//! Per-connection session handling.
//!
//! Each accepted transport gets one session task. The session is
//! the only writer of its transport; fabric deliveries and completed requests
//! reach it through its mailbox.

mod actor;
mod connection;

pub(crate) use connection::ConnectionSession;

use hub_core::{Delivery, Envelope};
use tokio::sync::mpsc;

/// Authentication state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no successful login yet.
    Pending,
    Authenticated,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the transport.
    PeerClosed,
    /// No successful login before the deadline.
    LoginTimeout,
    /// Too many envelopes queued before login.
    QueueOverflow,
    /// Closed on request through the gateway.
    Logout,
    /// The gateway is stopping.
    Shutdown,
    Transport(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed"),
            Self::LoginTimeout => write!(f, "login timeout"),
            Self::QueueOverflow => write!(f, "pre-auth queue overflow"),
            Self::Logout => write!(f, "logout"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

/// Mailbox input of a session task.
pub(crate) enum SessionInput {
    /// A fabric message addressed to this connection's identity.
    Deliver(Delivery),
    /// Answer to a request the client sent, ready to be written.
    Respond(Envelope),
    Logout,
}

/// Cloneable handle to a running session's mailbox.
#[derive(Clone)]
pub struct SessionHandle {
    inbox: mpsc::UnboundedSender<SessionInput>,
}

impl SessionHandle {
    /// Ask the session to close. Returns `false` if it already ended.
    pub fn logout(&self) -> bool {
        self.inbox.send(SessionInput::Logout).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }
}
