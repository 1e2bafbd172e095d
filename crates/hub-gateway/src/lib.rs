//! hub-gateway: connects external clients to the hubgate actor fabric.
//!
//! Clients speak JSON envelopes over WebSocket. After a `login` envelope each
//! connection is bound to a unique identity on the fabric: client `req`
//! envelopes become fabric messages, and fabric messages addressed to the
//! identity are written back as `req` envelopes.

pub mod config;
mod context;
pub mod events;
pub mod login;
pub mod pending;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{GatewayConfig, Overrides};
pub use events::GatewayEvent;
pub use login::{Authenticator, BasicAuthenticator};
pub use pending::{ConnectionId, PendingRequestTable};
pub use server::Gateway;
pub use session::{CloseReason, SessionHandle, SessionState};
