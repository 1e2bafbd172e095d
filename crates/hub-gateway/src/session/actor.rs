use super::SessionInput;
use hub_core::{Actor, Delivery, FabricError};
use tokio::sync::mpsc;
use tracing::debug;

/// Fabric-side endpoint of an authenticated connection.
///
/// Registered under the connection's identity; it only forwards into the
/// session mailbox.
pub(super) struct SessionActor {
    pub(super) identity: String,
    pub(super) inbox: mpsc::UnboundedSender<SessionInput>,
}

impl Actor for SessionActor {
    fn receive(&self, delivery: Delivery) {
        if let Err(mpsc::error::SendError(input)) = self.inbox.send(SessionInput::Deliver(delivery)) {
            debug!(identity = %self.identity, "delivery to closed session dropped");
            if let SessionInput::Deliver(Delivery {
                reply: Some(reply), ..
            }) = input
            {
                reply.fail(FabricError::Disconnected);
            }
        }
    }
}
