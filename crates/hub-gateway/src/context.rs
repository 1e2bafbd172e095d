//! State shared by the gateway and all of its connection sessions.

use crate::config::GatewayConfig;
use crate::events::GatewayEvent;
use crate::login::Authenticator;
use crate::pending::PendingRequestTable;
use crate::session::SessionHandle;
use dashmap::DashMap;
use hub_core::{Fabric, Notifier};
use std::sync::Arc;

pub(crate) struct GatewayContext {
    pub config: GatewayConfig,
    pub fabric: Arc<dyn Fabric>,
    pub authenticator: Arc<dyn Authenticator>,
    pub pending: PendingRequestTable,
    pub events: Notifier<GatewayEvent>,
    /// Authenticated sessions by identity.
    pub identities: DashMap<String, SessionHandle>,
}

impl GatewayContext {
    pub fn new(
        config: GatewayConfig,
        fabric: Arc<dyn Fabric>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            config,
            fabric,
            authenticator,
            pending: PendingRequestTable::new(),
            events: Notifier::new(),
            identities: DashMap::new(),
        }
    }
}
