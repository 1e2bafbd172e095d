//! Core gateway: accepts connections and runs one session per connection.
//!
//! Owns the listener, the shared session context and the pending-request
//! sweep. Lifecycle changes are published to observers registered through
//! [`Gateway::subscribe`].

use crate::config::GatewayConfig;
use crate::context::GatewayContext;
use crate::events::GatewayEvent;
use crate::login::{Authenticator, BasicAuthenticator};
use crate::pending::ConnectionId;
use crate::session::{CloseReason, ConnectionSession, SessionHandle};
use crate::transport::websocket::{self, ListenerEvent};
use dashmap::DashMap;
use hub_core::{Fabric, FrameTransport, HubError, HubResult, ObserverHandle};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long [`Gateway::stop`] waits for sessions to wind down.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct SessionEntry {
    handle: SessionHandle,
    remote: Option<SocketAddr>,
}

/// State reachable from spawned tasks.
struct Shared {
    ctx: Arc<GatewayContext>,
    sessions: DashMap<ConnectionId, SessionEntry>,
    next_conn_id: AtomicU64,
    shutdown_tx: broadcast::Sender<()>,
    drained: Notify,
}

impl Shared {
    fn spawn_session<T>(self: &Arc<Self>, transport: T, remote: Option<SocketAddr>) -> JoinHandle<CloseReason>
    where
        T: FrameTransport + 'static,
    {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let session = ConnectionSession::new(conn_id, self.ctx.clone(), transport);
        self.sessions.insert(
            conn_id,
            SessionEntry {
                handle: session.handle(),
                remote,
            },
        );
        debug!(conn_id, remote = ?remote, "connection opened");

        let shutdown = self.shutdown_tx.subscribe();
        let shared = self.clone();
        tokio::spawn(async move {
            let reason = session.run(shutdown).await;
            shared.sessions.remove(&conn_id);
            if shared.sessions.is_empty() {
                shared.drained.notify_waiters();
            }
            reason
        })
    }
}

struct Running {
    addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

/// The message gateway.
///
/// Created stopped; [`Gateway::start`] binds the WebSocket listener.
/// Transports from elsewhere can be attached at any time with
/// [`Gateway::attach`].
pub struct Gateway {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl Gateway {
    /// Create a gateway over `fabric`.
    ///
    /// Without an authenticator, [`BasicAuthenticator`] is used.
    pub fn new(
        config: GatewayConfig,
        fabric: Arc<dyn Fabric>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        let authenticator = authenticator.unwrap_or_else(|| {
            info!("no authenticator configured, using basic username login");
            Arc::new(BasicAuthenticator)
        });
        let ctx = Arc::new(GatewayContext::new(config, fabric, authenticator));
        Self {
            shared: Arc::new(Shared {
                ctx,
                sessions: DashMap::new(),
                next_conn_id: AtomicU64::new(1),
                shutdown_tx: broadcast::channel(1).0,
                drained: Notify::new(),
            }),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.shared.ctx.config
    }

    /// Register an observer for lifecycle events.
    #[must_use = "dropping the handle unsubscribes the observer"]
    pub fn subscribe<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.shared.ctx.events.subscribe(callback)
    }

    /// Bind the WebSocket listener and start accepting connections.
    ///
    /// Returns the bound address (useful with port 0).
    pub async fn start(&self) -> HubResult<SocketAddr> {
        if let Some(addr) = self.local_addr() {
            return Err(HubError::Other(format!("gateway already listening on {addr}")));
        }
        let config = &self.shared.ctx.config;
        let ip: IpAddr = config
            .bind
            .parse()
            .map_err(|e| HubError::Config(format!("invalid bind address {}: {e}", config.bind)))?;
        let bind_addr = SocketAddr::new(ip, config.port);

        let (addr, mut listener_rx, listener_task) =
            match websocket::start_listener(bind_addr, config.path.clone(), config.login_timeout)
                .await
            {
                Ok(listener) => listener,
                Err(e) => {
                    warn!(addr = %bind_addr, error = %e, "gateway failed to start");
                    self.shared.ctx.events.emit(&GatewayEvent::Error {
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            };

        let shared = self.shared.clone();
        let mut shutdown_rx = self.shared.shutdown_tx.subscribe();
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    event = listener_rx.recv() => match event {
                        Some(ListenerEvent::Accepted(transport)) => {
                            let remote = transport.remote_addr();
                            shared.spawn_session(transport, Some(remote));
                        }
                        Some(ListenerEvent::Error(message)) => {
                            shared.ctx.events.emit(&GatewayEvent::Error { message });
                        }
                        None => break,
                    },
                }
            }
        });

        let sweep_ctx = self.shared.ctx.clone();
        let sweep_task = tokio::spawn(async move {
            let every = sweep_ctx.config.request_timeout.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                sweep_ctx.pending.prune_abandoned().await;
            }
        });

        if let Ok(mut running) = self.running.lock() {
            *running = Some(Running {
                addr,
                tasks: vec![listener_task, accept_task, sweep_task],
            });
        }

        info!(addr = %addr, path = %config.path, "gateway started");
        self.shared.ctx.events.emit(&GatewayEvent::Started { addr });
        Ok(addr)
    }

    /// Stop listening and close every connection.
    pub async fn stop(&self) {
        let running = self.running.lock().ok().and_then(|mut r| r.take());
        let _ = self.shared.shutdown_tx.send(());
        if let Some(running) = &running {
            for task in &running.tasks {
                task.abort();
            }
        }

        let drained = async {
            loop {
                let notified = self.shared.drained.notified();
                if self.shared.sessions.is_empty() {
                    break;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(DRAIN_TIMEOUT, drained).await.is_err() {
            warn!(
                remaining = self.shared.sessions.len(),
                "sessions still open after shutdown"
            );
        }

        if let Some(running) = running {
            info!(addr = %running.addr, "gateway stopped");
            self.shared.ctx.events.emit(&GatewayEvent::Stopped);
        }
    }

    /// Run a session over any transport, e.g. an in-memory pipe.
    pub fn attach<T>(&self, transport: T) -> JoinHandle<CloseReason>
    where
        T: FrameTransport + 'static,
    {
        self.shared.spawn_session(transport, None)
    }

    /// Close the connection bound to `identity`. Returns `false` if none is.
    pub fn logout(&self, identity: &str) -> bool {
        match self.shared.ctx.identities.get(identity) {
            Some(handle) => handle.logout(),
            None => false,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .ok()
            .and_then(|r| r.as_ref().map(|r| r.addr))
    }

    pub fn connection_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Remote addresses of open WebSocket connections.
    pub fn remotes(&self) -> Vec<SocketAddr> {
        self.shared
            .sessions
            .iter()
            .filter_map(|entry| entry.value().remote)
            .collect()
    }

    /// Identities of authenticated connections, sorted.
    pub fn identities(&self) -> Vec<String> {
        let mut identities: Vec<String> = self
            .shared
            .ctx
            .identities
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        identities.sort();
        identities
    }

    /// Number of fabric requests waiting on a client answer.
    pub async fn pending_requests(&self) -> usize {
        self.shared.ctx.pending.len().await
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        let _ = self.shared.shutdown_tx.send(());
        if let Ok(mut running) = self.running.lock() {
            if let Some(running) = running.take() {
                for task in running.tasks {
                    task.abort();
                }
            }
        }
        for entry in self.shared.sessions.iter() {
            entry.value().handle.logout();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;
    use futures_util::{SinkExt, StreamExt};
    use hub_core::{Envelope, EnvelopeType, LocalFabric};
    use serde_json::json;
    use tokio_tungstenite::tungstenite::Message;

    fn local_config() -> GatewayConfig {
        GatewayConfig {
            bind: "127.0.0.1".into(),
            port: 0,
            ..GatewayConfig::default()
        }
    }

    fn recorder(sink: Arc<Mutex<Vec<GatewayEvent>>>) -> impl Fn(&GatewayEvent) + Send + Sync {
        move |e: &GatewayEvent| sink.lock().unwrap().push(e.clone())
    }

    #[tokio::test]
    async fn start_and_stop_emit_events() {
        let gateway = Gateway::new(local_config(), LocalFabric::new(), None);
        let events = Arc::new(Mutex::new(Vec::new()));
        let _observer = gateway.subscribe(recorder(events.clone()));

        let addr = gateway.start().await.unwrap();
        assert_eq!(gateway.local_addr(), Some(addr));
        assert!(gateway.start().await.is_err());
        gateway.stop().await;
        assert!(gateway.local_addr().is_none());

        let seen = events.lock().unwrap().clone();
        assert_eq!(seen, vec![GatewayEvent::Started { addr }, GatewayEvent::Stopped]);
    }

    #[tokio::test]
    async fn bind_failure_emits_error() {
        let first = Gateway::new(local_config(), LocalFabric::new(), None);
        let addr = first.start().await.unwrap();

        let config = GatewayConfig {
            port: addr.port(),
            ..local_config()
        };
        let second = Gateway::new(config, LocalFabric::new(), None);
        let events = Arc::new(Mutex::new(Vec::new()));
        let _observer = second.subscribe(recorder(events.clone()));

        assert!(second.start().await.is_err());
        let seen = events.lock().unwrap().clone();
        assert!(matches!(seen.as_slice(), [GatewayEvent::Error { .. }]));
        first.stop().await;
    }

    #[tokio::test]
    async fn attached_session_is_tracked_and_logged_out() {
        let gateway = Gateway::new(GatewayConfig::default(), LocalFabric::new(), None);
        let (transport, mut peer) = memory::pair();
        let task = gateway.attach(transport);
        assert_eq!(gateway.connection_count(), 1);

        peer.send(&Envelope::login("l", json!("alice")));
        let ack = peer.recv().await.unwrap();
        let identity = ack.content["identity"].as_str().unwrap().to_string();
        assert_eq!(gateway.identities(), vec![identity.clone()]);

        assert!(gateway.logout(&identity));
        assert_eq!(task.await.unwrap(), CloseReason::Logout);
        assert_eq!(gateway.connection_count(), 0);
        assert!(!gateway.logout(&identity));
    }

    #[tokio::test]
    async fn stop_closes_open_sessions() {
        let gateway = Gateway::new(local_config(), LocalFabric::new(), None);
        gateway.start().await.unwrap();
        let (transport, _peer) = memory::pair();
        let task = gateway.attach(transport);

        gateway.stop().await;
        assert_eq!(task.await.unwrap(), CloseReason::Shutdown);
        assert_eq!(gateway.connection_count(), 0);
    }

    #[tokio::test]
    async fn websocket_client_round_trip() {
        let fabric = LocalFabric::new();
        let echo: Arc<dyn hub_core::Actor> = Arc::new(|d: hub_core::Delivery| {
            if let Some(reply) = d.reply {
                reply.ok(json!({ "echo": d.content }));
            }
        });
        fabric.add_actor("svc", echo).unwrap();

        let gateway = Gateway::new(local_config(), fabric.clone(), None);
        let events = Arc::new(Mutex::new(Vec::new()));
        let _observer = gateway.subscribe(recorder(events.clone()));
        let addr = gateway.start().await.unwrap();

        let url = format!("ws://{addr}/hubiquitus/websocket");
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        let login = Envelope::login("l1", json!({ "username": "alice" }));
        let request = Envelope::request("q1", "svc", json!("hi")).with_callback();
        for envelope in [&login, &request] {
            let text = serde_json::to_string(envelope).unwrap();
            ws.send(Message::Text(text.into())).await.unwrap();
        }

        let mut replies = Vec::new();
        while replies.len() < 2 {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => {
                    replies.push(serde_json::from_str::<Envelope>(&text).unwrap());
                }
                _ => continue,
            }
        }
        assert_eq!(replies[0].id, "l1");
        let identity = replies[0].content["identity"].as_str().unwrap().to_string();
        assert_eq!(replies[1].kind, EnvelopeType::Res);
        assert_eq!(replies[1].id, "q1");
        assert_eq!(replies[1].content, json!({ "echo": "hi" }));
        assert!(fabric.contains(&identity));
        assert_eq!(gateway.remotes().len(), 1);

        ws.close(None).await.unwrap();
        for _ in 0..200 {
            if gateway.connection_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(gateway.connection_count(), 0);
        assert!(!fabric.contains(&identity));
        assert!(events
            .lock()
            .unwrap()
            .contains(&GatewayEvent::Disconnected {
                identity: Some(identity)
            }));

        gateway.stop().await;
    }

    #[tokio::test]
    async fn sweep_leaves_requester_deadline_alone() {
        let config = GatewayConfig {
            request_timeout: Duration::from_millis(20),
            ..local_config()
        };
        let fabric = LocalFabric::new();
        let gateway = Gateway::new(config, fabric.clone(), None);
        gateway.start().await.unwrap();
        let (transport, mut peer) = memory::pair();
        gateway.attach(transport);

        peer.send(&Envelope::login("l", json!("alice")));
        let ack = peer.recv().await.unwrap();
        let identity = ack.content["identity"].as_str().unwrap().to_string();

        let waiter = tokio::spawn(fabric.request(
            "svc",
            &identity,
            json!("ping"),
            Duration::from_secs(3600),
        ));
        let req = peer.recv().await.unwrap();

        // Many sweep intervals pass before the client answers.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(gateway.pending_requests().await, 1);

        peer.send(&req.response_to(json!("pong"), serde_json::Value::Null));
        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.content, json!("pong"));
        gateway.stop().await;
    }

    #[tokio::test]
    async fn silent_tcp_peer_is_dropped_after_login_timeout() {
        use tokio::io::AsyncReadExt;

        let config = GatewayConfig {
            login_timeout: Duration::from_millis(100),
            ..local_config()
        };
        let gateway = Gateway::new(config, LocalFabric::new(), None);
        let events = Arc::new(Mutex::new(Vec::new()));
        let _observer = gateway.subscribe(recorder(events.clone()));
        let addr = gateway.start().await.unwrap();

        let mut socket = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut buf)).await;
        assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
        assert_eq!(gateway.connection_count(), 0);

        for _ in 0..200 {
            if events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, GatewayEvent::Error { .. }))
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, GatewayEvent::Error { message } if message.contains("timeout"))));
        gateway.stop().await;
    }

    #[tokio::test]
    async fn oversized_message_closes_connection() {
        let gateway = Gateway::new(local_config(), LocalFabric::new(), None);
        let events = Arc::new(Mutex::new(Vec::new()));
        let _observer = gateway.subscribe(recorder(events.clone()));
        let addr = gateway.start().await.unwrap();

        let url = format!("ws://{addr}/hubiquitus");
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let huge = "x".repeat(2 * 1024 * 1024);
        let _ = ws.send(Message::Text(huge.into())).await;

        let closed = || {
            events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, GatewayEvent::Disconnected { .. }))
        };
        for _ in 0..200 {
            if closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(closed());
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, GatewayEvent::Error { .. })));
        gateway.stop().await;
    }

    #[tokio::test]
    async fn upgrade_outside_path_is_refused() {
        let gateway = Gateway::new(local_config(), LocalFabric::new(), None);
        let events = Arc::new(Mutex::new(Vec::new()));
        let _observer = gateway.subscribe(recorder(events.clone()));
        let addr = gateway.start().await.unwrap();

        let refused = tokio_tungstenite::connect_async(format!("ws://{addr}/elsewhere")).await;
        assert!(refused.is_err());
        assert_eq!(gateway.connection_count(), 0);

        for _ in 0..200 {
            if events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, GatewayEvent::Error { .. }))
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, GatewayEvent::Error { .. })));
        gateway.stop().await;
    }
}
