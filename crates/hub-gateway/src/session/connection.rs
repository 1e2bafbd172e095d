use super::actor::SessionActor;
use super::{CloseReason, SessionHandle, SessionInput, SessionState};
use crate::context::GatewayContext;
use crate::events::GatewayEvent;
use crate::pending::ConnectionId;
use hub_core::envelope::{generate_id, now_millis};
use hub_core::{
    address, codec, schema, Delivery, Envelope, EnvelopeType, FabricError, FrameTransport,
    HubError, Response,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Outcome of handling one input; `Err` ends the session.
type Step = Result<(), CloseReason>;

/// One client connection, from accept to close.
///
/// Envelopes other than `login` that arrive before authentication are queued
/// and dispatched in arrival order right after a successful login. A
/// connection that does not authenticate within the login timeout is closed.
pub(crate) struct ConnectionSession<T> {
    conn_id: ConnectionId,
    ctx: Arc<GatewayContext>,
    transport: T,
    state: SessionState,
    identity: Option<String>,
    queue: VecDeque<Envelope>,
    inbox_tx: mpsc::UnboundedSender<SessionInput>,
    inbox_rx: mpsc::UnboundedReceiver<SessionInput>,
}

impl<T: FrameTransport> ConnectionSession<T> {
    pub(crate) fn new(conn_id: ConnectionId, ctx: Arc<GatewayContext>, transport: T) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            conn_id,
            ctx,
            transport,
            state: SessionState::Pending,
            identity: None,
            queue: VecDeque::new(),
            inbox_tx,
            inbox_rx,
        }
    }

    pub(crate) fn handle(&self) -> SessionHandle {
        SessionHandle {
            inbox: self.inbox_tx.clone(),
        }
    }

    /// Drive the connection until it closes.
    pub(crate) async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> CloseReason {
        let login_deadline = Instant::now() + self.ctx.config.login_timeout;
        let login_timer = tokio::time::sleep_until(login_deadline);
        tokio::pin!(login_timer);

        debug!(conn_id = self.conn_id, "session started");

        let reason = loop {
            let step = tokio::select! {
                _ = &mut login_timer, if self.state == SessionState::Pending => {
                    Err(CloseReason::LoginTimeout)
                }

                _ = shutdown.recv() => Err(CloseReason::Shutdown),

                Some(input) = self.inbox_rx.recv() => self.on_input(input).await,

                frame = self.transport.recv_text() => match frame {
                    Ok(Some(text)) => self.on_frame(&text, login_deadline).await,
                    Ok(None) => Err(CloseReason::PeerClosed),
                    Err(e) => Err(CloseReason::Transport(e.to_string())),
                },
            };
            if let Err(reason) = step {
                break reason;
            }
        };

        self.close(&reason).await;
        reason
    }

    async fn on_input(&mut self, input: SessionInput) -> Step {
        match input {
            SessionInput::Deliver(delivery) => self.deliver(delivery).await,
            SessionInput::Respond(envelope) => self.write(&envelope).await,
            SessionInput::Logout => Err(CloseReason::Logout),
        }
    }

    async fn on_frame(&mut self, text: &str, login_deadline: Instant) -> Step {
        let Some(raw) = codec::decode::<Value>(text) else {
            return Ok(());
        };
        let envelope = match schema::validate(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(conn_id = self.conn_id, error = %e, "dropping invalid envelope");
                return Ok(());
            }
        };
        trace!(
            conn_id = self.conn_id,
            kind = envelope.kind.as_str(),
            id = %envelope.id,
            to = %envelope.to,
            "inbound envelope"
        );

        match (self.state, envelope.kind) {
            (_, EnvelopeType::Unknown) => {
                warn!(conn_id = self.conn_id, id = %envelope.id, "dropping envelope of unknown type");
                Ok(())
            }
            (SessionState::Pending, EnvelopeType::Login) => {
                self.login(envelope, login_deadline).await
            }
            (SessionState::Pending, _) => self.enqueue(envelope),
            (SessionState::Authenticated, _) => self.dispatch(envelope).await,
            (SessionState::Closed, _) => Ok(()),
        }
    }

    fn enqueue(&mut self, envelope: Envelope) -> Step {
        let limit = self.ctx.config.max_pre_auth_queue;
        if self.queue.len() >= limit {
            warn!(conn_id = self.conn_id, limit, "pre-auth queue full");
            return Err(CloseReason::QueueOverflow);
        }
        debug!(conn_id = self.conn_id, id = %envelope.id, "queued until login");
        self.queue.push_back(envelope);
        Ok(())
    }

    async fn login(&mut self, envelope: Envelope, deadline: Instant) -> Step {
        let ctx = self.ctx.clone();
        let attempt =
            tokio::time::timeout_at(deadline, ctx.authenticator.login(&envelope.content)).await;
        let name = match attempt {
            Err(_) => return Err(CloseReason::LoginTimeout),
            Ok(Err(e)) => {
                warn!(conn_id = self.conn_id, error = %e, "login rejected");
                return self.ack_login(&envelope, Err(e.to_string())).await;
            }
            Ok(Ok(name)) => name,
        };

        let identity = address::full(&name, &generate_id());
        let actor = SessionActor {
            identity: identity.clone(),
            inbox: self.inbox_tx.clone(),
        };
        if let Err(e) = ctx.fabric.add_actor(&identity, Arc::new(actor)) {
            warn!(conn_id = self.conn_id, identity = %identity, error = %e, "identity registration failed");
            return self.ack_login(&envelope, Err(e.to_string())).await;
        }

        ctx.identities.insert(identity.clone(), self.handle());
        self.identity = Some(identity.clone());
        self.state = SessionState::Authenticated;
        info!(conn_id = self.conn_id, identity = %identity, "connection authenticated");
        ctx.events.emit(&GatewayEvent::Connected {
            identity: identity.clone(),
        });

        self.ack_login(&envelope, Ok(identity.as_str())).await?;

        let queued = std::mem::take(&mut self.queue);
        if !queued.is_empty() {
            debug!(conn_id = self.conn_id, count = queued.len(), "flushing queued envelopes");
        }
        for envelope in queued {
            self.dispatch(envelope).await?;
        }
        Ok(())
    }

    async fn ack_login(&mut self, login: &Envelope, outcome: Result<&str, String>) -> Step {
        if !self.ctx.config.login_ack {
            return Ok(());
        }
        let mut ack = Envelope::new(EnvelopeType::Res, login.id.clone(), "");
        match outcome {
            Ok(identity) => {
                ack.to = identity.to_string();
                ack.content = json!({ "identity": identity });
            }
            Err(message) => {
                ack.err = json!({ "code": "LOGIN_FAILED", "message": message });
            }
        }
        ack.date = Some(now_millis());
        self.write(&ack).await
    }

    async fn dispatch(&mut self, envelope: Envelope) -> Step {
        match envelope.kind {
            EnvelopeType::Req => self.forward(envelope),
            EnvelopeType::Res => self.settle(envelope).await,
            EnvelopeType::Login => {
                warn!(
                    conn_id = self.conn_id,
                    identity = self.identity.as_deref().unwrap_or_default(),
                    "ignoring login on authenticated connection"
                );
            }
            EnvelopeType::Unknown => {
                warn!(conn_id = self.conn_id, id = %envelope.id, "dropping envelope of unknown type");
            }
        }
        Ok(())
    }

    /// Hand a client `req` to the fabric.
    ///
    /// Without `cb` it is fire-and-forget. With `cb` the answer comes back as
    /// a `res` carrying the same id; a request that times out gets no `res`.
    fn forward(&self, envelope: Envelope) {
        let Some(identity) = self.identity.clone() else {
            return;
        };
        let fabric = &self.ctx.fabric;
        let Envelope {
            id,
            to,
            content,
            cb,
            ..
        } = envelope;

        if !cb {
            if let Err(e) = fabric.send(&identity, &to, content) {
                warn!(conn_id = self.conn_id, to = %to, error = %e, "dropping request");
            }
            return;
        }

        let request = fabric.request(&identity, &to, content, self.ctx.config.request_timeout);
        let inbox = self.inbox_tx.clone();
        let conn_id = self.conn_id;
        tokio::spawn(async move {
            let mut response = Envelope::new(EnvelopeType::Res, id, identity);
            match request.await {
                Ok(Response { from, content }) => {
                    response.from = Some(from);
                    response.content = content;
                }
                Err(FabricError::Timeout) => {
                    debug!(conn_id, id = %response.id, to = %to, "request timed out");
                    return;
                }
                Err(e) => {
                    response.from = Some(to);
                    response.err = e.to_payload();
                }
            }
            response.date = Some(now_millis());
            if inbox.send(SessionInput::Respond(response)).is_err() {
                debug!(conn_id, "session closed before response");
            }
        });
    }

    /// Match a client `res` to the fabric request waiting for it.
    async fn settle(&mut self, envelope: Envelope) {
        let outcome = if envelope.is_error() {
            Err(FabricError::Rejected(envelope.err))
        } else {
            Ok(Response {
                from: self.identity.clone().unwrap_or_default(),
                content: envelope.content,
            })
        };
        if !self.ctx.pending.resolve(self.conn_id, &envelope.id, outcome).await {
            let e = HubError::UnroutableResponse(envelope.id);
            warn!(conn_id = self.conn_id, error = %e, "dropping response");
        }
    }

    /// Write a fabric message to the client as a `req` envelope.
    async fn deliver(&mut self, delivery: Delivery) -> Step {
        let Delivery {
            from,
            to,
            content,
            reply,
        } = delivery;
        let id = generate_id();
        let mut envelope = Envelope::new(EnvelopeType::Req, id.clone(), to);
        envelope.from = Some(from);
        envelope.content = content;
        envelope.date = Some(now_millis());
        if let Some(reply) = reply {
            envelope.cb = true;
            self.ctx.pending.insert(self.conn_id, id, reply).await;
        }
        self.write(&envelope).await
    }

    async fn write(&mut self, envelope: &Envelope) -> Step {
        let Some(text) = codec::encode(envelope) else {
            return Ok(());
        };
        self.transport
            .send_text(&text)
            .await
            .map_err(|e| CloseReason::Transport(e.to_string()))
    }

    async fn close(&mut self, reason: &CloseReason) {
        self.state = SessionState::Closed;
        if let Some(identity) = &self.identity {
            self.ctx.identities.remove(identity);
            self.ctx.fabric.remove_actor(identity);
        }
        self.ctx.pending.evict_connection(self.conn_id).await;
        self.inbox_rx.close();
        if let Err(e) = self.transport.close().await {
            debug!(conn_id = self.conn_id, error = %e, "transport close failed");
        }

        match reason {
            CloseReason::PeerClosed | CloseReason::Logout | CloseReason::Shutdown => {
                info!(conn_id = self.conn_id, identity = ?self.identity, reason = %reason, "connection closed");
            }
            _ => {
                warn!(conn_id = self.conn_id, identity = ?self.identity, reason = %reason, "connection closed");
            }
        }
        if let CloseReason::Transport(message) = reason {
            self.ctx.events.emit(&GatewayEvent::Error {
                message: message.clone(),
            });
        }
        self.ctx.events.emit(&GatewayEvent::Disconnected {
            identity: self.identity.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::login::BasicAuthenticator;
    use crate::transport::memory::{self, MemoryPeer};
    use hub_core::{Actor, Fabric, LocalFabric, ObserverHandle, Reply};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    struct Harness {
        ctx: Arc<GatewayContext>,
        fabric: Arc<LocalFabric>,
        shutdown: broadcast::Sender<()>,
        events: Arc<Mutex<Vec<GatewayEvent>>>,
        _observer: ObserverHandle,
    }

    impl Harness {
        fn new(config: GatewayConfig) -> Self {
            let fabric = LocalFabric::new();
            let ctx = Arc::new(GatewayContext::new(
                config,
                fabric.clone(),
                Arc::new(BasicAuthenticator),
            ));
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            let observer = ctx
                .events
                .subscribe(move |e: &GatewayEvent| sink.lock().unwrap().push(e.clone()));
            let (shutdown, _) = broadcast::channel(1);
            Self {
                ctx,
                fabric,
                shutdown,
                events,
                _observer: observer,
            }
        }

        fn open(&self, conn_id: ConnectionId) -> (MemoryPeer, SessionHandle, JoinHandle<CloseReason>) {
            let (transport, peer) = memory::pair();
            let session = ConnectionSession::new(conn_id, self.ctx.clone(), transport);
            let handle = session.handle();
            let task = tokio::spawn(session.run(self.shutdown.subscribe()));
            (peer, handle, task)
        }

        fn events(&self) -> Vec<GatewayEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    fn recorder(fabric: &LocalFabric, address: &str) -> Arc<Mutex<Vec<(String, Value)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let actor: Arc<dyn Actor> = Arc::new(move |d: Delivery| {
            sink.lock().unwrap().push((d.from, d.content));
        });
        fabric.add_actor(address, actor).unwrap();
        log
    }

    fn echo(fabric: &LocalFabric, address: &str) {
        let actor: Arc<dyn Actor> = Arc::new(|d: Delivery| {
            if let Some(reply) = d.reply {
                reply.ok(json!({ "echo": d.content }));
            }
        });
        fabric.add_actor(address, actor).unwrap();
    }

    async fn next(peer: &mut MemoryPeer) -> Envelope {
        tokio::time::timeout(Duration::from_secs(5), peer.recv())
            .await
            .expect("no frame within 5s")
            .expect("connection closed")
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..500 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition never held");
    }

    async fn login(peer: &mut MemoryPeer, name: &str) -> String {
        assert!(peer.send(&Envelope::login("login-1", json!({ "username": name }))));
        let ack = next(peer).await;
        assert_eq!(ack.kind, EnvelopeType::Res);
        assert_eq!(ack.id, "login-1");
        ack.content["identity"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn login_binds_identity() {
        let h = Harness::new(GatewayConfig::default());
        let (mut peer, _handle, _task) = h.open(1);

        let identity = login(&mut peer, "alice").await;
        assert!(identity.starts_with("alice/"));
        assert!(address::is_full(&identity));
        assert!(h.fabric.contains(&identity));
        assert!(h.ctx.identities.contains_key(&identity));
        assert_eq!(h.events(), vec![GatewayEvent::Connected { identity }]);
    }

    #[tokio::test]
    async fn requests_sent_before_login_are_flushed_in_order() {
        let h = Harness::new(GatewayConfig::default());
        let log = recorder(&h.fabric, "svc");
        let (mut peer, _handle, _task) = h.open(1);

        peer.send(&Envelope::request("r1", "svc", json!(1)));
        peer.send(&Envelope::request("r2", "svc", json!(2)));
        let identity = login(&mut peer, "alice").await;

        eventually(|| log.lock().unwrap().len() == 2).await;
        let seen = log.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![(identity.clone(), json!(1)), (identity, json!(2))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unauthenticated_connection_times_out() {
        let config = GatewayConfig {
            login_timeout: Duration::from_millis(100),
            ..GatewayConfig::default()
        };
        let h = Harness::new(config);
        let log = recorder(&h.fabric, "svc");
        let (mut peer, _handle, task) = h.open(1);
        peer.send(&Envelope::request("r1", "svc", json!(1)));

        assert_eq!(task.await.unwrap(), CloseReason::LoginTimeout);
        assert!(peer.recv_raw().await.is_none());
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(h.fabric.addresses(), vec!["svc"]);
        assert_eq!(h.events(), vec![GatewayEvent::Disconnected { identity: None }]);
    }

    #[tokio::test(start_paused = true)]
    async fn authenticated_connection_outlives_login_timeout() {
        let config = GatewayConfig {
            login_timeout: Duration::from_millis(100),
            ..GatewayConfig::default()
        };
        let h = Harness::new(config);
        echo(&h.fabric, "svc");
        let (mut peer, _handle, task) = h.open(1);
        login(&mut peer, "alice").await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!task.is_finished());

        peer.send(&Envelope::request("q1", "svc", json!("hi")).with_callback());
        let res = next(&mut peer).await;
        assert_eq!(res.id, "q1");
        assert_eq!(res.content, json!({ "echo": "hi" }));
    }

    #[tokio::test]
    async fn failed_login_keeps_connection_pending() {
        let h = Harness::new(GatewayConfig::default());
        let (mut peer, _handle, task) = h.open(1);

        peer.send(&Envelope::login("bad", json!({ "username": "" })));
        let refusal = next(&mut peer).await;
        assert_eq!(refusal.id, "bad");
        assert_eq!(refusal.err["code"], "LOGIN_FAILED");
        assert!(!task.is_finished());

        let identity = login(&mut peer, "alice").await;
        assert!(identity.starts_with("alice/"));
    }

    #[tokio::test]
    async fn client_request_gets_response_with_same_id() {
        let h = Harness::new(GatewayConfig::default());
        echo(&h.fabric, "svc");
        let (mut peer, _handle, _task) = h.open(1);
        let identity = login(&mut peer, "alice").await;

        peer.send(&Envelope::request("q1", "svc", json!("ping")).with_callback());
        let res = next(&mut peer).await;
        assert_eq!(res.kind, EnvelopeType::Res);
        assert_eq!(res.id, "q1");
        assert_eq!(res.to, identity);
        assert_eq!(res.from.as_deref(), Some("svc"));
        assert_eq!(res.content, json!({ "echo": "ping" }));
        assert!(!res.is_error());
    }

    #[tokio::test]
    async fn request_to_unknown_address_gets_error_response() {
        let h = Harness::new(GatewayConfig::default());
        let (mut peer, _handle, _task) = h.open(1);
        login(&mut peer, "alice").await;

        peer.send(&Envelope::request("q1", "nobody", json!(null)).with_callback());
        let res = next(&mut peer).await;
        assert_eq!(res.id, "q1");
        assert_eq!(res.err["code"], "NOT_FOUND");
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_request_gets_no_response() {
        let config = GatewayConfig {
            request_timeout: Duration::from_millis(50),
            ..GatewayConfig::default()
        };
        let h = Harness::new(config);
        echo(&h.fabric, "svc");
        let held: Arc<Mutex<Vec<Reply>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = held.clone();
        let silent: Arc<dyn Actor> = Arc::new(move |d: Delivery| {
            if let Some(reply) = d.reply {
                sink.lock().unwrap().push(reply);
            }
        });
        h.fabric.add_actor("silent", silent).unwrap();

        let (mut peer, _handle, _task) = h.open(1);
        login(&mut peer, "alice").await;

        peer.send(&Envelope::request("slow", "silent", json!(1)).with_callback());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(held.lock().unwrap().len(), 1);

        peer.send(&Envelope::request("fast", "svc", json!(2)).with_callback());
        let res = next(&mut peer).await;
        assert_eq!(res.id, "fast");
    }

    #[tokio::test]
    async fn fabric_request_round_trips_through_client() {
        let h = Harness::new(GatewayConfig::default());
        let (mut peer, _handle, _task) = h.open(1);
        let identity = login(&mut peer, "alice").await;

        let request = h
            .fabric
            .request("svc", &identity, json!("ping"), Duration::from_secs(5));
        let waiter = tokio::spawn(request);

        let req = next(&mut peer).await;
        assert_eq!(req.kind, EnvelopeType::Req);
        assert!(req.cb);
        assert_eq!(req.from.as_deref(), Some("svc"));
        assert_eq!(req.content, json!("ping"));

        peer.send(&req.response_to(json!("pong"), Value::Null));
        let outcome = waiter.await.unwrap().unwrap();
        assert_eq!(outcome.from, identity);
        assert_eq!(outcome.content, json!("pong"));
        assert!(h.ctx.pending.is_empty().await);
    }

    #[tokio::test]
    async fn client_error_response_rejects_fabric_request() {
        let h = Harness::new(GatewayConfig::default());
        let (mut peer, _handle, _task) = h.open(1);
        let identity = login(&mut peer, "alice").await;

        let waiter = tokio::spawn(h.fabric.request(
            "svc",
            &identity,
            json!("ping"),
            Duration::from_secs(5),
        ));
        let req = next(&mut peer).await;
        peer.send(&req.response_to(Value::Null, json!("nope")));
        assert_eq!(
            waiter.await.unwrap(),
            Err(FabricError::Rejected(json!("nope")))
        );
    }

    #[tokio::test]
    async fn fire_and_forget_delivery_has_no_callback() {
        let h = Harness::new(GatewayConfig::default());
        let (mut peer, _handle, _task) = h.open(1);
        let identity = login(&mut peer, "alice").await;

        h.fabric.send("news", &identity, json!({ "headline": "x" })).unwrap();
        let req = next(&mut peer).await;
        assert!(!req.cb);
        assert_eq!(req.from.as_deref(), Some("news"));
        assert_eq!(req.to, identity);
        assert!(h.ctx.pending.is_empty().await);
    }

    #[tokio::test]
    async fn unmatched_response_is_dropped() {
        let h = Harness::new(GatewayConfig::default());
        echo(&h.fabric, "svc");
        let (mut peer, _handle, task) = h.open(1);
        login(&mut peer, "alice").await;

        let mut stray = Envelope::new(EnvelopeType::Res, "never-issued", "svc");
        stray.content = json!(1);
        peer.send(&stray);

        peer.send(&Envelope::request("q1", "svc", json!(2)).with_callback());
        assert_eq!(next(&mut peer).await.id, "q1");
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn close_fails_pending_and_deregisters() {
        let h = Harness::new(GatewayConfig::default());
        let (mut peer, _handle, task) = h.open(1);
        let identity = login(&mut peer, "alice").await;

        let waiter = tokio::spawn(h.fabric.request(
            "svc",
            &identity,
            json!("ping"),
            Duration::from_secs(30),
        ));
        next(&mut peer).await;
        peer.hang_up();

        assert_eq!(task.await.unwrap(), CloseReason::PeerClosed);
        assert_eq!(waiter.await.unwrap(), Err(FabricError::Disconnected));
        assert!(!h.fabric.contains(&identity));
        assert!(h.ctx.identities.is_empty());
        assert_eq!(
            h.events().last(),
            Some(&GatewayEvent::Disconnected {
                identity: Some(identity)
            })
        );
    }

    #[tokio::test]
    async fn pre_auth_queue_overflow_closes_connection() {
        let config = GatewayConfig {
            max_pre_auth_queue: 2,
            ..GatewayConfig::default()
        };
        let h = Harness::new(config);
        let (peer, _handle, task) = h.open(1);
        for i in 0..3 {
            peer.send(&Envelope::request(format!("r{i}"), "svc", json!(i)));
        }
        assert_eq!(task.await.unwrap(), CloseReason::QueueOverflow);
    }

    #[tokio::test]
    async fn malformed_frames_are_ignored() {
        let h = Harness::new(GatewayConfig::default());
        let (mut peer, _handle, task) = h.open(1);

        peer.send_raw("not json");
        peer.send_raw(r#"{"id":"x"}"#);
        peer.send_raw(r#"{"id":"x","to":"y","type":"req","bogus":1}"#);
        peer.send_raw(r#"{"id":"x","to":"y","type":"wave"}"#);
        peer.send_raw(r#"{"id":"x","to":"y","type":"req","version":99}"#);

        let identity = login(&mut peer, "alice").await;
        assert!(identity.starts_with("alice/"));
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn second_login_is_ignored() {
        let h = Harness::new(GatewayConfig::default());
        echo(&h.fabric, "svc");
        let (mut peer, _handle, _task) = h.open(1);
        let identity = login(&mut peer, "alice").await;

        peer.send(&Envelope::login("again", json!({ "username": "mallory" })));
        peer.send(&Envelope::request("q1", "svc", json!(1)).with_callback());
        let res = next(&mut peer).await;
        assert_eq!(res.id, "q1");
        assert_eq!(res.to, identity);
    }

    #[tokio::test]
    async fn login_ack_can_be_disabled() {
        let config = GatewayConfig {
            login_ack: false,
            ..GatewayConfig::default()
        };
        let h = Harness::new(config);
        echo(&h.fabric, "svc");
        let (mut peer, _handle, _task) = h.open(1);

        peer.send(&Envelope::login("l", json!("alice")));
        peer.send(&Envelope::request("q1", "svc", json!(1)).with_callback());
        let first = next(&mut peer).await;
        assert_eq!(first.id, "q1");
        assert!(first.to.starts_with("alice/"));
    }

    /// Reads from a memory pipe; every write fails.
    struct BrokenWrites(memory::MemoryTransport);

    impl FrameTransport for BrokenWrites {
        async fn recv_text(&mut self) -> hub_core::HubResult<Option<String>> {
            self.0.recv_text().await
        }

        async fn send_text(&mut self, _text: &str) -> hub_core::HubResult<()> {
            Err(HubError::Transport("connection reset".into()))
        }

        async fn close(&mut self) -> hub_core::HubResult<()> {
            self.0.close().await
        }
    }

    #[tokio::test]
    async fn write_failure_is_reported_as_error() {
        let h = Harness::new(GatewayConfig::default());
        let (transport, peer) = memory::pair();
        let session = ConnectionSession::new(1, h.ctx.clone(), BrokenWrites(transport));
        let task = tokio::spawn(session.run(h.shutdown.subscribe()));

        peer.send(&Envelope::login("l", json!("alice")));
        let reason = task.await.unwrap();
        assert!(matches!(reason, CloseReason::Transport(_)));

        let events = h.events();
        let identity = match events.first() {
            Some(GatewayEvent::Connected { identity }) => identity.clone(),
            other => panic!("expected Connected, got {other:?}"),
        };
        assert!(!h.fabric.contains(&identity));
        assert_eq!(
            &events[1..],
            &[
                GatewayEvent::Error {
                    message: "transport error: connection reset".into()
                },
                GatewayEvent::Disconnected {
                    identity: Some(identity)
                },
            ]
        );
    }

    #[tokio::test]
    async fn logout_and_shutdown_close_the_session() {
        let h = Harness::new(GatewayConfig::default());
        let (mut peer, handle, task) = h.open(1);
        login(&mut peer, "alice").await;
        assert!(handle.logout());
        assert_eq!(task.await.unwrap(), CloseReason::Logout);
        assert!(handle.is_closed());

        let (_peer, _handle, task) = h.open(2);
        h.shutdown.send(()).unwrap();
        assert_eq!(task.await.unwrap(), CloseReason::Shutdown);
    }
}
