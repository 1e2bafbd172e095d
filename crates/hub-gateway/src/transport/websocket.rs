//! WebSocket listener using tokio-tungstenite.
//!
//! Upgrade requests outside the configured path prefix are answered with
//! `404`, and a peer that does not finish the upgrade within the handshake
//! deadline is dropped. Each accepted connection is wrapped in a
//! [`WsTransport`] carrying one envelope per text frame.

use crate::config::path_matches;
use futures_util::{SinkExt, StreamExt};
use hub_core::{FrameTransport, HubError, HubResult};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// Maximum size of a WebSocket message or frame (1 MiB). Larger messages fail
/// the connection.
const MAX_WS_FRAME_SIZE: usize = 1_048_576;

/// What the listener reports to the gateway.
pub enum ListenerEvent {
    Accepted(WsTransport),
    /// Accept or handshake failure. The listener keeps running.
    Error(String),
}

/// Start the WebSocket listener.
///
/// `handshake_timeout` bounds the HTTP upgrade of each connection.
/// Returns the bound address, a receiver that yields accepted connections,
/// and the accept task (abort it to stop listening).
pub async fn start_listener(
    bind_addr: SocketAddr,
    path: String,
    handshake_timeout: Duration,
) -> HubResult<(SocketAddr, mpsc::Receiver<ListenerEvent>, JoinHandle<()>)> {
    let tcp_listener = TcpListener::bind(bind_addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            HubError::AddressInUse(bind_addr.to_string())
        } else {
            HubError::Transport(format!("WS bind failed: {e}"))
        }
    })?;
    let local_addr = tcp_listener.local_addr()?;

    info!(addr = %local_addr, path = %path, "WebSocket listener started");

    let (tx, rx) = mpsc::channel::<ListenerEvent>(64);

    let task = tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let path = path.clone();
                    tokio::spawn(async move {
                        let event = match upgrade(stream, &path, handshake_timeout).await {
                            Ok(ws_stream) => {
                                debug!(remote = %addr, "WebSocket connection accepted");
                                ListenerEvent::Accepted(WsTransport::new(ws_stream, addr))
                            }
                            Err(e) => {
                                warn!(remote = %addr, error = %e, "WebSocket handshake failed");
                                ListenerEvent::Error(format!("handshake with {addr} failed: {e}"))
                            }
                        };
                        if tx.send(event).await.is_err() {
                            debug!("WebSocket connection channel closed");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                    if tx
                        .send(ListenerEvent::Error(format!("accept failed: {e}")))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    });

    Ok((local_addr, rx, task))
}

async fn upgrade(
    stream: TcpStream,
    prefix: &str,
    deadline: Duration,
) -> HubResult<WebSocketStream<TcpStream>> {
    let prefix = prefix.to_string();
    let check_path = move |request: &Request, response: Response| {
        let path = request.uri().path();
        if path_matches(&prefix, path) {
            Ok(response)
        } else {
            let mut refusal = ErrorResponse::new(Some(format!("no endpoint at {path}")));
            *refusal.status_mut() = StatusCode::NOT_FOUND;
            Err(refusal)
        }
    };
    let handshake =
        tokio_tungstenite::accept_hdr_async_with_config(stream, check_path, Some(ws_config()));
    match tokio::time::timeout(deadline, handshake).await {
        Ok(Ok(ws_stream)) => Ok(ws_stream),
        Ok(Err(e)) => Err(HubError::Transport(e.to_string())),
        Err(_) => Err(HubError::Timeout),
    }
}

fn ws_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(MAX_WS_FRAME_SIZE);
    config.max_frame_size = Some(MAX_WS_FRAME_SIZE);
    config
}

/// One accepted WebSocket connection.
pub struct WsTransport {
    stream: WebSocketStream<TcpStream>,
    remote_addr: SocketAddr,
}

impl WsTransport {
    pub fn new(stream: WebSocketStream<TcpStream>, remote_addr: SocketAddr) -> Self {
        Self {
            stream,
            remote_addr,
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl FrameTransport for WsTransport {
    /// Text frames carry envelopes. Binary frames are accepted when they hold
    /// UTF-8, so clients that only send binary still work.
    async fn recv_text(&mut self) -> HubResult<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(data))) => {
                    match String::from_utf8(data.to_vec()) {
                        Ok(text) => return Ok(Some(text)),
                        Err(_) => {
                            warn!(remote = %self.remote_addr, "dropping non-UTF-8 binary frame");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => return Ok(None),
                // tungstenite answers pings itself
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(HubError::Transport(format!("WS recv failed: {e}")));
                }
                None => return Ok(None),
            }
        }
    }

    async fn send_text(&mut self, text: &str) -> HubResult<()> {
        self.stream
            .send(Message::Text(text.to_string().into()))
            .await
            .map_err(|e| HubError::Transport(format!("WS send failed: {e}")))
    }

    async fn close(&mut self) -> HubResult<()> {
        self.stream
            .close(None)
            .await
            .map_err(|e| HubError::Transport(format!("WS close failed: {e}")))
    }
}
