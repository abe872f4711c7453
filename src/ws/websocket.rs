//! Socket.IO over WebSocket.
//!
//! Each [`SocketIoTransport::connect`] opens a WebSocket to the Engine.IO
//! endpoint and spawns a pump task that speaks the packet codec in
//! [`super::socketio`]. The pump answers Engine.IO pings, joins the default
//! namespace after the handshake, and turns namespace connect, events,
//! ping/pong liveness, and link loss into [`TransportSignal`]s.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::socketio::{self, ENGINE_PONG, NAMESPACE_CONNECT, Packet};
use super::transport::{Transport, TransportLink, TransportSignal};
use crate::error::ClientError;
use crate::protocol::Frame;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport that reaches the server over Socket.IO.
#[derive(Debug, Clone)]
pub struct SocketIoTransport {
    endpoint: Url,
}

impl SocketIoTransport {
    /// Builds a transport for an `http(s)://host:port` server address.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the address is not usable.
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        Ok(Self {
            endpoint: socketio::endpoint(server_url)?,
        })
    }

    /// The WebSocket endpoint this transport dials.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl Transport for SocketIoTransport {
    async fn connect(&self) -> Result<TransportLink, ClientError> {
        tracing::debug!(endpoint = %self.endpoint, "opening websocket");
        let (socket, _response) = tokio_tungstenite::connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| ClientError::Transport(format!("connect to {}: {e}", self.endpoint)))?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        tokio::spawn(pump(socket, outbound_rx, inbound_tx));
        Ok(TransportLink { outbound, inbound })
    }
}

/// Moves packets between the socket and the link channels until either
/// side goes away.
async fn pump(
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::UnboundedSender<TransportSignal>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let reason = loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match socketio::decode(text.as_str()) {
                            Ok(Packet::Open { sid, ping_interval_ms, ping_timeout_ms }) => {
                                tracing::debug!(%sid, ping_interval_ms, ping_timeout_ms, "engine.io handshake");
                                Some(NAMESPACE_CONNECT)
                            }
                            Ok(Packet::Ping) => {
                                if inbound.send(TransportSignal::Alive).is_err() {
                                    break "client dropped the link".to_string();
                                }
                                Some(ENGINE_PONG)
                            }
                            Ok(Packet::Pong) => {
                                if inbound.send(TransportSignal::Alive).is_err() {
                                    break "client dropped the link".to_string();
                                }
                                None
                            }
                            Ok(Packet::Connect) => {
                                if inbound.send(TransportSignal::Connected).is_err() {
                                    break "client dropped the link".to_string();
                                }
                                None
                            }
                            Ok(Packet::Event(frame)) => {
                                if inbound.send(TransportSignal::Frame(frame)).is_err() {
                                    break "client dropped the link".to_string();
                                }
                                None
                            }
                            Ok(Packet::ConnectError(message)) => {
                                break format!("connection refused: {message}");
                            }
                            Ok(Packet::Disconnect) => break "server left the namespace".to_string(),
                            Ok(Packet::Close) => break "server closed the session".to_string(),
                            Ok(Packet::Noop) => None,
                            Ok(Packet::Unsupported(what)) => {
                                tracing::debug!(%what, "ignoring packet");
                                None
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "dropping malformed packet");
                                None
                            }
                        };
                        if let Some(reply) = reply
                            && let Err(e) = ws_tx.send(Message::text(reply)).await
                        {
                            break format!("write failed: {e}");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break "websocket closed".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("websocket error: {e}"),
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    // Link dropped by the client: close quietly.
                    let _ = ws_tx.send(Message::Close(None)).await;
                    tracing::debug!("websocket closed by client");
                    return;
                };
                match socketio::encode_event(&frame) {
                    Ok(text) => {
                        if let Err(e) = ws_tx.send(Message::text(text)).await {
                            break format!("write failed: {e}");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, event = %frame.event, "dropping unencodable frame"),
                }
            }
        }
    };

    tracing::debug!(%reason, "websocket pump stopped");
    let _ = inbound.send(TransportSignal::Disconnected { reason });
}
