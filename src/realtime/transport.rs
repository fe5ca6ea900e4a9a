//! Transport seam between the connection manager and the socket.
//!
//! The connection manager only sees a [`TransportLink`]: an outbound frame
//! sender and an inbound event receiver. [`WebSocketTransport`] is the
//! production implementation; tests substitute scripted transports.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace, warn};

use super::events::ClientMessage;
use crate::config::AuthMode;
use crate::error::{Result, SyncError};

/// Close code for an intentional, clean shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Where and how to open a connection.
#[derive(Clone)]
pub struct Endpoint {
    pub url: url::Url,
    pub token: String,
    pub auth_mode: AuthMode,
    /// Client ping cadence; `None` disables pings.
    pub ping_interval: Option<Duration>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url.as_str())
            .field("token", &"<redacted>")
            .field("auth_mode", &self.auth_mode)
            .field("ping_interval", &self.ping_interval)
            .finish()
    }
}

/// Frame written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Close the socket with the given code; the link ends afterwards.
    Close { code: u16, reason: String },
}

/// Something the socket reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Inbound text frame.
    Message(String),
    /// The peer closed the socket. `code` is `None` when no close frame was seen.
    Closed { code: Option<u16>, reason: String },
    /// Socket-level failure; the link is dead.
    Error(String),
}

impl TransportEvent {
    /// Whether the event ends the link.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Message(_))
    }
}

/// An open connection.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens connections to the sync server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection; resolves once the server has acknowledged the open.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] if the connection cannot be established.
    async fn open(&self, endpoint: &Endpoint) -> Result<TransportLink>;
}

// ---------------------------------------------------------------------------
// WebSocket transport
// ---------------------------------------------------------------------------

/// Raw WebSocket transport carrying `{"type","data"}` text frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

/// URL actually dialed, with the token appended in query mode.
fn dial_url(endpoint: &Endpoint) -> url::Url {
    let mut url = endpoint.url.clone();
    if endpoint.auth_mode == AuthMode::Query {
        let token = format!("token={}", urlencoding::encode(&endpoint.token));
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => format!("{existing}&{token}"),
            _ => token,
        };
        url.set_query(Some(&query));
    }
    url
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<TransportLink> {
        let url = dial_url(endpoint);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| SyncError::Transport(format!("request: {e}")))?;
        if endpoint.auth_mode == AuthMode::Header {
            let value = HeaderValue::from_str(&format!("Bearer {}", endpoint.token))
                .map_err(|e| SyncError::Transport(format!("auth header: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        debug!(url = %endpoint.url, mode = ?endpoint.auth_mode, "opening websocket");
        let (ws_stream, _) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| SyncError::Transport(format!("connect: {e}")))?;

        let (mut write, read) = ws_stream.split();

        if endpoint.auth_mode == AuthMode::Handshake {
            let auth = ClientMessage::Auth {
                token: endpoint.token.clone(),
            }
            .to_frame()?;
            write
                .send(Message::Text(auth))
                .await
                .map_err(|e| SyncError::Transport(format!("send auth: {e}")))?;
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump(
            write,
            read,
            outbound_rx,
            inbound_tx,
            endpoint.ping_interval,
        ));

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Shuttle frames between the socket and the link until either side ends.
async fn pump<W, R>(
    mut write: W,
    mut read: R,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
    ping_interval: Option<Duration>,
) where
    W: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    R: futures_util::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    // Without pings the interval still exists but is never polled.
    let period = ping_interval.unwrap_or(Duration::from_secs(3600));
    let mut ping = tokio::time::interval(period);
    // Skip the first immediate tick.
    ping.tick().await;

    loop {
        tokio::select! {
            msg = read.next() => {
                let event = match msg {
                    Some(Ok(Message::Text(text))) => TransportEvent::Message(text),
                    Some(Ok(Message::Close(frame))) => TransportEvent::Closed {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
                    },
                    None => TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".into(),
                    },
                    Some(Err(e)) => TransportEvent::Error(format!("read error: {e}")),
                    // Binary, Ping/Pong frames handled by tungstenite.
                    Some(Ok(_)) => continue,
                };
                let terminal = event.is_terminal();
                if inbound_tx.send(event).is_err() || terminal {
                    break;
                }
            }
            frame = outbound_rx.recv() => {
                match frame {
                    Some(Frame::Text(text)) => {
                        trace!(len = text.len(), "sending frame");
                        if let Err(e) = write.send(Message::Text(text)).await {
                            let _ = inbound_tx.send(TransportEvent::Error(format!("send error: {e}")));
                            break;
                        }
                    }
                    Some(Frame::Close { code, reason }) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(frame))).await {
                            debug!("close frame not delivered: {e}");
                        }
                        break;
                    }
                    // Link dropped by the owner.
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = ping.tick(), if ping_interval.is_some() => {
                if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                    warn!("ping failed: {e}");
                    let _ = inbound_tx.send(TransportEvent::Error(format!("ping error: {e}")));
                    break;
                }
            }
        }
    }
}
