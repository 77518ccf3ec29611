//! WebSocket transport over `tokio-tungstenite`.
//!
//! Envelopes travel as JSON text frames. Heartbeats use WebSocket control
//! frames whose payload is the big-endian nonce.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::domain::errors::{ClientError, ClientResult};
use crate::domain::models::{Envelope, WireMessage};
use crate::domain::ports::{Duplex, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Production socket transport.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    channel_capacity: usize,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketTransport {
    pub const fn new() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &str) -> ClientResult<Duplex> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| ClientError::connection(format!("WebSocket connect to {url}: {e}")))?;
        debug!(url, "WebSocket handshake complete");

        let (outbound_tx, outbound_rx) = mpsc::channel(self.channel_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.channel_capacity);
        tokio::spawn(socket_loop(ws, outbound_rx, inbound_tx));

        Ok(Duplex {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

fn encode(message: WireMessage) -> Option<Message> {
    match message {
        WireMessage::Frame(envelope) => match serde_json::to_string(&envelope) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                warn!(error = %e, "Failed to encode outbound envelope");
                None
            }
        },
        WireMessage::Ping(nonce) => Some(Message::Ping(nonce.to_be_bytes().to_vec().into())),
        WireMessage::Pong(nonce) => Some(Message::Pong(nonce.to_be_bytes().to_vec().into())),
        WireMessage::Close => Some(Message::Close(None)),
    }
}

fn decode_nonce(payload: &[u8]) -> Option<u64> {
    <[u8; 8]>::try_from(payload).ok().map(u64::from_be_bytes)
}

fn decode(message: Message) -> Option<WireMessage> {
    match message {
        Message::Text(text) => match serde_json::from_str::<Envelope>(&text) {
            Ok(envelope) => Some(WireMessage::Frame(envelope)),
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                None
            }
        },
        Message::Pong(payload) => decode_nonce(&payload).map(WireMessage::Pong),
        Message::Close(_) => Some(WireMessage::Close),
        // tungstenite answers pings on its own
        _ => None,
    }
}

async fn socket_loop(
    ws: WsStream,
    mut outbound: mpsc::Receiver<WireMessage>,
    inbound: mpsc::Sender<WireMessage>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            msg = outbound.recv() => {
                let Some(msg) = msg else {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                let closing = matches!(msg, WireMessage::Close);
                let Some(frame) = encode(msg) else { continue };
                if ws_tx.send(frame).await.is_err() || closing {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else { break };
                let Some(wire) = decode(msg) else { continue };
                let closing = matches!(wire, WireMessage::Close);
                if inbound.send(wire).await.is_err() || closing {
                    break;
                }
            }
        }
    }
    debug!("WebSocket loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nonce_roundtrip_through_control_frame() {
        let Some(Message::Ping(payload)) = encode(WireMessage::Ping(42)) else {
            panic!("expected ping frame");
        };
        assert_eq!(decode_nonce(&payload), Some(42));
        assert_eq!(decode_nonce(&[1, 2, 3]), None);
    }

    #[test]
    fn test_decode_text_frame() {
        let text = json!({"id": "op-1", "type": "response", "data": {"ok": true}}).to_string();
        let decoded = decode(Message::Text(text.into()));
        assert_eq!(
            decoded,
            Some(WireMessage::Frame(Envelope::response("op-1", json!({"ok": true}))))
        );
    }

    #[test]
    fn test_malformed_text_is_dropped() {
        assert_eq!(decode(Message::Text("not json".to_string().into())), None);
    }
}
