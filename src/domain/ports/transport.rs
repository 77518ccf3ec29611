//! Transport contracts used by [`Connection`](crate::services::Connection).
//!
//! Production code and test doubles implement the same traits, so the
//! connection state machine is exercised identically against both.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::errors::ClientResult;
use crate::domain::models::WireMessage;

/// Both halves of an open persistent channel.
///
/// The channel is considered lost once `inbound` yields `None` or
/// [`WireMessage::Close`]. Dropping `outbound` asks the transport to close.
#[derive(Debug)]
pub struct Duplex {
    pub outbound: mpsc::Sender<WireMessage>,
    pub inbound: mpsc::Receiver<WireMessage>,
}

/// Persistent, full-duplex channel (socket).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a channel to `url`.
    ///
    /// # Errors
    /// Returns a connection error when the handshake fails.
    async fn open(&self, url: &str) -> ClientResult<Duplex>;
}

/// Non-persistent fallback issuing one request per operation.
#[async_trait]
pub trait RequestTransport: Send + Sync {
    /// Issue `operation` with `params` and return the response body.
    async fn request(&self, operation: &str, params: Value) -> ClientResult<Value>;
}
