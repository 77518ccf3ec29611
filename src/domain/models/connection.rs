//! Connection lifecycle model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a logical connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }

    /// Whether `next` is a defined edge out of this state.
    ///
    /// Self-transitions are not edges.
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected | Self::Error, Self::Connecting)
                | (
                    Self::Connecting,
                    Self::Connected | Self::Reconnecting | Self::Error | Self::Disconnected
                )
                | (
                    Self::Connected,
                    Self::Reconnecting | Self::Disconnected | Self::Error
                )
                | (
                    Self::Reconnecting,
                    Self::Connecting | Self::Error | Self::Disconnected
                )
                | (Self::Error, Self::Disconnected)
        )
    }

    /// Terminal states only leave via an explicit `connect()`.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which channel carries operations while connected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Persistent duplex socket with heartbeat and push events.
    #[default]
    Socket,
    /// One request per operation, no push events.
    Request,
}

/// Observable snapshot of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub url: String,
    pub reconnect_attempts: u32,
    /// Round trip of the last answered heartbeat.
    pub latency_ms: Option<u64>,
    pub last_ping: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub channel: ChannelKind,
}

impl ConnectionState {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            url: url.into(),
            reconnect_attempts: 0,
            latency_ms: None,
            last_ping: None,
            connected_at: None,
            channel: ChannelKind::Socket,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionStatus::*;
    use super::*;

    #[test]
    fn test_defined_edges() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Reconnecting));
        assert!(Reconnecting.can_transition_to(Connecting));
        assert!(Reconnecting.can_transition_to(Error));
        assert!(Error.can_transition_to(Connecting));
    }

    #[test]
    fn test_undefined_edges() {
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Reconnecting));
        assert!(!Error.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Connected));
    }

    #[test]
    fn test_new_state_is_disconnected() {
        let state = ConnectionState::new("ws://localhost:9000");
        assert_eq!(state.status, Disconnected);
        assert!(!state.is_connected());
        assert_eq!(state.reconnect_attempts, 0);
    }
}
