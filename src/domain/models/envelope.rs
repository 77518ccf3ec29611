//! Transport-agnostic wire envelopes.
//!
//! Requests, responses, and error frames are correlated by `id`. Push events
//! carry no id unless they answer a pending operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::SwarmEvent;

/// A JSON frame exchanged with the orchestration service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Request {
        id: String,
        operation: String,
        #[serde(default)]
        params: Value,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    Response {
        id: String,
        #[serde(default)]
        data: Value,
    },
    Error {
        id: String,
        error: WireError,
    },
    Event {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        data: SwarmEvent,
    },
}

impl Envelope {
    pub fn request(id: impl Into<String>, operation: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id: id.into(),
            operation: operation.into(),
            params,
            timestamp: Utc::now(),
        }
    }

    pub fn response(id: impl Into<String>, data: Value) -> Self {
        Self::Response {
            id: id.into(),
            data,
        }
    }

    pub fn error(id: impl Into<String>, error: WireError) -> Self {
        Self::Error {
            id: id.into(),
            error,
        }
    }

    pub const fn event(data: SwarmEvent) -> Self {
        Self::Event { id: None, data }
    }

    /// Correlation id, if the frame carries one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } | Self::Error { id, .. } => {
                Some(id)
            }
            Self::Event { id, .. } => id.as_deref(),
        }
    }
}

/// Error body of an `error` frame.
///
/// Servers may send either a bare message string or a structured object;
/// both deserialize into this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "WireErrorRepr")]
pub struct WireError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl WireError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            retryable: None,
            status: None,
            entity_id: None,
            retry_after_ms: None,
        }
    }

    #[must_use]
    pub const fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    #[must_use]
    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireErrorRepr {
    Message(String),
    Detailed(DetailedWireError),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailedWireError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    retryable: Option<bool>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    entity_id: Option<String>,
    #[serde(default)]
    retry_after_ms: Option<u64>,
}

impl From<WireErrorRepr> for WireError {
    fn from(repr: WireErrorRepr) -> Self {
        match repr {
            WireErrorRepr::Message(message) => Self {
                code: None,
                message,
                retryable: None,
                status: None,
                entity_id: None,
                retry_after_ms: None,
            },
            WireErrorRepr::Detailed(detail) => Self {
                code: detail.code,
                message: detail.message,
                retryable: detail.retryable,
                status: detail.status,
                entity_id: detail.entity_id,
                retry_after_ms: detail.retry_after_ms,
            },
        }
    }
}

/// A unit travelling over a persistent transport channel.
///
/// Heartbeat pings and pongs carry a nonce so the connection can pair them.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Frame(Envelope),
    Ping(u64),
    Pong(u64),
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let env = Envelope::request("op-1", "swarm_status", json!({"swarmId": "s1"}));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "request");
        assert_eq!(value["id"], "op-1");
        assert_eq!(value["operation"], "swarm_status");
        assert_eq!(value["params"]["swarmId"], "s1");
        assert!(value["timestamp"].is_i64());
    }

    #[test]
    fn test_parse_response_and_error_frames() {
        let frame: Envelope =
            serde_json::from_value(json!({"id": "a", "type": "response", "data": {"ok": true}}))
                .unwrap();
        assert_eq!(frame, Envelope::response("a", json!({"ok": true})));

        let frame: Envelope =
            serde_json::from_value(json!({"id": "b", "type": "error", "error": "nope"})).unwrap();
        match frame {
            Envelope::Error { id, error } => {
                assert_eq!(id, "b");
                assert_eq!(error.message, "nope");
                assert!(error.code.is_none());
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_parse_structured_error() {
        let frame: Envelope = serde_json::from_value(json!({
            "id": "c",
            "type": "error",
            "error": {"code": "TASK_ERROR", "message": "bad task", "retryable": true, "entityId": "t9"}
        }))
        .unwrap();
        let Envelope::Error { error, .. } = frame else {
            panic!("expected error frame");
        };
        assert_eq!(error.code.as_deref(), Some("TASK_ERROR"));
        assert_eq!(error.retryable, Some(true));
        assert_eq!(error.entity_id.as_deref(), Some("t9"));
    }

    #[test]
    fn test_parse_push_event() {
        let frame: Envelope = serde_json::from_value(json!({
            "type": "event",
            "data": {
                "type": "task_completed",
                "timestamp": 1_700_000_000_000_i64,
                "source": "orchestrator",
                "data": {"swarmId": "s1", "taskId": "t1"}
            }
        }))
        .unwrap();
        assert!(frame.id().is_none());
        let Envelope::Event { data, .. } = frame else {
            panic!("expected event frame");
        };
        assert_eq!(data.swarm_id(), Some("s1"));
    }
}
