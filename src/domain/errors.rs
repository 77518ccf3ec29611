//! Error taxonomy for the swarm client.
//!
//! Every failure surfaced by the connection, client, orchestration, and realtime
//! layers is a [`ClientError`]. Variants carry owned strings so a single failure
//! can be cloned out to every pending operation it affects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::models::envelope::WireError;

/// Broad classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConnectionError,
    TimeoutError,
    ValidationError,
    ResourceError,
    AgentError,
    TaskError,
    SwarmError,
    NetworkError,
    MemoryError,
    AuthenticationError,
    RateLimitError,
    UnknownError,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ResourceError => "RESOURCE_ERROR",
            Self::AgentError => "AGENT_ERROR",
            Self::TaskError => "TASK_ERROR",
            Self::SwarmError => "SWARM_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::MemoryError => "MEMORY_ERROR",
            Self::AuthenticationError => "AUTHENTICATION_ERROR",
            Self::RateLimitError => "RATE_LIMIT_ERROR",
            Self::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// Parse a server-supplied error code.
    ///
    /// Accepts the canonical `SCREAMING_SNAKE_CASE` form as well as the bare
    /// category (`"timeout"`, `"rate_limit"`), case-insensitively.
    pub fn from_code(code: &str) -> Self {
        let normalized = code.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        let bare = normalized.strip_suffix("_ERROR").unwrap_or(&normalized);
        match bare {
            "CONNECTION" => Self::ConnectionError,
            "TIMEOUT" => Self::TimeoutError,
            "VALIDATION" => Self::ValidationError,
            "RESOURCE" => Self::ResourceError,
            "AGENT" => Self::AgentError,
            "TASK" => Self::TaskError,
            "SWARM" => Self::SwarmError,
            "NETWORK" => Self::NetworkError,
            "MEMORY" => Self::MemoryError,
            "AUTHENTICATION" | "AUTH" => Self::AuthenticationError,
            "RATE_LIMIT" | "RATELIMIT" => Self::RateLimitError,
            _ => Self::UnknownError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the swarm client.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Operation '{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        task_id: Option<String>,
    },

    #[error("Resource error: {message}")]
    Resource { message: String },

    #[error("Agent error: {message}")]
    Agent {
        message: String,
        agent_id: Option<String>,
        retryable: bool,
    },

    #[error("Task error: {message}")]
    Task {
        message: String,
        task_id: Option<String>,
        retryable: bool,
    },

    #[error("Swarm error: {message}")]
    Swarm {
        message: String,
        swarm_id: Option<String>,
        retryable: bool,
    },

    #[error("Network error: {message}")]
    Network { message: String, status: Option<u16> },

    #[error("Memory error: {message}")]
    Memory { message: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimit {
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            task_id: None,
        }
    }

    /// Validation failure attributed to a specific task.
    pub fn invalid_task(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            task_id: Some(task_id.into()),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
        }
    }

    /// Malformed payload received from the server.
    pub fn malformed(operation: &str, err: &serde_json::Error) -> Self {
        Self::Unknown {
            message: format!("malformed '{operation}' response: {err}"),
        }
    }

    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::ConnectionError,
            Self::Timeout { .. } => ErrorKind::TimeoutError,
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::Resource { .. } => ErrorKind::ResourceError,
            Self::Agent { .. } => ErrorKind::AgentError,
            Self::Task { .. } => ErrorKind::TaskError,
            Self::Swarm { .. } => ErrorKind::SwarmError,
            Self::Network { .. } => ErrorKind::NetworkError,
            Self::Memory { .. } => ErrorKind::MemoryError,
            Self::Authentication { .. } => ErrorKind::AuthenticationError,
            Self::RateLimit { .. } => ErrorKind::RateLimitError,
            Self::Unknown { .. } => ErrorKind::UnknownError,
        }
    }

    /// Whether the caller may reasonably retry the failed operation.
    ///
    /// - Connection, timeout, and rate-limit failures are transient.
    /// - Agent, task, and swarm failures carry the server's own verdict.
    /// - Network failures retry on 5xx (or unknown status) but not on 4xx.
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } | Self::RateLimit { .. } => true,
            Self::Agent { retryable, .. }
            | Self::Task { retryable, .. }
            | Self::Swarm { retryable, .. } => *retryable,
            Self::Network { status, .. } => match status {
                Some(code) => *code >= 500,
                None => true,
            },
            Self::Validation { .. }
            | Self::Resource { .. }
            | Self::Memory { .. }
            | Self::Authentication { .. }
            | Self::Unknown { .. } => false,
        }
    }

    /// The task id this error names, if any.
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Validation { task_id, .. } | Self::Task { task_id, .. } => task_id.as_deref(),
            _ => None,
        }
    }

    /// Map an error frame received from the server onto the taxonomy.
    pub fn from_wire(error: WireError) -> Self {
        let kind = error
            .code
            .as_deref()
            .map_or(ErrorKind::UnknownError, ErrorKind::from_code);
        let message = error.message;

        match kind {
            ErrorKind::ConnectionError => Self::Connection { message },
            ErrorKind::TimeoutError => Self::Timeout {
                operation: error.entity_id.unwrap_or_default(),
                timeout_ms: 0,
            },
            ErrorKind::ValidationError => Self::Validation {
                message,
                task_id: error.entity_id,
            },
            ErrorKind::ResourceError => Self::Resource { message },
            ErrorKind::AgentError => Self::Agent {
                message,
                agent_id: error.entity_id,
                retryable: error.retryable.unwrap_or(false),
            },
            ErrorKind::TaskError => Self::Task {
                message,
                task_id: error.entity_id,
                retryable: error.retryable.unwrap_or(false),
            },
            ErrorKind::SwarmError => Self::Swarm {
                message,
                swarm_id: error.entity_id,
                retryable: error.retryable.unwrap_or(false),
            },
            ErrorKind::NetworkError => Self::Network {
                message,
                status: error.status,
            },
            ErrorKind::MemoryError => Self::Memory { message },
            ErrorKind::AuthenticationError => Self::Authentication { message },
            ErrorKind::RateLimitError => Self::RateLimit {
                message,
                retry_after_ms: error.retry_after_ms,
            },
            ErrorKind::UnknownError => Self::Unknown { message },
        }
    }

    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Authentication { message: body },
            429 => Self::RateLimit {
                message: body,
                retry_after_ms: None,
            },
            _ => Self::Network {
                message: format!("HTTP {status}: {body}"),
                status: Some(status),
            },
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Unknown {
            message: format!("serialization error: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(code: &str, retryable: Option<bool>) -> WireError {
        WireError {
            code: Some(code.to_string()),
            message: "boom".to_string(),
            retryable,
            status: None,
            entity_id: Some("t1".to_string()),
            retry_after_ms: None,
        }
    }

    #[test]
    fn test_default_retryability() {
        assert!(ClientError::connection("down").is_retryable());
        assert!(ClientError::timeout("swarm_status", Duration::from_secs(1)).is_retryable());
        assert!(!ClientError::validation("cycle").is_retryable());
        assert!(!ClientError::resource("exhausted").is_retryable());
        assert!(!ClientError::unknown("?").is_retryable());
        assert!(ClientError::RateLimit {
            message: "slow down".into(),
            retry_after_ms: Some(500)
        }
        .is_retryable());
    }

    #[test]
    fn test_network_retryable_by_status() {
        assert!(ClientError::from_status(503, "unavailable".into()).is_retryable());
        assert!(!ClientError::from_status(404, "missing".into()).is_retryable());
        assert_eq!(
            ClientError::from_status(401, "nope".into()).kind(),
            ErrorKind::AuthenticationError
        );
        assert_eq!(
            ClientError::from_status(429, "later".into()).kind(),
            ErrorKind::RateLimitError
        );
    }

    #[test]
    fn test_from_wire_uses_server_flag() {
        let err = ClientError::from_wire(wire("TASK_ERROR", Some(true)));
        assert_eq!(err.kind(), ErrorKind::TaskError);
        assert!(err.is_retryable());
        assert_eq!(err.task_id(), Some("t1"));

        let err = ClientError::from_wire(wire("agent", None));
        assert_eq!(err.kind(), ErrorKind::AgentError);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_from_code_variants() {
        assert_eq!(ErrorKind::from_code("rate-limit"), ErrorKind::RateLimitError);
        assert_eq!(ErrorKind::from_code("TIMEOUT_ERROR"), ErrorKind::TimeoutError);
        assert_eq!(ErrorKind::from_code("whatever"), ErrorKind::UnknownError);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::ValidationError.to_string(), "VALIDATION_ERROR");
    }
}
