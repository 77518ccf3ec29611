//! Push events emitted by the orchestration service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::{ClientError, ClientResult};

/// Discriminator of a push event (`data.type` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SwarmStatusChanged,
    AgentStatusChanged,
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskFailed,
    MetricsUpdated,
    Error,
    PerformanceAlert,
    #[serde(other)]
    Unknown,
}

impl EventKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SwarmStatusChanged => "swarm_status_changed",
            Self::AgentStatusChanged => "agent_status_changed",
            Self::TaskStarted => "task_started",
            Self::TaskProgress => "task_progress",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::MetricsUpdated => "metrics_updated",
            Self::Error => "error",
            Self::PerformanceAlert => "performance_alert",
            Self::Unknown => "unknown",
        }
    }

    pub const fn is_task_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::TaskStarted | Self::TaskProgress | Self::TaskCompleted | Self::TaskFailed
        )
    }

    const fn default_severity(self) -> EventSeverity {
        match self {
            Self::Error | Self::TaskFailed => EventSeverity::Error,
            Self::PerformanceAlert => EventSeverity::Warning,
            Self::TaskProgress | Self::MetricsUpdated => EventSeverity::Debug,
            _ => EventSeverity::Info,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match serde_json::from_value::<Self>(Value::String(s.to_lowercase()))? {
            Self::Unknown => Err(ClientError::validation(format!("unknown event type: {s}"))),
            kind => Ok(kind),
        }
    }
}

/// Event severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for EventSeverity {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            _ => Err(ClientError::validation(format!("invalid severity: {s}"))),
        }
    }
}

/// A push event as carried in the `data` field of an `event` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub data: Value,
}

impl SwarmEvent {
    pub fn new(kind: EventKind, source: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            source: source.into(),
            data,
        }
    }

    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }

    pub fn swarm_id(&self) -> Option<&str> {
        self.field("swarmId")
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.field("agentId")
    }

    pub fn task_id(&self) -> Option<&str> {
        self.field("taskId")
    }

    /// Severity from the payload, falling back to a per-kind default.
    pub fn severity(&self) -> EventSeverity {
        self.field("severity")
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| self.kind.default_severity())
    }

    /// Decode the typed payload for this event's kind.
    pub fn payload(&self) -> ClientResult<EventPayload> {
        let data = self.data.clone();
        Ok(match self.kind {
            EventKind::SwarmStatusChanged => {
                EventPayload::SwarmStatusChanged(serde_json::from_value(data)?)
            }
            EventKind::AgentStatusChanged => {
                EventPayload::AgentStatusChanged(serde_json::from_value(data)?)
            }
            EventKind::TaskStarted => EventPayload::TaskStarted(serde_json::from_value(data)?),
            EventKind::TaskProgress => EventPayload::TaskProgress(serde_json::from_value(data)?),
            EventKind::TaskCompleted => EventPayload::TaskCompleted(serde_json::from_value(data)?),
            EventKind::TaskFailed => EventPayload::TaskFailed(serde_json::from_value(data)?),
            EventKind::MetricsUpdated => {
                EventPayload::MetricsUpdated(serde_json::from_value(data)?)
            }
            EventKind::Error => EventPayload::Error(serde_json::from_value(data)?),
            EventKind::PerformanceAlert => {
                EventPayload::PerformanceAlert(serde_json::from_value(data)?)
            }
            EventKind::Unknown => EventPayload::Other(data),
        })
    }
}

/// Typed view of an event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    SwarmStatusChanged(StatusChange),
    AgentStatusChanged(StatusChange),
    TaskStarted(TaskUpdate),
    TaskProgress(TaskUpdate),
    TaskCompleted(TaskUpdate),
    TaskFailed(TaskUpdate),
    MetricsUpdated(MetricsUpdate),
    Error(ErrorNotice),
    PerformanceAlert(PerformanceAlert),
    Other(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub swarm_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub swarm_id: String,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsUpdate {
    pub swarm_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efficiency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utilization: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks_completed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swarm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceAlert {
    pub swarm_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
}
