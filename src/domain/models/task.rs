//! Task domain model.
//!
//! A [`TaskDefinition`] is what the caller submits; a [`TaskExecution`] is the
//! server's view of that task once scheduled. Definitions form a DAG through
//! their dependency ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::ClientError;

/// Scheduling priority. Higher priorities run first among ready tasks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for TaskPriority {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(ClientError::validation(format!("Invalid task priority: {s}"))),
        }
    }
}

/// A unit of work submitted for orchestration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub required_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl TaskDefinition {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            priority: TaskPriority::default(),
            dependencies: Vec::new(),
            required_capabilities: Vec::new(),
            estimated_duration_ms: None,
            timeout_ms: None,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// Server-side execution status of a task.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Queued,
    Running,
    #[serde(alias = "complete")]
    Completed,
    Failed,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl TaskStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" | "complete" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            _ => Err(ClientError::validation(format!("Invalid task status: {s}"))),
        }
    }
}

/// Execution record of a scheduled task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskExecution {
    #[serde(alias = "id")]
    pub task_id: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_agents: Vec<String>,
    #[serde(default)]
    pub progress: f64,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskExecution {
    pub fn pending(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            assigned_agents: Vec::new(),
            progress: 0.0,
            started_at: None,
            completed_at: None,
            updated_at: Utc::now(),
            result: None,
            error: None,
        }
    }

    /// Replace this record with `incoming` unless `incoming` is older.
    pub fn merge(&mut self, incoming: Self) -> bool {
        if incoming.updated_at < self.updated_at {
            return false;
        }
        *self = incoming;
        true
    }
}

/// Status counts over a set of task executions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
    /// Pending and queued tasks.
    pub pending: usize,
    pub cancelled: usize,
}

impl TaskSummary {
    pub fn from_executions<'a, I>(executions: I) -> Self
    where
        I: IntoIterator<Item = &'a TaskExecution>,
    {
        executions
            .into_iter()
            .fold(Self::default(), |mut summary, execution| {
                summary.total += 1;
                match execution.status {
                    TaskStatus::Completed => summary.completed += 1,
                    TaskStatus::Failed => summary.failed += 1,
                    TaskStatus::Running => summary.running += 1,
                    TaskStatus::Pending | TaskStatus::Queued => summary.pending += 1,
                    TaskStatus::Cancelled => summary.cancelled += 1,
                }
                summary
            })
    }

    /// Fraction of tasks that completed successfully; 0 for an empty set.
    #[allow(clippy::cast_precision_loss)]
    pub fn efficiency(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Result of a `task_results` query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResults {
    pub swarm_id: String,
    pub tasks: Vec<TaskExecution>,
    pub summary: TaskSummary,
    pub efficiency: f64,
}

impl TaskResults {
    pub fn new(swarm_id: impl Into<String>, tasks: Vec<TaskExecution>) -> Self {
        let summary = TaskSummary::from_executions(&tasks);
        Self {
            swarm_id: swarm_id.into(),
            efficiency: summary.efficiency(),
            summary,
            tasks,
        }
    }
}
