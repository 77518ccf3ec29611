use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::ClientError;

/// Agent status enumeration
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Initializing,
    #[default]
    Idle,
    Active,
    Busy,
    Error,
    Terminating,
    Terminated,
}

impl AgentStatus {
    /// Agent still counts towards the swarm's size.
    pub const fn is_live(&self) -> bool {
        !matches!(self, Self::Terminating | Self::Terminated)
    }

    /// Agent may be selected for scale-down or new work.
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Idle | Self::Active)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Busy => write!(f, "busy"),
            Self::Error => write!(f, "error"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl FromStr for AgentStatus {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initializing" => Ok(Self::Initializing),
            "idle" => Ok(Self::Idle),
            "active" => Ok(Self::Active),
            "busy" => Ok(Self::Busy),
            "error" => Ok(Self::Error),
            "terminating" => Ok(Self::Terminating),
            "terminated" => Ok(Self::Terminated),
            _ => Err(ClientError::validation(format!("Invalid agent status: {s}"))),
        }
    }
}

/// Configuration an agent is spawned from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type", default = "default_agent_type")]
    pub agent_type: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

fn default_agent_type() -> String {
    "general".to_string()
}

const fn default_max_concurrent_tasks() -> u32 {
    1
}

const fn default_priority() -> u8 {
    5
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new("agent", default_agent_type())
    }
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            agent_type: agent_type.into(),
            capabilities: Vec::new(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            priority: default_priority(),
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Apply caller overrides on top of this config.
    #[must_use]
    pub fn overridden(mut self, overrides: &AgentOverrides) -> Self {
        if let Some(name) = &overrides.name {
            self.name.clone_from(name);
        }
        if let Some(agent_type) = &overrides.agent_type {
            self.agent_type.clone_from(agent_type);
        }
        if let Some(capabilities) = &overrides.capabilities {
            self.capabilities.clone_from(capabilities);
        }
        if let Some(max) = overrides.max_concurrent_tasks {
            self.max_concurrent_tasks = max;
        }
        if let Some(priority) = overrides.priority {
            self.priority = priority;
        }
        self.metadata
            .extend(overrides.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }
}

/// Partial agent config applied when cloning an agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOverrides {
    pub name: Option<String>,
    pub agent_type: Option<String>,
    pub capabilities: Option<Vec<String>>,
    pub max_concurrent_tasks: Option<u32>,
    pub priority: Option<u8>,
    pub metadata: BTreeMap<String, Value>,
}

/// Performance counters reported by the server for one agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentPerformance {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub average_task_duration_ms: f64,
    pub efficiency_score: f64,
    pub utilization: f64,
}

/// Locally mirrored state of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub id: String,
    #[serde(default)]
    pub status: AgentStatus,
    #[serde(default)]
    pub config: AgentConfig,
    #[serde(default)]
    pub performance: AgentPerformance,
    #[serde(default)]
    pub memory_usage_bytes: u64,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
}

impl AgentState {
    pub fn new(id: impl Into<String>, config: AgentConfig) -> Self {
        Self {
            id: id.into(),
            status: AgentStatus::Idle,
            config,
            performance: AgentPerformance::default(),
            memory_usage_bytes: 0,
            last_activity: Utc::now(),
            current_task: None,
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.config.capabilities.iter().any(|c| c == capability)
    }

    /// Replace this state with `incoming` unless `incoming` is older.
    ///
    /// Returns true when the incoming state was applied.
    pub fn merge(&mut self, incoming: Self) -> bool {
        if incoming.last_activity < self.last_activity {
            return false;
        }
        *self = incoming;
        true
    }
}
