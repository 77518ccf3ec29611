//! Swarm domain model.
//!
//! A [`SwarmState`] owns its agents and task executions. Updates arrive both as
//! direct operation responses and as push events; both paths go through the
//! last-write-wins merges defined here, so applying the same update twice
//! leaves the state unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use super::agent::{AgentConfig, AgentState, AgentStatus};
use super::config::SwarmDefaults;
use super::event::{EventKind, EventPayload, SwarmEvent};
use super::health::HealthStatus;
use super::task::{TaskExecution, TaskStatus};
use crate::domain::errors::ClientError;

/// How agents in a swarm communicate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwarmTopology {
    #[default]
    Mesh,
    Hierarchical,
    Ring,
    Star,
}

impl fmt::Display for SwarmTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mesh => write!(f, "mesh"),
            Self::Hierarchical => write!(f, "hierarchical"),
            Self::Ring => write!(f, "ring"),
            Self::Star => write!(f, "star"),
        }
    }
}

impl FromStr for SwarmTopology {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mesh" => Ok(Self::Mesh),
            "hierarchical" => Ok(Self::Hierarchical),
            "ring" => Ok(Self::Ring),
            "star" => Ok(Self::Star),
            _ => Err(ClientError::validation(format!("Invalid topology: {s}"))),
        }
    }
}

/// Work distribution strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwarmStrategy {
    #[default]
    Balanced,
    Specialized,
    Adaptive,
}

impl fmt::Display for SwarmStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Balanced => write!(f, "balanced"),
            Self::Specialized => write!(f, "specialized"),
            Self::Adaptive => write!(f, "adaptive"),
        }
    }
}

impl FromStr for SwarmStrategy {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "balanced" => Ok(Self::Balanced),
            "specialized" => Ok(Self::Specialized),
            "adaptive" => Ok(Self::Adaptive),
            _ => Err(ClientError::validation(format!("Invalid strategy: {s}"))),
        }
    }
}

/// Swarm lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwarmStatus {
    #[default]
    Initializing,
    Active,
    Scaling,
    Paused,
    Terminating,
    Terminated,
    Error,
}

impl fmt::Display for SwarmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Active => write!(f, "active"),
            Self::Scaling => write!(f, "scaling"),
            Self::Paused => write!(f, "paused"),
            Self::Terminating => write!(f, "terminating"),
            Self::Terminated => write!(f, "terminated"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl FromStr for SwarmStatus {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initializing" => Ok(Self::Initializing),
            "active" => Ok(Self::Active),
            "scaling" => Ok(Self::Scaling),
            "paused" => Ok(Self::Paused),
            "terminating" => Ok(Self::Terminating),
            "terminated" => Ok(Self::Terminated),
            "error" => Ok(Self::Error),
            _ => Err(ClientError::validation(format!("Invalid swarm status: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScalingPolicy {
    pub min_agents: usize,
    pub max_agents: usize,
    pub auto_scale: bool,
    /// Utilization above which the server may add agents.
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub cooldown_ms: u64,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_agents: 1,
            max_agents: 10,
            auto_scale: false,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.2,
            cooldown_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommunicationConfig {
    pub protocol: String,
    pub message_timeout_ms: u64,
    pub max_message_size_bytes: u64,
    pub compression: bool,
}

impl Default for CommunicationConfig {
    fn default() -> Self {
        Self {
            protocol: "websocket".to_string(),
            message_timeout_ms: 30_000,
            max_message_size_bytes: 1024 * 1024,
            compression: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FailureHandling {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub failover: bool,
    pub isolate_failed_agents: bool,
}

impl Default for FailureHandling {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            failover: true,
            isolate_failed_agents: true,
        }
    }
}

/// Complete swarm configuration as sent with `init_swarm`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmConfig {
    pub name: String,
    pub topology: SwarmTopology,
    pub strategy: SwarmStrategy,
    pub max_agents: usize,
    pub scaling: ScalingPolicy,
    pub communication: CommunicationConfig,
    pub failure_handling: FailureHandling,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

/// Partial swarm description accepted by `swarm_init`.
///
/// Anything left unset is filled from [`SwarmDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwarmInitOptions {
    pub name: String,
    pub topology: Option<SwarmTopology>,
    pub strategy: Option<SwarmStrategy>,
    pub max_agents: Option<usize>,
    pub scaling: Option<ScalingPolicy>,
    pub communication: Option<CommunicationConfig>,
    pub failure_handling: Option<FailureHandling>,
    /// Agents spawned one after another once the swarm exists.
    pub initial_agents: Vec<AgentConfig>,
    pub spawn_delay_ms: Option<u64>,
    pub metadata: BTreeMap<String, Value>,
}

impl SwarmInitOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn into_config(self, defaults: &SwarmDefaults) -> SwarmConfig {
        let max_agents = self.max_agents.unwrap_or(defaults.max_agents);
        let scaling = self.scaling.unwrap_or_else(|| ScalingPolicy {
            max_agents,
            ..ScalingPolicy::default()
        });
        SwarmConfig {
            name: self.name,
            topology: self.topology.unwrap_or(defaults.topology),
            strategy: self.strategy.unwrap_or(defaults.strategy),
            max_agents,
            scaling,
            communication: self.communication.unwrap_or_default(),
            failure_handling: self.failure_handling.unwrap_or_default(),
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwarmPerformance {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub average_task_duration_ms: f64,
    pub throughput: f64,
    pub efficiency: f64,
    pub utilization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwarmHealthSnapshot {
    pub status: HealthStatus,
    pub score: f64,
    pub issues: Vec<String>,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_check: Option<DateTime<Utc>>,
}

impl Default for SwarmHealthSnapshot {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            score: 1.0,
            issues: Vec::new(),
            last_check: None,
        }
    }
}

/// Locally mirrored state of one swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmState {
    #[serde(alias = "swarmId")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: SwarmStatus,
    #[serde(default)]
    pub topology: SwarmTopology,
    #[serde(default)]
    pub agents: Vec<AgentState>,
    #[serde(default)]
    pub tasks: Vec<TaskExecution>,
    #[serde(default)]
    pub performance: SwarmPerformance,
    #[serde(default)]
    pub health: SwarmHealthSnapshot,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub last_updated: DateTime<Utc>,
}

impl SwarmState {
    pub fn new(id: impl Into<String>, config: &SwarmConfig) -> Self {
        Self {
            id: id.into(),
            name: config.name.clone(),
            status: SwarmStatus::Initializing,
            topology: config.topology,
            agents: Vec::new(),
            tasks: Vec::new(),
            performance: SwarmPerformance::default(),
            health: SwarmHealthSnapshot::default(),
            last_updated: Utc::now(),
        }
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentState> {
        self.agents.iter().find(|a| a.id == agent_id)
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskExecution> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// Agents that still count towards the swarm's size.
    pub fn live_agents(&self) -> impl Iterator<Item = &AgentState> {
        self.agents.iter().filter(|a| a.status.is_live())
    }

    /// Capabilities offered by live, non-failed agents.
    pub fn available_capabilities(&self) -> HashSet<String> {
        self.live_agents()
            .filter(|a| a.status != AgentStatus::Error)
            .flat_map(|a| a.config.capabilities.iter().cloned())
            .collect()
    }

    /// Insert a new agent or merge into the existing one with the same id.
    pub fn upsert_agent(&mut self, agent: AgentState) -> bool {
        match self.agents.iter_mut().find(|a| a.id == agent.id) {
            Some(existing) => existing.merge(agent),
            None => {
                self.agents.push(agent);
                true
            }
        }
    }

    /// Insert a new task execution or merge into the existing one.
    pub fn upsert_task(&mut self, task: TaskExecution) -> bool {
        match self.tasks.iter_mut().find(|t| t.task_id == task.task_id) {
            Some(existing) => existing.merge(task),
            None => {
                self.tasks.push(task);
                true
            }
        }
    }

    /// Merge a full snapshot of this swarm.
    ///
    /// The snapshot is authoritative for membership, except that local agents
    /// and tasks written after the snapshot was taken are kept. Entities present
    /// on both sides resolve per entity by timestamp.
    pub fn merge(&mut self, incoming: Self) -> bool {
        if incoming.last_updated < self.last_updated {
            return false;
        }
        let cutoff = incoming.last_updated;
        let mut local_agents = std::mem::take(&mut self.agents);
        let mut local_tasks = std::mem::take(&mut self.tasks);

        let Self {
            id: _,
            name,
            status,
            topology,
            agents,
            tasks,
            performance,
            health,
            last_updated,
        } = incoming;

        if !name.is_empty() {
            self.name = name;
        }
        self.status = status;
        self.topology = topology;
        self.performance = performance;
        self.health = health;
        self.last_updated = last_updated;

        for mut agent in agents {
            if let Some(pos) = local_agents.iter().position(|a| a.id == agent.id) {
                let local = local_agents.swap_remove(pos);
                if local.last_activity > agent.last_activity {
                    agent = local;
                }
            }
            self.agents.push(agent);
        }
        self.agents
            .extend(local_agents.into_iter().filter(|a| a.last_activity > cutoff));

        for mut task in tasks {
            if let Some(pos) = local_tasks.iter().position(|t| t.task_id == task.task_id) {
                let local = local_tasks.swap_remove(pos);
                if local.updated_at > task.updated_at {
                    task = local;
                }
            }
            self.tasks.push(task);
        }
        self.tasks
            .extend(local_tasks.into_iter().filter(|t| t.updated_at > cutoff));
        true
    }

    /// Apply a push event addressed to this swarm.
    ///
    /// Returns true when the event was applied. Events for other swarms, for
    /// unknown agents, or older than the entity they target are ignored.
    pub fn apply_event(&mut self, event: &SwarmEvent) -> bool {
        if event.swarm_id() != Some(self.id.as_str()) {
            return false;
        }
        let Ok(payload) = event.payload() else {
            return false;
        };
        let at = event.timestamp;

        match payload {
            EventPayload::SwarmStatusChanged(change) => {
                let Ok(status) = change.status.parse::<SwarmStatus>() else {
                    return false;
                };
                if at < self.last_updated {
                    return false;
                }
                self.status = status;
                self.last_updated = at;
                true
            }
            EventPayload::AgentStatusChanged(change) => {
                let Ok(status) = change.status.parse::<AgentStatus>() else {
                    return false;
                };
                let Some(agent) = change
                    .agent_id
                    .as_deref()
                    .and_then(|id| self.agents.iter_mut().find(|a| a.id == id))
                else {
                    return false;
                };
                if at < agent.last_activity {
                    return false;
                }
                agent.status = status;
                agent.last_activity = at;
                true
            }
            EventPayload::TaskStarted(update)
            | EventPayload::TaskProgress(update)
            | EventPayload::TaskCompleted(update)
            | EventPayload::TaskFailed(update) => {
                let pos = match self.tasks.iter().position(|t| t.task_id == update.task_id) {
                    Some(pos) => pos,
                    None => {
                        let mut task = TaskExecution::pending(update.task_id.clone());
                        task.updated_at = DateTime::<Utc>::default();
                        self.tasks.push(task);
                        self.tasks.len() - 1
                    }
                };
                let task = &mut self.tasks[pos];
                if at < task.updated_at {
                    return false;
                }
                match event.kind {
                    EventKind::TaskStarted => {
                        task.status = TaskStatus::Running;
                        task.started_at.get_or_insert(at);
                    }
                    EventKind::TaskProgress => {
                        if !task.status.is_terminal() {
                            task.status = TaskStatus::Running;
                        }
                    }
                    EventKind::TaskCompleted => {
                        task.status = TaskStatus::Completed;
                        task.progress = 1.0;
                        task.completed_at = Some(at);
                    }
                    _ => {
                        task.status = TaskStatus::Failed;
                        task.completed_at = Some(at);
                    }
                }
                if let Some(progress) = update.progress {
                    task.progress = progress.clamp(0.0, 1.0);
                }
                if let Some(agent_id) = update.agent_id {
                    if !task.assigned_agents.contains(&agent_id) {
                        task.assigned_agents.push(agent_id);
                    }
                }
                if update.result.is_some() {
                    task.result = update.result;
                }
                if update.error.is_some() {
                    task.error = update.error;
                }
                task.updated_at = at;
                true
            }
            EventPayload::MetricsUpdated(metrics) => {
                if let Some(agent_id) = metrics.agent_id.as_deref() {
                    let Some(agent) = self.agents.iter_mut().find(|a| a.id == agent_id) else {
                        return false;
                    };
                    if at < agent.last_activity {
                        return false;
                    }
                    if let Some(efficiency) = metrics.efficiency {
                        agent.performance.efficiency_score = efficiency;
                    }
                    if let Some(utilization) = metrics.utilization {
                        agent.performance.utilization = utilization;
                    }
                    if let Some(memory) = metrics.memory_usage {
                        agent.memory_usage_bytes = memory;
                    }
                    if let Some(done) = metrics.tasks_completed {
                        agent.performance.tasks_completed = done;
                    }
                    agent.last_activity = at;
                } else {
                    if at < self.last_updated {
                        return false;
                    }
                    if let Some(efficiency) = metrics.efficiency {
                        self.performance.efficiency = efficiency;
                    }
                    if let Some(utilization) = metrics.utilization {
                        self.performance.utilization = utilization;
                    }
                    if let Some(throughput) = metrics.throughput {
                        self.performance.throughput = throughput;
                    }
                    if let Some(done) = metrics.tasks_completed {
                        self.performance.completed_tasks = done;
                    }
                    self.last_updated = at;
                }
                true
            }
            _ => false,
        }
    }
}
