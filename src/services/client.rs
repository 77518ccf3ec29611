//! Typed client for the orchestration service.
//!
//! [`SwarmClient`] turns domain calls into operations on a [`Connection`] and
//! mirrors the server's view of every swarm it has touched. Direct responses
//! and push events update the same mirror; both go through the last-write-wins
//! merges on [`SwarmState`], [`AgentState`] and [`TaskExecution`].

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{Connection, ConnectionOptions};
use super::error_history::{ErrorHistory, ErrorRecord};
use crate::domain::errors::{ClientError, ClientResult};
use crate::domain::models::{
    AgentConfig, AgentPerformance, AgentState, AgentStatus, ClientConfig, SwarmConfig,
    SwarmDefaults, SwarmState, SwarmStatus, TaskDefinition, TaskExecution, TaskResults,
    TaskStatus,
};
use crate::domain::ports::{RequestTransport, Transport};
use crate::infrastructure::transport::{HttpRequestTransport, WebSocketTransport};

/// Operation names as they appear on the wire.
pub mod operations {
    pub const SWARM_INIT: &str = "swarm_init";
    pub const SWARM_STATUS: &str = "swarm_status";
    pub const SWARM_TERMINATE: &str = "swarm_terminate";
    pub const AGENT_SPAWN: &str = "agent_spawn";
    pub const AGENT_METRICS: &str = "agent_metrics";
    pub const AGENT_TERMINATE: &str = "agent_terminate";
    pub const TASK_ORCHESTRATE: &str = "task_orchestrate";
    pub const TASK_RESULTS: &str = "task_results";
    pub const TASK_CANCEL: &str = "task_cancel";
    pub const MEMORY_USAGE: &str = "memory_usage";
    pub const MEMORY_EXPORT: &str = "memory_export";
}

/// Per-agent counters returned by `agent_metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    #[serde(alias = "id")]
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,
    #[serde(default)]
    pub performance: AgentPerformance,
    #[serde(default)]
    pub memory_usage_bytes: u64,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

/// Memory footprint of one swarm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_bytes: Option<u64>,
    /// Bytes per agent id.
    pub agents: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwarmCreated {
    #[serde(alias = "id")]
    swarm_id: String,
    #[serde(default)]
    status: Option<SwarmStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentSpawned {
    #[serde(alias = "id")]
    agent_id: String,
    #[serde(default)]
    status: Option<AgentStatus>,
}

/// Task lists arrive either bare or wrapped in an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TaskList {
    Bare(Vec<TaskExecution>),
    Wrapped {
        #[serde(alias = "executions", alias = "results")]
        tasks: Vec<TaskExecution>,
    },
}

impl TaskList {
    fn into_vec(self) -> Vec<TaskExecution> {
        match self {
            Self::Bare(tasks) | Self::Wrapped { tasks } => tasks,
        }
    }
}

type SwarmMap = Arc<RwLock<HashMap<String, SwarmState>>>;

struct ClientInner {
    connection: Connection,
    defaults: SwarmDefaults,
    swarms: SwarmMap,
    errors: ErrorHistory,
    event_sync: Mutex<Option<CancellationToken>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(token) = self.event_sync.lock().take() {
            token.cancel();
        }
    }
}

/// Typed façade over one [`Connection`].
///
/// Clones share the connection and the local mirror.
#[derive(Clone)]
pub struct SwarmClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for SwarmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwarmClient")
            .field("connection", &self.inner.connection)
            .field("swarms", &self.inner.swarms.read().len())
            .finish_non_exhaustive()
    }
}

impl SwarmClient {
    pub fn new(config: &ClientConfig, connection: Connection) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                connection,
                defaults: config.defaults.clone(),
                swarms: Arc::new(RwLock::new(HashMap::new())),
                errors: ErrorHistory::new(config.error_history_size),
                event_sync: Mutex::new(None),
            }),
        }
    }

    /// Build a client whose connection uses the given transports.
    pub fn with_transport(
        config: &ClientConfig,
        transport: Arc<dyn Transport>,
        fallback: Option<Arc<dyn RequestTransport>>,
    ) -> Self {
        let options = ConnectionOptions::from_config(config, config.server_url.clone());
        Self::new(config, Connection::new(options, transport, fallback))
    }

    /// Build a client over the network transports named in `config`.
    ///
    /// # Errors
    /// Fails if the HTTP fallback client cannot be constructed.
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        let fallback = match config.fallback_url.as_deref() {
            Some(url) => {
                let http = HttpRequestTransport::new(url, config.operation_timeout())?;
                Some(Arc::new(http) as Arc<dyn RequestTransport>)
            }
            None => None,
        };
        Ok(Self::with_transport(
            config,
            Arc::new(WebSocketTransport::new()),
            fallback,
        ))
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub fn defaults(&self) -> &SwarmDefaults {
        &self.inner.defaults
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Connect and start applying push events to the local mirror.
    ///
    /// # Errors
    /// Propagates the connection failure; see [`Connection::connect`].
    pub async fn connect(&self) -> ClientResult<()> {
        if let Err(err) = self.inner.connection.connect().await {
            self.inner.errors.record(Some("connect"), &err);
            return Err(err);
        }
        self.start_event_sync();
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(token) = self.inner.event_sync.lock().take() {
            token.cancel();
        }
        self.inner.connection.disconnect().await;
    }

    fn start_event_sync(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.event_sync.lock().replace(token.clone()) {
            previous.cancel();
        }
        let mut events = self.inner.connection.subscribe_events();
        let swarms = Arc::clone(&self.inner.swarms);

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = token.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) => {
                        let Some(swarm_id) = event.swarm_id() else {
                            continue;
                        };
                        let applied = swarms
                            .write()
                            .get_mut(swarm_id)
                            .is_some_and(|swarm| swarm.apply_event(&event));
                        debug!(kind = %event.kind, swarm_id, applied, "Applied push event");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event sync lagged; local state may be stale until next status query");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    async fn call<T: DeserializeOwned>(&self, operation: &str, params: Value) -> ClientResult<T> {
        let result = self
            .inner
            .connection
            .execute(operation, params, None)
            .await
            .and_then(|value| {
                serde_json::from_value(value).map_err(|e| ClientError::malformed(operation, &e))
            });
        if let Err(err) = &result {
            self.inner.errors.record(Some(operation), err);
        }
        result
    }

    /// Create a swarm and start mirroring it.
    #[instrument(skip(self, config), fields(name = %config.name), err)]
    pub async fn init_swarm(&self, config: &SwarmConfig) -> ClientResult<SwarmState> {
        let created: SwarmCreated = self
            .call(operations::SWARM_INIT, json!({ "config": config }))
            .await?;

        let mut state = SwarmState::new(created.swarm_id, config);
        if let Some(status) = created.status {
            state.status = status;
        }
        info!(swarm_id = %state.id, "Swarm initialized");

        let mut swarms = self.inner.swarms.write();
        let entry = swarms
            .entry(state.id.clone())
            .or_insert_with(|| state.clone());
        entry.merge(state);
        Ok(entry.clone())
    }

    /// Spawn one agent into `swarm_id`.
    #[instrument(skip(self, config), fields(agent = %config.name), err)]
    pub async fn spawn_agent(&self, swarm_id: &str, config: AgentConfig) -> ClientResult<AgentState> {
        let spawned: AgentSpawned = self
            .call(
                operations::AGENT_SPAWN,
                json!({ "swarmId": swarm_id, "config": config }),
            )
            .await?;

        let mut agent = AgentState::new(spawned.agent_id, config);
        if let Some(status) = spawned.status {
            agent.status = status;
        }
        debug!(agent_id = %agent.id, "Agent spawned");

        if let Some(swarm) = self.inner.swarms.write().get_mut(swarm_id) {
            swarm.upsert_agent(agent.clone());
        }
        Ok(agent)
    }

    /// Submit a batch of tasks in the given order.
    #[instrument(skip(self, tasks), fields(count = tasks.len()), err)]
    pub async fn orchestrate_tasks(
        &self,
        swarm_id: &str,
        tasks: &[TaskDefinition],
    ) -> ClientResult<Vec<TaskExecution>> {
        let value = self
            .inner
            .connection
            .execute(
                operations::TASK_ORCHESTRATE,
                json!({ "swarmId": swarm_id, "tasks": tasks }),
                None,
            )
            .await
            .inspect_err(|err| {
                self.inner
                    .errors
                    .record(Some(operations::TASK_ORCHESTRATE), err);
            })?;

        let now = Utc::now();
        let mut executions = if value.is_null() {
            Vec::new()
        } else {
            serde_json::from_value::<TaskList>(value)
                .map(TaskList::into_vec)
                .map_err(|e| ClientError::malformed(operations::TASK_ORCHESTRATE, &e))
                .inspect_err(|err| {
                    self.inner
                        .errors
                        .record(Some(operations::TASK_ORCHESTRATE), err);
                })?
        };
        // tasks the server did not echo back are tracked as pending
        for task in tasks {
            if !executions.iter().any(|e| e.task_id == task.id) {
                executions.push(TaskExecution::pending(task.id.clone()));
            }
        }
        for execution in &mut executions {
            stamp(&mut execution.updated_at, now);
        }

        if let Some(swarm) = self.inner.swarms.write().get_mut(swarm_id) {
            for execution in &executions {
                swarm.upsert_task(execution.clone());
            }
        }
        Ok(executions)
    }

    /// Fetch a full snapshot and merge it into the mirror.
    pub async fn swarm_status(&self, swarm_id: &str) -> ClientResult<SwarmState> {
        let mut snapshot: SwarmState = self
            .call(operations::SWARM_STATUS, json!({ "swarmId": swarm_id }))
            .await?;
        if snapshot.id.is_empty() {
            snapshot.id = swarm_id.to_string();
        }
        stamp(&mut snapshot.last_updated, Utc::now());
        let at = snapshot.last_updated;
        for agent in &mut snapshot.agents {
            stamp(&mut agent.last_activity, at);
        }
        for task in &mut snapshot.tasks {
            stamp(&mut task.updated_at, at);
        }

        let mut swarms = self.inner.swarms.write();
        match swarms.get_mut(swarm_id) {
            Some(local) => {
                if !local.merge(snapshot) {
                    debug!(swarm_id, "Ignored stale status snapshot");
                }
                Ok(local.clone())
            }
            None => {
                swarms.insert(swarm_id.to_string(), snapshot.clone());
                Ok(snapshot)
            }
        }
    }

    pub async fn agent_metrics(&self, swarm_id: &str, agent_id: &str) -> ClientResult<AgentMetrics> {
        let mut metrics: AgentMetrics = self
            .call(
                operations::AGENT_METRICS,
                json!({ "swarmId": swarm_id, "agentId": agent_id }),
            )
            .await?;
        stamp(&mut metrics.timestamp, Utc::now());

        if let Some(agent) = self
            .inner
            .swarms
            .write()
            .get_mut(swarm_id)
            .and_then(|s| s.agents.iter_mut().find(|a| a.id == agent_id))
        {
            if metrics.timestamp >= agent.last_activity {
                agent.performance = metrics.performance.clone();
                agent.memory_usage_bytes = metrics.memory_usage_bytes;
                if let Some(status) = metrics.status {
                    agent.status = status;
                }
                agent.last_activity = metrics.timestamp;
            }
        }
        Ok(metrics)
    }

    pub async fn memory_usage(&self, swarm_id: &str) -> ClientResult<MemoryUsage> {
        let usage: MemoryUsage = self
            .call(operations::MEMORY_USAGE, json!({ "swarmId": swarm_id }))
            .await?;
        if let Some(swarm) = self.inner.swarms.write().get_mut(swarm_id) {
            for agent in &mut swarm.agents {
                if let Some(bytes) = usage.agents.get(&agent.id) {
                    agent.memory_usage_bytes = *bytes;
                }
            }
        }
        Ok(usage)
    }

    /// Fetch every task execution of a swarm with a status summary.
    pub async fn task_results(&self, swarm_id: &str) -> ClientResult<TaskResults> {
        let list: TaskList = self
            .call(operations::TASK_RESULTS, json!({ "swarmId": swarm_id }))
            .await?;
        let now = Utc::now();
        let mut tasks = list.into_vec();
        for task in &mut tasks {
            stamp(&mut task.updated_at, now);
        }
        if let Some(swarm) = self.inner.swarms.write().get_mut(swarm_id) {
            for task in &tasks {
                swarm.upsert_task(task.clone());
            }
        }
        Ok(TaskResults::new(swarm_id, tasks))
    }

    pub async fn terminate_agent(&self, swarm_id: &str, agent_id: &str, graceful: bool) -> ClientResult<()> {
        self.call::<Value>(
            operations::AGENT_TERMINATE,
            json!({ "swarmId": swarm_id, "agentId": agent_id, "graceful": graceful }),
        )
        .await?;
        self.update_agent(swarm_id, agent_id, |agent| {
            agent.status = AgentStatus::Terminated;
            agent.current_task = None;
        });
        Ok(())
    }

    pub async fn cancel_task(&self, swarm_id: &str, task_id: &str) -> ClientResult<()> {
        self.call::<Value>(
            operations::TASK_CANCEL,
            json!({ "swarmId": swarm_id, "taskId": task_id }),
        )
        .await?;
        let now = Utc::now();
        if let Some(task) = self
            .inner
            .swarms
            .write()
            .get_mut(swarm_id)
            .and_then(|s| s.tasks.iter_mut().find(|t| t.task_id == task_id))
        {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(now);
            }
            task.updated_at = task.updated_at.max(now);
        }
        Ok(())
    }

    pub async fn terminate_swarm(&self, swarm_id: &str, force: bool) -> ClientResult<()> {
        self.call::<Value>(
            operations::SWARM_TERMINATE,
            json!({ "swarmId": swarm_id, "force": force }),
        )
        .await?;
        if let Some(swarm) = self.inner.swarms.write().get_mut(swarm_id) {
            swarm.status = SwarmStatus::Terminated;
            swarm.last_updated = swarm.last_updated.max(Utc::now());
        }
        info!(swarm_id, force, "Swarm terminated");
        Ok(())
    }

    /// Fetch the swarm's shared memory as an opaque document.
    pub async fn export_memory(&self, swarm_id: &str) -> ClientResult<Value> {
        self.call(operations::MEMORY_EXPORT, json!({ "swarmId": swarm_id }))
            .await
    }

    fn update_agent(&self, swarm_id: &str, agent_id: &str, update: impl FnOnce(&mut AgentState)) {
        let now = Utc::now();
        if let Some(agent) = self
            .inner
            .swarms
            .write()
            .get_mut(swarm_id)
            .and_then(|s| s.agents.iter_mut().find(|a| a.id == agent_id))
        {
            update(agent);
            agent.last_activity = agent.last_activity.max(now);
        }
    }

    /// Copy of the mirrored swarm.
    pub fn swarm(&self, swarm_id: &str) -> Option<SwarmState> {
        self.inner.swarms.read().get(swarm_id).cloned()
    }

    pub fn swarms(&self) -> Vec<SwarmState> {
        let mut swarms: Vec<_> = self.inner.swarms.read().values().cloned().collect();
        swarms.sort_by(|a, b| a.id.cmp(&b.id));
        swarms
    }

    pub fn agent(&self, swarm_id: &str, agent_id: &str) -> Option<AgentState> {
        self.inner
            .swarms
            .read()
            .get(swarm_id)
            .and_then(|s| s.agent(agent_id))
            .cloned()
    }

    /// Recent failures, oldest first.
    pub fn error_history(&self) -> Vec<ErrorRecord> {
        self.inner.errors.snapshot()
    }
}

/// Give a timestamp the server left unset a concrete value.
fn stamp(at: &mut DateTime<Utc>, now: DateTime<Utc>) {
    if *at == DateTime::<Utc>::default() {
        *at = now;
    }
}
