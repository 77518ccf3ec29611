//! Orchestration layer above [`SwarmClient`].
//!
//! Multi-step operations here are not atomic. A failed step inside a larger
//! call (one spawn during init, one termination during scale-down) is logged
//! and skipped; the call's own result reflects only its primary operation.
//! Callers re-query status to learn the true outcome.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::client::SwarmClient;
use super::dependency_resolver::DependencyResolver;
use crate::domain::errors::{ClientError, ClientResult};
use crate::domain::models::{
    AgentConfig, AgentOverrides, AgentState, HealthReport, SwarmInitOptions,
    SwarmState, TaskDefinition, TaskExecution, TaskStatus,
};
use crate::domain::ports::MemorySink;

/// How `swarm_scale` adds and removes agents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleOptions {
    /// Config cloned for each new agent; defaults to an existing agent's.
    pub template: Option<AgentConfig>,
    /// Wait for busy agents to go idle before terminating them.
    pub wait_for_idle: bool,
    /// Upper bound on that wait; defaults to the configured grace period.
    pub grace_period: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleOutcome {
    pub swarm_id: String,
    pub previous: usize,
    pub target: usize,
    pub spawned: Vec<String>,
    pub terminated: Vec<String>,
    /// Spawns or terminations that failed and were skipped.
    pub failed: usize,
}

impl ScaleOutcome {
    pub fn is_noop(&self) -> bool {
        self.spawned.is_empty() && self.terminated.is_empty() && self.failed == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerminateOptions {
    pub cancel_running_tasks: bool,
    pub export_memory: bool,
    /// Skip cancellation and the grace period.
    pub force: bool,
    pub grace_period: Option<Duration>,
}

impl Default for TerminateOptions {
    fn default() -> Self {
        Self {
            cancel_running_tasks: true,
            export_memory: false,
            force: false,
            grace_period: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationReport {
    pub swarm_id: String,
    pub cancelled_tasks: Vec<String>,
    /// Sink key the exported memory was stored under.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_key: Option<String>,
}

/// Key under which a swarm's exported memory is stored.
pub fn memory_key(swarm_id: &str) -> String {
    format!("swarm/{swarm_id}/memory")
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Swarm lifecycle, scaling, scheduling and health on top of [`SwarmClient`].
#[derive(Clone)]
pub struct SwarmApi {
    client: SwarmClient,
    resolver: DependencyResolver,
    sink: Option<Arc<dyn MemorySink>>,
}

impl std::fmt::Debug for SwarmApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwarmApi")
            .field("client", &self.client)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl SwarmApi {
    pub fn new(client: SwarmClient) -> Self {
        Self {
            client,
            resolver: DependencyResolver::new(),
            sink: None,
        }
    }

    #[must_use]
    pub fn with_memory_sink(mut self, sink: Arc<dyn MemorySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn client(&self) -> &SwarmClient {
        &self.client
    }

    /// Create a swarm from partial options and spawn its initial agents.
    ///
    /// Initial agents are spawned one after another with the configured delay
    /// between them. A failed spawn is logged and skipped.
    ///
    /// # Errors
    /// Validation errors for a malformed config; otherwise only the failure of
    /// the init operation itself.
    #[instrument(skip(self, options), fields(name = %options.name), err)]
    pub async fn swarm_init(&self, mut options: SwarmInitOptions) -> ClientResult<SwarmState> {
        if options.name.trim().is_empty() {
            return Err(ClientError::validation("swarm name must not be empty"));
        }
        let defaults = self.client.defaults();
        let initial_agents = std::mem::take(&mut options.initial_agents);
        let spawn_delay =
            Duration::from_millis(options.spawn_delay_ms.unwrap_or(defaults.spawn_delay_ms));
        let config = options.into_config(defaults);

        if config.max_agents == 0 {
            return Err(ClientError::validation("max_agents must be at least 1"));
        }
        if config.scaling.min_agents > config.scaling.max_agents {
            return Err(ClientError::validation(format!(
                "scaling min_agents ({}) exceeds max_agents ({})",
                config.scaling.min_agents, config.scaling.max_agents
            )));
        }
        if initial_agents.len() > config.max_agents {
            return Err(ClientError::validation(format!(
                "{} initial agents exceed max_agents ({})",
                initial_agents.len(),
                config.max_agents
            )));
        }

        let state = self.client.init_swarm(&config).await?;
        let swarm_id = state.id.clone();

        for (i, agent) in initial_agents.into_iter().enumerate() {
            if i > 0 && !spawn_delay.is_zero() {
                time::sleep(spawn_delay).await;
            }
            let name = agent.name.clone();
            match self.client.spawn_agent(&swarm_id, agent).await {
                Ok(spawned) => debug!(swarm_id = %swarm_id, agent_id = %spawned.id, "Initial agent spawned"),
                Err(e) => warn!(swarm_id = %swarm_id, agent = %name, error = %e, "Initial agent spawn failed; skipping"),
            }
        }

        Ok(self.client.swarm(&swarm_id).unwrap_or(state))
    }

    /// Bring the swarm's live agent count to `target`.
    ///
    /// Scaling down terminates the lowest-efficiency idle or active agents
    /// first. Concurrent scale calls on one swarm are not serialized.
    #[instrument(skip(self, options), err)]
    pub async fn swarm_scale(
        &self,
        swarm_id: &str,
        target: usize,
        options: ScaleOptions,
    ) -> ClientResult<ScaleOutcome> {
        let snapshot = self.client.swarm_status(swarm_id).await?;
        let live: Vec<&AgentState> = snapshot.live_agents().collect();
        let current = live.len();
        let mut outcome = ScaleOutcome {
            swarm_id: swarm_id.to_string(),
            previous: current,
            target,
            ..ScaleOutcome::default()
        };

        if target == current {
            debug!(swarm_id, current, "Already at target size");
            return Ok(outcome);
        }

        if target > current {
            let template = options
                .template
                .clone()
                .or_else(|| live.first().map(|a| a.config.clone()))
                .unwrap_or_else(|| AgentConfig::new("agent", "general"));
            for _ in current..target {
                let suffix = short_id();
                let mut config = template.clone();
                config.id = Some(format!("{}-{suffix}", template.agent_type));
                config.name = format!("{}-{suffix}", template.name);
                match self.client.spawn_agent(swarm_id, config).await {
                    Ok(agent) => outcome.spawned.push(agent.id),
                    Err(e) => {
                        warn!(swarm_id, error = %e, "Scale-up spawn failed; skipping");
                        outcome.failed += 1;
                    }
                }
            }
        } else {
            let victims = select_for_removal(&live, current - target);
            let grace = options.grace_period.unwrap_or_else(|| {
                Duration::from_millis(self.client.defaults().scale_down_grace_ms)
            });
            for agent_id in victims {
                if options.wait_for_idle {
                    self.wait_for_idle(swarm_id, &agent_id, grace).await;
                }
                match self.client.terminate_agent(swarm_id, &agent_id, true).await {
                    Ok(()) => outcome.terminated.push(agent_id),
                    Err(e) => {
                        warn!(swarm_id, agent_id = %agent_id, error = %e, "Scale-down termination failed; skipping");
                        outcome.failed += 1;
                    }
                }
            }
        }

        info!(
            swarm_id,
            previous = current,
            target,
            spawned = outcome.spawned.len(),
            terminated = outcome.terminated.len(),
            failed = outcome.failed,
            "Swarm scaled"
        );
        Ok(outcome)
    }

    /// Poll the mirror until the agent is idle or `grace` elapses.
    async fn wait_for_idle(&self, swarm_id: &str, agent_id: &str, grace: Duration) -> bool {
        let poll = Duration::from_millis(self.client.defaults().idle_poll_interval_ms.max(1));
        let deadline = Instant::now() + grace;
        loop {
            let idle = self
                .client
                .agent(swarm_id, agent_id)
                .is_none_or(|a| a.status.is_available());
            if idle {
                return true;
            }
            if Instant::now() >= deadline {
                debug!(swarm_id, agent_id, "Grace period elapsed before agent went idle");
                return false;
            }
            time::sleep(poll.min(deadline - Instant::now())).await;
        }
    }

    /// Validate, order and submit a batch of tasks.
    ///
    /// Validation runs before anything is sent.
    ///
    /// # Errors
    /// A validation error naming the offending task for unknown dependencies
    /// or cycles; otherwise the submit failure.
    #[instrument(skip(self, tasks), fields(count = tasks.len()), err)]
    pub async fn task_orchestrate(
        &self,
        swarm_id: &str,
        tasks: &[TaskDefinition],
    ) -> ClientResult<Vec<TaskExecution>> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let available = self
            .client
            .swarm(swarm_id)
            .map(|s| s.available_capabilities())
            .unwrap_or_default();
        let ordered = self.resolver.resolve_order(tasks, &available)?;
        debug!(
            swarm_id,
            order = ?ordered.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            "Submitting ordered batch"
        );
        self.client.orchestrate_tasks(swarm_id, &ordered).await
    }

    /// Shut a swarm down, optionally draining tasks and exporting memory first.
    #[instrument(skip(self, options), fields(force = options.force), err)]
    pub async fn swarm_terminate(
        &self,
        swarm_id: &str,
        options: TerminateOptions,
    ) -> ClientResult<TerminationReport> {
        let mut report = TerminationReport {
            swarm_id: swarm_id.to_string(),
            ..TerminationReport::default()
        };

        if !options.force && options.cancel_running_tasks {
            // the local mirror only knows tasks this client has seen
            let snapshot = match self.client.swarm_status(swarm_id).await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(swarm_id, error = %e, "Status refresh before drain failed; using local view");
                    self.client.swarm(swarm_id)
                }
            };
            let open: Vec<String> = snapshot
                .map(|s| {
                    s.tasks
                        .iter()
                        .filter(|t| {
                            matches!(
                                t.status,
                                TaskStatus::Pending | TaskStatus::Queued | TaskStatus::Running
                            )
                        })
                        .map(|t| t.task_id.clone())
                        .collect()
                })
                .unwrap_or_default();
            for task_id in open {
                match self.client.cancel_task(swarm_id, &task_id).await {
                    Ok(()) => report.cancelled_tasks.push(task_id),
                    Err(e) => warn!(swarm_id, task_id = %task_id, error = %e, "Task cancel failed; continuing"),
                }
            }
            let grace = options.grace_period.unwrap_or_else(|| {
                Duration::from_millis(self.client.defaults().termination_grace_ms)
            });
            if !grace.is_zero() {
                time::sleep(grace).await;
            }
        }

        if options.export_memory {
            report.memory_key = self.export_to_sink(swarm_id).await;
        }

        self.client.terminate_swarm(swarm_id, options.force).await?;
        Ok(report)
    }

    async fn export_to_sink(&self, swarm_id: &str) -> Option<String> {
        let Some(sink) = &self.sink else {
            warn!(swarm_id, "Memory export requested but no sink is configured");
            return None;
        };
        let memory = match self.client.export_memory(swarm_id).await {
            Ok(memory) => memory,
            Err(e) => {
                warn!(swarm_id, error = %e, "Memory export failed; terminating anyway");
                return None;
            }
        };
        let key = memory_key(swarm_id);
        match sink.store(&key, memory).await {
            Ok(()) => {
                info!(swarm_id, key = %key, "Swarm memory exported");
                Some(key)
            }
            Err(e) => {
                warn!(swarm_id, error = %e, "Storing exported memory failed");
                None
            }
        }
    }

    /// Spawn a copy of an existing agent into the same swarm.
    ///
    /// # Errors
    /// An agent error if the source agent is not in the local mirror.
    #[instrument(skip(self, overrides), err)]
    pub async fn agent_clone(
        &self,
        swarm_id: &str,
        agent_id: &str,
        overrides: &AgentOverrides,
    ) -> ClientResult<AgentState> {
        let source = self
            .client
            .agent(swarm_id, agent_id)
            .ok_or_else(|| ClientError::Agent {
                message: format!("agent '{agent_id}' not found in swarm '{swarm_id}'"),
                agent_id: Some(agent_id.to_string()),
                retryable: false,
            })?;

        let suffix = short_id();
        let mut config = source.config.clone();
        config.id = Some(format!("{}-clone-{suffix}", source.id));
        config.name = format!("{}-clone-{suffix}", source.config.name);
        let config = config.overridden(overrides);

        self.client.spawn_agent(swarm_id, config).await
    }

    /// Derive a health report from a single status query.
    pub async fn swarm_health_check(&self, swarm_id: &str) -> ClientResult<HealthReport> {
        let snapshot = self.client.swarm_status(swarm_id).await?;
        let report = HealthReport::from_snapshot(&snapshot);
        debug!(swarm_id, status = %report.status, score = report.score, "Health assessed");
        Ok(report)
    }
}

/// Pick `count` agents to remove: idle or active agents with the lowest
/// efficiency first, then busy ones if that is not enough.
fn select_for_removal(live: &[&AgentState], count: usize) -> Vec<String> {
    let mut ranked: Vec<&AgentState> = live.to_vec();
    ranked.sort_by(|a, b| {
        b.status
            .is_available()
            .cmp(&a.status.is_available())
            .then(
                a.performance
                    .efficiency_score
                    .total_cmp(&b.performance.efficiency_score),
            )
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked.into_iter().take(count).map(|a| a.id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentStatus;

    fn agent(id: &str, status: AgentStatus, efficiency: f64) -> AgentState {
        let mut agent = AgentState::new(id, AgentConfig::new(id, "coder"));
        agent.status = status;
        agent.performance.efficiency_score = efficiency;
        agent
    }

    #[test]
    fn test_removal_prefers_low_efficiency_available_agents() {
        let agents = [
            agent("a", AgentStatus::Idle, 0.9),
            agent("b", AgentStatus::Busy, 0.1),
            agent("c", AgentStatus::Active, 0.3),
            agent("d", AgentStatus::Idle, 0.5),
        ];
        let live: Vec<&AgentState> = agents.iter().collect();
        assert_eq!(select_for_removal(&live, 2), vec!["c", "d"]);
    }

    #[test]
    fn test_removal_falls_back_to_busy_agents() {
        let agents = [
            agent("a", AgentStatus::Idle, 0.9),
            agent("b", AgentStatus::Busy, 0.1),
        ];
        let live: Vec<&AgentState> = agents.iter().collect();
        assert_eq!(select_for_removal(&live, 2), vec!["a", "b"]);
    }

    #[test]
    fn test_memory_key() {
        assert_eq!(memory_key("s1"), "swarm/s1/memory");
    }
}
