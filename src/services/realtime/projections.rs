//! Views derived incrementally from push events.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use crate::domain::models::{AgentStatus, EventPayload, SwarmEvent, TaskUpdate};

/// Latest known activity of one agent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentActivity {
    pub agent_id: String,
    pub swarm_id: String,
    pub status: Option<AgentStatus>,
    pub efficiency: Option<f64>,
    pub utilization: Option<f64>,
    pub current_task: Option<String>,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub last_seen: DateTime<Utc>,
}

impl AgentActivity {
    fn new(agent_id: &str, swarm_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            swarm_id: swarm_id.to_string(),
            status: None,
            efficiency: None,
            utilization: None,
            current_task: None,
            tasks_completed: 0,
            tasks_failed: 0,
            last_seen: at,
        }
    }
}

/// Running task counters for one swarm.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveProgress {
    pub swarm_id: String,
    pub total_tasks: u64,
    pub completed: u64,
    pub failed: u64,
    pub running: u64,
    /// Completed tasks per minute, over the interval since the previous update.
    pub throughput: f64,
    /// Finished fraction of all tasks seen, 0.0 to 1.0.
    pub progress: f64,
    pub last_updated: DateTime<Utc>,
}

impl LiveProgress {
    fn new(swarm_id: &str, at: DateTime<Utc>) -> Self {
        Self {
            swarm_id: swarm_id.to_string(),
            total_tasks: 0,
            completed: 0,
            failed: 0,
            running: 0,
            throughput: 0.0,
            progress: 0.0,
            last_updated: at,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn recompute(&mut self, at: DateTime<Utc>) {
        let elapsed_ms = (at - self.last_updated).num_milliseconds();
        if elapsed_ms > 0 {
            self.throughput = self.completed as f64 / (elapsed_ms as f64 / 60_000.0);
            self.last_updated = at;
        }
        let finished = self.completed + self.failed;
        self.progress = if self.total_tasks == 0 {
            0.0
        } else {
            (finished as f64 / self.total_tasks as f64).min(1.0)
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Completed,
    Failed,
}

/// Agent activity and live progress, keyed by agent and swarm id.
#[derive(Debug, Default)]
pub(super) struct Projections {
    pub(super) agents: HashMap<String, AgentActivity>,
    pub(super) progress: HashMap<String, LiveProgress>,
    phases: HashMap<(String, String), Phase>,
}

impl Projections {
    /// Fold one event into the projections. Returns false if its payload
    /// could not be decoded.
    pub(super) fn apply(&mut self, event: &SwarmEvent) -> bool {
        let Ok(payload) = event.payload() else {
            return false;
        };
        let at = event.timestamp;

        match payload {
            EventPayload::AgentStatusChanged(change) => {
                if let Some(agent_id) = change.agent_id.as_deref() {
                    let activity = self.agent(agent_id, &change.swarm_id, at);
                    activity.status = change.status.parse().ok();
                }
            }
            EventPayload::MetricsUpdated(metrics) => {
                if let Some(agent_id) = metrics.agent_id.as_deref() {
                    let activity = self.agent(agent_id, &metrics.swarm_id, at);
                    if metrics.efficiency.is_some() {
                        activity.efficiency = metrics.efficiency;
                    }
                    if metrics.utilization.is_some() {
                        activity.utilization = metrics.utilization;
                    }
                }
            }
            EventPayload::TaskStarted(update) => self.task_phase(&update, Phase::Running, at),
            EventPayload::TaskCompleted(update) => self.task_phase(&update, Phase::Completed, at),
            EventPayload::TaskFailed(update) => self.task_phase(&update, Phase::Failed, at),
            EventPayload::TaskProgress(update) => {
                if let Some(agent_id) = update.agent_id.as_deref() {
                    let activity = self.agent(agent_id, &update.swarm_id, at);
                    activity.current_task = Some(update.task_id.clone());
                }
            }
            EventPayload::SwarmStatusChanged(_)
            | EventPayload::Error(_)
            | EventPayload::PerformanceAlert(_)
            | EventPayload::Other(_) => {}
        }
        true
    }

    fn agent(&mut self, agent_id: &str, swarm_id: &str, at: DateTime<Utc>) -> &mut AgentActivity {
        let activity = self
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentActivity::new(agent_id, swarm_id, at));
        if at > activity.last_seen {
            activity.last_seen = at;
        }
        activity
    }

    /// Move a task into `phase`, counting each transition once.
    fn task_phase(&mut self, update: &TaskUpdate, phase: Phase, at: DateTime<Utc>) {
        let key = (update.swarm_id.clone(), update.task_id.clone());
        let previous = self.phases.get(&key).copied();
        if previous == Some(phase) {
            return;
        }
        self.phases.insert(key, phase);

        let progress = self
            .progress
            .entry(update.swarm_id.clone())
            .or_insert_with(|| LiveProgress::new(&update.swarm_id, at));
        if previous.is_none() {
            progress.total_tasks += 1;
        }
        match previous {
            Some(Phase::Running) => progress.running = progress.running.saturating_sub(1),
            Some(Phase::Completed) => progress.completed = progress.completed.saturating_sub(1),
            Some(Phase::Failed) => progress.failed = progress.failed.saturating_sub(1),
            None => {}
        }
        match phase {
            Phase::Running => progress.running += 1,
            Phase::Completed => progress.completed += 1,
            Phase::Failed => progress.failed += 1,
        }
        progress.recompute(at);

        if let Some(agent_id) = update.agent_id.as_deref() {
            let activity = self.agent(agent_id, &update.swarm_id, at);
            match phase {
                Phase::Running => activity.current_task = Some(update.task_id.clone()),
                Phase::Completed | Phase::Failed => {
                    if activity.current_task.as_deref() == Some(update.task_id.as_str()) {
                        activity.current_task = None;
                    }
                    match previous {
                        Some(Phase::Completed) => {
                            activity.tasks_completed = activity.tasks_completed.saturating_sub(1);
                        }
                        Some(Phase::Failed) => {
                            activity.tasks_failed = activity.tasks_failed.saturating_sub(1);
                        }
                        _ => {}
                    }
                    if phase == Phase::Completed {
                        activity.tasks_completed += 1;
                    } else {
                        activity.tasks_failed += 1;
                    }
                }
            }
        }
    }
}
