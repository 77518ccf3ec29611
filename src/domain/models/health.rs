use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::agent::AgentStatus;
use super::swarm::{SwarmState, SwarmStatus};
use super::task::TaskSummary;

/// Fraction of failed agents above which a swarm is unhealthy.
const AGENT_ERROR_LIMIT: f64 = 0.5;
/// Fraction of failed finished tasks above which a swarm is degraded.
const TASK_FAILURE_LIMIT: f64 = 0.2;
const LOW_EFFICIENCY: f64 = 0.5;

/// Coarse health verdict for a swarm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health report derived from one status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub swarm_id: String,
    pub status: HealthStatus,
    /// 0.0 (failing) to 1.0 (fully healthy).
    pub score: f64,
    /// Agent count per status name.
    pub agent_counts: BTreeMap<String, usize>,
    pub tasks: TaskSummary,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    /// Assess a swarm from one status snapshot.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_snapshot(state: &SwarmState) -> Self {
        let mut agent_counts: BTreeMap<String, usize> = BTreeMap::new();
        for agent in &state.agents {
            *agent_counts.entry(agent.status.to_string()).or_default() += 1;
        }
        let tasks = TaskSummary::from_executions(&state.tasks);

        let live: Vec<_> = state.live_agents().collect();
        let errored = live.iter().filter(|a| a.status == AgentStatus::Error).count();
        let available = live.iter().filter(|a| a.status.is_available()).count();
        let backlog = tasks.pending + tasks.running;

        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        let mut score: f64 = 1.0;
        let mut critical = false;

        if matches!(state.status, SwarmStatus::Error | SwarmStatus::Terminated) {
            issues.push(format!("swarm is {}", state.status));
            critical = true;
        }

        if live.is_empty() {
            issues.push("swarm has no live agents".to_string());
            recommendations.push("spawn agents or scale the swarm up".to_string());
            critical = true;
            score = 0.0;
        } else {
            let error_ratio = errored as f64 / live.len() as f64;
            if errored > 0 {
                issues.push(format!("{errored} of {} agents in error state", live.len()));
                recommendations.push("terminate or replace failed agents".to_string());
                score -= 0.5 * error_ratio;
            }
            if error_ratio > AGENT_ERROR_LIMIT {
                critical = true;
            }

            if available == 0 && tasks.pending > 0 {
                issues.push(format!(
                    "{} pending tasks with no idle agents",
                    tasks.pending
                ));
                recommendations.push("scale up to absorb the task backlog".to_string());
                score -= 0.2;
            } else if live.len() > 1 && backlog == 0 && available == live.len() {
                recommendations.push("all agents idle; consider scaling down".to_string());
            }

            let mean_efficiency = live
                .iter()
                .map(|a| a.performance.efficiency_score)
                .sum::<f64>()
                / live.len() as f64;
            let measured = live.iter().any(|a| a.performance.tasks_completed > 0);
            if measured && mean_efficiency < LOW_EFFICIENCY {
                issues.push(format!("low mean agent efficiency ({mean_efficiency:.2})"));
                recommendations.push("review agent capabilities against task requirements".to_string());
                score -= 0.1;
            }
        }

        let finished = tasks.completed + tasks.failed;
        if finished > 0 {
            let failure_rate = tasks.failed as f64 / finished as f64;
            if failure_rate > TASK_FAILURE_LIMIT {
                issues.push(format!(
                    "{:.0}% of finished tasks failed",
                    failure_rate * 100.0
                ));
                recommendations.push("inspect failed task errors before resubmitting".to_string());
            }
            score -= 0.3 * failure_rate;
        }

        let score = score.clamp(0.0, 1.0);
        let status = if critical || score < 0.5 {
            HealthStatus::Unhealthy
        } else if !issues.is_empty() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            swarm_id: state.id.clone(),
            status,
            score,
            agent_counts,
            tasks,
            issues,
            recommendations,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        AgentConfig, AgentState, SwarmConfig, SwarmDefaults, SwarmInitOptions, TaskExecution,
        TaskStatus,
    };

    fn swarm() -> SwarmState {
        let config: SwarmConfig = SwarmInitOptions::named("h").into_config(&SwarmDefaults::default());
        let mut state = SwarmState::new("s1", &config);
        state.status = SwarmStatus::Active;
        state
    }

    fn agent(id: &str, status: AgentStatus) -> AgentState {
        AgentState {
            status,
            ..AgentState::new(id, AgentConfig::default())
        }
    }

    #[test]
    fn test_healthy_swarm() {
        let mut state = swarm();
        state.agents = vec![agent("a1", AgentStatus::Idle), agent("a2", AgentStatus::Busy)];
        state.tasks = vec![TaskExecution {
            status: TaskStatus::Running,
            ..TaskExecution::pending("t1")
        }];

        let report = HealthReport::from_snapshot(&state);
        assert!(report.is_healthy(), "{:?}", report.issues);
        assert_eq!(report.agent_counts.get("idle"), Some(&1));
        assert_eq!(report.agent_counts.get("busy"), Some(&1));
        assert!((report.score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_no_agents_is_unhealthy() {
        let report = HealthReport::from_snapshot(&swarm());
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn test_failed_agents_degrade() {
        let mut state = swarm();
        state.agents = vec![
            agent("a1", AgentStatus::Idle),
            agent("a2", AgentStatus::Idle),
            agent("a3", AgentStatus::Idle),
            agent("a4", AgentStatus::Error),
        ];
        let report = HealthReport::from_snapshot(&state);
        assert_eq!(report.status, HealthStatus::Degraded);
        assert!(report.issues.iter().any(|i| i.contains("error state")));
    }

    #[test]
    fn test_backlog_without_capacity_recommends_scale_up() {
        let mut state = swarm();
        state.agents = vec![agent("a1", AgentStatus::Busy)];
        state.tasks = vec![TaskExecution::pending("t1"), TaskExecution::pending("t2")];
        let report = HealthReport::from_snapshot(&state);
        assert!(report.recommendations.iter().any(|r| r.contains("scale up")));
        assert_eq!(report.tasks.pending, 2);
    }
}
