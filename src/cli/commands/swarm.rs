//! Swarm lifecycle CLI commands.

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Cell;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::output::{
    agent_status_color, output, status_cell, styled_health, table, task_status_color, truncate,
    CommandOutput,
};
use crate::domain::models::{
    AgentConfig, ClientConfig, HealthReport, SwarmInitOptions, SwarmState, SwarmStrategy,
    SwarmTopology, TaskResults,
};
use crate::domain::ports::MemorySink;
use crate::services::{ScaleOptions, ScaleOutcome, TerminateOptions, TerminationReport};

#[derive(Args, Debug)]
pub struct SwarmRef {
    /// Swarm id
    pub swarm_id: String,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Swarm name
    pub name: String,
    /// Topology (mesh, hierarchical, ring, star)
    #[arg(short, long)]
    pub topology: Option<SwarmTopology>,
    /// Work distribution strategy
    #[arg(short, long)]
    pub strategy: Option<SwarmStrategy>,
    /// Upper bound on agents
    #[arg(long)]
    pub max_agents: Option<usize>,
    /// Agents to spawn once the swarm exists
    #[arg(short, long, default_value = "0")]
    pub agents: usize,
    /// Type of the initial agents
    #[arg(long, default_value = "worker")]
    pub agent_type: String,
    /// Capability of the initial agents (repeatable)
    #[arg(long = "capability")]
    pub capabilities: Vec<String>,
    /// Delay between initial spawns in milliseconds
    #[arg(long)]
    pub spawn_delay_ms: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ScaleArgs {
    /// Swarm id
    pub swarm_id: String,
    /// Target number of live agents
    pub target: usize,
    /// Wait for busy agents to go idle before terminating them
    #[arg(long)]
    pub wait_for_idle: bool,
    /// Bound on that wait in milliseconds
    #[arg(long)]
    pub grace_ms: Option<u64>,
}

#[derive(Args, Debug)]
pub struct TerminateArgs {
    /// Swarm id
    pub swarm_id: String,
    /// Skip task cancellation and the grace period
    #[arg(short, long)]
    pub force: bool,
    /// Leave running tasks alone
    #[arg(long)]
    pub no_cancel: bool,
    /// Write the swarm's exported memory to this file before terminating
    #[arg(long, value_name = "PATH")]
    pub export: Option<PathBuf>,
    /// Grace period in milliseconds
    #[arg(long)]
    pub grace_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct SwarmOutput {
    #[serde(flatten)]
    pub swarm: SwarmState,
}

impl CommandOutput for SwarmOutput {
    fn to_human(&self) -> String {
        let swarm = &self.swarm;
        let mut lines = vec![
            format!("Swarm: {} ({})", swarm.name, swarm.id),
            format!("Status: {}", swarm.status),
            format!("Topology: {}", swarm.topology),
        ];

        if swarm.agents.is_empty() {
            lines.push("\nNo agents.".to_string());
        } else {
            let mut agents = table(["ID", "NAME", "TYPE", "STATUS", "EFFICIENCY", "TASK"]);
            for agent in &swarm.agents {
                agents.add_row(vec![
                    Cell::new(truncate(&agent.id, 24)),
                    Cell::new(truncate(&agent.config.name, 20)),
                    Cell::new(&agent.config.agent_type),
                    status_cell(agent.status, agent_status_color(agent.status)),
                    Cell::new(format!("{:.2}", agent.performance.efficiency_score)),
                    Cell::new(agent.current_task.as_deref().unwrap_or("-")),
                ]);
            }
            lines.push(format!("\nAgents ({}):\n{agents}", swarm.agents.len()));
        }

        if !swarm.tasks.is_empty() {
            let mut tasks = table(["TASK", "STATUS", "PROGRESS", "AGENTS"]);
            for task in &swarm.tasks {
                tasks.add_row(vec![
                    Cell::new(truncate(&task.task_id, 24)),
                    status_cell(task.status, task_status_color(task.status)),
                    Cell::new(format!("{:.0}%", task.progress * 100.0)),
                    Cell::new(task.assigned_agents.join(", ")),
                ]);
            }
            lines.push(format!("\nTasks ({}):\n{tasks}", swarm.tasks.len()));
        }

        lines.join("\n")
    }
}

impl CommandOutput for ScaleOutcome {
    fn to_human(&self) -> String {
        if self.is_noop() {
            return format!(
                "Swarm {} already has {} agent(s); nothing to do.",
                self.swarm_id, self.target
            );
        }
        let mut lines = vec![format!(
            "Scaled swarm {} from {} to {} agent(s).",
            self.swarm_id, self.previous, self.target
        )];
        if !self.spawned.is_empty() {
            lines.push(format!("Spawned: {}", self.spawned.join(", ")));
        }
        if !self.terminated.is_empty() {
            lines.push(format!("Terminated: {}", self.terminated.join(", ")));
        }
        if self.failed > 0 {
            lines.push(format!(
                "{} step(s) failed; run `status` to see the actual size.",
                self.failed
            ));
        }
        lines.join("\n")
    }
}

impl CommandOutput for TaskResults {
    fn to_human(&self) -> String {
        let s = &self.summary;
        let mut lines = vec![format!(
            "Swarm {}: {} task(s), {} completed, {} failed, {} running, {} pending, {} cancelled",
            self.swarm_id, s.total, s.completed, s.failed, s.running, s.pending, s.cancelled
        )];
        lines.push(format!("Efficiency: {:.0}%", self.efficiency * 100.0));
        if !self.tasks.is_empty() {
            let mut tasks = table(["TASK", "STATUS", "PROGRESS", "ERROR"]);
            for task in &self.tasks {
                tasks.add_row(vec![
                    Cell::new(truncate(&task.task_id, 24)),
                    status_cell(task.status, task_status_color(task.status)),
                    Cell::new(format!("{:.0}%", task.progress * 100.0)),
                    Cell::new(task.error.as_deref().map_or_else(String::new, |e| truncate(e, 40))),
                ]);
            }
            lines.push(tasks.to_string());
        }
        lines.join("\n")
    }
}

impl CommandOutput for HealthReport {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Swarm {}: {}", self.swarm_id, styled_health(self.status)),
            format!("Score: {:.2}", self.score),
        ];
        let mut counts = table(["AGENT STATUS", "COUNT"]);
        for (status, count) in &self.agent_counts {
            counts.add_row(vec![Cell::new(status), Cell::new(count)]);
        }
        lines.push(counts.to_string());
        lines.push(format!(
            "Tasks: {} total, {} running, {} pending, {} failed",
            self.tasks.total, self.tasks.running, self.tasks.pending, self.tasks.failed
        ));
        if !self.issues.is_empty() {
            lines.push("\nIssues:".to_string());
            lines.extend(self.issues.iter().map(|i| format!("  - {i}")));
        }
        if !self.recommendations.is_empty() {
            lines.push("\nRecommendations:".to_string());
            lines.extend(self.recommendations.iter().map(|r| format!("  - {r}")));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct TerminateOutput {
    #[serde(flatten)]
    pub report: TerminationReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exported_to: Option<PathBuf>,
}

impl CommandOutput for TerminateOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Swarm {} terminated.", self.report.swarm_id)];
        if !self.report.cancelled_tasks.is_empty() {
            lines.push(format!(
                "Cancelled {} task(s): {}",
                self.report.cancelled_tasks.len(),
                self.report.cancelled_tasks.join(", ")
            ));
        }
        if let Some(path) = &self.exported_to {
            lines.push(format!("Memory exported to {}", path.display()));
        }
        lines.join("\n")
    }
}

pub async fn init(args: InitArgs, config: &ClientConfig, json_mode: bool) -> Result<()> {
    let (api, _) = super::connect(config).await?;

    let mut options = SwarmInitOptions::named(&args.name);
    options.topology = args.topology;
    options.strategy = args.strategy;
    options.max_agents = args.max_agents;
    options.spawn_delay_ms = args.spawn_delay_ms;
    options.initial_agents = (1..=args.agents)
        .map(|i| {
            AgentConfig::new(format!("{}-{i}", args.agent_type), &args.agent_type)
                .with_capabilities(args.capabilities.iter().cloned())
        })
        .collect();

    let swarm = api
        .swarm_init(options)
        .await
        .with_context(|| format!("Failed to initialize swarm '{}'", args.name))?;
    api.client().disconnect().await;

    output(&SwarmOutput { swarm }, json_mode);
    Ok(())
}

pub async fn status(args: SwarmRef, config: &ClientConfig, json_mode: bool) -> Result<()> {
    let (api, _) = super::connect(config).await?;
    let swarm = api.client().swarm_status(&args.swarm_id).await?;
    api.client().disconnect().await;
    output(&SwarmOutput { swarm }, json_mode);
    Ok(())
}

pub async fn scale(args: ScaleArgs, config: &ClientConfig, json_mode: bool) -> Result<()> {
    let (api, _) = super::connect(config).await?;
    let options = ScaleOptions {
        template: None,
        wait_for_idle: args.wait_for_idle,
        grace_period: args.grace_ms.map(Duration::from_millis),
    };
    let outcome = api
        .swarm_scale(&args.swarm_id, args.target, options)
        .await
        .with_context(|| format!("Failed to scale swarm '{}'", args.swarm_id))?;
    api.client().disconnect().await;
    output(&outcome, json_mode);
    Ok(())
}

pub async fn results(args: SwarmRef, config: &ClientConfig, json_mode: bool) -> Result<()> {
    let (api, _) = super::connect(config).await?;
    let results = api.client().task_results(&args.swarm_id).await?;
    api.client().disconnect().await;
    output(&results, json_mode);
    Ok(())
}

pub async fn health(args: SwarmRef, config: &ClientConfig, json_mode: bool) -> Result<()> {
    let (api, _) = super::connect(config).await?;
    let report = api.swarm_health_check(&args.swarm_id).await?;
    api.client().disconnect().await;
    output(&report, json_mode);
    Ok(())
}

pub async fn terminate(args: TerminateArgs, config: &ClientConfig, json_mode: bool) -> Result<()> {
    let (api, sink) = super::connect(config).await?;
    let options = TerminateOptions {
        cancel_running_tasks: !args.no_cancel,
        export_memory: args.export.is_some(),
        force: args.force,
        grace_period: args.grace_ms.map(Duration::from_millis),
    };
    let report = api
        .swarm_terminate(&args.swarm_id, options)
        .await
        .with_context(|| format!("Failed to terminate swarm '{}'", args.swarm_id))?;
    api.client().disconnect().await;

    let mut exported_to = None;
    if let (Some(path), Some(key)) = (args.export, report.memory_key.as_deref()) {
        let memory = sink.load(key).await?.unwrap_or_default();
        let body = serde_json::to_vec_pretty(&memory)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        exported_to = Some(path);
    }

    output(&TerminateOutput { report, exported_to }, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AgentState, SwarmDefaults};

    #[test]
    fn test_swarm_output_lists_agents() {
        let config = SwarmInitOptions::named("alpha").into_config(&SwarmDefaults::default());
        let mut swarm = SwarmState::new("s1", &config);
        swarm.upsert_agent(AgentState::new("a1", AgentConfig::new("coder", "worker")));
        let text = SwarmOutput { swarm }.to_human();
        assert!(text.contains("alpha"));
        assert!(text.contains("Agents (1)"));
        assert!(text.contains("a1"));
    }

    #[test]
    fn test_noop_scale_output() {
        let outcome = ScaleOutcome {
            swarm_id: "s1".to_string(),
            previous: 3,
            target: 3,
            ..ScaleOutcome::default()
        };
        assert!(outcome.to_human().contains("nothing to do"));
        assert_eq!(outcome.to_json()["target"], 3);
    }
}
