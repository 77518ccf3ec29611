//! Agent CLI commands.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{AgentConfig, AgentOverrides, AgentState, ClientConfig};

#[derive(Args, Debug)]
pub struct SpawnArgs {
    /// Swarm id
    pub swarm_id: String,
    /// Agent name
    pub name: String,
    /// Agent type
    #[arg(short = 't', long, default_value = "worker")]
    pub agent_type: String,
    /// Explicit agent id; the server assigns one when omitted
    #[arg(long)]
    pub id: Option<String>,
    /// Capability (repeatable)
    #[arg(short, long = "capability")]
    pub capabilities: Vec<String>,
    /// Concurrent task limit
    #[arg(long)]
    pub max_concurrent_tasks: Option<u32>,
}

#[derive(Args, Debug)]
pub struct CloneArgs {
    /// Swarm id
    pub swarm_id: String,
    /// Agent to copy
    pub agent_id: String,
    /// Name for the copy
    #[arg(long)]
    pub name: Option<String>,
    /// Replace the copied capabilities (repeatable)
    #[arg(short, long = "capability")]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutput {
    pub swarm_id: String,
    #[serde(flatten)]
    pub agent: AgentState,
}

impl CommandOutput for AgentOutput {
    fn to_human(&self) -> String {
        let agent = &self.agent;
        let mut lines = vec![
            format!("Agent: {} ({})", agent.config.name, agent.id),
            format!("Swarm: {}", self.swarm_id),
            format!("Type: {}", agent.config.agent_type),
            format!("Status: {}", agent.status),
        ];
        if !agent.config.capabilities.is_empty() {
            lines.push(format!("Capabilities: {}", agent.config.capabilities.join(", ")));
        }
        lines.join("\n")
    }
}

pub async fn spawn(args: SpawnArgs, config: &ClientConfig, json_mode: bool) -> Result<()> {
    let (api, _) = super::connect(config).await?;

    let mut agent_config =
        AgentConfig::new(&args.name, &args.agent_type).with_capabilities(args.capabilities);
    if let Some(id) = args.id {
        agent_config = agent_config.with_id(id);
    }
    if let Some(limit) = args.max_concurrent_tasks {
        agent_config.max_concurrent_tasks = limit;
    }

    let agent = api
        .client()
        .spawn_agent(&args.swarm_id, agent_config)
        .await
        .with_context(|| format!("Failed to spawn agent '{}'", args.name))?;
    api.client().disconnect().await;

    output(
        &AgentOutput {
            swarm_id: args.swarm_id,
            agent,
        },
        json_mode,
    );
    Ok(())
}

pub async fn clone(args: CloneArgs, config: &ClientConfig, json_mode: bool) -> Result<()> {
    let (api, _) = super::connect(config).await?;
    // Cloning reads the source config from the local mirror.
    api.client().swarm_status(&args.swarm_id).await?;

    let overrides = AgentOverrides {
        name: args.name,
        capabilities: (!args.capabilities.is_empty()).then_some(args.capabilities),
        ..AgentOverrides::default()
    };
    let agent = api
        .agent_clone(&args.swarm_id, &args.agent_id, &overrides)
        .await
        .with_context(|| format!("Failed to clone agent '{}'", args.agent_id))?;
    api.client().disconnect().await;

    output(
        &AgentOutput {
            swarm_id: args.swarm_id,
            agent,
        },
        json_mode,
    );
    Ok(())
}
