//! Command-line front end over [`SwarmApi`](crate::services::SwarmApi) and
//! [`RealtimeEventManager`](crate::services::RealtimeEventManager).

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::errors::ClientError;

#[derive(Parser, Debug)]
#[command(name = "swarm-client", version, about = "Drive a remote agent swarm")]
pub struct Cli {
    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    /// Load configuration from this YAML file instead of .swarm-client/
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the configured server URL
    #[arg(long, global = true, env = "SWARM_CLIENT_SERVER_URL", value_name = "URL")]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a swarm, optionally spawning initial agents
    Init(commands::swarm::InitArgs),
    /// Show a swarm's agents and tasks
    Status(commands::swarm::SwarmRef),
    /// Grow or shrink a swarm to a target agent count
    Scale(commands::swarm::ScaleArgs),
    /// Spawn one agent into a swarm
    Spawn(commands::agent::SpawnArgs),
    /// Spawn a copy of an existing agent
    Clone(commands::agent::CloneArgs),
    /// Submit a batch of tasks from a YAML or JSON file
    Orchestrate(commands::task::OrchestrateArgs),
    /// Show task results and the completion summary
    Results(commands::swarm::SwarmRef),
    /// Derive a health report from one status snapshot
    Health(commands::swarm::SwarmRef),
    /// Drain and terminate a swarm
    Terminate(commands::swarm::TerminateArgs),
    /// Print realtime events as they arrive
    Watch(commands::watch::WatchArgs),
}

/// Print `err` and exit with a status derived from its kind.
pub fn handle_error(err: &anyhow::Error, json_mode: bool) -> ! {
    let client_error = err.downcast_ref::<ClientError>();
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": format!("{err:#}"),
            "kind": client_error.map(|e| e.kind().to_string()),
            "retryable": client_error.is_some_and(ClientError::is_retryable),
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("{} {err:#}", console::style("Error:").red().bold());
        if client_error.is_some_and(ClientError::is_retryable) {
            eprintln!("This error is transient; retrying may succeed.");
        }
    }
    std::process::exit(if client_error.is_some() { 2 } else { 1 });
}
