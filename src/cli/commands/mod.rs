//! CLI command implementations.

pub mod agent;
pub mod swarm;
pub mod task;
pub mod watch;

use anyhow::{Context, Result};
use std::sync::Arc;

use super::Commands;
use crate::domain::models::ClientConfig;
use crate::infrastructure::InMemorySink;
use crate::services::{SwarmApi, SwarmClient};

/// Dispatch one parsed command.
pub async fn execute(command: Commands, config: &ClientConfig, json_mode: bool) -> Result<()> {
    match command {
        Commands::Init(args) => swarm::init(args, config, json_mode).await,
        Commands::Status(args) => swarm::status(args, config, json_mode).await,
        Commands::Scale(args) => swarm::scale(args, config, json_mode).await,
        Commands::Results(args) => swarm::results(args, config, json_mode).await,
        Commands::Health(args) => swarm::health(args, config, json_mode).await,
        Commands::Terminate(args) => swarm::terminate(args, config, json_mode).await,
        Commands::Spawn(args) => agent::spawn(args, config, json_mode).await,
        Commands::Clone(args) => agent::clone(args, config, json_mode).await,
        Commands::Orchestrate(args) => task::orchestrate(args, config, json_mode).await,
        Commands::Watch(args) => watch::execute(args, config, json_mode).await,
    }
}

/// Build the client stack from configuration and connect it.
pub(crate) async fn connect(config: &ClientConfig) -> Result<(SwarmApi, InMemorySink)> {
    let client = SwarmClient::from_config(config).context("Failed to build client")?;
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", config.server_url))?;
    let sink = InMemorySink::new();
    let api = SwarmApi::new(client).with_memory_sink(Arc::new(sink.clone()));
    Ok((api, sink))
}
