//! Swarm Client CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use swarm_client::cli::{self, Cli};
use swarm_client::domain::models::ClientConfig;
use swarm_client::infrastructure::config::ConfigLoader;
use swarm_client::infrastructure::logging::{LogConfig, LoggerImpl};

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    if let Some(server) = &cli.server {
        config.server_url.clone_from(server);
        ConfigLoader::validate(&config).context("Invalid --server URL")?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => cli::handle_error(&err, cli.json),
    };

    let _logger = match LogConfig::try_from(&config.logging).and_then(|c| LoggerImpl::init(&c)) {
        Ok(logger) => logger,
        Err(err) => cli::handle_error(&err, cli.json),
    };

    if let Err(err) = cli::commands::execute(cli.command, &config, cli.json).await {
        cli::handle_error(&err, cli.json);
    }
}
