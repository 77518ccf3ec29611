//! Realtime event watch command.

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cli::output::{styled_severity, truncate};
use crate::domain::models::{ClientConfig, EventKind, EventSeverity, SwarmEvent};
use crate::infrastructure::transport::WebSocketTransport;
use crate::services::{EventFilter, RealtimeEventManager, StreamConfig};

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Only events for this swarm
    #[arg(short, long)]
    pub swarm: Option<String>,
    /// Only events of this type (repeatable)
    #[arg(short, long = "type", value_name = "TYPE")]
    pub kinds: Vec<EventKind>,
    /// Only events at or above this severity
    #[arg(long)]
    pub min_severity: Option<EventSeverity>,
    /// Exit after this many events
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

impl WatchArgs {
    /// All given criteria must hold.
    fn filter(&self) -> EventFilter {
        let swarm = self.swarm.clone();
        let kinds = self.kinds.clone();
        let min_severity = self.min_severity;
        EventFilter::custom(move |event| {
            swarm.as_deref().is_none_or(|id| event.swarm_id() == Some(id))
                && (kinds.is_empty() || kinds.contains(&event.kind))
                && min_severity.is_none_or(|level| event.severity() >= level)
        })
    }
}

fn format_event(event: &SwarmEvent) -> String {
    let scope = [event.swarm_id(), event.agent_id(), event.task_id()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join("/");
    let line = format!(
        "{} {:<22} {:<28} {}",
        event.timestamp.format("%H:%M:%S%.3f"),
        event.kind.as_str(),
        truncate(&scope, 28),
        truncate(&event.data.to_string(), 80)
    );
    styled_severity(event.severity(), &line)
}

pub async fn execute(args: WatchArgs, config: &ClientConfig, json_mode: bool) -> Result<()> {
    let manager = RealtimeEventManager::new(config, Arc::new(WebSocketTransport::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let stream = manager.create_stream(
        StreamConfig::new()
            .named("cli-watch")
            .filter(args.filter())
            .buffer_size(1)
            .on_event(move |event| {
                let _ = tx.send(event.clone());
            }),
    );

    manager
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", config.realtime_url()))?;
    if !json_mode {
        eprintln!("Watching {} (Ctrl-C to stop)", config.realtime_url());
    }

    let mut seen = 0_usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                if json_mode {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    println!("{}", format_event(&event));
                }
                seen += 1;
                if args.limit.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
        }
    }

    manager.remove_stream(&stream);
    manager.disconnect().await;
    Ok(())
}
