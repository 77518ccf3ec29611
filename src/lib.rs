//! Swarm Client - runtime for a remote agent-swarm orchestration service
//!
//! The client correlates request/response operations over one logical
//! channel, reconnects with exponential backoff, validates and schedules task
//! batches, and keeps a local mirror of swarm state in step with a separate
//! push-event channel.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): errors, models and port traits
//! - **Service Layer** (`services`): connection, client, orchestration API and realtime events
//! - **Infrastructure Layer** (`infrastructure`): transports, persistence, config and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use swarm_client::{ClientConfig, SwarmApi, SwarmClient, SwarmInitOptions, WebSocketTransport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::new("ws://localhost:8080/swarm");
//!     let client = SwarmClient::with_transport(&config, Arc::new(WebSocketTransport::new()), None);
//!     client.connect().await?;
//!     let api = SwarmApi::new(client);
//!     let swarm = api.swarm_init(SwarmInitOptions::named("research")).await?;
//!     println!("created {}", swarm.id);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{ClientError, ClientResult, ErrorKind};
pub use domain::models::{
    AgentConfig, AgentOverrides, AgentState, AgentStatus, ClientConfig, ConnectionState,
    ConnectionStatus, EventKind, HealthReport, HealthStatus, SwarmEvent, SwarmInitOptions,
    SwarmState, SwarmTopology, TaskDefinition, TaskExecution, TaskPriority, TaskResults,
    TaskStatus,
};
pub use domain::ports::{MemorySink, RequestTransport, Transport};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::transport::{HttpRequestTransport, MockTransport, WebSocketTransport};
pub use infrastructure::InMemorySink;
pub use services::{
    Connection, ConnectionOptions, DependencyResolver, EventFilter, RealtimeEventManager,
    StreamConfig, SwarmApi, SwarmClient,
};
