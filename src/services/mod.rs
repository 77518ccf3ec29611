//! Service layer
//!
//! - `connection`: one logical channel with correlation, heartbeat and reconnect
//! - `client`: typed operations plus the local swarm mirror
//! - `api`: multi-step orchestration workflows
//! - `realtime`: push-event streams, projections and metrics

pub mod api;
pub mod client;
pub mod connection;
pub mod dependency_resolver;
pub mod error_history;
pub mod event_bus;
pub mod operation_queue;
pub mod realtime;
pub mod reconnect;

pub use api::{ScaleOptions, ScaleOutcome, SwarmApi, TerminateOptions, TerminationReport};
pub use client::{AgentMetrics, MemoryUsage, SwarmClient};
pub use connection::{Connection, ConnectionOptions};
pub use dependency_resolver::DependencyResolver;
pub use error_history::{ErrorHistory, ErrorRecord};
pub use event_bus::{EventBus, Subscription, ALL_TOPICS};
pub use operation_queue::OperationQueue;
pub use realtime::{
    AgentActivity, EventFilter, LiveProgress, RealtimeEventManager, RealtimeMetrics,
    StreamConfig, StreamInfo,
};
pub use reconnect::ReconnectPolicy;
