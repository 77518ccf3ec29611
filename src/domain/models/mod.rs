pub mod agent;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod event;
pub mod health;
pub mod swarm;
pub mod task;

pub use agent::{AgentConfig, AgentOverrides, AgentPerformance, AgentState, AgentStatus};
pub use config::{ClientConfig, LoggingConfig, RealtimeConfig, SwarmDefaults};
pub use connection::{ChannelKind, ConnectionState, ConnectionStatus};
pub use envelope::{Envelope, WireError, WireMessage};
pub use event::{
    ErrorNotice, EventKind, EventPayload, EventSeverity, MetricsUpdate, PerformanceAlert,
    StatusChange, SwarmEvent, TaskUpdate,
};
pub use health::{HealthReport, HealthStatus};
pub use swarm::{
    CommunicationConfig, FailureHandling, ScalingPolicy, SwarmConfig, SwarmHealthSnapshot,
    SwarmInitOptions, SwarmPerformance, SwarmState, SwarmStatus, SwarmStrategy, SwarmTopology,
};
pub use task::{
    TaskDefinition, TaskExecution, TaskPriority, TaskResults, TaskStatus, TaskSummary,
};
