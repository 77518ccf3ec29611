//! Filtered, bounded event streams.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

use crate::domain::models::{EventKind, EventSeverity, SwarmEvent};

pub type EventPredicate = Arc<dyn Fn(&SwarmEvent) -> bool + Send + Sync>;
pub type StreamCallback = Arc<dyn Fn(&SwarmEvent) + Send + Sync>;

/// One matching rule. A stream accepts an event if any of its filters match.
#[derive(Clone)]
pub enum EventFilter {
    Kind(EventKind),
    Swarm(String),
    Agent(String),
    Task(String),
    /// Events at or above this severity.
    Severity(EventSeverity),
    Custom(EventPredicate),
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kind(kind) => f.debug_tuple("Kind").field(kind).finish(),
            Self::Swarm(id) => f.debug_tuple("Swarm").field(id).finish(),
            Self::Agent(id) => f.debug_tuple("Agent").field(id).finish(),
            Self::Task(id) => f.debug_tuple("Task").field(id).finish(),
            Self::Severity(level) => f.debug_tuple("Severity").field(level).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl EventFilter {
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&SwarmEvent) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// A panicking custom predicate counts as no match.
    pub fn matches(&self, event: &SwarmEvent) -> bool {
        match self {
            Self::Kind(kind) => event.kind == *kind,
            Self::Swarm(id) => event.swarm_id() == Some(id.as_str()),
            Self::Agent(id) => event.agent_id() == Some(id.as_str()),
            Self::Task(id) => event.task_id() == Some(id.as_str()),
            Self::Severity(level) => event.severity() >= *level,
            Self::Custom(predicate) => catch_unwind(AssertUnwindSafe(|| predicate(event)))
                .unwrap_or_else(|_| {
                    warn!(kind = %event.kind, "Custom event filter panicked");
                    false
                }),
        }
    }
}

/// Options for a new stream.
#[derive(Clone, Default)]
pub struct StreamConfig {
    pub name: Option<String>,
    pub filters: Vec<EventFilter>,
    /// Buffer capacity; the manager default applies when unset.
    pub buffer_size: Option<usize>,
    pub callback: Option<StreamCallback>,
}

impl fmt::Debug for StreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("name", &self.name)
            .field("filters", &self.filters)
            .field("buffer_size", &self.buffer_size)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: EventFilter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub const fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    #[must_use]
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SwarmEvent) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }
}

/// Point-in-time view of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub id: String,
    pub name: Option<String>,
    pub active: bool,
    pub buffered: usize,
    pub capacity: usize,
    /// Events evicted because the buffer was full.
    pub dropped: u64,
    pub filters: usize,
}

pub(super) struct EventStream {
    pub(super) id: String,
    name: Option<String>,
    filters: Vec<EventFilter>,
    buffer: VecDeque<SwarmEvent>,
    capacity: usize,
    pub(super) active: bool,
    dropped: u64,
    pub(super) callback: Option<StreamCallback>,
}

impl EventStream {
    pub(super) fn new(id: String, config: StreamConfig, default_capacity: usize) -> Self {
        let capacity = config.buffer_size.unwrap_or(default_capacity).max(1);
        Self {
            id,
            name: config.name,
            filters: config.filters,
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            active: true,
            dropped: 0,
            callback: config.callback,
        }
    }

    pub(super) fn accepts(&self, event: &SwarmEvent) -> bool {
        self.active && (self.filters.is_empty() || self.filters.iter().any(|f| f.matches(event)))
    }

    /// Append, evicting the oldest event when full.
    pub(super) fn push(&mut self, event: SwarmEvent) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
            self.dropped += 1;
        }
        self.buffer.push_back(event);
    }

    pub(super) fn events(&self) -> Vec<SwarmEvent> {
        self.buffer.iter().cloned().collect()
    }

    pub(super) fn drain(&mut self) -> Vec<SwarmEvent> {
        self.buffer.drain(..).collect()
    }

    pub(super) fn info(&self) -> StreamInfo {
        StreamInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            active: self.active,
            buffered: self.buffer.len(),
            capacity: self.capacity,
            dropped: self.dropped,
            filters: self.filters.len(),
        }
    }
}
