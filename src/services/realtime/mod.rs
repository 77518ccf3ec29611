//! Push-event channel with filtered streams and derived views.
//!
//! [`RealtimeEventManager`] owns its own [`Connection`], independent of any
//! [`SwarmClient`](super::client::SwarmClient). Each inbound event is, in order:
//!
//! 1. appended to a bounded history
//! 2. buffered into every active stream whose filters accept it, followed by
//!    that stream's callback
//! 3. folded into the agent-activity and live-progress projections
//! 4. re-published to named subscribers
//!
//! A metrics snapshot is recomputed and published on a fixed interval.

mod projections;
mod stream;

pub use projections::{AgentActivity, LiveProgress};
pub use stream::{EventFilter, EventPredicate, StreamCallback, StreamConfig, StreamInfo};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use self::projections::Projections;
use self::stream::EventStream;
use super::connection::{Connection, ConnectionOptions};
use super::error_history::{ErrorHistory, ErrorRecord};
use super::event_bus::{EventBus, Subscription, ALL_TOPICS};
use crate::domain::errors::{ClientError, ClientResult};
use crate::domain::models::{ClientConfig, EventKind, SwarmEvent};
use crate::domain::ports::Transport;

/// Smoothing factor of the latency moving average.
const LATENCY_ALPHA: f64 = 0.1;

/// Metrics bus topic.
pub const METRICS_TOPIC: &str = "metrics";

/// Periodic health figures for the push channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeMetrics {
    pub events_received: u64,
    pub events_processed: u64,
    /// Moving average of event age on arrival.
    pub average_latency_ms: f64,
    pub uptime_ms: u64,
    pub errors: u64,
    pub reconnects: u64,
    pub active_streams: usize,
    pub connected: bool,
    pub timestamp: DateTime<Utc>,
}

struct RealtimeInner {
    connection: Connection,
    history_size: usize,
    stream_buffer_size: usize,
    metrics_interval: Duration,
    history: Mutex<VecDeque<SwarmEvent>>,
    streams: Mutex<HashMap<String, EventStream>>,
    projections: Mutex<Projections>,
    subscribers: EventBus<SwarmEvent>,
    metrics_bus: EventBus<RealtimeMetrics>,
    events_received: AtomicU64,
    events_processed: AtomicU64,
    error_count: AtomicU64,
    latency_ms: Mutex<f64>,
    last_metrics: Mutex<Option<RealtimeMetrics>>,
    errors: ErrorHistory,
    tasks: Mutex<Option<CancellationToken>>,
}

impl Drop for RealtimeInner {
    fn drop(&mut self) {
        if let Some(token) = self.tasks.lock().take() {
            token.cancel();
        }
    }
}

/// Handle to the push-event channel. Clones share state.
#[derive(Clone)]
pub struct RealtimeEventManager {
    inner: Arc<RealtimeInner>,
}

impl std::fmt::Debug for RealtimeEventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeEventManager")
            .field("connection", &self.inner.connection)
            .field("streams", &self.inner.streams.lock().len())
            .finish_non_exhaustive()
    }
}

impl RealtimeEventManager {
    /// Manager over a connection of its own to `config.realtime_url()`.
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let options = ConnectionOptions::from_config(config, config.realtime_url());
        Self::with_connection(config, Connection::new(options, transport, None))
    }

    pub fn with_connection(config: &ClientConfig, connection: Connection) -> Self {
        Self {
            inner: Arc::new(RealtimeInner {
                connection,
                history_size: config.realtime.history_size.max(1),
                stream_buffer_size: config.realtime.stream_buffer_size.max(1),
                metrics_interval: Duration::from_millis(config.realtime.metrics_interval_ms.max(1)),
                history: Mutex::new(VecDeque::new()),
                streams: Mutex::new(HashMap::new()),
                projections: Mutex::new(Projections::default()),
                subscribers: EventBus::new(),
                metrics_bus: EventBus::new(),
                events_received: AtomicU64::new(0),
                events_processed: AtomicU64::new(0),
                error_count: AtomicU64::new(0),
                latency_ms: Mutex::new(0.0),
                last_metrics: Mutex::new(None),
                errors: ErrorHistory::new(config.error_history_size),
                tasks: Mutex::new(None),
            }),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection.is_connected()
    }

    /// Connect and start the event pump and metrics timer.
    pub async fn connect(&self) -> ClientResult<()> {
        let events = self.inner.connection.subscribe_events();
        if let Err(err) = self.inner.connection.connect().await {
            self.inner.error_count.fetch_add(1, Ordering::Relaxed);
            self.inner.errors.record(Some("connect"), &err);
            return Err(err);
        }

        let token = CancellationToken::new();
        if let Some(previous) = self.inner.tasks.lock().replace(token.clone()) {
            previous.cancel();
        }
        tokio::spawn(pump_events(
            Arc::downgrade(&self.inner),
            events,
            token.clone(),
        ));
        tokio::spawn(publish_metrics(
            Arc::downgrade(&self.inner),
            self.inner.metrics_interval,
            token,
        ));
        info!(url = %self.inner.connection.url(), "Realtime channel connected");
        Ok(())
    }

    /// Stop the timers and close the channel without reconnecting.
    pub async fn disconnect(&self) {
        if let Some(token) = self.inner.tasks.lock().take() {
            token.cancel();
        }
        self.inner.connection.disconnect().await;
    }

    /// Process one event as if it had arrived on the channel.
    pub fn ingest(&self, event: SwarmEvent) {
        self.inner.handle(event);
    }

    /// Register a stream and return its id.
    pub fn create_stream(&self, config: StreamConfig) -> String {
        let id = Uuid::new_v4().to_string();
        let stream = EventStream::new(id.clone(), config, self.inner.stream_buffer_size);
        self.inner.streams.lock().insert(id.clone(), stream);
        debug!(stream_id = %id, "Stream created");
        id
    }

    /// Remove a stream. It receives nothing from this point on.
    pub fn remove_stream(&self, stream_id: &str) -> bool {
        self.inner.streams.lock().remove(stream_id).is_some()
    }

    pub fn pause_stream(&self, stream_id: &str) -> bool {
        self.set_active(stream_id, false)
    }

    pub fn resume_stream(&self, stream_id: &str) -> bool {
        self.set_active(stream_id, true)
    }

    fn set_active(&self, stream_id: &str, active: bool) -> bool {
        self.inner
            .streams
            .lock()
            .get_mut(stream_id)
            .map(|s| s.active = active)
            .is_some()
    }

    /// Copy of a stream's buffered events, oldest first.
    pub fn stream_events(&self, stream_id: &str) -> Option<Vec<SwarmEvent>> {
        self.inner.streams.lock().get(stream_id).map(EventStream::events)
    }

    /// Take a stream's buffered events, leaving it empty.
    pub fn drain_stream(&self, stream_id: &str) -> Option<Vec<SwarmEvent>> {
        self.inner
            .streams
            .lock()
            .get_mut(stream_id)
            .map(EventStream::drain)
    }

    pub fn stream_info(&self, stream_id: &str) -> Option<StreamInfo> {
        self.inner.streams.lock().get(stream_id).map(EventStream::info)
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        let mut infos: Vec<_> = self
            .inner
            .streams
            .lock()
            .values()
            .map(EventStream::info)
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Most recent events, oldest first; all retained events when `limit` is `None`.
    pub fn history(&self, limit: Option<usize>) -> Vec<SwarmEvent> {
        let history = self.inner.history.lock();
        let skip = limit.map_or(0, |n| history.len().saturating_sub(n));
        history.iter().skip(skip).cloned().collect()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }

    pub fn agent_activity(&self, agent_id: &str) -> Option<AgentActivity> {
        self.inner.projections.lock().agents.get(agent_id).cloned()
    }

    pub fn agent_activities(&self) -> Vec<AgentActivity> {
        let mut all: Vec<_> = self
            .inner
            .projections
            .lock()
            .agents
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }

    pub fn live_progress(&self, swarm_id: &str) -> Option<LiveProgress> {
        self.inner.projections.lock().progress.get(swarm_id).cloned()
    }

    /// Subscribe to events of one kind, or to every event with [`ALL_TOPICS`].
    pub fn on<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&SwarmEvent) + Send + Sync + 'static,
    {
        self.inner.subscribers.subscribe(topic, handler)
    }

    pub fn on_kind<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SwarmEvent) + Send + Sync + 'static,
    {
        self.on(kind.as_str(), handler)
    }

    pub fn on_metrics<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&RealtimeMetrics) + Send + Sync + 'static,
    {
        self.inner.metrics_bus.subscribe(METRICS_TOPIC, handler)
    }

    /// Metrics as of now.
    pub fn metrics(&self) -> RealtimeMetrics {
        self.inner.snapshot_metrics()
    }

    /// The snapshot most recently published by the metrics timer.
    pub fn last_published_metrics(&self) -> Option<RealtimeMetrics> {
        self.inner.last_metrics.lock().clone()
    }

    pub fn error_history(&self) -> Vec<ErrorRecord> {
        self.inner.errors.snapshot()
    }
}

impl RealtimeInner {
    fn handle(&self, event: SwarmEvent) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
        self.observe_latency(&event);
        if event.kind == EventKind::Error {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut history = self.history.lock();
            if history.len() >= self.history_size {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let callbacks: Vec<(String, StreamCallback)> = {
            let mut streams = self.streams.lock();
            streams
                .values_mut()
                .filter(|s| s.accepts(&event))
                .filter_map(|s| {
                    s.push(event.clone());
                    s.callback.clone().map(|cb| (s.id.clone(), cb))
                })
                .collect()
        };
        for (stream_id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                warn!(stream_id = %stream_id, kind = %event.kind, "Stream callback panicked");
                self.record_failure(&format!("stream {stream_id} callback panicked"));
            }
        }

        if !self.projections.lock().apply(&event) {
            debug!(kind = %event.kind, "Event payload not understood by projections");
        }

        let topic = event.kind.as_str();
        let handlers = self.subscribers.topic_count(topic) + self.subscribers.topic_count(ALL_TOPICS);
        let delivered = self.subscribers.publish(topic, &event);
        if delivered < handlers {
            self.record_failure(&format!("{} '{topic}' subscribers panicked", handlers - delivered));
        }

        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[allow(clippy::cast_precision_loss)]
    fn observe_latency(&self, event: &SwarmEvent) {
        let sample = (Utc::now() - event.timestamp).num_milliseconds().max(0) as f64;
        let mut average = self.latency_ms.lock();
        *average = (1.0 - LATENCY_ALPHA).mul_add(*average, LATENCY_ALPHA * sample);
    }

    fn record_failure(&self, message: &str) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        self.errors
            .record(Some("event_dispatch"), &ClientError::unknown(message));
    }

    fn snapshot_metrics(&self) -> RealtimeMetrics {
        let state = self.connection.state();
        let now = Utc::now();
        let uptime_ms = state
            .connected_at
            .filter(|_| state.is_connected())
            .and_then(|at| u64::try_from((now - at).num_milliseconds()).ok())
            .unwrap_or(0);
        RealtimeMetrics {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            average_latency_ms: *self.latency_ms.lock(),
            uptime_ms,
            errors: self.error_count.load(Ordering::Relaxed),
            reconnects: self.connection.reconnect_count(),
            active_streams: self.streams.lock().values().filter(|s| s.active).count(),
            connected: state.is_connected(),
            timestamp: now,
        }
    }
}

async fn pump_events(
    inner: Weak<RealtimeInner>,
    mut events: broadcast::Receiver<SwarmEvent>,
    token: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            () = token.cancelled() => break,
            received = events.recv() => received,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match received {
            Ok(event) => inner.handle(event),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Realtime pump lagged; events dropped");
                inner.error_count.fetch_add(1, Ordering::Relaxed);
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("Realtime pump stopped");
}

async fn publish_metrics(inner: Weak<RealtimeInner>, period: Duration, token: CancellationToken) {
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let metrics = inner.snapshot_metrics();
        *inner.last_metrics.lock() = Some(metrics.clone());
        inner.metrics_bus.publish(METRICS_TOPIC, &metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::MockTransport;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn manager() -> (RealtimeEventManager, MockTransport) {
        let mock = MockTransport::new();
        let mut config = ClientConfig::new("ws://mock");
        config.realtime.history_size = 3;
        config.realtime.stream_buffer_size = 2;
        (RealtimeEventManager::new(&config, Arc::new(mock.clone())), mock)
    }

    fn event(kind: EventKind, swarm: &str) -> SwarmEvent {
        SwarmEvent::new(kind, "test", json!({ "swarmId": swarm, "taskId": "t1" }))
    }

    #[test]
    fn test_history_is_bounded() {
        let (manager, _) = manager();
        for swarm in ["s1", "s2", "s3", "s4"] {
            manager.ingest(event(EventKind::TaskProgress, swarm));
        }
        let history = manager.history(None);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].swarm_id(), Some("s2"));
        assert_eq!(manager.history(Some(1))[0].swarm_id(), Some("s4"));
    }

    #[test]
    fn test_swarm_filter() {
        let (manager, _) = manager();
        let only_s1 = manager.create_stream(StreamConfig::new().filter(EventFilter::Swarm("s1".into())));
        let everything = manager.create_stream(StreamConfig::new().buffer_size(10));

        manager.ingest(event(EventKind::TaskStarted, "s1"));
        manager.ingest(event(EventKind::TaskStarted, "s2"));

        let filtered = manager.stream_events(&only_s1).unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(filtered.iter().all(|e| e.swarm_id() == Some("s1")));
        assert_eq!(manager.stream_events(&everything).unwrap().len(), 2);
    }

    #[test]
    fn test_pause_resume_drain_remove() {
        let (manager, _) = manager();
        let id = manager.create_stream(StreamConfig::new());

        assert!(manager.pause_stream(&id));
        manager.ingest(event(EventKind::TaskStarted, "s1"));
        assert!(manager.stream_events(&id).unwrap().is_empty());

        assert!(manager.resume_stream(&id));
        manager.ingest(event(EventKind::TaskStarted, "s1"));
        assert_eq!(manager.drain_stream(&id).unwrap().len(), 1);
        assert!(manager.stream_events(&id).unwrap().is_empty());

        assert!(manager.remove_stream(&id));
        assert!(manager.stream_events(&id).is_none());
        assert!(!manager.pause_stream(&id));
    }

    #[test]
    fn test_callback_panic_is_isolated() {
        let (manager, _) = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let _bad = manager.create_stream(StreamConfig::new().on_event(|_| panic!("boom")));
        let counter = Arc::clone(&calls);
        let good = manager.create_stream(StreamConfig::new().on_event(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        manager.ingest(event(EventKind::TaskStarted, "s1"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.stream_events(&good).unwrap().len(), 1);
        let metrics = manager.metrics();
        assert_eq!(metrics.events_processed, 1);
        assert_eq!(metrics.errors, 1);
        assert_eq!(manager.error_history().len(), 1);
    }

    #[test]
    fn test_named_subscribers() {
        let (manager, _) = manager();
        let started = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&started);
        let _started_sub = manager.on_kind(EventKind::TaskStarted, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        let a = Arc::clone(&all);
        let all_sub = manager.on(ALL_TOPICS, move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });

        manager.ingest(event(EventKind::TaskStarted, "s1"));
        manager.ingest(event(EventKind::TaskFailed, "s1"));
        assert!(all_sub.unsubscribe());
        manager.ingest(event(EventKind::TaskStarted, "s1"));

        assert_eq!(started.load(Ordering::SeqCst), 2);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_latency_moving_average() {
        let (manager, _) = manager();
        let old = Utc::now() - chrono::Duration::seconds(10);
        manager.ingest(event(EventKind::TaskProgress, "s1").at(old));
        let first = manager.metrics().average_latency_ms;
        // 0.1 * ~10000ms
        assert!((900.0..1100.0).contains(&first), "{first}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushed_events_and_periodic_metrics() {
        let (manager, mock) = manager();
        let published = Arc::new(AtomicUsize::new(0));
        let p = Arc::clone(&published);
        let _metrics = manager.on_metrics(move |_| {
            p.fetch_add(1, Ordering::SeqCst);
        });
        manager.connect().await.unwrap();

        mock.push_event(event(EventKind::TaskStarted, "s1"));
        time::sleep(Duration::from_millis(5_500)).await;

        assert_eq!(manager.history(None).len(), 1);
        assert_eq!(manager.live_progress("s1").unwrap().running, 1);
        assert!(published.load(Ordering::SeqCst) >= 1);
        let last = manager.last_published_metrics().unwrap();
        assert!(last.connected);
        assert_eq!(last.events_received, 1);

        manager.disconnect().await;
        assert!(!manager.is_connected());
        assert_eq!(manager.connection().reconnect_count(), 0);
    }
}
