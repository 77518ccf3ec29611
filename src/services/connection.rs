//! Single logical channel to the orchestration service.
//!
//! A [`Connection`] prefers a persistent socket and falls back to
//! one-request-per-operation when the socket cannot be opened and a fallback
//! transport is configured. Socket sessions run a reader task and a heartbeat
//! task; losing either drops into the reconnection state machine.
//!
//! ```text
//! disconnected -connect()-> connecting -open-> connected
//! connected -lost-> reconnecting -backoff-> connecting
//! reconnecting -attempts >= max-> error
//! any -disconnect()-> disconnected
//! ```

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::operation_queue::OperationQueue;
use super::reconnect::ReconnectPolicy;
use crate::domain::errors::{ClientError, ClientResult};
use crate::domain::models::{
    ChannelKind, ClientConfig, ConnectionState, ConnectionStatus, Envelope, SwarmEvent,
    WireMessage,
};
use crate::domain::ports::{Duplex, RequestTransport, Transport};

/// Tunables for one [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub url: String,
    pub policy: ReconnectPolicy,
    pub connect_timeout: Duration,
    pub operation_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Inbound silence after which the socket is treated as dead.
    pub heartbeat_timeout: Duration,
    pub event_capacity: usize,
}

impl ConnectionOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_config(&ClientConfig::default(), url)
    }

    pub fn from_config(config: &ClientConfig, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            policy: ReconnectPolicy::from_config(config),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            operation_timeout: config.operation_timeout(),
            heartbeat_interval: Duration::from_millis(config.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(config.heartbeat_timeout_ms),
            event_capacity: config.realtime.history_size.max(16),
        }
    }
}

/// Why the heartbeat loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeartbeatResult {
    TimedOut,
    SocketClosed,
    Cancelled,
}

/// Inbound activity for one socket session.
#[derive(Debug)]
struct Liveness {
    last_seen: Mutex<Instant>,
    pings: Mutex<HashMap<u64, Instant>>,
}

impl Liveness {
    fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
            pings: Mutex::new(HashMap::new()),
        }
    }

    fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    fn silent_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}

#[derive(Debug)]
struct Session {
    generation: u64,
    outbound: mpsc::Sender<WireMessage>,
    cancel: CancellationToken,
}

struct Inner {
    options: ConnectionOptions,
    transport: Arc<dyn Transport>,
    fallback: Option<Arc<dyn RequestTransport>>,
    queue: OperationQueue,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<SwarmEvent>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    reconnect_pending: AtomicBool,
    reconnect_count: AtomicU64,
    /// Cancelled by `disconnect()`; replaced on the next `connect()`.
    lifecycle: Mutex<CancellationToken>,
}

/// Handle to a logical connection. Clones share the same channel.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &*self.inner.state_tx.borrow())
            .field("pending", &self.inner.queue.len())
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(
        options: ConnectionOptions,
        transport: Arc<dyn Transport>,
        fallback: Option<Arc<dyn RequestTransport>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::new(options.url.clone()));
        let (events_tx, _) = broadcast::channel(options.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                options,
                transport,
                fallback,
                queue: OperationQueue::new(),
                state_tx,
                events_tx,
                session: Mutex::new(None),
                generation: AtomicU64::new(0),
                reconnect_pending: AtomicBool::new(false),
                reconnect_count: AtomicU64::new(0),
                lifecycle: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.options.url
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state_tx.borrow().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Push events received on the socket. Slow receivers lose the oldest.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SwarmEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Reconnects scheduled over the lifetime of this connection.
    pub fn reconnect_count(&self) -> u64 {
        self.inner.reconnect_count.load(Ordering::SeqCst)
    }

    pub fn pending_operations(&self) -> usize {
        self.inner.queue.len()
    }

    /// Open the channel.
    ///
    /// # Errors
    /// Fails if the connection is already connected or connecting, or if
    /// neither the socket nor the fallback could be established. A failed
    /// attempt leaves the connection disconnected.
    pub async fn connect(&self) -> ClientResult<()> {
        let status = self.status();
        if matches!(
            status,
            ConnectionStatus::Connected | ConnectionStatus::Connecting | ConnectionStatus::Reconnecting
        ) {
            return Err(ClientError::connection(format!(
                "cannot connect to {}: connection is {status}",
                self.url()
            )));
        }

        {
            let mut lifecycle = self.inner.lifecycle.lock();
            if lifecycle.is_cancelled() {
                *lifecycle = CancellationToken::new();
            }
        }
        self.inner.reconnect_pending.store(false, Ordering::SeqCst);

        if !self.inner.transition(ConnectionStatus::Connecting, |_| {}) {
            return Err(ClientError::connection(format!(
                "cannot connect to {}: connection is {}",
                self.url(),
                self.status()
            )));
        }

        match establish(&self.inner).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(url = %self.url(), error = %err, "Connect failed");
                self.inner.transition(ConnectionStatus::Disconnected, |_| {});
                Err(err)
            }
        }
    }

    /// Issue `operation` and wait for its outcome.
    ///
    /// Uses the connection's default timeout when `timeout` is `None`.
    ///
    /// # Errors
    /// Fails fast when not connected; otherwise returns the server's error,
    /// a timeout, or a connection error if the channel drops first.
    pub async fn execute(
        &self,
        operation: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> ClientResult<Value> {
        let state = self.state();
        if !state.is_connected() {
            return Err(ClientError::connection(format!(
                "cannot execute '{operation}': connection is {}",
                state.status
            )));
        }
        let timeout = timeout.unwrap_or(self.inner.options.operation_timeout);

        match state.channel {
            ChannelKind::Request => {
                let fallback = self.inner.fallback.as_ref().ok_or_else(|| {
                    ClientError::connection("request channel has no fallback transport")
                })?;
                let closed = self.inner.lifecycle_token();
                tokio::select! {
                    () = closed.cancelled() => {
                        Err(ClientError::connection("connection closed by client"))
                    }
                    outcome = time::timeout(timeout, fallback.request(operation, params)) => {
                        outcome.map_err(|_| ClientError::timeout(operation, timeout))?
                    }
                }
            }
            ChannelKind::Socket => {
                let outbound = self
                    .inner
                    .session
                    .lock()
                    .as_ref()
                    .map(|s| s.outbound.clone())
                    .ok_or_else(|| ClientError::connection("socket session is not open"))?;

                let (id, rx) = self.inner.queue.register(operation);
                debug!(operation, operation_id = %id, "Sending request");
                let frame = WireMessage::Frame(Envelope::request(id.clone(), operation, params));
                if outbound.send(frame).await.is_err() {
                    self.inner.queue.remove(&id);
                    return Err(ClientError::connection(format!(
                        "socket closed before '{operation}' was sent"
                    )));
                }

                match time::timeout(timeout, rx).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(_)) => Err(ClientError::connection(format!(
                        "'{operation}' abandoned by the connection"
                    ))),
                    Err(_) => {
                        self.inner.queue.remove(&id);
                        Err(ClientError::timeout(operation, timeout))
                    }
                }
            }
        }
    }

    /// Close the channel without reconnecting.
    ///
    /// Pending operations are rejected immediately.
    pub async fn disconnect(&self) {
        self.inner.lifecycle.lock().cancel();
        self.inner.reconnect_pending.store(false, Ordering::SeqCst);

        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.cancel.cancel();
            // best effort; the peer may already be gone
            let _ = session.outbound.send(WireMessage::Close).await;
        }

        self.inner
            .queue
            .reject_all(&ClientError::connection("connection closed by client"));
        if self.inner.transition(ConnectionStatus::Disconnected, |state| {
            state.connected_at = None;
        }) {
            info!(url = %self.url(), "Disconnected");
        }
    }
}

impl Inner {
    /// Move to `next` if it is a defined edge, applying `update` atomically.
    fn transition(&self, next: ConnectionStatus, update: impl FnOnce(&mut ConnectionState)) -> bool {
        let mut previous = None;
        self.state_tx.send_if_modified(|state| {
            if !state.status.can_transition_to(next) {
                return false;
            }
            previous = Some(state.status);
            state.status = next;
            update(state);
            true
        });
        match previous {
            Some(from) => {
                debug!(url = %self.options.url, %from, to = %next, "Connection state changed");
                true
            }
            None => false,
        }
    }

    fn lifecycle_token(&self) -> CancellationToken {
        self.lifecycle.lock().clone()
    }

    fn dispatch(&self, envelope: Envelope) {
        match envelope {
            Envelope::Response { id, data } => {
                self.queue.resolve(&id, Ok(data));
            }
            Envelope::Error { id, error } => {
                self.queue.resolve(&id, Err(ClientError::from_wire(error)));
            }
            Envelope::Event { id, data } => {
                if let Some(id) = id {
                    match serde_json::to_value(&data) {
                        Ok(value) => {
                            self.queue.resolve(&id, Ok(value));
                        }
                        Err(e) => warn!(error = %e, "Failed to encode event payload"),
                    }
                }
                // no receivers is fine
                let _ = self.events_tx.send(data);
            }
            Envelope::Request { operation, .. } => {
                debug!(%operation, "Ignoring server-initiated request");
            }
        }
    }
}

/// Open a socket session, or fall back to request mode.
async fn establish(inner: &Arc<Inner>) -> ClientResult<()> {
    let url = inner.options.url.clone();
    let opened = time::timeout(inner.options.connect_timeout, inner.transport.open(&url))
        .await
        .unwrap_or_else(|_| {
            Err(ClientError::timeout(
                "connect",
                inner.options.connect_timeout,
            ))
        });

    if inner.lifecycle_token().is_cancelled() {
        if let Ok(duplex) = opened {
            let _ = duplex.outbound.try_send(WireMessage::Close);
        }
        return Err(ClientError::connection("disconnected while connecting"));
    }

    match opened {
        Ok(duplex) => {
            let generation = start_session(inner, duplex);
            let connected = inner.transition(ConnectionStatus::Connected, |state| {
                state.reconnect_attempts = 0;
                state.channel = ChannelKind::Socket;
                state.connected_at = Some(Utc::now());
            });
            if !connected {
                close_session(inner, generation);
                return Err(ClientError::connection("connection state changed while connecting"));
            }
            info!(%url, "Connected");
            Ok(())
        }
        Err(err) if inner.fallback.is_some() => {
            warn!(%url, error = %err, "Socket unavailable, using request fallback");
            let connected = inner.transition(ConnectionStatus::Connected, |state| {
                state.reconnect_attempts = 0;
                state.channel = ChannelKind::Request;
                state.connected_at = Some(Utc::now());
                state.latency_ms = None;
            });
            if connected {
                Ok(())
            } else {
                Err(ClientError::connection("connection state changed while connecting"))
            }
        }
        Err(err) => Err(match err {
            ClientError::Connection { .. } => err,
            other => ClientError::connection(other.to_string()),
        }),
    }
}

fn start_session(inner: &Arc<Inner>, duplex: Duplex) -> u64 {
    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let cancel = inner.lifecycle_token().child_token();
    let liveness = Arc::new(Liveness::new());

    *inner.session.lock() = Some(Session {
        generation,
        outbound: duplex.outbound.clone(),
        cancel: cancel.clone(),
    });

    tokio::spawn(read_loop(
        Arc::clone(inner),
        generation,
        duplex.inbound,
        Arc::clone(&liveness),
        cancel.clone(),
    ));
    let heartbeat_inner = Arc::clone(inner);
    tokio::spawn(async move {
        let result = run_heartbeat(&heartbeat_inner, duplex.outbound, &liveness, cancel).await;
        match result {
            HeartbeatResult::TimedOut => {
                warn!(url = %heartbeat_inner.options.url, "Heartbeat timed out");
                connection_lost(&heartbeat_inner, generation, "heartbeat timeout");
            }
            HeartbeatResult::SocketClosed => {
                connection_lost(&heartbeat_inner, generation, "socket closed");
            }
            HeartbeatResult::Cancelled => {}
        }
    });
    generation
}

fn close_session(inner: &Inner, generation: u64) {
    let mut session = inner.session.lock();
    if session.as_ref().is_some_and(|s| s.generation == generation) {
        if let Some(s) = session.take() {
            s.cancel.cancel();
            let _ = s.outbound.try_send(WireMessage::Close);
        }
    }
}

async fn read_loop(
    inner: Arc<Inner>,
    generation: u64,
    mut inbound: mpsc::Receiver<WireMessage>,
    liveness: Arc<Liveness>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => return,
            msg = inbound.recv() => msg,
        };
        let Some(msg) = msg else {
            connection_lost(&inner, generation, "socket closed");
            return;
        };
        liveness.touch();
        match msg {
            WireMessage::Frame(envelope) => inner.dispatch(envelope),
            WireMessage::Pong(nonce) => {
                let sent = liveness.pings.lock().remove(&nonce);
                if let Some(sent) = sent {
                    let latency_ms = u64::try_from(sent.elapsed().as_millis()).unwrap_or(u64::MAX);
                    inner.state_tx.send_modify(|state| state.latency_ms = Some(latency_ms));
                }
            }
            WireMessage::Ping(_) => {}
            WireMessage::Close => {
                connection_lost(&inner, generation, "closed by server");
                return;
            }
        }
    }
}

async fn run_heartbeat(
    inner: &Inner,
    outbound: mpsc::Sender<WireMessage>,
    liveness: &Liveness,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let interval = inner.options.heartbeat_interval;
    let timeout = inner.options.heartbeat_timeout;
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut nonce: u64 = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
            _ = ticker.tick() => {}
        }

        if liveness.silent_for() > timeout {
            return HeartbeatResult::TimedOut;
        }

        nonce = nonce.wrapping_add(1);
        {
            let mut pings = liveness.pings.lock();
            pings.retain(|_, sent| sent.elapsed() <= timeout);
            pings.insert(nonce, Instant::now());
        }
        if outbound.send(WireMessage::Ping(nonce)).await.is_err() {
            return HeartbeatResult::SocketClosed;
        }
        inner
            .state_tx
            .send_modify(|state| state.last_ping = Some(Utc::now()));
    }
}

/// Tear down session `generation` after an ungraceful loss and start
/// reconnecting. Stale sessions are ignored.
fn connection_lost(inner: &Arc<Inner>, generation: u64, reason: &str) {
    {
        let mut session = inner.session.lock();
        match session.as_ref() {
            Some(s) if s.generation == generation => {
                s.cancel.cancel();
                *session = None;
            }
            _ => return,
        }
    }

    warn!(url = %inner.options.url, reason, "Connection lost");
    inner
        .queue
        .reject_all(&ClientError::connection(format!("connection lost: {reason}")));

    if inner.transition(ConnectionStatus::Reconnecting, |state| {
        state.connected_at = None;
        state.latency_ms = None;
    }) {
        schedule_reconnect(inner);
    }
}

/// Schedule one reconnect attempt after the backoff delay.
///
/// At most one attempt is pending at a time; further calls while one is
/// scheduled are ignored.
fn schedule_reconnect(inner: &Arc<Inner>) {
    if inner.reconnect_pending.swap(true, Ordering::SeqCst) {
        debug!("Reconnect already scheduled");
        return;
    }

    let attempts = inner.state_tx.borrow().reconnect_attempts;
    let policy = inner.options.policy;
    if !policy.allows(attempts) {
        inner.reconnect_pending.store(false, Ordering::SeqCst);
        if inner.transition(ConnectionStatus::Error, |_| {}) {
            error!(
                url = %inner.options.url,
                attempts,
                "Reconnect attempts exhausted; explicit connect required"
            );
        }
        return;
    }

    let delay = policy.delay_for(attempts);
    inner
        .state_tx
        .send_modify(|state| state.reconnect_attempts = attempts + 1);
    inner.reconnect_count.fetch_add(1, Ordering::SeqCst);
    info!(
        url = %inner.options.url,
        attempt = attempts + 1,
        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        "Scheduling reconnect"
    );

    let token = inner.lifecycle_token();
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {
                inner.reconnect_pending.store(false, Ordering::SeqCst);
                return;
            }
            () = time::sleep(delay) => {}
        }
        inner.reconnect_pending.store(false, Ordering::SeqCst);
        reconnect_attempt(&inner).await;
    });
}

async fn reconnect_attempt(inner: &Arc<Inner>) {
    if !inner.transition(ConnectionStatus::Connecting, |_| {}) {
        return;
    }
    match establish(inner).await {
        Ok(()) => info!(url = %inner.options.url, "Reconnected"),
        Err(err) => {
            warn!(url = %inner.options.url, error = %err, "Reconnect attempt failed");
            if inner.transition(ConnectionStatus::Reconnecting, |_| {}) {
                schedule_reconnect(inner);
            }
        }
    }
}
