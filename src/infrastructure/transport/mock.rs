//! Deterministic in-process transport.
//!
//! Implements the same [`Transport`] and [`RequestTransport`] contracts as the
//! network transports. Replies come from a caller-supplied handler; every
//! request is recorded with the (possibly paused) tokio clock.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::errors::{ClientError, ClientResult};
use crate::domain::models::{Envelope, SwarmEvent, WireError, WireMessage};
use crate::domain::ports::{Duplex, RequestTransport, Transport};

/// What the simulated server does with one request.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Data(Value),
    Error(WireError),
    /// Never answer; the caller's timeout decides.
    Silent,
}

type Handler = dyn Fn(&str, &Value) -> MockReply + Send + Sync;

/// A request observed by the mock server.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub id: String,
    pub operation: String,
    pub params: Value,
    pub at: Instant,
}

struct Session {
    inbound: mpsc::Sender<WireMessage>,
    cancel: CancellationToken,
}

struct MockInner {
    handler: RwLock<Arc<Handler>>,
    calls: Mutex<Vec<RecordedCall>>,
    sessions: Mutex<Vec<Session>>,
    fail_next_opens: AtomicU32,
    refuse: AtomicBool,
    answer_pings: AtomicBool,
    opens: Mutex<Vec<Instant>>,
    next_request: AtomicUsize,
}

/// Test double for the orchestration service.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("opens", &self.open_count())
            .field("calls", &self.inner.calls.lock().len())
            .finish_non_exhaustive()
    }
}

impl MockTransport {
    /// Mock whose server answers every request with `null`.
    pub fn new() -> Self {
        Self::with_handler(|_, _| MockReply::Data(Value::Null))
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&str, &Value) -> MockReply + Send + Sync + 'static,
    {
        let handler: Arc<Handler> = Arc::new(handler);
        Self {
            inner: Arc::new(MockInner {
                handler: RwLock::new(handler),
                calls: Mutex::new(Vec::new()),
                sessions: Mutex::new(Vec::new()),
                fail_next_opens: AtomicU32::new(0),
                refuse: AtomicBool::new(false),
                answer_pings: AtomicBool::new(true),
                opens: Mutex::new(Vec::new()),
                next_request: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn(&str, &Value) -> MockReply + Send + Sync + 'static,
    {
        let handler: Arc<Handler> = Arc::new(handler);
        *self.inner.handler.write() = handler;
    }

    /// Fail the next `count` open attempts.
    pub fn fail_next_opens(&self, count: u32) {
        self.inner.fail_next_opens.store(count, Ordering::SeqCst);
    }

    /// Refuse every open attempt until called again with `false`.
    pub fn refuse_connections(&self, refuse: bool) {
        self.inner.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn set_answer_pings(&self, answer: bool) {
        self.inner.answer_pings.store(answer, Ordering::SeqCst);
    }

    /// Open attempts so far, refused and failed ones included.
    pub fn open_count(&self) -> usize {
        self.inner.opens.lock().len()
    }

    /// When each open attempt happened, oldest first.
    pub fn open_attempts(&self) -> Vec<Instant> {
        self.inner.opens.lock().clone()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.calls.lock().clone()
    }

    pub fn calls_for(&self, operation: &str) -> Vec<RecordedCall> {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .cloned()
            .collect()
    }

    /// Number of sessions still open on the server side.
    pub fn live_sessions(&self) -> usize {
        self.inner
            .sessions
            .lock()
            .iter()
            .filter(|s| !s.inbound.is_closed())
            .count()
    }

    /// Deliver a raw frame to every live session. Returns how many received it.
    pub fn push_frame(&self, envelope: &Envelope) -> usize {
        self.inner
            .sessions
            .lock()
            .iter()
            .filter(|s| s.inbound.try_send(WireMessage::Frame(envelope.clone())).is_ok())
            .count()
    }

    pub fn push_event(&self, event: SwarmEvent) -> usize {
        self.push_frame(&Envelope::event(event))
    }

    /// Sever every live session without a close frame.
    pub fn drop_connection(&self) {
        let sessions = std::mem::take(&mut *self.inner.sessions.lock());
        for session in sessions {
            session.cancel.cancel();
        }
    }

    fn record(&self, id: String, operation: &str, params: &Value) -> MockReply {
        self.inner.calls.lock().push(RecordedCall {
            id,
            operation: operation.to_string(),
            params: params.clone(),
            at: Instant::now(),
        });
        let handler = Arc::clone(&self.inner.handler.read());
        handler(operation, params)
    }
}

async fn serve(
    mock: MockTransport,
    mut outbound: mpsc::Receiver<WireMessage>,
    inbound: mpsc::Sender<WireMessage>,
    cancel: CancellationToken,
) {
    loop {
        let msg = tokio::select! {
            () = cancel.cancelled() => break,
            msg = outbound.recv() => msg,
        };
        let reply = match msg {
            None | Some(WireMessage::Close) => break,
            Some(WireMessage::Ping(nonce)) => {
                if !mock.inner.answer_pings.load(Ordering::SeqCst) {
                    continue;
                }
                WireMessage::Pong(nonce)
            }
            Some(WireMessage::Pong(_)) => continue,
            Some(WireMessage::Frame(Envelope::Request {
                id,
                operation,
                params,
                ..
            })) => match mock.record(id.clone(), &operation, &params) {
                MockReply::Data(data) => WireMessage::Frame(Envelope::response(id, data)),
                MockReply::Error(error) => WireMessage::Frame(Envelope::error(id, error)),
                MockReply::Silent => continue,
            },
            Some(WireMessage::Frame(_)) => continue,
        };
        if inbound.send(reply).await.is_err() {
            break;
        }
    }
    debug!("Mock session closed");
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, url: &str) -> ClientResult<Duplex> {
        self.inner.opens.lock().push(Instant::now());
        if self.inner.refuse.load(Ordering::SeqCst) {
            return Err(ClientError::connection(format!("connection to {url} refused")));
        }
        let failed = self
            .inner
            .fail_next_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ClientError::connection(format!("connection to {url} failed")));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        self.inner.sessions.lock().push(Session {
            inbound: inbound_tx.clone(),
            cancel: cancel.clone(),
        });
        tokio::spawn(serve(self.clone(), outbound_rx, inbound_tx, cancel));

        Ok(Duplex {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[async_trait]
impl RequestTransport for MockTransport {
    async fn request(&self, operation: &str, params: Value) -> ClientResult<Value> {
        let n = self.inner.next_request.fetch_add(1, Ordering::SeqCst);
        match self.record(format!("req-{n}"), operation, &params) {
            MockReply::Data(data) => Ok(data),
            MockReply::Error(error) => Err(ClientError::from_wire(error)),
            MockReply::Silent => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_is_answered_and_recorded() {
        let mock = MockTransport::with_handler(|op, _| MockReply::Data(json!({"op": op})));
        let mut duplex = mock.open("mock://").await.unwrap();
        duplex
            .outbound
            .send(WireMessage::Frame(Envelope::request("1", "swarm_status", json!({}))))
            .await
            .unwrap();

        let reply = duplex.inbound.recv().await.unwrap();
        assert_eq!(
            reply,
            WireMessage::Frame(Envelope::response("1", json!({"op": "swarm_status"})))
        );
        assert_eq!(mock.calls_for("swarm_status").len(), 1);
    }

    #[tokio::test]
    async fn test_failed_opens_are_counted() {
        let mock = MockTransport::new();
        mock.fail_next_opens(1);
        assert!(mock.open("mock://").await.is_err());
        assert!(mock.open("mock://").await.is_ok());
        assert_eq!(mock.open_count(), 2);
        assert_eq!(mock.open_attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_drop_connection_closes_inbound() {
        let mock = MockTransport::new();
        let mut duplex = mock.open("mock://").await.unwrap();
        mock.drop_connection();
        assert!(duplex.inbound.recv().await.is_none());
    }
}
