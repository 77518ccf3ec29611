//! Connection state machine, correlation and backoff through the public API.

mod common;

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};

use common::setup_test_logging;
use swarm_client::domain::models::{ChannelKind, ClientConfig, Envelope};
use swarm_client::infrastructure::transport::{MockReply, MockTransport};
use swarm_client::services::{OperationQueue, ReconnectPolicy};
use swarm_client::{ClientError, Connection, ConnectionOptions, ConnectionStatus, ErrorKind};

fn connection(mock: &MockTransport, config: &ClientConfig) -> Connection {
    let options = ConnectionOptions::from_config(config, "ws://mock.test");
    Connection::new(options, Arc::new(mock.clone()), None)
}

#[test]
fn test_backoff_schedule() {
    let policy = ReconnectPolicy::new(1_000, 30_000, 5);
    let delays: Vec<u128> = (0..4).map(|a| policy.delay_for(a).as_millis()).collect();
    assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000]);
    assert_eq!(policy.delay_for(5), Duration::from_millis(30_000));
    assert_eq!(policy.delay_for(40), Duration::from_millis(30_000));
}

#[test]
fn test_duplicate_resolution_is_noop() {
    let queue = OperationQueue::new();
    let (id, _rx) = queue.register("swarm_status");
    assert_eq!(queue.len(), 1);

    assert!(queue.resolve(&id, Ok(json!({ "first": true }))));
    assert_eq!(queue.len(), 0);
    assert!(!queue.resolve(&id, Ok(json!({ "second": true }))));
    assert!(!queue.resolve(&id, Err(ClientError::unknown("late error"))));
}

#[test]
fn test_registered_ids_are_unique() {
    let queue = OperationQueue::new();
    let receivers: Vec<_> = (0..100).map(|_| queue.register("op")).collect();
    let ids: std::collections::HashSet<_> = receivers.iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(ids.len(), 100);
    assert_eq!(queue.len(), 100);
}

#[tokio::test]
async fn test_execute_requires_connection() {
    let mock = MockTransport::new();
    let conn = connection(&mock, &ClientConfig::default());

    let err = conn.execute("swarm_status", json!({}), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert!(mock.calls().is_empty());
}

#[tokio::test]
async fn test_late_duplicate_response_is_ignored() {
    setup_test_logging();
    let mock = MockTransport::with_handler(|_, _| MockReply::Data(json!({ "n": 1 })));
    let conn = connection(&mock, &ClientConfig::default());
    conn.connect().await.unwrap();

    let value = conn.execute("swarm_status", json!({}), None).await.unwrap();
    assert_eq!(value["n"], 1);

    let id = mock.calls()[0].id.clone();
    mock.push_frame(&Envelope::response(id, json!({ "n": 2 })));
    time::sleep(Duration::from_millis(20)).await;

    assert_eq!(conn.pending_operations(), 0);
    assert!(conn.is_connected());
}

#[tokio::test]
async fn test_error_frame_rejects_only_its_operation() {
    let mock = MockTransport::with_handler(|op, _| {
        if op == "bad" {
            MockReply::Error(
                swarm_client::domain::models::WireError::new("TASK_ERROR", "no such task")
                    .with_retryable(true),
            )
        } else {
            MockReply::Data(json!("ok"))
        }
    });
    let conn = connection(&mock, &ClientConfig::default());
    conn.connect().await.unwrap();

    let (bad, good) = tokio::join!(
        conn.execute("bad", json!({}), None),
        conn.execute("good", json!({}), None)
    );
    let err = bad.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TaskError);
    assert!(err.is_retryable());
    assert_eq!(good.unwrap(), Value::String("ok".into()));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_rejects_pending_immediately() {
    let mock = MockTransport::with_handler(|_, _| MockReply::Silent);
    let conn = connection(&mock, &ClientConfig::default());
    conn.connect().await.unwrap();

    let pending = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.execute("swarm_status", json!({}), Some(Duration::from_secs(60)))
                .await
        })
    };
    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(conn.pending_operations(), 1);

    let started = Instant::now();
    conn.disconnect().await;
    let err = pending.await.unwrap().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(conn.status(), ConnectionStatus::Disconnected);
    assert_eq!(conn.pending_operations(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_rejects_pending_fallback_request() {
    let mock = MockTransport::with_handler(|_, _| MockReply::Silent);
    mock.refuse_connections(true);
    let options = ConnectionOptions::from_config(&ClientConfig::default(), "ws://mock.test");
    let conn = Connection::new(options, Arc::new(mock.clone()), Some(Arc::new(mock.clone())));
    conn.connect().await.unwrap();
    assert_eq!(conn.state().channel, ChannelKind::Request);

    let pending = {
        let conn = conn.clone();
        tokio::spawn(async move {
            conn.execute("swarm_status", json!({}), Some(Duration::from_secs(3_600)))
                .await
        })
    };
    time::sleep(Duration::from_millis(10)).await;
    assert_eq!(mock.calls_for("swarm_status").len(), 1);

    let started = Instant::now();
    conn.disconnect().await;
    let err = pending.await.unwrap().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(conn.status(), ConnectionStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_attempts_follow_backoff_delays() {
    let mock = MockTransport::new();
    let mut config = ClientConfig::default();
    config.max_retries = 3;
    let conn = connection(&mock, &config);
    conn.connect().await.unwrap();
    let mut states = conn.watch_state();

    mock.refuse_connections(true);
    let lost_at = Instant::now();
    mock.drop_connection();

    states
        .wait_for(|s| s.status == ConnectionStatus::Error)
        .await
        .unwrap();
    let attempts = mock.open_attempts();
    // the first entry is the initial connect
    assert_eq!(attempts.len(), 4);

    let mut previous = lost_at;
    for (at, expected_ms) in attempts[1..].iter().zip([1_000_u64, 2_000, 4_000]) {
        let gap = *at - previous;
        let drift = gap.abs_diff(Duration::from_millis(expected_ms));
        assert!(drift < Duration::from_millis(50), "gap {gap:?}, expected {expected_ms}ms");
        previous = *at;
    }
}

#[tokio::test(start_paused = true)]
async fn test_loss_during_backoff_does_not_stack_timers() {
    let mock = MockTransport::new();
    let conn = connection(&mock, &ClientConfig::default());
    conn.connect().await.unwrap();
    let mut states = conn.watch_state();

    mock.drop_connection();
    states
        .wait_for(|s| s.status == ConnectionStatus::Reconnecting)
        .await
        .unwrap();

    // a second loss and an explicit connect while the timer runs
    mock.drop_connection();
    let err = conn.connect().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    time::sleep(Duration::from_millis(990)).await;
    assert_eq!(mock.open_count(), 1);
    assert_eq!(conn.reconnect_count(), 1);

    time::sleep(Duration::from_millis(20)).await;
    states
        .wait_for(|s| s.status == ConnectionStatus::Connected)
        .await
        .unwrap();
    assert_eq!(mock.open_count(), 2);

    time::sleep(Duration::from_secs(60)).await;
    assert_eq!(mock.open_count(), 2);
    assert_eq!(conn.reconnect_count(), 1);
    assert!(conn.is_connected());
    conn.disconnect().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_stop_after_max_retries() {
    let mock = MockTransport::new();
    let mut config = ClientConfig::default();
    config.max_retries = 2;
    let conn = connection(&mock, &config);
    conn.connect().await.unwrap();
    let mut states = conn.watch_state();

    mock.refuse_connections(true);
    mock.drop_connection();

    let terminal = time::timeout(
        Duration::from_secs(120),
        states.wait_for(|s| s.status == ConnectionStatus::Error),
    )
    .await;
    assert!(terminal.is_ok(), "connection never reached the error state");
    drop(terminal);
    let opens = mock.open_count();
    assert_eq!(conn.reconnect_count(), 2);

    time::sleep(Duration::from_secs(300)).await;
    assert_eq!(mock.open_count(), opens);
    assert_eq!(conn.status(), ConnectionStatus::Error);

    mock.refuse_connections(false);
    conn.connect().await.unwrap();
    assert!(conn.is_connected());
    assert_eq!(conn.state().reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_missed_heartbeat_triggers_reconnect() {
    let mock = MockTransport::new();
    mock.set_answer_pings(false);
    let mut config = ClientConfig::default();
    config.heartbeat_interval_ms = 1_000;
    config.heartbeat_timeout_ms = 3_000;
    let conn = connection(&mock, &config);
    conn.connect().await.unwrap();

    time::sleep(Duration::from_millis(4_500)).await;
    assert!(conn.reconnect_count() >= 1);
}
