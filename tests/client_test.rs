//! Client operations and local mirror behaviour.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{test_config, FakeServer};
use swarm_client::domain::models::{EventKind, SwarmConfig, SwarmDefaults};
use swarm_client::infrastructure::transport::{MockReply, MockTransport};
use swarm_client::{
    AgentStatus, ErrorKind, SwarmClient, SwarmEvent, SwarmInitOptions, SwarmState, TaskStatus,
};

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn swarm_config(name: &str) -> SwarmConfig {
    SwarmInitOptions::named(name).into_config(&SwarmDefaults::default())
}

#[tokio::test]
async fn test_task_results_summary() {
    let mut tasks = Vec::new();
    for i in 0..7 {
        tasks.push(json!({ "taskId": format!("done-{i}"), "status": "completed" }));
    }
    for i in 0..2 {
        tasks.push(json!({ "taskId": format!("bad-{i}"), "status": "failed", "error": "boom" }));
    }
    tasks.push(json!({ "taskId": "busy", "status": "running", "progress": 0.4 }));
    let body = json!({ "results": tasks });
    let mock = MockTransport::with_handler(move |_, _| MockReply::Data(body.clone()));
    let client = SwarmClient::with_transport(&test_config(), Arc::new(mock), None);
    client.connect().await.unwrap();

    let results = client.task_results("s1").await.unwrap();

    assert_eq!(results.summary.total, 10);
    assert_eq!(results.summary.completed, 7);
    assert_eq!(results.summary.failed, 2);
    assert_eq!(results.summary.running, 1);
    assert!((results.efficiency - 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn test_operations_fail_fast_when_disconnected() {
    let server = FakeServer::new();
    let transport = server.transport();
    let client = SwarmClient::with_transport(&test_config(), Arc::new(transport.clone()), None);

    let err = client.init_swarm(&swarm_config("offline")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert!(transport.calls().is_empty());
    assert!(client.swarms().is_empty());
    assert_eq!(client.error_history().len(), 1);
}

#[tokio::test]
async fn test_failure_leaves_mirror_untouched() {
    let server = FakeServer::new();
    server.add_agent("s1", "a1", "idle", 0.5);
    let (api, _) = server.connected_api().await;
    let client = api.client();
    let before = client.swarm_status("s1").await.unwrap();

    server.fail_once("agent_spawn");
    let err = client
        .spawn_agent("s1", swarm_client::AgentConfig::new("x", "worker"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AgentError);
    assert_eq!(client.swarm("s1").unwrap(), before);
}

#[tokio::test]
async fn test_accessors_return_copies() {
    let server = FakeServer::new();
    server.add_agent("s1", "a1", "idle", 0.5);
    let (api, _) = server.connected_api().await;
    let client = api.client();
    client.swarm_status("s1").await.unwrap();

    let mut copy = client.swarm("s1").unwrap();
    copy.agents.clear();
    copy.name = "mutated".to_string();

    let fresh = client.swarm("s1").unwrap();
    assert_eq!(fresh.agents.len(), 1);
    assert_ne!(fresh.name, "mutated");
}

#[test]
fn test_status_event_replay_is_idempotent() {
    let mut swarm = SwarmState::new("s1", &swarm_config("replay"));
    swarm.upsert_agent(swarm_client::AgentState::new(
        "a1",
        swarm_client::AgentConfig::new("a1", "worker"),
    ));
    let event = SwarmEvent::new(
        EventKind::AgentStatusChanged,
        "server",
        json!({ "swarmId": "s1", "agentId": "a1", "status": "busy" }),
    )
    .at(Utc::now() + ChronoDuration::seconds(1));

    swarm.apply_event(&event);
    let once = swarm.clone();
    swarm.apply_event(&event);

    assert_eq!(swarm, once);
    assert_eq!(swarm.agent("a1").unwrap().status, AgentStatus::Busy);
}

#[tokio::test]
async fn test_push_events_use_last_write_wins() {
    let server = FakeServer::new();
    server.add_agent("s1", "a1", "idle", 0.5);
    server.add_task("s1", "t1", "queued");
    let transport = server.transport();
    let client = SwarmClient::with_transport(&test_config(), Arc::new(transport.clone()), None);
    client.connect().await.unwrap();
    client.swarm_status("s1").await.unwrap();

    let now = Utc::now() + ChronoDuration::seconds(1);
    transport.push_event(
        SwarmEvent::new(
            EventKind::AgentStatusChanged,
            "server",
            json!({ "swarmId": "s1", "agentId": "a1", "status": "busy" }),
        )
        .at(now),
    );
    transport.push_event(
        SwarmEvent::new(
            EventKind::TaskCompleted,
            "server",
            json!({ "swarmId": "s1", "taskId": "t1", "agentId": "a1" }),
        )
        .at(now),
    );
    assert!(
        wait_until(|| {
            client
                .swarm("s1")
                .and_then(|s| s.task("t1").map(|t| t.status == TaskStatus::Completed))
                .unwrap_or(false)
        })
        .await
    );
    assert_eq!(client.agent("s1", "a1").unwrap().status, AgentStatus::Busy);

    // an update older than the current state is ignored
    transport.push_event(
        SwarmEvent::new(
            EventKind::AgentStatusChanged,
            "server",
            json!({ "swarmId": "s1", "agentId": "a1", "status": "error" }),
        )
        .at(now - ChronoDuration::hours(1)),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.agent("s1", "a1").unwrap().status, AgentStatus::Busy);
}

#[tokio::test]
async fn test_agent_metrics_update_mirror() {
    let server = FakeServer::new();
    server.add_agent("s1", "a1", "idle", 0.5);
    let transport = MockTransport::new();
    let fake = server.clone();
    transport.set_handler(move |op, params| match op {
        "agent_metrics" => MockReply::Data(json!({
            "agentId": "a1",
            "status": "active",
            "performance": { "tasksCompleted": 4, "efficiencyScore": 0.95 },
            "memoryUsageBytes": 2048,
        })),
        _ => fake.handle(op, params),
    });
    let client = SwarmClient::with_transport(&test_config(), Arc::new(transport), None);
    client.connect().await.unwrap();
    client.swarm_status("s1").await.unwrap();

    let metrics = client.agent_metrics("s1", "a1").await.unwrap();

    assert_eq!(metrics.performance.tasks_completed, 4);
    let agent = client.agent("s1", "a1").unwrap();
    assert_eq!(agent.status, AgentStatus::Active);
    assert_eq!(agent.memory_usage_bytes, 2048);
    assert!((agent.performance.efficiency_score - 0.95).abs() < 1e-9);
}
