//! Common test utilities for integration tests
//!
//! Provides a stateful fake orchestration server on top of `MockTransport`
//! plus the logging setup shared by the integration test files.

#![allow(dead_code)]

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use swarm_client::domain::models::WireError;
use swarm_client::infrastructure::transport::{MockReply, MockTransport};
use swarm_client::{ClientConfig, SwarmApi, SwarmClient};

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Config pointing at the mock server with short timeouts.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new("ws://mock.test/swarm");
    config.operation_timeout_ms = 2_000;
    config.connect_timeout_ms = 1_000;
    config
}

#[derive(Default)]
struct ServerState {
    next_id: usize,
    /// swarm id -> agents, in spawn order
    agents: BTreeMap<String, Vec<Value>>,
    tasks: BTreeMap<String, Vec<Value>>,
    /// operations answered with an error once each
    fail_once: Vec<String>,
}

/// In-memory simulation of the orchestration service.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock transport whose requests are answered by this server.
    pub fn transport(&self) -> MockTransport {
        let server = self.clone();
        MockTransport::with_handler(move |op, params| server.handle(op, params))
    }

    /// Connected API over a fresh mock transport.
    pub async fn connected_api(&self) -> (SwarmApi, MockTransport) {
        let transport = self.transport();
        let client = SwarmClient::with_transport(&test_config(), Arc::new(transport.clone()), None);
        client.connect().await.unwrap();
        (SwarmApi::new(client), transport)
    }

    /// Answer the next `operation` request with an agent error.
    pub fn fail_once(&self, operation: &str) {
        self.state.lock().fail_once.push(operation.to_string());
    }

    pub fn add_agent(&self, swarm_id: &str, agent_id: &str, status: &str, efficiency: f64) {
        let mut state = self.state.lock();
        state.agents.entry(swarm_id.to_string()).or_default().push(json!({
            "id": agent_id,
            "status": status,
            "config": { "name": agent_id, "type": "worker" },
            "performance": { "efficiencyScore": efficiency },
        }));
    }

    pub fn add_task(&self, swarm_id: &str, task_id: &str, status: &str) {
        let mut state = self.state.lock();
        state
            .tasks
            .entry(swarm_id.to_string())
            .or_default()
            .push(json!({ "taskId": task_id, "status": status }));
    }

    pub fn agent_ids(&self, swarm_id: &str) -> Vec<String> {
        self.state
            .lock()
            .agents
            .get(swarm_id)
            .map(|agents| {
                agents
                    .iter()
                    .filter_map(|a| a["id"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Answer one request the way the orchestration service would.
    pub fn handle(&self, operation: &str, params: &Value) -> MockReply {
        let mut state = self.state.lock();
        if let Some(pos) = state.fail_once.iter().position(|op| op == operation) {
            state.fail_once.remove(pos);
            return MockReply::Error(
                WireError::new("AGENT_ERROR", format!("{operation} rejected")).with_retryable(false),
            );
        }

        let swarm_id = params["swarmId"].as_str().unwrap_or_default().to_string();
        match operation {
            "swarm_init" => {
                state.next_id += 1;
                let id = format!("swarm-{}", state.next_id);
                state.agents.insert(id.clone(), Vec::new());
                MockReply::Data(json!({ "swarmId": id, "status": "active" }))
            }
            "agent_spawn" => {
                state.next_id += 1;
                let id = params["config"]["id"]
                    .as_str()
                    .map_or_else(|| format!("agent-{}", state.next_id), str::to_string);
                let agent = json!({
                    "id": id,
                    "status": "idle",
                    "config": params["config"],
                    "performance": { "efficiencyScore": 0.5 },
                });
                state.agents.entry(swarm_id).or_default().push(agent);
                MockReply::Data(json!({ "agentId": id, "status": "idle" }))
            }
            "agent_terminate" => {
                let agent_id = params["agentId"].as_str().unwrap_or_default();
                if let Some(agents) = state.agents.get_mut(&swarm_id) {
                    agents.retain(|a| a["id"] != agent_id);
                }
                MockReply::Data(Value::Null)
            }
            "swarm_status" => MockReply::Data(json!({
                "id": swarm_id,
                "status": "active",
                "agents": state.agents.get(&swarm_id).cloned().unwrap_or_default(),
                "tasks": state.tasks.get(&swarm_id).cloned().unwrap_or_default(),
            })),
            "task_orchestrate" => {
                let submitted: Vec<Value> = params["tasks"]
                    .as_array()
                    .map(|tasks| {
                        tasks
                            .iter()
                            .map(|t| json!({ "taskId": t["id"], "status": "queued" }))
                            .collect()
                    })
                    .unwrap_or_default();
                state
                    .tasks
                    .entry(swarm_id)
                    .or_default()
                    .extend(submitted.iter().cloned());
                MockReply::Data(json!({ "tasks": submitted }))
            }
            "task_results" => {
                MockReply::Data(json!(state.tasks.get(&swarm_id).cloned().unwrap_or_default()))
            }
            "task_cancel" => {
                let task_id = params["taskId"].as_str().unwrap_or_default();
                if let Some(task) = state
                    .tasks
                    .get_mut(&swarm_id)
                    .and_then(|tasks| tasks.iter_mut().find(|t| t["taskId"] == task_id))
                {
                    task["status"] = json!("cancelled");
                }
                MockReply::Data(Value::Null)
            }
            "memory_export" => MockReply::Data(json!({ "swarmId": swarm_id, "entries": ["fact"] })),
            "swarm_terminate" => {
                state.agents.remove(&swarm_id);
                MockReply::Data(Value::Null)
            }
            other => MockReply::Error(WireError::new("UNKNOWN_OPERATION", other)),
        }
    }
}

/// Ids in the order they appear in a recorded `tasks` parameter.
pub fn submitted_ids(params: &Value) -> Vec<String> {
    params["tasks"]
        .as_array()
        .map(|tasks| {
            tasks
                .iter()
                .filter_map(|t| t["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub fn unique<T: std::hash::Hash + Eq>(items: impl IntoIterator<Item = T>) -> usize {
    items.into_iter().collect::<HashSet<_>>().len()
}
