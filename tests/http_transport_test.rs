//! HTTP fallback transport against a mock server.

mod common;

use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::test_config;
use swarm_client::domain::models::ChannelKind;
use swarm_client::infrastructure::transport::MockTransport;
use swarm_client::{ClientError, ErrorKind, HttpRequestTransport, RequestTransport, SwarmClient};

fn transport(server: &Server) -> HttpRequestTransport {
    HttpRequestTransport::new(server.url(), Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn test_posts_operation_params() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/swarm_status")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({ "swarmId": "s1" })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "id": "s1", "status": "active" }).to_string())
        .create_async()
        .await;

    let body = transport(&server)
        .request("swarm_status", json!({ "swarmId": "s1" }))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(body["status"], "active");
}

#[tokio::test]
async fn test_unwraps_response_envelope() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/swarm_init")
        .with_status(200)
        .with_body(json!({ "type": "response", "data": { "swarmId": "s9" } }).to_string())
        .create_async()
        .await;

    let body = transport(&server).request("swarm_init", json!({})).await.unwrap();
    assert_eq!(body, json!({ "swarmId": "s9" }));
}

#[tokio::test]
async fn test_error_envelope_maps_to_kind() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/agent_spawn")
        .with_status(200)
        .with_body(
            json!({
                "type": "error",
                "error": { "code": "AGENT_ERROR", "message": "capacity reached", "retryable": true }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let err = transport(&server).request("agent_spawn", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AgentError);
    assert!(err.is_retryable());
    assert!(err.to_string().contains("capacity reached"));
}

#[tokio::test]
async fn test_http_status_classification() {
    let mut server = Server::new_async().await;
    let _unauthorized = server
        .mock("POST", "/swarm_status")
        .with_status(401)
        .with_body("bad token")
        .create_async()
        .await;
    let _limited = server
        .mock("POST", "/task_results")
        .with_status(429)
        .with_header("retry-after", "3")
        .with_body("slow down")
        .create_async()
        .await;
    let _broken = server
        .mock("POST", "/memory_usage")
        .with_status(500)
        .with_body("internal")
        .create_async()
        .await;
    let http = transport(&server);

    let err = http.request("swarm_status", json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationError);
    assert!(!err.is_retryable());

    let err = http.request("task_results", json!({})).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::RateLimit {
            retry_after_ms: Some(3_000),
            ..
        }
    ));
    assert!(err.is_retryable());

    let err = http.request("memory_usage", json!({})).await.unwrap_err();
    assert!(matches!(err, ClientError::Network { status: Some(500), .. }));
}

#[tokio::test]
async fn test_client_falls_back_when_socket_refused() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/swarm_status")
        .with_status(200)
        .with_body(json!({ "id": "s1", "status": "active", "agents": [] }).to_string())
        .create_async()
        .await;

    let socket = MockTransport::new();
    socket.refuse_connections(true);
    let client = SwarmClient::with_transport(
        &test_config(),
        Arc::new(socket.clone()),
        Some(Arc::new(transport(&server))),
    );
    client.connect().await.unwrap();

    let state = client.swarm_status("s1").await.unwrap();

    mock.assert_async().await;
    assert_eq!(state.id, "s1");
    assert_eq!(client.connection().state().channel, ChannelKind::Request);
    assert!(socket.calls().is_empty());
}
