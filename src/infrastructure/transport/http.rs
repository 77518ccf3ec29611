//! Request/response fallback over HTTP.

use async_trait::async_trait;
use reqwest::{header, Client as ReqwestClient, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::domain::errors::{ClientError, ClientResult};
use crate::domain::models::WireError;
use crate::domain::ports::RequestTransport;

/// POSTs each operation to `{base_url}/{operation}`.
#[derive(Debug, Clone)]
pub struct HttpRequestTransport {
    http_client: ReqwestClient,
    base_url: String,
    timeout: Duration,
}

impl HttpRequestTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ClientResult<Self> {
        let http_client = ReqwestClient::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ClientError::connection(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn endpoint(&self, operation: &str) -> String {
        format!("{}/{operation}", self.base_url)
    }
}

/// Accept either a bare JSON body or a response/error envelope.
fn unwrap_body(body: Value) -> ClientResult<Value> {
    match body.get("type").and_then(Value::as_str) {
        Some("response") => Ok(body.get("data").cloned().unwrap_or(Value::Null)),
        Some("error") => {
            let error: WireError =
                serde_json::from_value(body.get("error").cloned().unwrap_or(Value::Null))?;
            Err(ClientError::from_wire(error))
        }
        _ => Ok(body),
    }
}

fn retry_after_ms(headers: &header::HeaderMap) -> Option<u64> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}

#[async_trait]
impl RequestTransport for HttpRequestTransport {
    async fn request(&self, operation: &str, params: Value) -> ClientResult<Value> {
        let url = self.endpoint(operation);
        debug!(operation, %url, "Issuing fallback request");

        let response = self
            .http_client
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClientError::timeout(operation, self.timeout)
                } else {
                    ClientError::Network {
                        message: format!("{operation}: {e}"),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_ms(response.headers());
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());
            return Err(match ClientError::from_status(status.as_u16(), body) {
                ClientError::RateLimit { message, .. } if status == StatusCode::TOO_MANY_REQUESTS => {
                    ClientError::RateLimit {
                        message,
                        retry_after_ms: retry_after,
                    }
                }
                other => other,
            });
        }

        let body: Value = response.json().await.map_err(|e| ClientError::Network {
            message: format!("Failed to parse '{operation}' response: {e}"),
            status: Some(status.as_u16()),
        })?;
        unwrap_body(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_unwrap_bare_and_enveloped_bodies() {
        assert_eq!(unwrap_body(json!({"swarmId": "s1"})).unwrap(), json!({"swarmId": "s1"}));
        assert_eq!(
            unwrap_body(json!({"type": "response", "data": {"ok": 1}})).unwrap(),
            json!({"ok": 1})
        );
        let err = unwrap_body(json!({"type": "error", "error": {"code": "SWARM_ERROR", "message": "gone"}}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SwarmError);
    }

    #[test]
    fn test_endpoint_joins_operation() {
        let transport =
            HttpRequestTransport::new("http://localhost:8080/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(transport.endpoint("swarm_status"), "http://localhost:8080/api/swarm_status");
    }
}
