use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::ClientResult;

/// Opaque key-value persistence for exported swarm memory.
#[async_trait]
pub trait MemorySink: Send + Sync {
    async fn store(&self, key: &str, value: Value) -> ClientResult<()>;

    async fn load(&self, key: &str) -> ClientResult<Option<Value>>;
}
