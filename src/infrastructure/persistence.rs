//! In-process [`MemorySink`].

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::errors::ClientResult;
use crate::domain::ports::MemorySink;

/// Memory sink backed by a shared hash map. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl MemorySink for InMemorySink {
    async fn store(&self, key: &str, value: Value) -> ClientResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn load(&self, key: &str) -> ClientResult<Option<Value>> {
        Ok(self.entries.read().get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_store_and_load() {
        let sink = InMemorySink::new();
        sink.store("swarm/s1/memory", json!({"k": 1})).await.unwrap();
        let shared = sink.clone();
        assert_eq!(
            shared.load("swarm/s1/memory").await.unwrap(),
            Some(json!({"k": 1}))
        );
        assert_eq!(sink.load("missing").await.unwrap(), None);
        assert_eq!(sink.keys(), vec!["swarm/s1/memory".to_string()]);
    }
}
