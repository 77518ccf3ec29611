//! Correlation of outgoing requests with their responses.
//!
//! Each pending operation is keyed by a unique id. Resolving, rejecting or
//! timing out removes the entry, so a later resolution for the same id finds
//! nothing and is ignored.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::{ClientError, ClientResult};

pub type OperationOutcome = ClientResult<Value>;

#[derive(Debug)]
struct PendingOperation {
    operation: String,
    created_at: Instant,
    responder: oneshot::Sender<OperationOutcome>,
}

/// Table of in-flight operations.
#[derive(Debug, Default)]
pub struct OperationQueue {
    pending: Mutex<HashMap<String, PendingOperation>>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `operation` under a freshly generated id.
    pub fn register(&self, operation: &str) -> (String, oneshot::Receiver<OperationOutcome>) {
        let mut pending = self.pending.lock();
        let mut id = Uuid::new_v4().to_string();
        while pending.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }
        let rx = insert(&mut pending, id.clone(), operation);
        (id, rx)
    }

    #[cfg(test)]
    fn register_with_id(
        &self,
        id: &str,
        operation: &str,
    ) -> ClientResult<oneshot::Receiver<OperationOutcome>> {
        let mut pending = self.pending.lock();
        if pending.contains_key(id) {
            return Err(ClientError::validation(format!(
                "operation id '{id}' is already pending"
            )));
        }
        Ok(insert(&mut pending, id.to_string(), operation))
    }

    /// Deliver the outcome for `id`. Returns false if nothing was pending.
    pub fn resolve(&self, id: &str, outcome: OperationOutcome) -> bool {
        let Some(entry) = self.pending.lock().remove(id) else {
            debug!(operation_id = id, "Ignoring response for unknown or settled operation");
            return false;
        };
        debug!(
            operation_id = id,
            operation = %entry.operation,
            elapsed_ms = u64::try_from(entry.created_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            ok = outcome.is_ok(),
            "Operation settled"
        );
        // the caller may have stopped waiting
        let _ = entry.responder.send(outcome);
        true
    }

    /// Drop the entry for `id` without delivering anything.
    pub fn remove(&self, id: &str) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Reject every pending operation with `error`. Returns how many there were.
    pub fn reject_all(&self, error: &ClientError) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.responder.send(Err(error.clone()));
        }
        if count > 0 {
            debug!(count, error = %error, "Rejected pending operations");
        }
        count
    }

    #[cfg(test)]
    fn contains(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

fn insert(
    pending: &mut HashMap<String, PendingOperation>,
    id: String,
    operation: &str,
) -> oneshot::Receiver<OperationOutcome> {
    let (tx, rx) = oneshot::channel();
    pending.insert(
        id,
        PendingOperation {
            operation: operation.to_string(),
            created_at: Instant::now(),
            responder: tx,
        },
    );
    rx
}
