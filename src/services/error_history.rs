use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

use crate::domain::errors::{ClientError, ErrorKind};

/// One observed failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: ErrorKind,
    pub operation: Option<String>,
    pub message: String,
    pub retryable: bool,
}

/// Bounded log of recent failures, oldest evicted first.
#[derive(Debug)]
pub struct ErrorHistory {
    capacity: usize,
    entries: Mutex<VecDeque<ErrorRecord>>,
}

impl Default for ErrorHistory {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ErrorHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn record(&self, operation: Option<&str>, error: &ClientError) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(ErrorRecord {
            timestamp: Utc::now(),
            kind: error.kind(),
            operation: operation.map(str::to_string),
            message: error.to_string(),
            retryable: error.is_retryable(),
        });
    }

    /// Copy of the retained records, oldest first.
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let history = ErrorHistory::new(3);
        for i in 0..5 {
            history.record(Some("op"), &ClientError::unknown(format!("e{i}")));
        }
        let records = history.snapshot();
        assert_eq!(records.len(), 3);
        assert!(records[0].message.contains("e2"));
        assert!(records[2].message.contains("e4"));
    }

    #[test]
    fn test_record_fields() {
        let history = ErrorHistory::default();
        history.record(None, &ClientError::connection("refused"));
        let record = &history.snapshot()[0];
        assert_eq!(record.kind, ErrorKind::ConnectionError);
        assert!(record.retryable);
        assert!(record.operation.is_none());
    }
}
