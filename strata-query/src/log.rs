//! Per-query diagnostic log.
//!
//! Entries are kept with the query result for callers that want the detail,
//! and always mirrored to `tracing` at debug.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Milliseconds since the query started
    pub elapsed_ms: u64,
    pub message: String,
}

/// Shared, append-only log for one query; clones share the same entries
#[derive(Clone)]
pub struct SolutionLog {
    query_id: Uuid,
    started: Instant,
    enabled: bool,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl SolutionLog {
    pub fn new(query_id: Uuid, enabled: bool) -> Self {
        Self {
            query_id,
            started: Instant::now(),
            enabled,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A log that keeps nothing
    pub fn disabled() -> Self {
        Self::new(Uuid::nil(), false)
    }

    pub fn query_id(&self) -> Uuid {
        self.query_id
    }

    pub fn record(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(query_id = %self.query_id, "{}", message);
        if self.enabled {
            self.entries.lock().push(LogEntry {
                elapsed_ms: self.started.elapsed().as_millis() as u64,
                message,
            });
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.lock().iter().any(|e| e.message.contains(needle))
    }
}

impl std::fmt::Debug for SolutionLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolutionLog")
            .field("query_id", &self.query_id)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_log_keeps_nothing() {
        let log = SolutionLog::disabled();
        log.record("ignored");
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_clones_share_entries() {
        let log = SolutionLog::new(Uuid::new_v4(), true);
        let clone = log.clone();
        clone.record("attempt 1");
        assert_eq!(log.entries().len(), 1);
        assert!(log.contains("attempt"));
    }
}
