use chrono::{DateTime, Utc};
use serde::Serialize;

/// One mutation that did not commit during a drain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRunError {
    pub mutation_id: String,
    pub reason: String,
}

/// Summary of one drain cycle. Returned to the caller, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub succeeded: usize,
    pub failed: usize,
    /// Mutations deferred because an earlier write to the same entity did not commit.
    pub skipped: usize,
    pub errors: Vec<SyncRunError>,
}

impl SyncRun {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            errors: Vec::new(),
        }
    }

    pub fn record_failure(&mut self, mutation_id: &str, reason: impl Into<String>) {
        self.failed += 1;
        self.errors.push(SyncRunError {
            mutation_id: mutation_id.to_string(),
            reason: reason.into(),
        });
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}
