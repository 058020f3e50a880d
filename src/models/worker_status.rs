//! Per-running-worker liveness record (spec §3 "WorkerStatus", §4.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Busy,
    Error,
    Offline,
}

/// Invariant: `last_heartbeat` monotonically advances while the worker is
/// alive; a row older than the dead threshold is a reap candidate (spec §3, §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub state: WorkerState,
    pub current_job_id: Option<String>,
    pub current_environment: Option<String>,
    pub credential_id: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
}

impl WorkerStatus {
    pub fn new(worker_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            worker_id: worker_id.into(),
            state: WorkerState::Idle,
            current_job_id: None,
            current_environment: None,
            credential_id: None,
            last_heartbeat: now,
            jobs_completed: 0,
            jobs_failed: 0,
        }
    }

    pub fn is_dead(&self, now: DateTime<Utc>, dead_threshold: chrono::Duration) -> bool {
        now - self.last_heartbeat > dead_threshold
    }
}
