//! Business-registry session (spec §3 "Session (Business Registry)").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Awaiting the user-driven candidate-listing step to finish.
    PendingCompanySelection,
    /// Claimed by a worker, candidate search in flight.
    Processing,
    /// All child `PersonalRightsSearch` rows have reached a terminal state
    /// (spec §3 invariant).
    Completed,
    Error,
}

/// A user-initiated multi-step business-registry search (spec §3, §4.4).
///
/// Invariant: reaches `Completed`/`Error` only when every child
/// `PersonalRightsSearch` it spawned is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessRegistrySession {
    pub id: String,
    pub status: SessionStatus,
    /// Set by the scraper once the candidate-listing step finishes; only
    /// then is the session eligible for a worker to claim it further
    /// (spec §4.4 step 2).
    pub req_completed: bool,
    pub candidate_companies: Vec<String>,
    pub selected_company: Option<String>,
    /// Names to search, materialized once a company is selected. Each one
    /// spawns a child `PersonalRightsSearch` (created by the datastore, not
    /// by the worker — spec §3 invariant on `PersonalRightsSearch`).
    pub names_to_search: Vec<String>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl BusinessRegistrySession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: SessionStatus::PendingCompanySelection,
            req_completed: false,
            candidate_companies: Vec::new(),
            selected_company: None,
            names_to_search: Vec::new(),
            worker_id: None,
            created_at: Utc::now(),
            completed_at: None,
            last_error: None,
        }
    }

    pub fn is_claimable(&self) -> bool {
        self.status == SessionStatus::PendingCompanySelection && self.req_completed
    }
}
