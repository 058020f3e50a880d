//! Personal/movable rights search (spec §3 "PersonalRightsSearch").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    NotFound,
}

impl SearchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SearchStatus::Completed | SearchStatus::Failed | SearchStatus::NotFound
        )
    }
}

/// One exact-name lookup against the personal/movable rights registry
/// (spec §3). Created automatically by a datastore-level rule on the parent
/// session — a worker only ever consumes these rows, never inserts them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalRightsSearch {
    pub id: String,
    pub session_id: String,
    pub search_name: String,
    pub status: SearchStatus,
    pub worker_id: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub artifact_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl PersonalRightsSearch {
    pub fn new(id: impl Into<String>, session_id: impl Into<String>, search_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            session_id: session_id.into(),
            search_name: search_name.into(),
            status: SearchStatus::Pending,
            worker_id: None,
            attempts: 0,
            max_attempts: 3,
            artifact_path: None,
            created_at: Utc::now(),
            completed_at: None,
            last_error: None,
        }
    }
}
